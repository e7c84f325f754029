//! Runs the MySQL store against a real server. Requires docker:
//! `cargo test -p tinylink-storage -- --ignored`.

use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use sqlx::mysql::MySqlPoolOptions;
use tinylink_core::{ShortCode, ShortLinkRecord};
use tinylink_storage::{LinkStore, MySqlLinkStore, Page, StorageError};
use tinylink_test_infra::mysql::{MySqlServer, MysqlConfig};

struct Fixture {
    _mysql: MySqlServer,
    store: MySqlLinkStore,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::new(MysqlConfig::default())
            .await
            .expect("start mysql");
        let url = mysql.database_url().await.expect("mysql url");
        let store = MySqlLinkStore::new(connect_with_retry(&url).await);
        store.ensure_schema().await.expect("create schema");

        Self {
            _mysql: mysql,
            store,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::MySqlPool {
    let mut last_error = None;

    for _ in 0..20 {
        match MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
        {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect mysql: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

fn record(c: &str, url: &str, expires_in: SignedDuration) -> ShortLinkRecord {
    // Millisecond precision matches the column type.
    let now = Timestamp::from_millisecond(Timestamp::now().as_millisecond()).unwrap();
    ShortLinkRecord {
        code: code(c),
        original_url: url.to_string(),
        owner_id: 9,
        is_custom: true,
        expires_at: now + expires_in,
        created_at: now,
        view_count: 0,
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn create_and_get_round_trips_every_column() {
    let fixture = Fixture::start().await;
    let rec = record("abc123", "https://example.com", SignedDuration::from_hours(1));

    fixture.store.create(&rec).await.unwrap();

    let got = fixture.store.get_by_code(&rec.code).await.unwrap().unwrap();
    assert_eq!(got, rec);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn create_conflicts_when_code_already_exists() {
    let fixture = Fixture::start().await;
    let hour = SignedDuration::from_hours(1);

    fixture
        .store
        .create(&record("abc123", "https://one.example", hour))
        .await
        .unwrap();

    let err = fixture
        .store
        .create(&record("abc123", "https://two.example", hour))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn upsert_replaces_only_expired_rows() {
    let fixture = Fixture::start().await;
    let hour = SignedDuration::from_hours(1);

    fixture
        .store
        .create(&record("reused", "https://old.example", -hour))
        .await
        .unwrap();
    fixture
        .store
        .upsert(&record("reused", "https://new.example", hour))
        .await
        .unwrap();

    let got = fixture.store.get_by_code(&code("reused")).await.unwrap().unwrap();
    assert_eq!(got.original_url, "https://new.example");

    let err = fixture
        .store
        .upsert(&record("reused", "https://third.example", hour))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

async fn race_upserts(store: &MySqlLinkStore, c: &str, hour: SignedDuration) -> (usize, usize) {
    let mut handles = vec![];
    for i in 0..5 {
        let store = store.clone();
        let rec = record(c, &format!("https://racer{i}.example"), hour);
        handles.push(tokio::spawn(async move { store.upsert(&rec).await }));
    }

    let (mut won, mut conflicted) = (0, 0);
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => won += 1,
            Err(StorageError::Conflict(_)) => conflicted += 1,
            Err(e) => panic!("racing upsert failed with {e:?}"),
        }
    }
    (won, conflicted)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires docker"]
async fn concurrent_upserts_have_one_winner() {
    let fixture = Fixture::start().await;
    let hour = SignedDuration::from_hours(1);

    assert_eq!(race_upserts(&fixture.store, "fresh1", hour).await, (1, 4));

    fixture
        .store
        .create(&record("stale1", "https://old.example", -hour))
        .await
        .unwrap();
    assert_eq!(race_upserts(&fixture.store, "stale1", hour).await, (1, 4));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn expiry_updates_and_cleanup() {
    let fixture = Fixture::start().await;
    let hour = SignedDuration::from_hours(1);

    fixture
        .store
        .create(&record("live01", "https://a.example", hour))
        .await
        .unwrap();
    fixture
        .store
        .create(&record("dead01", "https://b.example", -hour))
        .await
        .unwrap();

    let later = Timestamp::from_second(Timestamp::now().as_second() + 86_400).unwrap();
    assert!(fixture.store.update_expiry(&code("live01"), later).await.unwrap());
    assert!(!fixture.store.update_expiry(&code("dead01"), later).await.unwrap());

    let active = fixture.store.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].expires_at, later);

    assert_eq!(fixture.store.delete_expired().await.unwrap(), 1);
    assert!(fixture.store.get_by_code(&code("dead01")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn views_owner_listing_and_delete() {
    let fixture = Fixture::start().await;
    let hour = SignedDuration::from_hours(1);

    let mut older = record("older1", "https://a.example", hour);
    older.created_at = older.created_at - SignedDuration::from_secs(10);
    fixture.store.create(&older).await.unwrap();
    fixture
        .store
        .create(&record("newer1", "https://b.example", hour))
        .await
        .unwrap();

    assert!(fixture.store.add_views(&code("older1"), 5).await.unwrap());
    assert!(fixture.store.add_views(&code("older1"), 2).await.unwrap());
    assert!(!fixture.store.add_views(&code("absent"), 1).await.unwrap());

    let owned = fixture.store.list_by_owner(9, Page::new(1, 10)).await.unwrap();
    let codes: Vec<_> = owned.iter().map(|r| r.code.as_str()).collect();
    assert_eq!(codes, ["newer1", "older1"]);
    assert_eq!(owned[1].view_count, 7);

    assert!(fixture.store.delete_by_code(&code("newer1")).await.unwrap());
    assert!(!fixture.store.delete_by_code(&code("newer1")).await.unwrap());
}
