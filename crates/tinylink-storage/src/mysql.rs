use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::mysql::{MySqlDatabaseError, MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};
use tinylink_core::store::{LinkStore, Page, Result};
use tinylink_core::{ShortCode, ShortLinkRecord, StorageError};
use tracing::debug;

const SCHEMA: &str = include_str!("../ddl/mysql/short_links.sql");

const INSERT_RECORD: &str = r#"
    INSERT INTO short_links
        (short_code, original_url, owner_id, is_custom, expires_at, created_at, view_count)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_COLUMNS: &str =
    "short_code, original_url, owner_id, is_custom, expires_at, created_at, view_count";

/// MySQL implementation of [`LinkStore`].
///
/// Timestamps are stored as unix milliseconds. Expired rows stay in the
/// table until [`LinkStore::delete_expired`] removes them or an upsert for
/// the same code replaces them.
#[derive(Debug, Clone)]
pub struct MySqlLinkStore {
    pool: MySqlPool,
}

impl MySqlLinkStore {
    /// Creates a store from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a store by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the `short_links` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Swaps an expired holder of `record.code` for `record`.
    ///
    /// Only called once the code is known to have a row, so the delete
    /// locks that row rather than a gap. A live holder fails with
    /// [`StorageError::Conflict`].
    async fn replace_expired(&self, record: &ShortLinkRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let replaced = sqlx::query(
            r#"
            DELETE FROM short_links
            WHERE short_code = ?
              AND expires_at <= ?
            "#,
        )
        .bind(record.code.as_str())
        .bind(now_unix_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_replace_error(&record.code, e))?
        .rows_affected();

        if replaced == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StorageError::Conflict(record.code.to_string()));
        }

        sqlx::query(INSERT_RECORD)
            .bind(record.code.as_str())
            .bind(&record.original_url)
            .bind(record.owner_id)
            .bind(record.is_custom)
            .bind(record.expires_at.as_millisecond())
            .bind(record.created_at.as_millisecond())
            .bind(record.view_count)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_replace_error(&record.code, e))?;

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(code = %record.code, "Replaced expired record");
        Ok(())
    }
}

fn now_unix_millis() -> i64 {
    Timestamp::now().as_millisecond()
}

fn parse_timestamp(column: &str, millis: i64) -> Result<Timestamp> {
    Timestamp::from_millisecond(millis).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{millis}': {e}"))
    })
}

fn record_from_row(row: &MySqlRow) -> Result<ShortLinkRecord> {
    let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;

    Ok(ShortLinkRecord {
        code: ShortCode::new_unchecked(code),
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: row.try_get("owner_id").map_err(map_sqlx_error)?,
        is_custom: row.try_get("is_custom").map_err(map_sqlx_error)?,
        expires_at: parse_timestamp("expires_at", expires_at)?,
        created_at: parse_timestamp("created_at", created_at)?,
        view_count: row.try_get("view_count").map_err(map_sqlx_error)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn map_insert_error(code: &ShortCode, err: sqlx::Error) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(code.to_string())
    } else {
        map_sqlx_error(err)
    }
}

/// ER_LOCK_WAIT_TIMEOUT and ER_LOCK_DEADLOCK.
const LOCK_CONTENTION_ERRORS: [u16; 2] = [1205, 1213];

fn is_lock_contention(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.try_downcast_ref::<MySqlDatabaseError>())
        .is_some_and(|e| LOCK_CONTENTION_ERRORS.contains(&e.number()))
}

/// While replacing an expired row, losing a lock to another writer of the
/// same code means that writer claimed it.
fn map_replace_error(code: &ShortCode, err: sqlx::Error) -> StorageError {
    if is_lock_contention(&err) {
        StorageError::Conflict(code.to_string())
    } else {
        map_insert_error(code, err)
    }
}

#[async_trait]
impl LinkStore for MySqlLinkStore {
    async fn create(&self, record: &ShortLinkRecord) -> Result<()> {
        sqlx::query(INSERT_RECORD)
            .bind(record.code.as_str())
            .bind(&record.original_url)
            .bind(record.owner_id)
            .bind(record.is_custom)
            .bind(record.expires_at.as_millisecond())
            .bind(record.created_at.as_millisecond())
            .bind(record.view_count)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(&record.code, e))?;

        Ok(())
    }

    async fn upsert(&self, record: &ShortLinkRecord) -> Result<()> {
        // A plain insert first: it only locks the key it writes, so racing
        // claims of a fresh code end in a unique violation for all but one.
        match self.create(record).await {
            Err(StorageError::Conflict(_)) => self.replace_expired(record).await,
            other => other,
        }
    }

    async fn get_by_code(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM short_links WHERE short_code = ? LIMIT 1"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_expiry(&self, code: &ShortCode, expires_at: Timestamp) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE short_links
            SET expires_at = ?
            WHERE short_code = ?
              AND expires_at > ?
            "#,
        )
        .bind(expires_at.as_millisecond())
        .bind(code.as_str())
        .bind(now_unix_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_code(&self, code: &ShortCode) -> Result<bool> {
        let result = sqlx::query("DELETE FROM short_links WHERE short_code = ?")
            .bind(code.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM short_links WHERE expires_at <= ?")
            .bind(now_unix_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn list_active(&self) -> Result<Vec<ShortLinkRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM short_links WHERE expires_at > ?"
        ))
        .bind(now_unix_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn add_views(&self, code: &ShortCode, views: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE short_links
            SET view_count = view_count + ?
            WHERE short_code = ?
            "#,
        )
        .bind(views)
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_owner(&self, owner_id: u64, page: Page) -> Result<Vec<ShortLinkRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM short_links
            WHERE owner_id = ?
            ORDER BY created_at DESC, short_code ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(owner_id)
        .bind(u64::from(page.size))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }
}
