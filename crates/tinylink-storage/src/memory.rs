use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use std::cmp::Reverse;
use tinylink_core::store::{LinkStore, Page, Result};
use tinylink_core::{ShortCode, ShortLinkRecord, StorageError};

/// In-memory implementation of [`LinkStore`] using DashMap.
///
/// DashMap provides better concurrency than RwLock<HashMap> because it
/// uses sharded locks, allowing concurrent reads and writes to different
/// buckets without blocking. Conditional writes go through the entry API,
/// which holds the shard lock across the check and the write.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    storage: DashMap<String, ShortLinkRecord>,
}

impl InMemoryLinkStore {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }

    /// Creates a new in-memory store with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: DashMap::with_capacity(capacity),
        }
    }

    /// Number of rows held, expired ones included.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn create(&self, record: &ShortLinkRecord) -> Result<()> {
        match self.storage.entry(record.code.as_str().to_owned()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(record.code.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn upsert(&self, record: &ShortLinkRecord) -> Result<()> {
        let now = Timestamp::now();
        match self.storage.entry(record.code.as_str().to_owned()) {
            Entry::Occupied(existing) if !existing.get().is_expired_at(now) => {
                Err(StorageError::Conflict(record.code.to_string()))
            }
            Entry::Occupied(mut expired) => {
                expired.insert(record.clone());
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get_by_code(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        Ok(self.storage.get(code.as_str()).map(|entry| entry.clone()))
    }

    async fn update_expiry(&self, code: &ShortCode, expires_at: Timestamp) -> Result<bool> {
        let Some(mut entry) = self.storage.get_mut(code.as_str()) else {
            return Ok(false);
        };
        if entry.is_expired_at(Timestamp::now()) {
            return Ok(false);
        }
        entry.expires_at = expires_at;
        Ok(true)
    }

    async fn delete_by_code(&self, code: &ShortCode) -> Result<bool> {
        Ok(self.storage.remove(code.as_str()).is_some())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Timestamp::now();
        let before = self.storage.len();
        self.storage.retain(|_, record| !record.is_expired_at(now));
        Ok(before.saturating_sub(self.storage.len()) as u64)
    }

    async fn list_active(&self) -> Result<Vec<ShortLinkRecord>> {
        let now = Timestamp::now();
        Ok(self
            .storage
            .iter()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn add_views(&self, code: &ShortCode, views: u64) -> Result<bool> {
        let Some(mut entry) = self.storage.get_mut(code.as_str()) else {
            return Ok(false);
        };
        entry.view_count = entry.view_count.saturating_add(views);
        Ok(true)
    }

    async fn list_by_owner(&self, owner_id: u64, page: Page) -> Result<Vec<ShortLinkRecord>> {
        let mut owned = self
            .storage
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.clone())
            .collect::<Vec<_>>();
        owned.sort_by_key(|record| (Reverse(record.created_at), record.code.clone()));

        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        Ok(owned
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .collect())
    }
}
