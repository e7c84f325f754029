use crate::error::StorageError;
use crate::record::ShortLinkRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;

/// Type alias for durable store results.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A page request for owner listings. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size,
        }
    }

    /// Number of rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.number.max(1) - 1) * u64::from(self.size)
    }
}

/// The authoritative, persisted mapping from short code to record.
///
/// Reads return expired records as well; callers decide what an expired
/// record means for them.
#[async_trait]
pub trait LinkStore: Send + Sync + 'static {
    /// Inserts a brand new record.
    ///
    /// Returns `Err(Conflict)` if any row already uses the code, expired or not.
    async fn create(&self, record: &ShortLinkRecord) -> Result<()>;

    /// Inserts a record, replacing an existing row with the same code only
    /// when that row has expired.
    ///
    /// Returns `Err(Conflict)` if a live record owns the code. The check and
    /// the write are atomic, so concurrent upserts of one code have a single
    /// winner.
    async fn upsert(&self, record: &ShortLinkRecord) -> Result<()>;

    /// Retrieves the record for a code, including expired ones.
    async fn get_by_code(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>>;

    /// Moves the expiry of a record that is still valid.
    ///
    /// Returns `false` when the record does not exist or has already expired.
    async fn update_expiry(&self, code: &ShortCode, expires_at: Timestamp) -> Result<bool>;

    /// Deletes the record for a code. Returns `true` if a row was removed.
    async fn delete_by_code(&self, code: &ShortCode) -> Result<bool>;

    /// Deletes every record whose expiry has passed and returns how many
    /// rows were removed.
    async fn delete_expired(&self) -> Result<u64>;

    /// Lists all records that have not expired.
    async fn list_active(&self) -> Result<Vec<ShortLinkRecord>>;

    /// Adds `views` to the persisted view count of a record.
    ///
    /// Returns `false` when no record exists for the code.
    async fn add_views(&self, code: &ShortCode, views: u64) -> Result<bool>;

    /// Lists an owner's records, newest first.
    async fn list_by_owner(&self, owner_id: u64, page: Page) -> Result<Vec<ShortLinkRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offset_is_zero_based() {
        assert_eq!(Page::new(1, 20).offset(), 0);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }

    #[test]
    fn page_zero_is_clamped_to_first_page() {
        let page = Page::new(0, 10);
        assert_eq!(page.number, 1);
        assert_eq!(page.offset(), 0);
    }
}
