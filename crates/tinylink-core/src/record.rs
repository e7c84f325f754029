use crate::shortcode::ShortCode;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One allocated mapping from a short code to its target URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortLinkRecord {
    /// The short code, unique among records that have not expired.
    pub code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// Identifier of the principal that created the link.
    pub owner_id: u64,
    /// `true` when the caller supplied the code.
    pub is_custom: bool,
    /// The record is logically absent once this instant has passed.
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    /// Views merged into durable storage so far.
    #[serde(default)]
    pub view_count: u64,
}

impl ShortLinkRecord {
    /// Returns `true` if the record is no longer valid at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Timestamp::now())
    }

    /// Time left until expiry, or `None` when the record is already expired.
    ///
    /// Used as the cache TTL so a cached entry never outlives its record.
    pub fn ttl_from(&self, now: Timestamp) -> Option<Duration> {
        let remaining = self.expires_at.duration_since(now);
        if remaining <= SignedDuration::ZERO {
            return None;
        }
        Duration::try_from(remaining).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: Timestamp) -> ShortLinkRecord {
        ShortLinkRecord {
            code: ShortCode::new_unchecked("abc123"),
            original_url: "https://example.com".to_string(),
            owner_id: 7,
            is_custom: false,
            expires_at,
            created_at: Timestamp::UNIX_EPOCH,
            view_count: 0,
        }
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let now = Timestamp::now();
        assert!(record(now).is_expired_at(now));
        assert!(record(now - SignedDuration::from_secs(1)).is_expired_at(now));
        assert!(!record(now + SignedDuration::from_secs(1)).is_expired_at(now));
    }

    #[test]
    fn ttl_is_time_until_expiry() {
        let now = Timestamp::now();
        let rec = record(now + SignedDuration::from_hours(1));
        assert_eq!(rec.ttl_from(now), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn expired_record_has_no_ttl() {
        let now = Timestamp::now();
        assert_eq!(record(now).ttl_from(now), None);
        assert_eq!(
            record(now - SignedDuration::from_mins(5)).ttl_from(now),
            None
        );
    }

    #[test]
    fn json_round_trip_keeps_fields() {
        let rec = record(Timestamp::from_second(2_000_000_000).unwrap());
        let json = serde_json::to_string(&rec).unwrap();
        let back: ShortLinkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
