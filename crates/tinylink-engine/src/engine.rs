use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use jiff::{SignedDuration, Timestamp};
use std::sync::Arc;
use tinylink_core::{
    ExistenceFilter, LinkCache, LinkStore, Page, ShortCode, ShortLinkRecord, StorageError,
};
use tinylink_generator::Generator;
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

/// Availability of a short code for a new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeStatus {
    /// No record uses the code.
    Available,
    /// A record uses the code but has expired, so the code may be reused.
    Expired,
    /// A live record owns the code.
    InUse,
}

/// Parameters for creating a short link.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewLink {
    #[builder(setter(into))]
    pub original_url: String,
    #[builder(default)]
    pub owner_id: u64,
    /// Caller-chosen code. A random one is allocated when absent.
    #[builder(default, setter(strip_option))]
    pub custom_code: Option<ShortCode>,
    /// Lifetime in hours. The configured default applies when absent.
    #[builder(default, setter(strip_option))]
    pub duration_hours: Option<i64>,
}

/// Totals from one pass of [`LinkEngine::sync_views`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Counter keys returned by the scan.
    pub scanned: usize,
    /// Counters merged into a stored record.
    pub merged: usize,
    /// Views added to stored records.
    pub views: u64,
    /// Counters removed without a record to merge into.
    pub orphaned: usize,
}

/// Allocates, resolves and maintains short links.
///
/// The engine coordinates four collaborators: the durable [`LinkStore`],
/// the [`LinkCache`] holding hot records and pending view counters, the
/// in-process [`ExistenceFilter`] and a code [`Generator`]. It holds no
/// per-call state; clones share the same collaborators.
pub struct LinkEngine<S, C, F, G> {
    store: Arc<S>,
    cache: Arc<C>,
    filter: Arc<F>,
    generator: Arc<G>,
    config: Arc<EngineConfig>,
}

impl<S, C, F, G> Clone for LinkEngine<S, C, F, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            filter: Arc::clone(&self.filter),
            generator: Arc::clone(&self.generator),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, C, F, G> LinkEngine<S, C, F, G>
where
    S: LinkStore,
    C: LinkCache,
    F: ExistenceFilter,
    G: Generator,
{
    pub fn new(store: S, cache: C, filter: F, generator: G, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            cache: Arc::new(cache),
            filter: Arc::new(filter),
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a reference to the durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a reference to the cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Creates a short link and returns its full short URL.
    ///
    /// `custom_code` is validated first; a malformed one fails with
    /// [`EngineError::InvalidShortCode`].
    pub async fn create(
        &self,
        original_url: impl Into<String>,
        custom_code: Option<&str>,
        duration_hours: Option<i64>,
    ) -> Result<String> {
        let custom_code = custom_code.map(ShortCode::new).transpose()?;
        let request = NewLink {
            original_url: original_url.into(),
            owner_id: 0,
            custom_code,
            duration_hours,
        };
        let record = self.create_link(request).await?;
        Ok(record.code.to_url(&self.config.base_url))
    }

    /// Creates a short link and returns the stored record.
    pub async fn create_link(&self, request: NewLink) -> Result<ShortLinkRecord> {
        let duration = self.link_duration(request.duration_hours)?;

        let record = match request.custom_code.clone() {
            Some(code) => self.claim_custom(code, &request, duration).await?,
            None => self.claim_generated(&request, duration).await?,
        };

        // Only committed codes enter the filter.
        self.filter.add(&record.code);
        info!(
            code = %record.code,
            owner_id = record.owner_id,
            custom = record.is_custom,
            expires_at = %record.expires_at,
            "Created short link"
        );

        self.warm_cache(record.clone());
        Ok(record)
    }

    /// Resolves a short code to its original URL.
    ///
    /// A negative filter answer returns [`EngineError::NotFound`] without
    /// touching the cache or the store. Cache failures fall back to the store.
    pub async fn resolve(&self, code: &ShortCode) -> Result<String> {
        trace!(code = %code, "Resolving short code");

        if !self.filter.exists(code) {
            trace!(code = %code, "Filter reports code absent");
            return Err(EngineError::NotFound(code.to_string()));
        }

        let now = Timestamp::now();
        match self.cache.get_link(code).await {
            Ok(Some(record)) if !record.is_expired_at(now) => {
                debug!(code = %code, "Resolved from cache");
                return Ok(record.original_url);
            }
            Ok(Some(_)) => {
                debug!(code = %code, "Cached record has expired, treating as miss");
            }
            Ok(None) => {
                trace!(code = %code, "Cache miss");
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Cache error on resolve, falling back to store");
            }
        }

        let record = match self.store.get_by_code(code).await? {
            Some(record) if !record.is_expired_at(now) => record,
            Some(_) => {
                debug!(code = %code, "Record has expired");
                return Err(EngineError::NotFound(code.to_string()));
            }
            None => {
                trace!(code = %code, "Short code not found in store");
                return Err(EngineError::NotFound(code.to_string()));
            }
        };

        let original_url = record.original_url.clone();
        self.warm_cache(record);
        debug!(code = %code, url = %original_url, "Resolved from store");
        Ok(original_url)
    }

    /// Reports whether `code` can be used for a new link.
    pub async fn check_code_status(&self, code: &ShortCode) -> Result<CodeStatus> {
        if !self.filter.exists(code) {
            return Ok(CodeStatus::Available);
        }

        let status = match self.store.get_by_code(code).await? {
            None => CodeStatus::Available,
            Some(record) if record.is_expired() => CodeStatus::Expired,
            Some(_) => CodeStatus::InUse,
        };
        Ok(status)
    }

    /// Counts one view of `code` in the cache.
    ///
    /// Views are merged into the store later by [`LinkEngine::sync_views`].
    /// A cache failure loses the view and is only logged.
    pub async fn record_view(&self, code: &ShortCode) {
        if let Err(e) = self.cache.incr_views(code).await {
            warn!(code = %code, error = %e, "Failed to record view");
        }
    }

    /// Moves the expiry of a live link to `new_expiry`.
    ///
    /// The cached record is invalidated. A cache warm already in flight can
    /// still land afterwards with the old expiry; such an entry serves the
    /// link until the old expiry at most.
    pub async fn update_expiry(&self, code: &ShortCode, new_expiry: Timestamp) -> Result<()> {
        if new_expiry <= Timestamp::now() {
            return Err(EngineError::InvalidExpiry(format!(
                "expiry {new_expiry} is not in the future"
            )));
        }

        if !self.store.update_expiry(code, new_expiry).await? {
            return Err(EngineError::NotFound(code.to_string()));
        }

        // The cached copy still carries the old expiry and TTL.
        if let Err(e) = self.cache.del_link(code).await {
            warn!(code = %code, error = %e, "Failed to invalidate cached record");
        }
        info!(code = %code, expires_at = %new_expiry, "Updated link expiry");
        Ok(())
    }

    /// Deletes a link together with its cached record and pending views.
    ///
    /// The filter keeps the code until the next rebuild.
    pub async fn delete(&self, code: &ShortCode) -> Result<()> {
        if !self.store.delete_by_code(code).await? {
            return Err(EngineError::NotFound(code.to_string()));
        }

        if let Err(e) = self.cache.del_link(code).await {
            warn!(code = %code, error = %e, "Failed to remove cached record");
        }
        if let Err(e) = self.cache.del_views(code).await {
            warn!(code = %code, error = %e, "Failed to remove view counter");
        }
        info!(code = %code, "Deleted short link");
        Ok(())
    }

    /// Removes every expired record from the store.
    pub async fn delete_all_expired(&self) -> Result<u64> {
        let removed = self.store.delete_expired().await?;
        if removed > 0 {
            info!(removed, "Deleted expired links");
        } else {
            debug!("No expired links to delete");
        }
        Ok(removed)
    }

    /// Lists an owner's links newest first, counting views not merged yet.
    pub async fn list_owned(&self, owner_id: u64, page: Page) -> Result<Vec<ShortLinkRecord>> {
        let mut records = self.store.list_by_owner(owner_id, page).await?;
        for record in &mut records {
            match self.cache.get_views(&record.code).await {
                Ok(pending) => record.view_count = record.view_count.saturating_add(pending),
                Err(e) => {
                    warn!(code = %record.code, error = %e, "Failed to read pending views");
                }
            }
        }
        Ok(records)
    }

    /// Loads every active code into the filter. Returns how many were added.
    pub async fn prime_filter(&self) -> Result<usize> {
        let records = self.store.list_active().await?;
        for record in &records {
            self.filter.add(&record.code);
        }
        info!(codes = records.len(), "Primed existence filter");
        Ok(records.len())
    }

    /// Replaces the filter with one built from the active codes, dropping
    /// expired and deleted ones.
    ///
    /// Codes created while the store is being read are kept.
    pub async fn rebuild_filter(&self) -> Result<usize> {
        self.filter.begin_rebuild();
        let records = match self.store.list_active().await {
            Ok(records) => records,
            Err(e) => {
                self.filter.abort_rebuild();
                return Err(e.into());
            }
        };

        let codes = records.into_iter().map(|r| r.code).collect::<Vec<_>>();
        self.filter.finish_rebuild(&codes)?;
        info!(codes = codes.len(), "Rebuilt existence filter");
        Ok(codes.len())
    }

    /// Moves pending view counts from the cache into the store.
    ///
    /// Scans the counter keyspace until the cursor returns to 0. A counter
    /// is deleted before its count is merged. A merge failure after the
    /// delete loses those views and is logged. Zero counters are skipped.
    pub async fn sync_views(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut cursor = 0;

        loop {
            let (codes, next_cursor) = self
                .cache
                .scan_views(cursor, self.config.scan_batch_size)
                .await?;
            report.scanned += codes.len();

            for code in codes {
                self.merge_views(&code, &mut report).await;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(
            scanned = report.scanned,
            merged = report.merged,
            views = report.views,
            orphaned = report.orphaned,
            "Synced view counters"
        );
        Ok(report)
    }

    async fn merge_views(&self, code: &ShortCode, report: &mut SyncReport) {
        match self.cache.get_views(code).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to read view counter");
                return;
            }
        }

        let views = match self.cache.del_views(code).await {
            Ok(0) => return,
            Ok(views) => views,
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to take view counter");
                return;
            }
        };

        match self.store.add_views(code, views).await {
            Ok(true) => {
                report.merged += 1;
                report.views += views;
            }
            Ok(false) => {
                debug!(code = %code, views, "Dropped views for missing record");
                report.orphaned += 1;
            }
            Err(e) => {
                warn!(code = %code, views, error = %e, "Failed to merge views, views lost");
            }
        }
    }

    fn link_duration(&self, duration_hours: Option<i64>) -> Result<SignedDuration> {
        match duration_hours {
            None => Ok(self.config.default_duration),
            Some(hours) if hours <= 0 => Err(EngineError::InvalidDuration(format!(
                "duration must be positive, got {hours} hours"
            ))),
            Some(hours) => hours
                .checked_mul(3600)
                .map(SignedDuration::from_secs)
                .ok_or_else(|| {
                    EngineError::InvalidDuration(format!("duration of {hours} hours is too large"))
                }),
        }
    }

    fn new_record(
        &self,
        code: ShortCode,
        request: &NewLink,
        is_custom: bool,
        duration: SignedDuration,
    ) -> Result<ShortLinkRecord> {
        let now = Timestamp::now();
        let expires_at = now
            .checked_add(duration)
            .map_err(|e| EngineError::InvalidDuration(e.to_string()))?;

        Ok(ShortLinkRecord {
            code,
            original_url: request.original_url.clone(),
            owner_id: request.owner_id,
            is_custom,
            expires_at,
            created_at: now,
            view_count: 0,
        })
    }

    async fn claim_custom(
        &self,
        code: ShortCode,
        request: &NewLink,
        duration: SignedDuration,
    ) -> Result<ShortLinkRecord> {
        if self.check_code_status(&code).await? == CodeStatus::InUse {
            return Err(EngineError::CodeTaken(code.to_string()));
        }

        let record = self.new_record(code, request, true, duration)?;
        // The store decides races between concurrent claims of one code.
        match self.store.upsert(&record).await {
            Ok(()) => Ok(record),
            Err(StorageError::Conflict(_)) => Err(EngineError::CodeTaken(record.code.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_generated(
        &self,
        request: &NewLink,
        duration: SignedDuration,
    ) -> Result<ShortLinkRecord> {
        let attempts = self.config.max_attempts;

        for attempt in 1..=attempts {
            let code: ShortCode = self.generator.generate().into();

            if self.check_code_status(&code).await? == CodeStatus::InUse {
                debug!(code = %code, attempt, "Generated code is in use");
                continue;
            }

            let record = self.new_record(code, request, false, duration)?;
            match self.store.upsert(&record).await {
                Ok(()) => return Ok(record),
                Err(StorageError::Conflict(_)) => {
                    debug!(code = %record.code, attempt, "Generated code was claimed concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts, "Could not allocate a free short code");
        Err(EngineError::AllocationExhausted { attempts })
    }

    /// Writes `record` to the cache on a detached task. Failures are logged.
    ///
    /// The write is not ordered against later invalidations of the code.
    fn warm_cache(&self, record: ShortLinkRecord) {
        let Some(ttl) = record.ttl_from(Timestamp::now()) else {
            return;
        };

        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.set_link(&record, ttl).await {
                warn!(code = %record.code, error = %e, "Failed to warm cache");
            }
        });
    }
}
