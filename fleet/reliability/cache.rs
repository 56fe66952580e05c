use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    model::{ReliabilitySummary, ReliabilityWindow},
    settings::ReliabilitySettings,
};

/// Identity of a memoized summary.
///
/// `data_revision` is owned by the caller and must change whenever the
/// underlying orders or telemetry change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Vehicle the summary belongs to.
    pub vehicle_id: String,
    /// Window start.
    pub from: DateTime<Utc>,
    /// Window end.
    pub to: DateTime<Utc>,
    /// Explicit "now" override, `None` when the engine clock was used.
    pub as_of: Option<DateTime<Utc>>,
    /// Failure history cap.
    pub history_limit: Option<usize>,
    /// Settings fingerprint.
    pub settings: String,
    /// Caller-supplied source data revision.
    pub data_revision: u64,
}

impl CacheKey {
    /// Builds a key for one vehicle of a request.
    #[must_use]
    pub fn new(
        vehicle_id: impl Into<String>,
        window: &ReliabilityWindow,
        as_of: Option<DateTime<Utc>>,
        settings: &ReliabilitySettings,
        data_revision: u64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            from: window.from,
            to: window.to,
            as_of,
            history_limit: settings.history_limit,
            settings: settings.fingerprint(),
            data_revision,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: DateTime<Utc>,
    summary: ReliabilitySummary,
}

/// One year; longer lifetimes are capped.
const MAX_TTL_SECS: u64 = 365 * 24 * 3_600;

/// Time-to-live memo of per-vehicle summaries.
#[derive(Debug)]
pub struct SummaryCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl SummaryCache {
    /// Creates an empty cache whose entries live for `ttl_secs`.
    #[must_use]
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        let ttl_secs = i64::try_from(ttl_secs.min(MAX_TTL_SECS)).unwrap_or(0);
        Self {
            ttl: Duration::seconds(ttl_secs),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key`; expired entries are evicted on access.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<ReliabilitySummary> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now - entry.stored_at < self.ttl => Some(entry.summary.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a summary, replacing any previous entry.
    ///
    /// Expired entries and entries of the same vehicle built from an older
    /// data revision are dropped first; they can never be served again.
    pub fn insert(&self, key: CacheKey, summary: ReliabilitySummary) {
        let stored_at = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        entries.retain(|stored, entry| {
            let superseded =
                stored.vehicle_id == key.vehicle_id && stored.data_revision < key.data_revision;
            !superseded && stored_at - entry.stored_at < ttl
        });
        entries.insert(key, CacheEntry { stored_at, summary });
    }

    /// Drops every entry of a vehicle. Returns how many were removed.
    pub fn invalidate_vehicle(&self, vehicle_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.vehicle_id != vehicle_id);
        before - entries.len()
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| now - entry.stored_at < ttl);
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
