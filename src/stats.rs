//! Index operation statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for index persistence and eviction activity.
///
/// All counters use relaxed ordering; they are instrumentation only and never
/// feed back into index decisions.
#[derive(Debug, Default)]
pub struct IndexStats {
    /// Number of times the deferred write timer was (re-)armed.
    writes_scheduled: AtomicU64,
    /// Number of index writes handed to the backend.
    writes_issued: AtomicU64,
    /// Number of eviction passes started.
    evictions_started: AtomicU64,
    /// Number of eviction passes whose doom completed successfully.
    evictions_succeeded: AtomicU64,
    /// Number of eviction passes whose doom reported an error.
    evictions_failed: AtomicU64,
    /// Total entries selected for eviction.
    evicted_entries: AtomicU64,
    /// Total bytes (rounded entry sizes) selected for eviction.
    evicted_bytes: AtomicU64,
}

/// Point-in-time copy of [`IndexStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStatsSnapshot {
    /// Deferred write timer arms.
    pub writes_scheduled: u64,
    /// Writes handed to the backend.
    pub writes_issued: u64,
    /// Eviction passes started.
    pub evictions_started: u64,
    /// Eviction passes completed successfully.
    pub evictions_succeeded: u64,
    /// Eviction passes that reported an error.
    pub evictions_failed: u64,
    /// Entries selected for eviction.
    pub evicted_entries: u64,
    /// Bytes selected for eviction.
    pub evicted_bytes: u64,
}

impl IndexStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_write_scheduled(&self) {
        self.writes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_issued(&self) {
        self.writes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction_started(&self, entries: u64, bytes: u64) {
        self.evictions_started.fetch_add(1, Ordering::Relaxed);
        self.evicted_entries.fetch_add(entries, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction_done(&self, ok: bool) {
        if ok {
            self.evictions_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.evictions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> IndexStatsSnapshot {
        IndexStatsSnapshot {
            writes_scheduled: self.writes_scheduled.load(Ordering::Relaxed),
            writes_issued: self.writes_issued.load(Ordering::Relaxed),
            evictions_started: self.evictions_started.load(Ordering::Relaxed),
            evictions_succeeded: self.evictions_succeeded.load(Ordering::Relaxed),
            evictions_failed: self.evictions_failed.load(Ordering::Relaxed),
            evicted_entries: self.evicted_entries.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
        }
    }
}
