//! The in-memory directory of on-disk cache entries.
//!
//! `SimpleIndex` owns the hash-to-metadata map and the aggregate cache size,
//! schedules debounced index writes, selects entries for eviction, and
//! reconciles provisional in-memory state against the asynchronously loaded
//! on-disk entry set.
//!
//! All methods run on one owning sequence; there is no internal locking.
//! Asynchronous completions (load finished, doom finished, posted
//! ready-callbacks) arrive over an internal channel and are applied when the
//! owner calls [`SimpleIndex::process_pending`]. The pending debounce deadline
//! is visible through [`SimpleIndex::next_flush_deadline`] so an embedding
//! event loop knows when to wake.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::config::IndexConfig;
use crate::index::backend::{
    EntrySet, IndexDelegate, IndexFileBackend, IndexLoadResult, IndexWriteRequest, InitMethod,
    WriteReason,
};
use crate::index::metadata::EntryMetadata;
use crate::stats::{IndexStats, IndexStatsSnapshot};
use crate::status::Status;
use crate::timer::DebounceTimer;

/// Divides the cache space into this many parts to derive the eviction
/// watermarks from the maximum size.
const EVICTION_MARGIN_DIVISOR: u64 = 20;

/// Callback run once the index has finished initializing.
pub type ReadyCallback = Box<dyn FnOnce(Status) + Send>;

/// Completions delivered to the owning sequence.
enum IndexEvent {
    LoadComplete(IndexLoadResult),
    EvictionDone(Status),
    Ready(ReadyCallback),
}

/// Debug-only affinity check for the owning sequence.
struct SequenceChecker {
    owner: ThreadId,
}

impl SequenceChecker {
    fn new() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    #[inline]
    fn check(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "SimpleIndex used off its owning sequence"
        );
    }
}

/// The in-memory cache directory.
///
/// Constructed empty and uninitialized. [`SimpleIndex::initialize`] starts an
/// asynchronous load of the on-disk entry set; until the merge completes,
/// mutators operate on a provisional map, removals are recorded separately so
/// they can be replayed against the loaded data, and existence queries degrade
/// to a conservative "assume present" so callers consult the backing store.
pub struct SimpleIndex {
    config: IndexConfig,
    index_file: Arc<dyn IndexFileBackend>,
    delegate: Arc<dyn IndexDelegate>,

    entries: EntrySet,
    /// Hashes removed while the initial load was in flight.
    removed_entries: HashSet<u64>,
    /// Running sum of rounded entry sizes; always equals the sum over
    /// `entries` except transiently inside a mutator.
    cache_size: u64,

    max_size: u64,
    high_watermark: u64,
    low_watermark: u64,

    init_requested: bool,
    initialized: bool,
    init_method: Option<InitMethod>,
    eviction_in_progress: bool,
    app_on_background: bool,

    write_timer: DebounceTimer,
    last_write_started: Option<Instant>,
    to_run_when_initialized: Vec<ReadyCallback>,

    events_tx: Sender<IndexEvent>,
    events_rx: Receiver<IndexEvent>,

    stats: IndexStats,
    sequence: SequenceChecker,
}

impl SimpleIndex {
    /// Create an empty, uninitialized index.
    ///
    /// The collaborators are shared handles; both must remain functional for
    /// the index's lifetime.
    pub fn new(
        config: IndexConfig,
        index_file: Arc<dyn IndexFileBackend>,
        delegate: Arc<dyn IndexDelegate>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            index_file,
            delegate,
            entries: EntrySet::new(),
            removed_entries: HashSet::new(),
            cache_size: 0,
            max_size: 0,
            high_watermark: 0,
            low_watermark: 0,
            init_requested: false,
            initialized: false,
            init_method: None,
            eviction_in_progress: false,
            app_on_background: false,
            write_timer: DebounceTimer::new(),
            last_write_started: None,
            to_run_when_initialized: Vec::new(),
            events_tx,
            events_rx,
            stats: IndexStats::new(),
            sequence: SequenceChecker::new(),
        }
    }

    /// Set the maximum cache size and derive the eviction watermarks.
    ///
    /// Zero means "keep the default" and changes nothing.
    pub fn set_max_size(&mut self, max_bytes: u64) {
        self.sequence.check();
        if max_bytes != 0 {
            self.max_size = max_bytes;
            self.high_watermark = max_bytes - max_bytes / EVICTION_MARGIN_DIVISOR;
            self.low_watermark = max_bytes - 2 * (max_bytes / EVICTION_MARGIN_DIVISOR);
        }
    }

    /// Start the asynchronous load of existing entries.
    ///
    /// `cache_mtime` is passed through to the backend as a staleness hint.
    /// Completion is internal; callers observe it through
    /// [`SimpleIndex::execute_when_ready`]. Must be called at most once.
    pub fn initialize(&mut self, cache_mtime: Option<SystemTime>) {
        self.sequence.check();
        debug_assert!(!self.init_requested, "initialize called twice");
        self.init_requested = true;

        let tx = self.events_tx.clone();
        self.index_file.load_index_entries(
            cache_mtime,
            Box::new(move |result| {
                let _ = tx.send(IndexEvent::LoadComplete(result));
            }),
        );
    }

    /// Run `callback` with [`Status::Ok`] once the index is initialized.
    ///
    /// The callback never runs inside this call, even when the index is
    /// already initialized; it is posted and runs from a later
    /// [`SimpleIndex::process_pending`]. If the index is dropped first, the
    /// callback runs with [`Status::Aborted`] instead of being dropped.
    pub fn execute_when_ready(&mut self, callback: ReadyCallback) {
        self.sequence.check();
        if self.initialized {
            let _ = self.events_tx.send(IndexEvent::Ready(callback));
        } else {
            self.to_run_when_initialized.push(callback);
        }
    }

    /// Apply pending asynchronous completions and fire the write timer if its
    /// deadline has passed.
    ///
    /// Must be called from the owning sequence; the embedding loop typically
    /// calls it on every turn and additionally at
    /// [`SimpleIndex::next_flush_deadline`].
    pub fn process_pending(&mut self) {
        self.sequence.check();
        loop {
            let event = match self.events_rx.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            self.handle_event(event);
        }
        if self.write_timer.take_if_due(Instant::now()) {
            self.write_to_disk(WriteReason::Idle);
        }
    }

    /// The pending deferred-write deadline, if armed.
    pub fn next_flush_deadline(&self) -> Option<Instant> {
        self.write_timer.deadline()
    }

    /// Add an entry with the current time and unknown (zero) size.
    ///
    /// The size is set later through [`SimpleIndex::update_entry_size`] once
    /// the entry finishes opening. Inserting a hash that is already present
    /// keeps the existing metadata.
    pub fn insert(&mut self, entry_hash: u64) {
        self.sequence.check();
        self.entries
            .entry(entry_hash)
            .or_insert_with(|| EntryMetadata::new(Some(SystemTime::now()), 0));
        if !self.initialized {
            // An insert after the load started supersedes an earlier removal
            // of the same hash.
            self.removed_entries.remove(&entry_hash);
        }
        self.postpone_writing_to_disk();
    }

    /// Erase an entry if present. A no-op for absent hashes.
    pub fn remove(&mut self, entry_hash: u64) {
        self.sequence.check();
        if let Some(metadata) = self.entries.remove(&entry_hash) {
            debug_assert!(self.cache_size >= u64::from(metadata.entry_size()));
            self.cache_size -= u64::from(metadata.entry_size());
        }
        if !self.initialized {
            // Honor this removal when the loaded set is merged, even though
            // the load started before the removal was known.
            self.removed_entries.insert(entry_hash);
        }
        self.postpone_writing_to_disk();
    }

    /// Whether the entry exists.
    ///
    /// Before initialization this is unconditionally `true`, forcing callers
    /// to consult the backing store, since the in-memory view is incomplete.
    pub fn has(&self, entry_hash: u64) -> bool {
        self.sequence.check();
        !self.initialized || self.entries.contains_key(&entry_hash)
    }

    /// Refresh the entry's last-used time if present and report whether it
    /// exists, with the same pre-initialization policy as
    /// [`SimpleIndex::has`].
    pub fn use_if_exists(&mut self, entry_hash: u64) -> bool {
        self.sequence.check();
        // Update the time even during initialization; it is merged later.
        match self.entries.get_mut(&entry_hash) {
            Some(metadata) => {
                metadata.set_last_used_time(Some(SystemTime::now()));
                self.postpone_writing_to_disk();
                true
            }
            None => !self.initialized,
        }
    }

    /// Set the entry's size, adjusting the aggregate cache size by the delta
    /// between the old and new rounded sizes.
    ///
    /// Returns `false` if the hash is absent. This is the one mutator that
    /// can push the cache over its high watermark, so it also checks whether
    /// an eviction pass should start.
    pub fn update_entry_size(&mut self, entry_hash: u64, entry_size: u32) -> bool {
        self.sequence.check();
        let Some(metadata) = self.entries.get_mut(&entry_hash) else {
            return false;
        };
        let old_size = u64::from(metadata.entry_size());
        metadata.set_entry_size(entry_size);
        let new_size = u64::from(metadata.entry_size());
        debug_assert!(self.cache_size >= old_size);
        self.cache_size = self.cache_size - old_size + new_size;

        self.postpone_writing_to_disk();
        self.start_eviction_if_needed();
        true
    }

    /// Number of entries currently in the map. Not authoritative before
    /// initialization.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Aggregate cache size in bytes. Only meaningful after initialization.
    pub fn cache_size(&self) -> u64 {
        debug_assert!(self.initialized);
        self.cache_size
    }

    /// Sum of entry sizes whose last-used time falls in the given range.
    ///
    /// `None` bounds are unbounded. Fixed 1-second tolerances widen the range
    /// to absorb the second-granularity rounding of stored times.
    pub fn cache_size_between(
        &self,
        initial_time: Option<SystemTime>,
        end_time: Option<SystemTime>,
    ) -> u64 {
        self.sequence.check();
        debug_assert!(self.initialized);
        let (lower, upper) = time_range_seconds(initial_time, end_time);
        self.entries
            .values()
            .filter(|metadata| in_range(metadata, lower, upper))
            .map(|metadata| u64::from(metadata.entry_size()))
            .sum()
    }

    /// Hashes of entries whose last-used time falls in the given range, with
    /// the same bound semantics as [`SimpleIndex::cache_size_between`].
    pub fn entries_between(
        &self,
        initial_time: Option<SystemTime>,
        end_time: Option<SystemTime>,
    ) -> Vec<u64> {
        self.sequence.check();
        debug_assert!(self.initialized);
        let (lower, upper) = time_range_seconds(initial_time, end_time);
        self.entries
            .iter()
            .filter(|(_, metadata)| in_range(metadata, lower, upper))
            .map(|(&hash, _)| hash)
            .collect()
    }

    /// All entry hashes.
    pub fn all_hashes(&self) -> Vec<u64> {
        self.entries_between(None, None)
    }

    /// The opaque per-entry byte, or zero if the entry is absent.
    pub fn entry_in_memory_data(&self, entry_hash: u64) -> u8 {
        self.sequence.check();
        self.entries
            .get(&entry_hash)
            .map(EntryMetadata::in_memory_data)
            .unwrap_or(0)
    }

    /// Set the opaque per-entry byte. A no-op if the entry is absent.
    pub fn set_entry_in_memory_data(&mut self, entry_hash: u64, value: u8) {
        self.sequence.check();
        if let Some(metadata) = self.entries.get_mut(&entry_hash) {
            metadata.set_in_memory_data(value);
        }
    }

    /// Whether the startup merge has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// How the initial load was satisfied, once initialized.
    pub fn init_method(&self) -> Option<InitMethod> {
        self.init_method
    }

    /// Record whether the application is backgrounded.
    ///
    /// Backgrounded mutations debounce with the shorter delay, and entering
    /// the background flushes the index immediately in case the process is
    /// killed.
    pub fn set_backgrounded(&mut self, backgrounded: bool) {
        self.sequence.check();
        self.app_on_background = backgrounded;
        if backgrounded {
            self.write_to_disk(WriteReason::AppBackgrounded);
        }
    }

    /// Snapshot of the index's activity counters.
    pub fn stats(&self) -> IndexStatsSnapshot {
        self.stats.snapshot()
    }

    /// Insert a pre-built metadata record, bypassing the normal insert path.
    pub fn insert_entry_for_testing(&mut self, entry_hash: u64, metadata: EntryMetadata) {
        debug_assert!(!self.entries.contains_key(&entry_hash));
        self.cache_size += u64::from(metadata.entry_size());
        self.entries.insert(entry_hash, metadata);
    }

    /// Overwrite an entry's last-used time without scheduling a write.
    pub fn set_last_used_time_for_test(&mut self, entry_hash: u64, time: Option<SystemTime>) {
        let metadata = self
            .entries
            .get_mut(&entry_hash)
            .expect("entry must exist");
        metadata.set_last_used_time(time);
    }

    fn handle_event(&mut self, event: IndexEvent) {
        match event {
            IndexEvent::LoadComplete(load_result) => self.merge_initializing_set(load_result),
            IndexEvent::EvictionDone(status) => {
                // Ignore the result of eviction; a future over-watermark
                // condition simply starts a fresh pass.
                self.eviction_in_progress = false;
                self.stats.record_eviction_done(status.is_ok());
                if status.is_error() {
                    tracing::warn!(status = %status, "eviction pass failed");
                }
            }
            IndexEvent::Ready(callback) => callback(Status::Ok),
        }
    }

    /// Reconcile the loaded entry set with mutations that happened while the
    /// load was in flight, then switch to the initialized state.
    fn merge_initializing_set(&mut self, load_result: IndexLoadResult) {
        let IndexLoadResult {
            mut entries,
            flush_required,
            init_method,
        } = load_result;

        // Removals recorded during the load win over the loaded set.
        for entry_hash in self.removed_entries.drain() {
            entries.remove(&entry_hash);
        }

        // In-memory state wins over stale on-disk state for the same key.
        for (entry_hash, metadata) in self.entries.drain() {
            entries.insert(entry_hash, metadata);
        }

        // The one place a full recomputation is correct and necessary.
        let merged_cache_size = entries
            .values()
            .map(|metadata| u64::from(metadata.entry_size()))
            .sum();

        self.entries = entries;
        self.cache_size = merged_cache_size;
        self.initialized = true;
        self.init_method = init_method;

        if flush_required {
            self.write_to_disk(WriteReason::StartupMerge);
        }

        tracing::info!(
            entries = self.entries.len(),
            cache_size = self.cache_size,
            waiters = self.to_run_when_initialized.len(),
            method = ?self.init_method,
            "index initialized"
        );

        // Release everyone waiting for the index to come up. Posted, so they
        // run after the merge itself completes.
        for callback in self.to_run_when_initialized.drain(..) {
            let _ = self.events_tx.send(IndexEvent::Ready(callback));
        }
    }

    fn start_eviction_if_needed(&mut self) {
        self.sequence.check();
        if self.eviction_in_progress || self.max_size == 0 || self.cache_size <= self.high_watermark
        {
            return;
        }
        self.eviction_in_progress = true;
        let selection_started = Instant::now();

        let now_seconds = seconds_since_epoch(SystemTime::now());
        let use_size = self.config.eviction_with_size;
        let overhead = u64::from(self.config.entry_overhead_estimate);

        // Flatten for sorting: rank every entry by its age, optionally
        // weighted by size so old large entries go first.
        let mut ranked: Vec<(u64, u64, u32)> = Vec::with_capacity(self.entries.len());
        for (&entry_hash, metadata) in &self.entries {
            let mut sort_value =
                now_seconds.saturating_sub(u64::from(metadata.raw_time_for_sorting()));
            if use_size {
                // Both factors fit in 32 bits, so the product fits in 64.
                sort_value *= u64::from(metadata.entry_size()) + overhead;
            }
            // Invert so a plain ascending sort yields oldest/largest first.
            ranked.push((u64::MAX - sort_value, entry_hash, metadata.entry_size()));
        }
        ranked.sort_unstable();

        // Evict just enough to drop to the low watermark.
        let amount_to_evict = self.cache_size - self.low_watermark;
        let mut selected_bytes = 0u64;
        let mut entry_hashes = Vec::new();
        for (_, entry_hash, entry_size) in ranked {
            if selected_bytes >= amount_to_evict {
                break;
            }
            selected_bytes += u64::from(entry_size);
            entry_hashes.push(entry_hash);
        }

        self.stats
            .record_eviction_started(entry_hashes.len() as u64, selected_bytes);
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                entries = entry_hashes.len(),
                bytes = selected_bytes,
                cache_size = self.cache_size,
                selection = ?selection_started.elapsed(),
                "eviction selected entries"
            );
        }

        let tx = self.events_tx.clone();
        self.delegate.doom_entries(
            entry_hashes,
            Box::new(move |status| {
                let _ = tx.send(IndexEvent::EvictionDone(status));
            }),
        );
    }

    /// Re-arm the single-shot write timer. Debounce, not throttle: a burst of
    /// mutations produces exactly one write after the quiet period.
    fn postpone_writing_to_disk(&mut self) {
        if !self.initialized {
            return;
        }
        let delay = if self.app_on_background {
            self.config.background_flush_delay
        } else {
            self.config.flush_delay
        };
        self.write_timer.reset(delay);
        self.stats.record_write_scheduled();
    }

    fn write_to_disk(&mut self, reason: WriteReason) {
        self.sequence.check();
        if !self.initialized {
            return;
        }
        let started = Instant::now();
        if let Some(previous) = self.last_write_started {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    interval = ?started.duration_since(previous),
                    backgrounded = self.app_on_background,
                    reason = ?reason,
                    "index write issued"
                );
            }
        }
        self.last_write_started = Some(started);
        self.stats.record_write_issued();

        self.index_file.write_to_disk(IndexWriteRequest {
            reason,
            entries: self.entries.clone(),
            cache_size: self.cache_size,
            started,
            backgrounded: self.app_on_background,
        });
    }
}

impl Drop for SimpleIndex {
    fn drop(&mut self) {
        // Fail every callback still waiting for the index to come up, and
        // every posted-but-unprocessed one, so callers can release resources
        // instead of leaking them.
        for callback in self.to_run_when_initialized.drain(..) {
            callback(Status::Aborted);
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if let IndexEvent::Ready(callback) = event {
                callback(Status::Aborted);
            }
        }
    }
}

fn seconds_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Widen the queried range by the metadata time epsilons and express it in
/// seconds since the epoch. `None` bounds are unbounded; unset entry times
/// (stored as zero) only match when there is no lower bound.
fn time_range_seconds(
    initial_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
) -> (u64, u64) {
    let lower = match initial_time {
        Some(time) => seconds_since_epoch(time)
            .saturating_sub(EntryMetadata::LOWER_EPSILON_FOR_TIME_COMPARISONS.as_secs()),
        None => 0,
    };
    let upper = match end_time {
        Some(time) => seconds_since_epoch(time)
            .saturating_add(EntryMetadata::UPPER_EPSILON_FOR_TIME_COMPARISONS.as_secs()),
        None => u64::MAX,
    };
    (lower, upper)
}

fn in_range(metadata: &EntryMetadata, lower: u64, upper: u64) -> bool {
    let entry_seconds = u64::from(metadata.raw_time_for_sorting());
    lower <= entry_seconds && entry_seconds < upper
}
