//! Collaborator contracts for the index.
//!
//! The index never performs file I/O itself. Loading and persisting the index
//! file, and physically removing doomed entries, are delegated to these
//! traits; the index only hands them copies and hash lists, never references
//! into its own map.

use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use crate::index::metadata::EntryMetadata;
use crate::status::Status;

/// Mapping from 64-bit entry hash to its metadata.
pub type EntrySet = HashMap<u64, EntryMetadata>;

/// Completion for an index-file load.
pub type LoadCompletion = Box<dyn FnOnce(IndexLoadResult) + Send>;

/// Completion for a bulk-doom request.
pub type DoomCompletion = Box<dyn FnOnce(Status) + Send>;

/// How an index load was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMethod {
    /// A clean index file was read.
    Loaded,
    /// The index was rebuilt by scanning the cache directory.
    Rebuilt,
    /// No previous cache existed.
    NewCache,
}

/// Why an index write was issued. Instrumentation only; the index does not
/// branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReason {
    /// The debounce timer fired after a quiet period.
    Idle,
    /// The startup merge found the on-disk index stale.
    StartupMerge,
    /// The application moved to the background.
    AppBackgrounded,
}

/// Result of loading the on-disk index, produced by the index-file backend.
#[derive(Debug, Default)]
pub struct IndexLoadResult {
    /// Entries recovered from disk.
    pub entries: EntrySet,
    /// Whether the on-disk index must be rewritten immediately (for example
    /// after a format upgrade).
    pub flush_required: bool,
    /// How the load was satisfied.
    pub init_method: Option<InitMethod>,
}

/// One index write handed to the backend.
///
/// Carries a snapshot of the entry set; the backend owns it outright and the
/// index keeps mutating its own copy concurrently.
#[derive(Debug)]
pub struct IndexWriteRequest {
    /// Why this write was issued.
    pub reason: WriteReason,
    /// Snapshot of the entry set at the time of the write.
    pub entries: EntrySet,
    /// Aggregate cache size at the time of the write.
    pub cache_size: u64,
    /// When the write was issued, for interval instrumentation.
    pub started: Instant,
    /// Whether the application was backgrounded.
    pub backgrounded: bool,
}

/// The on-disk index file, consumed as an abstract load/store service.
///
/// Implementations must outlive the index; the index holds a shared handle and
/// never waits for a write to finish.
pub trait IndexFileBackend: Send + Sync {
    /// Asynchronously load existing entries.
    ///
    /// `cache_mtime` is a staleness hint (the modification time of the cache
    /// directory). `reply` may be invoked from any thread; it is called
    /// exactly once with the load result.
    fn load_index_entries(&self, cache_mtime: Option<SystemTime>, reply: LoadCompletion);

    /// Persist the given snapshot. Fire-and-forget: failures are the
    /// backend's to log and count, and the index does not retry.
    fn write_to_disk(&self, request: IndexWriteRequest);
}

/// Executor for eviction decisions.
///
/// The index only selects entries and requests their removal; it does not
/// touch its own map here. The layer reacting to the doom completion removes
/// the entries through the normal `remove` path.
pub trait IndexDelegate: Send + Sync {
    /// Physically remove the listed entries from the backing store, then call
    /// `reply` exactly once with the outcome.
    fn doom_entries(&self, hashes: Vec<u64>, reply: DoomCompletion);
}
