//! Shared test doubles for the index's collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use simple_index::index::{
    DoomCompletion, EntrySet, IndexDelegate, IndexFileBackend, IndexLoadResult, IndexWriteRequest,
    InitMethod, LoadCompletion, SimpleIndex,
};
use simple_index::{IndexConfig, Status};

/// Index-file fake that records writes and lets the test decide when (and
/// with what) the initial load completes.
#[derive(Default)]
pub struct FakeIndexFile {
    inner: Mutex<FakeIndexFileState>,
}

#[derive(Default)]
struct FakeIndexFileState {
    pending_load: Option<LoadCompletion>,
    load_requests: usize,
    last_cache_mtime: Option<SystemTime>,
    writes: Vec<IndexWriteRequest>,
}

impl FakeIndexFile {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a load has been requested and not yet completed.
    pub fn has_pending_load(&self) -> bool {
        self.inner.lock().pending_load.is_some()
    }

    /// Number of load requests observed.
    pub fn load_requests(&self) -> usize {
        self.inner.lock().load_requests
    }

    /// The staleness hint passed with the last load request.
    pub fn last_cache_mtime(&self) -> Option<SystemTime> {
        self.inner.lock().last_cache_mtime
    }

    /// Complete the pending load with the given entries.
    pub fn complete_load(&self, entries: EntrySet, flush_required: bool) {
        let reply = self
            .inner
            .lock()
            .pending_load
            .take()
            .expect("no pending load");
        reply(IndexLoadResult {
            entries,
            flush_required,
            init_method: Some(InitMethod::Loaded),
        });
    }

    /// Number of writes handed to the backend.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// The most recent write request, if any.
    pub fn last_write<T>(&self, inspect: impl FnOnce(&IndexWriteRequest) -> T) -> Option<T> {
        self.inner.lock().writes.last().map(inspect)
    }
}

impl IndexFileBackend for FakeIndexFile {
    fn load_index_entries(&self, cache_mtime: Option<SystemTime>, reply: LoadCompletion) {
        let mut state = self.inner.lock();
        state.load_requests += 1;
        state.last_cache_mtime = cache_mtime;
        state.pending_load = Some(reply);
    }

    fn write_to_disk(&self, request: IndexWriteRequest) {
        self.inner.lock().writes.push(request);
    }
}

/// Eviction delegate fake. By default completes each doom synchronously with
/// a configurable status; can also hold completions for manual release.
pub struct FakeDelegate {
    inner: Mutex<FakeDelegateState>,
}

#[derive(Default)]
struct FakeDelegateState {
    doom_result: Status,
    hold_completions: bool,
    doomed: Vec<Vec<u64>>,
    held: Vec<DoomCompletion>,
}

impl FakeDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FakeDelegateState::default()),
        })
    }

    /// Make future dooms complete with `status`.
    pub fn set_doom_result(&self, status: Status) {
        self.inner.lock().doom_result = status;
    }

    /// Hold doom completions until [`FakeDelegate::release_held`].
    pub fn hold_completions(&self) {
        self.inner.lock().hold_completions = true;
    }

    /// Release all held completions with the configured status.
    pub fn release_held(&self) {
        let (held, status) = {
            let mut state = self.inner.lock();
            (std::mem::take(&mut state.held), state.doom_result)
        };
        for reply in held {
            reply(status);
        }
    }

    /// Number of doom requests observed.
    pub fn doom_count(&self) -> usize {
        self.inner.lock().doomed.len()
    }

    /// The hash lists of every doom request so far.
    pub fn doomed(&self) -> Vec<Vec<u64>> {
        self.inner.lock().doomed.clone()
    }
}

impl IndexDelegate for FakeDelegate {
    fn doom_entries(&self, hashes: Vec<u64>, reply: DoomCompletion) {
        let (hold, status) = {
            let mut state = self.inner.lock();
            state.doomed.push(hashes);
            (state.hold_completions, state.doom_result)
        };
        if hold {
            self.inner.lock().held.push(reply);
        } else {
            reply(status);
        }
    }
}

/// Build an index with fresh fakes and the given config.
pub fn new_index_with_config(
    config: IndexConfig,
) -> (SimpleIndex, Arc<FakeIndexFile>, Arc<FakeDelegate>) {
    let index_file = FakeIndexFile::new();
    let delegate = FakeDelegate::new();
    let index = SimpleIndex::new(config, index_file.clone(), delegate.clone());
    (index, index_file, delegate)
}

/// Build an index with fresh fakes and the default config.
pub fn new_index() -> (SimpleIndex, Arc<FakeIndexFile>, Arc<FakeDelegate>) {
    new_index_with_config(IndexConfig::default())
}

/// Initialize the index against an empty on-disk set and pump the merge.
pub fn initialize_empty(index: &mut SimpleIndex, index_file: &FakeIndexFile) {
    index.initialize(None);
    index_file.complete_load(EntrySet::new(), false);
    index.process_pending();
    assert!(index.is_initialized());
}
