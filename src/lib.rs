//! simple-index - The in-memory directory of a simple disk-cache backend
//!
//! This crate implements the index subsystem of a simple file-per-entry disk
//! cache: a compact in-memory map from 64-bit entry hashes to per-entry
//! metadata, providing:
//!
//! - Fast existence and size queries for cache entries
//! - LRU/size-weighted eviction selection against configurable watermarks
//! - Debounced asynchronous persistence of the index
//! - Safe merging of in-memory mutations against an asynchronously loaded
//!   on-disk entry set
//!
//! The physical index file and entry storage are external collaborators,
//! consumed through the [`index::IndexFileBackend`] and
//! [`index::IndexDelegate`] traits.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use simple_index::{IndexConfig, SimpleIndex};
//!
//! let mut index = SimpleIndex::new(IndexConfig::default(), index_file, delegate);
//! index.set_max_size(64 * 1024 * 1024);
//! index.initialize(cache_mtime);
//!
//! // On every turn of the owning event loop:
//! index.process_pending();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod index;
pub mod stats;
pub mod status;
pub mod timer;

// Re-exports for convenience
pub use config::{ConfigError, IndexConfig, SimpleIndexConfig};
pub use index::{EntryMetadata, SimpleIndex};
pub use status::Status;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::IndexConfig;
    pub use crate::index::{
        EntryMetadata, EntrySet, IndexDelegate, IndexFileBackend, IndexLoadResult,
        IndexWriteRequest, InitMethod, SimpleIndex, WriteReason,
    };
    pub use crate::status::Status;
}
