//! The in-memory cache index
//!
//! This module provides the entry-metadata record, the collaborator contracts
//! for the index-file backend and eviction delegate, and the `SimpleIndex`
//! directory itself.

mod backend;
mod metadata;
mod simple_index;

pub use backend::{
    DoomCompletion, EntrySet, IndexDelegate, IndexFileBackend, IndexLoadResult, IndexWriteRequest,
    InitMethod, LoadCompletion, WriteReason,
};
pub use metadata::{EntryMetadata, MetadataError};
pub use simple_index::{ReadyCallback, SimpleIndex};
