//! xBase Index Structures
//!
//! Secondary indexes that locate records by key instead of position:
//!
//! - **key**: `IndexKey`, the typed key a user seeks with
//! - **codec**: `ByteKey` encoding that preserves value order
//! - **btree**: arena B+-tree of `(key, recno)` entries with binary persistence
//! - **tag**: one named index (spec + tree)
//! - **manager**: all tags of a table, the active order and the mutation hooks
//! - **sidecar**: the `.inx` file holding every tag of a table
//!
//! # Architecture
//!
//! ```text
//! Mutation:  table write → IndexManager hook → every tag: erase old key / insert new key
//!
//! Seek:      tokens → IndexKey → ByteKey → active tag seek_ge → recno → goto_record
//! ```

pub mod btree;
pub mod codec;
pub mod key;
mod manager;
pub mod sidecar;
mod spec;
mod tag;

pub use btree::{BTree, Entry, DEFAULT_ORDER, MIN_ORDER};
pub use codec::{ByteKey, KeyLayout, SeekKey};
pub use key::{format_g15, IndexKey, KeyAtom};
pub use manager::IndexManager;
pub use sidecar::{sidecar_path, INDEX_EXTENSION};
pub use spec::IndexSpec;
pub use tag::IndexTag;

use crate::storage::{FieldDescriptor, Record, StorageResult, TableFile};

/// Read-only view of a table used to compute keys
pub trait RecordSource {
    /// Column directory
    fn fields(&self) -> &[FieldDescriptor];

    /// Number of records, deleted ones included
    fn record_count(&self) -> u32;

    /// Record by number without disturbing any current position
    fn read_record(&self, recno: u32) -> StorageResult<Record>;
}

impl RecordSource for TableFile {
    fn fields(&self) -> &[FieldDescriptor] {
        TableFile::fields(self)
    }

    fn record_count(&self) -> u32 {
        TableFile::record_count(self)
    }

    fn read_record(&self, recno: u32) -> StorageResult<Record> {
        TableFile::read_record(self, recno)
    }
}

/// Statistics about the open indexes
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Number of tags
    pub tags: usize,
    /// Entries across all tags
    pub entries: usize,
    /// Active tag, if any
    pub active: Option<String>,
    /// Effective direction of the active order
    pub ascending: bool,
    /// Unsaved changes
    pub dirty: bool,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tags, {} entries, order: {}",
            self.tags,
            self.entries,
            match &self.active {
                Some(name) if self.ascending => format!("{} ascending", name),
                Some(name) => format!("{} descending", name),
                None => "physical".to_string(),
            }
        )
    }
}
