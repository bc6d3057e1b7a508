//! Index Tag - one named, ordered index over a table
//!
//! A tag pairs an [`IndexSpec`] (resolved against the table's columns) with
//! the B-tree holding its `(key, recno)` entries. Deleted records are never
//! indexed.

use crate::index::btree::{BTree, Entry};
use crate::index::codec::{ByteKey, KeyLayout, SeekKey};
use crate::index::key::IndexKey;
use crate::index::spec::IndexSpec;
use crate::index::RecordSource;
use crate::storage::{FieldDescriptor, StorageResult};

/// Named index backed by one B-tree
#[derive(Debug, Clone)]
pub struct IndexTag {
    spec: IndexSpec,
    layout: KeyLayout,
    tree: BTree,
}

impl IndexTag {
    /// Empty tag
    pub fn new(spec: IndexSpec, fields: &[FieldDescriptor], order: usize) -> StorageResult<Self> {
        let layout = KeyLayout::resolve(&spec, fields)?;
        Ok(Self {
            spec,
            layout,
            tree: BTree::new(order),
        })
    }

    /// Reattach a persisted tree
    pub fn from_parts(spec: IndexSpec, fields: &[FieldDescriptor], tree: BTree) -> StorageResult<Self> {
        let layout = KeyLayout::resolve(&spec, fields)?;
        Ok(Self { spec, layout, tree })
    }

    /// Build from a full scan of the table, skipping deleted records
    pub fn build(spec: IndexSpec, source: &dyn RecordSource, order: usize) -> StorageResult<Self> {
        let mut tag = Self::new(spec, source.fields(), order)?;
        tag.bulk_build(source)?;
        Ok(tag)
    }

    /// Replace the contents with a fresh scan of `source`
    pub fn bulk_build(&mut self, source: &dyn RecordSource) -> StorageResult<()> {
        let count = source.record_count();
        let mut entries = Vec::with_capacity(count as usize);

        for recno in 1..=count {
            let record = source.read_record(recno)?;
            if record.deleted {
                continue;
            }
            entries.push(Entry::new(self.layout.encode(&record.values), recno));
        }

        self.tree = BTree::bulk_load(self.tree.order(), entries);
        tracing::info!(
            "Built tag {} ({}): {} entries from {} records",
            self.spec.name,
            self.spec.expression(),
            self.tree.len(),
            count
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Stored key of a row of values
    pub fn key_for(&self, values: &[String]) -> ByteKey {
        self.layout.encode(values)
    }

    /// Seek key from user tokens
    pub fn seek_key<S: AsRef<str>>(&self, tokens: &[S]) -> SeekKey {
        self.layout.encode_seek_key(&self.layout.encode_from_tokens(tokens))
    }

    /// Readable key of a row of values
    pub fn display_key(&self, values: &[String]) -> IndexKey {
        self.layout.key_from_values(values)
    }

    pub fn insert(&mut self, key: ByteKey, recno: u32) -> bool {
        if self.spec.unique && self.tree.seek_ge(&key).map_or(false, |e| e.key == key) {
            tracing::warn!(
                "Tag {} is unique but key '{}' is already present (record {})",
                self.spec.name,
                key,
                recno
            );
        }
        self.tree.insert(key, recno)
    }

    pub fn erase(&mut self, key: &ByteKey, recno: u32) -> bool {
        self.tree.erase(key, recno)
    }

    /// Remove by record number alone (linear scan)
    pub fn erase_recno(&mut self, recno: u32) -> bool {
        self.tree.erase_recno(recno).is_some()
    }

    /// First record whose key is ≥ `key`, whatever the tag's direction
    pub fn seek_first_ge(&self, key: &ByteKey) -> Option<u32> {
        self.tree.seek_ge(key).map(|e| e.recno)
    }

    /// Position for a seek that then walks in the given direction
    ///
    /// Ascending lands on the smallest key ≥ the input. Descending lands on
    /// the first entry met walking down from the input: the largest key
    /// starting with the typed prefix, else the largest key below it.
    pub fn seek(&self, key: &SeekKey, ascending: bool) -> Option<u32> {
        let entry = if ascending {
            self.tree.seek_ge(&key.key)
        } else {
            self.tree.seek_le(&key.upper)
        };
        entry.map(|e| e.recno)
    }

    /// First record in stored order
    pub fn top(&self) -> Option<u32> {
        self.first_in(self.spec.ascending)
    }

    /// Last record in stored order
    pub fn bottom(&self) -> Option<u32> {
        self.first_in(!self.spec.ascending)
    }

    pub fn first_in(&self, ascending: bool) -> Option<u32> {
        let entry = if ascending {
            self.tree.first()
        } else {
            self.tree.last()
        };
        entry.map(|e| e.recno)
    }

    /// Record after `(key, recno)` in the given direction
    pub fn next_after(&self, key: &ByteKey, recno: u32, ascending: bool) -> Option<u32> {
        let entry = if ascending {
            self.tree.next_after(key, recno)
        } else {
            self.tree.prev_before(key, recno)
        };
        entry.map(|e| e.recno)
    }

    /// Record before `(key, recno)` in the given direction
    pub fn prev_before(&self, key: &ByteKey, recno: u32, ascending: bool) -> Option<u32> {
        self.next_after(key, recno, !ascending)
    }

    /// `(key, recno)` pairs in stored order
    pub fn entries(&self) -> Vec<(ByteKey, u32)> {
        let mut entries: Vec<_> = self.tree.iter().map(|e| (e.key.clone(), e.recno)).collect();
        if !self.spec.ascending {
            entries.reverse();
        }
        entries
    }

    /// Record numbers in the given direction
    pub fn recnos(&self, ascending: bool) -> Vec<u32> {
        let mut recnos: Vec<u32> = self.tree.iter().map(|e| e.recno).collect();
        if !ascending {
            recnos.reverse();
        }
        recnos
    }
}
