//! Index Manager - keeps every tag of a table consistent with its records
//!
//! The session calls one hook per mutation, after the table write:
//!
//! ```text
//! append_blank   → on_append(recno)
//! write_current  → on_replace(recno, snapshot)   erase old key, insert new
//! delete_current → on_delete(recno)
//! recall_current → on_recall(recno)
//! pack           → on_pack(remap)                rebuild from the packed file
//! zap            → on_zap()                      drop all tags
//! ```
//!
//! The manager also owns the active order: which tag (if any) drives
//! navigation, and whether it is walked ascending or descending.

use crate::index::codec::ByteKey;
use crate::index::sidecar::{read_sidecar, write_sidecar};
use crate::index::spec::IndexSpec;
use crate::index::tag::IndexTag;
use crate::index::{IndexStats, RecordSource, DEFAULT_ORDER};
use crate::storage::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Owns all tags of one open table
#[derive(Debug)]
pub struct IndexManager {
    /// Tag name → tag
    tags: BTreeMap<String, IndexTag>,
    /// Tag driving navigation; `None` = physical order
    active: Option<String>,
    /// Effective direction of the active order
    ascending: bool,
    /// Changed since last save
    dirty: bool,
    /// Branching factor for new trees
    order: usize,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl IndexManager {
    /// Empty manager
    pub fn new(order: usize) -> Self {
        Self {
            tags: BTreeMap::new(),
            active: None,
            ascending: true,
            dirty: false,
            order,
        }
    }

    /// Load tags from a sidecar; a missing file yields an empty manager
    ///
    /// Tags that no longer fit the table (unknown fields, record numbers
    /// beyond the end) are reported as `CorruptIndex`.
    pub fn load(path: &Path, source: &dyn RecordSource, order: usize) -> StorageResult<Self> {
        let mut manager = Self::new(order);

        let stored = match read_sidecar(path)? {
            Some(stored) => stored,
            None => return Ok(manager),
        };

        let count = source.record_count();
        for (spec, tree) in stored {
            if let Some(entry) = tree.iter().find(|e| e.recno == 0 || e.recno > count) {
                return Err(StorageError::CorruptIndex(format!(
                    "tag {} references record {} of {}",
                    spec.name, entry.recno, count
                )));
            }

            let name = spec.name.clone();
            let tag = IndexTag::from_parts(spec, source.fields(), tree)
                .map_err(|e| StorageError::CorruptIndex(format!("tag {}: {}", name, e)))?;
            manager.tags.insert(name, tag);
        }

        tracing::info!("Loaded {} index tags from {:?}", manager.tags.len(), path);
        Ok(manager)
    }

    /// Write the sidecar if anything changed; returns whether it wrote
    ///
    /// With no tags left the sidecar is removed.
    pub fn save(&mut self, path: &Path) -> StorageResult<bool> {
        if !self.dirty {
            return Ok(false);
        }

        if self.tags.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
                tracing::debug!("Removed empty index sidecar {:?}", path);
            }
        } else {
            write_sidecar(path, self.tags.values())?;
        }

        self.dirty = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ==================== Mutation hooks ====================

    /// A record was appended
    pub fn on_append(&mut self, source: &dyn RecordSource, recno: u32) -> StorageResult<()> {
        if self.tags.is_empty() {
            return Ok(());
        }

        let record = source.read_record(recno)?;
        if record.deleted {
            return Ok(());
        }

        for tag in self.tags.values_mut() {
            let key = tag.key_for(&record.values);
            tag.insert(key, recno);
        }
        self.dirty = true;
        tracing::debug!("Indexed appended record {} in {} tags", recno, self.tags.len());
        Ok(())
    }

    /// A record was rewritten; `snapshot` holds its values before the write
    pub fn on_replace(
        &mut self,
        source: &dyn RecordSource,
        recno: u32,
        snapshot: &[String],
    ) -> StorageResult<()> {
        if self.tags.is_empty() {
            return Ok(());
        }

        let record = source.read_record(recno)?;
        for tag in self.tags.values_mut() {
            let old_key = tag.key_for(snapshot);
            let new_key = tag.key_for(&record.values);
            if old_key == new_key && !record.deleted && tag.tree().contains(&new_key, recno) {
                continue;
            }

            Self::remove_entry(tag, &old_key, recno);
            if !record.deleted {
                tag.insert(new_key, recno);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// A record was soft-deleted
    pub fn on_delete(&mut self, source: &dyn RecordSource, recno: u32) -> StorageResult<()> {
        if self.tags.is_empty() {
            return Ok(());
        }

        let record = source.read_record(recno)?;
        for tag in self.tags.values_mut() {
            let key = tag.key_for(&record.values);
            Self::remove_entry(tag, &key, recno);
        }
        self.dirty = true;
        Ok(())
    }

    /// A deleted record was recalled
    pub fn on_recall(&mut self, source: &dyn RecordSource, recno: u32) -> StorageResult<()> {
        self.on_append(source, recno)
    }

    /// The table was packed; rebuild every tag from the packed file
    pub fn on_pack(&mut self, source: &dyn RecordSource, remap: &[Option<u32>]) -> StorageResult<()> {
        let kept = remap.iter().flatten().count();

        for tag in self.tags.values_mut() {
            let before = tag.len();
            tag.bulk_build(source)?;

            if before != kept {
                tracing::warn!(
                    "Tag {} was stale before pack: {} entries for {} live records",
                    tag.name(),
                    before,
                    kept
                );
            }
            if tag.len() != kept {
                tracing::warn!(
                    "Tag {} holds {} entries after pack, expected {}",
                    tag.name(),
                    tag.len(),
                    kept
                );
            }
        }

        if !self.tags.is_empty() {
            self.dirty = true;
        }
        tracing::info!("Rebuilt {} tags after pack ({} records kept)", self.tags.len(), kept);
        Ok(())
    }

    /// All records were deleted; drop every tag
    pub fn on_zap(&mut self) {
        let dropped = self.tags.len();
        self.tags.clear();
        self.active = None;
        self.ascending = true;
        self.dirty = true;
        tracing::info!("Dropped {} index tags after zap", dropped);
    }

    /// Erase the exact entry, falling back to a record-number scan
    fn remove_entry(tag: &mut IndexTag, key: &ByteKey, recno: u32) {
        if !tag.erase(key, recno) && tag.erase_recno(recno) {
            tracing::debug!(
                "Tag {}: record {} found only by scan (key drifted)",
                tag.name(),
                recno
            );
        }
    }

    // ==================== Tags ====================

    /// Existing tag of that name, or a new one built from a full scan
    pub fn ensure_tag(&mut self, source: &dyn RecordSource, spec: IndexSpec) -> StorageResult<&IndexTag> {
        let name = spec.name.clone();

        if let Some(existing) = self.tags.get(&name) {
            if existing.spec() != &spec {
                tracing::debug!(
                    "Tag {} exists as '{}', keeping it over '{}'",
                    name,
                    existing.spec(),
                    spec
                );
            }
        } else {
            let tag = IndexTag::build(spec, source, self.order)?;
            self.tags.insert(name.clone(), tag);
            self.dirty = true;
        }

        self.tags
            .get(&name)
            .ok_or_else(|| StorageError::NotFound(format!("tag {}", name)))
    }

    /// Rebuild one tag from a full scan
    pub fn rebuild_tag(&mut self, source: &dyn RecordSource, name: &str) -> StorageResult<()> {
        let tag = self
            .tags
            .get_mut(&normalize(name))
            .ok_or_else(|| StorageError::NotFound(format!("tag {}", name)))?;
        tag.bulk_build(source)?;
        self.dirty = true;
        Ok(())
    }

    /// Rebuild every tag from a full scan
    pub fn reindex(&mut self, source: &dyn RecordSource) -> StorageResult<()> {
        for tag in self.tags.values_mut() {
            tag.bulk_build(source)?;
        }
        if !self.tags.is_empty() {
            self.dirty = true;
        }
        Ok(())
    }

    /// Remove a tag; clears the active order if it was active
    pub fn drop_tag(&mut self, name: &str) -> bool {
        let name = normalize(name);
        if self.tags.remove(&name).is_none() {
            return false;
        }
        if self.active.as_deref() == Some(name.as_str()) {
            self.clear_active();
        }
        self.dirty = true;
        tracing::info!("Dropped tag {}", name);
        true
    }

    pub fn tag(&self, name: &str) -> Option<&IndexTag> {
        self.tags.get(&normalize(name))
    }

    pub fn tags(&self) -> impl Iterator<Item = &IndexTag> {
        self.tags.values()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    // ==================== Active order ====================

    /// Make a tag drive navigation; direction resets to the tag's own order
    pub fn set_active(&mut self, name: &str) -> StorageResult<()> {
        let name = normalize(name);
        let tag = self
            .tags
            .get(&name)
            .ok_or_else(|| StorageError::NotFound(format!("tag {}", name)))?;
        self.ascending = tag.spec().ascending;
        self.active = Some(name);
        Ok(())
    }

    /// Back to physical order
    pub fn clear_active(&mut self) {
        self.active = None;
        self.ascending = true;
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_tag(&self) -> Option<&IndexTag> {
        self.active.as_ref().and_then(|name| self.tags.get(name))
    }

    /// Override the walk direction of the active tag
    pub fn set_direction(&mut self, ascending: bool) {
        self.ascending = ascending;
    }

    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    fn require_active(&self) -> StorageResult<&IndexTag> {
        self.active_tag()
            .ok_or_else(|| StorageError::NotFound("no active index".into()))
    }

    // ==================== Ordered traversal ====================

    /// First record in the active order
    pub fn top(&self) -> Option<u32> {
        self.active_tag().and_then(|t| t.first_in(self.ascending))
    }

    /// Last record in the active order
    pub fn bottom(&self) -> Option<u32> {
        self.active_tag().and_then(|t| t.first_in(!self.ascending))
    }

    /// First record of the active tag whose key is ≥ `key`
    pub fn seek_first_ge(&self, key: &ByteKey) -> Option<u32> {
        self.active_tag().and_then(|t| t.seek_first_ge(key))
    }

    /// Seek with user tokens, one per key field, in the active direction
    /// (see [`IndexTag::seek`])
    pub fn seek<S: AsRef<str>>(&self, tokens: &[S]) -> StorageResult<Option<u32>> {
        let tag = self.require_active()?;
        let key = tag.seek_key(tokens);
        Ok(tag.seek(&key, self.ascending))
    }

    /// Record after `recno` in the active order
    pub fn next(&self, source: &dyn RecordSource, recno: u32) -> StorageResult<Option<u32>> {
        self.step(source, recno, true)
    }

    /// Record before `recno` in the active order
    pub fn prev(&self, source: &dyn RecordSource, recno: u32) -> StorageResult<Option<u32>> {
        self.step(source, recno, false)
    }

    fn step(&self, source: &dyn RecordSource, recno: u32, forward: bool) -> StorageResult<Option<u32>> {
        let tag = self.require_active()?;
        let record = source.read_record(recno)?;
        let key = tag.key_for(&record.values);
        let ascending = self.ascending == forward;
        Ok(tag.next_after(&key, recno, ascending))
    }

    /// Record numbers of the active order
    pub fn ordered_recnos(&self) -> StorageResult<Vec<u32>> {
        Ok(self.require_active()?.recnos(self.ascending))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            tags: self.tags.len(),
            entries: self.tags.values().map(IndexTag::len).sum(),
            active: self.active.clone(),
            ascending: self.ascending,
            dirty: self.dirty,
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FieldDescriptor, Record};
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Mutable in-memory table
    struct Rows {
        fields: Vec<FieldDescriptor>,
        rows: RefCell<Vec<(bool, Vec<String>)>>,
    }

    impl Rows {
        fn new(names: &[&str]) -> Self {
            Self {
                fields: vec![
                    FieldDescriptor::character("NAME", 8).unwrap(),
                    FieldDescriptor::numeric("AGE", 3, 0).unwrap(),
                ],
                rows: RefCell::new(
                    names
                        .iter()
                        .enumerate()
                        .map(|(i, n)| (false, vec![n.to_string(), (20 + i).to_string()]))
                        .collect(),
                ),
            }
        }

        fn push(&self, name: &str) -> u32 {
            let mut rows = self.rows.borrow_mut();
            rows.push((false, vec![name.to_string(), "1".to_string()]));
            rows.len() as u32
        }

        fn set_name(&self, recno: u32, name: &str) -> Vec<String> {
            let mut rows = self.rows.borrow_mut();
            let row = &mut rows[recno as usize - 1].1;
            let snapshot = row.clone();
            row[0] = name.to_string();
            snapshot
        }

        fn set_deleted(&self, recno: u32, deleted: bool) {
            self.rows.borrow_mut()[recno as usize - 1].0 = deleted;
        }
    }

    impl RecordSource for Rows {
        fn fields(&self) -> &[FieldDescriptor] {
            &self.fields
        }

        fn record_count(&self) -> u32 {
            self.rows.borrow().len() as u32
        }

        fn read_record(&self, recno: u32) -> StorageResult<Record> {
            let rows = self.rows.borrow();
            let (deleted, values) = rows.get(recno as usize - 1).cloned().ok_or(
                StorageError::OutOfRange {
                    recno: recno as i64,
                    count: rows.len() as u32,
                },
            )?;
            Ok(Record { recno, deleted, values })
        }
    }

    fn by_name(source: &Rows) -> IndexManager {
        let mut manager = IndexManager::new(4);
        manager
            .ensure_tag(source, IndexSpec::parse("NAME", "NAME").unwrap())
            .unwrap();
        manager.set_active("name").unwrap();
        manager
    }

    /// Every live record appears exactly once under its current key
    fn assert_consistent(manager: &IndexManager, source: &Rows) {
        for tag in manager.tags() {
            let mut expected: Vec<(ByteKey, u32)> = (1..=source.record_count())
                .filter_map(|r| {
                    let rec = source.read_record(r).unwrap();
                    (!rec.deleted).then(|| (tag.key_for(&rec.values), r))
                })
                .collect();
            expected.sort();
            let actual: Vec<(ByteKey, u32)> =
                tag.tree().iter().map(|e| (e.key.clone(), e.recno)).collect();
            assert_eq!(actual, expected, "tag {}", tag.name());
            tag.tree().validate().unwrap();
        }
    }

    #[test]
    fn test_hooks_keep_tags_consistent() {
        let source = Rows::new(&["carol", "alice", "bob"]);
        let mut manager = by_name(&source);
        manager
            .ensure_tag(&source, IndexSpec::parse("AGE", "AGE").unwrap())
            .unwrap();

        let recno = source.push("aaron");
        manager.on_append(&source, recno).unwrap();
        assert_consistent(&manager, &source);
        assert_eq!(manager.top(), Some(4));

        let snapshot = source.set_name(4, "zoe");
        manager.on_replace(&source, 4, &snapshot).unwrap();
        assert_consistent(&manager, &source);
        assert_eq!(manager.top(), Some(2));
        assert_eq!(manager.bottom(), Some(4));

        source.set_deleted(2, true);
        manager.on_delete(&source, 2).unwrap();
        assert_consistent(&manager, &source);
        assert_eq!(manager.top(), Some(3));

        source.set_deleted(2, false);
        manager.on_recall(&source, 2).unwrap();
        assert_consistent(&manager, &source);
        assert!(manager.is_dirty());
    }

    #[test]
    fn test_replace_with_stale_snapshot_falls_back_to_scan() {
        let source = Rows::new(&["carol", "alice"]);
        let mut manager = by_name(&source);

        source.set_name(1, "dora");
        let wrong_snapshot = vec!["nobody".to_string(), "0".to_string()];
        manager.on_replace(&source, 1, &wrong_snapshot).unwrap();
        assert_consistent(&manager, &source);
    }

    #[test]
    fn test_direction_and_stepping() {
        let source = Rows::new(&["carol", "alice", "bob", "alice"]);
        let mut manager = by_name(&source);

        // alice(2) alice(4) bob(3) carol(1)
        assert_eq!(manager.next(&source, 2).unwrap(), Some(4));
        assert_eq!(manager.next(&source, 1).unwrap(), None);
        assert_eq!(manager.prev(&source, 3).unwrap(), Some(4));

        manager.set_direction(false);
        assert_eq!(manager.top(), Some(1));
        assert_eq!(manager.next(&source, 1).unwrap(), Some(3));
        assert_eq!(manager.ordered_recnos().unwrap(), vec![1, 3, 4, 2]);

        // Re-activating restores the tag's stored order
        manager.set_active("NAME").unwrap();
        assert!(manager.is_ascending());
    }

    #[test]
    fn test_seek_in_active_order() {
        let source = Rows::new(&["alice", "bob", "carol"]);
        let mut manager = by_name(&source);

        assert_eq!(manager.seek(&["BOB"]).unwrap(), Some(2));
        assert_eq!(manager.seek(&["bz"]).unwrap(), Some(3));
        assert_eq!(manager.seek(&["zzz"]).unwrap(), None);

        manager.set_direction(false);
        assert_eq!(manager.seek(&["B"]).unwrap(), Some(2));
        assert_eq!(manager.seek(&["C"]).unwrap(), Some(3));
        assert_eq!(manager.seek(&["AZ"]).unwrap(), Some(1));

        // Key lookups stay ≥ in either direction
        let az = manager.active_tag().unwrap().seek_key(&["AZ"]).key;
        assert_eq!(manager.seek_first_ge(&az), Some(2));

        manager.clear_active();
        assert!(matches!(manager.seek(&["BOB"]), Err(StorageError::NotFound(_))));
        assert!(manager.top().is_none());
    }

    #[test]
    fn test_pack_and_zap() {
        let source = Rows::new(&["carol", "alice", "bob"]);
        let mut manager = by_name(&source);

        // Pack removed record 2; the source now holds the packed rows
        let packed = Rows::new(&["carol", "bob"]);
        manager.on_pack(&packed, &[Some(1), None, Some(2)]).unwrap();
        assert_consistent(&manager, &packed);
        assert_eq!(manager.top(), Some(2));

        manager.on_zap();
        assert!(manager.is_empty());
        assert!(!manager.has_active());
    }

    #[test]
    fn test_ensure_tag_is_idempotent_and_drop() {
        let source = Rows::new(&["b", "a"]);
        let mut manager = IndexManager::new(4);
        manager
            .ensure_tag(&source, IndexSpec::parse("N", "NAME").unwrap())
            .unwrap();
        let again = manager
            .ensure_tag(&source, IndexSpec::parse("n", "AGE").unwrap())
            .unwrap();
        assert_eq!(again.spec().expression(), "NAME");
        assert_eq!(manager.tag_names(), vec!["N".to_string()]);

        assert!(manager.set_active("missing").is_err());
        manager.set_active("n").unwrap();
        assert!(manager.drop_tag("N"));
        assert!(!manager.has_active());
        assert!(!manager.drop_tag("N"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.inx");
        let source = Rows::new(&["carol", "alice", "bob"]);

        let mut manager = by_name(&source);
        assert!(manager.save(&path).unwrap());
        assert!(!manager.save(&path).unwrap());

        let loaded = IndexManager::load(&path, &source, 4).unwrap();
        assert_eq!(loaded.tag_names(), vec!["NAME".to_string()]);
        assert_consistent(&loaded, &source);
        assert!(!loaded.has_active());

        // Fewer records than the sidecar references
        let shorter = Rows::new(&["carol"]);
        assert!(matches!(
            IndexManager::load(&path, &shorter, 4),
            Err(StorageError::CorruptIndex(_))
        ));

        // Dropping the last tag removes the file
        manager.drop_tag("NAME");
        manager.save(&path).unwrap();
        assert!(!path.exists());
        assert!(IndexManager::load(&path, &source, 4).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let source = Rows::new(&["a", "b"]);
        let manager = by_name(&source);
        let stats = manager.stats();
        assert_eq!(stats.tags, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.active.as_deref(), Some("NAME"));
        assert_eq!(stats.to_string(), "1 tags, 2 entries, order: NAME ascending");
    }
}
