//! Table session ("work area")
//!
//! An [`Area`] is the handle a front end holds while a table is open. It
//! owns the [`TableFile`] and its [`IndexManager`], forwards record
//! operations to the table, and fires the matching index hook after every
//! successful table write. When a tag is active, `top`/`bottom`/`skip` walk
//! the tag's order instead of physical order.
//!
//! # Example
//!
//! ```rust,no_run
//! use xbase_engine::area::Area;
//! use xbase_engine::index::IndexSpec;
//! use xbase_engine::schema::parse_field_list;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut area = Area::default();
//!     area.create("people", &parse_field_list("NAME C 10, AGE N 3 0")?)?;
//!
//!     area.append_blank()?;
//!     area.set_by_name("NAME", "alice")?;
//!     area.write_current()?;
//!
//!     area.ensure_tag(IndexSpec::parse("NAME", "NAME")?)?;
//!     area.set_active("NAME")?;
//!     area.seek(&["ALICE"])?;
//!
//!     area.close()?;
//!     Ok(())
//! }
//! ```

use crate::config::Config;
use crate::index::{
    sidecar_path, ByteKey, IndexManager, IndexSpec, IndexTag, DEFAULT_ORDER, INDEX_EXTENSION,
};
use crate::storage::{
    table_path, FieldDescriptor, FieldValue, PackOutcome, Record, StorageError, StorageResult,
    TableFile, TABLE_EXTENSION,
};
use std::path::{Path, PathBuf};

/// Session settings
#[derive(Debug, Clone)]
pub struct AreaOptions {
    pub table_extension: String,
    pub index_extension: String,
    /// Branching factor of new index trees
    pub order: usize,
    /// Default case folding of tags created through [`Area::index_on`]
    pub case_insensitive: bool,
    pub pack_backup: bool,
    /// Save the sidecar on close
    pub autosave: bool,
}

impl Default for AreaOptions {
    fn default() -> Self {
        Self {
            table_extension: TABLE_EXTENSION.to_string(),
            index_extension: INDEX_EXTENSION.to_string(),
            order: DEFAULT_ORDER,
            case_insensitive: true,
            pack_backup: false,
            autosave: true,
        }
    }
}

impl From<&Config> for AreaOptions {
    fn from(config: &Config) -> Self {
        Self {
            table_extension: config.table.extension.clone(),
            index_extension: config.index.extension.clone(),
            order: config.index.order,
            case_insensitive: config.index.case_insensitive,
            pack_backup: config.table.pack_backup,
            autosave: config.index.autosave,
        }
    }
}

/// One open table with its indexes
pub struct Area {
    options: AreaOptions,
    table: Option<TableFile>,
    indexes: IndexManager,
    sidecar: Option<PathBuf>,
}

impl Default for Area {
    fn default() -> Self {
        Self::new(AreaOptions::default())
    }
}

impl Area {
    pub fn new(options: AreaOptions) -> Self {
        let indexes = IndexManager::new(options.order);
        Self {
            options,
            table: None,
            indexes,
            sidecar: None,
        }
    }

    pub fn with_config(config: &Config) -> Self {
        Self::new(AreaOptions::from(config))
    }

    pub fn options(&self) -> &AreaOptions {
        &self.options
    }

    // ==================== Lifecycle ====================

    /// Open a table (created empty if absent) and load its index sidecar
    ///
    /// An unreadable sidecar is discarded with a warning; the table opens
    /// with no tags.
    pub fn open(&mut self, path: impl AsRef<Path>) -> StorageResult<()> {
        self.close()?;

        let path = table_path(path, &self.options.table_extension);
        let table = TableFile::open(&path)?;
        let sidecar = sidecar_path(&path, &self.options.index_extension);

        let indexes = match IndexManager::load(&sidecar, &table, self.options.order) {
            Ok(indexes) => indexes,
            Err(StorageError::CorruptIndex(reason)) => {
                tracing::warn!("Discarding index sidecar {:?}: {}", sidecar, reason);
                if let Err(e) = std::fs::remove_file(&sidecar) {
                    tracing::warn!("Could not remove {:?}: {}", sidecar, e);
                }
                IndexManager::new(self.options.order)
            }
            Err(e) => return Err(e),
        };

        self.indexes = indexes;
        self.sidecar = Some(sidecar);
        self.table = Some(table);
        Ok(())
    }

    /// Create a new table (replacing any existing one) and open it
    pub fn create(&mut self, path: impl AsRef<Path>, fields: &[FieldDescriptor]) -> StorageResult<()> {
        self.close()?;

        let path = table_path(path, &self.options.table_extension);
        let sidecar = sidecar_path(&path, &self.options.index_extension);
        TableFile::create(&path, fields)?;

        // Tags of a previous table by that name no longer apply
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }

        self.open(&path)
    }

    /// Save indexes (when autosave is on) and release the table
    pub fn close(&mut self) -> StorageResult<()> {
        let table = match self.table.take() {
            Some(table) => table,
            None => return Ok(()),
        };

        let saved = match (&self.sidecar, self.options.autosave) {
            (Some(sidecar), true) => self.indexes.save(sidecar).map(|_| ()),
            _ => Ok(()),
        };

        let path = table.path().to_path_buf();
        let closed = table.close();

        self.indexes = IndexManager::new(self.options.order);
        self.sidecar = None;
        tracing::info!("Closed {:?}", path);

        saved.and(closed)
    }

    pub fn is_open(&self) -> bool {
        self.table.is_some()
    }

    /// Path of the open table
    pub fn path(&self) -> Option<&Path> {
        self.table.as_ref().map(TableFile::path)
    }

    /// The open table
    pub fn table(&self) -> StorageResult<&TableFile> {
        self.table.as_ref().ok_or(StorageError::NotOpen)
    }

    fn table_mut(&mut self) -> StorageResult<&mut TableFile> {
        self.table.as_mut().ok_or(StorageError::NotOpen)
    }

    // ==================== Navigation ====================

    /// First record in the active order
    pub fn top(&mut self) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if !self.indexes.has_active() {
            return table.top();
        }
        match self.indexes.top() {
            Some(recno) => table.goto_record(recno),
            None => Err(StorageError::NotFound("index is empty".into())),
        }
    }

    /// Last record in the active order
    pub fn bottom(&mut self) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if !self.indexes.has_active() {
            return table.bottom();
        }
        match self.indexes.bottom() {
            Some(recno) => table.goto_record(recno),
            None => Err(StorageError::NotFound("index is empty".into())),
        }
    }

    pub fn goto_record(&mut self, recno: u32) -> StorageResult<()> {
        self.table_mut()?.goto_record(recno)
    }

    /// Move `delta` records in the active order; position is unchanged on failure
    pub fn skip(&mut self, delta: i64) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if !self.indexes.has_active() {
            return table.skip(delta);
        }

        let mut recno = table.record_number();
        if recno == 0 {
            return Err(StorageError::NotFound("no current record".into()));
        }

        for _ in 0..delta.unsigned_abs() {
            let step = if delta > 0 {
                self.indexes.next(&*table, recno)?
            } else {
                self.indexes.prev(&*table, recno)?
            };
            recno = match step {
                Some(r) => r,
                None => {
                    let count = table.record_count();
                    return Err(StorageError::OutOfRange {
                        recno: if delta > 0 { count as i64 + 1 } else { 0 },
                        count,
                    });
                }
            };
        }

        table.goto_record(recno)
    }

    /// Record numbers in the active order (physical order if none)
    pub fn ordered_recnos(&self) -> StorageResult<Vec<u32>> {
        let table = self.table()?;
        if self.indexes.has_active() {
            self.indexes.ordered_recnos()
        } else {
            Ok((1..=table.record_count()).collect())
        }
    }

    // ==================== Records ====================

    /// Reload the current record, discarding unsaved field edits
    pub fn read_current(&mut self) -> StorageResult<()> {
        self.table_mut()?.read_current()
    }

    /// Write the field buffer, then re-key the record in every tag
    pub fn write_current(&mut self) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        let recno = table.record_number();
        let snapshot = table.snapshot().to_vec();

        table.write_current()?;
        self.indexes.on_replace(&*table, recno, &snapshot)
    }

    /// Append a blank record and position on it
    pub fn append_blank(&mut self) -> StorageResult<u32> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        let recno = table.append_blank()?;
        self.indexes.on_append(&*table, recno)?;
        Ok(recno)
    }

    pub fn delete_current(&mut self) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if table.is_deleted() {
            return Ok(());
        }
        let recno = table.record_number();
        table.delete_current()?;
        self.indexes.on_delete(&*table, recno)
    }

    pub fn recall_current(&mut self) -> StorageResult<()> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if !table.is_deleted() {
            return Ok(());
        }
        let recno = table.record_number();
        table.recall_current()?;
        self.indexes.on_recall(&*table, recno)
    }

    /// Remove deleted records and rebuild the indexes
    pub fn pack(&mut self) -> StorageResult<PackOutcome> {
        let backup = self.options.pack_backup;
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        let outcome = table.pack(backup)?;
        self.indexes.on_pack(&*table, &outcome.remap)?;
        Ok(outcome)
    }

    /// Soft-delete every record and drop all tags
    pub fn zap(&mut self) -> StorageResult<u32> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        let flagged = table.zap()?;
        self.indexes.on_zap();
        Ok(flagged)
    }

    /// Read any record without moving
    pub fn read_record(&self, recno: u32) -> StorageResult<Record> {
        self.table()?.read_record(recno)
    }

    // ==================== Fields ====================

    pub fn field_count(&self) -> StorageResult<usize> {
        Ok(self.table()?.field_count())
    }

    pub fn fields(&self) -> StorageResult<&[FieldDescriptor]> {
        Ok(self.table()?.fields())
    }

    pub fn get(&self, idx: usize) -> StorageResult<&str> {
        self.table()?.get(idx)
    }

    pub fn get_typed(&self, idx: usize) -> StorageResult<FieldValue> {
        self.table()?.get_typed(idx)
    }

    pub fn set(&mut self, idx: usize, value: &str) -> StorageResult<()> {
        self.table_mut()?.set(idx, value)
    }

    pub fn get_by_name(&self, name: &str) -> StorageResult<&str> {
        self.table()?.get_by_name(name)
    }

    pub fn set_by_name(&mut self, name: &str, value: &str) -> StorageResult<()> {
        self.table_mut()?.set_by_name(name, value)
    }

    pub fn record_number(&self) -> StorageResult<u32> {
        Ok(self.table()?.record_number())
    }

    pub fn record_count(&self) -> StorageResult<u32> {
        Ok(self.table()?.record_count())
    }

    pub fn is_deleted(&self) -> StorageResult<bool> {
        Ok(self.table()?.is_deleted())
    }

    // ==================== Indexes ====================

    /// Spec using this session's case folding
    pub fn index_on(&self, name: &str, expr: &str, ascending: bool) -> StorageResult<IndexSpec> {
        Ok(IndexSpec::parse(name, expr)?
            .with_direction(ascending)
            .case_insensitive(self.options.case_insensitive))
    }

    /// Existing tag, or one built from a full scan
    pub fn ensure_tag(&mut self, spec: IndexSpec) -> StorageResult<&IndexTag> {
        let table = self.table.as_ref().ok_or(StorageError::NotOpen)?;
        self.indexes.ensure_tag(table, spec)
    }

    pub fn rebuild_tag(&mut self, name: &str) -> StorageResult<()> {
        let table = self.table.as_ref().ok_or(StorageError::NotOpen)?;
        self.indexes.rebuild_tag(table, name)
    }

    /// Rebuild every tag
    pub fn reindex(&mut self) -> StorageResult<()> {
        let table = self.table.as_ref().ok_or(StorageError::NotOpen)?;
        self.indexes.reindex(table)
    }

    pub fn drop_tag(&mut self, name: &str) -> StorageResult<bool> {
        self.table()?;
        Ok(self.indexes.drop_tag(name))
    }

    pub fn set_active(&mut self, name: &str) -> StorageResult<()> {
        self.table()?;
        self.indexes.set_active(name)
    }

    pub fn clear_active(&mut self) {
        self.indexes.clear_active();
    }

    pub fn has_active(&self) -> bool {
        self.indexes.has_active()
    }

    pub fn set_direction(&mut self, ascending: bool) {
        self.indexes.set_direction(ascending);
    }

    /// Position where a walk in the active direction would meet the tokens
    ///
    /// Ascending: first key ≥ the tokens. Descending: last key starting with
    /// the typed prefix, else the last key below it.
    pub fn seek<S: AsRef<str>>(&mut self, tokens: &[S]) -> StorageResult<u32> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        let recno = self.indexes.seek(tokens)?.ok_or_else(|| {
            let key: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
            StorageError::NotFound(format!("key {}", key.join(" ")))
        })?;
        table.goto_record(recno)?;
        Ok(recno)
    }

    /// Position on the first record of the active tag whose key is ≥ `key`
    pub fn seek_first_ge(&mut self, key: &ByteKey) -> StorageResult<u32> {
        let table = self.table.as_mut().ok_or(StorageError::NotOpen)?;
        if !self.indexes.has_active() {
            return Err(StorageError::NotFound("no active index".into()));
        }
        let recno = self
            .indexes
            .seek_first_ge(key)
            .ok_or_else(|| StorageError::NotFound(format!("key {}", key)))?;
        table.goto_record(recno)?;
        Ok(recno)
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Write the sidecar now if indexes changed
    pub fn save_indexes(&mut self) -> StorageResult<bool> {
        let sidecar = self.sidecar.as_ref().ok_or(StorageError::NotOpen)?;
        self.indexes.save(sidecar)
    }
}

impl Drop for Area {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing table: {}", e);
        }
    }
}
