//! Table file: fixed-length records behind a dBase III header
//!
//! `TableFile` owns the open file handle, the decoded header and field
//! directory, and the current-record buffer. Every mutating operation writes
//! through to disk before returning.
//!
//! Record numbers are 1-based; `0` means "no current record".

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::header::{
    field_from_bytes, field_to_bytes, TableHeader, DELETED_FLAG, EOF_MARKER,
    FIELD_DESCRIPTOR_SIZE, HEADER_SIZE, HEADER_TERMINATOR, LIVE_FLAG,
};
use crate::storage::types::{FieldDescriptor, FieldValue};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Default table file extension
pub const TABLE_EXTENSION: &str = "dbf";

/// Append `ext` when the path has no extension
pub fn table_path(path: impl AsRef<Path>, ext: &str) -> PathBuf {
    let path = path.as_ref();
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(ext)
    }
}

/// One record read by position
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub recno: u32,
    pub deleted: bool,
    /// Normalized field values in column order
    pub values: Vec<String>,
}

/// Result of a pack
#[derive(Debug, Clone)]
pub struct PackOutcome {
    /// `remap[old - 1]` is the new record number, `None` if the record was removed
    pub remap: Vec<Option<u32>>,
    /// Records kept
    pub kept: u32,
    /// Records removed
    pub removed: u32,
}

impl PackOutcome {
    /// New number for an old record number
    pub fn new_recno(&self, old: u32) -> Option<u32> {
        old.checked_sub(1)
            .and_then(|i| self.remap.get(i as usize))
            .copied()
            .flatten()
    }
}

/// An open table file
pub struct TableFile {
    path: PathBuf,
    file: File,
    header: TableHeader,
    fields: Vec<FieldDescriptor>,
    /// Byte offset of each field within a record
    offsets: Vec<usize>,
    /// Raw bytes of the current record
    buffer: Vec<u8>,
    /// Field buffer of the current record
    values: Vec<String>,
    /// Values as last read from or written to disk
    snapshot: Vec<String>,
    deleted: bool,
    recno: u32,
}

impl TableFile {
    /// Open a table, creating an empty one (no fields) if the file is absent
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            tracing::info!("Table {:?} not found, creating an empty one", path);
            Self::write_empty(&path, &[])?;
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let (header, fields) = Self::read_directory(&mut file)?;

        let mut table = Self::from_parts(path, file, header, fields);
        if table.header.record_count > 0 {
            table.goto_record(1)?;
        }

        tracing::info!(
            "Opened table {:?}: {} fields, {} records",
            table.path,
            table.fields.len(),
            table.header.record_count
        );
        Ok(table)
    }

    /// Create a new table with the given columns, replacing any existing file
    pub fn create(path: impl AsRef<Path>, fields: &[FieldDescriptor]) -> StorageResult<Self> {
        let path = path.as_ref();

        let mut seen = HashSet::new();
        for field in fields {
            field.validate()?;
            if !seen.insert(field.name.to_ascii_uppercase()) {
                return Err(StorageError::InvalidSpec(format!(
                    "duplicate field name {}",
                    field.name
                )));
            }
        }

        Self::write_empty(path, fields)?;
        tracing::info!("Created table {:?} with {} fields", path, fields.len());
        Self::open(path)
    }

    /// Write header, field directory, terminator and EOF marker
    fn write_empty(path: &Path, fields: &[FieldDescriptor]) -> StorageResult<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let header = TableHeader::for_fields(fields)?;
        let mut writer = BufWriter::new(File::create(path)?);
        Self::write_directory(&mut writer, &header, fields)?;
        writer.write_all(&[EOF_MARKER])?;
        writer.flush()?;
        Ok(())
    }

    fn write_directory<W: Write>(
        writer: &mut W,
        header: &TableHeader,
        fields: &[FieldDescriptor],
    ) -> StorageResult<()> {
        writer.write_all(&header.to_bytes())?;
        for field in fields {
            writer.write_all(&field_to_bytes(field))?;
        }
        writer.write_all(&[HEADER_TERMINATOR])?;
        Ok(())
    }

    /// Read and validate header + field directory
    fn read_directory(file: &mut File) -> StorageResult<(TableHeader, Vec<FieldDescriptor>)> {
        let file_len = file.metadata()?.len();
        if file_len < (HEADER_SIZE + 1) as u64 {
            return Err(StorageError::Format(format!(
                "file too short for a header ({} bytes)",
                file_len
            )));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = TableHeader::from_bytes(&header_buf);

        let field_count = header.field_count()?;
        if (header.header_length as u64) > file_len {
            return Err(StorageError::Format(format!(
                "header length {} beyond end of file",
                header.header_length
            )));
        }

        // Descriptors plus the terminator byte
        let mut directory = vec![0u8; header.header_length as usize - HEADER_SIZE];
        file.read_exact(&mut directory)?;

        if directory.last() != Some(&HEADER_TERMINATOR) {
            return Err(StorageError::Format(
                "field directory terminator (0x0D) missing".into(),
            ));
        }

        let fields = directory[..field_count * FIELD_DESCRIPTOR_SIZE]
            .chunks(FIELD_DESCRIPTOR_SIZE)
            .map(field_from_bytes)
            .collect::<StorageResult<Vec<_>>>()?;

        let expected_length = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
        if expected_length != header.record_length as usize {
            return Err(StorageError::Format(format!(
                "record length {} does not match field widths ({})",
                header.record_length, expected_length
            )));
        }

        if file_len < header.data_end() {
            return Err(StorageError::Format(format!(
                "file holds {} bytes but header promises {} records ({} bytes)",
                file_len,
                header.record_count,
                header.data_end()
            )));
        }

        Ok((header, fields))
    }

    fn from_parts(
        path: PathBuf,
        file: File,
        header: TableHeader,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 1;
        for field in &fields {
            offsets.push(offset);
            offset += field.length as usize;
        }

        let blank = vec![String::new(); fields.len()];
        Self {
            path,
            file,
            buffer: vec![b' '; header.record_length as usize],
            header,
            fields,
            offsets,
            values: blank.clone(),
            snapshot: blank,
            deleted: false,
            recno: 0,
        }
    }

    // ==================== Info ====================

    /// Path of the table file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    /// Current record number, `0` if none
    pub fn record_number(&self) -> u32 {
        self.recno
    }

    /// Delete flag of the current record
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Case-insensitive column lookup
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name_matches(name))
    }

    // ==================== Field access ====================

    /// Value of column `idx` (0-based) in the field buffer
    pub fn get(&self, idx: usize) -> StorageResult<&str> {
        self.values
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| StorageError::NotFound(format!("field #{}", idx + 1)))
    }

    /// Typed value of column `idx`
    pub fn get_typed(&self, idx: usize) -> StorageResult<FieldValue> {
        let value = self.get(idx)?;
        Ok(self.fields[idx].typed(value))
    }

    /// Store a value into the field buffer (not yet written to disk)
    pub fn set(&mut self, idx: usize, value: &str) -> StorageResult<()> {
        let field = self
            .fields
            .get(idx)
            .ok_or_else(|| StorageError::NotFound(format!("field #{}", idx + 1)))?;
        self.values[idx] = field.normalize(value)?;
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> StorageResult<&str> {
        let idx = self.require_field(name)?;
        self.get(idx)
    }

    pub fn set_by_name(&mut self, name: &str, value: &str) -> StorageResult<()> {
        let idx = self.require_field(name)?;
        self.set(idx, value)
    }

    fn require_field(&self, name: &str) -> StorageResult<usize> {
        self.field_index(name)
            .ok_or_else(|| StorageError::NotFound(format!("field {}", name)))
    }

    /// Current field buffer
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Values of the current record as last read from or written to disk
    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }

    // ==================== Navigation ====================

    /// Position on record `recno` and load it
    pub fn goto_record(&mut self, recno: u32) -> StorageResult<()> {
        self.check_range(recno as i64)?;
        self.recno = recno;
        self.read_current()
    }

    pub fn top(&mut self) -> StorageResult<()> {
        self.goto_record(1)
    }

    pub fn bottom(&mut self) -> StorageResult<()> {
        self.goto_record(self.header.record_count)
    }

    /// Move `delta` records in physical order; position is unchanged on failure
    pub fn skip(&mut self, delta: i64) -> StorageResult<()> {
        if self.recno == 0 {
            return Err(StorageError::NotFound("no current record".into()));
        }
        let target = self.recno as i64 + delta;
        self.check_range(target)?;
        self.goto_record(target as u32)
    }

    fn check_range(&self, recno: i64) -> StorageResult<()> {
        if recno < 1 || recno > self.header.record_count as i64 {
            return Err(StorageError::OutOfRange {
                recno,
                count: self.header.record_count,
            });
        }
        Ok(())
    }

    // ==================== Record I/O ====================

    /// Reload the current record from disk into the field buffer
    pub fn read_current(&mut self) -> StorageResult<()> {
        if self.recno == 0 {
            return Err(StorageError::NotFound("no current record".into()));
        }

        let offset = self.header.record_offset(self.recno);
        (&self.file).seek(SeekFrom::Start(offset))?;
        (&self.file).read_exact(&mut self.buffer)?;

        self.deleted = self.buffer[0] == DELETED_FLAG;
        self.values = self.decode_buffer(&self.buffer);
        self.snapshot = self.values.clone();
        Ok(())
    }

    /// Write the field buffer and delete flag of the current record
    pub fn write_current(&mut self) -> StorageResult<()> {
        if self.recno == 0 {
            return Err(StorageError::NotFound("no current record".into()));
        }

        self.buffer[0] = if self.deleted { DELETED_FLAG } else { LIVE_FLAG };
        for (i, field) in self.fields.iter().enumerate() {
            let start = self.offsets[i];
            let end = start + field.length as usize;
            field.encode_into(&self.values[i], &mut self.buffer[start..end])?;
        }

        let offset = self.header.record_offset(self.recno);
        (&self.file).seek(SeekFrom::Start(offset))?;
        (&self.file).write_all(&self.buffer)?;
        (&self.file).flush()?;

        self.snapshot = self.values.clone();
        Ok(())
    }

    /// Read a record by position without moving the current record
    pub fn read_record(&self, recno: u32) -> StorageResult<Record> {
        self.check_range(recno as i64)?;

        let mut buf = vec![0u8; self.header.record_length as usize];
        (&self.file).seek(SeekFrom::Start(self.header.record_offset(recno)))?;
        (&self.file).read_exact(&mut buf)?;

        Ok(Record {
            recno,
            deleted: buf[0] == DELETED_FLAG,
            values: self.decode_buffer(&buf),
        })
    }

    fn decode_buffer(&self, buf: &[u8]) -> Vec<String> {
        self.fields
            .iter()
            .zip(&self.offsets)
            .map(|(field, &start)| field.decode(&buf[start..start + field.length as usize]))
            .collect()
    }

    /// Append a blank live record and position on it
    pub fn append_blank(&mut self) -> StorageResult<u32> {
        let blank = vec![b' '; self.header.record_length as usize];

        (&self.file).seek(SeekFrom::Start(self.header.data_end()))?;
        (&self.file).write_all(&blank)?;
        (&self.file).write_all(&[EOF_MARKER])?;

        self.header.record_count += 1;
        self.write_header()?;

        let recno = self.header.record_count;
        self.goto_record(recno)?;
        tracing::debug!("Appended blank record {}", recno);
        Ok(recno)
    }

    /// Soft-delete the current record
    pub fn delete_current(&mut self) -> StorageResult<()> {
        self.set_delete_flag(true)
    }

    /// Clear the delete flag of the current record
    pub fn recall_current(&mut self) -> StorageResult<()> {
        self.set_delete_flag(false)
    }

    fn set_delete_flag(&mut self, deleted: bool) -> StorageResult<()> {
        if self.recno == 0 {
            return Err(StorageError::NotFound("no current record".into()));
        }
        // Persist the flag against the on-disk values, not pending edits
        self.values = self.snapshot.clone();
        self.deleted = deleted;
        self.write_current()
    }

    /// Soft-delete every record; returns how many changed state
    pub fn zap(&mut self) -> StorageResult<u32> {
        let mut flagged = 0;
        let mut flag = [0u8; 1];

        for recno in 1..=self.header.record_count {
            let offset = self.header.record_offset(recno);
            (&self.file).seek(SeekFrom::Start(offset))?;
            (&self.file).read_exact(&mut flag)?;
            if flag[0] != DELETED_FLAG {
                (&self.file).seek(SeekFrom::Start(offset))?;
                (&self.file).write_all(&[DELETED_FLAG])?;
                flagged += 1;
            }
        }

        self.write_header()?;
        if self.recno != 0 {
            self.read_current()?;
        }

        tracing::info!(
            "Zapped {:?}: {} of {} records flagged deleted",
            self.path,
            flagged,
            self.header.record_count
        );
        Ok(flagged)
    }

    /// Physically remove deleted records and renumber the survivors
    ///
    /// The table is rewritten into a temporary file that then replaces the
    /// original. With `keep_backup` the previous file is kept as `<name>.bak`.
    pub fn pack(&mut self, keep_backup: bool) -> StorageResult<PackOutcome> {
        let count = self.header.record_count;
        let tmp_path = sibling_path(&self.path, "pack_tmp");

        let mut remap = Vec::with_capacity(count as usize);
        let mut kept = 0u32;
        {
            let mut out_header = self.header.clone();
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            Self::write_directory(&mut writer, &out_header, &self.fields)?;

            let mut buf = vec![0u8; self.header.record_length as usize];
            (&self.file).seek(SeekFrom::Start(self.header.header_length as u64))?;
            for _ in 0..count {
                (&self.file).read_exact(&mut buf)?;
                if buf[0] == DELETED_FLAG {
                    remap.push(None);
                } else {
                    buf[0] = LIVE_FLAG;
                    writer.write_all(&buf)?;
                    kept += 1;
                    remap.push(Some(kept));
                }
            }
            writer.write_all(&[EOF_MARKER])?;

            // Patch the kept count into the header
            out_header.record_count = kept;
            out_header.touch();
            writer.seek(SeekFrom::Start(0))?;
            writer.write_all(&out_header.to_bytes())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        if keep_backup {
            let backup = sibling_path(&self.path, "bak");
            if backup.exists() {
                std::fs::remove_file(&backup)?;
            }
            std::fs::copy(&self.path, &backup)?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        // Reopen on the packed file
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let (header, _) = Self::read_directory(&mut file)?;
        self.file = file;
        self.header = header;

        let outcome = PackOutcome {
            remap,
            kept,
            removed: count - kept,
        };

        let previous = self.recno;
        self.recno = 0;
        if let Some(recno) = outcome.new_recno(previous) {
            self.goto_record(recno)?;
        } else if kept > 0 {
            self.goto_record(1)?;
        } else {
            self.values = vec![String::new(); self.fields.len()];
            self.snapshot = self.values.clone();
            self.deleted = false;
        }

        tracing::info!(
            "Packed {:?}: kept {} of {} records",
            self.path,
            kept,
            count
        );
        Ok(outcome)
    }

    /// Rewrite the header with a fresh modification date
    fn write_header(&mut self) -> StorageResult<()> {
        self.header.touch();
        (&self.file).seek(SeekFrom::Start(0))?;
        (&self.file).write_all(&self.header.to_bytes())?;
        (&self.file).flush()?;
        Ok(())
    }

    /// Flush pending writes to the OS and the device
    pub fn sync(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Flush and release the file handle
    pub fn close(self) -> StorageResult<()> {
        self.sync()?;
        tracing::debug!("Closed table {:?}", self.path);
        Ok(())
    }
}

/// `name.dbf` → `name.dbf.<suffix>`
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
