//! Table file header and field directory
//!
//! Layout (dBase III, all integers little-endian):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (32 bytes)                       │
//! │   version: u8                           │
//! │   last_updated: [u8; 3]  (YY, MM, DD)   │
//! │   record_count: u32                     │
//! │   header_length: u16                    │
//! │   record_length: u16                    │
//! │   reserved: [u8; 20]                    │
//! ├─────────────────────────────────────────┤
//! │ FIELD DESCRIPTORS (32 bytes each)       │
//! │   name: [u8; 11] (NUL padded)           │
//! │   type: u8                              │
//! │   data_address: u32 (unused)            │
//! │   length: u8                            │
//! │   decimals: u8                          │
//! │   reserved: [u8; 14]                    │
//! ├─────────────────────────────────────────┤
//! │ TERMINATOR 0x0D                         │
//! ├─────────────────────────────────────────┤
//! │ RECORDS (record_count × record_length)  │
//! │   delete flag: u8 (' ' or '*')          │
//! │   field bytes                           │
//! ├─────────────────────────────────────────┤
//! │ EOF MARKER 0x1A (optional)              │
//! └─────────────────────────────────────────┘
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{FieldDescriptor, FieldType};
use chrono::{Datelike, Local, NaiveDate};

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Field descriptor size in bytes
pub const FIELD_DESCRIPTOR_SIZE: usize = 32;

/// Byte closing the field directory
pub const HEADER_TERMINATOR: u8 = 0x0D;

/// Optional byte after the last record
pub const EOF_MARKER: u8 = 0x1A;

/// Maximum number of columns per table
pub const MAX_FIELDS: usize = 128;

/// dBase III without memo
const VERSION_DBASE3: u8 = 0x03;

/// Record delete flag values
pub const LIVE_FLAG: u8 = b' ';
pub const DELETED_FLAG: u8 = b'*';

/// Table file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    /// Format version byte
    pub version: u8,
    /// Last modification date as stored (years since 1900, month, day)
    pub last_updated: [u8; 3],
    /// Number of records, deleted ones included
    pub record_count: u32,
    /// Offset of the first record
    pub header_length: u16,
    /// Bytes per record including the delete flag
    pub record_length: u16,
    /// Reserved bytes, preserved as read
    pub reserved: [u8; 20],
}

impl TableHeader {
    /// Create a header for an empty table with the given columns
    pub fn for_fields(fields: &[FieldDescriptor]) -> StorageResult<Self> {
        if fields.len() > MAX_FIELDS {
            return Err(StorageError::InvalidSpec(format!(
                "{} fields exceeds the maximum of {}",
                fields.len(),
                MAX_FIELDS
            )));
        }

        let record_length = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
        if record_length > u16::MAX as usize {
            return Err(StorageError::InvalidSpec(format!(
                "record length {} too large",
                record_length
            )));
        }

        let mut header = Self {
            version: VERSION_DBASE3,
            last_updated: [0; 3],
            record_count: 0,
            header_length: Self::expected_header_length(fields.len()),
            record_length: record_length as u16,
            reserved: [0; 20],
        };
        header.touch();
        Ok(header)
    }

    /// `32 + 32 * field_count + 1`
    pub fn expected_header_length(field_count: usize) -> u16 {
        (HEADER_SIZE + FIELD_DESCRIPTOR_SIZE * field_count + 1) as u16
    }

    /// Number of field descriptors implied by the header length
    pub fn field_count(&self) -> StorageResult<usize> {
        let bytes = self.header_length as i64 - HEADER_SIZE as i64 - 1;
        if bytes < 0 || bytes % FIELD_DESCRIPTOR_SIZE as i64 != 0 {
            return Err(StorageError::Format(format!(
                "header length {} is not 33 + 32 * n",
                self.header_length
            )));
        }

        let count = (bytes / FIELD_DESCRIPTOR_SIZE as i64) as usize;
        if count > MAX_FIELDS {
            return Err(StorageError::Format(format!(
                "field count {} exceeds {}",
                count, MAX_FIELDS
            )));
        }
        Ok(count)
    }

    /// Byte offset of a record (1-based)
    pub fn record_offset(&self, recno: u32) -> u64 {
        self.header_length as u64 + (recno as u64 - 1) * self.record_length as u64
    }

    /// Byte offset just past the last record
    pub fn data_end(&self) -> u64 {
        self.header_length as u64 + self.record_count as u64 * self.record_length as u64
    }

    /// Stamp today's date as the last modification date
    pub fn touch(&mut self) {
        let today = Local::now().date_naive();
        self.last_updated = [
            (today.year() - 1900).clamp(0, 255) as u8,
            today.month() as u8,
            today.day() as u8,
        ];
    }

    /// Last modification date, if the stored bytes form a valid date
    pub fn last_updated_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            1900 + self.last_updated[0] as i32,
            self.last_updated[1] as u32,
            self.last_updated[2] as u32,
        )
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0] = self.version;
        buf[1..4].copy_from_slice(&self.last_updated);
        buf[4..8].copy_from_slice(&self.record_count.to_le_bytes());
        buf[8..10].copy_from_slice(&self.header_length.to_le_bytes());
        buf[10..12].copy_from_slice(&self.record_length.to_le_bytes());
        buf[12..32].copy_from_slice(&self.reserved);

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut reserved = [0u8; 20];
        reserved.copy_from_slice(&buf[12..32]);

        Self {
            version: buf[0],
            last_updated: [buf[1], buf[2], buf[3]],
            record_count: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            header_length: u16::from_le_bytes([buf[8], buf[9]]),
            record_length: u16::from_le_bytes([buf[10], buf[11]]),
            reserved,
        }
    }
}

/// Serialize one field descriptor
pub fn field_to_bytes(field: &FieldDescriptor) -> [u8; FIELD_DESCRIPTOR_SIZE] {
    let mut buf = [0u8; FIELD_DESCRIPTOR_SIZE];

    let name = field.name.as_bytes();
    let n = name.len().min(11);
    buf[..n].copy_from_slice(&name[..n]);
    buf[11] = field.field_type.code();
    // bytes 12-15: data address, unused
    buf[16] = field.length;
    buf[17] = field.decimals;

    buf
}

/// Parse one field descriptor
pub fn field_from_bytes(buf: &[u8]) -> StorageResult<FieldDescriptor> {
    if buf.len() < FIELD_DESCRIPTOR_SIZE {
        return Err(StorageError::Format("truncated field descriptor".into()));
    }

    let name_end = buf[..11].iter().position(|&b| b == 0).unwrap_or(11);
    let name = String::from_utf8_lossy(&buf[..name_end]).trim().to_string();

    let field_type = FieldType::from_code(buf[11]).ok_or_else(|| {
        StorageError::Format(format!(
            "unknown type code {:?} for field {}",
            buf[11] as char, name
        ))
    })?;

    Ok(FieldDescriptor {
        name,
        field_type,
        length: buf[16],
        decimals: buf[17],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let fields = vec![
            FieldDescriptor::character("NAME", 10).unwrap(),
            FieldDescriptor::numeric("AGE", 3, 0).unwrap(),
        ];
        let mut header = TableHeader::for_fields(&fields).unwrap();
        header.record_count = 42;

        let bytes = header.to_bytes();
        let restored = TableHeader::from_bytes(&bytes);

        assert_eq!(restored, header);
        assert_eq!(restored.header_length, 32 + 64 + 1);
        assert_eq!(restored.record_length, 14);
        assert_eq!(restored.field_count().unwrap(), 2);
        assert!(restored.last_updated_date().is_some());
    }

    #[test]
    fn test_record_offsets() {
        let fields = vec![FieldDescriptor::character("A", 4).unwrap()];
        let mut header = TableHeader::for_fields(&fields).unwrap();
        header.record_count = 3;

        assert_eq!(header.record_offset(1), 65);
        assert_eq!(header.record_offset(3), 65 + 10);
        assert_eq!(header.data_end(), 65 + 15);
    }

    #[test]
    fn test_bad_header_length() {
        let mut header = TableHeader::for_fields(&[]).unwrap();
        header.header_length = 40;
        assert!(matches!(header.field_count(), Err(StorageError::Format(_))));

        header.header_length = TableHeader::expected_header_length(200);
        assert!(header.field_count().is_err());
    }

    #[test]
    fn test_field_descriptor_roundtrip() {
        let field = FieldDescriptor::numeric("PRICE", 9, 2).unwrap();
        let bytes = field_to_bytes(&field);
        assert_eq!(bytes[11], b'N');
        assert_eq!(field_from_bytes(&bytes).unwrap(), field);

        let mut bad = bytes;
        bad[11] = b'?';
        assert!(field_from_bytes(&bad).is_err());
    }
}
