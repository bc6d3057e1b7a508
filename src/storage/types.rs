//! Core data types for the table store
//!
//! This module defines the field directory types and the marshaling rules
//! between a record's raw bytes and its in-memory field values:
//! - `FieldType`: the xBase type code of a column
//! - `FieldDescriptor`: name, type, width and decimals of one column
//! - `FieldValue`: typed view of a decoded value
//!
//! Field values are held in memory as normalized strings (the form returned
//! by [`FieldDescriptor::decode`]); encoding a normalized string and decoding
//! it again yields the same string.

use crate::storage::error::{StorageError, StorageResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Longest field name that fits the 11-byte (NUL terminated) name slot
pub const MAX_FIELD_NAME: usize = 10;

/// Widest Character/Numeric column
pub const MAX_FIELD_WIDTH: u8 = 254;

/// Column type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Character,
    Numeric,
    Date,
    Logical,
    Memo,
}

impl FieldType {
    /// Parse the single-byte type code stored in a field descriptor
    pub fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_uppercase() {
            b'C' => Some(FieldType::Character),
            b'N' | b'F' => Some(FieldType::Numeric),
            b'D' => Some(FieldType::Date),
            b'L' => Some(FieldType::Logical),
            b'M' => Some(FieldType::Memo),
            _ => None,
        }
    }

    /// Type code written to disk
    pub fn code(&self) -> u8 {
        match self {
            FieldType::Character => b'C',
            FieldType::Numeric => b'N',
            FieldType::Date => b'D',
            FieldType::Logical => b'L',
            FieldType::Memo => b'M',
        }
    }

    /// Whether values of this type can participate in an index key
    pub fn is_indexable(&self) -> bool {
        !matches!(self, FieldType::Memo)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code() as char)
    }
}

/// Definition of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Upper-cased column name
    pub name: String,
    /// Column type
    pub field_type: FieldType,
    /// Width in bytes
    pub length: u8,
    /// Decimal places (Numeric only)
    pub decimals: u8,
}

impl FieldDescriptor {
    /// Create a validated descriptor
    pub fn new(
        name: impl Into<String>,
        field_type: FieldType,
        length: u8,
        decimals: u8,
    ) -> StorageResult<Self> {
        let field = Self {
            name: name.into().trim().to_ascii_uppercase(),
            field_type,
            length,
            decimals,
        };
        field.validate()?;
        Ok(field)
    }

    /// Character column of the given width
    pub fn character(name: impl Into<String>, length: u8) -> StorageResult<Self> {
        Self::new(name, FieldType::Character, length, 0)
    }

    /// Numeric column with `decimals` digits after the point
    pub fn numeric(name: impl Into<String>, length: u8, decimals: u8) -> StorageResult<Self> {
        Self::new(name, FieldType::Numeric, length, decimals)
    }

    /// Date column (always 8 bytes)
    pub fn date(name: impl Into<String>) -> StorageResult<Self> {
        Self::new(name, FieldType::Date, 8, 0)
    }

    /// Logical column (always 1 byte)
    pub fn logical(name: impl Into<String>) -> StorageResult<Self> {
        Self::new(name, FieldType::Logical, 1, 0)
    }

    /// Check name and width rules for the column type
    pub fn validate(&self) -> StorageResult<()> {
        let invalid = |reason: String| Err(StorageError::InvalidSpec(reason));

        if self.name.is_empty() || self.name.len() > MAX_FIELD_NAME {
            return invalid(format!(
                "field name '{}' must be 1-{} characters",
                self.name, MAX_FIELD_NAME
            ));
        }
        if !self.name.bytes().all(|b| b.is_ascii_graphic()) {
            return invalid(format!("field name '{}' is not printable", self.name));
        }

        match self.field_type {
            FieldType::Character | FieldType::Numeric => {
                if self.length == 0 || self.length > MAX_FIELD_WIDTH {
                    return invalid(format!(
                        "length {} out of range for {}",
                        self.length, self.name
                    ));
                }
                if self.field_type == FieldType::Numeric
                    && self.decimals > 0
                    && self.decimals >= self.length
                {
                    return invalid(format!(
                        "invalid decimals {} for {}",
                        self.decimals, self.name
                    ));
                }
            }
            FieldType::Date if self.length != 8 => {
                return invalid(format!("date field {} must be 8 wide", self.name));
            }
            FieldType::Logical if self.length != 1 => {
                return invalid(format!("logical field {} must be 1 wide", self.name));
            }
            _ => {}
        }

        Ok(())
    }

    /// Case-insensitive name comparison
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    /// Decode raw record bytes into the normalized string form
    pub fn decode(&self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        let blank = |c: char| c == ' ' || c == '\0';

        match self.field_type {
            FieldType::Character | FieldType::Memo => text.trim_end_matches(blank).to_string(),
            FieldType::Numeric | FieldType::Date => text.trim_matches(blank).to_string(),
            FieldType::Logical => match raw.first().map(|b| b.to_ascii_uppercase()) {
                Some(b'T') | Some(b'Y') => "T".to_string(),
                Some(b'F') | Some(b'N') => "F".to_string(),
                _ => String::new(),
            },
        }
    }

    /// Encode a value into exactly `length` bytes
    pub fn encode_into(&self, value: &str, out: &mut [u8]) -> StorageResult<()> {
        debug_assert_eq!(out.len(), self.length as usize);
        out.fill(b' ');

        match self.field_type {
            FieldType::Character | FieldType::Memo => {
                let bytes = clip_to_width(value, out.len()).as_bytes();
                out[..bytes.len()].copy_from_slice(bytes);
            }
            FieldType::Numeric => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Ok(());
                }
                let number: f64 = trimmed.parse().map_err(|_| self.invalid("not a number"))?;
                if !number.is_finite() {
                    return Err(self.invalid("not a finite number"));
                }
                let text = format!(
                    "{:>width$.prec$}",
                    number,
                    width = out.len(),
                    prec = self.decimals as usize
                );
                if text.len() > out.len() {
                    return Err(self.invalid(&format!("{} does not fit width {}", text.trim(), self.length)));
                }
                out.copy_from_slice(text.as_bytes());
            }
            FieldType::Date => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Ok(());
                }
                let date = parse_date(trimmed).ok_or_else(|| self.invalid("expected YYYYMMDD"))?;
                out.copy_from_slice(date.format("%Y%m%d").to_string().as_bytes());
            }
            FieldType::Logical => {
                out[0] = match value.trim().to_ascii_uppercase().as_str() {
                    "" => b' ',
                    "T" | "Y" | "TRUE" | "YES" | ".T." | ".Y." => b'T',
                    "F" | "N" | "FALSE" | "NO" | ".F." | ".N." => b'F',
                    _ => return Err(self.invalid("expected T or F")),
                };
            }
        }

        Ok(())
    }

    /// Validate and normalize a value as it would read back from disk
    pub fn normalize(&self, value: &str) -> StorageResult<String> {
        let mut buf = vec![b' '; self.length as usize];
        self.encode_into(value, &mut buf)?;
        Ok(self.decode(&buf))
    }

    /// Typed view of a normalized value
    pub fn typed(&self, value: &str) -> FieldValue {
        match self.field_type {
            FieldType::Character => FieldValue::Char(value.to_string()),
            FieldType::Memo => FieldValue::Memo(value.to_string()),
            FieldType::Numeric => FieldValue::Number(value.trim().parse().ok()),
            FieldType::Date => FieldValue::Date(parse_date(value.trim())),
            FieldType::Logical => FieldValue::Logical(matches!(
                value.trim().as_bytes().first().map(|b| b.to_ascii_uppercase()),
                Some(b'T') | Some(b'Y')
            )),
        }
    }

    fn invalid(&self, reason: &str) -> StorageError {
        StorageError::InvalidValue {
            field: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.field_type {
            FieldType::Numeric => write!(
                f,
                "{} {} {} {}",
                self.name, self.field_type, self.length, self.decimals
            ),
            FieldType::Character | FieldType::Memo => {
                write!(f, "{} {} {}", self.name, self.field_type, self.length)
            }
            _ => write!(f, "{} {}", self.name, self.field_type),
        }
    }
}

/// Longest prefix of `value` that fits in `width` bytes without splitting a character
pub(crate) fn clip_to_width(value: &str, width: usize) -> &str {
    if value.len() <= width {
        return value;
    }
    let mut end = width;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Typed value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Char(String),
    /// `None` for a blank numeric
    Number(Option<f64>),
    /// `None` for a blank date
    Date(Option<NaiveDate>),
    Logical(bool),
    Memo(String),
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD`
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(field: &FieldDescriptor, value: &str) -> String {
        let mut buf = vec![0u8; field.length as usize];
        field.encode_into(value, &mut buf).unwrap();
        field.decode(&buf)
    }

    #[test]
    fn test_character_roundtrip() {
        let field = FieldDescriptor::character("name", 10).unwrap();
        assert_eq!(field.name, "NAME");
        assert_eq!(roundtrip(&field, "ALICE"), "ALICE");
        assert_eq!(roundtrip(&field, "ABCDEFGHIJKLMNOP"), "ABCDEFGHIJ");
        assert_eq!(roundtrip(&field, ""), "");
    }

    #[test]
    fn test_character_truncation_keeps_whole_chars() {
        let field = FieldDescriptor::character("CITY", 6).unwrap();
        // "ZÜRICH" is 7 bytes; the cut must not split 'Ü'
        assert_eq!(roundtrip(&field, "ZÜRICH"), "ZÜRIC");
        assert_eq!(roundtrip(&field, "ÅÅÅÅ"), "ÅÅÅ");
        assert_eq!(roundtrip(&field, "AAAAAÅ"), "AAAAA");
        assert_eq!(clip_to_width("ÅB", 1), "");
    }

    #[test]
    fn test_numeric_encoding() {
        let field = FieldDescriptor::numeric("AMT", 7, 2).unwrap();
        let mut buf = vec![0u8; 7];
        field.encode_into("3.5", &mut buf).unwrap();
        assert_eq!(&buf, b"   3.50");
        assert_eq!(field.decode(&buf), "3.50");
        assert_eq!(roundtrip(&field, "-12.25"), "-12.25");
        assert_eq!(roundtrip(&field, " "), "");

        assert!(field.encode_into("abc", &mut buf).is_err());
        assert!(field.encode_into("123456789", &mut buf).is_err());
    }

    #[test]
    fn test_date_encoding() {
        let field = FieldDescriptor::date("DOB").unwrap();
        assert_eq!(roundtrip(&field, "20240229"), "20240229");
        assert_eq!(roundtrip(&field, "2024-03-01"), "20240301");
        assert_eq!(roundtrip(&field, ""), "");

        let mut buf = vec![0u8; 8];
        assert!(field.encode_into("20230230", &mut buf).is_err());
    }

    #[test]
    fn test_logical_encoding() {
        let field = FieldDescriptor::logical("OK").unwrap();
        assert_eq!(roundtrip(&field, "y"), "T");
        assert_eq!(roundtrip(&field, ".F."), "F");
        assert_eq!(roundtrip(&field, ""), "");
        assert_eq!(field.typed("T"), FieldValue::Logical(true));
        assert_eq!(field.typed(""), FieldValue::Logical(false));
    }

    #[test]
    fn test_normalized_values_are_fixed_points() {
        let fields = [
            FieldDescriptor::character("C", 6).unwrap(),
            FieldDescriptor::numeric("N", 8, 3).unwrap(),
            FieldDescriptor::date("D").unwrap(),
            FieldDescriptor::logical("L").unwrap(),
        ];
        let inputs = [
            ["hello world", "bob", "", " x"],
            ["1", "-0.5", "1234.567", ""],
            ["19991231", "2000-01-01", "", "20200101"],
            ["T", "n", "", "yes"],
        ];

        for (field, values) in fields.iter().zip(inputs.iter()) {
            for value in values {
                let once = field.normalize(value).unwrap();
                assert_eq!(field.normalize(&once).unwrap(), once, "field {}", field.name);
            }
        }
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(FieldDescriptor::character("", 5).is_err());
        assert!(FieldDescriptor::character("WAYTOOLONGNAME", 5).is_err());
        assert!(FieldDescriptor::character("NAME", 0).is_err());
        assert!(FieldDescriptor::numeric("N", 3, 3).is_err());
        assert!(FieldDescriptor::new("D", FieldType::Date, 6, 0).is_err());
        assert!(FieldDescriptor::numeric("N", 5, 2).is_ok());
    }

    #[test]
    fn test_type_codes() {
        for ty in [
            FieldType::Character,
            FieldType::Numeric,
            FieldType::Date,
            FieldType::Logical,
            FieldType::Memo,
        ] {
            assert_eq!(FieldType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(FieldType::from_code(b'c'), Some(FieldType::Character));
        assert_eq!(FieldType::from_code(b'X'), None);
        assert!(!FieldType::Memo.is_indexable());
    }
}
