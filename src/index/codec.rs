//! Order-preserving key encoding
//!
//! A [`KeyLayout`] binds an [`IndexSpec`] to a table's field directory and
//! turns record values (or a typed seek key) into a [`ByteKey`] whose byte
//! order matches the natural order of the values:
//!
//! ```text
//! Character  upper-cased, space padded / truncated to the field width
//! Numeric    sign byte ('0' negative, '1' otherwise) + |value| * 10^decimals
//!            zero padded to the field width, digits nines-complemented when
//!            negative; blank values are all spaces and sort first
//! Date       YYYYMMDD, blank = 8 spaces
//! Logical    'F' < 'T', blank = space
//! Literal    bytes verbatim
//! ```

use crate::index::key::{format_g15, IndexKey, KeyAtom};
use crate::index::spec::IndexSpec;
use crate::schema::KeyPart;
use crate::storage::types::clip_to_width;
use crate::storage::{parse_date, FieldDescriptor, FieldType, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded key as stored in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteKey(pub Vec<u8>);

impl ByteKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ByteKey {
    fn from(s: &str) -> Self {
        ByteKey(s.as_bytes().to_vec())
    }
}

impl fmt::Display for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Encoded seek input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekKey {
    /// The input padded like a stored key; lower bound of an ascending seek
    pub key: ByteKey,
    /// Sorts after every stored key that starts with the typed prefix
    pub upper: ByteKey,
    /// Bytes of `key` the user actually typed (padding excluded)
    pub prefix_len: usize,
}

impl SeekKey {
    pub fn prefix(&self) -> &[u8] {
        &self.key.as_bytes()[..self.prefix_len]
    }

    /// Whether a stored key starts with the typed prefix
    pub fn matches(&self, key: &ByteKey) -> bool {
        key.as_bytes().starts_with(self.prefix())
    }
}

/// A key part resolved against the field directory
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field { index: usize, field: FieldDescriptor },
    Literal(Vec<u8>),
}

/// Key spec resolved against a table's columns
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLayout {
    segments: Vec<Segment>,
    case_insensitive: bool,
}

impl KeyLayout {
    /// Resolve field names; unknown or memo fields are rejected
    pub fn resolve(spec: &IndexSpec, fields: &[FieldDescriptor]) -> StorageResult<Self> {
        let mut segments = Vec::with_capacity(spec.parts.len());

        for part in &spec.parts {
            match part {
                KeyPart::Field(name) => {
                    let index = fields
                        .iter()
                        .position(|f| f.name_matches(name))
                        .ok_or_else(|| {
                            StorageError::InvalidSpec(format!(
                                "tag {}: unknown field {}",
                                spec.name, name
                            ))
                        })?;
                    let field = fields[index].clone();
                    if !field.field_type.is_indexable() {
                        return Err(StorageError::InvalidSpec(format!(
                            "tag {}: field {} of type {} cannot be indexed",
                            spec.name, field.name, field.field_type
                        )));
                    }
                    segments.push(Segment::Field { index, field });
                }
                KeyPart::Literal(text) => segments.push(Segment::Literal(text.as_bytes().to_vec())),
            }
        }

        if !segments.iter().any(|s| matches!(s, Segment::Field { .. })) {
            return Err(StorageError::InvalidSpec(format!(
                "tag {}: key names no fields",
                spec.name
            )));
        }

        Ok(Self {
            segments,
            case_insensitive: spec.case_insensitive,
        })
    }

    /// Number of field parts (seek tokens accepted)
    pub fn field_parts(&self) -> usize {
        self.fields().count()
    }

    fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field { field, .. } => Some(field),
            Segment::Literal(_) => None,
        })
    }

    /// Encode a record's normalized values (full column list)
    pub fn encode(&self, values: &[String]) -> ByteKey {
        let mut out = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Field { index, field } => {
                    let value = values.get(*index).map(String::as_str).unwrap_or("");
                    self.encode_text(field, value, &mut out);
                }
                Segment::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }
        ByteKey(out)
    }

    /// Build a seek key from user tokens, one per field part
    ///
    /// Missing tokens become empty text atoms.
    pub fn encode_from_tokens<S: AsRef<str>>(&self, tokens: &[S]) -> IndexKey {
        let parts = (0..self.field_parts())
            .map(|i| {
                tokens
                    .get(i)
                    .map(|t| IndexKey::atom_from_token(t.as_ref()))
                    .unwrap_or_else(|| KeyAtom::Text(String::new()))
            })
            .collect();
        IndexKey::new(parts)
    }

    /// Human-readable key of a record
    pub fn key_from_values(&self, values: &[String]) -> IndexKey {
        let parts = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field { index, field } => {
                    let value = values.get(*index).map(String::as_str).unwrap_or("");
                    Some(match field.field_type {
                        FieldType::Numeric => match value.trim().parse::<f64>() {
                            Ok(n) => KeyAtom::Number(n),
                            Err(_) => KeyAtom::Text(String::new()),
                        },
                        _ => KeyAtom::text(value),
                    })
                }
                Segment::Literal(_) => None,
            })
            .collect();
        IndexKey::new(parts)
    }

    /// Lower a seek key to the stored byte form
    ///
    /// Encoding stops after the last atom, so a shorter key acts as a prefix.
    pub fn encode_index_key(&self, key: &IndexKey) -> ByteKey {
        self.encode_seek_key(key).key
    }

    /// Lower a seek key to both seek bounds
    pub fn encode_seek_key(&self, key: &IndexKey) -> SeekKey {
        let mut out = Vec::new();
        let mut significant = 0;
        let mut atoms = key.parts.iter();

        for segment in &self.segments {
            match segment {
                Segment::Field { field, .. } => match atoms.next() {
                    Some(atom) => {
                        let start = out.len();
                        let used = self.encode_atom(field, atom, &mut out);
                        if used > 0 {
                            significant = start + used;
                        }
                    }
                    None => break,
                },
                Segment::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }

        // No stored key contains 0xFF, so this sorts after every key with the prefix
        let mut upper = out[..significant].to_vec();
        upper.extend(std::iter::repeat(0xFF).take(self.width() + 1 - significant));

        SeekKey {
            key: ByteKey(out),
            upper: ByteKey(upper),
            prefix_len: significant,
        }
    }

    /// Byte length of every stored key
    pub fn width(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Field { field, .. } if field.field_type == FieldType::Numeric => {
                    field.length as usize + 1
                }
                Segment::Field { field, .. } => field.length as usize,
                Segment::Literal(bytes) => bytes.len(),
            })
            .sum()
    }

    /// Encode one seek atom; returns how many of the written bytes were typed
    fn encode_atom(&self, field: &FieldDescriptor, atom: &KeyAtom, out: &mut Vec<u8>) -> usize {
        let text = match atom {
            KeyAtom::Text(s) => s.clone(),
            KeyAtom::Number(n) => format_g15(*n),
        };

        let start = out.len();
        match (field.field_type, atom) {
            (FieldType::Numeric, KeyAtom::Number(n)) => encode_numeric(field, Some(*n), out),
            (FieldType::Date, _) => return encode_date_token(&text, out),
            _ => self.encode_text(field, &text, out),
        }

        if atom.is_empty() {
            return 0;
        }
        match field.field_type {
            FieldType::Character | FieldType::Memo => {
                clip_to_width(text.trim_end(), field.length as usize).len()
            }
            _ => out.len() - start,
        }
    }

    fn encode_text(&self, field: &FieldDescriptor, value: &str, out: &mut Vec<u8>) {
        let width = field.length as usize;
        match field.field_type {
            FieldType::Character | FieldType::Memo => {
                let value = value.trim_end();
                let text = if self.case_insensitive {
                    value.to_ascii_uppercase()
                } else {
                    value.to_string()
                };
                push_padded(clip_to_width(&text, width).as_bytes(), width, out);
            }
            FieldType::Numeric => {
                let trimmed = value.trim();
                let number = if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok()
                };
                encode_numeric(field, number, out);
            }
            FieldType::Date => match parse_date(value.trim()) {
                Some(date) => out.extend_from_slice(date.format("%Y%m%d").to_string().as_bytes()),
                None => push_padded(b"", 8, out),
            },
            FieldType::Logical => {
                let byte = match value.trim().as_bytes().first().map(|b| b.to_ascii_uppercase()) {
                    Some(b'T') | Some(b'Y') => b'T',
                    Some(b'F') | Some(b'N') => b'F',
                    _ => b' ',
                };
                out.push(byte);
            }
        }
    }
}

/// A full date, or the leading digits of one (`1999`, `199912`) as a prefix
fn encode_date_token(token: &str, out: &mut Vec<u8>) -> usize {
    let token = token.trim();
    if let Some(date) = parse_date(token) {
        out.extend_from_slice(date.format("%Y%m%d").to_string().as_bytes());
        return 8;
    }
    if !token.is_empty() && token.len() < 8 && token.bytes().all(|b| b.is_ascii_digit()) {
        push_padded(token.as_bytes(), 8, out);
        return token.len();
    }
    push_padded(b"", 8, out);
    0
}

fn push_padded(bytes: &[u8], width: usize, out: &mut Vec<u8>) {
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.extend(std::iter::repeat(b' ').take(width - n));
}

/// Sign byte plus fixed-width scaled magnitude
fn encode_numeric(field: &FieldDescriptor, value: Option<f64>, out: &mut Vec<u8>) {
    let width = field.length as usize;

    let n = match value {
        Some(n) if n.is_finite() => n,
        _ => {
            out.extend(std::iter::repeat(b' ').take(width + 1));
            return;
        }
    };

    let scaled = (n.abs() * 10f64.powi(field.decimals as i32)).round();
    let negative = n < 0.0 && scaled > 0.0;

    let digits = format!("{:0>width$.0}", scaled, width = width);
    // Wider than the column: saturate at the largest representable magnitude
    let digits = if digits.len() > width {
        "9".repeat(width)
    } else {
        digits
    };

    if negative {
        out.push(b'0');
        out.extend(digits.bytes().map(|d| b'9' - (d - b'0')));
    } else {
        out.push(b'1');
        out.extend_from_slice(digits.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::character("NAME", 6).unwrap(),
            FieldDescriptor::numeric("AMT", 6, 2).unwrap(),
            FieldDescriptor::date("DOB").unwrap(),
            FieldDescriptor::logical("OK").unwrap(),
        ]
    }

    fn layout(expr: &str) -> KeyLayout {
        let spec = IndexSpec::parse("T", expr).unwrap();
        KeyLayout::resolve(&spec, &fields()).unwrap()
    }

    fn values(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn key_for(layout: &KeyLayout, field: usize, value: &str) -> ByteKey {
        let mut row = vec![String::new(); 4];
        row[field] = value.to_string();
        layout.encode(&row)
    }

    #[test]
    fn test_character_keys_ignore_case() {
        let l = layout("NAME");
        assert_eq!(key_for(&l, 0, "bob").as_bytes(), b"BOB   ");
        assert!(key_for(&l, 0, "alice") < key_for(&l, 0, "Bob"));
        assert_eq!(key_for(&l, 0, "toolongname").len(), 6);
    }

    #[test]
    fn test_numeric_keys_follow_value_order() {
        let l = layout("AMT");
        let ordered = ["", "-100", "-2.5", "-0.01", "0", "0.01", "2.5", "10", "999.99"];
        let keys: Vec<ByteKey> = ordered.iter().map(|v| key_for(&l, 1, v)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(key_for(&l, 1, "2.5").as_bytes(), b"1000250");
        assert_eq!(key_for(&l, 1, "-0").as_bytes(), b"1000000");
    }

    #[test]
    fn test_date_and_logical_keys() {
        let l = layout("DOB+OK");
        let a = l.encode(&values(&["", "", "19991231", "T"]));
        let b = l.encode(&values(&["", "", "20000101", "F"]));
        let blank = l.encode(&values(&["", "", "", ""]));
        assert!(blank < a && a < b);
        assert_eq!(a.as_bytes(), b"19991231T");
    }

    #[test]
    fn test_literals_are_verbatim() {
        let l = layout("NAME+'-'+OK");
        assert_eq!(l.encode(&values(&["ab", "", "", "T"])).as_bytes(), b"AB    -T");
        assert_eq!(l.field_parts(), 2);
    }

    #[test]
    fn test_seek_key_matches_stored_key() {
        let l = layout("NAME+AMT");
        let stored = l.encode(&values(&["bob", "3.50", "", ""]));
        let seek = l.encode_index_key(&l.encode_from_tokens(&["Bob", "3.5"]));
        assert_eq!(seek, stored);

        // One token seeks by prefix
        let prefix = l.encode_index_key(&l.encode_from_tokens(&["BOB"]));
        assert!(prefix <= stored);

        let partial = l.encode_index_key(&IndexKey::new(vec![KeyAtom::text("bo")]));
        assert!(partial < stored);
    }

    #[test]
    fn test_seek_key_prefix_excludes_padding() {
        let l = layout("NAME+AMT");
        let seek = l.encode_seek_key(&l.encode_from_tokens(&["b"]));
        assert_eq!(seek.key.as_bytes(), b"B            ");
        assert_eq!(seek.prefix(), b"B");
        assert_eq!(seek.upper.len(), l.width() + 1);

        let bob = l.encode(&values(&["bob", "3.50", "", ""]));
        let carol = l.encode(&values(&["carol", "", "", ""]));
        assert!(seek.matches(&bob));
        assert!(!seek.matches(&carol));
        assert!(seek.key <= bob && bob < seek.upper && seek.upper < carol);

        let full = l.encode_seek_key(&l.encode_from_tokens(&["bob", "3.5"]));
        assert_eq!(full.prefix_len, l.width());
        assert!(full.matches(&bob));
    }

    #[test]
    fn test_partial_date_seeks_by_prefix() {
        let l = layout("DOB");
        let dec_1999 = l.encode(&values(&["", "", "19991231", ""]));
        let jan_2000 = l.encode(&values(&["", "", "20000101", ""]));

        let year = l.encode_seek_key(&l.encode_from_tokens(&["1999"]));
        assert_eq!(year.key.as_bytes(), b"1999    ");
        assert_eq!(year.prefix(), b"1999");
        assert!(year.key < dec_1999 && dec_1999 < year.upper && year.upper < jan_2000);

        let day = l.encode_seek_key(&l.encode_from_tokens(&["2000-01-01"]));
        assert_eq!(day.key, jan_2000);

        let junk = l.encode_seek_key(&l.encode_from_tokens(&["soon"]));
        assert_eq!(junk.key.as_bytes(), b"        ");
        assert_eq!(junk.prefix_len, 0);
    }

    #[test]
    fn test_character_keys_truncate_on_char_boundary() {
        let l = layout("NAME");
        // 'É' is two bytes and would straddle the 6-byte width
        let key = key_for(&l, 0, "ABCDEÉ");
        assert_eq!(key.as_bytes(), b"ABCDE ");
        assert!(std::str::from_utf8(key.as_bytes()).is_ok());
    }

    #[test]
    fn test_key_from_values() {
        let l = layout("NAME+AMT");
        let key = l.key_from_values(&values(&["bob", "3.50", "", ""]));
        assert_eq!(
            key,
            IndexKey::new(vec![KeyAtom::text("BOB"), KeyAtom::Number(3.5)])
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_and_memo() {
        let spec = IndexSpec::parse("T", "MISSING").unwrap();
        assert!(KeyLayout::resolve(&spec, &fields()).is_err());

        let memo = vec![FieldDescriptor::new("NOTES", FieldType::Memo, 10, 0).unwrap()];
        let spec = IndexSpec::parse("T", "NOTES").unwrap();
        assert!(matches!(
            KeyLayout::resolve(&spec, &memo),
            Err(StorageError::InvalidSpec(_))
        ));
    }
}
