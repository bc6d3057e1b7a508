//! Index sidecar file
//!
//! All tags of a table are stored in one file beside it (`people.dbf` →
//! `people.inx`):
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ "XINX" | version u16 | tag count u32       │
//! ├────────────────────────────────────────────┤
//! │ per tag:                                   │
//! │   spec_len u32 | bincode(IndexSpec)        │
//! │   tree_len u32 | tree dump ("XBPT" ...)    │
//! ├────────────────────────────────────────────┤
//! │ crc32 u32 of everything above              │
//! └────────────────────────────────────────────┘
//! ```
//!
//! A missing file is not an error. Anything unreadable is `CorruptIndex`.

use crate::index::btree::{BTree, ByteReader};
use crate::index::spec::IndexSpec;
use crate::index::tag::IndexTag;
use crate::storage::{StorageError, StorageResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default sidecar extension
pub const INDEX_EXTENSION: &str = "inx";

const SIDECAR_MAGIC: &[u8; 4] = b"XINX";
const SIDECAR_VERSION: u16 = 1;

/// Sidecar path for a table path
pub fn sidecar_path(table: &Path, ext: &str) -> PathBuf {
    table.with_extension(ext)
}

/// Serialize tags into the sidecar byte format
pub fn encode_sidecar<'a>(tags: impl IntoIterator<Item = &'a IndexTag>) -> StorageResult<Vec<u8>> {
    let tags: Vec<&IndexTag> = tags.into_iter().collect();

    let mut buf = Vec::new();
    buf.extend_from_slice(SIDECAR_MAGIC);
    buf.extend_from_slice(&SIDECAR_VERSION.to_le_bytes());
    buf.extend_from_slice(&(tags.len() as u32).to_le_bytes());

    for tag in tags {
        let spec = bincode::serialize(tag.spec())?;
        buf.extend_from_slice(&(spec.len() as u32).to_le_bytes());
        buf.extend_from_slice(&spec);

        let tree = tag.tree().to_bytes();
        buf.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        buf.extend_from_slice(&tree);
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Parse sidecar bytes into (spec, tree) pairs
pub fn decode_sidecar(bytes: &[u8]) -> StorageResult<Vec<(IndexSpec, BTree)>> {
    if bytes.len() < SIDECAR_MAGIC.len() + 2 + 4 + 4 {
        return Err(StorageError::CorruptIndex(format!(
            "sidecar too short ({} bytes)",
            bytes.len()
        )));
    }

    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);

    let mut r = ByteReader::new(body);
    if r.take(4)? != SIDECAR_MAGIC {
        return Err(StorageError::CorruptIndex("bad sidecar magic".into()));
    }
    let version = r.u16()?;
    if version != SIDECAR_VERSION {
        return Err(StorageError::CorruptIndex(format!(
            "unsupported sidecar version {}",
            version
        )));
    }

    let computed = crc32fast::hash(body);
    if computed != stored {
        return Err(StorageError::CorruptIndex(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    let tag_count = r.u32()? as usize;
    let mut tags = Vec::with_capacity(tag_count.min(64));
    for _ in 0..tag_count {
        let spec_len = r.u32()? as usize;
        let spec: IndexSpec = bincode::deserialize(r.take(spec_len)?)
            .map_err(|e| StorageError::CorruptIndex(format!("bad tag spec: {}", e)))?;

        let tree_len = r.u32()? as usize;
        let tree = BTree::from_bytes(r.take(tree_len)?)?;
        tags.push((spec, tree));
    }

    if r.remaining() != 0 {
        return Err(StorageError::CorruptIndex(format!(
            "{} trailing bytes in sidecar",
            r.remaining()
        )));
    }
    Ok(tags)
}

/// Write all tags to `path` (through a temporary file)
pub fn write_sidecar<'a>(
    path: &Path,
    tags: impl IntoIterator<Item = &'a IndexTag>,
) -> StorageResult<()> {
    let bytes = encode_sidecar(tags)?;

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;

    tracing::debug!("Wrote index sidecar {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

/// Read a sidecar; `None` when the file does not exist
pub fn read_sidecar(path: &Path) -> StorageResult<Option<Vec<(IndexSpec, BTree)>>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    decode_sidecar(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::codec::ByteKey;
    use crate::storage::FieldDescriptor;
    use tempfile::tempdir;

    fn sample_tags() -> Vec<IndexTag> {
        let fields = vec![
            FieldDescriptor::character("NAME", 8).unwrap(),
            FieldDescriptor::numeric("AGE", 3, 0).unwrap(),
        ];
        let mut by_name = IndexTag::new(IndexSpec::parse("NAME", "NAME").unwrap(), &fields, 4).unwrap();
        for (i, name) in ["bob", "alice", "zed", "mia", "al"].iter().enumerate() {
            by_name.insert(ByteKey::from(*name), i as u32 + 1);
        }
        let by_age = IndexTag::new(
            IndexSpec::parse("AGE", "AGE").unwrap().descending(),
            &fields,
            4,
        )
        .unwrap();
        vec![by_name, by_age]
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = tempdir().unwrap();
        let path = sidecar_path(&dir.path().join("people.dbf"), INDEX_EXTENSION);
        assert!(path.ends_with("people.inx"));
        assert!(read_sidecar(&path).unwrap().is_none());

        let tags = sample_tags();
        write_sidecar(&path, &tags).unwrap();

        let loaded = read_sidecar(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(&loaded[0].0, tags[0].spec());
        assert_eq!(loaded[0].1.len(), 5);
        assert!(!loaded[1].0.ascending);
        assert!(loaded[1].1.is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let bytes = encode_sidecar(&sample_tags()).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'Q';
        assert!(matches!(decode_sidecar(&bad_magic), Err(StorageError::CorruptIndex(_))));

        let mut flipped = bytes.clone();
        let mid = flipped.len() / 2;
        flipped[mid] ^= 0xFF;
        assert!(matches!(decode_sidecar(&flipped), Err(StorageError::CorruptIndex(_))));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert!(decode_sidecar(&bad_version).is_err());

        assert!(decode_sidecar(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode_sidecar(b"XINX").is_err());
    }
}
