//! Per-table metadata file.
//!
//! The engine only ever touches two 4-byte words of `<table>/_meta`:
//! the format version and, immediately after it, the assigned table
//! id. Everything else in that file belongs to the column-storage
//! layer and is opaque here.

use crate::error::Result;
use crate::vfs::FileSystem;
use std::path::{Path, PathBuf};

pub const META_FILE_NAME: &str = "_meta";

/// Byte offset of the (version, id) word pair inside `_meta`.
pub const META_OFFSET_VERSION: u64 = 0;

/// On-disk format version below which a table has no assigned id and
/// needs the boot-time upgrade in `upgrade.rs`.
pub const VERSION_THAT_ADDED_TABLE_ID: u32 = 420;

/// On-disk format version below which a table's symbol columns lack
/// the recorded "has-null" flag (see `TableEngine::migrate_null_flag`).
pub const NULL_FLAG_VERSION_THRESHOLD: u32 = 416;

/// Current on-disk format version written by a successful upgrade.
pub const CURRENT_VERSION: u32 = 427;

pub fn meta_path(root: &Path, table: &str) -> PathBuf {
    root.join(table).join(META_FILE_NAME)
}

/// The two words read/written by this engine, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionId {
    pub version: u32,
    pub id: u32,
}

/// Reads the version/id pair. A missing or short file reads as
/// `{version: 0, id: 0}`, which is always below every version
/// threshold and therefore eligible for migration.
pub fn read_version_id(fs: &dyn FileSystem, meta_path: &Path) -> Result<VersionId> {
    let bytes = fs.read_file(meta_path)?;
    let start = META_OFFSET_VERSION as usize;
    let end = start + 8;
    if bytes.len() < end {
        return Ok(VersionId { version: 0, id: 0 });
    }
    let version = u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap());
    let id = u32::from_le_bytes(bytes[start + 4..end].try_into().unwrap());
    Ok(VersionId { version, id })
}

/// Writes the version/id pair back in place.
pub fn write_version_id(fs: &dyn FileSystem, meta_path: &Path, value: VersionId) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&value.version.to_le_bytes());
    buf[4..8].copy_from_slice(&value.id.to_le_bytes());
    fs.write_file_at(meta_path, META_OFFSET_VERSION, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemFileSystem;

    #[test]
    fn missing_file_reads_as_zero() {
        let fs = MemFileSystem::new();
        let got = read_version_id(&fs, Path::new("/root/t/_meta")).unwrap();
        assert_eq!(got, VersionId { version: 0, id: 0 });
    }

    #[test]
    fn write_then_read_round_trips() {
        let fs = MemFileSystem::new();
        let path = PathBuf::from("/root/t/_meta");
        write_version_id(&fs, &path, VersionId { version: 427, id: 7 }).unwrap();
        let got = read_version_id(&fs, &path).unwrap();
        assert_eq!(got, VersionId { version: 427, id: 7 });
    }
}
