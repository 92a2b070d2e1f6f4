//! Boot-time metadata upgrade: assigns table ids to tables created
//! before the id allocator existed, and records how far the upgrade
//! has progressed in a marker file so it never redoes finished work.

use crate::error::Result;
use crate::id_allocator::TableIdGenerator;
use crate::metadata::{self, VersionId, CURRENT_VERSION, META_FILE_NAME, VERSION_THAT_ADDED_TABLE_ID};
use crate::vfs::FileSystem;
use std::path::Path;

pub const UPGRADE_MARKER_FILE_NAME: &str = "_upgrade.d";

/// Byte offset of the marker's version word — the only field it has.
const MARKER_OFFSET_VERSION: u64 = 0;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOutcome {
    pub already_current: bool,
    pub tables_scanned: usize,
    pub tables_migrated: usize,
}

/// Runs the procedure described in the upgrade marker's layout: read
/// the marker, short-circuit if already current, else scan the data
/// root for legacy tables and assign each one an id.
pub fn run_upgrade(
    fs: &dyn FileSystem,
    root: &Path,
    id_gen: &TableIdGenerator,
) -> Result<UpgradeOutcome> {
    let marker_path = root.join(UPGRADE_MARKER_FILE_NAME);
    let marker = metadata::read_version_id(fs, &marker_path)?;

    if marker.version >= VERSION_THAT_ADDED_TABLE_ID {
        tracing::debug!(version = marker.version, "upgrade marker already current");
        return Ok(UpgradeOutcome {
            already_current: true,
            ..Default::default()
        });
    }

    let mut outcome = UpgradeOutcome::default();
    for entry in fs.read_dir(root)? {
        if !fs.is_dir(&entry) {
            continue;
        }
        let meta_path = entry.join(META_FILE_NAME);
        if !fs.path_exists(&meta_path) {
            continue;
        }
        outcome.tables_scanned += 1;
        if assign_id(fs, &meta_path, id_gen)? {
            outcome.tables_migrated += 1;
            tracing::info!(table = %entry.display(), "assigned table id during upgrade");
        }
    }

    metadata::write_version_id(
        fs,
        &marker_path,
        VersionId {
            version: CURRENT_VERSION,
            id: 0,
        },
    )?;

    tracing::info!(
        tables_scanned = outcome.tables_scanned,
        tables_migrated = outcome.tables_migrated,
        version = CURRENT_VERSION,
        "upgrade procedure complete"
    );

    Ok(outcome)
}

/// Assigns a fresh id to the table at `meta_path` if its stored
/// version predates `VERSION_THAT_ADDED_TABLE_ID`. Returns whether an
/// assignment happened.
fn assign_id(fs: &dyn FileSystem, meta_path: &Path, id_gen: &TableIdGenerator) -> Result<bool> {
    let current = metadata::read_version_id(fs, meta_path)?;
    if current.version >= VERSION_THAT_ADDED_TABLE_ID {
        return Ok(false);
    }
    let id = id_gen.next_id() as u32;
    metadata::write_version_id(
        fs,
        meta_path,
        VersionId {
            version: CURRENT_VERSION,
            id,
        },
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemFileSystem;
    use std::path::PathBuf;

    fn legacy_table(fs: &MemFileSystem, root: &Path, name: &str) {
        fs.create_dir_all(&root.join(name)).unwrap();
        metadata::write_version_id(
            fs,
            &root.join(name).join(META_FILE_NAME),
            VersionId { version: 100, id: 0 },
        )
        .unwrap();
    }

    #[test]
    fn fresh_directory_needs_no_migration() {
        let fs = MemFileSystem::new();
        let root = PathBuf::from("/data");
        fs.create_dir_all(&root).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let id_gen = TableIdGenerator::open(dir.path()).unwrap();

        let outcome = run_upgrade(&fs, &root, &id_gen).unwrap();
        assert!(!outcome.already_current);
        assert_eq!(outcome.tables_scanned, 0);
        assert_eq!(outcome.tables_migrated, 0);

        let marker = metadata::read_version_id(&fs, &root.join(UPGRADE_MARKER_FILE_NAME)).unwrap();
        assert_eq!(marker.version, CURRENT_VERSION);
    }

    #[test]
    fn legacy_directory_assigns_ids_to_every_pre_existing_table() {
        let fs = MemFileSystem::new();
        let root = PathBuf::from("/data");
        fs.create_dir_all(&root).unwrap();
        legacy_table(&fs, &root, "trades");
        legacy_table(&fs, &root, "quotes");
        let dir = tempfile::tempdir().unwrap();
        let id_gen = TableIdGenerator::open(dir.path()).unwrap();

        let outcome = run_upgrade(&fs, &root, &id_gen).unwrap();
        assert_eq!(outcome.tables_scanned, 2);
        assert_eq!(outcome.tables_migrated, 2);

        let trades = metadata::read_version_id(&fs, &root.join("trades").join(META_FILE_NAME)).unwrap();
        let quotes = metadata::read_version_id(&fs, &root.join("quotes").join(META_FILE_NAME)).unwrap();
        assert_eq!(trades.version, CURRENT_VERSION);
        assert_eq!(quotes.version, CURRENT_VERSION);
        assert_ne!(trades.id, quotes.id);
        assert!(trades.id != 0 && quotes.id != 0);
    }

    #[test]
    fn rerunning_after_success_is_a_no_op() {
        let fs = MemFileSystem::new();
        let root = PathBuf::from("/data");
        fs.create_dir_all(&root).unwrap();
        legacy_table(&fs, &root, "trades");
        let dir = tempfile::tempdir().unwrap();
        let id_gen = TableIdGenerator::open(dir.path()).unwrap();

        run_upgrade(&fs, &root, &id_gen).unwrap();
        let before = metadata::read_version_id(&fs, &root.join("trades").join(META_FILE_NAME)).unwrap();

        let second = run_upgrade(&fs, &root, &id_gen).unwrap();
        assert!(second.already_current);
        let after = metadata::read_version_id(&fs, &root.join("trades").join(META_FILE_NAME)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn crash_mid_iteration_resumes_only_unmigrated_tables() {
        // Simulates a crash between assigning "trades" and writing the
        // marker: the marker is still below threshold, but "trades"
        // already has a real id and must not be reassigned.
        let fs = MemFileSystem::new();
        let root = PathBuf::from("/data");
        fs.create_dir_all(&root).unwrap();
        legacy_table(&fs, &root, "trades");
        legacy_table(&fs, &root, "quotes");
        let dir = tempfile::tempdir().unwrap();
        let id_gen = TableIdGenerator::open(dir.path()).unwrap();

        assign_id(&fs, &root.join("trades").join(META_FILE_NAME), &id_gen).unwrap();
        let trades_after_partial_run =
            metadata::read_version_id(&fs, &root.join("trades").join(META_FILE_NAME)).unwrap();

        let outcome = run_upgrade(&fs, &root, &id_gen).unwrap();
        assert_eq!(outcome.tables_migrated, 1, "only quotes should be migrated");

        let trades_final = metadata::read_version_id(&fs, &root.join("trades").join(META_FILE_NAME)).unwrap();
        assert_eq!(trades_final, trades_after_partial_run);
    }
}
