//! File-system facade.
//!
//! Everything the coordinator does to the directory tree and to
//! table metadata files goes through this trait, never through
//! `std::fs` directly, so the upgrade procedure and the engine's
//! `remove`/`rename`/`status` operations can be exercised against an
//! in-memory fake in tests. The table-id allocator's memory mapping
//! (`id_allocator.rs`) is OS-level and is deliberately *not* routed
//! through this trait — see that module for why.

use crate::error::{CoordinatorError, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait FileSystem: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Creates `path` (and any missing parents) the way `create_dir_all`
    /// does, then applies `mode` as unix permission bits to the leaf
    /// directory. Used for table directories, where `mk_dir_mode` from
    /// the coordinator config applies; plain `create_dir_all` is used
    /// for the data root itself, which the host is expected to have
    /// already provisioned with the permissions it wants.
    fn create_dir_with_mode(&self, path: &Path, mode: u32) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn path_exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Names of entries directly under `path`, excluding `.`/`..`.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Read the whole file, or an empty vec if it does not exist.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, creating the file (and growing it,
    /// zero-filled, to `offset + data.len()`) if necessary.
    fn write_file_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()>;
}

/// `std::fs`-backed implementation — the production facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn create_dir_with_mode(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).map_err(|e| {
            CoordinatorError::cairo(
                e.raw_os_error().unwrap_or(-1),
                format!("could not remove directory: {e}"),
                path,
            )
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).map_err(|e| {
            CoordinatorError::cairo(
                e.raw_os_error().unwrap_or(-1),
                format!("could not rename: {e}"),
                from,
            )
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let needed = offset + data.len() as u64;
        if file.metadata()?.len() < needed {
            file.set_len(needed)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }
}

/// In-memory fake used only by tests — no on-disk state.
#[derive(Default)]
pub struct MemFileSystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<HashSet<PathBuf>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for MemFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs.lock().unwrap();
        let mut cur = PathBuf::new();
        for component in path.components() {
            cur.push(component);
            dirs.insert(cur.clone());
        }
        Ok(())
    }

    fn create_dir_with_mode(&self, path: &Path, _mode: u32) -> Result<()> {
        self.create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs.lock().unwrap();
        if !dirs.contains(path) {
            return Err(CoordinatorError::cairo(2, "no such directory", path));
        }
        dirs.retain(|d| !d.starts_with(path));
        let mut files = self.files.lock().unwrap();
        files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut dirs = self.dirs.lock().unwrap();
        if !dirs.contains(from) {
            return Err(CoordinatorError::cairo(2, "no such directory", from));
        }
        let moved: Vec<PathBuf> = dirs.iter().filter(|d| d.starts_with(from)).cloned().collect();
        for d in moved {
            dirs.remove(&d);
            let rest = d.strip_prefix(from).unwrap();
            dirs.insert(to.join(rest));
        }
        drop(dirs);

        let mut files = self.files.lock().unwrap();
        let moved_files: Vec<PathBuf> = files.keys().filter(|f| f.starts_with(from)).cloned().collect();
        for f in moved_files {
            let data = files.remove(&f).unwrap();
            let rest = f.strip_prefix(from).unwrap();
            files.insert(to.join(rest), data);
        }
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.dirs.lock().unwrap().contains(path) || self.files.lock().unwrap().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let dirs = self.dirs.lock().unwrap();
        let files = self.files.lock().unwrap();
        let mut out = HashSet::new();
        for d in dirs.iter() {
            if d.parent() == Some(path) {
                out.insert(d.clone());
            }
        }
        for f in files.keys() {
            if f.parent() == Some(path) {
                out.insert(f.clone());
            }
        }
        Ok(out.into_iter().collect())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(self.files.lock().unwrap().get(path).cloned().unwrap_or_default())
    }

    fn write_file_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let buf = files.entry(path.to_path_buf()).or_default();
        let needed = offset as usize + data.len();
        if buf.len() < needed {
            buf.resize(needed, 0);
        }
        buf[offset as usize..needed].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_fs_round_trips_metadata_bytes() {
        let fs = MemFileSystem::new();
        let path = PathBuf::from("/root/t/_meta");
        fs.write_file_at(&path, 4, &[1, 2, 3, 4]).unwrap();
        let data = fs.read_file(&path).unwrap();
        assert_eq!(data, vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn mem_fs_rename_moves_subtree() {
        let fs = MemFileSystem::new();
        fs.create_dir_all(Path::new("/root/a")).unwrap();
        fs.write_file_at(Path::new("/root/a/_meta"), 0, &[9]).unwrap();
        fs.rename(Path::new("/root/a"), Path::new("/root/b")).unwrap();
        assert!(!fs.path_exists(Path::new("/root/a")));
        assert!(fs.path_exists(Path::new("/root/b/_meta")));
    }
}
