//! Global table-identifier allocator.
//!
//! A single 64-bit counter lives at offset 0 of a one-page file,
//! mapped read-write and shared so every thread (and, modulo the
//! flush caveat below, every process restart) observes the same
//! memory. Allocation is a lock-free compare-and-swap loop — the
//! allocator never blocks.
//!
//! No explicit fsync/msync happens on every allocation: the OS is
//! responsible for eventually flushing the mapping. Accepted risk per
//! the design: a crash may roll back the last few not-yet-flushed
//! ids, which is fine because ids are only ever compared for equality,
//! never reused as indexes into anything that survives without the
//! counter being flushed. Callers who want stronger durability can
//! call `flush()` on their own cadence (e.g. from the maintenance
//! job) without this type's default behavior changing.

use crate::error::{CoordinatorError, Result};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const INDEX_FILE_NAME: &str = "_tab_index.d";

/// One OS page — more than enough for a single 8-byte counter, but
/// mmap works in whole pages regardless.
const MAPPING_LEN: usize = 4096;

pub struct TableIdGenerator {
    path: PathBuf,
    // Kept alive for the lifetime of the mapping; never read after
    // construction, the mapping is what's actually used.
    _file: std::fs::File,
    ptr: *mut libc::c_void,
}

// The mapping is `MAP_SHARED` over a real fd and accessed exclusively
// through `AtomicU64`; sharing `*mut c_void` across threads is sound
// under that discipline.
unsafe impl Send for TableIdGenerator {}
unsafe impl Sync for TableIdGenerator {}

impl TableIdGenerator {
    /// Opens (creating if necessary) `<root>/_tab_index.d`, growing it
    /// to one page and mapping it read-write/shared.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(INDEX_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                CoordinatorError::cairo(
                    e.raw_os_error().unwrap_or(-1),
                    "cannot allocate table id index file",
                    &path,
                )
            })?;

        if file.metadata()?.len() < MAPPING_LEN as u64 {
            file.set_len(MAPPING_LEN as u64).map_err(|e| {
                CoordinatorError::cairo(
                    e.raw_os_error().unwrap_or(-1),
                    "cannot grow table id index file to one page",
                    &path,
                )
            })?;
        }

        let fd = file.as_raw_fd();
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                MAPPING_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(CoordinatorError::from_errno(
                "cannot mmap table id index file",
                &path,
            ));
        }

        Ok(Self {
            path,
            _file: file,
            ptr,
        })
    }

    fn counter(&self) -> &AtomicU64 {
        // Safety: `ptr` points at a MAPPING_LEN-byte shared mapping
        // that outlives this reference; offset 0 is 8-byte aligned
        // because mmap returns page-aligned addresses.
        unsafe { &*(self.ptr as *const AtomicU64) }
    }

    /// Returns a value strictly greater than every previously
    /// returned value for this data directory, including across
    /// process restarts (subject to the flush caveat above).
    pub fn next_id(&self) -> u64 {
        let counter = self.counter();
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            let candidate = current + 1;
            match counter.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    tracing::trace!(table_id = candidate, "allocated table id");
                    return candidate;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// The last value handed out, or 0 if none.
    pub fn current(&self) -> u64 {
        self.counter().load(Ordering::SeqCst)
    }

    /// Explicit `msync` of the counter page. Not called by `next_id`;
    /// exists for callers who want stronger durability than the
    /// default accepted-risk behavior.
    pub fn flush(&self) -> Result<()> {
        let ret = unsafe { libc::msync(self.ptr, MAPPING_LEN, libc::MS_SYNC) };
        if ret != 0 {
            return Err(CoordinatorError::from_errno(
                "msync failed on table id index file",
                &self.path,
            ));
        }
        Ok(())
    }

    /// Non-atomic store of 0 to the counter word. Not safe under
    /// concurrent access — gated behind `test-util`/`cfg(test)` so it
    /// cannot be reached from a normal release build of a dependent
    /// crate.
    #[cfg(any(test, feature = "test-util"))]
    pub unsafe fn reset_for_tests(&self) {
        self.counter().store(0, Ordering::SeqCst);
    }
}

impl Drop for TableIdGenerator {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, MAPPING_LEN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_directory_allocates_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let gen = TableIdGenerator::open(dir.path()).unwrap();
        assert_eq!(gen.next_id(), 1);
        assert_eq!(gen.next_id(), 2);
        assert_eq!(gen.next_id(), 3);
    }

    #[test]
    fn round_trips_across_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        {
            let gen = TableIdGenerator::open(dir.path()).unwrap();
            for _ in 0..5 {
                gen.next_id();
            }
        }
        let gen = TableIdGenerator::open(dir.path()).unwrap();
        assert_eq!(gen.next_id(), 6);
    }

    #[test]
    fn concurrent_allocation_has_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let gen = Arc::new(TableIdGenerator::open(dir.path()).unwrap());
        let threads = 8;
        let per_thread = 2_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let gen = Arc::clone(&gen);
                thread::spawn(move || {
                    let mut ids = Vec::with_capacity(per_thread);
                    for _ in 0..per_thread {
                        ids.push(gen.next_id());
                    }
                    ids
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn reset_for_tests_is_unsafe_and_non_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let gen = TableIdGenerator::open(dir.path()).unwrap();
        gen.next_id();
        gen.next_id();
        unsafe {
            gen.reset_for_tests();
        }
        assert_eq!(gen.next_id(), 1);
    }
}
