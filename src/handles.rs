//! Opaque resources leased out of the writer and reader pools.
//!
//! Neither handle owns a back-reference to its pool or to the engine;
//! the lease capability from `pool::Lease` is what returns them on
//! drop. A handle only carries what the engine needs to validate and
//! log an operation against it.

use crate::metadata::VersionId;

/// Leased out of the writer pool. At most one exists per table name
/// at any time.
#[derive(Debug)]
pub struct WriterHandle {
    pub table: String,
    pub table_id: u32,
    pub metadata_version: u32,
}

impl WriterHandle {
    pub fn new(table: impl Into<String>, version_id: VersionId) -> Self {
        Self {
            table: table.into(),
            table_id: version_id.id,
            metadata_version: version_id.version,
        }
    }
}

/// Leased out of the reader pool. Many may exist per table name
/// simultaneously; each pool entry still enforces single-leaseholder
/// semantics for that particular entry, but the engine is free to
/// open more than one reader pool entry per table if it needs
/// parallel readers (see `engine.rs`'s reader-pool keying).
#[derive(Debug)]
pub struct ReaderHandle {
    pub table: String,
    pub table_id: u32,
    pub metadata_version: u32,
}

impl ReaderHandle {
    pub fn new(table: impl Into<String>, version_id: VersionId) -> Self {
        Self {
            table: table.into(),
            table_id: version_id.id,
            metadata_version: version_id.version,
        }
    }

    /// A reader is stale once the on-disk metadata version has moved
    /// past what it was opened against — callers must reopen rather
    /// than keep reading through it.
    pub fn is_stale(&self, current_version: u32) -> bool {
        current_version != self.metadata_version
    }
}

pub type WriterLease = crate::pool::Lease<WriterHandle>;
pub type ReaderLease = crate::pool::Lease<ReaderHandle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_handle_detects_staleness() {
        let handle = ReaderHandle::new("trades", VersionId { version: 427, id: 3 });
        assert!(!handle.is_stale(427));
        assert!(handle.is_stale(428));
    }
}
