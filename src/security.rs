//! Security-context check.
//!
//! The coordinator treats authorization as an external collaborator:
//! every engine operation that mutates a table takes a
//! `&dyn SecurityContext` and asks it for permission before touching
//! the filesystem. The coordinator never inspects credentials itself.

use crate::error::{CoordinatorError, Result};

pub trait SecurityContext: Send + Sync {
    /// Returns `Ok(())` if the caller may perform a write-class
    /// operation (create, remove, rename, lock/unlock, migrate),
    /// `Err(SecurityViolation)` otherwise.
    fn check_write_permission(&self) -> Result<()>;
}

/// Default context used when the host has no authorization layer of
/// its own — every write is permitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl SecurityContext for AllowAll {
    fn check_write_permission(&self) -> Result<()> {
        Ok(())
    }
}

/// Denies every write — useful in tests that assert a `SecurityViolation`
/// is surfaced and that no filesystem state changed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl SecurityContext for DenyAll {
    fn check_write_permission(&self) -> Result<()> {
        Err(CoordinatorError::SecurityViolation(
            "write access denied by security context".to_string(),
        ))
    }
}
