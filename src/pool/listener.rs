//! Pool listener — observer pattern for pool state transitions.
//!
//! Modeled as a trait object, not a subclassing hierarchy: the pool
//! holds `Arc<dyn PoolListener>` and invokes it synchronously, under
//! the entry's own lock, so the state the listener is told about
//! cannot be raced away by another thread before the listener runs.
//! This is an explicit invariant (callers that poll pool state from a
//! listener callback see exactly the state the event names), which is
//! why implementations must be strictly non-blocking and must never
//! call back into the engine — doing either while the entry lock is
//! held would deadlock or stall every other lease on that table.

use std::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Writer,
    Reader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolEvent {
    Acquired,
    Returned,
    Evicted,
    Locked,
    Unlocked,
    Closed,
    ConstructionFailed,
}

pub trait PoolListener: Send + Sync {
    fn on_event(&self, pool: PoolKind, table: &str, event: PoolEvent, thread: ThreadId);
}

/// A listener that discards every event — the default when no
/// listener has been installed.
pub struct NullListener;

impl PoolListener for NullListener {
    fn on_event(&self, _pool: PoolKind, _table: &str, _event: PoolEvent, _thread: ThreadId) {}
}
