//! Generic lease-based pool shared by the writer pool and the reader
//! pool.
//!
//! Each `(pool, name)` pair has at most one [`Entry`], guarded by its
//! own `Mutex` so that the check "is this entry idle or absent?" and
//! the transition to "busy" or "locked" happen as one indivisible
//! step, as required by the concurrency model. A pool-wide `RwLock`
//! around the registry `HashMap` only ever gets taken to insert or
//! remove an entry, not to read/mutate one that already exists.
//!
//! The pool listener is dispatched while the entry's guard is still
//! held (re-acquiring it briefly where the transition itself had to
//! happen outside the lock, e.g. after blocking construction), so a
//! listener always observes the state it is being told about rather
//! than a state some other thread has since moved it past.

pub mod listener;

use crate::error::{CoordinatorError, Result};
use listener::{NullListener, PoolEvent, PoolKind, PoolListener};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Constructs a fresh native resource for a table name. Supplied by
/// the engine; the writer pool's factory additionally wires in the
/// telemetry ring (see `engine.rs`).
pub trait PoolFactory<T>: Send + Sync {
    fn construct(&self, name: &str) -> Result<T>;
}

enum EntryState<T> {
    Absent,
    Idle { resource: T, last_used: Instant },
    Busy,
    Locked,
}

struct Entry<T> {
    state: EntryState<T>,
}

/// Point-in-time counters, for the engine's busy-count accessors.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub busy_count: usize,
    pub entry_count: usize,
}

pub struct Pool<T> {
    kind: PoolKind,
    entries: RwLock<HashMap<String, Arc<Mutex<Entry<T>>>>>,
    factory: Arc<dyn PoolFactory<T>>,
    listener: RwLock<Arc<dyn PoolListener>>,
    busy_count: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(kind: PoolKind, factory: Arc<dyn PoolFactory<T>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            factory,
            listener: RwLock::new(Arc::new(NullListener)),
            busy_count: AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn set_listener(&self, listener: Arc<dyn PoolListener>) {
        *self.listener.write() = listener;
    }

    fn notify(&self, name: &str, event: PoolEvent) {
        self.listener
            .read()
            .on_event(self.kind, name, event, std::thread::current().id());
    }

    fn entry_arc(&self, name: &str) -> Arc<Mutex<Entry<T>>> {
        if let Some(existing) = self.entries.read().get(name) {
            return existing.clone();
        }
        self.entries
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Entry {
                    state: EntryState::Absent,
                }))
            })
            .clone()
    }

    /// Returns an exclusive lease on the resource for `name`.
    ///
    /// Constructs a fresh resource if no entry exists; reuses an idle
    /// entry; fails with `EntryUnavailable`/`EntryLocked` without
    /// mutating anything when the entry is busy or locked.
    pub fn get(self: &Arc<Self>, name: &str) -> Result<Lease<T>> {
        let entry_arc = self.entry_arc(name);
        let mut guard = entry_arc.lock();
        let previous = std::mem::replace(&mut guard.state, EntryState::Busy);

        match previous {
            EntryState::Locked => {
                guard.state = EntryState::Locked;
                drop(guard);
                Err(CoordinatorError::EntryLocked(name.to_string()))
            }
            EntryState::Busy => {
                guard.state = EntryState::Busy;
                drop(guard);
                Err(CoordinatorError::EntryUnavailable(name.to_string()))
            }
            EntryState::Idle { resource, .. } => {
                self.notify(name, PoolEvent::Acquired);
                drop(guard);
                self.busy_count.fetch_add(1, Ordering::SeqCst);
                Ok(Lease::new(name.to_string(), resource, Arc::clone(self)))
            }
            EntryState::Absent => {
                // Reserved as Busy above; construct outside the lock
                // so blocking I/O never happens under it. The entry
                // is re-locked just long enough to dispatch the event
                // under the guard, as the spec requires; nothing else
                // can observe or mutate a Busy entry in the meantime.
                drop(guard);
                match self.factory.construct(name) {
                    Ok(resource) => {
                        self.busy_count.fetch_add(1, Ordering::SeqCst);
                        {
                            let _guard = entry_arc.lock();
                            self.notify(name, PoolEvent::Acquired);
                        }
                        Ok(Lease::new(name.to_string(), resource, Arc::clone(self)))
                    }
                    Err(e) => {
                        // No half-initialized entry is retained.
                        self.entries.write().remove(name);
                        {
                            let _guard = entry_arc.lock();
                            self.notify(name, PoolEvent::ConstructionFailed);
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Administratively locks `name`. Succeeds only if the entry is
    /// idle or absent; a locked entry holds no resource and rejects
    /// `get`.
    pub fn lock(&self, name: &str) -> bool {
        let entry_arc = self.entry_arc(name);
        let mut guard = entry_arc.lock();
        match guard.state {
            EntryState::Idle { .. } | EntryState::Absent => {
                guard.state = EntryState::Locked;
                self.notify(name, PoolEvent::Locked);
                drop(guard);
                true
            }
            _ => false,
        }
    }

    /// Whether the named entry currently exists and is locked.
    pub fn is_locked(&self, name: &str) -> bool {
        match self.entries.read().get(name) {
            Some(entry_arc) => matches!(entry_arc.lock().state, EntryState::Locked),
            None => false,
        }
    }

    /// Releases a lock. If `donate` is `Some`, the entry becomes idle
    /// holding that resource; otherwise it becomes absent, so the
    /// next `get` constructs lazily.
    pub fn unlock(&self, name: &str, donate: Option<T>) {
        let entry_arc = self.entry_arc(name);
        let mut guard = entry_arc.lock();
        let became_absent;
        match donate {
            Some(resource) => {
                guard.state = EntryState::Idle {
                    resource,
                    last_used: Instant::now(),
                };
                became_absent = false;
            }
            None => {
                guard.state = EntryState::Absent;
                became_absent = true;
            }
        }
        self.notify(name, PoolEvent::Unlocked);
        drop(guard);
        if became_absent {
            self.entries.write().remove(name);
        }
    }

    /// Closes and discards every idle entry whose last-used timestamp
    /// precedes `now - ttl`. Never touches a busy entry.
    pub fn release_inactive(&self, now: Instant, ttl: Duration) -> bool {
        self.release_matching(|last_used| now.saturating_duration_since(*last_used) >= ttl)
    }

    /// Closes every idle entry unconditionally. Busy entries are not
    /// affected.
    pub fn release_all(&self) -> bool {
        self.release_matching(|_| true)
    }

    fn release_matching(&self, predicate: impl Fn(&Instant) -> bool) -> bool {
        let mut evicted = Vec::new();
        {
            let registry = self.entries.read();
            for (name, entry_arc) in registry.iter() {
                let mut guard = entry_arc.lock();
                let should_evict = matches!(
                    &guard.state,
                    EntryState::Idle { last_used, .. } if predicate(last_used)
                );
                if should_evict {
                    guard.state = EntryState::Absent;
                    self.notify(name, PoolEvent::Evicted);
                    evicted.push(name.clone());
                }
                drop(guard);
            }
        }
        if evicted.is_empty() {
            return false;
        }
        let mut registry = self.entries.write();
        for name in &evicted {
            registry.remove(name);
        }
        true
    }

    pub fn busy_count(&self) -> usize {
        self.busy_count.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            busy_count: self.busy_count(),
            entry_count: self.entries.read().len(),
        }
    }

    /// Releases every idle entry and marks the pool closed: any
    /// resource returned after this point (a late `Lease` drop from a
    /// caller that outlived `close`) is dropped instead of
    /// re-pooled.
    pub fn close(&self) {
        self.release_all();
        self.closed.store(true, Ordering::SeqCst);
        self.notify("*", PoolEvent::Closed);
    }

    fn return_resource(&self, name: &str, resource: T) {
        if self.closed.load(Ordering::SeqCst) {
            drop(resource);
            return;
        }
        let entry_arc = self.entry_arc(name);
        let mut guard = entry_arc.lock();
        guard.state = EntryState::Idle {
            resource,
            last_used: Instant::now(),
        };
        self.notify(name, PoolEvent::Returned);
        drop(guard);
        self.busy_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An exclusive lease on a pooled resource. Dropping it (or calling
/// `close()` explicitly) returns the resource to its pool's idle
/// state and stamps the last-used timestamp. The pool is held as a
/// capability (`Arc<Pool<T>>`), not a back-pointer from the resource
/// itself, avoiding the handle/pool reference cycle.
pub struct Lease<T> {
    name: String,
    resource: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Send + 'static> Lease<T> {
    fn new(name: String, resource: T, pool: Arc<Pool<T>>) -> Self {
        Self {
            name,
            resource: Some(resource),
            pool,
        }
    }

    pub fn get(&self) -> &T {
        self.resource.as_ref().expect("resource taken before drop")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.resource.as_mut().expect("resource taken before drop")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource to the pool now instead of waiting for
    /// drop.
    pub fn close(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.return_resource(&self.name, resource);
        }
    }

    /// Consumes the lease without returning the resource to the pool
    /// — used when the caller is about to donate the resource
    /// straight into an `unlock` call instead.
    pub fn take(mut self) -> T {
        self.resource.take().expect("resource taken before drop")
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.return_resource(&self.name, resource);
        }
    }
}
