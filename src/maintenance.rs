//! Cooperative maintenance job.
//!
//! Time-gated so a host scheduler can call `tick` as often as it
//! likes without the job doing real work more often than configured.
//! `check_interval` is configured in milliseconds (matching
//! `CoordinatorConfig`) but stored here in microseconds, matching the
//! clock `tick` is driven with.

use crate::engine::TableEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MaintenanceJob {
    last_run_micros: AtomicU64,
    check_interval_micros: u64,
}

impl MaintenanceJob {
    pub fn new(check_interval_ms: u64) -> Self {
        Self {
            last_run_micros: AtomicU64::new(0),
            check_interval_micros: check_interval_ms * 1_000,
        }
    }

    /// If enough time has passed since the last run, releases
    /// inactive pool entries on `engine` and returns `true`.
    /// Otherwise does nothing and returns `false`, so the host
    /// scheduler can choose to back off.
    pub fn tick(&self, now_micros: u64, engine: &TableEngine) -> bool {
        let last = self.last_run_micros.load(Ordering::SeqCst);
        if now_micros < last.saturating_add(self.check_interval_micros) {
            return false;
        }
        // Whichever thread observes the gate open first runs the
        // sweep; a racing thread that loses simply treats this tick
        // as a no-op.
        if self
            .last_run_micros
            .compare_exchange(last, now_micros, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        engine.release_inactive();
        true
    }

    /// Spawns a tokio task that calls `tick` on a fixed wall-clock
    /// cadence until the engine (and this job with it) is dropped.
    /// A convenience for hosts that already run a tokio runtime;
    /// nothing about `tick` itself depends on tokio.
    pub fn spawn(self: Arc<Self>, engine: Arc<TableEngine>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let now_micros = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_micros() as u64)
                    .unwrap_or(0);
                self.tick(now_micros, &engine);
            }
        })
    }
}
