//! Telemetry ring.
//!
//! A bounded multi-producer/single-consumer queue the engine publishes
//! pool/upgrade events onto. Treated as a pre-built primitive per the
//! design: this module only wires `crossbeam`'s channel up with the
//! publish/subscribe sequence counters the engine's accessors expose.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    TableCreated { table: String, table_id: u32 },
    TableRemoved { table: String },
    TableRenamed { from: String, to: String },
    UpgradeCompleted { tables_migrated: usize },
    NullFlagMigrated { table: String },
}

pub struct TelemetryRing {
    sender: Sender<TelemetryEvent>,
    receiver: Receiver<TelemetryEvent>,
    publish_seq: AtomicU64,
    subscribe_seq: AtomicU64,
}

impl TelemetryRing {
    pub fn new(queue_capacity: usize) -> Self {
        let (sender, receiver) = bounded(queue_capacity.max(1));
        Self {
            sender,
            receiver,
            publish_seq: AtomicU64::new(0),
            subscribe_seq: AtomicU64::new(0),
        }
    }

    /// Publishes an event. A full queue drops the event rather than
    /// blocking the publisher — telemetry must never add backpressure
    /// to a write path.
    pub fn publish(&self, event: TelemetryEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.publish_seq.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(?dropped, "telemetry ring full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Drains whatever is currently queued.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            self.subscribe_seq.fetch_add(1, Ordering::SeqCst);
            out.push(event);
        }
        out
    }

    pub fn publish_sequence(&self) -> u64 {
        self.publish_seq.load(Ordering::SeqCst)
    }

    pub fn subscribe_sequence(&self) -> u64 {
        self.subscribe_seq.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_drain_advances_both_sequences() {
        let ring = TelemetryRing::new(8);
        ring.publish(TelemetryEvent::TableRemoved { table: "t1".into() });
        assert_eq!(ring.publish_sequence(), 1);
        assert_eq!(ring.queue_len(), 1);

        let drained = ring.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(ring.subscribe_sequence(), 1);
        assert_eq!(ring.queue_len(), 0);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let ring = TelemetryRing::new(1);
        ring.publish(TelemetryEvent::TableRemoved { table: "t1".into() });
        ring.publish(TelemetryEvent::TableRemoved { table: "t2".into() });
        assert_eq!(ring.publish_sequence(), 1);
        assert_eq!(ring.queue_len(), 1);
    }
}
