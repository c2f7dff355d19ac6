//! Observability channel for process lifecycle events: broadcasting
//! lifecycle events over a `tokio::sync::broadcast` channel to any number of
//! subscribers (admin HTTP layer, metrics exporters, tests).

use std::sync::Arc;

use tokio::sync::broadcast;

/// Lifecycle events the supervisor publishes for external subscribers (the
/// eventual HTTP admin layer, metrics exporters, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProcessEvent {
    /// A composition event was committed to the durable log.
    CompositionCommitted {
        /// Hash of the newly appended record.
        record_hash_base16: String,
    },
    /// A provisional reduction snapshot was stored.
    ReductionStored {
        /// Hash of the composition record the snapshot summarizes.
        composition_hash_base16: String,
    },
    /// A restore from the durable log completed.
    RestoreCompleted {
        /// Number of records replayed in this restore.
        replayed_records: usize,
    },
}

/// Publish/subscribe abstraction over [`ProcessEvent`]s.
pub trait EventBus: Send + Sync {
    /// Publish an event to all current subscribers. Best-effort: slow or
    /// absent subscribers never block or fail the publisher.
    fn publish(&self, event: ProcessEvent);

    /// Subscribe to the live event stream.
    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent>;
}

/// Simple in-memory, broadcast-only event bus.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<ProcessEvent>>,
}

impl InMemoryBus {
    /// Create a new bus with the given ring-buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: ProcessEvent) {
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(ProcessEvent::RestoreCompleted { replayed_records: 3 });
        assert_eq!(rx.recv().await.unwrap(), ProcessEvent::RestoreCompleted { replayed_records: 3 });
    }
}
