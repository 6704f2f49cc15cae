//! Ordered fan-out of protocol events to subscribers

use cdp_types::CdpEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Receiving end of an event subscription
///
/// Events arrive in the order the endpoint emitted them. The channel is
/// unbounded so a slow consumer never causes events to be dropped.
pub type EventStream = mpsc::UnboundedReceiver<CdpEvent>;

struct Subscriber {
    method: String,
    tx: mpsc::UnboundedSender<CdpEvent>,
}

/// Distributes incoming events to every subscriber registered for their name
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events named `method` (e.g. `HeapProfiler.addHeapSnapshotChunk`)
    pub fn subscribe(&self, method: impl Into<String>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            method: method.into(),
            tx,
        });
        rx
    }

    /// Deliver `event` to matching subscribers, returning how many received it
    ///
    /// Subscribers whose stream was dropped are pruned on the way.
    pub fn publish(&self, event: CdpEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.method == event.method && subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            trace!("No subscriber for event {}", event.method);
        }
        delivered
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.tx.is_closed());
        subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
