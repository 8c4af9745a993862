use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::model::BridgeEvent;

/// Fan-out of bridge notifications to any number of observers.
///
/// Subscribers whose receiver was dropped are pruned on the next broadcast.
#[derive(Clone, Default)]
pub struct BridgeEventBus {
    subscribers: Arc<Mutex<Vec<Sender<BridgeEvent>>>>,
}

impl BridgeEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        let (tx, rx) = unbounded::<BridgeEvent>();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn broadcast(&self, event: BridgeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
