//! Delivery of host commands to the probe of the addressed tab.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::errors::BridgeError;
use crate::events::BridgeEventBus;
use crate::model::{BridgeEvent, Command, InboundMessage, TabId};

/// Table of live probes, keyed by tab.
///
/// A probe is live while its command channel is open: the entry is added
/// when the probe is spawned and removed when its tab goes away. A closed
/// channel found during dispatch means the probe was torn down, and the
/// stale entry is dropped.
#[derive(Clone, Default)]
pub struct CommandRouter {
    probes: Arc<Mutex<HashMap<TabId, UnboundedSender<Command>>>>,
    events: BridgeEventBus,
}

impl CommandRouter {
    pub fn new(events: BridgeEventBus) -> Self {
        Self {
            probes: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Registers the command channel of a tab's probe.
    ///
    /// Returns the channel of the probe previously registered for this tab,
    /// if any (the page navigated and a new document context took over).
    pub fn register(
        &self,
        tab_id: TabId,
        commands: UnboundedSender<Command>,
    ) -> Option<UnboundedSender<Command>> {
        debug!(tab_id = %tab_id, "Registering probe");
        self.probes.lock().insert(tab_id, commands)
    }

    /// Forgets the probe of a tab. Dropping its channel ends the probe loop.
    pub fn unregister(&self, tab_id: TabId) -> bool {
        self.probes.lock().remove(&tab_id).is_some()
    }

    pub fn is_live(&self, tab_id: TabId) -> bool {
        self.probes
            .lock()
            .get(&tab_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn live_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .probes
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        tabs.sort();
        tabs
    }

    /// Hands the command to the probe of `message.tab_id`.
    pub fn route(&self, message: &InboundMessage) -> Result<(), BridgeError> {
        let mut probes = self.probes.lock();
        let Some(tx) = probes.get(&message.tab_id) else {
            return Err(BridgeError::CommandTargetMissing(message.tab_id));
        };

        if tx.send(message.command).is_err() {
            probes.remove(&message.tab_id);
            return Err(BridgeError::CommandTargetMissing(message.tab_id));
        }
        Ok(())
    }

    /// Routes a command, logging and dropping it when the tab is gone.
    pub fn dispatch(&self, message: InboundMessage) {
        info!("← Handling command {} for tab {}", message.command, message.tab_id);

        if let Err(err) = self.route(&message) {
            warn!("Failed to send command to tab: {}", err);
            self.events.broadcast(BridgeEvent::CommandDropped {
                tab_id: message.tab_id,
                command: message.command,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn seek(tab: i64, position: f64) -> InboundMessage {
        InboundMessage {
            command: Command::Seek(Some(position)),
            tab_id: TabId(tab),
        }
    }

    #[test]
    fn test_dispatch_reaches_only_the_addressed_tab() {
        let router = CommandRouter::default();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        let (tx7, mut rx7) = mpsc::unbounded_channel();
        router.register(TabId(3), tx3);
        router.register(TabId(7), tx7);

        router.dispatch(seek(7, 42.0));

        assert_eq!(rx7.try_recv().unwrap(), Command::Seek(Some(42.0)));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_missing_target_is_dropped_and_reported() {
        let events = BridgeEventBus::new();
        let observer = events.subscribe();
        let router = CommandRouter::new(events);

        assert!(matches!(
            router.route(&seek(9, 1.0)),
            Err(BridgeError::CommandTargetMissing(TabId(9)))
        ));

        router.dispatch(seek(9, 1.0));
        assert_eq!(
            observer.try_recv().unwrap(),
            BridgeEvent::CommandDropped {
                tab_id: TabId(9),
                command: Command::Seek(Some(1.0)),
            }
        );
    }

    #[test]
    fn test_torn_down_probe_is_forgotten() {
        let router = CommandRouter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        router.register(TabId(5), tx);
        drop(rx);

        assert!(!router.is_live(TabId(5)));
        assert!(router.route(&seek(5, 0.0)).is_err());
        assert!(router.live_tabs().is_empty());
        assert!(!router.unregister(TabId(5)));
    }

    #[test]
    fn test_register_replaces_previous_probe() {
        let router = CommandRouter::default();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        assert!(router.register(TabId(1), old_tx).is_none());
        assert!(router.register(TabId(1), new_tx).is_some());

        router.dispatch(InboundMessage {
            command: Command::Play,
            tab_id: TabId(1),
        });
        assert_eq!(new_rx.try_recv().unwrap(), Command::Play);
        assert_eq!(router.live_tabs(), vec![TabId(1)]);
    }
}
