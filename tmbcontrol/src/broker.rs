//! Per-tab state table and message hub.
//!
//! The broker is the only owner of the table. Every mutation arrives as a
//! [`BrokerMessage`] on one queue and is applied by [`Broker::run`] in
//! order, so records never see interleaved updates.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::events::BridgeEventBus;
use crate::model::{
    BridgeEvent, InboundMessage, MediaState, MediaStateUpdate, MessageSender, OutboundMessage,
    TabClosed, TabId, TabMessage, TabRecord, sanitize_seconds,
};
use crate::router::CommandRouter;

const UNKNOWN_TITLE: &str = "Unknown";

/// Where the broker sends normalized messages.
pub trait OutboundSink: Send + 'static {
    /// Best effort: implementations drop what they cannot deliver.
    fn send(&self, message: OutboundMessage);
}

/// Work items processed by the broker, in arrival order.
#[derive(Debug)]
pub enum BrokerMessage {
    FromTab {
        sender: MessageSender,
        message: TabMessage,
    },
    TabClosed(TabId),
    Inbound(InboundMessage),
    ListTabs(oneshot::Sender<Vec<TabRecord>>),
}

/// Cloneable entry point to the broker queue.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

impl BrokerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn post(&self, message: BrokerMessage) {
        if self.tx.send(message).is_err() {
            debug!("Broker is gone, message discarded");
        }
    }

    /// Message from a tab context (or any other extension context).
    pub fn send_from_tab(&self, sender: MessageSender, message: TabMessage) {
        self.post(BrokerMessage::FromTab { sender, message });
    }

    pub fn tab_closed(&self, tab_id: TabId) {
        self.post(BrokerMessage::TabClosed(tab_id));
    }

    pub fn inbound(&self, message: InboundMessage) {
        self.post(BrokerMessage::Inbound(message));
    }

    /// Copy of the current table, ordered by tab id.
    pub async fn tabs(&self) -> Vec<TabRecord> {
        let (tx, rx) = oneshot::channel();
        self.post(BrokerMessage::ListTabs(tx));
        rx.await.unwrap_or_default()
    }
}

pub struct Broker<S: OutboundSink> {
    records: HashMap<TabId, TabRecord>,
    transport: S,
    router: CommandRouter,
    events: BridgeEventBus,
}

impl<S: OutboundSink> Broker<S> {
    pub fn new(transport: S, router: CommandRouter, events: BridgeEventBus) -> Self {
        Self {
            records: HashMap::new(),
            transport,
            router,
            events,
        }
    }

    pub fn record(&self, tab_id: TabId) -> Option<&TabRecord> {
        self.records.get(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn handle_message(&mut self, message: BrokerMessage) {
        match message {
            BrokerMessage::FromTab { sender, message } => match message {
                TabMessage::MediaStateUpdate(update) => self.on_state_update(&sender, update),
            },
            BrokerMessage::TabClosed(tab_id) => self.on_tab_closed(tab_id),
            BrokerMessage::Inbound(inbound) => self.on_inbound(inbound),
            BrokerMessage::ListTabs(reply) => {
                let mut records: Vec<TabRecord> = self.records.values().cloned().collect();
                records.sort_by_key(|r| r.tab_id);
                let _ = reply.send(records);
            }
        }
    }

    /// Upserts the record of the sending tab and forwards its normalized state.
    ///
    /// Messages that do not come from a tab are ignored.
    pub fn on_state_update(&mut self, sender: &MessageSender, update: MediaStateUpdate) {
        let Some(tab) = &sender.tab else {
            trace!("Ignoring media state from a non-tab sender");
            return;
        };

        let state = normalize(tab.id, &update, &tab.title);
        let status = if state.playing { "▶️ Playing" } else { "⏸️ Paused" };
        info!("📺 Media state from tab {}: {} - {}", tab.id, status, state.title);

        self.records.insert(
            tab.id,
            TabRecord {
                tab_id: tab.id,
                snapshot: update,
                source_url: tab.url.clone(),
                tab_title: tab.title.clone(),
                updated_at: Utc::now(),
            },
        );

        self.transport.send(OutboundMessage::MediaState(state.clone()));
        self.events.broadcast(BridgeEvent::TabUpdated {
            tab_id: tab.id,
            state,
        });
    }

    /// Drops the record of a closed tab and tells the host about it.
    pub fn on_tab_closed(&mut self, tab_id: TabId) {
        if self.records.remove(&tab_id).is_none() {
            return;
        }

        info!("🗑️ Tab {} closed, cleaning up", tab_id);
        self.transport
            .send(OutboundMessage::TabClosed(TabClosed { tab_id }));
        self.events.broadcast(BridgeEvent::TabClosed { tab_id });
    }

    pub fn on_inbound(&self, message: InboundMessage) {
        self.router.dispatch(message);
    }

    /// Processes the queue until every handle is dropped.
    pub async fn run(mut self, mut queue: mpsc::UnboundedReceiver<BrokerMessage>) {
        while let Some(message) = queue.recv().await {
            self.handle_message(message);
        }
        debug!("Broker queue closed");
    }
}

/// Fills the gaps of a partial update.
///
/// Empty strings count as missing: the title falls back to the tab title,
/// then to "Unknown".
fn normalize(tab_id: TabId, update: &MediaStateUpdate, tab_title: &str) -> MediaState {
    let present = |value: &Option<String>| value.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    MediaState {
        tab_id,
        playing: update.playing.unwrap_or(false),
        title: present(&update.title)
            .or_else(|| Some(tab_title.to_string()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        artist: present(&update.artist).unwrap_or_default(),
        album: present(&update.album).unwrap_or_default(),
        duration: update.duration.map(sanitize_seconds).unwrap_or(0.0),
        position: update.position.map(sanitize_seconds).unwrap_or(0.0),
    }
}
