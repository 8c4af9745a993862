//! Bridge facade wiring the broker, router, transport and probes together.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerHandle};
use crate::config_ext::BridgeSettings;
use crate::events::BridgeEventBus;
use crate::model::{BridgeEvent, LinkState, TabId, TabRecord};
use crate::probe::document::MediaDocument;
use crate::probe::spawn_probe;
use crate::router::CommandRouter;
use crate::transport::{HostConnector, Transport, TransportHandle};

struct BridgeInner {
    settings: BridgeSettings,
    broker: BrokerHandle,
    router: CommandRouter,
    events: BridgeEventBus,
    transport: TransportHandle,
    /// Probe tasks per tab, superseded ones included until the tab closes.
    probes: Mutex<HashMap<TabId, Vec<JoinHandle<()>>>>,
    transport_task: JoinHandle<()>,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.transport_task.abort();
        for probe in self.probes.lock().drain().flat_map(|(_, tasks)| tasks) {
            probe.abort();
        }
    }
}

/// Handle on a running bridge.
///
/// Cloning is cheap; the background tasks stop when the last clone is dropped.
#[derive(Clone)]
pub struct TabMediaBridge {
    inner: Arc<BridgeInner>,
}

impl TabMediaBridge {
    /// Starts the broker and transport tasks. Must be called within a tokio runtime.
    pub fn spawn<C: HostConnector>(settings: BridgeSettings, connector: C) -> Self {
        let events = BridgeEventBus::new();
        let router = CommandRouter::new(events.clone());
        let transport = TransportHandle::new();
        let (broker, queue) = BrokerHandle::channel();

        tokio::spawn(Broker::new(transport.clone(), router.clone(), events.clone()).run(queue));
        let transport_task = tokio::spawn(
            Transport::new(
                connector,
                transport.clone(),
                broker.clone(),
                events.clone(),
                settings.reconnect_delay,
            )
            .run(),
        );

        info!("🌉 Tab media bridge started for host {}", settings.host_name);
        Self {
            inner: Arc::new(BridgeInner {
                settings,
                broker,
                router,
                events,
                transport,
                probes: Mutex::new(HashMap::new()),
                transport_task,
            }),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    /// Starts probing a tab's document.
    ///
    /// Attaching again for the same tab (navigation) replaces the previous
    /// probe; the broker record is kept. The replaced task is still awaited
    /// by [`close_tab`](Self::close_tab).
    pub fn attach_tab<D: MediaDocument>(&self, tab_id: TabId, document: D) {
        let handle = spawn_probe(
            tab_id,
            document,
            self.inner.broker.clone(),
            &self.inner.router,
            self.inner.settings.probe,
        );
        let mut probes = self.inner.probes.lock();
        let tasks = probes.entry(tab_id).or_default();
        tasks.retain(|task| !task.is_finished());
        if !tasks.is_empty() {
            debug!(tab_id = %tab_id, "Previous document context detached");
        }
        tasks.push(handle);
    }

    /// Stops the tab's probes, then drops its record.
    ///
    /// Every probe task of the tab is awaited first so that nothing they
    /// posted can land after the close.
    pub async fn close_tab(&self, tab_id: TabId) {
        self.inner.router.unregister(tab_id);
        let tasks = self.inner.probes.lock().remove(&tab_id).unwrap_or_default();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(tab_id = %tab_id, "Probe task ended abnormally: {}", err);
            }
        }
        self.inner.broker.tab_closed(tab_id);
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    pub fn transport_state(&self) -> LinkState {
        self.inner.transport.state()
    }

    /// Tabs currently known to the broker, ordered by id.
    pub async fn tabs(&self) -> Vec<TabRecord> {
        self.inner.broker.tabs().await
    }

    /// Tabs with a running probe.
    pub fn probed_tabs(&self) -> Vec<TabId> {
        self.inner.router.live_tabs()
    }

    /// Entry point for messages not produced by an attached probe.
    pub fn broker(&self) -> BrokerHandle {
        self.inner.broker.clone()
    }
}
