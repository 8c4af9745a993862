//! Reconnecting link to the native control host.
//!
//! The transport is a two-state machine driven by [`Transport::run`]:
//!
//! ```text
//!   Disconnected --connect ok--> Connected
//!        ^                           |
//!        +--- sleep(reconnect) <-----+  (connect error or disconnect)
//! ```
//!
//! Frames use the native messaging layout: a 32-bit length in native byte
//! order followed by a UTF-8 JSON body. Sending is fire-and-forget: while
//! disconnected, outbound messages are dropped.

pub mod native;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec, length_delimited};
use tracing::{debug, info, trace, warn};

use crate::broker::{BrokerHandle, OutboundSink};
use crate::errors::BridgeError;
use crate::events::BridgeEventBus;
use crate::model::{BridgeEvent, InboundMessage, LinkState, OutboundMessage};

pub use native::NativeHostConnector;

/// Name under which the control host is registered.
pub const NATIVE_HOST_NAME: &str = "per_tab_mpris_bridge";

/// Largest frame accepted from the host.
pub const MAX_INBOUND_FRAME: usize = 1024 * 1024;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established byte channel to the host.
pub struct HostConnection {
    reader: BoxedReader,
    writer: BoxedWriter,
    /// Host process, killed when the connection is dropped.
    child: Option<Child>,
}

impl HostConnection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

/// Opens connections to the host.
#[async_trait]
pub trait HostConnector: Send + Sync + 'static {
    fn host_name(&self) -> &str;

    async fn connect(&self) -> Result<HostConnection, BridgeError>;
}

fn codec() -> length_delimited::Builder {
    let mut builder = LengthDelimitedCodec::builder();
    builder.native_endian().length_field_length(4);
    builder
}

/// Sending side of the transport, shared with the broker.
#[derive(Clone, Default)]
pub struct TransportHandle {
    link: Arc<Mutex<Option<mpsc::UnboundedSender<OutboundMessage>>>>,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        match &*self.link.lock() {
            Some(tx) if !tx.is_closed() => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }

    /// Hands the message to the current session.
    pub fn try_send(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        let link = self.link.lock();
        let Some(tx) = link.as_ref() else {
            return Err(BridgeError::transport_unavailable(message.kind()));
        };
        let kind = message.kind();
        tx.send(message)
            .map_err(|_| BridgeError::transport_unavailable(kind))
    }

    fn attach(&self, tx: mpsc::UnboundedSender<OutboundMessage>) {
        *self.link.lock() = Some(tx);
    }

    fn detach(&self) {
        self.link.lock().take();
    }
}

impl OutboundSink for TransportHandle {
    fn send(&self, message: OutboundMessage) {
        let tab_id = message.tab_id();
        if let Err(err) = self.try_send(message) {
            warn!(tab_id = %tab_id, "⚠️ {}", err);
        }
    }
}

pub struct Transport<C: HostConnector> {
    connector: C,
    handle: TransportHandle,
    broker: BrokerHandle,
    events: BridgeEventBus,
    reconnect_delay: Duration,
}

impl<C: HostConnector> Transport<C> {
    pub fn new(
        connector: C,
        handle: TransportHandle,
        broker: BrokerHandle,
        events: BridgeEventBus,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            handle,
            broker,
            events,
            reconnect_delay,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Connects, serves the session, waits, and starts over. Never returns.
    pub async fn run(self) {
        loop {
            match self.connector.connect().await {
                Ok(connection) => {
                    info!("🔌 Connected to native host {}", self.connector.host_name());
                    self.session(connection).await;
                    info!("🔌 Disconnected from native host");
                }
                Err(err) => warn!("Native host connection failed: {}", err),
            }

            debug!("Reconnecting in {:?}", self.reconnect_delay);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Pumps frames in both directions until the host goes away.
    pub async fn session(&self, connection: HostConnection) {
        let HostConnection {
            reader,
            writer,
            child,
        } = connection;
        let mut inbound: FramedRead<BoxedReader, LengthDelimitedCodec> =
            codec().max_frame_length(MAX_INBOUND_FRAME).new_read(reader);
        let mut outbound: FramedWrite<BoxedWriter, LengthDelimitedCodec> = codec().new_write(writer);

        let (tx, mut queue) = mpsc::unbounded_channel();
        self.handle.attach(tx);
        self.events.broadcast(BridgeEvent::HostConnected);

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(&frame),
                    Some(Err(err)) => {
                        warn!("Native host stream error: {}", err);
                        break;
                    }
                    None => {
                        debug!("Native host closed its output");
                        break;
                    }
                },
                Some(message) = queue.recv() => {
                    if let Err(err) = self.write(&mut outbound, &message).await {
                        warn!("Failed to send {} to native host: {}", message.kind(), err);
                        if matches!(err, BridgeError::Io(_)) {
                            break;
                        }
                    }
                }
            }
        }

        self.handle.detach();
        let unsent = discard_unsent(&mut queue);
        if unsent > 0 {
            warn!("⚠️ Session ended with {} unsent message(s), dropped", unsent);
        }
        self.events.broadcast(BridgeEvent::HostDisconnected);
        drop(child);
    }

    async fn write(
        &self,
        sink: &mut FramedWrite<BoxedWriter, LengthDelimitedCodec>,
        message: &OutboundMessage,
    ) -> Result<(), BridgeError> {
        let body = message.to_vec()?;
        trace!(tab_id = %message.tab_id(), "→ {}", message.kind());
        sink.send(Bytes::from(body)).await?;
        Ok(())
    }

    fn on_frame(&self, frame: &[u8]) {
        match InboundMessage::from_slice(frame) {
            Ok(message) => {
                debug!(tab_id = %message.tab_id, "← {} from native host", message.command);
                self.broker.inbound(message);
            }
            Err(err) => warn!("Ignoring host message: {}", err),
        }
    }
}

/// Empties a session queue whose link was detached; returns how many
/// messages were lost.
fn discard_unsent(queue: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> usize {
    queue.close();
    let mut unsent = 0;
    while let Ok(message) = queue.try_recv() {
        trace!(tab_id = %message.tab_id(), "Dropping unsent {}", message.kind());
        unsent += 1;
    }
    unsent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerMessage;
    use crate::model::{Command, MediaState, TabClosed, TabId};
    use std::collections::VecDeque;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::{self, Instant};

    /// Hands out scripted duplex pipes; an empty script means the host is down.
    #[derive(Clone, Default)]
    struct ScriptedConnector {
        script: Arc<Mutex<VecDeque<DuplexStream>>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedConnector {
        /// Queues a session and returns the host end of it.
        fn accept_once(&self) -> DuplexStream {
            let (ours, theirs) = tokio::io::duplex(64 * 1024);
            self.script.lock().push_back(ours);
            theirs
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl HostConnector for ScriptedConnector {
        fn host_name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self) -> Result<HostConnection, BridgeError> {
            self.attempts.lock().push(Instant::now());
            match self.script.lock().pop_front() {
                Some(stream) => {
                    let (reader, writer) = tokio::io::split(stream);
                    Ok(HostConnection::new(reader, writer))
                }
                None => Err(BridgeError::connect_failure("scripted", "host not running")),
            }
        }
    }

    struct Harness {
        connector: ScriptedConnector,
        handle: TransportHandle,
        queue: mpsc::UnboundedReceiver<BrokerMessage>,
        events: crossbeam_channel::Receiver<BridgeEvent>,
    }

    fn start(delay: Duration, connector: ScriptedConnector) -> Harness {
        let (broker, queue) = BrokerHandle::channel();
        let bus = BridgeEventBus::new();
        let events = bus.subscribe();
        let transport = Transport::new(connector.clone(), TransportHandle::new(), broker, bus, delay);
        let handle = transport.handle();
        tokio::spawn(transport.run());
        Harness {
            connector,
            handle,
            queue,
            events,
        }
    }

    async fn wait_for(events: &crossbeam_channel::Receiver<BridgeEvent>, wanted: BridgeEvent) {
        loop {
            match events.try_recv() {
                Ok(event) if event == wanted => return,
                Ok(_) => continue,
                Err(_) => time::sleep(Duration::from_millis(1)).await,
            }
        }
    }

    async fn write_frame(host: &mut DuplexStream, body: &[u8]) {
        host.write_all(&(body.len() as u32).to_ne_bytes()).await.unwrap();
        host.write_all(body).await.unwrap();
    }

    async fn read_frame(host: &mut DuplexStream) -> serde_json::Value {
        let mut len = [0u8; 4];
        host.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_ne_bytes(len) as usize];
        host.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn closed(tab: i64) -> OutboundMessage {
        OutboundMessage::TabClosed(TabClosed { tab_id: TabId(tab) })
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let handle = TransportHandle::new();
        assert_eq!(handle.state(), LinkState::Disconnected);
        assert!(matches!(
            handle.try_send(closed(1)),
            Err(BridgeError::TransportUnavailable(_))
        ));
        // never surfaces an error to the broker
        OutboundSink::send(&handle, closed(1));
    }

    #[test]
    fn test_unsent_messages_are_counted_and_not_kept() {
        let (tx, mut queue) = mpsc::unbounded_channel();
        tx.send(closed(1)).unwrap();
        tx.send(closed(2)).unwrap();

        assert_eq!(discard_unsent(&mut queue), 2);
        assert!(tx.send(closed(3)).is_err());
        assert_eq!(discard_unsent(&mut queue), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_frames_are_length_prefixed_json() {
        let connector = ScriptedConnector::default();
        let mut host = connector.accept_once();
        let harness = start(DEFAULT_RECONNECT_DELAY, connector);
        wait_for(&harness.events, BridgeEvent::HostConnected).await;
        assert_eq!(harness.handle.state(), LinkState::Connected);

        OutboundSink::send(
            &harness.handle,
            OutboundMessage::MediaState(MediaState {
                tab_id: TabId(7),
                playing: true,
                title: "X".into(),
                artist: "Y".into(),
                album: String::new(),
                duration: 10.0,
                position: 1.0,
            }),
        );
        OutboundSink::send(&harness.handle, closed(7));

        let first = read_frame(&mut host).await;
        assert_eq!(first["type"], "mediaState");
        assert_eq!(first["tabId"], 7);
        assert_eq!(read_frame(&mut host).await["type"], "tabClosed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_commands_reach_broker_and_garbage_is_skipped() {
        let connector = ScriptedConnector::default();
        let mut host = connector.accept_once();
        let mut harness = start(DEFAULT_RECONNECT_DELAY, connector);
        wait_for(&harness.events, BridgeEvent::HostConnected).await;

        write_frame(&mut host, b"{not json").await;
        write_frame(&mut host, br#"{"command":"rewind","tabId":3}"#).await;
        write_frame(&mut host, br#"{"command":"seek","tabId":7,"position":42}"#).await;

        let message = loop {
            if let Ok(message) = harness.queue.try_recv() {
                break message;
            }
            time::sleep(Duration::from_millis(1)).await;
        };
        let BrokerMessage::Inbound(inbound) = message else {
            panic!("expected an inbound command");
        };
        assert_eq!(inbound.tab_id, TabId(7));
        assert_eq!(inbound.command, Command::Seek(Some(42.0)));
        assert_eq!(harness.handle.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_frame_ends_session() {
        let connector = ScriptedConnector::default();
        let mut host = connector.accept_once();
        let harness = start(DEFAULT_RECONNECT_DELAY, connector);
        wait_for(&harness.events, BridgeEvent::HostConnected).await;

        host.write_all(&((MAX_INBOUND_FRAME + 1) as u32).to_ne_bytes())
            .await
            .unwrap();

        wait_for(&harness.events, BridgeEvent::HostDisconnected).await;
        assert_eq!(harness.handle.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_are_spaced_by_the_delay() {
        let delay = Duration::from_secs(5);
        let connector = ScriptedConnector::default();
        let host = connector.accept_once();
        let harness = start(delay, connector);
        wait_for(&harness.events, BridgeEvent::HostConnected).await;

        drop(host);
        wait_for(&harness.events, BridgeEvent::HostDisconnected).await;
        let disconnected_at = Instant::now();

        // three failing attempts, one every `delay`
        time::sleep(delay * 3 + Duration::from_millis(500)).await;

        let attempts = harness.connector.attempts();
        assert_eq!(attempts.len(), 4);
        let first_retry = attempts[1] - disconnected_at;
        assert!(first_retry >= delay && first_retry < delay + Duration::from_millis(10));
        for pair in attempts[1..].windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= delay && gap < delay + Duration::from_millis(10), "gap {gap:?}");
        }

        // nothing is queued for later while down
        OutboundSink::send(&harness.handle, closed(2));
        assert_eq!(harness.handle.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_host_restart() {
        let connector = ScriptedConnector::default();
        let first = connector.accept_once();
        let harness = start(Duration::from_secs(5), connector.clone());
        wait_for(&harness.events, BridgeEvent::HostConnected).await;

        let mut second = connector.accept_once();
        drop(first);
        wait_for(&harness.events, BridgeEvent::HostDisconnected).await;
        wait_for(&harness.events, BridgeEvent::HostConnected).await;

        OutboundSink::send(&harness.handle, closed(5));
        assert_eq!(read_frame(&mut second).await["tabId"], 5);
    }
}
