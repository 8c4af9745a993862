//! Per-tab media probe.
//!
//! A [`PageProbe`] watches one document context through a
//! [`MediaDocument`] adapter. It keeps the media elements it discovered in
//! discovery order and treats the earliest one still attached as
//! authoritative: snapshots are read from it and commands act on it.
//!
//! The probe loop multiplexes four sources:
//! - the periodic scan (new or removed elements),
//! - the heartbeat (refresh while playing),
//! - element events (play, pause, timeupdate, ...),
//! - commands routed from the host.
//!
//! Every snapshot goes through a [`ChangeFilter`] before reaching the broker.

pub mod document;
pub mod memory;

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::broker::BrokerHandle;
use crate::filter::{ChangeFilter, Trigger};
use crate::model::{
    Command, MediaSnapshot, MessageSender, TabId, TabInfo, TabMessage, sanitize_seconds,
    sanitize_volume,
};
use crate::router::CommandRouter;
use document::{Affordance, ElementId, EventSender, MediaDocument, MediaEvent, Subscription};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_INITIAL_SNAPSHOT_DELAY: Duration = Duration::from_secs(2);

/// Timer periods of a probe loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeTimings {
    pub scan_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Delay of the one-shot refresh after page load.
    pub initial_snapshot_delay: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            initial_snapshot_delay: DEFAULT_INITIAL_SNAPSHOT_DELAY,
        }
    }
}

struct TrackedElement {
    id: ElementId,
    _subscription: Subscription,
}

pub struct PageProbe<D: MediaDocument> {
    tab_id: TabId,
    document: D,
    /// Discovery order; the first attached one is authoritative.
    tracked: Vec<TrackedElement>,
    filter: ChangeFilter,
    broker: BrokerHandle,
    events: EventSender,
}

impl<D: MediaDocument> PageProbe<D> {
    /// Creates a probe and the receiving end of its element events.
    pub fn new(
        tab_id: TabId,
        document: D,
        broker: BrokerHandle,
    ) -> (Self, UnboundedReceiver<MediaEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let probe = Self {
            tab_id,
            document,
            tracked: Vec::new(),
            filter: ChangeFilter::new(),
            broker,
            events,
        };
        (probe, events_rx)
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Elements currently tracked, in discovery order.
    pub fn tracked(&self) -> Vec<ElementId> {
        self.tracked.iter().map(|t| t.id).collect()
    }

    fn is_tracked(&self, element: ElementId) -> bool {
        self.tracked.iter().any(|t| t.id == element)
    }

    /// Earliest-discovered element still attached to the document.
    pub fn authoritative(&self) -> Option<ElementId> {
        self.tracked
            .iter()
            .map(|t| t.id)
            .find(|id| self.document.contains(*id))
    }

    /// Re-enumerates the document's media.
    ///
    /// Detached elements are forgotten (their listeners removed), then new
    /// ones are tracked in document order. Each discovery emits a snapshot
    /// unconditionally.
    pub fn scan(&mut self) {
        let present = self.document.find_media();

        let before = self.tracked.len();
        self.tracked.retain(|t| present.contains(&t.id));
        if self.tracked.len() != before {
            debug!(tab_id = %self.tab_id, dropped = before - self.tracked.len(), "Media elements detached");
        }

        for id in present {
            if self.is_tracked(id) {
                continue;
            }
            debug!(tab_id = %self.tab_id, element = %id, "🎵 New media element found");
            let subscription = self.document.subscribe(id, self.events.clone());
            self.tracked.push(TrackedElement {
                id,
                _subscription: subscription,
            });
            self.emit(Trigger::NewElement);
        }
    }

    /// Playback-affecting event fired by one of the tracked elements.
    pub fn on_event(&mut self, event: MediaEvent) {
        if !self.is_tracked(event.element) {
            trace!(tab_id = %self.tab_id, element = %event.element, "Event from untracked element");
            return;
        }
        trace!(tab_id = %self.tab_id, event = event.kind.as_str(), "Media event");
        self.emit(Trigger::Event(event.kind));
    }

    /// Periodic refresh, only while the authoritative element plays.
    pub fn heartbeat(&mut self) {
        let playing = self
            .authoritative()
            .and_then(|id| self.document.element_state(id))
            .is_some_and(|state| !state.paused);
        if playing {
            self.emit(Trigger::Heartbeat);
        }
    }

    /// Applies a host command to the authoritative element.
    ///
    /// Never fails: without a media element, or when the page refuses, the
    /// command is logged and dropped.
    pub fn execute(&mut self, command: Command) {
        let Some(element) = self.authoritative() else {
            debug!(tab_id = %self.tab_id, command = %command, "No media element, command ignored");
            return;
        };

        match command {
            Command::Play => self.play(element),
            Command::Pause => self.document.pause(element),
            Command::PlayPause => {
                let paused = self
                    .document
                    .element_state(element)
                    .is_none_or(|state| state.paused);
                if paused {
                    self.play(element);
                } else {
                    self.document.pause(element);
                }
            }
            Command::Stop => {
                self.document.pause(element);
                self.document.seek(element, 0.0);
            }
            Command::Seek(Some(position)) if position.is_finite() => {
                self.document.seek(element, position.max(0.0));
            }
            Command::Seek(_) => {
                debug!(tab_id = %self.tab_id, "Seek without a usable position, ignored");
            }
            Command::Next => self.activate(Affordance::Next),
            Command::Previous => self.activate(Affordance::Previous),
        }
    }

    fn play(&mut self, element: ElementId) {
        if let Err(err) = self.document.play(element) {
            warn!(tab_id = %self.tab_id, "Play failed: {}", err);
        }
    }

    fn activate(&mut self, affordance: Affordance) {
        if !self.document.activate(affordance) {
            debug!(tab_id = %self.tab_id, ?affordance, "Page has no such control");
        }
    }

    /// Current state of the authoritative element, with page metadata.
    pub fn snapshot(&self) -> Option<MediaSnapshot> {
        let element = self.authoritative()?;
        let state = self.document.element_state(element)?;
        let metadata = self.document.metadata();

        Some(MediaSnapshot {
            playing: !state.paused,
            title: metadata.title,
            artist: metadata.artist,
            album: metadata.album,
            duration: sanitize_seconds(state.duration),
            position: sanitize_seconds(state.current_time),
            volume: sanitize_volume(state.volume),
            muted: state.muted,
        })
    }

    /// Takes a snapshot and posts it to the broker if the filter lets it through.
    pub fn emit(&mut self, trigger: Trigger) {
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        let Some(snapshot) = self.filter.offer(snapshot, trigger) else {
            return;
        };

        trace!(tab_id = %self.tab_id, ?trigger, "Posting media state");
        let sender = MessageSender::tab(TabInfo {
            id: self.tab_id,
            url: self.document.url(),
            title: self.document.title(),
        });
        self.broker
            .send_from_tab(sender, TabMessage::MediaStateUpdate((&snapshot).into()));
    }

    /// Probe loop. Returns when the command channel closes.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<MediaEvent>,
        mut commands: UnboundedReceiver<Command>,
        timings: ProbeTimings,
    ) {
        debug!(tab_id = %self.tab_id, "Probe started");
        self.scan();

        let start = Instant::now();
        let mut scan = time::interval_at(start + timings.scan_interval, timings.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat =
            time::interval_at(start + timings.heartbeat_interval, timings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let initial = time::sleep(timings.initial_snapshot_delay);
        tokio::pin!(initial);
        let mut initial_pending = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
                _ = scan.tick() => self.scan(),
                _ = heartbeat.tick() => self.heartbeat(),
                _ = &mut initial, if initial_pending => {
                    initial_pending = false;
                    self.scan();
                    self.emit(Trigger::Initial);
                }
            }
        }

        debug!(tab_id = %self.tab_id, "Probe stopped");
    }
}

/// Starts the probe of a tab and registers it with the router.
///
/// A probe already registered for the tab is replaced; dropping its command
/// channel stops it.
pub fn spawn_probe<D: MediaDocument>(
    tab_id: TabId,
    document: D,
    broker: BrokerHandle,
    router: &CommandRouter,
    timings: ProbeTimings,
) -> JoinHandle<()> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    if router.register(tab_id, commands_tx).is_some() {
        debug!(tab_id = %tab_id, "Replacing previous probe");
    }

    let (probe, events) = PageProbe::new(tab_id, document, broker);
    tokio::spawn(probe.run(events, commands_rx, timings))
}
