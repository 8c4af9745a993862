//! Media introspection adapter.
//!
//! A [`MediaDocument`] is the window a probe has on one document context:
//! it enumerates playable media, reads and drives their state, exposes the
//! page metadata and registers event listeners. Page-specific heuristics
//! (meta tags, site players, skip buttons) live behind this trait.

use std::fmt;

use tokio::sync::mpsc::UnboundedSender;

use crate::errors::BridgeError;

/// Identity of a media element within its document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Playback-affecting events a probe listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaEventKind {
    Play,
    Pause,
    Ended,
    TimeUpdate,
    DurationChange,
    VolumeChange,
}

impl MediaEventKind {
    pub const ALL: [MediaEventKind; 6] = [
        MediaEventKind::Play,
        MediaEventKind::Pause,
        MediaEventKind::Ended,
        MediaEventKind::TimeUpdate,
        MediaEventKind::DurationChange,
        MediaEventKind::VolumeChange,
    ];

    /// DOM event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaEventKind::Play => "play",
            MediaEventKind::Pause => "pause",
            MediaEventKind::Ended => "ended",
            MediaEventKind::TimeUpdate => "timeupdate",
            MediaEventKind::DurationChange => "durationchange",
            MediaEventKind::VolumeChange => "volumechange",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaEvent {
    pub element: ElementId,
    pub kind: MediaEventKind,
}

pub type EventSender = UnboundedSender<MediaEvent>;

/// Intrinsic state of a media element, as the element reports it.
///
/// Values are raw: `duration` is NaN until metadata is loaded and may be
/// infinite for live streams.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementState {
    pub paused: bool,
    pub duration: f64,
    pub current_time: f64,
    pub volume: f64,
    pub muted: bool,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            paused: true,
            duration: f64::NAN,
            current_time: 0.0,
            volume: 1.0,
            muted: false,
        }
    }
}

/// Descriptive metadata scraped from the page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// Page controls outside the media element itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Affordance {
    Next,
    Previous,
}

/// Listener registration. Dropping it removes the listeners.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Registration with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub trait MediaDocument: Send + 'static {
    /// Current location of the tab.
    fn url(&self) -> String;

    /// Current title of the tab.
    fn title(&self) -> String;

    /// Playable media elements, in document order.
    fn find_media(&self) -> Vec<ElementId>;

    /// Whether the element is still attached to the document.
    fn contains(&self, element: ElementId) -> bool;

    fn element_state(&self, element: ElementId) -> Option<ElementState>;

    fn metadata(&self) -> PageMetadata;

    /// Registers `events` for every [`MediaEventKind`] fired by `element`.
    fn subscribe(&mut self, element: ElementId, events: EventSender) -> Subscription;

    /// Starts playback. Pages may refuse (autoplay policies).
    fn play(&mut self, element: ElementId) -> Result<(), BridgeError>;

    fn pause(&mut self, element: ElementId);

    fn seek(&mut self, element: ElementId, position: f64);

    /// Activates a page control; `false` when the page has none.
    fn activate(&mut self, affordance: Affordance) -> bool;
}
