//! Data model shared by probes, the broker and the transport.
//!
//! Wire shapes follow the native messaging protocol spoken by the control
//! host: camelCase field names, a `type` tag on outbound messages and a
//! `command` name on inbound ones. Unknown fields are ignored on input.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::errors::BridgeError;

/// Browser tab identifier, serialized as a bare number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TabId {
    fn from(value: i64) -> Self {
        TabId(value)
    }
}

/// Point-in-time playback state of a tab's authoritative media element.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaSnapshot {
    pub playing: bool,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Seconds, always finite and >= 0.
    pub duration: f64,
    /// Seconds, always finite and >= 0.
    pub position: f64,
    /// In `[0, 1]`.
    pub volume: f64,
    pub muted: bool,
}

impl MediaSnapshot {
    /// Compares every field except `position`.
    ///
    /// Position advances continuously during playback and must not count as
    /// a state change on its own.
    pub fn same_state_as(&self, other: &MediaSnapshot) -> bool {
        self.playing == other.playing
            && self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.duration == other.duration
            && self.volume == other.volume
            && self.muted == other.muted
    }
}

/// Clamps a time value reported by a media element to a finite, non-negative
/// number of seconds. Unknown durations show up as NaN or infinity.
pub fn sanitize_seconds(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Clamps a volume to `[0, 1]`, mapping NaN to 0.
pub fn sanitize_volume(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Playback command issued by the control surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    /// Target position in seconds; `None` when the host omitted it.
    Seek(Option<f64>),
}

impl Command {
    /// Builds a command from its wire name.
    pub fn from_wire(name: &str, position: Option<f64>) -> Result<Self, BridgeError> {
        match name {
            "play" => Ok(Command::Play),
            "pause" => Ok(Command::Pause),
            "playPause" => Ok(Command::PlayPause),
            "stop" => Ok(Command::Stop),
            "next" => Ok(Command::Next),
            "previous" => Ok(Command::Previous),
            "seek" => Ok(Command::Seek(position)),
            other => Err(BridgeError::UnknownCommand(other.to_string())),
        }
    }

    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::PlayPause => "playPause",
            Command::Stop => "stop",
            Command::Next => "next",
            Command::Previous => "previous",
            Command::Seek(_) => "seek",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Seek(Some(position)) => write!(f, "seek({position})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Raw inbound frame as sent by the host.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    command: String,
    tab_id: TabId,
    #[serde(default)]
    position: Option<f64>,
}

/// Command addressed to a tab, received over the transport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InboundMessage {
    pub command: Command,
    pub tab_id: TabId,
}

impl<'de> Deserialize<'de> for InboundMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawInbound::deserialize(deserializer)?;
        let command = Command::from_wire(&raw.command, raw.position).map_err(de::Error::custom)?;
        Ok(InboundMessage {
            command,
            tab_id: raw.tab_id,
        })
    }
}

impl InboundMessage {
    /// Parses one inbound frame.
    pub fn from_slice(frame: &[u8]) -> Result<Self, BridgeError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Tab-to-broker state message, `{type: "mediaStateUpdate", ...}`.
///
/// Every field is optional on the wire; the broker fills the gaps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStateUpdate {
    #[serde(default)]
    pub playing: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub muted: Option<bool>,
}

impl From<&MediaSnapshot> for MediaStateUpdate {
    fn from(snapshot: &MediaSnapshot) -> Self {
        MediaStateUpdate {
            playing: Some(snapshot.playing),
            title: Some(snapshot.title.clone()),
            artist: Some(snapshot.artist.clone()),
            album: Some(snapshot.album.clone()),
            duration: Some(snapshot.duration),
            position: Some(snapshot.position),
            volume: Some(snapshot.volume),
            muted: Some(snapshot.muted),
        }
    }
}

/// Messages a tab context sends to the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TabMessage {
    MediaStateUpdate(MediaStateUpdate),
}

/// Tab information the runtime attaches to a message from a tab context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub title: String,
}

/// Origin of a message reaching the broker. Only tab senders carry `tab`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSender {
    pub tab: Option<TabInfo>,
}

impl MessageSender {
    pub fn tab(info: TabInfo) -> Self {
        MessageSender { tab: Some(info) }
    }

    /// A sender outside any tab (popup, background page, ...).
    pub fn extension() -> Self {
        MessageSender { tab: None }
    }
}

/// Broker-side record of a tab with media.
#[derive(Clone, Debug, PartialEq)]
pub struct TabRecord {
    pub tab_id: TabId,
    pub snapshot: MediaStateUpdate,
    pub source_url: String,
    pub tab_title: String,
    pub updated_at: DateTime<Utc>,
}

/// Normalized state of one tab, as sent to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    pub tab_id: TabId,
    pub playing: bool,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: f64,
    pub position: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabClosed {
    pub tab_id: TabId,
}

/// Messages sent to the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    MediaState(MediaState),
    TabClosed(TabClosed),
}

impl OutboundMessage {
    pub fn tab_id(&self) -> TabId {
        match self {
            OutboundMessage::MediaState(state) => state.tab_id,
            OutboundMessage::TabClosed(closed) => closed.tab_id,
        }
    }

    /// Wire `type` tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::MediaState(_) => "mediaState",
            OutboundMessage::TabClosed(_) => "tabClosed",
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, BridgeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Connection state of the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Notifications published on the bridge event bus.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    TabUpdated { tab_id: TabId, state: MediaState },
    TabClosed { tab_id: TabId },
    HostConnected,
    HostDisconnected,
    CommandDropped { tab_id: TabId, command: Command },
}
