//! Per-tab media state bridge.
//!
//! Probes watch the media elements of each browser tab, a broker keeps one
//! record per tab and forwards normalized states to the native control host,
//! and host commands are routed back to the probe of the addressed tab.

mod events;

pub mod bridge;
pub mod broker;
pub mod config_ext;
pub mod errors;
pub mod filter;
pub mod model;
pub mod probe;
pub mod router;
pub mod transport;

pub use bridge::TabMediaBridge;
pub use broker::{Broker, BrokerHandle, BrokerMessage, OutboundSink};
pub use config_ext::{BridgeConfigExt, BridgeSettings};
pub use errors::BridgeError;
pub use events::BridgeEventBus;
pub use filter::{ChangeFilter, Trigger};
pub use model::{
    BridgeEvent, Command, InboundMessage, LinkState, MediaSnapshot, MediaState, MediaStateUpdate,
    MessageSender, OutboundMessage, TabId, TabInfo, TabMessage, TabRecord,
};
pub use probe::document::{
    Affordance, ElementId, ElementState, MediaDocument, MediaEvent, MediaEventKind, PageMetadata,
    Subscription,
};
pub use probe::memory::MemoryDocument;
pub use probe::{PageProbe, ProbeTimings, spawn_probe};
pub use router::CommandRouter;
pub use transport::{
    HostConnection, HostConnector, NATIVE_HOST_NAME, NativeHostConnector, Transport,
    TransportHandle,
};
