use thiserror::Error;

use crate::model::TabId;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Envoi pendant que le transport est déconnecté : le message est perdu
    #[error("native host is not connected, {0} message dropped")]
    TransportUnavailable(String),
    #[error("cannot connect to native host {0}: {1}")]
    ConnectFailure(String, String),
    #[error("no live probe for tab {0}")]
    CommandTargetMissing(TabId),
    #[error("tab {0} has no media element")]
    NoAuthoritativeElement(TabId),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("media element refused to {0}: {1}")]
    MediaRefused(String, String),
    #[error("native messaging manifest error: {0}")]
    Manifest(String),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn transport_unavailable(kind: &str) -> Self {
        BridgeError::TransportUnavailable(kind.to_string())
    }

    pub fn connect_failure(host: &str, reason: impl ToString) -> Self {
        BridgeError::ConnectFailure(host.to_string(), reason.to_string())
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        BridgeError::Manifest(message.into())
    }

    pub fn media_refused(action: &str, reason: impl ToString) -> Self {
        BridgeError::MediaRefused(action.to_string(), reason.to_string())
    }
}
