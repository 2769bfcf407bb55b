use std::io;

use crate::net::PacketError;
use crate::session::ClientStateKind;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The socket failed with something other than a transient condition.
    #[error("network down: {0}")]
    NetworkDown(#[source] io::Error),
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },
    #[error("reliable queue is full ({limit} messages pending)")]
    ReliableQueueFull { limit: usize },
    #[error("not connected")]
    NotConnected,
    #[error("invalid client state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ClientStateKind,
        to: ClientStateKind,
    },
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write config: {0}")]
    Write(#[source] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[source] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
