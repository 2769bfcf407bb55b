use std::net::SocketAddr;

use crate::net::RejectReason;

use super::server::ClientHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        handle: ClientHandle,
        addr: SocketAddr,
    },
    ClientDisconnected {
        handle: ClientHandle,
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: RejectReason,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Banned,
    RetriesExhausted,
    /// The same address reconnected as a new client.
    Replaced,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Banned => "banned",
            DisconnectReason::RetriesExhausted => "reliable retries exhausted",
            DisconnectReason::Replaced => "replaced by reconnect",
        }
    }
}
