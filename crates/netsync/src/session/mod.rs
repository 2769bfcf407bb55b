mod challenge;
mod client;
mod events;
mod messages;
mod server;

pub use challenge::{ChallengeCheck, ChallengeTable};
pub use client::{
    ClientDisconnectReason, ClientEvent, ClientSession, ClientState, ClientStateKind, Handshake,
    Spawned,
};
pub use events::{DisconnectReason, ServerEvent};
pub use messages::ServerMessage;
pub use server::{ClientHandle, ClientInfo, ServerStats, SessionServer, Simulation};
