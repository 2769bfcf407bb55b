//! UDP netcode: a reliable message channel, an authoritative session
//! server, the client session state machine and LAN server discovery.
//!
//! Everything is poll-driven. Callers sample one [`std::time::Instant`] per
//! step and pass it to `update`/`poll`; nothing here blocks or spawns.

pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod session;
pub mod snapshot;

pub use config::NetConfig;
pub use discovery::{DiscoveryScanner, InfoResponse, ServerInfo};
pub use error::{ConfigError, NetError};
pub use net::{
    ChannelFault, ControlMessage, DEFAULT_PORT, DatagramSocket, LinkConditions, LossySocket,
    Message, MessageChannel, NetworkSimulator, NetworkStats, PROTOCOL_VERSION, PacketError,
    PacketHeader, RejectReason, Reliability, SharedNetwork, SimulatedSocket, UdpEndpoint,
};
pub use session::{
    ClientDisconnectReason, ClientEvent, ClientHandle, ClientInfo, ClientSession, ClientState,
    ClientStateKind, DisconnectReason, ServerEvent, ServerMessage, ServerStats, SessionServer,
    Simulation,
};
pub use snapshot::{EntityState, InterpolatedEntity, PlayoutBuffer, WorldState};
