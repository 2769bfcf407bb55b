mod channel;
mod compress;
mod cursor;
mod fragment;
mod protocol;
mod rate;
mod simulator;
mod socket;
mod stats;
mod tracking;

pub use channel::{ChannelFault, ChannelSettings, Message, MessageChannel, Receipt, Reliability};
pub use compress::{CompressError, compress_zero_runs, compression_ratio, decompress_zero_runs};
pub use cursor::{BitReader, BitWriter, CursorError};
pub use fragment::{FragmentAssembler, FragmentOutcome, fragment_count, split_even};
pub use protocol::{
    ControlMessage, Datagram, HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_MESSAGE_SIZE, OOB_CONTROL,
    OOB_INFO_REQUEST, OOB_INFO_RESPONSE, OOB_MARKER, DEFAULT_PORT, PROTOCOL_VERSION, PacketError,
    PacketFlags, PacketHeader, RejectReason, classify, sequence_greater_than, write_oob_prefix,
};
pub use rate::{PacketLossMeter, RateLimiter, RateMeter};
pub use simulator::{LinkConditions, LossySocket, NetworkSimulator, SharedNetwork, SimulatedSocket};
pub use socket::{DatagramSocket, UdpEndpoint, is_transient};
pub use stats::NetworkStats;
pub use tracking::{ACK_WINDOW, AckOutcome, AckTracker, ReceiveTracker, SentPacket};
