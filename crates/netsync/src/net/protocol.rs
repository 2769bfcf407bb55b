use bitflags::bitflags;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::cursor::{BitReader, BitWriter, CursorError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 27015;
pub const MAX_MESSAGE_SIZE: usize = 16384;
pub const HEADER_SIZE: usize = 21;
/// Largest datagram either side will ever read.
pub const MAX_DATAGRAM_SIZE: usize = MAX_MESSAGE_SIZE + 1024;

/// Takes the place of the protocol version in connectionless datagrams.
pub const OOB_MARKER: u32 = u32::MAX;
pub const OOB_CONTROL: u8 = 1;
pub const OOB_INFO_REQUEST: u8 = 2;
pub const OOB_INFO_RESPONSE: u8 = 3;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u8 {
        const RELIABLE = 1 << 0;
        const UNRELIABLE = 1 << 1;
        const FRAGMENT = 1 << 2;
        /// Body is zero-run-length coded.
        const COMPRESSED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
    pub flags: PacketFlags,
    pub fragment_index: u16,
    pub fragment_total: u16,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32, flags: PacketFlags) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
            flags,
            fragment_index: 0,
            fragment_total: 1,
        }
    }

    pub fn fragment(mut self, index: u16, total: u16) -> Self {
        self.flags |= PacketFlags::FRAGMENT;
        self.fragment_index = index;
        self.fragment_total = total;
        self
    }

    pub fn is_fragment(&self) -> bool {
        self.flags.contains(PacketFlags::FRAGMENT)
    }

    pub fn is_valid(&self) -> bool {
        if self.version != PROTOCOL_VERSION {
            return false;
        }
        if self.is_fragment() {
            self.fragment_total > 1 && self.fragment_index < self.fragment_total
        } else {
            self.fragment_index == 0 && self.fragment_total == 1
        }
    }

    pub fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.version);
        writer.write_u32(self.sequence);
        writer.write_u32(self.ack);
        writer.write_u32(self.ack_bitfield);
        writer.write_u8(self.flags.bits());
        writer.write_u16(self.fragment_index);
        writer.write_u16(self.fragment_total);
    }

    /// Parses the fixed header and returns it with the payload that follows.
    pub fn read(data: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                len: data.len(),
                min: HEADER_SIZE,
            });
        }

        let mut reader = BitReader::new(data);
        let version = reader.read_u32()?;
        let sequence = reader.read_u32()?;
        let ack = reader.read_u32()?;
        let ack_bitfield = reader.read_u32()?;
        let raw_flags = reader.read_u8()?;
        let fragment_index = reader.read_u16()?;
        let fragment_total = reader.read_u16()?;

        let flags = PacketFlags::from_bits(raw_flags).ok_or(PacketError::Malformed("unknown flag bits"))?;
        let header = Self {
            version,
            sequence,
            ack,
            ack_bitfield,
            flags,
            fragment_index,
            fragment_total,
        };

        if version != PROTOCOL_VERSION {
            return Err(PacketError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        if !header.is_valid() {
            return Err(PacketError::Malformed("bad fragment fields"));
        }

        Ok((header, &data[HEADER_SIZE..]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum RejectReason {
    ServerFull,
    VersionMismatch,
    InvalidChallenge,
    Banned,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ServerFull => "server full",
            RejectReason::VersionMismatch => "protocol version mismatch",
            RejectReason::InvalidChallenge => "invalid challenge",
            RejectReason::Banned => "banned",
        }
    }
}

/// Handshake and teardown messages sent outside any channel.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ControlMessage {
    ConnectRequest {
        protocol_version: u32,
        client_nonce: u64,
        client_sequence: u32,
        max_rate: u32,
        challenge: Option<u64>,
    },
    Challenge {
        token: u64,
    },
    ConnectResponse {
        slot: u16,
        server_sequence: u32,
        tick_rate: u32,
    },
    Reject {
        reason: RejectReason,
    },
    Disconnect,
}

impl ControlMessage {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let body = rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)?;
        let mut writer = BitWriter::with_capacity(5 + body.len());
        write_oob_prefix(&mut writer, OOB_CONTROL);
        writer.write_bytes(&body);
        Ok(writer.finish())
    }

    /// Decodes the archived body that follows the out-of-band prefix.
    pub fn decode(body: &[u8]) -> Result<Self, PacketError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}

pub fn write_oob_prefix(writer: &mut BitWriter, kind: u8) {
    writer.write_u32(OOB_MARKER);
    writer.write_u8(kind);
}

/// A received datagram, split by what kind of traffic it carries.
#[derive(Debug)]
pub enum Datagram<'a> {
    Channel {
        header: PacketHeader,
        payload: &'a [u8],
    },
    Control(ControlMessage),
    InfoRequest(&'a [u8]),
    InfoResponse(&'a [u8]),
}

pub fn classify(data: &[u8]) -> Result<Datagram<'_>, PacketError> {
    if data.len() < 4 {
        return Err(PacketError::Truncated {
            len: data.len(),
            min: 4,
        });
    }

    let mut reader = BitReader::new(data);
    if reader.read_u32()? != OOB_MARKER {
        let (header, payload) = PacketHeader::read(data)?;
        return Ok(Datagram::Channel { header, payload });
    }

    let kind = reader.read_u8()?;
    let body = reader.read_rest();
    match kind {
        OOB_CONTROL => Ok(Datagram::Control(ControlMessage::decode(body)?)),
        OOB_INFO_REQUEST => Ok(Datagram::InfoRequest(body)),
        OOB_INFO_RESPONSE => Ok(Datagram::InfoResponse(body)),
        _ => Err(PacketError::Malformed("unknown out-of-band kind")),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than {min}")]
    Truncated { len: usize, min: usize },
    #[error("protocol version {got}, expected {expected}")]
    VersionMismatch { expected: u32, got: u32 },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("cursor: {0}")]
    Cursor(#[from] CursorError),
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
        assert!(!sequence_greater_than(7, 7));
    }

    #[test]
    fn test_header_layout_is_21_bytes() {
        let header = PacketHeader::new(0x0102_0304, 9, 0xFFFF_0000, PacketFlags::RELIABLE)
            .fragment(1, 3);
        let mut writer = BitWriter::new();
        header.write(&mut writer);
        let data = writer.finish();

        assert_eq!(data.len(), HEADER_SIZE);
        assert_eq!(&data[0..4], &PROTOCOL_VERSION.to_le_bytes());
        assert_eq!(&data[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(data[16], (PacketFlags::RELIABLE | PacketFlags::FRAGMENT).bits());

        let (parsed, rest) = PacketHeader::read(&data).unwrap();
        assert_eq!(parsed, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_header_rejects_bad_version() {
        let mut header = PacketHeader::new(1, 0, 0, PacketFlags::empty());
        header.version = 99;
        let mut writer = BitWriter::new();
        header.write(&mut writer);

        assert!(matches!(
            PacketHeader::read(writer.as_slice()),
            Err(PacketError::VersionMismatch { got: 99, .. })
        ));
    }

    #[test]
    fn test_header_rejects_bad_fragment_fields() {
        let header = PacketHeader::new(1, 0, 0, PacketFlags::UNRELIABLE).fragment(3, 3);
        let mut writer = BitWriter::new();
        header.write(&mut writer);

        assert!(matches!(
            PacketHeader::read(writer.as_slice()),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn test_header_rejects_unknown_flags() {
        let mut writer = BitWriter::new();
        PacketHeader::new(1, 0, 0, PacketFlags::empty()).write(&mut writer);
        let mut data = writer.finish();
        data[16] = 0x80;

        assert!(matches!(
            PacketHeader::read(&data),
            Err(PacketError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_datagram() {
        assert!(matches!(
            classify(&[1, 0, 0, 0, 5]),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_control_message_roundtrip() {
        let message = ControlMessage::ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            client_nonce: 0xDEAD_BEEF,
            client_sequence: 77,
            max_rate: 25_000,
            challenge: Some(42),
        };
        let data = message.encode().unwrap();

        match classify(&data).unwrap() {
            Datagram::Control(decoded) => assert_eq!(decoded, message),
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_garbage_control_body_is_error() {
        let mut writer = BitWriter::new();
        write_oob_prefix(&mut writer, OOB_CONTROL);
        writer.write_bytes(&[0xAB; 3]);

        assert!(classify(writer.as_slice()).is_err());
    }
}
