//! Connectionless server-info frames.
//!
//! Request: `marker | INFO_REQUEST | u32 request_id`.
//! Response: `marker | INFO_RESPONSE | u32 request_id | varint count`
//! followed by `u8 tag | varint len | bytes` entries. Readers skip tags they
//! do not know.

use crate::net::{
    BitReader, BitWriter, OOB_INFO_REQUEST, OOB_INFO_RESPONSE, PacketError, write_oob_prefix,
};

const TAG_NAME: u8 = 1;
const TAG_MAP: u8 = 2;
const TAG_PLAYERS: u8 = 3;
const TAG_MAX_PLAYERS: u8 = 4;
const TAG_PROTOCOL: u8 = 5;
const MAX_ENTRIES: u64 = 64;
const MAX_ENTRY_BYTES: u64 = 256;

pub fn encode_request(request_id: u32) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(9);
    write_oob_prefix(&mut writer, OOB_INFO_REQUEST);
    writer.write_u32(request_id);
    writer.finish()
}

/// Parses the body that follows the out-of-band prefix.
pub fn decode_request(body: &[u8]) -> Result<u32, PacketError> {
    Ok(BitReader::new(body).read_u32()?)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoResponse {
    pub request_id: u32,
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
    pub protocol_version: u32,
}

impl InfoResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BitWriter::new();
        write_oob_prefix(&mut writer, OOB_INFO_RESPONSE);
        writer.write_u32(self.request_id);
        writer.write_varint(5);

        write_entry(&mut writer, TAG_NAME, clip(&self.name));
        write_entry(&mut writer, TAG_MAP, clip(&self.map));
        write_entry(&mut writer, TAG_PLAYERS, &self.players.to_le_bytes());
        write_entry(&mut writer, TAG_MAX_PLAYERS, &self.max_players.to_le_bytes());
        write_entry(&mut writer, TAG_PROTOCOL, &self.protocol_version.to_le_bytes());
        writer.finish()
    }

    pub fn decode(body: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BitReader::new(body);
        let mut response = InfoResponse {
            request_id: reader.read_u32()?,
            ..Default::default()
        };

        let count = reader.read_varint()?;
        if count > MAX_ENTRIES {
            return Err(PacketError::Malformed("too many info entries"));
        }

        for _ in 0..count {
            let tag = reader.read_u8()?;
            let len = reader.read_varint()?;
            if len > MAX_ENTRY_BYTES {
                return Err(PacketError::Malformed("info entry too long"));
            }
            let value = reader.read_bytes(len as usize)?;
            match tag {
                TAG_NAME => response.name = read_text(value)?,
                TAG_MAP => response.map = read_text(value)?,
                TAG_PLAYERS => response.players = read_number(&value)?,
                TAG_MAX_PLAYERS => response.max_players = read_number(&value)?,
                TAG_PROTOCOL => response.protocol_version = read_number(&value)?,
                _ => {}
            }
        }
        Ok(response)
    }
}

fn write_entry(writer: &mut BitWriter, tag: u8, value: &[u8]) {
    writer.write_u8(tag);
    writer.write_blob(value);
}

/// Longest prefix of `text` that fits in one entry, cut on a char boundary.
fn clip(text: &str) -> &[u8] {
    let mut end = text.len().min(MAX_ENTRY_BYTES as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text.as_bytes()[..end]
}

fn read_text(value: Vec<u8>) -> Result<String, PacketError> {
    String::from_utf8(value).map_err(|_| PacketError::Malformed("info text is not utf-8"))
}

fn read_number(value: &[u8]) -> Result<u32, PacketError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| PacketError::Malformed("info number is not 4 bytes"))?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Datagram, classify};

    #[test]
    fn test_request_frame() {
        let data = encode_request(0xABCD);
        assert_eq!(data.len(), 9);
        match classify(&data).unwrap() {
            Datagram::InfoRequest(body) => assert_eq!(decode_request(body).unwrap(), 0xABCD),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_frame() {
        let response = InfoResponse {
            request_id: 3,
            name: "frag fest".into(),
            map: "dm1".into(),
            players: 5,
            max_players: 16,
            protocol_version: 1,
        };
        let data = response.encode();
        match classify(&data).unwrap() {
            Datagram::InfoResponse(body) => assert_eq!(InfoResponse::decode(body).unwrap(), response),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tags_skipped() {
        let mut writer = BitWriter::new();
        writer.write_u32(8);
        writer.write_varint(2);
        write_entry(&mut writer, 99, b"future field");
        write_entry(&mut writer, TAG_MAP, b"e1m1");

        let decoded = InfoResponse::decode(writer.as_slice()).unwrap();
        assert_eq!(decoded.request_id, 8);
        assert_eq!(decoded.map, "e1m1");
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let mut writer = BitWriter::new();
        writer.write_u32(1);
        writer.write_varint(1);
        writer.write_u8(TAG_NAME);
        writer.write_varint(1 << 61);
        writer.write_bytes(b"x");
        assert!(matches!(
            InfoResponse::decode(writer.as_slice()),
            Err(PacketError::Malformed(_))
        ));

        let mut writer = BitWriter::new();
        writer.write_u32(1);
        writer.write_varint(1);
        writer.write_u8(99);
        writer.write_varint(200);
        writer.write_bytes(b"cut short");
        assert!(InfoResponse::decode(writer.as_slice()).is_err());
    }

    #[test]
    fn test_long_name_clipped_on_encode() {
        let response = InfoResponse {
            name: "é".repeat(200),
            ..Default::default()
        };
        let data = response.encode();
        let Datagram::InfoResponse(body) = classify(&data).unwrap() else {
            panic!("not an info response");
        };
        let decoded = InfoResponse::decode(body).unwrap();
        assert_eq!(decoded.name, "é".repeat(128));
    }

    #[test]
    fn test_bad_number_rejected() {
        let mut writer = BitWriter::new();
        writer.write_u32(1);
        writer.write_varint(1);
        write_entry(&mut writer, TAG_PLAYERS, &[1, 2]);
        assert!(InfoResponse::decode(writer.as_slice()).is_err());
    }
}
