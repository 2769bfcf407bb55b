use crate::net::{BitReader, BitWriter, PacketError};

const KIND_SNAPSHOT: u8 = 0;
const KIND_EVENT: u8 = 1;

/// What the server puts into a client's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Unreliable delta snapshot; `baseline` is the tick it was encoded
    /// against, `None` for a full snapshot.
    Snapshot {
        tick: u32,
        baseline: Option<u32>,
        delta: Vec<u8>,
    },
    /// Reliable application event.
    Event(Vec<u8>),
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BitWriter::new();
        match self {
            ServerMessage::Snapshot {
                tick,
                baseline,
                delta,
            } => {
                writer.write_u8(KIND_SNAPSHOT);
                writer.write_u32(*tick);
                writer.write_u8(baseline.is_some() as u8);
                if let Some(baseline) = baseline {
                    writer.write_u32(*baseline);
                }
                writer.write_bytes(delta);
            }
            ServerMessage::Event(payload) => {
                writer.write_u8(KIND_EVENT);
                writer.write_bytes(payload);
            }
        }
        writer.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let mut reader = BitReader::new(data);
        match reader.read_u8()? {
            KIND_SNAPSHOT => {
                let tick = reader.read_u32()?;
                let baseline = match reader.read_u8()? {
                    0 => None,
                    1 => Some(reader.read_u32()?),
                    _ => return Err(PacketError::Malformed("bad baseline marker")),
                };
                Ok(ServerMessage::Snapshot {
                    tick,
                    baseline,
                    delta: reader.read_rest().to_vec(),
                })
            }
            KIND_EVENT => Ok(ServerMessage::Event(reader.read_rest().to_vec())),
            _ => Err(PacketError::Malformed("unknown server message")),
        }
    }
}
