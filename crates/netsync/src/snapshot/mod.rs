mod buffer;
mod delta;
mod entity;
mod playout;

pub use buffer::SnapshotHistory;
pub use delta::{apply_delta, encode_delta};
pub use entity::{EntityState, WorldState};
pub use playout::{InterpolatedEntity, PlayoutBuffer};
