//! Per-field delta encoding of [`WorldState`] against an acknowledged
//! baseline.
//!
//! Layout: `varint changed_count`, then per changed entity in ascending id
//! order `varint id | 7-bit field mask | changed fields`, then
//! `varint removed_count | varint id...`. Entities missing from the baseline
//! are encoded against [`EntityState::default`].

use crate::net::{BitReader, BitWriter, PacketError};

use super::entity::{EntityState, WorldState};

const FIELD_TYPE: u8 = 1 << 0;
const FIELD_POSITION: u8 = 1 << 1;
const FIELD_VELOCITY: u8 = 1 << 2;
const FIELD_ORIENTATION: u8 = 1 << 3;
const FIELD_ANIM_STATE: u8 = 1 << 4;
const FIELD_ANIM_FRAME: u8 = 1 << 5;
const FIELD_FLAGS: u8 = 1 << 6;
const FIELD_BITS: u32 = 7;

fn changed_fields(base: &EntityState, current: &EntityState) -> u8 {
    let mut mask = 0;
    if base.entity_type != current.entity_type {
        mask |= FIELD_TYPE;
    }
    if base.position.map(f32::to_bits) != current.position.map(f32::to_bits) {
        mask |= FIELD_POSITION;
    }
    if base.velocity != current.velocity {
        mask |= FIELD_VELOCITY;
    }
    if base.orientation != current.orientation {
        mask |= FIELD_ORIENTATION;
    }
    if base.animation_state != current.animation_state {
        mask |= FIELD_ANIM_STATE;
    }
    if base.animation_frame != current.animation_frame {
        mask |= FIELD_ANIM_FRAME;
    }
    if base.flags != current.flags {
        mask |= FIELD_FLAGS;
    }
    mask
}

fn write_fields(writer: &mut BitWriter, mask: u8, state: &EntityState) {
    writer.write_bits(mask as u64, FIELD_BITS);
    if mask & FIELD_TYPE != 0 {
        writer.write_u8(state.entity_type);
    }
    if mask & FIELD_POSITION != 0 {
        for component in state.position {
            writer.write_f32(component);
        }
    }
    if mask & FIELD_VELOCITY != 0 {
        for component in state.velocity {
            writer.write_i16(component);
        }
    }
    if mask & FIELD_ORIENTATION != 0 {
        for component in state.orientation {
            writer.write_i16(component);
        }
    }
    if mask & FIELD_ANIM_STATE != 0 {
        writer.write_u8(state.animation_state);
    }
    if mask & FIELD_ANIM_FRAME != 0 {
        writer.write_u8(state.animation_frame);
    }
    if mask & FIELD_FLAGS != 0 {
        writer.write_u16(state.flags);
    }
}

fn read_fields(reader: &mut BitReader<'_>, state: &mut EntityState) -> Result<(), PacketError> {
    let mask = reader.read_bits(FIELD_BITS)? as u8;
    if mask & FIELD_TYPE != 0 {
        state.entity_type = reader.read_u8()?;
    }
    if mask & FIELD_POSITION != 0 {
        for component in &mut state.position {
            *component = reader.read_f32()?;
        }
    }
    if mask & FIELD_VELOCITY != 0 {
        for component in &mut state.velocity {
            *component = reader.read_i16()?;
        }
    }
    if mask & FIELD_ORIENTATION != 0 {
        for component in &mut state.orientation {
            *component = reader.read_i16()?;
        }
    }
    if mask & FIELD_ANIM_STATE != 0 {
        state.animation_state = reader.read_u8()?;
    }
    if mask & FIELD_ANIM_FRAME != 0 {
        state.animation_frame = reader.read_u8()?;
    }
    if mask & FIELD_FLAGS != 0 {
        state.flags = reader.read_u16()?;
    }
    Ok(())
}

/// Encodes `current` relative to `baseline`, or in full when there is none.
pub fn encode_delta(baseline: Option<&WorldState>, current: &WorldState) -> Vec<u8> {
    let default_state = EntityState::default();
    let mut changed = Vec::new();

    for (&id, state) in &current.entities {
        let base = baseline
            .and_then(|b| b.entities.get(&id))
            .unwrap_or(&default_state);
        let is_new = baseline.is_none_or(|b| !b.entities.contains_key(&id));
        let mask = changed_fields(base, state);
        if mask != 0 || is_new {
            changed.push((id, mask, state));
        }
    }

    let removed: Vec<u32> = baseline
        .map(|b| {
            b.entities
                .keys()
                .filter(|id| !current.entities.contains_key(id))
                .copied()
                .collect()
        })
        .unwrap_or_default();

    let mut writer = BitWriter::new();
    writer.write_varint(changed.len() as u64);
    for (id, mask, state) in changed {
        writer.write_varint(id as u64);
        write_fields(&mut writer, mask, state);
    }
    writer.write_varint(removed.len() as u64);
    for id in removed {
        writer.write_varint(id as u64);
    }
    writer.finish()
}

/// Rebuilds the full state for `tick` from `baseline` and a delta produced
/// by [`encode_delta`].
pub fn apply_delta(
    baseline: Option<&WorldState>,
    tick: u32,
    data: &[u8],
) -> Result<WorldState, PacketError> {
    let mut state = WorldState {
        tick,
        entities: baseline.map(|b| b.entities.clone()).unwrap_or_default(),
    };
    let mut reader = BitReader::new(data);

    let changed = reader.read_varint()?;
    for _ in 0..changed {
        let id = read_id(&mut reader)?;
        let entity = state.entities.entry(id).or_default();
        read_fields(&mut reader, entity)?;
    }

    let removed = reader.read_varint()?;
    for _ in 0..removed {
        let id = read_id(&mut reader)?;
        if state.entities.remove(&id).is_none() {
            return Err(PacketError::Malformed("removed entity not in baseline"));
        }
    }

    if !reader.is_empty() {
        return Err(PacketError::Malformed("trailing snapshot bytes"));
    }
    Ok(state)
}

fn read_id(reader: &mut BitReader<'_>) -> Result<u32, PacketError> {
    u32::try_from(reader.read_varint()?).map_err(|_| PacketError::Malformed("entity id overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn world(tick: u32, entities: &[(u32, EntityState)]) -> WorldState {
        let mut state = WorldState::new(tick);
        for &(id, entity) in entities {
            state.insert(id, entity);
        }
        state
    }

    fn moving(x: f32) -> EntityState {
        EntityState::with_motion(
            1,
            Vec3::new(x, 2.0, 3.0),
            Vec3::new(1.0, 0.0, 0.0),
            Quat::from_rotation_z(0.5),
        )
    }

    #[test]
    fn test_full_snapshot_roundtrip() {
        let current = world(10, &[(1, moving(1.0)), (7, EntityState::new(2))]);
        let data = encode_delta(None, &current);
        let decoded = apply_delta(None, 10, &data).unwrap();
        assert!(decoded.bitwise_eq(&current));
    }

    #[test]
    fn test_delta_roundtrip_with_changes() {
        let baseline = world(100, &[(1, moving(1.0)), (2, moving(5.0)), (3, moving(9.0))]);

        let mut changed = moving(1.5);
        changed.flags = 0x8001;
        changed.position[2] = f32::NAN;
        let current = world(110, &[(1, changed), (3, moving(9.0)), (4, EntityState::new(3))]);

        let data = encode_delta(Some(&baseline), &current);
        let decoded = apply_delta(Some(&baseline), 110, &data).unwrap();
        assert!(decoded.bitwise_eq(&current));
        assert!(decoded.get(2).is_none());
    }

    #[test]
    fn test_unchanged_field_costs_nothing() {
        let baseline = world(100, &[(5, moving(1.0))]);
        let mut moved = moving(1.0);
        moved.position[0] = 4.0;
        let current = world(110, &[(5, moved)]);

        let data = encode_delta(Some(&baseline), &current);

        // count, id, 7-bit mask + three f32 position components, removed count.
        let bits = 8 + 8 + 7 + 96 + 8;
        assert_eq!(data.len(), (bits as usize).div_ceil(8));

        let mut reader = BitReader::new(&data);
        reader.read_varint().unwrap();
        reader.read_varint().unwrap();
        assert_eq!(reader.read_bits(7).unwrap() as u8, FIELD_POSITION);
    }

    #[test]
    fn test_identical_state_is_tiny() {
        let baseline = world(100, &[(1, moving(1.0)), (2, moving(2.0))]);
        let current = WorldState {
            tick: 101,
            ..baseline.clone()
        };
        assert_eq!(encode_delta(Some(&baseline), &current), vec![0, 0]);
    }

    #[test]
    fn test_new_entity_with_default_fields_still_sent() {
        let baseline = world(1, &[]);
        let current = world(2, &[(9, EntityState::default())]);
        let data = encode_delta(Some(&baseline), &current);
        let decoded = apply_delta(Some(&baseline), 2, &data).unwrap();
        assert!(decoded.get(9).is_some());
    }

    #[test]
    fn test_truncated_delta_is_error() {
        let current = world(10, &[(1, moving(1.0))]);
        let data = encode_delta(None, &current);
        assert!(apply_delta(None, 10, &data[..data.len() - 3]).is_err());
    }

    #[test]
    fn test_removal_of_unknown_entity_is_error() {
        let current = world(10, &[]);
        let baseline = world(5, &[(3, moving(0.0))]);
        let data = encode_delta(Some(&baseline), &current);
        assert!(apply_delta(None, 10, &data).is_err());
    }
}
