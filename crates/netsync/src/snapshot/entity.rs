use std::collections::BTreeMap;

use glam::{Quat, Vec3};

/// Replicated state of one entity, quantised for the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub entity_type: u8,
    pub position: [f32; 3],
    /// Centimetres per second.
    pub velocity: [i16; 3],
    /// Quaternion components scaled by 32767.
    pub orientation: [i16; 4],
    pub animation_state: u8,
    pub animation_frame: u8,
    pub flags: u16,
}

impl Default for EntityState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EntityState {
    pub const MAX_VELOCITY: f32 = 327.67;

    pub fn new(entity_type: u8) -> Self {
        Self {
            entity_type,
            position: [0.0; 3],
            velocity: [0; 3],
            orientation: [0, 0, 0, 32767],
            animation_state: 0,
            animation_frame: 0,
            flags: 0,
        }
    }

    pub fn with_motion(entity_type: u8, position: Vec3, velocity: Vec3, orientation: Quat) -> Self {
        let mut state = Self::new(entity_type);
        state.position = position.into();
        state.encode_velocity(velocity);
        state.encode_orientation(orientation);
        state
    }

    pub fn encode_velocity(&mut self, vel: Vec3) {
        let clamped = vel.clamp(Vec3::splat(-Self::MAX_VELOCITY), Vec3::splat(Self::MAX_VELOCITY));
        self.velocity = [
            (clamped.x * 100.0) as i16,
            (clamped.y * 100.0) as i16,
            (clamped.z * 100.0) as i16,
        ];
    }

    pub fn decode_velocity(&self) -> Vec3 {
        Vec3::new(
            self.velocity[0] as f32,
            self.velocity[1] as f32,
            self.velocity[2] as f32,
        ) / 100.0
    }

    pub fn encode_orientation(&mut self, quat: Quat) {
        let q = quat.normalize();
        self.orientation = [
            (q.x.clamp(-1.0, 1.0) * 32767.0) as i16,
            (q.y.clamp(-1.0, 1.0) * 32767.0) as i16,
            (q.z.clamp(-1.0, 1.0) * 32767.0) as i16,
            (q.w.clamp(-1.0, 1.0) * 32767.0) as i16,
        ];
    }

    pub fn decode_orientation(&self) -> Quat {
        let [x, y, z, w] = self.orientation.map(|c| c as f32 / 32767.0);
        let quat = Quat::from_xyzw(x, y, z, w);
        if quat.length_squared() > f32::EPSILON {
            quat.normalize()
        } else {
            Quat::IDENTITY
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    /// Equality that treats floats by bit pattern, so NaN and -0.0 survive.
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.position.map(f32::to_bits) == other.position.map(f32::to_bits)
            && self.velocity == other.velocity
            && self.orientation == other.orientation
            && self.animation_state == other.animation_state
            && self.animation_frame == other.animation_frame
            && self.flags == other.flags
    }
}

/// Every replicated entity at one simulation tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    pub tick: u32,
    pub entities: BTreeMap<u32, EntityState>,
}

impl WorldState {
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            entities: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: u32, state: EntityState) {
        self.entities.insert(id, state);
    }

    pub fn get(&self, id: u32) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.entities.len() == other.entities.len()
            && self
                .entities
                .iter()
                .zip(other.entities.iter())
                .all(|((a_id, a), (b_id, b))| a_id == b_id && a.bitwise_eq(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_quantisation() {
        let mut state = EntityState::new(0);
        state.encode_velocity(Vec3::new(10.5, -5.25, 1000.0));

        let vel = state.decode_velocity();
        assert!((vel.x - 10.5).abs() < 0.01);
        assert!((vel.y + 5.25).abs() < 0.01);
        assert!((vel.z - EntityState::MAX_VELOCITY).abs() < 0.01);
    }

    #[test]
    fn test_orientation_quantisation() {
        let quat = Quat::from_rotation_y(1.2);
        let state = EntityState::with_motion(1, Vec3::ZERO, Vec3::ZERO, quat);
        let decoded = state.decode_orientation();
        assert!(decoded.dot(quat).abs() > 0.9999);
    }

    #[test]
    fn test_zero_orientation_decodes_to_identity() {
        let mut state = EntityState::new(0);
        state.orientation = [0; 4];
        assert_eq!(state.decode_orientation(), Quat::IDENTITY);
    }

    #[test]
    fn test_bitwise_eq_distinguishes_signed_zero() {
        let a = EntityState::new(0);
        let mut b = a;
        b.position[0] = -0.0;
        assert_eq!(a, b);
        assert!(!a.bitwise_eq(&b));
    }
}
