use std::collections::VecDeque;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use super::entity::{EntityState, WorldState};

const CLOCK_CORRECTION_RATE: f64 = 0.1;
/// Drift in ticks beyond which the clock estimate snaps instead of easing.
const CLOCK_SNAP_TICKS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedEntity {
    pub id: u32,
    pub entity_type: u8,
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
    pub animation_state: u8,
    pub animation_frame: u8,
    pub flags: u16,
}

impl InterpolatedEntity {
    fn from_state(id: u32, state: &EntityState) -> Self {
        Self {
            id,
            entity_type: state.entity_type,
            position: state.position(),
            velocity: state.decode_velocity(),
            orientation: state.decode_orientation(),
            animation_state: state.animation_state,
            animation_frame: state.animation_frame,
            flags: state.flags,
        }
    }

    fn blend(id: u32, from: &EntityState, to: &EntityState, t: f32) -> Self {
        // Discrete fields snap to the newer state.
        let mut entity = Self::from_state(id, to);
        entity.position = from.position().lerp(to.position(), t);
        entity.velocity = from.decode_velocity().lerp(to.decode_velocity(), t);
        entity.orientation = from.decode_orientation().slerp(to.decode_orientation(), t);
        entity
    }
}

/// Jitter buffer that plays received world states back a fixed delay behind
/// the estimated server clock.
#[derive(Debug)]
pub struct PlayoutBuffer {
    states: VecDeque<WorldState>,
    capacity: usize,
    tick_duration: Duration,
    delay: Duration,
    /// Server tick believed current at the paired instant.
    clock: Option<(f64, Instant)>,
}

impl PlayoutBuffer {
    pub fn new(capacity: usize, tick_duration: Duration, delay: Duration) -> Self {
        Self {
            states: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
            tick_duration,
            delay,
            clock: None,
        }
    }

    pub fn set_tick_duration(&mut self, tick_duration: Duration) {
        self.tick_duration = tick_duration;
    }

    fn ticks_in(&self, duration: Duration) -> f64 {
        let tick = self.tick_duration.as_secs_f64();
        if tick > 0.0 {
            duration.as_secs_f64() / tick
        } else {
            0.0
        }
    }

    pub fn push(&mut self, state: WorldState, now: Instant) {
        let observed = state.tick as f64;
        match self.estimated_tick(now) {
            Some(predicted) if (observed - predicted).abs() <= CLOCK_SNAP_TICKS => {
                // Only pull forward from fresh news; late arrivals say nothing about the clock.
                if observed > predicted {
                    let corrected = predicted + (observed - predicted) * CLOCK_CORRECTION_RATE;
                    self.clock = Some((corrected, now));
                } else {
                    self.clock = Some((predicted, now));
                }
            }
            _ => self.clock = Some((observed, now)),
        }

        let position = self.states.iter().position(|s| s.tick >= state.tick);
        match position {
            Some(index) if self.states[index].tick == state.tick => return,
            Some(index) => self.states.insert(index, state),
            None => self.states.push_back(state),
        }
        while self.states.len() > self.capacity {
            self.states.pop_front();
        }
    }

    pub fn estimated_tick(&self, now: Instant) -> Option<f64> {
        self.clock
            .map(|(tick, at)| tick + self.ticks_in(now.saturating_duration_since(at)))
    }

    /// The tick being presented at `now`.
    pub fn render_tick(&self, now: Instant) -> Option<f64> {
        self.estimated_tick(now)
            .map(|tick| (tick - self.ticks_in(self.delay)).max(0.0))
    }

    pub fn sample(&mut self, now: Instant) -> Vec<InterpolatedEntity> {
        let Some(render) = self.render_tick(now) else {
            return Vec::new();
        };
        let (Some(first), Some(last)) = (self.states.front(), self.states.back()) else {
            return Vec::new();
        };

        if render <= first.tick as f64 {
            return Self::snapshot_entities(first);
        }
        if render >= last.tick as f64 {
            return Self::snapshot_entities(last);
        }

        let Some(to_index) = self.states.iter().position(|s| s.tick as f64 >= render) else {
            return Vec::new();
        };
        let from_index = to_index.saturating_sub(1);

        // Everything before the lower bracket is no longer needed.
        for _ in 0..from_index {
            self.states.pop_front();
        }

        let from = &self.states[0];
        let to = &self.states[1.min(self.states.len() - 1)];
        let span = to.tick.wrapping_sub(from.tick) as f64;
        let t = if span > 0.0 {
            ((render - from.tick as f64) / span).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };

        to.entities
            .iter()
            .map(|(&id, to_state)| match from.entities.get(&id) {
                Some(from_state) => InterpolatedEntity::blend(id, from_state, to_state, t),
                None => InterpolatedEntity::from_state(id, to_state),
            })
            .collect()
    }

    fn snapshot_entities(state: &WorldState) -> Vec<InterpolatedEntity> {
        state
            .entities
            .iter()
            .map(|(&id, entity)| InterpolatedEntity::from_state(id, entity))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn latest_tick(&self) -> Option<u32> {
        self.states.back().map(|s| s.tick)
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.clock = None;
    }
}
