use std::collections::HashMap;
use std::time::Duration;

use glam::{Quat, Vec3};

use netsync::{ClientHandle, EntityState, Simulation, WorldState};

pub const ENTITY_AVATAR: u8 = 1;
pub const ENTITY_PROJECTILE: u8 = 2;

/// Client message asking the avatar to fire.
pub const COMMAND_FIRE: u8 = b'F';

const ORBIT_RADIUS: f32 = 8.0;
const ORBIT_SPEED: f32 = 0.5;
const PROJECTILE_SPEED: f32 = 15.0;
const GRAVITY: f32 = 9.8;

#[derive(Debug, Clone)]
struct Body {
    entity_type: u8,
    position: Vec3,
    velocity: Vec3,
    orientation: Quat,
}

/// Demo world: every client owns an avatar circling the origin and may
/// lob projectiles that fall back to the ground.
#[derive(Debug, Default)]
pub struct Arena {
    bodies: HashMap<u32, Body>,
    avatars: HashMap<ClientHandle, u32>,
    next_id: u32,
    elapsed: f32,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn entity_count(&self) -> usize {
        self.bodies.len()
    }

    fn spawn(&mut self, body: Body) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.bodies.insert(id, body);
        id
    }

    fn fire(&mut self, handle: ClientHandle) {
        let Some(origin) = self
            .avatars
            .get(&handle)
            .and_then(|id| self.bodies.get(id))
        else {
            return;
        };
        let forward = origin.orientation * Vec3::NEG_Z;
        let projectile = Body {
            entity_type: ENTITY_PROJECTILE,
            position: origin.position + Vec3::Y,
            velocity: forward * PROJECTILE_SPEED + Vec3::Y * 5.0,
            orientation: origin.orientation,
        };
        let id = self.spawn(projectile);
        log::debug!("Client {:?} fired projectile {}", handle, id);
    }
}

impl Simulation for Arena {
    fn advance(&mut self, _tick: u32, dt: Duration) {
        let dt = dt.as_secs_f32();
        self.elapsed += dt;

        let mut landed = Vec::new();
        for (&id, body) in self.bodies.iter_mut() {
            match body.entity_type {
                ENTITY_AVATAR => {
                    let phase = self.elapsed * ORBIT_SPEED + id as f32;
                    let next = Vec3::new(phase.cos(), 0.0, phase.sin()) * ORBIT_RADIUS;
                    body.velocity = (next - body.position) / dt.max(f32::EPSILON);
                    body.position = next;
                    body.orientation = Quat::from_rotation_y(-phase);
                }
                _ => {
                    body.velocity.y -= GRAVITY * dt;
                    body.position += body.velocity * dt;
                    if body.position.y < 0.0 {
                        landed.push(id);
                    }
                }
            }
        }

        for id in landed {
            self.bodies.remove(&id);
        }
    }

    fn capture(&self, tick: u32) -> WorldState {
        let mut world = WorldState::new(tick);
        for (&id, body) in &self.bodies {
            world.insert(
                id,
                EntityState::with_motion(
                    body.entity_type,
                    body.position,
                    body.velocity,
                    body.orientation,
                ),
            );
        }
        world
    }

    fn client_connected(&mut self, handle: ClientHandle) {
        let id = self.spawn(Body {
            entity_type: ENTITY_AVATAR,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        });
        self.avatars.insert(handle, id);
    }

    fn client_disconnected(&mut self, handle: ClientHandle) {
        if let Some(id) = self.avatars.remove(&handle) {
            self.bodies.remove(&id);
        }
    }

    fn client_message(&mut self, handle: ClientHandle, payload: &[u8]) {
        if payload.first() == Some(&COMMAND_FIRE) {
            self.fire(handle);
        }
    }
}
