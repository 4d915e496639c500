//! Avatar controller: locomotion, collision, swimming, camera, and the
//! intents/events the rest of the client consumes.
//!
//! The controller owns the authoritative avatar position in the render
//! frame (feet). Each frame it integrates movement, sweeps the result
//! against buildings and doodads in bounded sub-steps, grounds against
//! the highest reachable floor, and advances the state machine, whose
//! transitions drive audio events and wire intents.

pub mod camera;
pub mod intents;
pub mod state;

use crate::constants::*;
use crate::events::{surface_for_texture, EventBus, GameEvent, SurfaceKind};
use crate::scene::m2::M2Scene;
use crate::scene::wmo::WmoScene;
use crate::world::terrain::TerrainScene;
use crate::world::water::WaterScene;
use camera::{CameraFrame, OrbitCamera};
use glam::Vec3;
use intents::{FootstepTracker, IntentTracker, MoveFlags};
use state::{Locomotion, MoveState, StateInputs};

/// Sampled input for one frame. Button fields are level-triggered
/// except `jump_pressed`, which is the press edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerInput {
    pub forward: bool,
    pub backward: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub turn_left: bool,
    pub turn_right: bool,
    pub jump_pressed: bool,
    pub walk: bool,
    pub sit: bool,
    pub autorun: bool,
    pub right_mouse: bool,
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    pub scroll: f32,
    pub mounted: bool,
    pub emote_active: bool,
    pub combat_with_target: bool,
    pub melee_swing: bool,
    pub charging: bool,
}

impl PlayerInput {
    fn any(&self) -> bool {
        self.forward
            || self.backward
            || self.strafe_left
            || self.strafe_right
            || self.turn_left
            || self.turn_right
            || self.jump_pressed
            || self.mouse_dx != 0.0
            || self.mouse_dy != 0.0
            || self.scroll != 0.0
    }
}

/// Collision and query surfaces the controller walks against.
pub struct CollisionWorld<'a> {
    pub terrain: &'a TerrainScene,
    pub wmo: &'a mut WmoScene,
    pub m2: &'a mut M2Scene,
    pub water: &'a WaterScene,
}

/// Gait cycle lengths in meters, for footstep phase.
const STRIDE_RUN: f32 = 2.4;
const STRIDE_WALK: f32 = 1.6;
const STRIDE_MOUNT: f32 = 3.2;
/// Landing faster than this is a hard landing.
const HARD_LANDING_SPEED: f32 = 12.0;
/// Seconds between idle snorts/stomps while mounted and standing.
const MOUNT_IDLE_INTERVAL: f32 = 8.0;

pub struct PlayerController {
    /// Feet position, render frame.
    pub position: Vec3,
    pub velocity: Vec3,
    /// Facing yaw, radians.
    pub yaw: f32,
    pub camera: OrbitCamera,
    pub free_fly: bool,
    pub use_wow_speed: bool,
    locomotion: Locomotion,
    intents: IntentTracker,
    footsteps: FootstepTracker,
    grounded: bool,
    swimming: bool,
    diving: bool,
    jump_buffer: f32,
    coyote: f32,
    anim_phase: f32,
    mount_idle: f32,
    /// False until the avatar has stood on the ground once; the
    /// initial spawn settle is not a landing.
    ever_grounded: bool,
}

impl PlayerController {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            camera: OrbitCamera::default(),
            free_fly: false,
            use_wow_speed: true,
            locomotion: Locomotion::default(),
            intents: IntentTracker::new(),
            footsteps: FootstepTracker::default(),
            grounded: false,
            swimming: false,
            diving: false,
            jump_buffer: 0.0,
            coyote: 0.0,
            anim_phase: 0.0,
            mount_idle: 0.0,
            ever_grounded: false,
        }
    }

    pub fn state(&self) -> MoveState {
        self.locomotion.state()
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    pub fn is_swimming(&self) -> bool {
        self.swimming
    }

    pub fn intents_mut(&mut self) -> &mut IntentTracker {
        &mut self.intents
    }

    /// Highest reachable floor under the avatar, sampled over a small
    /// cross footprint so single missing triangles do not drop us.
    fn ground_height(&self, world: &mut CollisionWorld<'_>) -> Option<f32> {
        let p = self.position;
        let offsets = [
            (0.0, 0.0),
            (GROUND_FOOTPRINT, 0.0),
            (-GROUND_FOOTPRINT, 0.0),
            (0.0, GROUND_FOOTPRINT),
            (0.0, -GROUND_FOOTPRINT),
        ];
        let mut best: Option<f32> = None;
        for (dx, dy) in offsets {
            let (x, y) = (p.x + dx, p.y + dy);
            let mut candidate: Option<f32> = world.terrain.height_at(x, y);
            if let Some((z, _)) = world.wmo.floor_height(x, y, p.z) {
                candidate = Some(candidate.map_or(z, |c| c.max(z)));
            }
            if let Some((z, _)) = world.m2.floor_height(x, y, p.z) {
                candidate = Some(candidate.map_or(z, |c| c.max(z)));
            }
            if let Some(z) = candidate {
                if best.map_or(true, |b| z > b) {
                    best = Some(z);
                }
            }
        }
        best
    }

    fn surface_under(&self, world: &mut CollisionWorld<'_>) -> SurfaceKind {
        if self.swimming {
            return SurfaceKind::Water;
        }
        world
            .terrain
            .dominant_texture_at(self.position.x, self.position.y)
            .map(surface_for_texture)
            .unwrap_or(SurfaceKind::Dirt)
    }

    /// Advance one frame; returns the camera frame for rendering.
    pub fn update(
        &mut self,
        dt: f32,
        input: &PlayerInput,
        world: &mut CollisionWorld<'_>,
        events: &mut EventBus,
    ) -> CameraFrame {
        if input.any() {
            self.camera.notify_input();
        }
        self.camera.handle_mouse(input.mouse_dx, input.mouse_dy);
        if input.scroll != 0.0 {
            self.camera.handle_scroll(input.scroll);
        }

        // Facing and strafe resolution. With right-mouse (or autorun)
        // the character follows the camera and A/D strafe; otherwise
        // A/D turn at a fixed rate.
        let camera_steers = input.right_mouse || input.autorun;
        let mut strafe_left = input.strafe_left;
        let mut strafe_right = input.strafe_right;
        if camera_steers {
            self.yaw = self.camera.yaw;
            strafe_left |= input.turn_left;
            strafe_right |= input.turn_right;
        } else {
            let turn = (input.turn_left as i32 - input.turn_right as i32) as f32;
            self.yaw += turn * TURN_SPEED_DEG.to_radians() * dt;
        }

        let forward_dir = Vec3::new(self.yaw.cos(), self.yaw.sin(), 0.0);
        let right_dir = Vec3::new(self.yaw.sin(), -self.yaw.cos(), 0.0);
        let moving_forward = input.forward || input.autorun;
        let mut wish = Vec3::ZERO;
        if moving_forward {
            wish += forward_dir;
        }
        if input.backward {
            wish -= forward_dir;
        }
        if strafe_right {
            wish += right_dir;
        }
        if strafe_left {
            wish -= right_dir;
        }
        let wish = wish.normalize_or_zero();
        let moving = wish != Vec3::ZERO;

        let mut base_speed = if input.backward && !moving_forward {
            BACK_SPEED
        } else if input.walk {
            WALK_SPEED
        } else {
            RUN_SPEED
        };
        if !self.use_wow_speed {
            // Debug stride: double speed, authentic feel be damned.
            base_speed *= 2.0;
        }
        let speed = if self.swimming {
            base_speed * SWIM_SPEED_FACTOR
        } else {
            base_speed
        };

        // Water state. Standing in shallow water keeps walking; deep
        // water (no floor within the surface-lock offset) swims.
        let water_height = world.water.water_height_at(self.position.x, self.position.y);
        let was_swimming = self.swimming;
        match water_height {
            Some(h) if h - self.position.z > SWIM_ENTER_DEPTH => {
                let ground = self.ground_height(world);
                let wadeable = ground.map_or(false, |g| h - g <= WATER_SURFACE_OFFSET);
                self.swimming = !wadeable;
            }
            _ => self.swimming = false,
        }
        if self.swimming != was_swimming {
            events.emit(if self.swimming {
                GameEvent::WaterEnter
            } else {
                GameEvent::WaterExit
            });
        }
        if !self.swimming {
            self.diving = false;
        }

        // Vertical integration.
        self.jump_buffer = (self.jump_buffer - dt).max(0.0);
        self.coyote = (self.coyote - dt).max(0.0);
        if input.jump_pressed {
            self.jump_buffer = JUMP_BUFFER;
        }

        if self.swimming {
            let surface = water_height.unwrap_or(self.position.z);
            self.diving = moving_forward && self.camera.pitch < -DIVE_PITCH_DEG.to_radians();
            if input.jump_pressed || self.jump_buffer > 0.0 {
                // Space is swim-up.
                self.velocity.z = speed;
                self.jump_buffer = 0.0;
            } else if self.diving {
                self.velocity.z = self.camera.pitch.sin() * speed;
            } else {
                // Surface lock: ease feet toward the settle depth.
                let target = surface - WATER_SURFACE_OFFSET;
                self.velocity.z =
                    ((target - self.position.z) * 4.0).clamp(SWIM_SINK_SPEED, SWIM_BUOYANCY);
            }
            self.grounded = false;
        } else {
            let gravity = if self.free_fly { FREEFLY_GRAVITY } else { GRAVITY };
            let jump_velocity = if self.free_fly {
                FREEFLY_JUMP_VELOCITY
            } else {
                JUMP_VELOCITY
            };
            self.velocity.z += gravity * dt;
            if self.jump_buffer > 0.0 && (self.grounded || self.coyote > 0.0) {
                self.velocity.z = jump_velocity;
                self.grounded = false;
                self.coyote = 0.0;
                self.jump_buffer = 0.0;
                self.intents.jumped();
                events.emit(GameEvent::Jump);
            }
        }

        let jump_started = !self.grounded && self.velocity.z > 0.0 && !self.swimming;

        // Horizontal sweep in bounded sub-steps against buildings and
        // doodads, composed in that order.
        let radius = if world.wmo.is_inside_wmo(self.position) {
            PLAYER_RADIUS_INDOOR
        } else {
            PLAYER_RADIUS
        };
        let horizontal = wish * speed * dt;
        let distance = horizontal.length();
        if distance > 0.0 {
            let steps = (distance / SWEEP_SUB_STEP).ceil().max(1.0) as usize;
            let step = horizontal / steps as f32;
            for _ in 0..steps {
                let from = self.position;
                let mut to = from + step;
                if let Some(adjusted) = world.wmo.check_collision(from, to, radius) {
                    to = adjusted;
                }
                if let Some(adjusted) = world.m2.check_collision(from, to, radius) {
                    to = adjusted;
                }
                self.position.x = to.x;
                self.position.y = to.y;
            }
        }

        // Vertical move, then grounding.
        let fall_speed = -self.velocity.z;
        self.position.z += self.velocity.z * dt;
        let was_grounded = self.grounded;
        let ground = self.ground_height(world);
        match ground {
            Some(g) if self.position.z <= g + 1e-3 && self.velocity.z <= 0.0 && !self.swimming => {
                self.position.z = g;
                self.velocity.z = 0.0;
                self.grounded = true;
                self.coyote = COYOTE_TIME;
                if !was_grounded && self.ever_grounded {
                    let surface = self.surface_under(world);
                    events.emit(GameEvent::Landing {
                        surface,
                        hard: fall_speed > HARD_LANDING_SPEED,
                    });
                    self.intents.landed();
                }
                self.ever_grounded = true;
            }
            _ => {
                if was_grounded && !self.swimming {
                    self.coyote = COYOTE_TIME;
                }
                self.grounded = false;
            }
        }

        // State machine.
        let state_inputs = StateInputs {
            moving: moving_forward || strafe_left || strafe_right,
            moving_backward: input.backward,
            grounded: self.grounded,
            jump_started,
            falling: !self.grounded && self.velocity.z < 0.0,
            walking: input.walk,
            sitting: input.sit,
            swimming: self.swimming,
            melee_swing: input.melee_swing,
            mounted: input.mounted,
            charging: input.charging,
            emote_active: input.emote_active,
            combat_with_target: input.combat_with_target,
        };
        let previous = self.locomotion.step(&state_inputs, dt);
        if previous.is_some() && input.melee_swing && self.state() == MoveState::MeleeSwing {
            events.emit(GameEvent::MeleeSwing);
        }

        // Footsteps off the gait phase.
        let state = self.state();
        if state.has_footsteps() && moving {
            let stride = match state {
                MoveState::Walk => STRIDE_WALK,
                MoveState::Mount => STRIDE_MOUNT,
                _ => STRIDE_RUN,
            };
            self.anim_phase = (self.anim_phase + speed * dt / stride).fract();
            let contacts: &[f32] = if state == MoveState::Mount {
                &MOUNT_FOOTSTEP_PHASES
            } else {
                &FOOTSTEP_PHASES
            };
            let hits = self.footsteps.crossings(self.anim_phase, contacts);
            if hits > 0 {
                let surface = self.surface_under(world);
                for _ in 0..hits {
                    events.emit(GameEvent::Footstep {
                        surface,
                        sprinting: !input.walk,
                    });
                }
            }
        } else {
            self.anim_phase = 0.0;
            self.footsteps.reset();
        }

        if state == MoveState::Mount && !moving {
            self.mount_idle += dt;
            if self.mount_idle >= MOUNT_IDLE_INTERVAL {
                self.mount_idle = 0.0;
                events.emit(GameEvent::MountIdleSound);
            }
        } else {
            self.mount_idle = 0.0;
        }

        // Wire intents.
        self.intents.update(
            MoveFlags {
                forward: moving_forward,
                backward: input.backward,
                strafe_left,
                strafe_right,
                turn_left: input.turn_left && !camera_steers,
                turn_right: input.turn_right && !camera_steers,
                swimming: self.swimming,
            },
            dt,
        );

        // Camera, collided against walls only.
        let wmo = &mut *world.wmo;
        let m2 = &mut *world.m2;
        self.camera.update(dt, self.position, |origin, dir, max| {
            let a = wmo.raycast_walls(origin, dir, max);
            let b = m2.raycast_bounding_boxes(origin, dir, max);
            match (a, b) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            }
        })
    }
}
