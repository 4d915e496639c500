//! World-grid and locomotion constants.
//!
//! The grid values are fixed by the 3.3.5a client data and must not be
//! made configurable; everything here is in render-frame meters unless
//! stated otherwise.

/// Width of one terrain tile. The world is a 64x64 grid of these.
pub const TILE_SIZE: f32 = 533.33333;

/// Width of one terrain chunk; a tile is 16x16 chunks.
pub const CHUNK_SIZE: f32 = TILE_SIZE / 16.0;

/// Heightfield quad size; a chunk is an 8x8 grid of quads.
pub const CHUNK_UNIT: f32 = CHUNK_SIZE / 8.0;

/// Center of the tile grid. Tile (32,32) starts here.
pub const ZERO_POINT: f32 = 32.0 * TILE_SIZE;

/// Number of tiles along one world axis.
pub const MAP_TILES: i32 = 64;

// --- Streaming ---

/// Chebyshev radius (in tiles) inside which tiles are loaded.
pub const DEFAULT_LOAD_RADIUS: i32 = 8;

/// Chebyshev radius (in tiles) outside which tiles are unloaded.
pub const DEFAULT_UNLOAD_RADIUS: i32 = 12;

/// Minimum interval between streaming passes, seconds.
pub const TILE_UPDATE_INTERVAL: f32 = 0.033;

/// Upper bound on tiles finalized (GPU-uploaded) per frame.
pub const MAX_FINALIZE_PER_FRAME: usize = 2;

// --- Locomotion (WoW 3.3.5a movement constants) ---

pub const GRAVITY: f32 = -19.29;
pub const JUMP_VELOCITY: f32 = 7.96;
pub const FREEFLY_GRAVITY: f32 = -30.0;
pub const FREEFLY_JUMP_VELOCITY: f32 = 15.0;

pub const RUN_SPEED: f32 = 7.0;
pub const BACK_SPEED: f32 = 4.5;
pub const WALK_SPEED: f32 = 2.5;
pub const SWIM_SPEED_FACTOR: f32 = 0.66;
pub const TURN_SPEED_DEG: f32 = 180.0;

/// Seconds a jump press is buffered while airborne.
pub const JUMP_BUFFER: f32 = 0.15;
/// Seconds after leaving a ledge during which a jump still fires.
pub const COYOTE_TIME: f32 = 0.10;

// --- Swimming ---

/// Feet settle this far below the water surface while surface-locked.
pub const WATER_SURFACE_OFFSET: f32 = 0.9;
/// Feet must be this far below the surface before swim state engages.
pub const SWIM_ENTER_DEPTH: f32 = 0.3;
/// Camera pitch (degrees, nose-down positive) that engages a dive.
pub const DIVE_PITCH_DEG: f32 = 16.0;
pub const SWIM_SINK_SPEED: f32 = -3.0;
pub const SWIM_BUOYANCY: f32 = 8.0;

// --- Collision ---

pub const PLAYER_RADIUS: f32 = 0.50;
pub const PLAYER_RADIUS_INDOOR: f32 = 0.45;
pub const PLAYER_HEIGHT: f32 = 2.0;
/// Maximum ledge height walked up without a jump.
pub const STEP_UP_BUDGET: f32 = 0.85;
/// Maximum length of one horizontal sweep sub-step.
pub const SWEEP_SUB_STEP: f32 = 0.20;
/// Half-width of the cross-pattern ground sampling footprint.
pub const GROUND_FOOTPRINT: f32 = 0.4;
/// M2 floors are only accepted within this much above the feet.
pub const M2_STEP_UP: f32 = 1.0;

// --- Camera ---

pub const CAMERA_PIVOT_HEIGHT: f32 = 1.8;
pub const CAMERA_MIN_DISTANCE: f32 = 0.5;
pub const CAMERA_MAX_DISTANCE: f32 = 50.0;
pub const CAMERA_COLLISION_RADIUS: f32 = 0.32;
pub const CAMERA_COLLISION_EPSILON: f32 = 0.22;
/// Exponential easing rate for the zoom distance, 1/s.
pub const CAMERA_ZOOM_RATE: f32 = 15.0;
/// Exponential easing rate for the camera position, 1/s.
pub const CAMERA_LERP_RATE: f32 = 20.0;
/// Seconds without input before the idle orbit pan starts.
pub const IDLE_ORBIT_TIMEOUT: f32 = 120.0;

// --- Intents / events ---

/// Heartbeat cadence while any movement state is active, seconds.
pub const MOVE_HEARTBEAT_INTERVAL: f32 = 0.5;

/// Normalized animation times at which biped footsteps fire.
pub const FOOTSTEP_PHASES: [f32; 2] = [0.22, 0.72];
/// Normalized animation times at which mounted footsteps fire.
pub const MOUNT_FOOTSTEP_PHASES: [f32; 4] = [0.10, 0.35, 0.60, 0.85];

// --- Scene budgets ---

/// Particle budget shared by all M2 emitters in a scene.
pub const M2_PARTICLE_CAP: usize = 4000;
/// Particle budget for the weather system.
pub const WEATHER_PARTICLE_CAP: usize = 2000;

/// Broad-phase cell size for instance grids, meters.
pub const INSTANCE_GRID_CELL: f32 = 64.0;
/// Collision-triangle cell size inside models, meters.
pub const COLLISION_GRID_CELL: f32 = 4.0;
/// Quantization of the persistent WMO floor cache, meters.
pub const FLOOR_CACHE_CELL: f32 = 2.0;

/// `|normal.z|` at or above which a triangle counts as floor.
pub const FLOOR_NORMAL_Z: f32 = 0.35;
/// `|normal.z|` below which a triangle counts as wall for camera rays.
pub const CAMERA_WALL_NORMAL_Z: f32 = 0.20;

// --- Sky ---

/// One game day passes in this many real seconds (24 minutes).
pub const GAME_DAY_REAL_SECONDS: f32 = 24.0 * 60.0;
/// Lunar periods of the two moons, in game days.
pub const MOON_PERIOD_WHITE: f32 = 30.0;
pub const MOON_PERIOD_BLUE: f32 = 27.0;

/// Draw distance for building and doodad culling, meters.
pub const VIEW_DISTANCE: f32 = 1000.0;

// --- GPU ---

pub const SHADOW_MAP_SIZE: u32 = 4096;
pub const FRAMES_IN_FLIGHT: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_derivations() {
        assert!((CHUNK_SIZE - 33.333_332).abs() < 1e-3);
        assert!((ZERO_POINT - 17066.666).abs() < 1e-2);
        assert!((CHUNK_UNIT * 8.0 - CHUNK_SIZE).abs() < 1e-6);
    }
}
