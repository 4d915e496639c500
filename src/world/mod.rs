//! World streaming: terrain meshes, water surfaces, tile preparation
//! and the worker-pool streamer that feeds the scenes.

pub mod prepare;
pub mod streamer;
pub mod terrain;
pub mod tile_cache;
pub mod water;

pub use streamer::{StreamTargets, Streamer};
pub use terrain::{ChunkMesh, TerrainScene};
pub use tile_cache::TileCache;
pub use water::{WaterScene, WaterSurface};
