//! World-of-Warcraft 3.3.5a client core: asset parsing, tile
//! streaming, terrain/model/liquid scenes, sky and weather, and the
//! avatar controller, orchestrated into a per-frame render plan.
//!
//! The crate is split the way the data flows: `assets` reads bytes,
//! `parse` decodes them, `world` streams tiles into the `scene`
//! modules, `player` moves through them, and `frame` ties a frame
//! together. Everything below `gpu` runs headless; tests exercise the
//! full pipeline without a device.

// Fixed world-grid and locomotion values
pub mod constants;

// Core plumbing
pub mod config;
pub mod coords;
pub mod error;
pub mod events;

// Asset IO and binary format decoding
pub mod assets;
pub mod parse;

// GPU context, staging and caches
pub mod gpu;

// Streaming and scenes
pub mod scene;
pub mod world;

// Ambient systems
pub mod sky;

// Gameplay
pub mod entity;
pub mod player;
pub mod zone;

// Per-frame orchestration
pub mod frame;

pub use config::EngineConfig;
pub use coords::TileCoord;
pub use error::{EngineError, EngineResult, ParseError};
pub use events::{EventBus, GameEvent};
pub use frame::{Engine, FramePlan, MainStage};
pub use player::{PlayerController, PlayerInput};

// Re-export wgpu so hosts build surfaces against the same version.
pub use wgpu;
