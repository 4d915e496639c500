//! Engine configuration, loaded from a TOML file with per-field
//! defaults so a missing or partial file still yields a working setup.

use crate::constants::{
    DEFAULT_LOAD_RADIUS, DEFAULT_UNLOAD_RADIUS, IDLE_ORBIT_TIMEOUT, SHADOW_MAP_SIZE,
    TILE_UPDATE_INTERVAL,
};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const GIB: u64 = 1024 * 1024 * 1024;

/// Per-scene GPU texture cache budgets, in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureBudgets {
    pub terrain: u64,
    pub wmo: u64,
    pub m2: u64,
    pub character: u64,
}

impl Default for TextureBudgets {
    fn default() -> Self {
        Self {
            terrain: 4 * GIB,
            wmo: 2 * GIB,
            m2: 2 * GIB,
            character: GIB,
        }
    }
}

/// Tile RAM cache budget derived from total system memory: a quarter
/// of RAM, clamped to [1 GiB, 8 GiB]. The caller probes RAM; this
/// stays a pure function.
pub fn tile_cache_budget_for(total_ram_bytes: u64) -> u64 {
    (total_ram_bytes / 4).clamp(GIB, 8 * GIB)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tiles kept loaded around the avatar (Chebyshev radius).
    pub load_radius: i32,
    /// Tiles are unloaded beyond this radius. Kept above `load_radius`
    /// for hysteresis; values below it are raised on load.
    pub unload_radius: i32,
    /// Seconds between streaming retarget passes.
    pub tile_update_interval: f32,
    /// 1, 2, 4 or 8. Anything else is clamped to the nearest valid
    /// count.
    pub msaa_samples: u32,
    pub shadow_map_size: u32,
    pub shadows_enabled: bool,
    pub texture_budgets: TextureBudgets,
    /// RAM-side prepared-tile cache. 0 defers the choice: an embedder
    /// that knows total RAM should call [`EngineConfig::with_system_memory`],
    /// otherwise sanitizing falls back to the 8 GiB cap.
    pub tile_ram_cache_budget: u64,
    pub procedural_stars: bool,
    pub moon_phase_cycling: bool,
    pub invert_mouse: bool,
    pub mouse_sensitivity: f32,
    /// Authentic movement speeds; off trades fidelity for a faster
    /// debug stride.
    pub use_wow_speed: bool,
    pub idle_orbit_timeout: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            load_radius: DEFAULT_LOAD_RADIUS,
            unload_radius: DEFAULT_UNLOAD_RADIUS,
            tile_update_interval: TILE_UPDATE_INTERVAL,
            msaa_samples: 1,
            shadow_map_size: SHADOW_MAP_SIZE,
            shadows_enabled: true,
            texture_budgets: TextureBudgets::default(),
            tile_ram_cache_budget: 0,
            procedural_stars: true,
            moon_phase_cycling: true,
            invert_mouse: false,
            mouse_sensitivity: 0.003,
            use_wow_speed: true,
            idle_orbit_timeout: IDLE_ORBIT_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Load from `path`; a missing file yields defaults, a present but
    /// malformed file is an error (silent fallback hides typos).
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config at {}, using defaults", path.display());
                return Ok(Self::default().sanitized());
            }
            Err(source) => {
                return Err(EngineError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&text).map_err(|e| EngineError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(config.sanitized())
    }

    /// Resolve a zero tile cache budget from the host's total RAM via
    /// [`tile_cache_budget_for`]. An explicit budget from the config
    /// file wins.
    pub fn with_system_memory(mut self, total_ram_bytes: u64) -> Self {
        if self.tile_ram_cache_budget == 0 {
            self.tile_ram_cache_budget = tile_cache_budget_for(total_ram_bytes);
        }
        self
    }

    /// Clamp out-of-range values rather than failing.
    pub fn sanitized(mut self) -> Self {
        self.load_radius = self.load_radius.clamp(1, 32);
        self.unload_radius = self.unload_radius.max(self.load_radius + 1);
        self.tile_update_interval = self.tile_update_interval.clamp(0.0, 1.0);
        self.msaa_samples = match self.msaa_samples {
            0 | 1 => 1,
            2 => 2,
            3 | 4 => 4,
            _ => 8,
        };
        self.shadow_map_size = self.shadow_map_size.clamp(512, 8192);
        self.mouse_sensitivity = self.mouse_sensitivity.clamp(0.0001, 0.1);
        self.idle_orbit_timeout = self.idle_orbit_timeout.max(1.0);
        if self.tile_ram_cache_budget == 0 {
            self.tile_ram_cache_budget = 8 * GIB;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("engine.toml")).unwrap();
        assert_eq!(config.load_radius, DEFAULT_LOAD_RADIUS);
        assert_eq!(config.tile_ram_cache_budget, 8 * GIB);
        assert!(config.use_wow_speed);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "load_radius = 4\nmsaa_samples = 4\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.load_radius, 4);
        assert_eq!(config.msaa_samples, 4);
        assert_eq!(config.unload_radius, DEFAULT_UNLOAD_RADIUS);
        assert_eq!(config.texture_budgets.terrain, 4 * GIB);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "load_radius = \"eight\"").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(EngineError::Config { .. })
        ));
    }

    #[test]
    fn ram_derived_budget_clamps() {
        assert_eq!(tile_cache_budget_for(2 * GIB), GIB);
        assert_eq!(tile_cache_budget_for(16 * GIB), 4 * GIB);
        assert_eq!(tile_cache_budget_for(128 * GIB), 8 * GIB);
    }

    #[test]
    fn system_memory_fills_only_an_unset_budget() {
        let config = EngineConfig::default().with_system_memory(16 * GIB);
        assert_eq!(config.tile_ram_cache_budget, 4 * GIB);

        let config = EngineConfig {
            tile_ram_cache_budget: 2 * GIB,
            ..Default::default()
        }
        .with_system_memory(16 * GIB);
        assert_eq!(config.tile_ram_cache_budget, 2 * GIB);
    }

    #[test]
    fn sanitize_fixes_inverted_radii_and_odd_msaa() {
        let config = EngineConfig {
            load_radius: 10,
            unload_radius: 3,
            msaa_samples: 3,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.unload_radius, 11);
        assert_eq!(config.msaa_samples, 4);
    }
}
