//! Persistent building floor-height cache.
//!
//! Floor probes inside large buildings are the most expensive queries
//! the movement code makes, and their answers never change for a given
//! map. Heights are quantized to 2 m cells and persisted to
//! `cache/wmo_floor_<map>.bin` between runs.

use crate::constants::FLOOR_CACHE_CELL;
use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Packs the quantized cell coordinates into one key.
pub fn cell_key(x: f32, y: f32) -> u64 {
    let cx = (x / FLOOR_CACHE_CELL).floor() as i32;
    let cy = (y / FLOOR_CACHE_CELL).floor() as i32;
    ((cx as u32 as u64) << 32) | cy as u32 as u64
}

pub struct FloorCache {
    entries: FxHashMap<u64, f32>,
    path: PathBuf,
    dirty: bool,
}

impl FloorCache {
    /// Load the cache for `map`, starting empty when the file is
    /// missing or unreadable.
    pub fn load(cache_dir: &Path, map: &str) -> Self {
        let path = cache_dir.join(format!("wmo_floor_{}.bin", map.to_ascii_lowercase()));
        let entries = match fs::read(&path) {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    log::warn!("discarding corrupt floor cache {}: {err}", path.display());
                    FxHashMap::default()
                }
            },
            Err(_) => FxHashMap::default(),
        };
        log::debug!("floor cache {}: {} entries", path.display(), entries.len());
        Self {
            entries,
            path,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: u64) -> Option<f32> {
        self.entries.get(&key).copied()
    }

    pub fn insert(&mut self, key: u64, height: f32) {
        if self.entries.insert(key, height) != Some(height) {
            self.dirty = true;
        }
    }

    /// Write back if anything changed since load/last save.
    pub fn save(&mut self) -> EngineResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| EngineError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        let bytes = bincode::serialize(&self.entries)
            .map_err(|err| EngineError::CacheDecode(err.to_string()))?;
        fs::write(&self.path, bytes).map_err(|source| EngineError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FloorCache::load(dir.path(), "Azeroth");
        cache.insert(cell_key(100.0, -50.0), 12.5);
        cache.insert(cell_key(-3.0, 7.0), -1.25);
        cache.save().unwrap();

        let reloaded = FloorCache::load(dir.path(), "azeroth");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(cell_key(100.0, -50.0)), Some(12.5));
    }

    #[test]
    fn neighbouring_cells_have_distinct_keys() {
        assert_ne!(cell_key(0.5, 0.5), cell_key(2.5, 0.5));
        assert_ne!(cell_key(0.5, 0.5), cell_key(0.5, 2.5));
        assert_eq!(cell_key(0.1, 0.1), cell_key(1.9, 1.9));
        // Negative coordinates stay distinct from positive ones.
        assert_ne!(cell_key(-0.5, 0.5), cell_key(0.5, 0.5));
    }

    #[test]
    fn save_is_a_no_op_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FloorCache::load(dir.path(), "Kalimdor");
        cache.save().unwrap();
        assert!(!dir.path().join("wmo_floor_kalimdor.bin").exists());
    }
}
