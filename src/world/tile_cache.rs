//! Byte-weighted LRU cache of prepared tiles.
//!
//! Shared between the worker pool (insert on prepare) and the main
//! thread (hits on re-entry into a previously visited area). One lock,
//! Arc copies out under it.

use crate::coords::TileCoord;
use crate::world::prepare::PendingTile;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

struct CacheInner {
    entries: FxHashMap<TileCoord, (Arc<PendingTile>, u64)>,
    /// Front = least recently used.
    order: VecDeque<TileCoord>,
    used: u64,
    budget: u64,
}

pub struct TileCache {
    inner: Mutex<CacheInner>,
}

impl TileCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                used: 0,
                budget: budget_bytes,
            }),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().used
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache hit bypasses parsing entirely.
    pub fn get(&self, coord: TileCoord) -> Option<Arc<PendingTile>> {
        let mut inner = self.inner.lock();
        let tile = inner.entries.get(&coord).map(|(t, _)| t.clone())?;
        if let Some(pos) = inner.order.iter().position(|&c| c == coord) {
            inner.order.remove(pos);
            inner.order.push_back(coord);
        }
        Some(tile)
    }

    pub fn insert(&self, tile: Arc<PendingTile>) {
        let coord = tile.coord;
        let bytes = tile.approx_bytes();
        let mut inner = self.inner.lock();
        if bytes > inner.budget {
            return;
        }
        if let Some((_, old_bytes)) = inner.entries.remove(&coord) {
            inner.used -= old_bytes;
            if let Some(pos) = inner.order.iter().position(|&c| c == coord) {
                inner.order.remove(pos);
            }
        }
        while inner.used + bytes > inner.budget {
            let Some(victim) = inner.order.pop_front() else {
                break;
            };
            if let Some((_, victim_bytes)) = inner.entries.remove(&victim) {
                inner.used -= victim_bytes;
            }
        }
        inner.used += bytes;
        inner.entries.insert(coord, (tile, bytes));
        inner.order.push_back(coord);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn tile(coord: TileCoord) -> Arc<PendingTile> {
        Arc::new(PendingTile {
            coord,
            chunk_meshes: Vec::new(),
            doodads: Vec::new(),
            buildings: Vec::new(),
            water: Vec::new(),
            textures: FxHashMap::default(),
            models: FxHashMap::default(),
            building_models: FxHashMap::default(),
        })
    }

    #[test]
    fn hit_refreshes_recency() {
        // Each empty tile weighs the 64 KiB floor; budget fits two.
        let cache = TileCache::new(140 * 1024);
        cache.insert(tile(TileCoord::new(0, 0)));
        cache.insert(tile(TileCoord::new(0, 1)));
        assert!(cache.get(TileCoord::new(0, 0)).is_some());
        cache.insert(tile(TileCoord::new(0, 2)));
        // (0,1) was least recently used and got evicted.
        assert!(cache.get(TileCoord::new(0, 1)).is_none());
        assert!(cache.get(TileCoord::new(0, 0)).is_some());
        assert!(cache.get(TileCoord::new(0, 2)).is_some());
    }

    #[test]
    fn reinsert_replaces_without_double_count() {
        let cache = TileCache::new(1024 * 1024);
        cache.insert(tile(TileCoord::new(3, 3)));
        let used = cache.used_bytes();
        cache.insert(tile(TileCoord::new(3, 3)));
        assert_eq!(cache.used_bytes(), used);
        assert_eq!(cache.len(), 1);
    }
}
