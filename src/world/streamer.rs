//! Tile streamer: a small worker pool prepares tiles off the main
//! thread, the main thread finalizes a bounded number per frame.
//!
//! Workers only parse and build CPU-side data; every GPU upload and
//! scene mutation happens in [`Streamer::update`] on the caller's
//! thread. A tile that fails to prepare goes into an absorbing failed
//! set and is never requested again this session.

use super::prepare::{self, PendingTile};
use super::terrain::TerrainScene;
use super::tile_cache::TileCache;
use super::water::{surface_for_wmo_liquid, WaterScene};
use crate::assets::{asset_id, AssetSource};
use crate::constants::{
    DEFAULT_LOAD_RADIUS, DEFAULT_UNLOAD_RADIUS, MAX_FINALIZE_PER_FRAME, TILE_UPDATE_INTERVAL,
};
use crate::coords::{tile_for, TileCoord};
use crate::error::{EngineError, EngineResult};
use crate::gpu::texture_cache::TextureCache;
use crate::gpu::GpuContext;
use crate::scene::m2::M2Scene;
use crate::scene::wmo::WmoScene;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use glam::{Mat4, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::collections::VecDeque;

/// Scenes and GPU handles a finalize writes into. `gpu`/`textures` are
/// optional so headless tests can stream without a device.
pub struct StreamTargets<'a> {
    pub terrain: &'a mut TerrainScene,
    pub m2: &'a mut M2Scene,
    pub wmo: &'a mut WmoScene,
    pub water: &'a mut WaterScene,
    pub gpu: Option<&'a GpuContext>,
    pub textures: Option<&'a mut TextureCache>,
}

type PrepareResult = (TileCoord, EngineResult<Arc<PendingTile>>);

/// Instances a finalized tile spawned, so unload can retract them.
#[derive(Default)]
struct TileInstances {
    doodads: Vec<u64>,
    buildings: Vec<u64>,
    unique_ids: Vec<u32>,
}

pub struct Streamer {
    map: String,
    source: Arc<dyn AssetSource>,
    cache: Arc<TileCache>,
    job_tx: Option<Sender<TileCoord>>,
    result_rx: Receiver<PrepareResult>,
    result_tx: Sender<PrepareResult>,
    workers: Vec<JoinHandle<()>>,
    load_radius: i32,
    unload_radius: i32,
    loaded: FxHashMap<TileCoord, TileInstances>,
    in_flight: FxHashSet<TileCoord>,
    failed: FxHashSet<TileCoord>,
    ready: VecDeque<Arc<PendingTile>>,
    /// MDDF/MODF unique id to owning tile; a placement spawns once no
    /// matter how many neighbouring tiles reference it.
    placement_owner: FxHashMap<u32, TileCoord>,
    timer: f32,
    last_center: Option<TileCoord>,
}

fn worker_count() -> usize {
    num_cpus::get().saturating_sub(1).clamp(2, 4)
}

fn prepare_guarded(
    source: &dyn AssetSource,
    map: &str,
    coord: TileCoord,
) -> EngineResult<Arc<PendingTile>> {
    match catch_unwind(AssertUnwindSafe(|| {
        prepare::prepare_tile(source, map, coord)
    })) {
        Ok(Ok(tile)) => Ok(Arc::new(tile)),
        Ok(Err(err)) => Err(err),
        Err(_) => {
            log::error!("tile ({}, {}) prepare panicked", coord.row, coord.col);
            Err(EngineError::TileFailed(coord.row, coord.col))
        }
    }
}

impl Streamer {
    pub fn new(source: Arc<dyn AssetSource>, map: &str, cache: Arc<TileCache>) -> Self {
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let mut streamer = Self {
            map: map.to_string(),
            source,
            cache,
            job_tx: None,
            result_rx,
            result_tx,
            workers: Vec::new(),
            load_radius: DEFAULT_LOAD_RADIUS,
            unload_radius: DEFAULT_UNLOAD_RADIUS,
            loaded: FxHashMap::default(),
            in_flight: FxHashSet::default(),
            failed: FxHashSet::default(),
            ready: VecDeque::new(),
            placement_owner: FxHashMap::default(),
            timer: TILE_UPDATE_INTERVAL,
            last_center: None,
        };
        streamer.spawn_workers();
        streamer
    }

    pub fn set_radii(&mut self, load: i32, unload: i32) {
        self.load_radius = load;
        self.unload_radius = unload.max(load);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_loaded(&self, coord: TileCoord) -> bool {
        self.loaded.contains_key(&coord)
    }

    pub fn has_failed(&self, coord: TileCoord) -> bool {
        self.failed.contains(&coord)
    }

    pub fn pending_count(&self) -> usize {
        self.in_flight.len() + self.ready.len()
    }

    fn spawn_workers(&mut self) {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<TileCoord>();
        for index in 0..worker_count() {
            let jobs = job_rx.clone();
            let results = self.result_tx.clone();
            let source = Arc::clone(&self.source);
            let cache = Arc::clone(&self.cache);
            let map = self.map.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tile-worker-{index}"))
                .spawn(move || {
                    while let Ok(coord) = jobs.recv() {
                        let result = match cache.get(coord) {
                            Some(tile) => Ok(tile),
                            None => prepare_guarded(source.as_ref(), &map, coord),
                        };
                        if results.send((coord, result)).is_err() {
                            break;
                        }
                    }
                });
            match handle {
                Ok(h) => self.workers.push(h),
                Err(err) => log::error!("failed to spawn tile worker: {err}"),
            }
        }
        self.job_tx = Some(job_tx);
    }

    /// Stop the worker pool; queued jobs are dropped, in-flight results
    /// are still drained by later updates.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("tile worker panicked during shutdown");
            }
        }
    }

    /// Restart after [`shutdown`], e.g. on map change.
    pub fn restart(&mut self) {
        if self.job_tx.is_none() {
            self.in_flight.clear();
            self.spawn_workers();
        }
    }

    pub fn is_running(&self) -> bool {
        self.job_tx.is_some()
    }

    fn request(&mut self, coord: TileCoord) -> EngineResult<()> {
        let tx = self.job_tx.as_ref().ok_or(EngineError::PoolShutDown)?;
        tx.send(coord).map_err(|_| EngineError::PoolShutDown)?;
        self.in_flight.insert(coord);
        Ok(())
    }

    fn drain_results(&mut self) {
        loop {
            match self.result_rx.try_recv() {
                Ok((coord, Ok(tile))) => {
                    self.in_flight.remove(&coord);
                    self.ready.push_back(tile);
                }
                Ok((coord, Err(err))) => {
                    self.in_flight.remove(&coord);
                    self.failed.insert(coord);
                    log::warn!("tile ({}, {}) failed: {err}", coord.row, coord.col);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Per-frame streaming step: drain worker results, re-evaluate the
    /// wanted set on a fixed cadence, finalize a bounded number of
    /// ready tiles.
    pub fn update(&mut self, dt: f32, avatar: Vec3, targets: &mut StreamTargets<'_>) {
        self.drain_results();

        self.timer += dt;
        if self.timer >= TILE_UPDATE_INTERVAL {
            self.timer = 0.0;
            let center = tile_for(avatar.x, avatar.y);
            if self.last_center != Some(center) {
                self.last_center = Some(center);
                self.retarget(center, targets);
            }
        }

        for _ in 0..MAX_FINALIZE_PER_FRAME {
            let Some(tile) = self.ready.pop_front() else {
                break;
            };
            self.finalize(tile, targets);
        }
    }

    /// Finalize everything already prepared, requesting nothing new.
    /// Used by loading screens and teleports to settle synchronously.
    pub fn process_all_ready_tiles(&mut self, targets: &mut StreamTargets<'_>) {
        while self.in_flight.len() + self.ready.len() > 0 {
            self.drain_results();
            while let Some(tile) = self.ready.pop_front() {
                self.finalize(tile, targets);
            }
            if !self.in_flight.is_empty() {
                std::thread::yield_now();
            }
        }
    }

    fn retarget(&mut self, center: TileCoord, targets: &mut StreamTargets<'_>) {
        // Unload first so the wanted set never fights the budget.
        let unload_radius = self.unload_radius;
        let to_unload: Vec<TileCoord> = self
            .loaded
            .keys()
            .filter(|c| c.chebyshev(center) > unload_radius)
            .copied()
            .collect();
        for coord in to_unload {
            self.unload(coord, targets);
        }

        for row in (center.row - self.load_radius)..=(center.row + self.load_radius) {
            for col in (center.col - self.load_radius)..=(center.col + self.load_radius) {
                let coord = TileCoord::new(row, col);
                if !coord.in_bounds()
                    || self.loaded.contains_key(&coord)
                    || self.in_flight.contains(&coord)
                    || self.failed.contains(&coord)
                {
                    continue;
                }
                if let Err(err) = self.request(coord) {
                    log::warn!("tile request failed: {err}");
                    return;
                }
            }
        }
    }

    fn finalize(&mut self, tile: Arc<PendingTile>, targets: &mut StreamTargets<'_>) {
        let coord = tile.coord;
        if self.loaded.contains_key(&coord) {
            return;
        }
        self.cache.insert(Arc::clone(&tile));

        let mut meshes = tile.chunk_meshes.clone();
        if let Some(ctx) = targets.gpu {
            for mesh in &mut meshes {
                mesh.upload(ctx);
            }
        }
        targets.terrain.insert_tile(coord, meshes);

        for surface in &tile.water {
            targets.water.add_surface(surface.clone());
        }

        if let (Some(ctx), Some(textures)) = (targets.gpu, targets.textures.as_deref_mut()) {
            for (path, image) in &tile.textures {
                textures.insert(ctx, asset_id(path), path, image);
            }
        }

        let mut spawned = TileInstances::default();
        for spawn in &tile.doodads {
            if self.placement_owner.contains_key(&spawn.unique_id) {
                continue;
            }
            let Some(model) = tile.models.get(&spawn.path) else {
                continue;
            };
            let model_id = asset_id(&spawn.path);
            targets
                .m2
                .ensure_model(model_id, &spawn.path, Arc::clone(model));
            if let Some(id) = targets.m2.create_instance(model_id, spawn.transform) {
                spawned.doodads.push(id);
                spawned.unique_ids.push(spawn.unique_id);
                self.placement_owner.insert(spawn.unique_id, coord);
            }
        }

        for spawn in &tile.buildings {
            if self.placement_owner.contains_key(&spawn.unique_id) {
                continue;
            }
            let Some(building) = tile.building_models.get(&spawn.path) else {
                continue;
            };
            let model_id = asset_id(&spawn.path);
            targets
                .wmo
                .ensure_model(model_id, &spawn.path, Arc::clone(building));
            let Some(id) =
                targets
                    .wmo
                    .create_instance(model_id, spawn.transform, spawn.doodad_set)
            else {
                continue;
            };
            spawned.buildings.push(id);
            spawned.unique_ids.push(spawn.unique_id);
            self.placement_owner.insert(spawn.unique_id, coord);

            for group in &building.groups {
                if group.liquid.is_present() {
                    if let Some(surface) =
                        surface_for_wmo_liquid(id, &spawn.transform, &group.liquid)
                    {
                        targets.water.add_surface(surface);
                    }
                }
            }

            // Building-owned doodads spawn with the instance and
            // unload with its tile.
            for (def, name) in targets.wmo.doodads_for_instance(id) {
                let path = crate::assets::normalize_path(&name).replace(".mdx", ".m2");
                let Some(model) = tile.models.get(&path) else {
                    continue;
                };
                let doodad_model_id = asset_id(&path);
                targets
                    .m2
                    .ensure_model(doodad_model_id, &path, Arc::clone(model));
                let local = Mat4::from_scale_rotation_translation(
                    Vec3::splat(def.scale),
                    def.rotation,
                    def.position,
                );
                if let Some(did) = targets
                    .m2
                    .create_instance(doodad_model_id, spawn.transform * local)
                {
                    spawned.doodads.push(did);
                }
            }
        }

        log::debug!(
            "tile ({}, {}) finalized: {} doodads, {} buildings",
            coord.row,
            coord.col,
            spawned.doodads.len(),
            spawned.buildings.len()
        );
        self.loaded.insert(coord, spawned);
    }

    /// Unload every loaded tile. Idempotent; used on shutdown and map
    /// change.
    pub fn unload_all(&mut self, targets: &mut StreamTargets<'_>) {
        let coords: Vec<TileCoord> = self.loaded.keys().copied().collect();
        for coord in coords {
            self.unload(coord, targets);
        }
        self.ready.clear();
        self.failed.clear();
        self.last_center = None;
    }

    fn unload(&mut self, coord: TileCoord, targets: &mut StreamTargets<'_>) {
        let Some(spawned) = self.loaded.remove(&coord) else {
            return;
        };
        targets.terrain.remove_tile(coord);
        targets.water.remove_tile(coord);
        for id in spawned.doodads {
            targets.m2.remove_instance(id);
        }
        for id in spawned.buildings {
            targets.water.remove_wmo_instance(id);
            targets.wmo.remove_instance(id);
        }
        for unique_id in spawned.unique_ids {
            self.placement_owner.remove(&unique_id);
        }
        targets.m2.cleanup_unused_models();
        targets.wmo.cleanup_unused_models();
        log::debug!("tile ({}, {}) unloaded", coord.row, coord.col);
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryArchive;
    use crate::coords::tile_origin;
    use crate::parse::adt::test_util as adt_util;

    fn targets<'a>(
        terrain: &'a mut TerrainScene,
        m2: &'a mut M2Scene,
        wmo: &'a mut WmoScene,
        water: &'a mut WaterScene,
    ) -> StreamTargets<'a> {
        StreamTargets {
            terrain,
            m2,
            wmo,
            water,
            gpu: None,
            textures: None,
        }
    }

    fn archive_with_tile(coord: TileCoord) -> Arc<MemoryArchive> {
        let archive = MemoryArchive::new();
        archive.insert(
            &format!(
                "World\\Maps\\TestMap\\TestMap_{}_{}.adt",
                coord.row, coord.col
            ),
            adt_util::flat_adt(coord, 10.0),
        );
        Arc::new(archive)
    }

    fn settle(streamer: &mut Streamer, avatar: Vec3, targets: &mut StreamTargets<'_>) {
        // Force one retarget pass, then drain everything the pool got.
        streamer.update(TILE_UPDATE_INTERVAL, avatar, targets);
        streamer.process_all_ready_tiles(targets);
    }

    #[test]
    fn streams_tiles_around_the_avatar() {
        let coord = TileCoord::new(32, 32);
        let archive = archive_with_tile(coord);
        let cache = Arc::new(TileCache::new(64 * 1024 * 1024));
        let mut streamer = Streamer::new(archive, "TestMap", cache);
        streamer.set_radii(1, 2);

        let (mut terrain, mut m2, mut wmo, mut water) = (
            TerrainScene::new(),
            M2Scene::new(),
            WmoScene::new(),
            WaterScene::new(),
        );
        let mut t = targets(&mut terrain, &mut m2, &mut wmo, &mut water);
        let origin = tile_origin(coord);
        settle(&mut streamer, origin - Vec3::new(10.0, 10.0, 0.0), &mut t);

        assert!(streamer.is_loaded(coord));
        assert!(terrain.is_loaded(coord));
        // Neighbours without data are failed, absorbing.
        assert!(streamer.has_failed(TileCoord::new(32, 33)));
    }

    #[test]
    fn moving_away_unloads_the_tile() {
        let coord = TileCoord::new(32, 32);
        let archive = archive_with_tile(coord);
        let cache = Arc::new(TileCache::new(64 * 1024 * 1024));
        let mut streamer = Streamer::new(archive, "TestMap", cache);
        streamer.set_radii(1, 1);

        let (mut terrain, mut m2, mut wmo, mut water) = (
            TerrainScene::new(),
            M2Scene::new(),
            WmoScene::new(),
            WaterScene::new(),
        );
        let mut t = targets(&mut terrain, &mut m2, &mut wmo, &mut water);
        let origin = tile_origin(coord);
        settle(&mut streamer, origin - Vec3::new(10.0, 10.0, 0.0), &mut t);
        assert!(streamer.is_loaded(coord));

        // Walk five tiles away.
        let far = tile_origin(TileCoord::new(37, 37)) - Vec3::new(10.0, 10.0, 0.0);
        settle(&mut streamer, far, &mut t);
        assert!(!streamer.is_loaded(coord));
        assert!(!terrain.is_loaded(coord));
    }

    #[test]
    fn failed_tiles_are_not_rerequested() {
        let archive = Arc::new(MemoryArchive::new());
        let cache = Arc::new(TileCache::new(64 * 1024 * 1024));
        let mut streamer = Streamer::new(archive, "TestMap", cache);
        streamer.set_radii(0, 1);

        let (mut terrain, mut m2, mut wmo, mut water) = (
            TerrainScene::new(),
            M2Scene::new(),
            WmoScene::new(),
            WaterScene::new(),
        );
        let mut t = targets(&mut terrain, &mut m2, &mut wmo, &mut water);
        let coord = TileCoord::new(32, 32);
        let origin = tile_origin(coord) - Vec3::new(10.0, 10.0, 0.0);
        settle(&mut streamer, origin, &mut t);
        assert!(streamer.has_failed(coord));
        assert_eq!(streamer.pending_count(), 0);

        // A second pass over the same center requests nothing.
        streamer.last_center = None;
        settle(&mut streamer, origin, &mut t);
        assert_eq!(streamer.pending_count(), 0);
    }

    #[test]
    fn shutdown_then_restart() {
        let archive = archive_with_tile(TileCoord::new(32, 32));
        let cache = Arc::new(TileCache::new(64 * 1024 * 1024));
        let mut streamer = Streamer::new(archive, "TestMap", cache);
        streamer.shutdown();
        assert!(!streamer.is_running());
        streamer.restart();
        assert!(streamer.is_running());

        streamer.set_radii(0, 1);
        let (mut terrain, mut m2, mut wmo, mut water) = (
            TerrainScene::new(),
            M2Scene::new(),
            WmoScene::new(),
            WaterScene::new(),
        );
        let mut t = targets(&mut terrain, &mut m2, &mut wmo, &mut water);
        let coord = TileCoord::new(32, 32);
        settle(
            &mut streamer,
            tile_origin(coord) - Vec3::new(10.0, 10.0, 0.0),
            &mut t,
        );
        assert!(streamer.is_loaded(coord));
    }
}
