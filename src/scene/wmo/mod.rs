//! Building (WMO) scene: shared root+group models, placed instances,
//! per-group culling and collision.
//!
//! Buildings are few and large, so collision geometry is baked to
//! world space per instance at creation. Interior visibility walks the
//! portal graph from the group containing the camera; everything else
//! culls on group bounds alone.

pub mod collision;
pub mod floor_cache;

use super::grid::SpatialGrid;
use super::Aabb;
use crate::parse::wmo::WmoDoodadDef;
use crate::world::prepare::PreparedBuilding;
use collision::GroupCollision;
use floor_cache::FloorCache;
use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Wall push per sub-step; interiors use the tighter cap so narrow
/// staircases do not eject the player through the opposite wall.
const PUSH_CAP_EXTERIOR: f32 = 0.06;
const PUSH_CAP_INTERIOR: f32 = 0.02;

const FRAME_CACHE_SLOTS: usize = 16;
/// Quantization of the per-frame floor cache, meters.
const FRAME_CACHE_QUANTUM: f32 = 0.5;

pub struct WmoModelEntry {
    pub path: String,
    pub building: Arc<PreparedBuilding>,
}

struct GroupState {
    bounds: Aabb,
    collision: Option<GroupCollision>,
    interior: bool,
}

pub struct WmoInstance {
    pub id: u64,
    pub model_id: u64,
    pub transform: Mat4,
    pub doodad_set: u16,
    pub bounds: Aabb,
    groups: Vec<GroupState>,
}

impl WmoInstance {
    pub fn group_bounds(&self, group_index: usize) -> Option<&Aabb> {
        self.groups.get(group_index).map(|g| &g.bounds)
    }
}

#[derive(Clone, Copy)]
struct FrameCacheSlot {
    key: (i32, i32, i32),
    result: Option<(f32, f32)>,
}

pub struct WmoScene {
    models: FxHashMap<u64, WmoModelEntry>,
    instances: FxHashMap<u64, WmoInstance>,
    refcounts: FxHashMap<u64, usize>,
    grid: SpatialGrid,
    next_instance_id: u64,
    frame_cache: Vec<FrameCacheSlot>,
    frame_cache_next: usize,
    floor_cache: Option<FloorCache>,
    scratch: Vec<u64>,
}

impl Default for WmoScene {
    fn default() -> Self {
        Self::new()
    }
}

impl WmoScene {
    pub fn new() -> Self {
        Self {
            models: FxHashMap::default(),
            instances: FxHashMap::default(),
            refcounts: FxHashMap::default(),
            grid: SpatialGrid::new(),
            next_instance_id: 1,
            frame_cache: Vec::with_capacity(FRAME_CACHE_SLOTS),
            frame_cache_next: 0,
            floor_cache: None,
            scratch: Vec::new(),
        }
    }

    /// Attach the persistent floor cache for the active map.
    pub fn set_floor_cache(&mut self, cache: FloorCache) {
        self.floor_cache = Some(cache);
    }

    pub fn save_floor_cache(&mut self) {
        if let Some(cache) = self.floor_cache.as_mut() {
            if let Err(err) = cache.save() {
                log::warn!("floor cache save failed: {err}");
            }
        }
    }

    pub fn has_model(&self, model_id: u64) -> bool {
        self.models.contains_key(&model_id)
    }

    pub fn model(&self, model_id: u64) -> Option<&WmoModelEntry> {
        self.models.get(&model_id)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn instance(&self, id: u64) -> Option<&WmoInstance> {
        self.instances.get(&id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn ensure_model(&mut self, model_id: u64, path: &str, building: Arc<PreparedBuilding>) {
        self.models.entry(model_id).or_insert_with(|| WmoModelEntry {
            path: path.to_string(),
            building,
        });
    }

    pub fn create_instance(
        &mut self,
        model_id: u64,
        transform: Mat4,
        doodad_set: u16,
    ) -> Option<u64> {
        let entry = self.models.get(&model_id)?;
        let building = Arc::clone(&entry.building);
        let mut groups = Vec::with_capacity(building.groups.len());
        let mut bounds = Aabb::transformed(
            building.root.bound_min,
            building.root.bound_max,
            &transform,
        );
        for group in &building.groups {
            let collision = GroupCollision::build(group, &transform);
            // Containment uses the declared group bounds: a room's
            // volume extends above its floor triangles, so the
            // triangle-tight collision box would call everything
            // standing in it "outside".
            let declared = Aabb::transformed(group.bound_min, group.bound_max, &transform);
            let group_bounds = if group.bound_min == group.bound_max {
                match &collision {
                    Some(c) => c.bounds,
                    None => declared,
                }
            } else {
                declared
            };
            bounds.union_point(group_bounds.min);
            bounds.union_point(group_bounds.max);
            groups.push(GroupState {
                bounds: group_bounds,
                collision,
                interior: group.is_interior(),
            });
        }

        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.grid.insert(id, &bounds);
        self.instances.insert(
            id,
            WmoInstance {
                id,
                model_id,
                transform,
                doodad_set,
                bounds,
                groups,
            },
        );
        *self.refcounts.entry(model_id).or_insert(0) += 1;
        Some(id)
    }

    pub fn remove_instance(&mut self, id: u64) {
        if let Some(inst) = self.instances.remove(&id) {
            self.grid.remove(id, &inst.bounds);
            if let Some(count) = self.refcounts.get_mut(&inst.model_id) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.models.clear();
        self.refcounts.clear();
        self.grid.clear();
        self.frame_cache.clear();
    }

    pub fn cleanup_unused_models(&mut self) {
        let unused: Vec<u64> = self
            .models
            .keys()
            .filter(|id| self.refcounts.get(id).copied().unwrap_or(0) == 0)
            .copied()
            .collect();
        for id in unused {
            self.models.remove(&id);
            self.refcounts.remove(&id);
        }
    }

    /// Doodad definitions this instance spawns: set 0 plus its own set.
    pub fn doodads_for_instance(&self, id: u64) -> Vec<(WmoDoodadDef, String)> {
        let Some(inst) = self.instances.get(&id) else {
            return Vec::new();
        };
        let Some(entry) = self.models.get(&inst.model_id) else {
            return Vec::new();
        };
        let root = &entry.building.root;
        let mut sets = vec![0usize];
        if inst.doodad_set != 0 {
            sets.push(inst.doodad_set as usize);
        }
        let mut out = Vec::new();
        for set in sets {
            for def in root.doodads_in_set(set) {
                if let Some(name) = root.doodad_names.get(&def.name_offset) {
                    out.push((*def, name.clone()));
                }
            }
        }
        out
    }

    /// Clear the per-frame floor cache. Called once per frame before
    /// movement resolution.
    pub fn begin_frame(&mut self) {
        self.frame_cache.clear();
        self.frame_cache_next = 0;
    }

    /// Group containing `pos`, smallest bounding volume winning ties.
    /// Interiors nest inside their building's exterior shell, so the
    /// tightest box is the room actually occupied.
    pub fn containing_group(&self, pos: Vec3) -> Option<(u64, usize, bool)> {
        let mut best: Option<(u64, usize, bool, f32)> = None;
        for inst in self.instances.values() {
            if !inst.bounds.contains(pos) {
                continue;
            }
            for (index, group) in inst.groups.iter().enumerate() {
                if !group.bounds.contains(pos) {
                    continue;
                }
                let volume = group.bounds.volume();
                if best.map_or(true, |(_, _, _, v)| volume < v) {
                    best = Some((inst.id, index, group.interior, volume));
                }
            }
        }
        best.map(|(id, index, interior, _)| (id, index, interior))
    }

    pub fn is_inside_wmo(&self, pos: Vec3) -> bool {
        matches!(self.containing_group(pos), Some((_, _, true)))
    }

    /// Groups worth drawing from `camera`. When the camera stands in an
    /// interior group, that instance's interiors are restricted to the
    /// portal-reachable set; exteriors and other instances cull on
    /// bounds and distance alone.
    pub fn visible_groups(&self, camera: Vec3, view_distance: f32) -> Vec<(u64, usize)> {
        let inside = self.containing_group(camera);
        let mut out = Vec::new();
        for inst in self.instances.values() {
            let reachable = match inside {
                Some((id, group, true)) if id == inst.id => {
                    Some(self.portal_reachable(inst, group))
                }
                _ => None,
            };
            for (index, group) in inst.groups.iter().enumerate() {
                let center = group.bounds.center();
                let half_diag = (group.bounds.max - group.bounds.min).length() * 0.5;
                if (center - camera).length() - half_diag > view_distance {
                    continue;
                }
                if let Some(set) = &reachable {
                    if group.interior && !set[index] {
                        continue;
                    }
                }
                out.push((inst.id, index));
            }
        }
        out
    }

    /// Breadth-first walk of the portal graph from `start`.
    fn portal_reachable(&self, inst: &WmoInstance, start: usize) -> Vec<bool> {
        let mut reachable = vec![false; inst.groups.len()];
        let Some(entry) = self.models.get(&inst.model_id) else {
            return reachable;
        };
        let building = &entry.building;
        if start >= reachable.len() {
            return reachable;
        }
        reachable[start] = true;
        let mut queue = vec![start];
        while let Some(current) = queue.pop() {
            let Some(group) = building.groups.get(current) else {
                continue;
            };
            let refs_start = group.portal_start as usize;
            let refs_end = (refs_start + group.portal_count as usize)
                .min(building.root.portal_refs.len());
            for portal_ref in &building.root.portal_refs[refs_start.min(refs_end)..refs_end] {
                let neighbor = portal_ref.group_index as usize;
                if neighbor < reachable.len() && !reachable[neighbor] {
                    reachable[neighbor] = true;
                    queue.push(neighbor);
                }
            }
        }
        reachable
    }

    /// Compose wall sweeps over every loaded building near the segment.
    pub fn check_collision(&mut self, from: Vec3, to: Vec3, radius: f32) -> Option<Vec3> {
        let query = Aabb::new(from.min(to), from.max(to)).expanded(Vec3::splat(radius + 2.0));
        let mut scratch = std::mem::take(&mut self.scratch);
        self.grid.query(&query, &mut scratch);
        let mut adjusted = to;
        let mut blocked = false;
        for &id in scratch.iter() {
            let Some(inst) = self.instances.get(&id) else {
                continue;
            };
            for group in &inst.groups {
                let Some(mesh) = group.collision.as_ref() else {
                    continue;
                };
                if !mesh.bounds.expanded(Vec3::splat(radius + 2.0)).contains(adjusted) {
                    continue;
                }
                let push_cap = if group.interior {
                    PUSH_CAP_INTERIOR
                } else {
                    PUSH_CAP_EXTERIOR
                };
                if let Some(out) = mesh.sweep(from, adjusted, radius, push_cap) {
                    adjusted = out;
                    blocked = true;
                }
            }
        }
        self.scratch = scratch;
        blocked.then_some(adjusted)
    }

    /// Highest building floor under `(x, y)` reachable from `ref_z`.
    /// Consults the per-frame cache, then geometry, then the persistent
    /// cache when no building is loaded there yet.
    pub fn floor_height(&mut self, x: f32, y: f32, ref_z: f32) -> Option<(f32, f32)> {
        let key = (
            (x / FRAME_CACHE_QUANTUM).floor() as i32,
            (y / FRAME_CACHE_QUANTUM).floor() as i32,
            (ref_z / FRAME_CACHE_QUANTUM).floor() as i32,
        );
        for slot in &self.frame_cache {
            if slot.key == key {
                return slot.result;
            }
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        self.grid
            .query_radius(Vec3::new(x, y, ref_z), 1.0, &mut scratch);
        let mut probed_geometry = false;
        let mut best: Option<(f32, f32)> = None;
        for &id in scratch.iter() {
            let Some(inst) = self.instances.get(&id) else {
                continue;
            };
            if !inst.bounds.contains_xy(x, y) {
                continue;
            }
            for group in &inst.groups {
                let Some(mesh) = group.collision.as_ref() else {
                    continue;
                };
                if !mesh.bounds.contains_xy(x, y) {
                    continue;
                }
                probed_geometry = true;
                if let Some((z, nz)) = mesh.floor_height(x, y, ref_z) {
                    if best.map_or(true, |(bz, _)| z > bz) {
                        best = Some((z, nz));
                    }
                }
            }
        }
        self.scratch = scratch;

        if let Some((z, _)) = best {
            if let Some(cache) = self.floor_cache.as_mut() {
                cache.insert(floor_cache::cell_key(x, y), z);
            }
        } else if !probed_geometry {
            // Streaming gap: fall back to last run's answer.
            if let Some(cache) = self.floor_cache.as_ref() {
                if let Some(z) = cache.get(floor_cache::cell_key(x, y)) {
                    if z <= ref_z + 0.5 {
                        best = Some((z, 1.0));
                    }
                }
            }
        }

        let slot = FrameCacheSlot { key, result: best };
        if self.frame_cache.len() < FRAME_CACHE_SLOTS {
            self.frame_cache.push(slot);
        } else {
            self.frame_cache[self.frame_cache_next] = slot;
            self.frame_cache_next = (self.frame_cache_next + 1) % FRAME_CACHE_SLOTS;
        }
        best
    }

    /// Nearest wall along a camera ray across all loaded buildings.
    pub fn raycast_walls(&mut self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<f32> {
        let end = origin + dir * max_dist;
        let query = Aabb::new(origin.min(end), origin.max(end));
        let mut scratch = std::mem::take(&mut self.scratch);
        self.grid.query(&query, &mut scratch);
        let mut best: Option<f32> = None;
        for &id in scratch.iter() {
            let Some(inst) = self.instances.get(&id) else {
                continue;
            };
            for group in &inst.groups {
                let Some(mesh) = group.collision.as_ref() else {
                    continue;
                };
                if let Some(t) = mesh.raycast_walls(origin, dir, max_dist) {
                    if best.map_or(true, |b| t < b) {
                        best = Some(t);
                    }
                }
            }
        }
        self.scratch = scratch;
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::wmo::{WmoGroup, WmoRoot, WmoTriangleInfo};

    fn quad_group(z: f32, half: f32, flags: u32) -> WmoGroup {
        WmoGroup {
            flags,
            bound_min: Vec3::new(-half, -half, z - 0.1),
            bound_max: Vec3::new(half, half, z + 4.0),
            positions: vec![
                Vec3::new(-half, -half, z),
                Vec3::new(half, -half, z),
                Vec3::new(half, half, z),
                Vec3::new(-half, half, z),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            triangle_info: vec![WmoTriangleInfo { flags: 0, material_id: 0 }; 2],
            ..WmoGroup::default()
        }
    }

    fn building(groups: Vec<WmoGroup>) -> Arc<PreparedBuilding> {
        let root = WmoRoot {
            version: 17,
            group_count: groups.len() as u32,
            bound_min: Vec3::splat(-100.0),
            bound_max: Vec3::splat(100.0),
            materials: Vec::new(),
            textures: FxHashMap::default(),
            group_info: Vec::new(),
            doodad_names: FxHashMap::default(),
            doodad_defs: Vec::new(),
            doodad_sets: Vec::new(),
            portals: Vec::new(),
            portal_vertices: Vec::new(),
            portal_refs: Vec::new(),
        };
        Arc::new(PreparedBuilding { root, groups })
    }

    #[test]
    fn two_story_floor_resolution() {
        let mut scene = WmoScene::new();
        scene.ensure_model(1, "inn.wmo", building(vec![
            quad_group(0.0, 10.0, 0),
            quad_group(5.0, 10.0, 0),
        ]));
        scene.create_instance(1, Mat4::IDENTITY, 0).unwrap();

        // Ground floor from ground height.
        let (z, _) = scene.floor_height(0.0, 0.0, 0.2).unwrap();
        assert!((z - 0.0).abs() < 1e-3);
        // Upstairs from upstairs height.
        scene.begin_frame();
        let (z, _) = scene.floor_height(0.0, 0.0, 5.2).unwrap();
        assert!((z - 5.0).abs() < 1e-3);
    }

    #[test]
    fn frame_cache_returns_identical_answer() {
        let mut scene = WmoScene::new();
        scene.ensure_model(1, "hut.wmo", building(vec![quad_group(1.0, 5.0, 0)]));
        scene.create_instance(1, Mat4::IDENTITY, 0).unwrap();
        let first = scene.floor_height(0.1, 0.1, 1.3);
        let second = scene.floor_height(0.12, 0.14, 1.3);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn unloaded_area_uses_persistent_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FloorCache::load(dir.path(), "Azeroth");
        cache.insert(floor_cache::cell_key(300.0, 300.0), 8.0);
        let mut scene = WmoScene::new();
        scene.set_floor_cache(cache);
        // No geometry anywhere near; the cached height answers.
        let hit = scene.floor_height(300.5, 300.5, 8.2);
        assert_eq!(hit, Some((8.0, 1.0)));
        // Cached floor above the probe is rejected.
        scene.begin_frame();
        assert!(scene.floor_height(300.5, 300.5, 2.0).is_none());
    }

    #[test]
    fn interior_containment_prefers_tightest_group() {
        let mut scene = WmoScene::new();
        let interior = 0x2000;
        scene.ensure_model(1, "keep.wmo", building(vec![
            quad_group(0.0, 50.0, 0),
            quad_group(0.0, 5.0, interior),
        ]));
        scene.create_instance(1, Mat4::IDENTITY, 0).unwrap();
        let (_, group, inside) = scene.containing_group(Vec3::new(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(group, 1);
        assert!(inside);
        assert!(scene.is_inside_wmo(Vec3::new(1.0, 1.0, 1.0)));
        assert!(!scene.is_inside_wmo(Vec3::new(40.0, 40.0, 1.0)));
    }

    #[test]
    fn cleanup_keeps_referenced_buildings() {
        let mut scene = WmoScene::new();
        scene.ensure_model(1, "a.wmo", building(vec![quad_group(0.0, 5.0, 0)]));
        scene.ensure_model(2, "b.wmo", building(vec![quad_group(0.0, 5.0, 0)]));
        let a = scene.create_instance(1, Mat4::IDENTITY, 0).unwrap();
        scene.create_instance(2, Mat4::IDENTITY, 0).unwrap();
        scene.remove_instance(a);
        scene.cleanup_unused_models();
        assert!(!scene.has_model(1));
        assert!(scene.has_model(2));
    }
}
