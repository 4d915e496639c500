//! Doodad/creature scene: shared models, instances, animation,
//! particles and collision.
//!
//! Models are keyed by path-hash id and reference-counted by their
//! instances; instance ids are monotonic and never recycled. All
//! mutation happens on the main thread; the parallel bone update
//! borrows instances disjointly and joins before draw recording.

pub mod animation;
pub mod collision;
pub mod particles;

use super::grid::SpatialGrid;
use super::Aabb;
use crate::constants::M2_STEP_UP;
use crate::parse::m2::M2Model;
use collision::CollisionMesh;
use glam::{Mat4, Vec3};
use particles::ParticleSystem;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// How a doodad participates in movement collision, decided from its
/// model path. Matching is substring-based on the normalized path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionClass {
    Solid,
    /// Decorative vegetation and clutter: walk straight through.
    NoBlock,
    /// Trees: only the central trunk column blocks.
    TreeTrunk,
}

const NO_BLOCK_PATTERNS: &[&str] = &[
    "bush", "shrub", "fern", "flower", "grass", "weed", "vine", "plant", "mushroom", "cattail",
    "lilypad", "seaweed", "kelp", "tumbleweed", "sunflower", "clover",
];
const TRUNK_PATTERNS: &[&str] = &["tree", "palm", "pine", "oak", "willow", "birch"];

pub fn classify_collision(path: &str) -> CollisionClass {
    let lower = path.to_ascii_lowercase();
    if NO_BLOCK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return CollisionClass::NoBlock;
    }
    if TRUNK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return CollisionClass::TreeTrunk;
    }
    CollisionClass::Solid
}

pub struct ModelEntry {
    pub path: String,
    pub model: Arc<M2Model>,
    pub collision: Option<CollisionMesh>,
    pub collision_class: CollisionClass,
    trunk_radius: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AnimState {
    pub sequence: usize,
    pub time_ms: f32,
    pub duration_ms: u32,
    pub looping: bool,
}

pub struct M2Instance {
    pub id: u64,
    pub model_id: u64,
    pub transform: Mat4,
    pub inverse: Mat4,
    pub bounds: Aabb,
    pub anim: Option<AnimState>,
    pub bones: Vec<Mat4>,
    pub visible: bool,
    emitter_accum: Vec<f32>,
    skip_counter: u32,
}

impl M2Instance {
    /// Counter-based pose update skip by camera distance.
    fn skip_interval(&self, camera: Vec3) -> u32 {
        let d = (self.bounds.center() - camera).length();
        if d < 50.0 {
            1
        } else if d < 100.0 {
            2
        } else if d < 200.0 {
            4
        } else {
            8
        }
    }
}

pub struct M2Scene {
    models: FxHashMap<u64, ModelEntry>,
    instances: FxHashMap<u64, M2Instance>,
    refcounts: FxHashMap<u64, usize>,
    grid: SpatialGrid,
    pub particles: ParticleSystem,
    next_instance_id: u64,
    global_time_ms: u32,
    focus: Option<(Vec3, f32)>,
    rng: StdRng,
    scratch: Vec<u64>,
}

impl Default for M2Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl M2Scene {
    pub fn new() -> Self {
        Self {
            models: FxHashMap::default(),
            instances: FxHashMap::default(),
            refcounts: FxHashMap::default(),
            grid: SpatialGrid::new(),
            particles: ParticleSystem::default(),
            next_instance_id: 1,
            global_time_ms: 0,
            focus: None,
            rng: StdRng::seed_from_u64(0x5eed),
            scratch: Vec::new(),
        }
    }

    pub fn has_model(&self, model_id: u64) -> bool {
        self.models.contains_key(&model_id)
    }

    pub fn model(&self, model_id: u64) -> Option<&ModelEntry> {
        self.models.get(&model_id)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, id: u64) -> Option<&M2Instance> {
        self.instances.get(&id)
    }

    /// Register a parsed model once; repeat calls are no-ops.
    pub fn ensure_model(&mut self, model_id: u64, path: &str, model: Arc<M2Model>) {
        if self.models.contains_key(&model_id) {
            return;
        }
        let collision_class = classify_collision(path);
        let collision = if collision_class == CollisionClass::NoBlock {
            None
        } else {
            CollisionMesh::build(&model)
        };
        let extent = (model.bound_max - model.bound_min).truncate();
        let trunk_radius = (extent.max_element() * 0.1).clamp(0.3, 1.2);
        self.models.insert(
            model_id,
            ModelEntry {
                path: path.to_string(),
                model,
                collision,
                collision_class,
                trunk_radius,
            },
        );
    }

    pub fn create_instance(&mut self, model_id: u64, transform: Mat4) -> Option<u64> {
        let entry = self.models.get(&model_id)?;
        let bounds = Aabb::transformed(entry.model.bound_min, entry.model.bound_max, &transform);
        let emitters = entry.model.emitters.len();
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.grid.insert(id, &bounds);
        self.instances.insert(
            id,
            M2Instance {
                id,
                model_id,
                transform,
                inverse: transform.inverse(),
                bounds,
                anim: None,
                bones: Vec::new(),
                visible: true,
                emitter_accum: vec![0.0; emitters],
                skip_counter: 0,
            },
        );
        *self.refcounts.entry(model_id).or_insert(0) += 1;
        Some(id)
    }

    pub fn set_instance_transform(&mut self, id: u64, transform: Mat4) {
        let Some(model_bounds) = self
            .instances
            .get(&id)
            .and_then(|i| self.models.get(&i.model_id))
            .map(|e| (e.model.bound_min, e.model.bound_max))
        else {
            return;
        };
        if let Some(inst) = self.instances.get_mut(&id) {
            self.grid.remove(id, &inst.bounds);
            inst.transform = transform;
            inst.inverse = transform.inverse();
            inst.bounds = Aabb::transformed(model_bounds.0, model_bounds.1, &transform);
            self.grid.insert(id, &inst.bounds);
        }
    }

    pub fn set_instance_position(&mut self, id: u64, position: Vec3) {
        let Some(current) = self.instances.get(&id).map(|i| i.transform) else {
            return;
        };
        let mut t = current;
        t.w_axis.x = position.x;
        t.w_axis.y = position.y;
        t.w_axis.z = position.z;
        self.set_instance_transform(id, t);
    }

    pub fn set_instance_visible(&mut self, id: u64, visible: bool) {
        if let Some(inst) = self.instances.get_mut(&id) {
            inst.visible = visible;
        }
    }

    pub fn remove_instance(&mut self, id: u64) {
        if let Some(inst) = self.instances.remove(&id) {
            self.grid.remove(id, &inst.bounds);
            self.particles.remove_instance(id);
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
        self.particles.clear();
    }

    /// Drop models no instance references any more.
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

    /// Select the lowest sequence whose animation id matches; missing
    /// ids are a no-op.
    pub fn play_animation(&mut self, instance_id: u64, animation_id: u16, looping: bool) {
        let Some(inst) = self.instances.get_mut(&instance_id) else {
            return;
        };
        let Some(entry) = self.models.get(&inst.model_id) else {
            return;
        };
        let Some(sequence) = entry.model.find_sequence(animation_id) else {
            return;
        };
        let duration_ms = entry.model.sequences[sequence].duration_ms.max(1);
        inst.anim = Some(AnimState {
            sequence,
            time_ms: 0.0,
            duration_ms,
            looping,
        });
    }

    /// Advance animation clocks, recompute bone poses in parallel, and
    /// run particle emitters. Joined before any draw recording.
    pub fn update(&mut self, dt: f32, camera: Vec3) {
        self.global_time_ms = self
            .global_time_ms
            .wrapping_add((dt * 1000.0) as u32);
        let global_time = self.global_time_ms;

        let models = &self.models;
        let mut animated: Vec<&mut M2Instance> = self
            .instances
            .values_mut()
            .filter(|i| i.anim.is_some())
            .collect();
        animated.par_iter_mut().for_each(|inst| {
            let state = {
                let Some(anim) = inst.anim.as_mut() else {
                    return;
                };
                anim.time_ms += dt * 1000.0;
                if anim.time_ms >= anim.duration_ms as f32 {
                    if anim.looping {
                        anim.time_ms %= anim.duration_ms as f32;
                    } else {
                        anim.time_ms = anim.duration_ms as f32;
                    }
                }
                *anim
            };
            inst.skip_counter += 1;
            let interval = inst.skip_interval(camera);
            if inst.skip_counter % interval != 0 && !inst.bones.is_empty() {
                return;
            }
            if let Some(entry) = models.get(&inst.model_id) {
                animation::compute_bone_matrices(
                    &entry.model,
                    state.sequence,
                    state.time_ms as u32,
                    global_time,
                    &mut inst.bones,
                );
            }
        });

        self.particles.update(dt);
        // Emit near the camera only; distant emitters idle.
        let mut near = Vec::new();
        self.grid.query_radius(camera, 150.0, &mut near);
        for id in near {
            let Some(inst) = self.instances.get_mut(&id) else {
                continue;
            };
            let Some(entry) = self.models.get(&inst.model_id) else {
                continue;
            };
            if entry.model.emitters.is_empty() {
                continue;
            }
            self.particles.emit(
                &mut self.rng,
                id,
                &inst.transform,
                &entry.model.emitters,
                &mut inst.emitter_accum,
                dt,
            );
        }
    }

    pub fn set_collision_focus(&mut self, position: Vec3, radius: f32) {
        self.focus = Some((position, radius));
    }

    fn in_focus(&self, inst: &M2Instance) -> bool {
        match self.focus {
            Some((pos, radius)) => {
                let c = inst.bounds.center();
                (Vec3::new(c.x, c.y, 0.0) - Vec3::new(pos.x, pos.y, 0.0)).length() <= radius
            }
            None => true,
        }
    }

    /// Compose wall sweeps over all solid instances near the segment.
    /// Returns the adjusted endpoint when something blocked.
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
            if !self.in_focus(inst) {
                continue;
            }
            let Some(entry) = self.models.get(&inst.model_id) else {
                continue;
            };
            match entry.collision_class {
                CollisionClass::NoBlock => {}
                CollisionClass::TreeTrunk => {
                    if let Some(out) =
                        trunk_sweep(inst, entry.trunk_radius, from, adjusted, radius)
                    {
                        adjusted = out;
                        blocked = true;
                    }
                }
                CollisionClass::Solid => {
                    let Some(mesh) = entry.collision.as_ref() else {
                        continue;
                    };
                    let local_from = inst.inverse.transform_point3(from);
                    let local_to = inst.inverse.transform_point3(adjusted);
                    if let Some(local_out) = mesh.sweep(local_from, local_to, radius, 0.06) {
                        adjusted = inst.transform.transform_point3(local_out);
                        blocked = true;
                    }
                }
            }
        }
        self.scratch = scratch;
        blocked.then_some(adjusted)
    }

    /// Highest doodad floor under (x, y) within the step-up budget
    /// above `ref_z`. Returns (height, |normal.z|).
    pub fn floor_height(&mut self, x: f32, y: f32, ref_z: f32) -> Option<(f32, f32)> {
        let mut scratch = std::mem::take(&mut self.scratch);
        self.grid
            .query_radius(Vec3::new(x, y, ref_z), 1.0, &mut scratch);
        let mut best: Option<(f32, f32)> = None;
        for &id in scratch.iter() {
            let Some(inst) = self.instances.get(&id) else {
                continue;
            };
            if !inst.bounds.contains_xy(x, y) || !self.in_focus(inst) {
                continue;
            }
            let Some(entry) = self.models.get(&inst.model_id) else {
                continue;
            };
            if entry.collision_class == CollisionClass::NoBlock {
                continue;
            }
            let Some(mesh) = entry.collision.as_ref() else {
                continue;
            };
            let local = inst.inverse.transform_point3(Vec3::new(x, y, ref_z));
            let local_ceiling = inst
                .inverse
                .transform_point3(Vec3::new(x, y, ref_z + M2_STEP_UP))
                .z;
            if let Some((lz, nz)) = mesh.floor_height(local.x, local.y, local_ceiling) {
                let world_z = inst
                    .transform
                    .transform_point3(Vec3::new(local.x, local.y, lz))
                    .z;
                if world_z <= ref_z + M2_STEP_UP && best.map_or(true, |(bz, _)| world_z > bz) {
                    best = Some((world_z, nz));
                }
            }
        }
        self.scratch = scratch;
        best
    }

    /// Cheap camera-ray test against instance bounds; nearest hit
    /// distance.
    pub fn raycast_bounding_boxes(&mut self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<f32> {
        let end = origin + dir * max_dist;
        let query = Aabb::new(origin.min(end), origin.max(end));
        let mut scratch = std::mem::take(&mut self.scratch);
        self.grid.query(&query, &mut scratch);
        let mut best: Option<f32> = None;
        for &id in scratch.iter() {
            let Some(inst) = self.instances.get(&id) else {
                continue;
            };
            let Some(entry) = self.models.get(&inst.model_id) else {
                continue;
            };
            if entry.collision_class == CollisionClass::NoBlock {
                continue;
            }
            if let Some(d) = inst.bounds.ray_hit(origin, dir, max_dist) {
                if best.map_or(true, |b| d < b) {
                    best = Some(d);
                }
            }
        }
        self.scratch = scratch;
        best
    }

    /// Instances visible for draw recording.
    pub fn visible_instances(&self) -> impl Iterator<Item = &M2Instance> {
        self.instances.values().filter(|i| i.visible)
    }
}

/// Push a sweep endpoint out of a tree-trunk cylinder.
fn trunk_sweep(
    inst: &M2Instance,
    trunk_radius: f32,
    _from: Vec3,
    to: Vec3,
    player_radius: f32,
) -> Option<Vec3> {
    let center = inst.transform.transform_point3(Vec3::ZERO);
    let offset = Vec3::new(to.x - center.x, to.y - center.y, 0.0);
    let min_dist = trunk_radius + player_radius;
    let dist = offset.length();
    if dist >= min_dist || to.z > center.z + 20.0 {
        return None;
    }
    let dir = if dist > f32::EPSILON {
        offset / dist
    } else {
        Vec3::X
    };
    let push = (min_dist - dist).min(0.06);
    Some(to + dir * push)
}
