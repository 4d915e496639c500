//! Doodad collision meshes from M2 bounding geometry.
//!
//! The low-resolution bounding mesh is bucketed into a 2D grid of 4 m
//! cells, with triangles pre-classified into floors and walls by
//! `|normal.z|`. All queries here are in model-local space; the scene
//! transforms in and out per instance.

use crate::constants::{COLLISION_GRID_CELL, FLOOR_NORMAL_Z};
use crate::parse::m2::M2Model;
use glam::{Vec2, Vec3};
use rustc_hash::FxHashMap;

pub struct CollisionMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    normals: Vec<Vec3>,
    z_bounds: Vec<(f32, f32)>,
    floor_cells: FxHashMap<(i32, i32), Vec<u32>>,
    wall_cells: FxHashMap<(i32, i32), Vec<u32>>,
}

fn cell_of(x: f32, y: f32) -> (i32, i32) {
    (
        (x / COLLISION_GRID_CELL).floor() as i32,
        (y / COLLISION_GRID_CELL).floor() as i32,
    )
}

impl CollisionMesh {
    /// Build from the model's bounding geometry; None when the model
    /// carries none.
    pub fn build(model: &M2Model) -> Option<Self> {
        if model.bounding_vertices.is_empty() || model.bounding_triangles.len() < 3 {
            return None;
        }
        let vertices = model.bounding_vertices.clone();
        let mut triangles = Vec::new();
        let mut normals = Vec::new();
        let mut z_bounds = Vec::new();
        let mut floor_cells: FxHashMap<(i32, i32), Vec<u32>> = FxHashMap::default();
        let mut wall_cells: FxHashMap<(i32, i32), Vec<u32>> = FxHashMap::default();

        for tri in model.bounding_triangles.chunks_exact(3) {
            let idx = [tri[0] as u32, tri[1] as u32, tri[2] as u32];
            let (Some(&a), Some(&b), Some(&c)) = (
                vertices.get(idx[0] as usize),
                vertices.get(idx[1] as usize),
                vertices.get(idx[2] as usize),
            ) else {
                continue;
            };
            let n = (b - a).cross(c - a);
            let len = n.length();
            if len <= f32::EPSILON {
                continue;
            }
            let n = n / len;
            let tri_index = triangles.len() as u32;
            triangles.push(idx);
            normals.push(n);
            z_bounds.push((a.z.min(b.z).min(c.z), a.z.max(b.z).max(c.z)));

            let min_x = a.x.min(b.x).min(c.x);
            let max_x = a.x.max(b.x).max(c.x);
            let min_y = a.y.min(b.y).min(c.y);
            let max_y = a.y.max(b.y).max(c.y);
            let (x0, y0) = cell_of(min_x, min_y);
            let (x1, y1) = cell_of(max_x, max_y);
            let target = if n.z.abs() >= FLOOR_NORMAL_Z {
                &mut floor_cells
            } else {
                &mut wall_cells
            };
            for x in x0..=x1 {
                for y in y0..=y1 {
                    target.entry((x, y)).or_default().push(tri_index);
                }
            }
        }
        if triangles.is_empty() {
            return None;
        }
        Some(Self {
            vertices,
            triangles,
            normals,
            z_bounds,
            floor_cells,
            wall_cells,
        })
    }

    fn corners(&self, tri: u32) -> (Vec3, Vec3, Vec3) {
        let [i, j, k] = self.triangles[tri as usize];
        (
            self.vertices[i as usize],
            self.vertices[j as usize],
            self.vertices[k as usize],
        )
    }

    /// Highest floor triangle under `(x, y)` whose surface lies at or
    /// below `max_z`, with the floor normal's |z|.
    pub fn floor_height(&self, x: f32, y: f32, max_z: f32) -> Option<(f32, f32)> {
        let ids = self.floor_cells.get(&cell_of(x, y))?;
        let p = Vec2::new(x, y);
        let mut best: Option<(f32, f32)> = None;
        for &tri in ids {
            let (a, b, c) = self.corners(tri);
            if !point_in_triangle_xy(p, a, b, c) {
                continue;
            }
            let n = self.normals[tri as usize];
            if n.z.abs() <= f32::EPSILON {
                continue;
            }
            // Plane solve for z at (x, y).
            let d = n.dot(a);
            let z = (d - n.x * x - n.y * y) / n.z;
            if z > max_z {
                continue;
            }
            if best.map_or(true, |(bz, _)| z > bz) {
                best = Some((z, n.z.abs()));
            }
        }
        best
    }

    /// Sweep a capsule footprint from `from` to `to`; returns the
    /// adjusted endpoint when a wall blocks, capped horizontal push.
    pub fn sweep(&self, from: Vec3, to: Vec3, radius: f32, push_cap: f32) -> Option<Vec3> {
        let feet = from.z.min(to.z);
        let head = from.z.max(to.z) + 2.0;
        let min = from.min(to) - Vec3::splat(radius);
        let max = from.max(to) + Vec3::splat(radius);
        let (x0, y0) = cell_of(min.x, min.y);
        let (x1, y1) = cell_of(max.x, max.y);

        let mut adjusted = to;
        let mut blocked = false;
        let mut seen = Vec::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                let Some(ids) = self.wall_cells.get(&(cx, cy)) else {
                    continue;
                };
                for &tri in ids {
                    if seen.contains(&tri) {
                        continue;
                    }
                    seen.push(tri);
                    let (z_min, z_max) = self.z_bounds[tri as usize];
                    if z_max < feet || z_min > head {
                        continue;
                    }
                    let (a, _, _) = self.corners(tri);
                    let n = self.normals[tri as usize];
                    let d = n.dot(a);
                    let dist_from = n.dot(from) - d;
                    let dist_to = n.dot(adjusted) - d;
                    // Sign crossing or inside the radius shell.
                    if dist_from.signum() != dist_to.signum() || dist_to.abs() < radius {
                        let side = if dist_from >= 0.0 { 1.0 } else { -1.0 };
                        let delta = side * radius - dist_to;
                        let push = delta.clamp(-push_cap, push_cap);
                        let horizontal = Vec3::new(n.x, n.y, 0.0).normalize_or_zero();
                        if horizontal != Vec3::ZERO {
                            adjusted += horizontal * push;
                            blocked = true;
                        }
                    }
                }
            }
        }
        if blocked {
            adjusted.z = to.z;
            Some(adjusted)
        } else {
            None
        }
    }
}

fn point_in_triangle_xy(p: Vec2, a: Vec3, b: Vec3, c: Vec3) -> bool {
    let (a, b, c) = (
        Vec2::new(a.x, a.y),
        Vec2::new(b.x, b.y),
        Vec2::new(c.x, c.y),
    );
    let sign = |p1: Vec2, p2: Vec2, p3: Vec2| (p1 - p3).perp_dot(p2 - p3);
    let d1 = sign(p, a, b);
    let d2 = sign(p, b, c);
    let d3 = sign(p, c, a);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::m2::M2Model;
    use glam::Quat;

    fn empty_model() -> M2Model {
        M2Model {
            name: String::new(),
            version: 264,
            global_sequences: Vec::new(),
            sequences: Vec::new(),
            bones: Vec::new(),
            vertices: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            texture_lookup: Vec::new(),
            texture_transform_lookup: Vec::new(),
            texture_transforms: Vec::new(),
            emitters: Vec::new(),
            bound_min: Vec3::splat(-1.0),
            bound_max: Vec3::splat(1.0),
            bound_radius: 1.7,
            bounding_vertices: Vec::new(),
            bounding_triangles: Vec::new(),
            bounding_normals: Vec::new(),
            indices: Vec::new(),
            batches: Vec::new(),
        }
    }

    #[test]
    fn no_geometry_builds_nothing() {
        assert!(CollisionMesh::build(&empty_model()).is_none());
        let _ = Quat::IDENTITY;
    }

    #[test]
    fn floor_height_on_platform() {
        let mut model = empty_model();
        test_util::with_floor_quad(&mut model, 2.0, 3.0);
        let mesh = CollisionMesh::build(&model).unwrap();
        let (z, nz) = mesh.floor_height(0.5, -0.5, 10.0).unwrap();
        assert!((z - 2.0).abs() < 1e-4);
        assert!(nz > 0.99);
        // Acceptance ceiling below the platform finds nothing.
        assert!(mesh.floor_height(0.5, -0.5, 1.0).is_none());
        // Outside the quad finds nothing.
        assert!(mesh.floor_height(9.0, 9.0, 10.0).is_none());
    }

    #[test]
    fn wall_blocks_sweep() {
        let mut model = empty_model();
        test_util::with_wall_quad(&mut model, 1.0, 4.0, 3.0);
        let mesh = CollisionMesh::build(&model).unwrap();
        let from = Vec3::new(0.0, 0.0, 0.5);
        let to = Vec3::new(1.5, 0.0, 0.5);
        let adjusted = mesh.sweep(from, to, 0.5, 0.06);
        assert!(adjusted.is_some());
        // A sweep far from the wall passes untouched.
        let clear = mesh.sweep(
            Vec3::new(-3.0, 0.0, 0.5),
            Vec3::new(-2.5, 0.0, 0.5),
            0.5,
            0.06,
        );
        assert!(clear.is_none());
    }
}
