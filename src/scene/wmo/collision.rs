//! Per-group WMO collision in world space.
//!
//! Group geometry is transformed to world coordinates once at instance
//! creation, then bucketed into 4 m cells with triangles split into
//! floors and walls by `|normal.z|`. Triangles flagged no-collision or
//! detail in MOPY are dropped at build time.

use crate::constants::{
    CAMERA_WALL_NORMAL_Z, COLLISION_GRID_CELL, FLOOR_NORMAL_Z, STEP_UP_BUDGET,
};
use crate::parse::wmo::WmoGroup;
use crate::scene::Aabb;
use glam::{Mat4, Vec2, Vec3};
use rustc_hash::FxHashMap;

/// Walls shorter than this that top out near the feet are ramp-side
/// lips, not real walls; they are stepped over silently.
const PHANTOM_WALL_HEIGHT: f32 = 1.6;
const PHANTOM_WALL_CLEARANCE: f32 = 1.8;

pub struct GroupCollision {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    normals: Vec<Vec3>,
    z_bounds: Vec<(f32, f32)>,
    floor_cells: FxHashMap<(i32, i32), Vec<u32>>,
    wall_cells: FxHashMap<(i32, i32), Vec<u32>>,
    pub bounds: Aabb,
    pub interior: bool,
}

fn cell_of(x: f32, y: f32) -> (i32, i32) {
    (
        (x / COLLISION_GRID_CELL).floor() as i32,
        (y / COLLISION_GRID_CELL).floor() as i32,
    )
}

impl GroupCollision {
    /// Bake one group's collidable triangles into world space.
    pub fn build(group: &WmoGroup, transform: &Mat4) -> Option<Self> {
        if group.positions.is_empty() || group.indices.len() < 3 {
            return None;
        }
        let vertices: Vec<Vec3> = group
            .positions
            .iter()
            .map(|&p| transform.transform_point3(p))
            .collect();

        let mut triangles = Vec::new();
        let mut normals = Vec::new();
        let mut z_bounds = Vec::new();
        let mut floor_cells: FxHashMap<(i32, i32), Vec<u32>> = FxHashMap::default();
        let mut wall_cells: FxHashMap<(i32, i32), Vec<u32>> = FxHashMap::default();
        let mut bounds = Aabb::new(Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY));

        for (tri_no, tri) in group.indices.chunks_exact(3).enumerate() {
            if let Some(info) = group.triangle_info.get(tri_no) {
                if !info.collidable() {
                    continue;
                }
            }
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
            bounds.union_point(a);
            bounds.union_point(b);
            bounds.union_point(c);

            let (x0, y0) = cell_of(a.x.min(b.x).min(c.x), a.y.min(b.y).min(c.y));
            let (x1, y1) = cell_of(a.x.max(b.x).max(c.x), a.y.max(b.y).max(c.y));
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
            bounds,
            interior: group.is_interior(),
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

    /// Highest floor under `(x, y)` no higher than `ref_z + 0.5`, with
    /// the floor normal's |z|. The search is a vertical probe, not a
    /// physical ray, so stacked floors resolve to the walkable one.
    pub fn floor_height(&self, x: f32, y: f32, ref_z: f32) -> Option<(f32, f32)> {
        let ids = self.floor_cells.get(&cell_of(x, y))?;
        let ceiling = ref_z + 0.5;
        let p = Vec2::new(x, y);
        let mut best: Option<(f32, f32)> = None;
        for &tri in ids {
            let (z_min, _) = self.z_bounds[tri as usize];
            if z_min > ceiling {
                continue;
            }
            let (a, b, c) = self.corners(tri);
            if !point_in_triangle_xy(p, a, b, c) {
                continue;
            }
            let n = self.normals[tri as usize];
            if n.z.abs() <= f32::EPSILON {
                continue;
            }
            let d = n.dot(a);
            let z = (d - n.x * x - n.y * y) / n.z;
            if z > ceiling {
                continue;
            }
            if best.map_or(true, |(bz, _)| z > bz) {
                best = Some((z, n.z.abs()));
            }
        }
        best
    }

    /// Sweep a player capsule footprint; returns the pushed endpoint
    /// when a wall blocked. Walls topping out within the step-up budget
    /// are walked onto, short ramp-side lips are ignored.
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
                    if z_max <= feet + STEP_UP_BUDGET {
                        continue;
                    }
                    let height = z_max - z_min;
                    let structural =
                        height > PHANTOM_WALL_HEIGHT || z_max > feet + PHANTOM_WALL_CLEARANCE;
                    if !structural {
                        continue;
                    }
                    let (a, b, c) = self.corners(tri);
                    let footprint = Vec2::new(adjusted.x, adjusted.y);
                    if !near_triangle_xy(footprint, a, b, c, radius) {
                        continue;
                    }
                    let n = self.normals[tri as usize];
                    let d = n.dot(a);
                    let dist_from = n.dot(from) - d;
                    let dist_to = n.dot(adjusted) - d;
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

    /// Nearest wall hit along a ray, for pulling the camera out of
    /// geometry. Floors and ramps are ignored so the camera can look
    /// down steps without snapping.
    pub fn raycast_walls(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<f32> {
        if self.bounds.ray_hit(origin, dir, max_dist).is_none() {
            return None;
        }
        let mut best: Option<f32> = None;
        for (tri_no, n) in self.normals.iter().enumerate() {
            if n.z.abs() >= CAMERA_WALL_NORMAL_Z {
                continue;
            }
            let (a, b, c) = self.corners(tri_no as u32);
            if let Some(t) = ray_triangle(origin, dir, a, b, c) {
                if t <= max_dist && best.map_or(true, |bt| t < bt) {
                    best = Some(t);
                }
            }
        }
        best
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

/// XY proximity test: inside the triangle footprint or within `radius`
/// of one of its edges.
fn near_triangle_xy(p: Vec2, a: Vec3, b: Vec3, c: Vec3, radius: f32) -> bool {
    let (a, b, c) = (
        Vec2::new(a.x, a.y),
        Vec2::new(b.x, b.y),
        Vec2::new(c.x, c.y),
    );
    if point_in_triangle_xy(p, a.extend(0.0), b.extend(0.0), c.extend(0.0)) {
        return true;
    }
    let r2 = radius * radius;
    segment_dist2(p, a, b) <= r2 || segment_dist2(p, b, c) <= r2 || segment_dist2(p, c, a) <= r2
}

fn segment_dist2(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    let t = if len2 <= f32::EPSILON {
        0.0
    } else {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    };
    (a + ab * t - p).length_squared()
}

fn ray_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-7 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t >= 0.0).then_some(t)
}
