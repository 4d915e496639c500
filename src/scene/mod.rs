//! Model scenes: doodads/creatures (M2) and buildings (WMO).

pub mod grid;
pub mod m2;
pub mod wmo;

use glam::{Mat4, Vec3};

/// Axis-aligned world-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// World AABB of a local-space box under a transform.
    pub fn transformed(min: Vec3, max: Vec3, transform: &Mat4) -> Self {
        let corners = [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ];
        let mut out_min = Vec3::splat(f32::INFINITY);
        let mut out_max = Vec3::splat(f32::NEG_INFINITY);
        for corner in corners {
            let p = transform.transform_point3(corner);
            out_min = out_min.min(p);
            out_max = out_max.max(p);
        }
        Self {
            min: out_min,
            max: out_max,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn contains_xy(&self, x: f32, y: f32) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn expanded(&self, by: Vec3) -> Self {
        Self {
            min: self.min - by,
            max: self.max + by,
        }
    }

    pub fn union_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn volume(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        d.x * d.y * d.z
    }

    /// Slab-test ray intersection; returns entry distance when the ray
    /// hits within `max_dist`.
    pub fn ray_hit(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<f32> {
        let inv = dir.recip();
        let t1 = (self.min - origin) * inv;
        let t2 = (self.max - origin) * inv;
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);
        let near = t_min.x.max(t_min.y).max(t_min.z);
        let far = t_max.x.min(t_max.y).min(t_max.z);
        if near <= far && far >= 0.0 && near <= max_dist {
            Some(near.max(0.0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_keeps_points_inside() {
        let t = Mat4::from_rotation_z(0.7) * Mat4::from_translation(Vec3::new(3.0, 1.0, 0.0));
        let aabb = Aabb::transformed(Vec3::splat(-1.0), Vec3::splat(1.0), &t);
        let p = t.transform_point3(Vec3::new(0.5, -0.5, 0.9));
        assert!(aabb.contains(p));
    }

    #[test]
    fn ray_through_box() {
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let hit = aabb.ray_hit(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 10.0);
        assert!((hit.unwrap() - 4.0).abs() < 1e-4);
        assert!(aabb
            .ray_hit(Vec3::new(-5.0, 3.0, 0.0), Vec3::X, 10.0)
            .is_none());
        // Origin inside hits at zero.
        assert_eq!(aabb.ray_hit(Vec3::ZERO, Vec3::X, 10.0), Some(0.0));
    }
}
