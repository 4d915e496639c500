//! Broad-phase spatial hash over instance bounds (64 m cells).

use super::Aabb;
use crate::constants::INSTANCE_GRID_CELL;
use glam::Vec3;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct SpatialGrid {
    cells: FxHashMap<(i32, i32), Vec<u64>>,
}

fn cell_of(x: f32, y: f32) -> (i32, i32) {
    (
        (x / INSTANCE_GRID_CELL).floor() as i32,
        (y / INSTANCE_GRID_CELL).floor() as i32,
    )
}

fn cell_range(aabb: &Aabb) -> ((i32, i32), (i32, i32)) {
    (cell_of(aabb.min.x, aabb.min.y), cell_of(aabb.max.x, aabb.max.y))
}

impl SpatialGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, bounds: &Aabb) {
        let ((x0, y0), (x1, y1)) = cell_range(bounds);
        for x in x0..=x1 {
            for y in y0..=y1 {
                self.cells.entry((x, y)).or_default().push(id);
            }
        }
    }

    pub fn remove(&mut self, id: u64, bounds: &Aabb) {
        let ((x0, y0), (x1, y1)) = cell_range(bounds);
        for x in x0..=x1 {
            for y in y0..=y1 {
                if let Some(ids) = self.cells.get_mut(&(x, y)) {
                    ids.retain(|&i| i != id);
                    if ids.is_empty() {
                        self.cells.remove(&(x, y));
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Candidate ids overlapping the query box; may contain duplicates
    /// for instances spanning several cells.
    pub fn query(&self, bounds: &Aabb, out: &mut Vec<u64>) {
        out.clear();
        let ((x0, y0), (x1, y1)) = cell_range(bounds);
        for x in x0..=x1 {
            for y in y0..=y1 {
                if let Some(ids) = self.cells.get(&(x, y)) {
                    out.extend_from_slice(ids);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
    }

    pub fn query_radius(&self, center: Vec3, radius: f32, out: &mut Vec<u64>) {
        let r = Vec3::new(radius, radius, 0.0);
        self.query(&Aabb::new(center - r, center + r), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_finds_spanning_instance_once() {
        let mut grid = SpatialGrid::new();
        let big = Aabb::new(Vec3::new(-10.0, -10.0, 0.0), Vec3::new(100.0, 100.0, 5.0));
        grid.insert(7, &big);
        let mut out = Vec::new();
        grid.query(&Aabb::new(Vec3::ZERO, Vec3::new(90.0, 90.0, 1.0)), &mut out);
        assert_eq!(out, vec![7]);
    }

    #[test]
    fn remove_clears_all_cells() {
        let mut grid = SpatialGrid::new();
        let b = Aabb::new(Vec3::ZERO, Vec3::new(200.0, 10.0, 1.0));
        grid.insert(1, &b);
        grid.remove(1, &b);
        let mut out = Vec::new();
        grid.query(&b, &mut out);
        assert!(out.is_empty());
    }
}
