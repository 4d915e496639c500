//! Liquid surfaces: tile water (MH2O) and WMO liquids.
//!
//! Surfaces are small height-field patches with a per-cell render
//! mask, owned either by a tile coord or by a WMO instance so unloads
//! can remove exactly theirs. Point queries feed the swim logic.

use crate::constants::CHUNK_UNIT;
use crate::coords::TileCoord;
use crate::parse::adt::TerrainTile;
use glam::{Mat4, Vec3};

/// Liquid type tags: 0 water, 1 ocean, 2 magma, 3 slime. WMO liquid
/// material ids 4+ (canals etc.) pass through unchanged.
pub type LiquidType = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOwner {
    Tile(TileCoord),
    WmoInstance(u64),
}

/// A height-field liquid patch. `step_row`/`step_col` span one cell,
/// so the patch handles both the terrain's negative-axis convention
/// and rotated WMO placements.
#[derive(Debug, Clone)]
pub struct WaterSurface {
    pub owner: SurfaceOwner,
    pub liquid_type: LiquidType,
    pub origin: Vec3,
    pub step_row: Vec3,
    pub step_col: Vec3,
    pub rows: usize,
    pub cols: usize,
    /// Row-major, one flag per cell.
    pub cell_mask: Vec<bool>,
    /// Row-major, `(rows+1) * (cols+1)` vertex heights.
    pub heights: Vec<f32>,
}

impl WaterSurface {
    /// Bilinear surface height at a world point, None outside the
    /// patch or over a masked-out cell.
    pub fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        let d = Vec3::new(x, y, 0.0) - Vec3::new(self.origin.x, self.origin.y, 0.0);
        let row_len2 = self.step_row.truncate().length_squared();
        let col_len2 = self.step_col.truncate().length_squared();
        if row_len2 <= f32::EPSILON || col_len2 <= f32::EPSILON {
            return None;
        }
        let fr = d.truncate().dot(self.step_row.truncate()) / row_len2;
        let fc = d.truncate().dot(self.step_col.truncate()) / col_len2;
        if fr < 0.0 || fc < 0.0 || fr > self.rows as f32 || fc > self.cols as f32 {
            return None;
        }
        let r0 = (fr.floor() as usize).min(self.rows - 1);
        let c0 = (fc.floor() as usize).min(self.cols - 1);
        if !self.cell_mask.get(r0 * self.cols + c0).copied().unwrap_or(false) {
            return None;
        }
        let stride = self.cols + 1;
        let h = |r: usize, c: usize| self.heights[r * stride + c];
        let tr = fr - r0 as f32;
        let tc = fc - c0 as f32;
        let top = h(r0, c0) * (1.0 - tc) + h(r0, c0 + 1) * tc;
        let bottom = h(r0 + 1, c0) * (1.0 - tc) + h(r0 + 1, c0 + 1) * tc;
        Some(top * (1.0 - tr) + bottom * tr)
    }
}

/// Build surfaces for every liquid layer of a parsed tile.
pub fn surfaces_for_tile(tile: &TerrainTile) -> Vec<WaterSurface> {
    let mut out = Vec::new();
    for (chunk_idx, water) in tile.water.iter().enumerate() {
        let Some(chunk) = tile.chunks.get(chunk_idx) else {
            continue;
        };
        if !chunk.has_heights {
            continue;
        }
        for layer in &water.layers {
            let rows = layer.height as usize;
            let cols = layer.width as usize;
            if rows == 0 || cols == 0 {
                continue;
            }
            let origin = Vec3::new(
                chunk.position.x - layer.y as f32 * CHUNK_UNIT,
                chunk.position.y - layer.x as f32 * CHUNK_UNIT,
                0.0,
            );
            // Mask bits are chunk-absolute; rebase to the layer rect.
            let mut cell_mask = Vec::with_capacity(rows * cols);
            for r in 0..rows {
                let abs_r = layer.y as usize + r;
                for c in 0..cols {
                    let abs_c = layer.x as usize + c;
                    let bit = layer.mask[abs_r.min(7)] >> abs_c.min(7) & 1;
                    cell_mask.push(bit != 0);
                }
            }
            out.push(WaterSurface {
                owner: SurfaceOwner::Tile(tile.coord),
                liquid_type: layer.liquid_type,
                origin,
                step_row: Vec3::new(-CHUNK_UNIT, 0.0, 0.0),
                step_col: Vec3::new(0.0, -CHUNK_UNIT, 0.0),
                rows,
                cols,
                cell_mask,
                heights: layer.heights.clone(),
            });
        }
    }
    out
}

/// Build a surface from a WMO group's liquid under an instance
/// transform. Assumes yaw-only placement rotation, which is what MODF
/// records carry for liquids in practice.
pub fn surface_for_wmo_liquid(
    instance_id: u64,
    transform: &Mat4,
    liquid: &crate::parse::wmo::WmoLiquid,
) -> Option<WaterSurface> {
    if !liquid.is_present() {
        return None;
    }
    let rows = liquid.y_tiles.max(1) as usize;
    let cols = liquid.x_tiles.max(1) as usize;
    let local_origin = liquid.base;
    let origin = transform.transform_point3(local_origin);
    let step_col = transform.transform_vector3(Vec3::new(4.1666665, 0.0, 0.0));
    let step_row = transform.transform_vector3(Vec3::new(0.0, 4.1666665, 0.0));

    let stride = liquid.x_verts.max(1) as usize;
    let mut heights = Vec::with_capacity((rows + 1) * (cols + 1));
    for r in 0..=rows {
        for c in 0..=cols {
            let src = r.min(liquid.y_verts as usize - 1) * stride
                + c.min(liquid.x_verts as usize - 1);
            let local_h = liquid.heights.get(src).copied().unwrap_or(local_origin.z);
            heights.push(
                transform
                    .transform_point3(Vec3::new(0.0, 0.0, local_h))
                    .z,
            );
        }
    }
    let cell_mask = (0..rows * cols)
        .map(|i| {
            // Tile flag 0x0F means "don't render".
            liquid
                .tile_flags
                .get(i)
                .map_or(true, |&f| f & 0x0F != 0x0F)
        })
        .collect();

    Some(WaterSurface {
        owner: SurfaceOwner::WmoInstance(instance_id),
        liquid_type: liquid.material_id,
        origin,
        step_row,
        step_col,
        rows,
        cols,
        cell_mask,
        heights,
    })
}

/// All liquid patches currently loaded.
#[derive(Default)]
pub struct WaterScene {
    surfaces: Vec<WaterSurface>,
    history_ready: bool,
}

impl WaterScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_surface(&mut self, surface: WaterSurface) {
        self.surfaces.push(surface);
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn surfaces(&self) -> &[WaterSurface] {
        &self.surfaces
    }

    pub fn remove_tile(&mut self, coord: TileCoord) {
        self.surfaces
            .retain(|s| s.owner != SurfaceOwner::Tile(coord));
    }

    pub fn remove_wmo_instance(&mut self, instance_id: u64) {
        self.surfaces
            .retain(|s| s.owner != SurfaceOwner::WmoInstance(instance_id));
    }

    pub fn clear(&mut self) {
        self.surfaces.clear();
    }

    /// Highest liquid surface over the point.
    pub fn water_height_at(&self, x: f32, y: f32) -> Option<f32> {
        self.surfaces
            .iter()
            .filter_map(|s| s.height_at(x, y))
            .fold(None, |best, h| Some(best.map_or(h, |b: f32| b.max(h))))
    }

    pub fn water_type_at(&self, x: f32, y: f32) -> Option<LiquidType> {
        let mut best: Option<(f32, LiquidType)> = None;
        for s in &self.surfaces {
            if let Some(h) = s.height_at(x, y) {
                if best.map_or(true, |(bh, _)| h > bh) {
                    best = Some((h, s.liquid_type));
                }
            }
        }
        best.map(|(_, t)| t)
    }

    /// Scene-history capture gate for screen-space refraction: the
    /// first frame has nothing valid to copy, so the capture is
    /// skipped once.
    pub fn take_history_capture(&mut self) -> bool {
        std::mem::replace(&mut self.history_ready, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_patch(owner: SurfaceOwner, height: f32) -> WaterSurface {
        WaterSurface {
            owner,
            liquid_type: 1,
            origin: Vec3::new(100.0, 100.0, 0.0),
            step_row: Vec3::new(-1.0, 0.0, 0.0),
            step_col: Vec3::new(0.0, -1.0, 0.0),
            rows: 2,
            cols: 2,
            cell_mask: vec![true, true, true, false],
            heights: vec![height; 9],
        }
    }

    #[test]
    fn height_inside_and_outside() {
        let mut scene = WaterScene::new();
        scene.add_surface(flat_patch(SurfaceOwner::Tile(TileCoord::new(1, 1)), 30.0));
        assert_eq!(scene.water_height_at(99.5, 99.5), Some(30.0));
        assert_eq!(scene.water_type_at(99.5, 99.5), Some(1));
        assert_eq!(scene.water_height_at(105.0, 99.5), None);
    }

    #[test]
    fn masked_cell_is_dry() {
        let scene = {
            let mut s = WaterScene::new();
            s.add_surface(flat_patch(SurfaceOwner::Tile(TileCoord::new(1, 1)), 5.0));
            s
        };
        // Cell (1,1) is masked out.
        assert_eq!(scene.water_height_at(98.5, 98.5), None);
    }

    #[test]
    fn removal_by_owner() {
        let mut scene = WaterScene::new();
        scene.add_surface(flat_patch(SurfaceOwner::Tile(TileCoord::new(1, 1)), 5.0));
        scene.add_surface(flat_patch(SurfaceOwner::WmoInstance(9), 6.0));
        scene.remove_tile(TileCoord::new(1, 1));
        assert_eq!(scene.surface_count(), 1);
        scene.remove_wmo_instance(9);
        assert_eq!(scene.surface_count(), 0);
    }

    #[test]
    fn history_capture_skips_first_frame() {
        let mut scene = WaterScene::new();
        assert!(!scene.take_history_capture());
        assert!(scene.take_history_capture());
    }
}
