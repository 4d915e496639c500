//! Coordinate frames and tile math.
//!
//! Three frames cross the public API and are kept apart by type:
//!
//! - *Server/wire*: +X north, +Y west, +Z up. Byte order of movement
//!   packets on the wire (TrinityCore/MaNGOS convention).
//! - *Canonical*: same orientation as server; content placement space.
//! - *Render*: what the GPU sees; `render = (canonical.y, canonical.x,
//!   canonical.z)`.
//!
//! Additionally, MDDF/MODF placement records inside terrain tiles use a
//! fourth file-local frame centered on [`ZERO_POINT`]; it never escapes
//! the parsers except through [`adt_to_render`].
//!
//! All conversions are pure and total, and every pair round-trips.

use crate::constants::{MAP_TILES, TILE_SIZE, ZERO_POINT};
use glam::Vec3;
use std::f32::consts::PI;

/// Position in the server/wire frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerPos(pub Vec3);

/// Position in the canonical content frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalPos(pub Vec3);

/// Position in the render frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPos(pub Vec3);

/// Address of one tile on the 64x64 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub row: i32,
    pub col: i32,
}

impl TileCoord {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn in_bounds(&self) -> bool {
        (0..MAP_TILES).contains(&self.row) && (0..MAP_TILES).contains(&self.col)
    }

    /// Chebyshev distance to another tile.
    pub fn chebyshev(&self, other: TileCoord) -> i32 {
        (self.row - other.row).abs().max((self.col - other.col).abs())
    }
}

pub fn server_to_canonical(p: ServerPos) -> CanonicalPos {
    CanonicalPos(Vec3::new(p.0.y, p.0.x, p.0.z))
}

pub fn canonical_to_server(p: CanonicalPos) -> ServerPos {
    ServerPos(Vec3::new(p.0.y, p.0.x, p.0.z))
}

pub fn canonical_to_render(p: CanonicalPos) -> RenderPos {
    RenderPos(Vec3::new(p.0.y, p.0.x, p.0.z))
}

pub fn render_to_canonical(p: RenderPos) -> CanonicalPos {
    CanonicalPos(Vec3::new(p.0.y, p.0.x, p.0.z))
}

pub fn server_to_render(p: ServerPos) -> RenderPos {
    canonical_to_render(server_to_canonical(p))
}

pub fn render_to_server(p: RenderPos) -> ServerPos {
    canonical_to_server(render_to_canonical(p))
}

/// Normalize an angle to `[-PI, PI]`.
pub fn normalize_angle(mut a: f32) -> f32 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Server yaw -> canonical yaw. Under the x/y swap a direction
/// `(cos s, sin s)` becomes `(sin s, cos s)`, so `c = PI/2 - s`.
/// The mapping is its own inverse.
pub fn server_to_canonical_yaw(server_yaw: f32) -> f32 {
    normalize_angle(PI * 0.5 - server_yaw)
}

pub fn canonical_to_server_yaw(canonical_yaw: f32) -> f32 {
    normalize_angle(PI * 0.5 - canonical_yaw)
}

/// Tile containing a render-frame point.
pub fn tile_for(x: f32, y: f32) -> TileCoord {
    TileCoord {
        row: ((ZERO_POINT - y) / TILE_SIZE).floor() as i32,
        col: ((ZERO_POINT - x) / TILE_SIZE).floor() as i32,
    }
}

/// Render-frame position of a tile's origin corner (row/col 0 edge).
pub fn tile_origin(coord: TileCoord) -> Vec3 {
    Vec3::new(
        ZERO_POINT - coord.col as f32 * TILE_SIZE,
        ZERO_POINT - coord.row as f32 * TILE_SIZE,
        0.0,
    )
}

/// MDDF/MODF placement coordinates -> render frame.
///
/// Placement records store `(x, height, z)` in `[0, 2*ZERO_POINT]` with
/// the map center at `ZERO_POINT`.
pub fn adt_to_render(adt: Vec3) -> Vec3 {
    Vec3::new(-(adt.z - ZERO_POINT), -(adt.x - ZERO_POINT), adt.y)
}

/// Render frame -> MDDF/MODF placement coordinates.
pub fn render_to_adt(render: Vec3) -> Vec3 {
    Vec3::new(ZERO_POINT - render.y, render.z, ZERO_POINT - render.x)
}

/// World transform for an MDDF/MODF placement record. The stored
/// rotation is degrees about the placement axes; axis remapping into
/// the render frame folds the 180 degree yaw offset in.
pub fn placement_transform(position: Vec3, rotation_deg: Vec3, scale: f32) -> glam::Mat4 {
    let translation = adt_to_render(position);
    let rx = (-rotation_deg.z).to_radians();
    let ry = (-rotation_deg.x).to_radians();
    let rz = (rotation_deg.y + 180.0).to_radians();
    glam::Mat4::from_translation(translation)
        * glam::Mat4::from_rotation_z(rz)
        * glam::Mat4::from_rotation_y(ry)
        * glam::Mat4::from_rotation_x(rx)
        * glam::Mat4::from_scale(Vec3::splat(scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_canonical_round_trip() {
        let p = ServerPos(Vec3::new(-8913.2, -131.7, 80.4));
        let back = canonical_to_server(server_to_canonical(p));
        assert_eq!(p, back);
    }

    #[test]
    fn render_canonical_round_trip() {
        let p = RenderPos(Vec3::new(123.0, -456.0, 7.5));
        let back = canonical_to_render(render_to_canonical(p));
        assert_eq!(p, back);
    }

    #[test]
    fn adt_round_trip() {
        let adt = Vec3::new(15000.0, 42.0, 18000.0);
        let back = render_to_adt(adt_to_render(adt));
        assert!((adt - back).length() < 1e-3);
    }

    #[test]
    fn yaw_conversion_is_involution() {
        for yaw in [-3.0f32, -1.0, 0.0, 0.5, 2.9] {
            let twice = server_to_canonical_yaw(server_to_canonical_yaw(yaw));
            assert!((normalize_angle(yaw) - twice).abs() < 1e-5, "yaw {yaw}");
        }
    }

    #[test]
    fn origin_is_tile_32_32() {
        let c = tile_for(0.0, 0.0);
        assert_eq!(c, TileCoord::new(32, 32));
    }

    #[test]
    fn tile_origin_maps_back() {
        let c = TileCoord::new(29, 40);
        let o = tile_origin(c);
        // The origin corner belongs to the tile itself; nudge inward.
        let inside = tile_for(o.x - 1.0, o.y - 1.0);
        assert_eq!(inside, c);
    }

    #[test]
    fn chebyshev_distance() {
        let a = TileCoord::new(32, 32);
        assert_eq!(a.chebyshev(TileCoord::new(33, 30)), 2);
        assert_eq!(a.chebyshev(a), 0);
    }
}
