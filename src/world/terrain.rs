//! Terrain scene: per-chunk meshes, height queries, surface lookup.
//!
//! Each map chunk becomes one draw keyed to a base texture plus up to
//! three alpha-blended layers. Meshes keep their heightfield so the
//! scene can answer `height_at` and `dominant_texture_at` without
//! touching parsed tiles again.

use crate::constants::CHUNK_UNIT;
use crate::coords::{tile_for, TileCoord};
use crate::gpu::{upload, GpuContext};
use crate::parse::adt::{decode_alpha, MapChunk, TerrainTile};
use glam::Vec3;
use rustc_hash::FxHashMap;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// One texture layer above the base, with its decoded alpha mask.
#[derive(Clone)]
pub struct ChunkLayer {
    pub texture: String,
    pub alpha: Box<[u8; 4096]>,
}

pub struct ChunkGpu {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

pub struct ChunkMesh {
    pub tile: TileCoord,
    pub chunk_index: usize,
    pub position: Vec3,
    pub area_id: u32,
    pub holes: u16,
    pub base_texture: String,
    pub layers: Vec<ChunkLayer>,
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
    /// Bounding sphere for frustum culling.
    pub center: Vec3,
    pub radius: f32,
    /// Outer+inner heightfield retained for point queries.
    heights: Vec<f32>,
    pub gpu: Option<ChunkGpu>,
}

// GPU buffers are per-clone; copies start un-uploaded.
impl Clone for ChunkMesh {
    fn clone(&self) -> Self {
        Self {
            tile: self.tile,
            chunk_index: self.chunk_index,
            position: self.position,
            area_id: self.area_id,
            holes: self.holes,
            base_texture: self.base_texture.clone(),
            layers: self.layers.clone(),
            vertices: self.vertices.clone(),
            indices: self.indices.clone(),
            center: self.center,
            radius: self.radius,
            heights: self.heights.clone(),
            gpu: None,
        }
    }
}

impl ChunkMesh {
    fn is_hole(&self, row: usize, col: usize) -> bool {
        let bit = (row / 2) * 4 + (col / 2);
        self.holes & (1 << bit) != 0
    }

    fn outer_height(&self, row: usize, col: usize) -> f32 {
        self.position.z + self.heights[row * 17 + col]
    }

    /// Fractional (row, col) of a world point inside this chunk, or
    /// None when the point lies outside.
    fn local(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let row = (self.position.x - x) / CHUNK_UNIT;
        let col = (self.position.y - y) / CHUNK_UNIT;
        if (-1e-4..=8.0 + 1e-4).contains(&row) && (-1e-4..=8.0 + 1e-4).contains(&col) {
            Some((row.clamp(0.0, 8.0), col.clamp(0.0, 8.0)))
        } else {
            None
        }
    }

    /// Bilinear height on the outer 9x9 grid; None over holes.
    pub fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        if self.heights.len() != 145 {
            return None;
        }
        let (row, col) = self.local(x, y)?;
        let r0 = (row.floor() as usize).min(7);
        let c0 = (col.floor() as usize).min(7);
        if self.is_hole(r0, c0) {
            return None;
        }
        let fr = row - r0 as f32;
        let fc = col - c0 as f32;
        let h00 = self.outer_height(r0, c0);
        let h01 = self.outer_height(r0, c0 + 1);
        let h10 = self.outer_height(r0 + 1, c0);
        let h11 = self.outer_height(r0 + 1, c0 + 1);
        let top = h00 * (1.0 - fc) + h01 * fc;
        let bottom = h10 * (1.0 - fc) + h11 * fc;
        Some(top * (1.0 - fr) + bottom * fr)
    }

    /// Texture with the highest blend weight at the nearest alpha
    /// texel: weights are `(255 − Σα, α1, α2, α3)`.
    pub fn dominant_texture_at(&self, x: f32, y: f32) -> Option<&str> {
        let (row, col) = self.local(x, y)?;
        let texel_r = ((row / 8.0) * 63.0).round() as usize;
        let texel_c = ((col / 8.0) * 63.0).round() as usize;
        let at = texel_r.min(63) * 64 + texel_c.min(63);

        let alphas: Vec<u8> = self.layers.iter().map(|l| l.alpha[at]).collect();
        let total: u32 = alphas.iter().map(|&a| a as u32).sum();
        let base_weight = 255u32.saturating_sub(total);
        let mut best = base_weight;
        let mut name = self.base_texture.as_str();
        for (layer, &a) in self.layers.iter().zip(&alphas) {
            if (a as u32) > best {
                best = a as u32;
                name = &layer.texture;
            }
        }
        Some(name)
    }

    pub fn upload(&mut self, ctx: &GpuContext) {
        if self.gpu.is_some() || self.vertices.is_empty() {
            return;
        }
        let vertex_buffer = upload::stage_buffer(
            ctx,
            "terrain_chunk_vertices",
            bytemuck::cast_slice(&self.vertices),
            wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = upload::stage_buffer(
            ctx,
            "terrain_chunk_indices",
            bytemuck::cast_slice(&self.indices),
            wgpu::BufferUsages::INDEX,
        );
        self.gpu = Some(ChunkGpu {
            vertex_buffer,
            index_buffer,
            index_count: self.indices.len() as u32,
        });
    }
}

/// Build CPU meshes for every chunk of a parsed tile. Runs on worker
/// threads; no GPU work here.
pub fn build_tile_meshes(tile: &TerrainTile) -> Vec<ChunkMesh> {
    tile.chunks
        .iter()
        .filter(|c| c.has_heights)
        .map(|chunk| build_chunk_mesh(tile, chunk))
        .collect()
}

fn build_chunk_mesh(tile: &TerrainTile, chunk: &MapChunk) -> ChunkMesh {
    let pos = chunk.position;
    let mut vertices = Vec::with_capacity(145);
    let mut min_z = f32::INFINITY;
    let mut max_z = f32::NEG_INFINITY;

    let vertex_at = |row: f32, col: f32, h: f32, n: [f32; 3]| TerrainVertex {
        position: [pos.x - row * CHUNK_UNIT, pos.y - col * CHUNK_UNIT, pos.z + h],
        normal: n,
        uv: [col / 8.0, row / 8.0],
    };
    let normal_at = |i: usize| -> [f32; 3] {
        if chunk.normals.len() == 145 * 3 {
            let n = [
                chunk.normals[i * 3] as f32 / 127.0,
                chunk.normals[i * 3 + 1] as f32 / 127.0,
                chunk.normals[i * 3 + 2] as f32 / 127.0,
            ];
            n
        } else {
            [0.0, 0.0, 1.0]
        }
    };

    // Interleaved rows: 9 outer, then 8 inner, repeated.
    let mut flat = 0usize;
    for row in 0..9 {
        for col in 0..9 {
            let h = chunk.heights[row * 17 + col];
            min_z = min_z.min(pos.z + h);
            max_z = max_z.max(pos.z + h);
            vertices.push(vertex_at(row as f32, col as f32, h, normal_at(flat)));
            flat += 1;
        }
        if row < 8 {
            for col in 0..8 {
                let h = chunk.heights[row * 17 + 9 + col];
                min_z = min_z.min(pos.z + h);
                max_z = max_z.max(pos.z + h);
                vertices.push(vertex_at(
                    row as f32 + 0.5,
                    col as f32 + 0.5,
                    h,
                    normal_at(flat),
                ));
                flat += 1;
            }
        }
    }

    let outer = |r: usize, c: usize| (r * 17 + c) as u32;
    let inner = |r: usize, c: usize| (r * 17 + 9 + c) as u32;
    let mut indices = Vec::with_capacity(8 * 8 * 12);
    for r in 0..8 {
        for c in 0..8 {
            if chunk.is_hole(r, c) {
                continue;
            }
            let center = inner(r, c);
            let tl = outer(r, c);
            let tr = outer(r, c + 1);
            let br = outer(r + 1, c + 1);
            let bl = outer(r + 1, c);
            indices.extend_from_slice(&[center, tl, tr]);
            indices.extend_from_slice(&[center, tr, br]);
            indices.extend_from_slice(&[center, br, bl]);
            indices.extend_from_slice(&[center, bl, tl]);
        }
    }

    let texture_name = |id: u32| {
        tile.textures
            .get(id as usize)
            .cloned()
            .unwrap_or_default()
    };
    let base_texture = chunk
        .layers
        .first()
        .map(|l| texture_name(l.texture_id))
        .unwrap_or_default();
    let layers = chunk
        .layers
        .iter()
        .skip(1)
        .take(3)
        .map(|layer| ChunkLayer {
            texture: texture_name(layer.texture_id),
            alpha: Box::new(decode_alpha(chunk, layer)),
        })
        .collect();

    let half = 4.0 * CHUNK_UNIT;
    let center = Vec3::new(
        pos.x - half,
        pos.y - half,
        if min_z.is_finite() {
            (min_z + max_z) * 0.5
        } else {
            pos.z
        },
    );
    let radius = Vec3::new(half, half, (max_z - min_z).max(0.0) * 0.5).length();

    ChunkMesh {
        tile: tile.coord,
        chunk_index: chunk.index,
        position: pos,
        area_id: chunk.area_id,
        holes: chunk.holes,
        base_texture,
        layers,
        vertices,
        indices,
        center,
        radius,
        heights: chunk.heights.clone(),
        gpu: None,
    }
}

/// All loaded terrain, indexed by tile for mass removal.
#[derive(Default)]
pub struct TerrainScene {
    tiles: FxHashMap<TileCoord, Vec<ChunkMesh>>,
}

impl TerrainScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tile(&mut self, coord: TileCoord, meshes: Vec<ChunkMesh>) {
        self.tiles.insert(coord, meshes);
    }

    pub fn remove_tile(&mut self, coord: TileCoord) {
        self.tiles.remove(&coord);
    }

    pub fn is_loaded(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkMesh> {
        self.tiles.values().flatten()
    }

    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut ChunkMesh> {
        self.tiles.values_mut().flatten()
    }

    fn chunks_covering(&self, x: f32, y: f32) -> impl Iterator<Item = &ChunkMesh> {
        self.tiles
            .get(&tile_for(x, y))
            .into_iter()
            .flatten()
    }

    /// Terrain height at a world point. None when no loaded chunk
    /// covers the point or the covering quad is a hole.
    pub fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        self.chunks_covering(x, y)
            .filter_map(|c| c.height_at(x, y))
            .fold(None, |best, h| {
                Some(best.map_or(h, |b: f32| b.max(h)))
            })
    }

    pub fn area_id_at(&self, x: f32, y: f32) -> Option<u32> {
        self.chunks_covering(x, y)
            .find(|c| c.local(x, y).is_some())
            .map(|c| c.area_id)
    }

    /// Texture name with the highest blend weight under the point;
    /// feeds footstep surface selection.
    pub fn dominant_texture_at(&self, x: f32, y: f32) -> Option<&str> {
        self.chunks_covering(x, y)
            .find_map(|c| c.dominant_texture_at(x, y))
    }
}

#[cfg(test)]
pub mod test_util {
    use super::*;
    use crate::parse::adt::{MapChunk, TextureLayer};

    /// A tile with one chunk anchored at `pos`, flat at `height`
    /// relative offsets zero, with the given hole mask.
    pub fn flat_tile(coord: TileCoord, pos: Vec3, holes: u16) -> TerrainTile {
        let chunk = MapChunk {
            index: 0,
            position: pos,
            area_id: 12,
            holes,
            heights: vec![0.0; 145],
            normals: Vec::new(),
            layers: vec![TextureLayer {
                texture_id: 0,
                flags: 0,
                alpha_offset: 0,
                effect_id: 0,
            }],
            alpha_data: Vec::new(),
            has_heights: true,
        };
        TerrainTile {
            version: 18,
            coord,
            textures: vec!["Tileset\\Elwynn\\ElwynnGrassBase.blp".into()],
            doodad_names: Vec::new(),
            wmo_names: Vec::new(),
            doodad_placements: Vec::new(),
            wmo_placements: Vec::new(),
            chunks: vec![chunk],
            water: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ZERO_POINT;

    fn scene_with_flat_chunk(height: f32, holes: u16) -> (TerrainScene, f32, f32) {
        // Anchor the chunk so its area contains a known query point
        // near the map origin tile.
        let anchor_x = ZERO_POINT - 100.0;
        let anchor_y = ZERO_POINT - 100.0;
        let coord = tile_for(anchor_x - 1.0, anchor_y - 1.0);
        let tile = test_util::flat_tile(
            coord,
            Vec3::new(anchor_x, anchor_y, height),
            holes,
        );
        let meshes = build_tile_meshes(&tile);
        let mut scene = TerrainScene::new();
        scene.insert_tile(coord, meshes);
        // A point inside quad (1,1) of the chunk.
        let qx = anchor_x - 1.5 * CHUNK_UNIT;
        let qy = anchor_y - 1.5 * CHUNK_UNIT;
        (scene, qx, qy)
    }

    #[test]
    fn flat_chunk_height_is_exact() {
        let (scene, x, y) = scene_with_flat_chunk(42.5, 0);
        let h = scene.height_at(x, y).unwrap();
        assert!((h - 42.5).abs() < 1e-3);
        assert_eq!(scene.area_id_at(x, y), Some(12));
    }

    #[test]
    fn holes_yield_no_height() {
        // Hole bit 0 covers quads (0..2, 0..2).
        let (scene, x, y) = scene_with_flat_chunk(10.0, 1);
        assert_eq!(scene.height_at(x, y), None);
    }

    #[test]
    fn uncovered_point_yields_none() {
        let (scene, x, y) = scene_with_flat_chunk(10.0, 0);
        assert_eq!(scene.height_at(x + 5000.0, y + 5000.0), None);
    }

    #[test]
    fn base_texture_dominates_without_layers() {
        let (scene, x, y) = scene_with_flat_chunk(0.0, 0);
        assert_eq!(
            scene.dominant_texture_at(x, y),
            Some("Tileset\\Elwynn\\ElwynnGrassBase.blp")
        );
    }

    #[test]
    fn hole_quads_are_skipped_in_mesh() {
        let coord = TileCoord::new(30, 30);
        let full = build_tile_meshes(&test_util::flat_tile(coord, Vec3::ZERO, 0));
        let holed = build_tile_meshes(&test_util::flat_tile(coord, Vec3::ZERO, 0xFFFF));
        assert_eq!(full[0].indices.len(), 8 * 8 * 12);
        assert!(holed[0].indices.is_empty());
    }
}
