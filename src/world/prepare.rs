//! Worker-side tile preparation.
//!
//! `prepare_tile` runs on the streamer's worker pool: it reads and
//! parses the terrain tile, builds CPU chunk meshes, resolves doodad
//! and building placements into world transforms, and pre-reads every
//! texture and model the tile references. No GPU handles are touched
//! here; `finalize` on the main thread uploads from the result.

use crate::assets::AssetSource;
use crate::coords::{placement_transform, TileCoord};
use crate::error::{EngineError, EngineResult};
use crate::parse::blp::BlpImage;
use crate::parse::m2::M2Model;
use crate::parse::wmo::{WmoGroup, WmoRoot};
use crate::parse::{self, adt};
use crate::world::terrain::{build_tile_meshes, ChunkMesh};
use crate::world::water::{surfaces_for_tile, WaterSurface};
use glam::Mat4;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A doodad placement resolved to a model path and world transform.
#[derive(Debug, Clone)]
pub struct DoodadSpawn {
    pub path: String,
    pub unique_id: u32,
    pub transform: Mat4,
}

/// A building placement resolved to a root path and world transform.
#[derive(Debug, Clone)]
pub struct BuildingSpawn {
    pub path: String,
    pub unique_id: u32,
    pub transform: Mat4,
    pub doodad_set: u16,
}

/// A parsed WMO root with its group files.
pub struct PreparedBuilding {
    pub root: WmoRoot,
    pub groups: Vec<WmoGroup>,
}

/// Everything a finalize needs, produced off the main thread.
pub struct PendingTile {
    pub coord: TileCoord,
    pub chunk_meshes: Vec<ChunkMesh>,
    pub doodads: Vec<DoodadSpawn>,
    pub buildings: Vec<BuildingSpawn>,
    pub water: Vec<WaterSurface>,
    /// Pre-read textures keyed by normalized path.
    pub textures: FxHashMap<String, BlpImage>,
    /// Pre-read doodad models, skins attached.
    pub models: FxHashMap<String, Arc<M2Model>>,
    /// Pre-read building roots and groups.
    pub building_models: FxHashMap<String, Arc<PreparedBuilding>>,
}

impl PendingTile {
    /// Approximate RAM footprint for the tile cache's byte budget.
    pub fn approx_bytes(&self) -> u64 {
        let mut bytes = 0u64;
        for mesh in &self.chunk_meshes {
            bytes += (mesh.vertices.len() * 32 + mesh.indices.len() * 4) as u64;
            bytes += mesh.layers.len() as u64 * 4096;
        }
        for image in self.textures.values() {
            bytes += image.pixels.gpu_bytes(image.width, image.height);
        }
        for model in self.models.values() {
            bytes += (model.vertices.len() * 48 + model.indices.len() * 2) as u64;
        }
        for building in self.building_models.values() {
            for group in &building.groups {
                bytes += (group.positions.len() * 36 + group.indices.len() * 2) as u64;
            }
        }
        bytes + 64 * 1024
    }
}

pub fn adt_path(map: &str, coord: TileCoord) -> String {
    format!(
        "World\\Maps\\{map}\\{map}_{}_{}.adt",
        coord.row, coord.col
    )
}

/// Model path fixups the client data requires: .mdx/.mdl entries name
/// .m2 files on disk.
fn m2_path(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some(stripped) = lower.strip_suffix(".mdx").or(lower.strip_suffix(".mdl")) {
        format!("{stripped}.m2")
    } else {
        lower
    }
}

fn skin_path(model_path: &str) -> Option<String> {
    model_path
        .strip_suffix(".m2")
        .map(|base| format!("{base}00.skin"))
}

fn group_path(root_path: &str, index: usize) -> Option<String> {
    root_path
        .strip_suffix(".wmo")
        .map(|base| format!("{base}_{index:03}.wmo"))
}

/// Prepare one tile end to end. Any parse failure of the terrain file
/// itself fails the tile; missing referenced assets are skipped.
pub fn prepare_tile(
    source: &dyn AssetSource,
    map: &str,
    coord: TileCoord,
) -> EngineResult<PendingTile> {
    let path = adt_path(map, coord);
    let bytes = source
        .read(&path)
        .ok_or(EngineError::MissingAsset { path: path.clone() })?;
    let mut tile = parse::parse_tile(&bytes, coord).map_err(|e| e.at(&path))?;

    // WotLK split ADTs keep placements in a companion _obj0 file.
    if let Some(obj_path) = path.strip_suffix(".adt").map(|b| format!("{b}_obj0.adt")) {
        if let Some(obj_bytes) = source.read(&obj_path) {
            if let Ok(obj_tile) = parse::parse_tile(&obj_bytes, coord) {
                merge_placements(&mut tile, obj_tile);
            }
        }
    }

    let chunk_meshes = build_tile_meshes(&tile);
    let water = surfaces_for_tile(&tile);

    let doodads: Vec<DoodadSpawn> = tile
        .doodad_placements
        .iter()
        .filter_map(|p| {
            let name = tile.doodad_names.get(p.name_id as usize)?;
            Some(DoodadSpawn {
                path: m2_path(name),
                unique_id: p.unique_id,
                transform: placement_transform(
                    p.position,
                    p.rotation,
                    p.scale as f32 / 1024.0,
                ),
            })
        })
        .collect();
    let buildings: Vec<BuildingSpawn> = tile
        .wmo_placements
        .iter()
        .filter_map(|p| {
            let name = tile.wmo_names.get(p.name_id as usize)?;
            Some(BuildingSpawn {
                path: name.to_ascii_lowercase(),
                unique_id: p.unique_id,
                transform: placement_transform(p.position, p.rotation, 1.0),
                doodad_set: p.doodad_set,
            })
        })
        .collect();

    let mut pending = PendingTile {
        coord,
        chunk_meshes,
        doodads,
        buildings,
        water,
        textures: FxHashMap::default(),
        models: FxHashMap::default(),
        building_models: FxHashMap::default(),
    };

    for texture in &tile.textures {
        preread_texture(source, texture, &mut pending.textures);
    }
    let doodad_paths: Vec<String> = pending.doodads.iter().map(|d| d.path.clone()).collect();
    for path in doodad_paths {
        preread_model(source, &path, &mut pending);
    }
    let building_paths: Vec<String> =
        pending.buildings.iter().map(|b| b.path.clone()).collect();
    for path in building_paths {
        preread_building(source, &path, &mut pending);
    }

    Ok(pending)
}

fn merge_placements(tile: &mut adt::TerrainTile, mut obj: adt::TerrainTile) {
    if !obj.doodad_placements.is_empty() {
        tile.doodad_names = obj.doodad_names;
        tile.doodad_placements = std::mem::take(&mut obj.doodad_placements);
    }
    if !obj.wmo_placements.is_empty() {
        tile.wmo_names = obj.wmo_names;
        tile.wmo_placements = std::mem::take(&mut obj.wmo_placements);
    }
}

fn preread_texture(
    source: &dyn AssetSource,
    path: &str,
    out: &mut FxHashMap<String, BlpImage>,
) {
    let key = crate::assets::normalize_path(path);
    if out.contains_key(&key) {
        return;
    }
    let Some(bytes) = source.read(path) else {
        return;
    };
    match parse::parse_image(&bytes) {
        Ok(image) => {
            out.insert(key, image);
        }
        Err(err) => log::debug!("bad texture {path}: {err}"),
    }
}

fn preread_model(source: &dyn AssetSource, path: &str, pending: &mut PendingTile) {
    let key = crate::assets::normalize_path(path);
    if pending.models.contains_key(&key) {
        return;
    }
    let Some(bytes) = source.read(path) else {
        return;
    };
    let mut model = match parse::parse_model(&bytes) {
        Ok(m) => m,
        Err(err) => {
            log::debug!("bad model {path}: {err}");
            return;
        }
    };
    if let Some(skin) = skin_path(&key).and_then(|p| source.read(&p)) {
        if let Err(err) = parse::attach_skin(&skin, &mut model) {
            log::debug!("bad skin for {path}: {err}");
        }
    }
    for def in &model.textures {
        if !def.filename.is_empty() {
            let name = def.filename.clone();
            preread_texture(source, &name, &mut pending.textures);
        }
    }
    pending.models.insert(key, Arc::new(model));
}

fn preread_building(source: &dyn AssetSource, path: &str, pending: &mut PendingTile) {
    let key = crate::assets::normalize_path(path);
    if pending.building_models.contains_key(&key) {
        return;
    }
    let Some(bytes) = source.read(path) else {
        return;
    };
    let root = match parse::parse_root(&bytes) {
        Ok(r) => r,
        Err(err) => {
            log::debug!("bad building {path}: {err}");
            return;
        }
    };
    let mut groups = Vec::with_capacity(root.group_count as usize);
    for index in 0..root.group_count as usize {
        let Some(gpath) = group_path(&key, index) else {
            break;
        };
        let Some(gbytes) = source.read(&gpath) else {
            continue;
        };
        match parse::parse_group(&gbytes) {
            Ok(group) => groups.push(group),
            Err(err) => log::debug!("bad group {gpath}: {err}"),
        }
    }
    for texture in root.textures.values() {
        let name = texture.clone();
        preread_texture(source, &name, &mut pending.textures);
    }
    // WMO-placed doodads reference their own model set.
    let doodad_models: Vec<String> = root.doodad_names.values().map(|n| m2_path(n)).collect();
    pending
        .building_models
        .insert(key, Arc::new(PreparedBuilding { root, groups }));
    for model in doodad_models {
        preread_model(source, &model, pending);
    }
}
