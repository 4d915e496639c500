//! WMO (world map object) parser: root file plus group files.
//!
//! The root file carries materials, texture names, group metadata,
//! doodad sets and the portal graph; each group file carries one
//! room's geometry, render batches, per-triangle material flags and
//! optional liquid. Group geometry stays in model-local coordinates;
//! placement transforms are applied by the scene.

use super::cursor::{split_string_block, Cursor};
use crate::error::ParseError;
use glam::{Quat, Vec2, Vec3};
use rustc_hash::FxHashMap;

// Chunk tags are stored byte-reversed on disk, same as ADT.
const MVER: u32 = u32::from_le_bytes(*b"REVM");
const MOHD: u32 = u32::from_le_bytes(*b"DHOM");
const MOTX: u32 = u32::from_le_bytes(*b"XTOM");
const MOMT: u32 = u32::from_le_bytes(*b"TMOM");
const MOGN: u32 = u32::from_le_bytes(*b"NGOM");
const MOGI: u32 = u32::from_le_bytes(*b"IGOM");
const MODN: u32 = u32::from_le_bytes(*b"NDOM");
const MODD: u32 = u32::from_le_bytes(*b"DDOM");
const MODS: u32 = u32::from_le_bytes(*b"SDOM");
const MOPV: u32 = u32::from_le_bytes(*b"VPOM");
const MOPT: u32 = u32::from_le_bytes(*b"TPOM");
const MOPR: u32 = u32::from_le_bytes(*b"RPOM");
const MOGP: u32 = u32::from_le_bytes(*b"PGOM");
const MOPY: u32 = u32::from_le_bytes(*b"YPOM");
const MOVI: u32 = u32::from_le_bytes(*b"IVOM");
const MOVT: u32 = u32::from_le_bytes(*b"TVOM");
const MONR: u32 = u32::from_le_bytes(*b"RNOM");
const MOTV: u32 = u32::from_le_bytes(*b"VTOM");
const MOCV: u32 = u32::from_le_bytes(*b"VCOM");
const MOBA: u32 = u32::from_le_bytes(*b"ABOM");
const MLIQ: u32 = u32::from_le_bytes(*b"QILM");

pub const WMO_VERSION: u32 = 17;

/// Group flag: interior group (used by portal culling and the indoor
/// capsule radius).
pub const GROUP_FLAG_INTERIOR: u32 = 0x2000;
/// Group flag: exterior group.
pub const GROUP_FLAG_EXTERIOR: u32 = 0x8;

/// Triangle flag in MOPY: no collision.
pub const TRI_FLAG_NO_COLLISION: u8 = 0x04;
/// Triangle flag in MOPY: detail geometry, render only.
pub const TRI_FLAG_DETAIL: u8 = 0x40;

#[derive(Debug, Clone, Copy)]
pub struct WmoMaterial {
    pub flags: u32,
    pub shader: u32,
    pub blend_mode: u32,
    /// Byte offset into the MOTX string block.
    pub texture_1: u32,
    pub texture_2: u32,
}

#[derive(Debug, Clone)]
pub struct WmoGroupInfo {
    pub flags: u32,
    pub bound_min: Vec3,
    pub bound_max: Vec3,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct WmoDoodadSet {
    pub name: String,
    pub start_index: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct WmoDoodadDef {
    /// Byte offset into the MODN string block.
    pub name_offset: u32,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub color: [u8; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct WmoPortal {
    pub start_vertex: u16,
    pub vertex_count: u16,
    pub normal: Vec3,
    pub distance: f32,
}

/// Links one side of a portal to a group.
#[derive(Debug, Clone, Copy)]
pub struct WmoPortalRef {
    pub portal_index: u16,
    pub group_index: u16,
    pub side: i16,
}

#[derive(Debug, Clone, Copy)]
pub struct WmoBatch {
    pub start_index: u32,
    pub index_count: u16,
    pub start_vertex: u16,
    pub last_vertex: u16,
    pub material_id: u8,
}

/// Per-triangle flags and material from MOPY.
#[derive(Debug, Clone, Copy)]
pub struct WmoTriangleInfo {
    pub flags: u8,
    pub material_id: u8,
}

impl WmoTriangleInfo {
    pub fn collidable(&self) -> bool {
        self.flags & (TRI_FLAG_NO_COLLISION | TRI_FLAG_DETAIL) == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct WmoLiquid {
    pub x_verts: u32,
    pub y_verts: u32,
    pub x_tiles: u32,
    pub y_tiles: u32,
    pub base: Vec3,
    pub material_id: u16,
    pub heights: Vec<f32>,
    pub tile_flags: Vec<u8>,
}

impl WmoLiquid {
    pub fn is_present(&self) -> bool {
        self.x_verts > 0 && self.y_verts > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct WmoGroup {
    pub flags: u32,
    pub bound_min: Vec3,
    pub bound_max: Vec3,
    pub portal_start: u16,
    pub portal_count: u16,
    pub liquid_type: u32,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub vertex_colors: Vec<[u8; 4]>,
    pub indices: Vec<u16>,
    pub triangle_info: Vec<WmoTriangleInfo>,
    pub batches: Vec<WmoBatch>,
    pub liquid: WmoLiquid,
}

impl WmoGroup {
    pub fn is_interior(&self) -> bool {
        self.flags & GROUP_FLAG_INTERIOR != 0
    }
}

#[derive(Debug, Clone)]
pub struct WmoRoot {
    pub version: u32,
    pub group_count: u32,
    pub bound_min: Vec3,
    pub bound_max: Vec3,
    pub materials: Vec<WmoMaterial>,
    /// MOTX byte offset to texture path.
    pub textures: FxHashMap<u32, String>,
    pub group_info: Vec<WmoGroupInfo>,
    /// MODN byte offset to doodad model path.
    pub doodad_names: FxHashMap<u32, String>,
    pub doodad_defs: Vec<WmoDoodadDef>,
    pub doodad_sets: Vec<WmoDoodadSet>,
    pub portals: Vec<WmoPortal>,
    pub portal_vertices: Vec<Vec3>,
    pub portal_refs: Vec<WmoPortalRef>,
}

impl WmoRoot {
    /// Doodad definitions belonging to one set, the usual selection
    /// being set 0 plus whatever MODF names.
    pub fn doodads_in_set(&self, set_index: usize) -> &[WmoDoodadDef] {
        let Some(set) = self.doodad_sets.get(set_index) else {
            return &[];
        };
        let start = set.start_index as usize;
        let end = (start + set.count as usize).min(self.doodad_defs.len());
        if start >= end {
            return &[];
        }
        &self.doodad_defs[start..end]
    }
}

pub fn parse_root(bytes: &[u8]) -> Result<WmoRoot, ParseError> {
    let mut c = Cursor::new(bytes);
    let mut root = WmoRoot {
        version: 0,
        group_count: 0,
        bound_min: Vec3::ZERO,
        bound_max: Vec3::ZERO,
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
    let mut group_names: Vec<(usize, String)> = Vec::new();
    let mut raw_info: Vec<(u32, Vec3, Vec3, i32)> = Vec::new();
    let mut saw_header = false;

    while c.remaining() >= 8 {
        let id = c.u32()?;
        let size = c.u32()? as usize;
        let body = c.take(size)?;
        let mut b = Cursor::new(body);
        match id {
            MVER => {
                root.version = b.u32()?;
                if root.version != WMO_VERSION {
                    return Err(ParseError::BadVersion {
                        expected: WMO_VERSION,
                        found: root.version,
                    });
                }
            }
            MOHD => {
                b.skip(4)?; // texture count
                root.group_count = b.u32()?;
                b.skip(20)?; // portals, lights, doodad names/defs/sets
                b.skip(8)?; // ambient color, wmo id
                root.bound_min = b.vec3()?;
                root.bound_max = b.vec3()?;
                saw_header = true;
            }
            MOTX => {
                for (offset, name) in split_string_block(body) {
                    root.textures.insert(offset as u32, name);
                }
            }
            MOMT => {
                let count = size / 64;
                for _ in 0..count {
                    let flags = b.u32()?;
                    let shader = b.u32()?;
                    let blend_mode = b.u32()?;
                    let texture_1 = b.u32()?;
                    b.skip(4)?; // color 1
                    let texture_2 = b.u32()?;
                    b.skip(40)?; // colors, texture 3, runtime data
                    root.materials.push(WmoMaterial {
                        flags,
                        shader,
                        blend_mode,
                        texture_1,
                        texture_2,
                    });
                }
            }
            MOGN => {
                group_names = split_string_block(body);
            }
            MOGI => {
                let count = size / 32;
                for _ in 0..count {
                    let flags = b.u32()?;
                    let min = b.vec3()?;
                    let max = b.vec3()?;
                    let name_offset = b.i32()?;
                    raw_info.push((flags, min, max, name_offset));
                }
            }
            MODN => {
                for (offset, name) in split_string_block(body) {
                    root.doodad_names.insert(offset as u32, name);
                }
            }
            MODD => {
                let count = size / 40;
                for _ in 0..count {
                    // Name offset is 3 bytes, flags in the 4th.
                    let name_and_flags = b.u32()?;
                    let position = b.vec3()?;
                    let rotation =
                        Quat::from_xyzw(b.f32()?, b.f32()?, b.f32()?, b.f32()?);
                    let scale = b.f32()?;
                    let bgra = b.take(4)?;
                    root.doodad_defs.push(WmoDoodadDef {
                        name_offset: name_and_flags & 0x00FF_FFFF,
                        position,
                        rotation,
                        scale,
                        color: [bgra[2], bgra[1], bgra[0], bgra[3]],
                    });
                }
            }
            MODS => {
                let count = size / 32;
                for _ in 0..count {
                    let raw_name = b.take(20)?;
                    let end = raw_name.iter().position(|&x| x == 0).unwrap_or(20);
                    let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
                    let start_index = b.u32()?;
                    let n = b.u32()?;
                    b.skip(4)?;
                    root.doodad_sets.push(WmoDoodadSet {
                        name,
                        start_index,
                        count: n,
                    });
                }
            }
            MOPV => {
                let count = size / 12;
                for _ in 0..count {
                    root.portal_vertices.push(b.vec3()?);
                }
            }
            MOPT => {
                let count = size / 20;
                for _ in 0..count {
                    let start_vertex = b.u16()?;
                    let vertex_count = b.u16()?;
                    let normal = b.vec3()?;
                    let distance = b.f32()?;
                    root.portals.push(WmoPortal {
                        start_vertex,
                        vertex_count,
                        normal,
                        distance,
                    });
                }
            }
            MOPR => {
                let count = size / 8;
                for _ in 0..count {
                    let portal_index = b.u16()?;
                    let group_index = b.u16()?;
                    let side = b.i16()?;
                    b.skip(2)?;
                    root.portal_refs.push(WmoPortalRef {
                        portal_index,
                        group_index,
                        side,
                    });
                }
            }
            _ => {}
        }
    }

    if !saw_header {
        return Err(ParseError::Malformed {
            what: "WMO root",
            detail: "missing MOHD chunk".into(),
        });
    }

    root.group_info = raw_info
        .into_iter()
        .map(|(flags, bound_min, bound_max, name_offset)| {
            let name = if name_offset >= 0 {
                group_names
                    .iter()
                    .find(|(ofs, _)| *ofs == name_offset as usize)
                    .map(|(_, n)| n.clone())
                    .unwrap_or_default()
            } else {
                String::new()
            };
            WmoGroupInfo {
                flags,
                bound_min,
                bound_max,
                name,
            }
        })
        .collect();

    Ok(root)
}

/// Parse one `_NNN.wmo` group file.
pub fn parse_group(bytes: &[u8]) -> Result<WmoGroup, ParseError> {
    let mut c = Cursor::new(bytes);
    let mut group = WmoGroup::default();
    let mut saw_mogp = false;

    while c.remaining() >= 8 {
        let id = c.u32()?;
        let size = c.u32()? as usize;
        let body = c.take(size)?;
        if id == MVER {
            let mut b = Cursor::new(body);
            let version = b.u32()?;
            if version != WMO_VERSION {
                return Err(ParseError::BadVersion {
                    expected: WMO_VERSION,
                    found: version,
                });
            }
        } else if id == MOGP {
            parse_mogp(body, &mut group)?;
            saw_mogp = true;
        }
    }

    if !saw_mogp {
        return Err(ParseError::Malformed {
            what: "WMO group",
            detail: "missing MOGP chunk".into(),
        });
    }
    Ok(group)
}

/// MOGP: a 68-byte header followed by sub-chunks.
fn parse_mogp(body: &[u8], group: &mut WmoGroup) -> Result<(), ParseError> {
    const HEADER_SIZE: usize = 68;
    let mut h = Cursor::new(body);
    group.flags = h.u32()?;
    group.bound_min = h.vec3()?;
    group.bound_max = h.vec3()?;
    h.skip(4)?; // group name offset
    group.portal_start = h.u16()?;
    group.portal_count = h.u16()?;
    h.skip(8)?; // batch counts, padding
    h.skip(16)?; // fog indices
    group.liquid_type = h.u32()?;
    h.seek(HEADER_SIZE)?;

    while h.remaining() >= 8 {
        let id = h.u32()?;
        let size = h.u32()? as usize;
        let body = h.take(size)?;
        let mut b = Cursor::new(body);
        match id {
            MOPY => {
                let count = size / 2;
                for _ in 0..count {
                    group.triangle_info.push(WmoTriangleInfo {
                        flags: b.u8()?,
                        material_id: b.u8()?,
                    });
                }
            }
            MOVI => {
                let count = size / 2;
                for _ in 0..count {
                    group.indices.push(b.u16()?);
                }
            }
            MOVT => {
                let count = size / 12;
                for _ in 0..count {
                    group.positions.push(b.vec3()?);
                }
            }
            MONR => {
                let count = size / 12;
                for _ in 0..count {
                    group.normals.push(b.vec3()?);
                }
            }
            MOTV => {
                let count = size / 8;
                for _ in 0..count {
                    group.tex_coords.push(Vec2::new(b.f32()?, b.f32()?));
                }
            }
            MOCV => {
                let count = size / 4;
                for _ in 0..count {
                    let bgra = b.take(4)?;
                    group
                        .vertex_colors
                        .push([bgra[2], bgra[1], bgra[0], bgra[3]]);
                }
            }
            MOBA => {
                let count = size / 24;
                for _ in 0..count {
                    b.skip(12)?; // int16 bounding box
                    let start_index = b.u32()?;
                    let index_count = b.u16()?;
                    let start_vertex = b.u16()?;
                    let last_vertex = b.u16()?;
                    b.skip(1)?; // flags
                    let material_id = b.u8()?;
                    group.batches.push(WmoBatch {
                        start_index,
                        index_count,
                        start_vertex,
                        last_vertex,
                        material_id,
                    });
                }
            }
            MLIQ => {
                group.liquid = parse_mliq(body, group.liquid_type)?;
            }
            _ => {}
        }
    }

    // Some groups ship without batches; synthesize one over the whole
    // index buffer so they still render.
    if group.batches.is_empty() && !group.indices.is_empty() {
        group.batches.push(WmoBatch {
            start_index: 0,
            index_count: group.indices.len() as u16,
            start_vertex: 0,
            last_vertex: group.positions.len().saturating_sub(1) as u16,
            material_id: 0,
        });
    }
    Ok(())
}

fn parse_mliq(body: &[u8], group_liquid_type: u32) -> Result<WmoLiquid, ParseError> {
    let mut b = Cursor::new(body);
    let mut liquid = WmoLiquid {
        x_verts: b.u32()?,
        y_verts: b.u32()?,
        x_tiles: b.u32()?,
        y_tiles: b.u32()?,
        base: b.vec3()?,
        material_id: b.u16()?,
        heights: Vec::new(),
        tile_flags: Vec::new(),
    };
    // Reserved u16 in some variants.
    if b.remaining() >= 2 {
        b.skip(2)?;
    }

    let vertex_count = liquid.x_verts as usize * liquid.y_verts as usize;
    let tile_count = liquid.x_tiles as usize * liquid.y_tiles as usize;
    if vertex_count > 64 * 64 || tile_count > 64 * 64 {
        return Err(ParseError::BadCount {
            context: format!("WMO liquid grid {vertex_count} verts"),
        });
    }

    if b.remaining() >= vertex_count * 4 {
        for _ in 0..vertex_count {
            liquid.heights.push(b.f32()?);
        }
    } else {
        // Flat surface at the base height.
        liquid.heights = vec![liquid.base.z; vertex_count];
    }
    if b.remaining() >= tile_count {
        liquid.tile_flags = b.take(tile_count)?.to_vec();
    } else {
        liquid.tile_flags = vec![0; tile_count];
    }
    if liquid.material_id == 0 {
        liquid.material_id = group_liquid_type as u16;
    }
    Ok(liquid)
}

#[cfg(test)]
pub mod test_util {
    use super::*;

    /// Emit one chunk with the tag in on-disk (byte-reversed) order.
    pub fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    pub fn mohd(group_count: u32) -> Vec<u8> {
        let mut body = vec![0u8; 64];
        body[4..8].copy_from_slice(&group_count.to_le_bytes());
        chunk(b"DHOM", &body)
    }

    /// A 2-triangle square group with walkable floor geometry at z=0.
    pub fn flat_floor_group(flags: u32) -> Vec<u8> {
        let mut mogp = vec![0u8; 68];
        mogp[0..4].copy_from_slice(&flags.to_le_bytes());

        let verts: [[f32; 3]; 4] = [
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [10.0, 10.0, 0.0],
            [0.0, 10.0, 0.0],
        ];
        let mut movt = Vec::new();
        for v in verts {
            for f in v {
                movt.extend_from_slice(&f.to_le_bytes());
            }
        }
        let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
        let mut movi = Vec::new();
        for i in indices {
            movi.extend_from_slice(&i.to_le_bytes());
        }
        let mopy = vec![0u8, 0, 0, 0]; // two collidable triangles

        mogp.extend_from_slice(&chunk(b"YPOM", &mopy));
        mogp.extend_from_slice(&chunk(b"IVOM", &movi));
        mogp.extend_from_slice(&chunk(b"TVOM", &movt));

        let mut out = chunk(b"REVM", &17u32.to_le_bytes());
        out.extend_from_slice(&chunk(b"PGOM", &mogp));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_requires_header() {
        let bytes = test_util::chunk(b"REVM", &17u32.to_le_bytes());
        assert!(matches!(
            parse_root(&bytes),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn tags_are_matched_in_disk_order() {
        // A writer that emits tags in in-memory order produces chunks
        // the parser must not recognize.
        let mut bytes = test_util::chunk(b"MVER", &17u32.to_le_bytes());
        let mut mohd_body = vec![0u8; 64];
        mohd_body[4..8].copy_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&test_util::chunk(b"MOHD", &mohd_body));
        assert!(matches!(
            parse_root(&bytes),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn root_rejects_wrong_version() {
        let mut bytes = test_util::chunk(b"REVM", &14u32.to_le_bytes());
        bytes.extend_from_slice(&test_util::mohd(1));
        assert!(matches!(
            parse_root(&bytes),
            Err(ParseError::BadVersion { .. })
        ));
    }

    #[test]
    fn parses_minimal_root() {
        let mut bytes = test_util::chunk(b"REVM", &17u32.to_le_bytes());
        bytes.extend_from_slice(&test_util::mohd(3));
        bytes.extend_from_slice(&test_util::chunk(b"XTOM", b"wood.blp\0stone.blp\0"));
        let root = parse_root(&bytes).unwrap();
        assert_eq!(root.group_count, 3);
        assert_eq!(root.textures.get(&0).map(String::as_str), Some("wood.blp"));
        assert_eq!(
            root.textures.get(&9).map(String::as_str),
            Some("stone.blp")
        );
    }

    #[test]
    fn parses_group_geometry_and_synthesizes_batch() {
        let bytes = test_util::flat_floor_group(0);
        let group = parse_group(&bytes).unwrap();
        assert_eq!(group.positions.len(), 4);
        assert_eq!(group.indices.len(), 6);
        assert_eq!(group.triangle_info.len(), 2);
        assert!(group.triangle_info[0].collidable());
        assert_eq!(group.batches.len(), 1);
        assert_eq!(group.batches[0].index_count, 6);
    }

    #[test]
    fn doodad_set_slicing_is_clamped() {
        let root = WmoRoot {
            version: 17,
            group_count: 0,
            bound_min: Vec3::ZERO,
            bound_max: Vec3::ZERO,
            materials: Vec::new(),
            textures: FxHashMap::default(),
            group_info: Vec::new(),
            doodad_names: FxHashMap::default(),
            doodad_defs: vec![
                WmoDoodadDef {
                    name_offset: 0,
                    position: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                    scale: 1.0,
                    color: [255; 4],
                };
                2
            ],
            doodad_sets: vec![WmoDoodadSet {
                name: "Set_$DefaultGlobal".into(),
                start_index: 1,
                count: 5,
            }],
            portals: Vec::new(),
            portal_vertices: Vec::new(),
            portal_refs: Vec::new(),
        };
        assert_eq!(root.doodads_in_set(0).len(), 1);
        assert!(root.doodads_in_set(7).is_empty());
    }
}
