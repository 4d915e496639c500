//! Terrain tile (ADT) parser.
//!
//! An ADT file is a sequence of `{magic, u32 size}` chunks. Unknown
//! chunks are skipped; `MVER` must be 18. Per-map-chunk data (`MCNK`)
//! carries header-relative offsets to its height, normal, layer and
//! alpha sub-blocks; real files disagree about whether those offsets
//! include the sub-chunk header, so the parser sniffs for the sub-magic
//! the way the reference client data tolerates.

use super::cursor::{split_string_block, Cursor};
use crate::coords::TileCoord;
use crate::error::ParseError;
use glam::Vec3;

const MVER: u32 = u32::from_le_bytes(*b"REVM");
const MTEX: u32 = u32::from_le_bytes(*b"XETM");
const MMDX: u32 = u32::from_le_bytes(*b"XDMM");
const MWMO: u32 = u32::from_le_bytes(*b"OMWM");
const MDDF: u32 = u32::from_le_bytes(*b"FDDM");
const MODF: u32 = u32::from_le_bytes(*b"FDOM");
const MH2O: u32 = u32::from_le_bytes(*b"O2HM");
const MCNK: u32 = u32::from_le_bytes(*b"KNCM");
const MCVT: u32 = u32::from_le_bytes(*b"TVCM");
const MCNR: u32 = u32::from_le_bytes(*b"RNCM");
const MCLY: u32 = u32::from_le_bytes(*b"YLCM");
const MCAL: u32 = u32::from_le_bytes(*b"LACM");

pub const ADT_VERSION: u32 = 18;

/// One of up to four texture layers on a map chunk (MCLY entry).
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureLayer {
    pub texture_id: u32,
    pub flags: u32,
    pub alpha_offset: u32,
    pub effect_id: u32,
}

impl TextureLayer {
    pub fn use_alpha(&self) -> bool {
        self.flags & 0x100 != 0
    }

    pub fn compressed_alpha(&self) -> bool {
        self.flags & 0x200 != 0
    }
}

/// One 8x8-quad terrain patch with its interleaved 9x9+8x8 heightfield.
#[derive(Debug, Clone)]
pub struct MapChunk {
    pub index: usize,
    pub position: Vec3,
    pub area_id: u32,
    /// 4x4 hole bitmask in row-column order.
    pub holes: u16,
    pub heights: Vec<f32>,
    pub normals: Vec<i8>,
    pub layers: Vec<TextureLayer>,
    /// Raw MCAL bytes; decoded per-layer by [`decode_alpha`].
    pub alpha_data: Vec<u8>,
    pub has_heights: bool,
}

impl MapChunk {
    fn empty(index: usize) -> Self {
        Self {
            index,
            position: Vec3::ZERO,
            area_id: 0,
            holes: 0,
            heights: Vec::new(),
            normals: Vec::new(),
            layers: Vec::new(),
            alpha_data: Vec::new(),
            has_heights: false,
        }
    }

    /// Whether the quad at (row, col) of the 8x8 grid is a hole.
    pub fn is_hole(&self, row: usize, col: usize) -> bool {
        let bit = (row / 2) * 4 + (col / 2);
        self.holes & (1 << bit) != 0
    }
}

/// Doodad placement record (MDDF, 36 bytes).
#[derive(Debug, Clone, Copy)]
pub struct DoodadPlacement {
    pub name_id: u32,
    pub unique_id: u32,
    /// ADT placement frame; convert with [`crate::coords::adt_to_render`].
    pub position: Vec3,
    pub rotation: Vec3,
    /// 1024 = 1.0.
    pub scale: u16,
    pub flags: u16,
}

/// Building placement record (MODF, 64 bytes).
#[derive(Debug, Clone, Copy)]
pub struct WmoPlacement {
    pub name_id: u32,
    pub unique_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub extent_lower: Vec3,
    pub extent_upper: Vec3,
    pub flags: u16,
    pub doodad_set: u16,
}

/// One liquid layer of a map chunk (MH2O instance).
#[derive(Debug, Clone)]
pub struct WaterLayer {
    pub liquid_type: u16,
    pub min_height: f32,
    pub max_height: f32,
    pub x: u8,
    pub y: u8,
    pub width: u8,
    pub height: u8,
    /// Chunk-wide 8x8 cell mask, one bit per cell.
    pub mask: [u8; 8],
    /// `(width+1) * (height+1)` per-vertex heights.
    pub heights: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct WaterChunk {
    pub layers: Vec<WaterLayer>,
}

/// Fully parsed terrain tile.
#[derive(Debug, Clone)]
pub struct TerrainTile {
    pub version: u32,
    pub coord: TileCoord,
    pub textures: Vec<String>,
    pub doodad_names: Vec<String>,
    pub wmo_names: Vec<String>,
    pub doodad_placements: Vec<DoodadPlacement>,
    pub wmo_placements: Vec<WmoPlacement>,
    /// Exactly 256 chunks in file order (16 rows of 16).
    pub chunks: Vec<MapChunk>,
    /// Water data per map chunk, same indexing as `chunks`.
    pub water: Vec<WaterChunk>,
}

/// Parse a whole ADT file.
pub fn parse_tile(bytes: &[u8], coord: TileCoord) -> Result<TerrainTile, ParseError> {
    let mut cursor = Cursor::new(bytes);
    let mut tile = TerrainTile {
        version: 0,
        coord,
        textures: Vec::new(),
        doodad_names: Vec::new(),
        wmo_names: Vec::new(),
        doodad_placements: Vec::new(),
        wmo_placements: Vec::new(),
        chunks: Vec::with_capacity(256),
        water: vec![WaterChunk::default(); 256],
    };
    let mut chunk_index = 0usize;
    let mut saw_version = false;

    while cursor.remaining() >= 8 {
        let magic = cursor.u32()?;
        let size = cursor.u32()? as usize;
        let data = cursor.take(size)?;

        match magic {
            MVER => {
                let mut c = Cursor::new(data);
                tile.version = c.u32()?;
                if tile.version != ADT_VERSION {
                    return Err(ParseError::BadVersion {
                        expected: ADT_VERSION,
                        found: tile.version,
                    });
                }
                saw_version = true;
            }
            MTEX => {
                tile.textures = split_string_block(data).into_iter().map(|(_, s)| s).collect();
            }
            MMDX => {
                tile.doodad_names =
                    split_string_block(data).into_iter().map(|(_, s)| s).collect();
            }
            MWMO => {
                tile.wmo_names = split_string_block(data).into_iter().map(|(_, s)| s).collect();
            }
            MDDF => parse_mddf(data, &mut tile)?,
            MODF => parse_modf(data, &mut tile)?,
            MH2O => parse_mh2o(data, &mut tile),
            MCNK => {
                if chunk_index < 256 {
                    tile.chunks.push(parse_mcnk(data, chunk_index)?);
                    chunk_index += 1;
                }
            }
            _ => {} // unknown chunk, skipped
        }
    }

    if !saw_version {
        return Err(ParseError::BadMagic {
            expected: "MVER".into(),
            found: "absent".into(),
        });
    }
    Ok(tile)
}

fn parse_mddf(data: &[u8], tile: &mut TerrainTile) -> Result<(), ParseError> {
    let mut c = Cursor::new(data);
    while c.remaining() >= 36 {
        tile.doodad_placements.push(DoodadPlacement {
            name_id: c.u32()?,
            unique_id: c.u32()?,
            position: c.vec3()?,
            rotation: c.vec3()?,
            scale: c.u16()?,
            flags: c.u16()?,
        });
    }
    Ok(())
}

fn parse_modf(data: &[u8], tile: &mut TerrainTile) -> Result<(), ParseError> {
    let mut c = Cursor::new(data);
    while c.remaining() >= 64 {
        let placement = WmoPlacement {
            name_id: c.u32()?,
            unique_id: c.u32()?,
            position: c.vec3()?,
            rotation: c.vec3()?,
            extent_lower: c.vec3()?,
            extent_upper: c.vec3()?,
            flags: c.u16()?,
            doodad_set: c.u16()?,
        };
        c.skip(4)?; // nameSet + padding
        tile.wmo_placements.push(placement);
    }
    Ok(())
}

fn parse_mcnk(data: &[u8], index: usize) -> Result<MapChunk, ParseError> {
    const HEADER: usize = 128;
    if data.len() < HEADER {
        return Err(ParseError::Truncated {
            offset: data.len(),
            wanted: HEADER,
        });
    }
    let mut c = Cursor::new(data);
    let mut chunk = MapChunk::empty(index);

    c.skip(12)?; // flags, indexX, indexY
    let n_layers = c.u32()?;
    c.skip(4)?; // nDoodadRefs
    let ofs_height = c.u32()? as usize;
    let ofs_normal = c.u32()? as usize;
    let ofs_layer = c.u32()? as usize;
    c.skip(4)?; // ofsRefs
    let ofs_alpha = c.u32()? as usize;
    let size_alpha = c.u32()? as usize;
    c.skip(8)?; // ofsShadow, sizeShadow
    chunk.area_id = c.u32()?;
    c.skip(4)?; // nMapObjRefs
    chunk.holes = {
        let mut h = Cursor::new(&data[60..]);
        h.u16()?
    };
    {
        let mut p = Cursor::new(&data[104..]);
        chunk.position = p.vec3()?;
    }

    // Heights: 145 floats (9x9 outer + 8x8 inner, interleaved).
    if ofs_height > 0 && ofs_height < data.len() {
        let skip = sub_header_skip(data, ofs_height, MCVT);
        let start = ofs_height + skip;
        if start + 145 * 4 <= data.len() {
            let mut h = Cursor::new(&data[start..]);
            chunk.heights = (0..145).map(|_| h.f32()).collect::<Result<_, _>>()?;
            chunk.has_heights = true;
        }
    }

    // Normals: 145 * 3 signed bytes.
    if ofs_normal > 0 && ofs_normal < data.len() {
        let skip = sub_header_skip(data, ofs_normal, MCNR);
        let start = ofs_normal + skip;
        if start + 145 * 3 <= data.len() {
            chunk.normals = data[start..start + 145 * 3]
                .iter()
                .map(|&b| b as i8)
                .collect();
        }
    }

    // Texture layers: 16 bytes each, at most 4.
    if ofs_layer > 0 && n_layers > 0 && ofs_layer < data.len() {
        let skip = sub_header_skip(data, ofs_layer, MCLY);
        let start = ofs_layer + skip;
        let count = (n_layers as usize).min(4);
        if start + count * 16 <= data.len() {
            let mut l = Cursor::new(&data[start..]);
            for _ in 0..count {
                chunk.layers.push(TextureLayer {
                    texture_id: l.u32()?,
                    flags: l.u32()?,
                    alpha_offset: l.u32()?,
                    effect_id: l.u32()?,
                });
            }
        }
    }

    // Alpha maps: raw bytes, decoded lazily per layer.
    if ofs_alpha > 0 && size_alpha > 0 && ofs_alpha + size_alpha <= data.len() {
        let skip = sub_header_skip(data, ofs_alpha, MCAL);
        let start = ofs_alpha + skip;
        let end = ofs_alpha + size_alpha;
        if start <= end && end <= data.len() {
            chunk.alpha_data = data[start..end].to_vec();
        }
    }

    Ok(chunk)
}

/// Real ADTs disagree on whether MCNK sub-offsets include the 8-byte
/// sub-chunk header; detect the sub-magic and skip it when present.
fn sub_header_skip(data: &[u8], offset: usize, magic: u32) -> usize {
    if offset + 4 <= data.len() {
        let found = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        if found == magic {
            return 8;
        }
    }
    0
}

fn parse_mh2o(data: &[u8], tile: &mut TerrainTile) {
    const HEADER: usize = 12;
    if data.len() < 256 * HEADER {
        return;
    }
    for chunk_idx in 0..256 {
        let base = chunk_idx * HEADER;
        let ofs_instances = read_u32(data, base) as usize;
        let layer_count = read_u32(data, base + 4) as usize;
        if layer_count == 0 || ofs_instances == 0 || ofs_instances >= data.len() || layer_count > 16
        {
            continue;
        }
        for layer_idx in 0..layer_count {
            let at = ofs_instances + layer_idx * 24;
            if at + 24 > data.len() {
                break;
            }
            let liquid_type = read_u16(data, at);
            let vertex_format = read_u16(data, at + 2);
            let min_height = f32::from_bits(read_u32(data, at + 4));
            let max_height = f32::from_bits(read_u32(data, at + 8));
            let (x, y, mut width, mut height) =
                (data[at + 12], data[at + 13], data[at + 14], data[at + 15]);
            let ofs_mask = read_u32(data, at + 16) as usize;
            let ofs_verts = read_u32(data, at + 20) as usize;

            if width == 0 || height == 0 || x >= 8 || y >= 8 {
                continue;
            }
            width = width.min(8);
            height = height.min(8);
            if x + width > 8 {
                width = 8 - x;
            }
            if y + height > 8 {
                height = 8 - y;
            }

            let mut mask = [0xFFu8; 8];
            if ofs_mask > 0 && ofs_mask + 8 <= data.len() {
                mask.copy_from_slice(&data[ofs_mask..ofs_mask + 8]);
            }

            let vert_count = (width as usize + 1) * (height as usize + 1);
            // Vertex format 2 is depth-only: flat surface at min height.
            let heights = if vertex_format != 2
                && ofs_verts > 0
                && ofs_verts + vert_count * 4 <= data.len()
            {
                (0..vert_count)
                    .map(|i| f32::from_bits(read_u32(data, ofs_verts + i * 4)))
                    .collect()
            } else {
                vec![min_height; vert_count]
            };

            tile.water[chunk_idx].layers.push(WaterLayer {
                liquid_type,
                min_height,
                max_height,
                x,
                y,
                width,
                height,
                mask,
                heights,
            });
        }
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// Decode one layer's 64x64 alpha mask from the chunk's raw MCAL data.
///
/// Supports the three on-disk encodings: raw 4096 B, nibble-packed
/// 2048 B, and RLE (`cmd & 0x80` fill / copy, `(cmd & 0x7F) + 1`
/// count). Invalid layers decode to fully opaque.
pub fn decode_alpha(chunk: &MapChunk, layer: &TextureLayer) -> [u8; 4096] {
    let mut out = [0xFFu8; 4096];
    if !layer.use_alpha() {
        return out;
    }
    let data = &chunk.alpha_data;
    let start = layer.alpha_offset as usize;
    if start >= data.len() {
        return out;
    }
    let slice = &data[start..];

    if layer.compressed_alpha() {
        // RLE: high bit = fill, low 7 bits + 1 = count.
        let mut write = 0usize;
        let mut read = 0usize;
        while write < 4096 && read < slice.len() {
            let cmd = slice[read];
            read += 1;
            let fill = cmd & 0x80 != 0;
            let count = (cmd & 0x7F) as usize + 1;
            if fill {
                if read < slice.len() {
                    let value = slice[read];
                    read += 1;
                    for _ in 0..count {
                        if write >= 4096 {
                            break;
                        }
                        out[write] = value;
                        write += 1;
                    }
                }
            } else {
                for _ in 0..count {
                    if write >= 4096 || read >= slice.len() {
                        break;
                    }
                    out[write] = slice[read];
                    read += 1;
                    write += 1;
                }
            }
        }
    } else if slice.len() >= 4096 {
        out.copy_from_slice(&slice[..4096]);
    } else if slice.len() >= 2048 {
        // Nibble-packed: two 4-bit alphas per byte, scaled to 8 bits.
        for i in 0..2048 {
            let b = slice[i];
            let lo = b & 0x0F;
            let hi = b >> 4;
            out[i * 2] = lo << 4 | lo;
            out[i * 2 + 1] = hi << 4 | hi;
        }
    }
    out
}

#[cfg(test)]
pub mod test_util {
    use super::*;
    use crate::constants::{CHUNK_SIZE, TILE_SIZE, ZERO_POINT};

    fn tagged(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    /// A complete synthetic ADT: 256 flat chunks at `height` with one
    /// grass layer, positioned consistently with `coord`.
    pub fn flat_adt(coord: TileCoord, height: f32) -> Vec<u8> {
        let mut bytes = tagged(b"REVM", &ADT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&tagged(b"XETM", b"tileset\\generic\\grass.blp\0"));

        for index in 0..256usize {
            let (r, c) = (index / 16, index % 16);
            let mut body = vec![0u8; 128];
            body[12..16].copy_from_slice(&1u32.to_le_bytes()); // nLayers
            body[20..24].copy_from_slice(&128u32.to_le_bytes()); // ofsHeight
            body[28..32].copy_from_slice(&708u32.to_le_bytes()); // ofsLayer
            body[52..56].copy_from_slice(&12u32.to_le_bytes()); // areaId
            let pos = [
                ZERO_POINT - coord.row as f32 * TILE_SIZE - r as f32 * CHUNK_SIZE,
                ZERO_POINT - coord.col as f32 * TILE_SIZE - c as f32 * CHUNK_SIZE,
                height,
            ];
            for (i, v) in pos.iter().enumerate() {
                body[104 + i * 4..108 + i * 4].copy_from_slice(&v.to_le_bytes());
            }
            body.extend_from_slice(&[0u8; 145 * 4]); // flat heightfield
            body.extend_from_slice(&[0u8; 16]); // one MCLY entry, texture 0
            bytes.extend_from_slice(&tagged(b"KNCM", &body));
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_alpha(flags: u32, alpha: Vec<u8>) -> (MapChunk, TextureLayer) {
        let mut chunk = MapChunk::empty(0);
        chunk.alpha_data = alpha;
        let layer = TextureLayer {
            texture_id: 1,
            flags,
            alpha_offset: 0,
            effect_id: 0,
        };
        (chunk, layer)
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REVM");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&17u32.to_le_bytes());
        let err = parse_tile(&bytes, TileCoord::new(0, 0)).unwrap_err();
        assert!(matches!(err, ParseError::BadVersion { found: 17, .. }));
    }

    #[test]
    fn rejects_missing_version() {
        let err = parse_tile(&[], TileCoord::new(0, 0)).unwrap_err();
        assert!(matches!(err, ParseError::BadMagic { .. }));
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REVM");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&18u32.to_le_bytes());
        bytes.extend_from_slice(b"XXXX");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[9, 9, 9]);
        let tile = parse_tile(&bytes, TileCoord::new(5, 6)).unwrap();
        assert_eq!(tile.version, 18);
        assert_eq!(tile.coord, TileCoord::new(5, 6));
    }

    #[test]
    fn alpha_encodings_agree() {
        // A 64x64 field expressible in all three encodings: value is
        // constant per byte pair so nibble packing is lossless.
        let mut field = [0u8; 4096];
        for (i, v) in field.iter_mut().enumerate() {
            *v = if (i / 64) % 2 == 0 { 0xFF } else { 0x22 };
        }

        let (chunk_raw, layer_raw) = chunk_with_alpha(0x100, field.to_vec());
        let raw = decode_alpha(&chunk_raw, &layer_raw);

        let mut packed = Vec::with_capacity(2048);
        for i in 0..2048 {
            let lo = field[i * 2] >> 4;
            let hi = field[i * 2 + 1] >> 4;
            packed.push(hi << 4 | lo);
        }
        let (chunk_nib, layer_nib) = chunk_with_alpha(0x100, packed);
        let nibble = decode_alpha(&chunk_nib, &layer_nib);

        let mut rle = Vec::new();
        // 64 rows of a single fill command each.
        for row in 0..64 {
            let value = field[row * 64];
            rle.push(0x80 | 63); // fill, count 64
            rle.push(value);
        }
        let (chunk_rle, layer_rle) = chunk_with_alpha(0x300, rle);
        let rle_out = decode_alpha(&chunk_rle, &layer_rle);

        assert_eq!(raw[..], field[..]);
        assert_eq!(nibble[..], field[..]);
        assert_eq!(rle_out[..], field[..]);
    }

    #[test]
    fn missing_alpha_is_opaque() {
        let (chunk, layer) = chunk_with_alpha(0x100, Vec::new());
        assert!(decode_alpha(&chunk, &layer).iter().all(|&a| a == 0xFF));
    }

    #[test]
    fn hostile_liquid_offsets_are_dropped() {
        // One instance whose x origin lies far outside the 8x8 chunk
        // grid must be skipped, not wrapped or subtracted.
        let mut body = vec![0u8; 256 * 12];
        let inst_at = body.len() as u32;
        body[0..4].copy_from_slice(&inst_at.to_le_bytes()); // ofsInstances
        body[4..8].copy_from_slice(&1u32.to_le_bytes()); // layerCount
        let mut inst = [0u8; 24];
        inst[12] = 200; // x
        inst[13] = 0; // y
        inst[14] = 4; // width
        inst[15] = 4; // height
        body.extend_from_slice(&inst);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REVM");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&ADT_VERSION.to_le_bytes());
        bytes.extend_from_slice(b"O2HM");
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        let tile = parse_tile(&bytes, TileCoord::new(0, 0)).unwrap();
        assert!(tile.water.iter().all(|w| w.layers.is_empty()));
    }

    #[test]
    fn synthetic_tile_round_trips() {
        let coord = TileCoord::new(32, 32);
        let bytes = test_util::flat_adt(coord, 5.0);
        let tile = parse_tile(&bytes, coord).unwrap();
        assert_eq!(tile.chunks.len(), 256);
        assert!(tile.chunks.iter().all(|c| c.has_heights));
        assert_eq!(tile.chunks[77].layers.len(), 1);
        assert!((tile.chunks[0].position.z - 5.0).abs() < 1e-6);
        assert_eq!(tile.textures.len(), 1);
    }

    #[test]
    fn holes_row_column_order() {
        let mut chunk = MapChunk::empty(0);
        chunk.holes = 1 << 5; // quad row 1, col 1 of the 4x4 mask
        assert!(chunk.is_hole(2, 2));
        assert!(chunk.is_hole(3, 3));
        assert!(!chunk.is_hole(0, 0));
        assert!(!chunk.is_hole(2, 4));
    }
}
