//! M2 model parser (WotLK 3.3.5a layout, version 260..=264).
//!
//! An M2 carries skeletal geometry, per-sequence animation tracks,
//! texture and material tables, particle emitter definitions and a
//! low-resolution bounding mesh used for collision. Rendering batches
//! live in a companion `.skin` file attached via [`attach_skin`];
//! sequences whose flag bit `0x20` is clear keep their keyframes in
//! external `.anim` files attached via [`attach_anim`].
//!
//! Format notes that are easy to get wrong:
//! - Animation tracks are an array-of-arrays: the track header points
//!   at per-sequence `{count, offset}` pairs.
//! - Rotation keys are compressed quaternions, `i16[4]` with an offset
//!   mapping (not a plain division).
//! - The on-disk bone struct is 88 bytes; the skin batch is 24 bytes.

use super::cursor::{array_range, Cursor};
use crate::error::ParseError;
use glam::{Quat, Vec3};

/// Sequences with this flag bit keep keyframes inside the .m2 itself.
pub const SEQ_FLAG_INTERNAL: u32 = 0x20;

const EMITTER_STRUCT_SIZE: usize = 476;

#[derive(Debug, Clone, Copy)]
pub struct M2Sequence {
    pub id: u16,
    pub variation: u16,
    pub duration_ms: u32,
    pub moving_speed: f32,
    pub flags: u32,
    pub bound_min: Vec3,
    pub bound_max: Vec3,
    pub bound_radius: f32,
}

impl M2Sequence {
    pub fn has_external_data(&self) -> bool {
        self.flags & SEQ_FLAG_INTERNAL == 0
    }
}

/// Location of one sub-array of track data on disk, kept so external
/// `.anim` payloads can be resolved later.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubArrayRef {
    pub n_timestamps: u32,
    pub ofs_timestamps: u32,
    pub n_keys: u32,
    pub ofs_keys: u32,
}

#[derive(Debug, Clone)]
pub struct TrackKeys<T> {
    pub timestamps: Vec<u32>,
    pub values: Vec<T>,
}

// Manual impl: the derive would demand `T: Default`, which key value
// types have no reason to provide.
impl<T> Default for TrackKeys<T> {
    fn default() -> Self {
        Self {
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> TrackKeys<T> {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Per-sequence keyframe track.
#[derive(Debug, Clone, Default)]
pub struct Track<T> {
    pub interpolation: u16,
    /// Index into the model's global sequence durations, or -1.
    pub global_sequence: i16,
    pub sequences: Vec<TrackKeys<T>>,
    /// Disk refs parallel to `sequences`; consumed by [`attach_anim`].
    pub refs: Vec<SubArrayRef>,
}

impl<T> Track<T> {
    pub fn has_data(&self) -> bool {
        self.sequences.iter().any(|s| !s.is_empty())
    }
}

/// Values a track can carry, with their on-disk decoding.
pub trait TrackValue: Sized {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ParseError>;
    fn disk_size() -> usize;
}

impl TrackValue for Vec3 {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ParseError> {
        c.vec3()
    }
    fn disk_size() -> usize {
        12
    }
}

impl TrackValue for f32 {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ParseError> {
        c.f32()
    }
    fn disk_size() -> usize {
        4
    }
}

impl TrackValue for Quat {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ParseError> {
        let mut v = [0f32; 4];
        for out in v.iter_mut() {
            let raw = c.i16()?;
            *out = decompress_quat_component(raw);
        }
        Ok(Quat::from_xyzw(v[0], v[1], v[2], v[3]))
    }
    fn disk_size() -> usize {
        8
    }
}

/// `i16` quaternion component: values are stored shifted by 32767 with
/// the sign folded in.
fn decompress_quat_component(raw: i16) -> f32 {
    let shifted = if raw < 0 {
        raw as i32 + 32768
    } else {
        raw as i32 - 32767
    };
    shifted as f32 / 32767.0
}

#[derive(Debug, Clone, Default)]
pub struct M2Bone {
    pub key_bone_id: i32,
    pub flags: u32,
    pub parent: i16,
    pub pivot: Vec3,
    pub translation: Track<Vec3>,
    pub rotation: Track<Quat>,
    pub scale: Track<Vec3>,
}

/// On-disk vertex layout, kept bit-compatible for direct GPU upload.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct M2Vertex {
    pub position: [f32; 3],
    pub bone_weights: [u8; 4],
    pub bone_indices: [u8; 4],
    pub normal: [f32; 3],
    pub tex_coords: [[f32; 2]; 2],
}

#[derive(Debug, Clone)]
pub struct M2TextureDef {
    pub kind: u32,
    pub flags: u32,
    pub filename: String,
}

#[derive(Debug, Clone, Copy)]
pub struct M2Material {
    pub flags: u16,
    pub blend_mode: u16,
}

#[derive(Debug, Clone, Default)]
pub struct TextureTransform {
    pub translation: Track<Vec3>,
    pub rotation: Track<Quat>,
    pub scaling: Track<Vec3>,
}

/// Simplified emitter definition; dynamic tracks are sampled at their
/// first key, which is exact for the constant emitters doodads use.
#[derive(Debug, Clone, Copy)]
pub struct ParticleEmitterDef {
    pub id: u32,
    pub flags: u32,
    pub position: Vec3,
    pub bone: u16,
    pub texture: u16,
    pub blending_type: u8,
    pub emitter_type: u8,
    pub emission_speed: f32,
    pub speed_variation: f32,
    pub gravity: f32,
    pub lifespan: f32,
    pub emission_rate: f32,
}

/// Rendering batch resolved from the .skin file.
#[derive(Debug, Clone, Copy)]
pub struct M2Batch {
    pub flags: u8,
    pub shader_id: u16,
    pub submesh_index: u16,
    pub material_index: u16,
    pub texture_lookup_index: u16,
    pub texture_transform_index: u16,
    pub index_start: u32,
    pub index_count: u32,
    pub submesh_id: u16,
    pub submesh_level: u16,
}

#[derive(Debug, Clone)]
pub struct M2Model {
    pub name: String,
    pub version: u32,
    pub global_sequences: Vec<u32>,
    pub sequences: Vec<M2Sequence>,
    pub bones: Vec<M2Bone>,
    pub vertices: Vec<M2Vertex>,
    pub textures: Vec<M2TextureDef>,
    pub materials: Vec<M2Material>,
    pub texture_lookup: Vec<u16>,
    pub texture_transform_lookup: Vec<i16>,
    pub texture_transforms: Vec<TextureTransform>,
    pub emitters: Vec<ParticleEmitterDef>,
    pub bound_min: Vec3,
    pub bound_max: Vec3,
    pub bound_radius: f32,
    pub bounding_vertices: Vec<Vec3>,
    pub bounding_triangles: Vec<u16>,
    pub bounding_normals: Vec<Vec3>,
    /// Filled by [`attach_skin`].
    pub indices: Vec<u16>,
    pub batches: Vec<M2Batch>,
}

impl M2Model {
    /// Lowest sequence index whose animation id matches.
    pub fn find_sequence(&self, animation_id: u16) -> Option<usize> {
        self.sequences.iter().position(|s| s.id == animation_id)
    }
}

pub fn parse_model(bytes: &[u8]) -> Result<M2Model, ParseError> {
    let mut c = Cursor::new(bytes);
    let magic = c.tag()?;
    if &magic != b"MD20" {
        return Err(ParseError::BadMagic {
            expected: "MD20".into(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let version = c.u32()?;
    if !(260..=264).contains(&version) {
        return Err(ParseError::BadVersion {
            expected: 264,
            found: version,
        });
    }

    let name_length = c.u32()?;
    let name_offset = c.u32()?;
    c.skip(4)?; // global flags

    let (n_global_seq, ofs_global_seq) = (c.u32()?, c.u32()?);
    let (n_sequences, ofs_sequences) = (c.u32()?, c.u32()?);
    c.skip(8)?; // animation lookup
    let (n_bones, ofs_bones) = (c.u32()?, c.u32()?);
    c.skip(8)?; // key bone lookup
    let (n_vertices, ofs_vertices) = (c.u32()?, c.u32()?);
    c.skip(4)?; // nViews
    c.skip(8)?; // colors
    let (n_textures, ofs_textures) = (c.u32()?, c.u32()?);
    c.skip(8)?; // transparency
    let (n_uv_anim, ofs_uv_anim) = (c.u32()?, c.u32()?);
    c.skip(8)?; // tex replace
    let (n_materials, ofs_materials) = (c.u32()?, c.u32()?);
    c.skip(8)?; // bone lookup table
    let (n_tex_lookup, ofs_tex_lookup) = (c.u32()?, c.u32()?);
    c.skip(8)?; // tex unit lookup
    c.skip(8)?; // transparency lookup
    let (n_uv_anim_lookup, ofs_uv_anim_lookup) = (c.u32()?, c.u32()?);

    c.skip(28)?; // vertex box + radius
    let bound_min = c.vec3()?;
    let bound_max = c.vec3()?;
    let bound_radius = c.f32()?;

    let (n_bound_tris, ofs_bound_tris) = (c.u32()?, c.u32()?);
    let (n_bound_verts, ofs_bound_verts) = (c.u32()?, c.u32()?);
    let (n_bound_normals, ofs_bound_normals) = (c.u32()?, c.u32()?);

    c.skip(16)?; // attachments + lookup
    c.skip(24)?; // events, lights, cameras
    c.skip(8)?; // camera lookup
    c.skip(8)?; // ribbon emitters
    let (n_emitters, ofs_emitters) = (c.u32()?, c.u32()?);

    let name = {
        let range = array_range(bytes, name_length, name_offset, 1)?;
        let raw = &bytes[range];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    };

    let global_sequences = {
        let range = array_range(bytes, n_global_seq, ofs_global_seq, 4)?;
        let mut r = Cursor::new(&bytes[range]);
        (0..n_global_seq).map(|_| r.u32()).collect::<Result<_, _>>()?
    };

    let sequences = parse_sequences(bytes, n_sequences, ofs_sequences)?;
    let n_seq = sequences.len();
    let bones = parse_bones(bytes, n_bones, ofs_bones, &sequences)?;
    let vertices = parse_vertices(bytes, n_vertices, ofs_vertices)?;
    let textures = parse_textures(bytes, n_textures, ofs_textures)?;
    let materials = {
        let range = array_range(bytes, n_materials, ofs_materials, 4)?;
        let mut r = Cursor::new(&bytes[range]);
        (0..n_materials)
            .map(|_| {
                Ok(M2Material {
                    flags: r.u16()?,
                    blend_mode: r.u16()?,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?
    };
    let texture_lookup = read_u16_array(bytes, n_tex_lookup, ofs_tex_lookup)?;
    let texture_transform_lookup = read_u16_array(bytes, n_uv_anim_lookup, ofs_uv_anim_lookup)?
        .into_iter()
        .map(|v| v as i16)
        .collect();
    let texture_transforms = parse_texture_transforms(bytes, n_uv_anim, ofs_uv_anim, n_seq)?;
    let emitters = parse_emitters(bytes, n_emitters, ofs_emitters);

    let bounding_vertices = read_vec3_array(bytes, n_bound_verts, ofs_bound_verts)?;
    let bounding_triangles = read_u16_array(bytes, n_bound_tris, ofs_bound_tris)?;
    let bounding_normals = read_vec3_array(bytes, n_bound_normals, ofs_bound_normals)?;

    Ok(M2Model {
        name,
        version,
        global_sequences,
        sequences,
        bones,
        vertices,
        textures,
        materials,
        texture_lookup,
        texture_transform_lookup,
        texture_transforms,
        emitters,
        bound_min,
        bound_max,
        bound_radius,
        bounding_vertices,
        bounding_triangles,
        bounding_normals,
        indices: Vec::new(),
        batches: Vec::new(),
    })
}

fn parse_sequences(
    bytes: &[u8],
    count: u32,
    offset: u32,
) -> Result<Vec<M2Sequence>, ParseError> {
    let range = array_range(bytes, count, offset, 64)?;
    let mut r = Cursor::new(&bytes[range]);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = r.u16()?;
        let variation = r.u16()?;
        let duration_ms = r.u32()?;
        let moving_speed = r.f32()?;
        let flags = r.u32()?;
        r.skip(4)?; // frequency + padding
        r.skip(8)?; // replay min/max
        r.skip(4)?; // blend time
        let bound_min = r.vec3()?;
        let bound_max = r.vec3()?;
        let bound_radius = r.f32()?;
        r.skip(4)?; // next animation + alias
        out.push(M2Sequence {
            id,
            variation,
            duration_ms,
            moving_speed,
            flags,
            bound_min,
            bound_max,
            bound_radius,
        });
    }
    Ok(out)
}

/// Read a 20-byte track header plus its per-sequence sub-arrays.
/// Keyframes for external sequences stay empty; their refs are kept.
fn parse_track<T: TrackValue>(
    bytes: &[u8],
    track_header: &mut Cursor<'_>,
    sequences: &[M2Sequence],
) -> Result<Track<T>, ParseError> {
    let interpolation = track_header.u16()?;
    let global_sequence = track_header.i16()?;
    let n_ts = track_header.u32()?;
    let ofs_ts = track_header.u32()?;
    let n_keys = track_header.u32()?;
    let ofs_keys = track_header.u32()?;

    let mut track = Track {
        interpolation,
        global_sequence,
        sequences: Vec::new(),
        refs: Vec::new(),
    };
    let sub_count = n_ts.min(n_keys) as usize;
    if sub_count == 0 {
        return Ok(track);
    }
    // Each sub-array header is a {count, offset} pair.
    let ts_heads = array_range(bytes, sub_count as u32, ofs_ts, 8)?;
    let key_heads = array_range(bytes, sub_count as u32, ofs_keys, 8)?;
    let mut ts_cursor = Cursor::new(&bytes[ts_heads]);
    let mut key_cursor = Cursor::new(&bytes[key_heads]);

    for i in 0..sub_count {
        let sub = SubArrayRef {
            n_timestamps: ts_cursor.u32()?,
            ofs_timestamps: ts_cursor.u32()?,
            n_keys: key_cursor.u32()?,
            ofs_keys: key_cursor.u32()?,
        };
        // Tracks with a global sequence have a single sub-array with
        // internal data; otherwise sequence flags decide.
        let internal = if global_sequence >= 0 {
            true
        } else {
            sequences.get(i).map_or(true, |s| !s.has_external_data())
        };
        let keys = if internal {
            read_sub_array::<T>(bytes, &sub)?
        } else {
            TrackKeys::default()
        };
        track.sequences.push(keys);
        track.refs.push(sub);
    }
    Ok(track)
}

fn read_sub_array<T: TrackValue>(
    data: &[u8],
    sub: &SubArrayRef,
) -> Result<TrackKeys<T>, ParseError> {
    // Damaged models occasionally advertise absurd counts; treat them
    // as empty rather than failing the whole model.
    if sub.n_timestamps > 4096 || sub.n_keys > 4096 {
        return Ok(TrackKeys::default());
    }
    let count = sub.n_timestamps.min(sub.n_keys);
    if count == 0 {
        return Ok(TrackKeys::default());
    }
    let ts_range = array_range(data, count, sub.ofs_timestamps, 4)?;
    let key_range = array_range(data, count, sub.ofs_keys, T::disk_size())?;
    let mut ts = Cursor::new(&data[ts_range]);
    let mut keys = Cursor::new(&data[key_range]);
    let mut out = TrackKeys {
        timestamps: Vec::with_capacity(count as usize),
        values: Vec::with_capacity(count as usize),
    };
    for _ in 0..count {
        out.timestamps.push(ts.u32()?);
        out.values.push(T::read(&mut keys)?);
    }
    Ok(out)
}

fn parse_bones(
    bytes: &[u8],
    count: u32,
    offset: u32,
    sequences: &[M2Sequence],
) -> Result<Vec<M2Bone>, ParseError> {
    const BONE_SIZE: usize = 88;
    let range = array_range(bytes, count, offset, BONE_SIZE)?;
    let start = range.start;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let at = start + i * BONE_SIZE;
        let mut b = Cursor::new(&bytes[at..at + BONE_SIZE]);
        let key_bone_id = b.i32()?;
        let flags = b.u32()?;
        let parent = b.i16()?;
        b.skip(2)?; // submesh id
        b.skip(4)?; // bone name CRC
        let translation = parse_track::<Vec3>(bytes, &mut b, sequences)?;
        let rotation = parse_track::<Quat>(bytes, &mut b, sequences)?;
        let scale = parse_track::<Vec3>(bytes, &mut b, sequences)?;
        let pivot = b.vec3()?;
        out.push(M2Bone {
            key_bone_id,
            flags,
            parent,
            pivot,
            translation,
            rotation,
            scale,
        });
    }
    Ok(out)
}

fn parse_vertices(bytes: &[u8], count: u32, offset: u32) -> Result<Vec<M2Vertex>, ParseError> {
    const VERTEX_SIZE: usize = 48;
    let range = array_range(bytes, count, offset, VERTEX_SIZE)?;
    let mut r = Cursor::new(&bytes[range]);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let position = [r.f32()?, r.f32()?, r.f32()?];
        let mut bone_weights = [0u8; 4];
        let mut bone_indices = [0u8; 4];
        for w in bone_weights.iter_mut() {
            *w = r.u8()?;
        }
        for idx in bone_indices.iter_mut() {
            *idx = r.u8()?;
        }
        let normal = [r.f32()?, r.f32()?, r.f32()?];
        let tex_coords = [[r.f32()?, r.f32()?], [r.f32()?, r.f32()?]];
        out.push(M2Vertex {
            position,
            bone_weights,
            bone_indices,
            normal,
            tex_coords,
        });
    }
    Ok(out)
}

fn parse_textures(bytes: &[u8], count: u32, offset: u32) -> Result<Vec<M2TextureDef>, ParseError> {
    let range = array_range(bytes, count, offset, 16)?;
    let start = range.start;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let mut r = Cursor::new(&bytes[start + i * 16..start + (i + 1) * 16]);
        let kind = r.u32()?;
        let flags = r.u32()?;
        let name_len = r.u32()?;
        let name_ofs = r.u32()?;
        let filename = if kind == 0 && name_len > 1 {
            let range = array_range(bytes, name_len, name_ofs, 1)?;
            let raw = &bytes[range];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        } else {
            // Non-zero types are replaceable textures resolved at
            // instance creation (skins, mounts).
            String::new()
        };
        out.push(M2TextureDef {
            kind,
            flags,
            filename,
        });
    }
    Ok(out)
}

fn parse_texture_transforms(
    bytes: &[u8],
    count: u32,
    offset: u32,
    _n_sequences: usize,
) -> Result<Vec<TextureTransform>, ParseError> {
    const SIZE: usize = 60; // three 20-byte tracks
    if count == 0 {
        return Ok(Vec::new());
    }
    let range = array_range(bytes, count, offset, SIZE)?;
    let start = range.start;
    let mut out = Vec::with_capacity(count as usize);
    // UV tracks are keyed like bone tracks; reuse an empty sequence
    // slice so all their data parses as internal.
    let no_sequences: [M2Sequence; 0] = [];
    for i in 0..count as usize {
        let mut r = Cursor::new(&bytes[start + i * SIZE..start + (i + 1) * SIZE]);
        out.push(TextureTransform {
            translation: parse_track::<Vec3>(bytes, &mut r, &no_sequences)?,
            rotation: parse_track::<Quat>(bytes, &mut r, &no_sequences)?,
            scaling: parse_track::<Vec3>(bytes, &mut r, &no_sequences)?,
        });
    }
    Ok(out)
}

fn parse_emitters(bytes: &[u8], count: u32, offset: u32) -> Vec<ParticleEmitterDef> {
    let mut out = Vec::new();
    if count == 0 || count > 256 {
        return out;
    }
    let Ok(range) = array_range(bytes, count, offset, EMITTER_STRUCT_SIZE) else {
        return out;
    };
    let start = range.start;
    for i in 0..count as usize {
        let base = start + i * EMITTER_STRUCT_SIZE;
        let mut r = Cursor::new(&bytes[base..base + EMITTER_STRUCT_SIZE]);
        let Ok(def) = read_emitter(bytes, &mut r, base) else {
            continue;
        };
        out.push(def);
    }
    out
}

fn read_emitter(
    bytes: &[u8],
    r: &mut Cursor<'_>,
    base: usize,
) -> Result<ParticleEmitterDef, ParseError> {
    let id = r.u32()?;
    let flags = r.u32()?;
    let position = r.vec3()?;
    let bone = r.u16()?;
    let texture = r.u16()?;
    r.skip(16)?; // geometry/recursion model name arrays
    let blending_type = r.u8()?;
    let emitter_type = r.u8()?;

    // Dynamic tracks sampled at their first key. Track block starts at
    // emitter offset 0x34, 20 bytes apiece.
    let track_at = |index: usize| base + 0x34 + index * 20;
    let emission_speed = first_track_key(bytes, track_at(0)).unwrap_or(0.0);
    let speed_variation = first_track_key(bytes, track_at(1)).unwrap_or(0.0);
    let gravity = first_track_key(bytes, track_at(4)).unwrap_or(0.0);
    let lifespan = first_track_key(bytes, track_at(5)).unwrap_or(1.0);
    let emission_rate = first_track_key(bytes, track_at(6)).unwrap_or(0.0);

    Ok(ParticleEmitterDef {
        id,
        flags,
        position,
        bone,
        texture,
        blending_type,
        emitter_type,
        emission_speed,
        speed_variation,
        gravity,
        lifespan,
        emission_rate,
    })
}

fn first_track_key(bytes: &[u8], at: usize) -> Option<f32> {
    if at + 20 > bytes.len() {
        return None;
    }
    let mut h = Cursor::new(&bytes[at..at + 20]);
    h.skip(4).ok()?; // interpolation + global sequence
    let n_ts = h.u32().ok()?;
    h.skip(4).ok()?; // ofs timestamps
    let n_keys = h.u32().ok()?;
    let ofs_keys = h.u32().ok()?;
    if n_ts == 0 || n_keys == 0 {
        return None;
    }
    // First sub-array header, then its first value.
    let head = array_range(bytes, 1, ofs_keys, 8).ok()?;
    let mut hc = Cursor::new(&bytes[head]);
    let count = hc.u32().ok()?;
    let ofs = hc.u32().ok()?;
    if count == 0 {
        return None;
    }
    let range = array_range(bytes, 1, ofs, 4).ok()?;
    let mut vc = Cursor::new(&bytes[range]);
    vc.f32().ok()
}

fn read_u16_array(bytes: &[u8], count: u32, offset: u32) -> Result<Vec<u16>, ParseError> {
    let range = array_range(bytes, count, offset, 2)?;
    let mut r = Cursor::new(&bytes[range]);
    (0..count).map(|_| r.u16()).collect()
}

fn read_vec3_array(bytes: &[u8], count: u32, offset: u32) -> Result<Vec<Vec3>, ParseError> {
    let range = array_range(bytes, count, offset, 12)?;
    let mut r = Cursor::new(&bytes[range]);
    (0..count).map(|_| r.vec3()).collect()
}

/// Attach a `.skin` file: resolves the two-level triangle indirection
/// (triangle index -> vertex lookup -> global vertex) and fills the
/// model's batches.
pub fn attach_skin(skin_bytes: &[u8], model: &mut M2Model) -> Result<(), ParseError> {
    let mut c = Cursor::new(skin_bytes);
    let magic = c.tag()?;
    if &magic != b"SKIN" {
        return Err(ParseError::BadMagic {
            expected: "SKIN".into(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let (n_lookup, ofs_lookup) = (c.u32()?, c.u32()?);
    let (n_triangles, ofs_triangles) = (c.u32()?, c.u32()?);
    c.skip(8)?; // vertex properties
    let (n_submeshes, ofs_submeshes) = (c.u32()?, c.u32()?);
    let (n_batches, ofs_batches) = (c.u32()?, c.u32()?);

    let lookup = read_u16_array(skin_bytes, n_lookup, ofs_lookup)?;
    let triangles = read_u16_array(skin_bytes, n_triangles, ofs_triangles)?;

    let mut indices = Vec::with_capacity(triangles.len());
    for &tri in &triangles {
        let global = *lookup.get(tri as usize).ok_or(ParseError::BadCount {
            context: format!("triangle index {tri} outside vertex lookup"),
        })?;
        indices.push(global);
    }

    // Submesh table: 48 bytes each (WotLK); we need id/level plus the
    // triangle window for batch resolution.
    #[derive(Clone, Copy)]
    struct Submesh {
        id: u16,
        level: u16,
        index_start: u32,
        index_count: u32,
    }
    const SUBMESH_SIZE: usize = 48;
    let sub_range = array_range(skin_bytes, n_submeshes, ofs_submeshes, SUBMESH_SIZE)?;
    let sub_start = sub_range.start;
    let mut submeshes = Vec::with_capacity(n_submeshes as usize);
    for i in 0..n_submeshes as usize {
        let mut r = Cursor::new(&skin_bytes[sub_start + i * SUBMESH_SIZE..]);
        let id = r.u16()?;
        let level = r.u16()?;
        r.skip(4)?; // vertex window
        let index_start = r.u16()? as u32;
        let index_count = r.u16()? as u32;
        submeshes.push(Submesh {
            id,
            level,
            index_start,
            index_count,
        });
    }

    // Batch table: 24 bytes each; the geoset index at offset 10 shifts
    // everything after it when missed.
    const BATCH_SIZE: usize = 24;
    let batch_range = array_range(skin_bytes, n_batches, ofs_batches, BATCH_SIZE)?;
    let batch_start = batch_range.start;
    let mut batches = Vec::with_capacity(n_batches as usize);
    for i in 0..n_batches as usize {
        let mut r = Cursor::new(&skin_bytes[batch_start + i * BATCH_SIZE..]);
        let flags = r.u8()?;
        r.skip(1)?; // priority plane
        let shader_id = r.u16()?;
        let submesh_index = r.u16()?;
        r.skip(2)?; // geoset index
        r.skip(2)?; // color index
        let material_index = r.u16()?;
        r.skip(2)?; // material layer
        r.skip(2)?; // texture count
        let texture_lookup_index = r.u16()?;
        r.skip(2)?; // texture coord combo
        r.skip(2)?; // texture weight combo
        let texture_transform_index = r.u16()?;

        let sub = submeshes
            .get(submesh_index as usize)
            .copied()
            .ok_or(ParseError::BadCount {
                context: format!("batch references submesh {submesh_index}"),
            })?;
        batches.push(M2Batch {
            flags,
            shader_id,
            submesh_index,
            material_index,
            texture_lookup_index,
            texture_transform_index,
            index_start: sub.index_start,
            index_count: sub.index_count,
            submesh_id: sub.id,
            submesh_level: sub.level,
        });
    }

    model.indices = indices;
    model.batches = batches;
    Ok(())
}

/// Attach one external `.anim` payload for `sequence_index`. Keyframe
/// sub-array offsets recorded at parse time address the anim file
/// directly. No-op for sequences with internal data.
pub fn attach_anim(
    anim_bytes: &[u8],
    model: &mut M2Model,
    sequence_index: usize,
) -> Result<(), ParseError> {
    let external = model
        .sequences
        .get(sequence_index)
        .map_or(false, M2Sequence::has_external_data);
    if !external {
        return Ok(());
    }
    for bone in &mut model.bones {
        fill_external(anim_bytes, &mut bone.translation, sequence_index)?;
        fill_external(anim_bytes, &mut bone.rotation, sequence_index)?;
        fill_external(anim_bytes, &mut bone.scale, sequence_index)?;
    }
    Ok(())
}

fn fill_external<T: TrackValue>(
    anim_bytes: &[u8],
    track: &mut Track<T>,
    sequence_index: usize,
) -> Result<(), ParseError> {
    if track.global_sequence >= 0 {
        return Ok(());
    }
    let Some(sub) = track.refs.get(sequence_index).copied() else {
        return Ok(());
    };
    let Some(slot) = track.sequences.get_mut(sequence_index) else {
        return Ok(());
    };
    if !slot.is_empty() {
        return Ok(());
    }
    *slot = read_sub_array::<T>(anim_bytes, &sub)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_magic() {
        assert!(matches!(
            parse_model(b"MD21aaaaaaaa"),
            Err(ParseError::BadMagic { .. })
        ));
    }

    #[test]
    fn quat_decompression_endpoints() {
        assert!((decompress_quat_component(32767) - 0.0).abs() < 1e-4);
        assert!((decompress_quat_component(-1) - 1.0).abs() < 1e-4);
        assert!((decompress_quat_component(0) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn sequence_external_flag() {
        let seq = M2Sequence {
            id: 0,
            variation: 0,
            duration_ms: 1000,
            moving_speed: 0.0,
            flags: 0,
            bound_min: Vec3::ZERO,
            bound_max: Vec3::ZERO,
            bound_radius: 0.0,
        };
        assert!(seq.has_external_data());
        let internal = M2Sequence {
            flags: SEQ_FLAG_INTERNAL,
            ..seq
        };
        assert!(!internal.has_external_data());
    }
}
