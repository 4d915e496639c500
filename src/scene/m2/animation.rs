//! Keyframe track sampling and skeletal pose computation.
//!
//! Translation and scale tracks interpolate linearly, rotations
//! spherical-linearly. Tracks bound to a global sequence loop on the
//! scene's global clock instead of the instance's sequence time.

use crate::parse::m2::{M2Model, Track, TrackKeys};
use glam::{Mat4, Quat, Vec3};

pub trait Interpolate: Copy {
    fn interpolate(a: Self, b: Self, t: f32) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }
}

impl Interpolate for Vec3 {
    fn interpolate(a: Self, b: Self, t: f32) -> Self {
        a.lerp(b, t)
    }
}

impl Interpolate for Quat {
    fn interpolate(a: Self, b: Self, t: f32) -> Self {
        a.slerp(b, t)
    }
}

fn sample_keys<T: Interpolate>(keys: &TrackKeys<T>, time_ms: u32, default: T) -> T {
    if keys.is_empty() {
        return default;
    }
    let ts = &keys.timestamps;
    if time_ms <= ts[0] {
        return keys.values[0];
    }
    let last = ts.len() - 1;
    if time_ms >= ts[last] {
        return keys.values[last];
    }
    // First key strictly after `time_ms`.
    let hi = ts.partition_point(|&t| t <= time_ms);
    let lo = hi - 1;
    let span = (ts[hi] - ts[lo]).max(1);
    let t = (time_ms - ts[lo]) as f32 / span as f32;
    T::interpolate(keys.values[lo], keys.values[hi], t)
}

/// Sample a track for one sequence. `global_time_ms` drives tracks
/// bound to a global sequence.
pub fn sample<T: Interpolate>(
    track: &Track<T>,
    sequence: usize,
    time_ms: u32,
    global_sequences: &[u32],
    global_time_ms: u32,
    default: T,
) -> T {
    if track.global_sequence >= 0 {
        let keys = match track.sequences.first() {
            Some(k) => k,
            None => return default,
        };
        let period = global_sequences
            .get(track.global_sequence as usize)
            .copied()
            .unwrap_or(0);
        let t = if period > 0 {
            global_time_ms % period
        } else {
            0
        };
        return sample_keys(keys, t, default);
    }
    match track.sequences.get(sequence) {
        Some(keys) => sample_keys(keys, time_ms, default),
        None => default,
    }
}

/// Compute world-of-model bone matrices for one pose. Bones are stored
/// parent-before-child, so a single forward pass suffices.
pub fn compute_bone_matrices(
    model: &M2Model,
    sequence: usize,
    time_ms: u32,
    global_time_ms: u32,
    out: &mut Vec<Mat4>,
) {
    out.clear();
    out.reserve(model.bones.len());
    for bone in &model.bones {
        let translation = sample(
            &bone.translation,
            sequence,
            time_ms,
            &model.global_sequences,
            global_time_ms,
            Vec3::ZERO,
        );
        let rotation = sample(
            &bone.rotation,
            sequence,
            time_ms,
            &model.global_sequences,
            global_time_ms,
            Quat::IDENTITY,
        );
        let scale = sample(
            &bone.scale,
            sequence,
            time_ms,
            &model.global_sequences,
            global_time_ms,
            Vec3::ONE,
        );

        let local = Mat4::from_translation(bone.pivot)
            * Mat4::from_translation(translation)
            * Mat4::from_quat(rotation.normalize())
            * Mat4::from_scale(scale)
            * Mat4::from_translation(-bone.pivot);

        let world = if bone.parent >= 0 {
            let parent = out
                .get(bone.parent as usize)
                .copied()
                .unwrap_or(Mat4::IDENTITY);
            parent * local
        } else {
            local
        };
        out.push(world);
    }
}
