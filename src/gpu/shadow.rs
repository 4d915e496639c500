//! Depth-only shadow target and light-space matrix.

use super::GpuContext;
use crate::constants::SHADOW_MAP_SIZE;
use glam::{Mat4, Vec3};

/// Extent of the orthographic shadow frustum around the avatar, in
/// world units.
const SHADOW_EXTENT: f32 = 120.0;
const SHADOW_DEPTH: f32 = 400.0;

pub struct ShadowTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl ShadowTarget {
    pub fn new(ctx: &GpuContext) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow_map"),
            size: wgpu::Extent3d {
                width: SHADOW_MAP_SIZE,
                height: SHADOW_MAP_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_compare"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        Self {
            texture,
            view,
            sampler,
        }
    }
}

/// Orthographic light-space matrix centered near the avatar so the
/// shadow texels are spent where the player is looking.
pub fn light_space_matrix(focus: Vec3, light_dir: Vec3) -> Mat4 {
    let dir = light_dir.normalize_or_zero();
    let dir = if dir == Vec3::ZERO {
        Vec3::new(0.3, 0.3, -0.9).normalize()
    } else {
        dir
    };
    let eye = focus - dir * (SHADOW_DEPTH * 0.5);
    let up = if dir.z.abs() > 0.99 {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let view = Mat4::look_at_rh(eye, focus, up);
    let proj = Mat4::orthographic_rh(
        -SHADOW_EXTENT,
        SHADOW_EXTENT,
        -SHADOW_EXTENT,
        SHADOW_EXTENT,
        0.1,
        SHADOW_DEPTH,
    );
    proj * view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_projects_near_clip_center() {
        let m = light_space_matrix(Vec3::new(100.0, 200.0, 30.0), Vec3::new(0.2, 0.1, -0.9));
        let clip = m * Vec3::new(100.0, 200.0, 30.0).extend(1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 0.01 && ndc.y.abs() < 0.01);
    }

    #[test]
    fn degenerate_light_direction_falls_back() {
        let m = light_space_matrix(Vec3::ZERO, Vec3::ZERO);
        assert!(m.is_finite());
    }
}
