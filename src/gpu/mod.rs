//! GPU context and upload plumbing.
//!
//! The window, surface and adapter are created by the host application;
//! this layer owns the device handle, shared samplers, the MSAA setting
//! and the frame-in-flight index. All staging work happens on the main
//! thread through transient encoders.

pub mod pipeline;
pub mod shadow;
pub mod texture_cache;
pub mod upload;

pub use pipeline::PipelineBuilder;
pub use shadow::ShadowTarget;
pub use texture_cache::TextureCache;

use crate::constants::FRAMES_IN_FLIGHT;
use std::sync::Arc;

/// Shared GPU state handed to every renderer.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub surface_format: wgpu::TextureFormat,
    /// Bilinear repeat sampler for terrain and model textures.
    pub linear_sampler: wgpu::Sampler,
    /// Clamped sampler for alpha maps and lookup textures.
    pub clamp_sampler: wgpu::Sampler,
    msaa_samples: u32,
    pending_msaa: Option<u32>,
    frame_index: usize,
}

impl GpuContext {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear_repeat"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let clamp_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear_clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            device,
            queue,
            surface_format,
            linear_sampler,
            clamp_sampler,
            msaa_samples: 1,
            pending_msaa: None,
            frame_index: 0,
        }
    }

    pub fn msaa_samples(&self) -> u32 {
        self.msaa_samples
    }

    /// Request a new sample count. Applied at the next frame boundary
    /// so in-flight pipelines are never invalidated mid-frame.
    pub fn set_msaa_samples(&mut self, samples: u32) {
        if samples != self.msaa_samples {
            self.pending_msaa = Some(samples);
        }
    }

    /// Advance the frame-in-flight index and apply any deferred MSAA
    /// change. Returns true when pipelines must be rebuilt.
    pub fn begin_frame(&mut self) -> bool {
        self.frame_index = (self.frame_index + 1) % FRAMES_IN_FLIGHT;
        if let Some(samples) = self.pending_msaa.take() {
            self.msaa_samples = samples;
            return true;
        }
        false
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }
}
