//! Immediate-mode staging helpers.
//!
//! Buffers go through `create_buffer_init`; images are written with a
//! transient encoder and a blocking submit so callers can drop the CPU
//! copy immediately. Main thread only.

use super::GpuContext;
use crate::parse::blp::{BlpImage, ImagePixels};
use wgpu::util::DeviceExt;

pub fn stage_buffer(
    ctx: &GpuContext,
    label: &str,
    contents: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
}

pub struct StagedTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Resident footprint for cache accounting.
    pub bytes: u64,
}

/// Upload a parsed BLP. DXT payloads stay compressed (BCn formats);
/// everything else goes up as sRGB RGBA8.
pub fn stage_image(ctx: &GpuContext, label: &str, image: &BlpImage) -> StagedTexture {
    let (format, data, bytes_per_row) = match &image.pixels {
        ImagePixels::Rgba8(data) => (
            wgpu::TextureFormat::Rgba8UnormSrgb,
            data.as_slice(),
            image.width * 4,
        ),
        ImagePixels::Dxt1(data) => (
            wgpu::TextureFormat::Bc1RgbaUnormSrgb,
            data.as_slice(),
            image.width.div_ceil(4) * 8,
        ),
        ImagePixels::Dxt3(data) => (
            wgpu::TextureFormat::Bc2RgbaUnormSrgb,
            data.as_slice(),
            image.width.div_ceil(4) * 16,
        ),
        ImagePixels::Dxt5(data) => (
            wgpu::TextureFormat::Bc3RgbaUnormSrgb,
            data.as_slice(),
            image.width.div_ceil(4) * 16,
        ),
    };

    let size = wgpu::Extent3d {
        width: image.width,
        height: image.height,
        depth_or_array_layers: 1,
    };
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
            rows_per_image: Some(image.height.div_ceil(
                if matches!(image.pixels, ImagePixels::Rgba8(_)) {
                    1
                } else {
                    4
                },
            )),
        },
        size,
    );
    ctx.queue.submit(std::iter::empty());

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    StagedTexture {
        texture,
        view,
        bytes: image.pixels.gpu_bytes(image.width, image.height),
    }
}

/// 1x1 opaque white texture used when the cache refuses an upload.
pub fn white_placeholder(ctx: &GpuContext) -> StagedTexture {
    let image = BlpImage {
        width: 1,
        height: 1,
        pixels: ImagePixels::Rgba8(vec![255, 255, 255, 255]),
    };
    stage_image(ctx, "white_placeholder", &image)
}
