//! Render pipeline construction from externally supplied WGSL.
//!
//! Shader source is provided by the host application; the builder only
//! wires layouts, vertex formats and blend state together in one place
//! so pipelines can be rebuilt wholesale after an MSAA change.

use super::GpuContext;

pub struct PipelineBuilder<'a> {
    label: &'a str,
    shader_source: &'a str,
    vertex_entry: &'a str,
    fragment_entry: &'a str,
    bind_group_layouts: Vec<&'a wgpu::BindGroupLayout>,
    vertex_buffers: Vec<wgpu::VertexBufferLayout<'a>>,
    blend: Option<wgpu::BlendState>,
    depth_write: bool,
    depth_compare: wgpu::CompareFunction,
    cull_mode: Option<wgpu::Face>,
    color_target: Option<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    depth_only: bool,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(label: &'a str, shader_source: &'a str) -> Self {
        Self {
            label,
            shader_source,
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            bind_group_layouts: Vec::new(),
            vertex_buffers: Vec::new(),
            blend: None,
            depth_write: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            cull_mode: Some(wgpu::Face::Back),
            color_target: None,
            depth_format: Some(wgpu::TextureFormat::Depth32Float),
            depth_only: false,
        }
    }

    pub fn bind_group_layout(mut self, layout: &'a wgpu::BindGroupLayout) -> Self {
        self.bind_group_layouts.push(layout);
        self
    }

    pub fn vertex_buffer(mut self, layout: wgpu::VertexBufferLayout<'a>) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    pub fn alpha_blend(mut self) -> Self {
        self.blend = Some(wgpu::BlendState::ALPHA_BLENDING);
        self.depth_write = false;
        self
    }

    pub fn additive_blend(mut self) -> Self {
        self.blend = Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        });
        self.depth_write = false;
        self
    }

    pub fn no_cull(mut self) -> Self {
        self.cull_mode = None;
        self
    }

    /// Depth-only pipeline (shadow pass), no fragment stage.
    pub fn depth_only(mut self) -> Self {
        self.depth_only = true;
        self
    }

    pub fn color_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.color_target = Some(format);
        self
    }

    pub fn no_depth(mut self) -> Self {
        self.depth_format = None;
        self
    }

    pub fn build(self, ctx: &GpuContext) -> wgpu::RenderPipeline {
        let shader = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(self.label),
                source: wgpu::ShaderSource::Wgsl(self.shader_source.into()),
            });
        let layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(self.label),
                bind_group_layouts: &self.bind_group_layouts,
                push_constant_ranges: &[],
            });

        let color_format = self.color_target.unwrap_or(ctx.surface_format);
        let targets = [Some(wgpu::ColorTargetState {
            format: color_format,
            blend: self.blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let fragment = if self.depth_only {
            None
        } else {
            Some(wgpu::FragmentState {
                module: &shader,
                entry_point: self.fragment_entry,
                targets: &targets,
            })
        };

        ctx.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(self.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: self.vertex_entry,
                    buffers: &self.vertex_buffers,
                },
                fragment,
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: self.cull_mode,
                    ..Default::default()
                },
                depth_stencil: self.depth_format.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: self.depth_write,
                    depth_compare: self.depth_compare,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: ctx.msaa_samples(),
                    ..Default::default()
                },
                multiview: None,
            })
    }
}
