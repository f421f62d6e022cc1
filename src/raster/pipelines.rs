//! Raster pipelines: three buckets, wireframe and the background dome.

use gltf_pbr::PipelineConfig;

use crate::gpu::{self, GpuContext};
use crate::shaders;
use crate::util::Result;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Pushes solid geometry toward the camera, away from the far-plane dome.
const SOLID_DEPTH_BIAS: i32 = -1;
/// Lines are drawn over the filled surfaces they outline.
const WIREFRAME_DEPTH_BIAS: i32 = -4;

pub struct RasterPipelines {
    pub solid: wgpu::RenderPipeline,
    pub double_sided: wgpu::RenderPipeline,
    pub blend: wgpu::RenderPipeline,
    /// None without POLYGON_MODE_LINE
    pub wireframe: Option<wgpu::RenderPipeline>,
    pub background: wgpu::RenderPipeline,
}

pub fn create_pipeline_layout(
    device: &wgpu::Device,
    scene_layout: &wgpu::BindGroupLayout,
    env_layout: &wgpu::BindGroupLayout,
    push_constant_bytes: u32,
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("raster_pipeline_layout"),
        bind_group_layouts: &[scene_layout, env_layout],
        push_constant_ranges: &[wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            range: 0..push_constant_bytes,
        }],
    })
}

pub fn create_pipelines(ctx: &mut GpuContext, layout: &wgpu::PipelineLayout) -> Result<RasterPipelines> {
    let shader = ctx.shaders.get_or_compile(&ctx.device, "raster", &shaders::raster_source())?;
    let device = &ctx.device;

    let config = PipelineConfig {
        label: Some("raster_solid"),
        color_formats: vec![COLOR_FORMAT, ID_FORMAT],
        depth_format: Some(DEPTH_FORMAT),
        cull_mode: Some(wgpu::Face::Back),
        depth_bias: SOLID_DEPTH_BIAS,
        ..Default::default()
    };
    let double_sided_config = PipelineConfig {
        label: Some("raster_double_sided"),
        cull_mode: None,
        depth_bias: 0,
        ..config.clone()
    };
    let blend_config = PipelineConfig {
        label: Some("raster_blend"),
        blend: true,
        cull_mode: None,
        depth_write: false,
        depth_bias: 0,
        ..config.clone()
    };
    let wireframe_config = PipelineConfig {
        label: Some("raster_wireframe"),
        cull_mode: None,
        wireframe: true,
        fragment_entry: "fs_wireframe",
        depth_write: false,
        depth_bias: WIREFRAME_DEPTH_BIAS,
        ..config.clone()
    };
    let supports_wireframe = ctx.supports_wireframe();

    gpu::validated(device, "raster", || RasterPipelines {
        solid: gltf_pbr::create_pipeline(device, &shader, layout, &config),
        double_sided: gltf_pbr::create_pipeline(device, &shader, layout, &double_sided_config),
        blend: gltf_pbr::create_pipeline(device, &shader, layout, &blend_config),
        wireframe: supports_wireframe.then(|| gltf_pbr::create_pipeline(device, &shader, layout, &wireframe_config)),
        background: create_background_pipeline(device, &shader, layout),
    })
}

/// Fullscreen triangle at the far plane. It never writes depth, so
/// scene draws always land in front of it.
fn create_background_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("raster_background"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_background"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_background"),
            compilation_options: Default::default(),
            targets: &[
                Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                }),
                Some(wgpu::ColorTargetState {
                    format: ID_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                }),
            ],
        }),
        multiview: None,
        cache: None,
    })
}
