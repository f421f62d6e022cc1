//! glTF metallic-roughness material model for wgpu
//!
//! Shared by both backends of the viewer:
//! - [`MaterialParams`]: the GPU material record (storage-buffer layout)
//! - [`bsdf`]: CPU reference of the BSDF used by the path tracer
//! - [`shader_lib`]: WGSL sources composed into path-tracer and raster shaders
//! - [`create_pipeline`]: raster pipeline factory for the standard vertex layout
//!
//! ## References
//! - [glTF 2.0 material model](https://registry.khronos.org/glTF/specs/2.0/glTF-2.0.html#materials)
//!
//! ## Usage
//!
//! ```ignore
//! use gltf_pbr::{MaterialParams, AlphaMode};
//!
//! let glass = MaterialParams::diffuse(Vec3::ONE)
//!     .with_alpha_mode(AlphaMode::Blend)
//!     .with_alpha(0.3);
//! ```

pub mod bsdf;
mod params;

pub use params::{AlphaMode, MaterialParams, NO_TEXTURE};

/// Shader library modules (composed by the host into full shaders)
pub mod shader_lib {
    /// Material struct, alpha policy and BSDF eval/sample/pdf
    pub const PBR: &str = include_str!("shaders/pbr.wgsl");
}

/// Vertex buffer layout for the standard mesh vertex
pub fn vertex_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
        0 => Float32x3, // position
        1 => Float32x3, // normal
        2 => Float32x4, // tangent (w = handedness, 0 = absent)
        3 => Float32x2, // uv0
        4 => Float32x2, // uv1
        5 => Float32x4, // color
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

/// Standard vertex format (72 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
    pub color: [f32; 4],
}

/// Pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Debug label for the pipeline
    pub label: Option<&'static str>,
    /// Color target formats (attachment order)
    pub color_formats: Vec<wgpu::TextureFormat>,
    /// Depth texture format (None to disable depth)
    pub depth_format: Option<wgpu::TextureFormat>,
    /// Alpha-blend the first color target
    pub blend: bool,
    /// Cull mode
    pub cull_mode: Option<wgpu::Face>,
    /// Line polygon mode (requires POLYGON_MODE_LINE)
    pub wireframe: bool,
    /// Fragment entry point
    pub fragment_entry: &'static str,
    /// Write to depth buffer (disable for transparency)
    pub depth_write: bool,
    /// Constant depth bias in depth units
    pub depth_bias: i32,
    /// MSAA sample count
    pub sample_count: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: None,
            color_formats: vec![wgpu::TextureFormat::Rgba32Float],
            depth_format: Some(wgpu::TextureFormat::Depth32Float),
            blend: false,
            cull_mode: Some(wgpu::Face::Back),
            wireframe: false,
            fragment_entry: "fs_main",
            depth_write: true,
            depth_bias: 0,
            sample_count: 1,
        }
    }
}

/// Create a mesh render pipeline for the standard vertex layout.
///
/// The shader must expose `vs_main` and `config.fragment_entry`.
pub fn create_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    config: &PipelineConfig,
) -> wgpu::RenderPipeline {
    let targets: Vec<Option<wgpu::ColorTargetState>> = config
        .color_formats
        .iter()
        .enumerate()
        .map(|(i, &format)| {
            Some(wgpu::ColorTargetState {
                format,
                // Only radiance blends; object IDs are written verbatim
                blend: if config.blend && i == 0 {
                    Some(wgpu::BlendState::ALPHA_BLENDING)
                } else {
                    None
                },
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: config.label.or(Some("gltf_pbr_pipeline")),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[vertex_buffer_layout()],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: config.cull_mode,
            polygon_mode: if config.wireframe {
                wgpu::PolygonMode::Line
            } else {
                wgpu::PolygonMode::Fill
            },
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: config.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: config.depth_write,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: config.depth_bias,
                slope_scale: 0.0,
                clamp: 0.0,
            },
        }),
        multisample: wgpu::MultisampleState {
            count: config.sample_count,
            ..Default::default()
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(config.fragment_entry),
            compilation_options: Default::default(),
            targets: &targets,
        }),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<Vertex>(), 72);
        let layout = vertex_buffer_layout();
        let last = layout.attributes.last().unwrap();
        assert_eq!(last.offset, 56);
    }

    #[test]
    fn test_shader_lib_declares_material() {
        assert!(shader_lib::PBR.contains("struct Material"));
        assert!(shader_lib::PBR.contains("fn bsdf_sample"));
    }
}
