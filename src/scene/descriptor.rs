//! GPU view of the scene: render-node, primitive, material and light
//! tables, the shared vertex/index pools, the texture array and the
//! per-frame info uniform. Bound as group 0 by every pass.
//!
//! Tables are rewritten only between frames (after the device is idle);
//! the frame-info block is written with `Queue::write_buffer` at the top
//! of each frame.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use wgpu::util::DeviceExt;

use gltf_pbr::{MaterialParams, Vertex, NO_TEXTURE};

use super::{LightKind, Scene, Texture};
use crate::accel::{AccelCache, AccelGpuData, INSTANCE_FLAG_DOUBLE_SIDED, INSTANCE_FLAG_OPAQUE};
use crate::util::{Mat4, Vec2, Vec3};

/// Edge length of one texture-array layer.
pub const TEXTURE_LAYER_SIZE: u32 = 512;
/// Maximum number of texture-array layers.
pub const MAX_TEXTURE_LAYERS: usize = 256;

/// Render-node flag: node is drawn and traced.
pub const NODE_FLAG_VISIBLE: u32 = 8;

/// Attribute presence bits in [`GpuPrimitive::attributes`].
pub const ATTR_NORMAL: u32 = 1;
pub const ATTR_TANGENT: u32 = 2;
pub const ATTR_COLOR: u32 = 4;
pub const ATTR_UV0: u32 = 8;
pub const ATTR_UV1: u32 = 16;

/// Frame flag: primary rays use the Halton jitter instead of random offsets.
pub const FRAME_FLAG_JITTER: u32 = 1;

/// Object-ID value of pixels that hit no render node.
pub const NO_OBJECT: u32 = u32::MAX;

/// Attribute the path tracer shows instead of radiance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugMethod {
    #[default]
    None,
    BaseColor,
    Metallic,
    Roughness,
    Normal,
    Tangent,
    Bitangent,
    Emissive,
    Opacity,
    TexCoord0,
    TexCoord1,
}

impl DebugMethod {
    pub const ALL: [DebugMethod; 11] = [
        DebugMethod::None,
        DebugMethod::BaseColor,
        DebugMethod::Metallic,
        DebugMethod::Roughness,
        DebugMethod::Normal,
        DebugMethod::Tangent,
        DebugMethod::Bitangent,
        DebugMethod::Emissive,
        DebugMethod::Opacity,
        DebugMethod::TexCoord0,
        DebugMethod::TexCoord1,
    ];

    pub fn code(self) -> u32 {
        Self::ALL.iter().position(|&m| m == self).unwrap_or(0) as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            DebugMethod::None => "None",
            DebugMethod::BaseColor => "Base color",
            DebugMethod::Metallic => "Metallic",
            DebugMethod::Roughness => "Roughness",
            DebugMethod::Normal => "Normal",
            DebugMethod::Tangent => "Tangent",
            DebugMethod::Bitangent => "Bitangent",
            DebugMethod::Emissive => "Emissive",
            DebugMethod::Opacity => "Opacity",
            DebugMethod::TexCoord0 => "TexCoord 0",
            DebugMethod::TexCoord1 => "TexCoord 1",
        }
    }
}

/// Camera state for one frame (right-handed, depth 0..1, NDC y up).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    pub proj: Mat4,
    pub eye: Vec3,
    /// Vertical field of view (radians)
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 45f32.to_radians(), 1.0)
    }
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32) -> Self {
        let (near, far) = (0.01, 1000.0);
        Self {
            view: Mat4::look_at_rh(eye, target, up),
            proj: Mat4::perspective_rh(fov_y, aspect.max(1e-4), near, far),
            eye,
            fov_y,
            near,
            far,
        }
    }

    /// Same camera with a new aspect ratio.
    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.proj = Mat4::perspective_rh(self.fov_y, aspect.max(1e-4), self.near, self.far);
        self
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }

    /// World-space primary ray through a normalized screen position
    /// (`uv` in [0,1]², v down). Returns (origin, unit direction).
    pub fn primary_ray(&self, uv: Vec2) -> (Vec3, Vec3) {
        let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
        let target = self.proj.inverse().project_point3(ndc.extend(1.0));
        let inv_view = self.view.inverse();
        let origin = inv_view.transform_point3(Vec3::ZERO);
        let direction = inv_view.transform_vector3(target.normalize_or(-Vec3::Z)).normalize_or(-Vec3::Z);
        (origin, direction)
    }

    /// Pixel (top-left origin) a world point projects to, if in front of the camera.
    pub fn project(&self, p: Vec3, viewport: (u32, u32)) -> Option<Vec2> {
        let clip = self.view_proj() * p.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Vec2::new(
            (ndc.x * 0.5 + 0.5) * viewport.0 as f32,
            (0.5 - ndc.y * 0.5) * viewport.1 as f32,
        ))
    }
}

/// Per-frame uniform block (`FrameInfo` in `shaders/common.wgsl`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameInfo {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    /// xyz = eye, w = vertical fov
    pub eye: [f32; 4],
    /// Solid background color (intensity applied)
    pub env_color: [f32; 4],
    /// x = intensity, y = rotation, z = blur, w = luminance integral
    pub env: [f32; 4],
    pub env_kind: u32,
    pub light_count: u32,
    pub render_node_count: u32,
    pub texture_count: u32,
    pub viewport: [u32; 2],
    pub rr_min_depth: u32,
    pub flags: u32,
    pub shadow_t_min: f32,
    /// Root of the TLAS in the node buffer (`u32::MAX` = none)
    pub tlas_root: u32,
    /// Offset of the TLAS leaf order in the index pool
    pub tlas_order_offset: u32,
    /// Far plane; guides of miss pixels project the far point
    pub far: f32,
}

impl FrameInfo {
    pub fn new(camera: &Camera, prev_view_proj: Mat4, viewport: (u32, u32)) -> Self {
        Self {
            view: camera.view.to_cols_array_2d(),
            proj: camera.proj.to_cols_array_2d(),
            inv_view: camera.view.inverse().to_cols_array_2d(),
            inv_proj: camera.proj.inverse().to_cols_array_2d(),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
            eye: camera.eye.extend(camera.fov_y).to_array(),
            viewport: [viewport.0, viewport.1],
            far: camera.far,
            ..Self::zeroed()
        }
    }
}

/// Render-node record (208 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuRenderNode {
    pub transform: [[f32; 4]; 4],
    pub inv_transform: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub primitive: u32,
    pub material: u32,
    /// `INSTANCE_FLAG_*` | `NODE_FLAG_VISIBLE`
    pub flags: u32,
    pub _pad: u32,
}

/// Render-primitive record (32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuPrimitive {
    /// First vertex in the vertex pool
    pub vertex_offset: u32,
    /// First index in the index pool (BLAS triangle order)
    pub index_offset: u32,
    pub triangle_count: u32,
    /// Root of the primitive's BLAS in the node buffer
    pub blas_root: u32,
    pub material: u32,
    /// `ATTR_*` bits
    pub attributes: u32,
    pub _pad: [u32; 2],
}

/// Punctual light record (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    /// 0 = directional, 1 = point
    pub kind: u32,
    /// Direction the light travels
    pub direction: [f32; 3],
    pub range: f32,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// CPU-side packed tables, built once per scene version.
#[derive(Default)]
pub struct SceneTables {
    pub render_nodes: Vec<GpuRenderNode>,
    pub primitives: Vec<GpuPrimitive>,
    pub materials: Vec<MaterialParams>,
    pub lights: Vec<GpuLight>,
    pub vertices: Vec<Vertex>,
}

impl SceneTables {
    #[tracing::instrument(skip_all, fields(render_nodes = scene.render_nodes.len()))]
    pub fn build(scene: &Scene, accel: &AccelGpuData) -> Self {
        let mut tables = Self::default();

        for (i, prim) in scene.primitives.iter().enumerate() {
            let a = &prim.attributes;
            let attributes = (a.normals as u32 * ATTR_NORMAL)
                | (a.tangents as u32 * ATTR_TANGENT)
                | (a.colors as u32 * ATTR_COLOR)
                | (a.uv0 as u32 * ATTR_UV0)
                | (a.uv1 as u32 * ATTR_UV1);
            tables.primitives.push(GpuPrimitive {
                vertex_offset: tables.vertices.len() as u32,
                index_offset: accel.index_offsets.get(i).copied().unwrap_or(0),
                triangle_count: prim.triangle_count() as u32,
                blas_root: accel.blas_roots.get(i).copied().unwrap_or(u32::MAX),
                material: prim.material as u32,
                attributes,
                _pad: [0; 2],
            });
            tables.vertices.extend_from_slice(&prim.vertices);
        }

        let layers = scene.textures.len().min(MAX_TEXTURE_LAYERS) as i32;
        tables.materials = scene
            .materials
            .iter()
            .map(|m| {
                let mut p = m.params;
                for t in &mut p.textures {
                    if *t >= layers {
                        *t = NO_TEXTURE;
                    }
                }
                p
            })
            .collect();
        if tables.materials.is_empty() {
            tables.materials.push(MaterialParams::default());
        }

        tables.render_nodes = scene
            .render_nodes
            .iter()
            .map(|rn| {
                let params = &scene.materials[rn.material].params;
                let mut flags = 0;
                if rn.visible {
                    flags |= NODE_FLAG_VISIBLE;
                }
                if params.is_opaque() {
                    flags |= INSTANCE_FLAG_OPAQUE;
                }
                if params.double_sided() {
                    flags |= INSTANCE_FLAG_DOUBLE_SIDED;
                }
                GpuRenderNode {
                    transform: rn.transform.to_cols_array_2d(),
                    inv_transform: rn.transform.inverse().to_cols_array_2d(),
                    normal_matrix: rn.normal_matrix.to_cols_array_2d(),
                    primitive: rn.primitive as u32,
                    material: rn.material as u32,
                    flags,
                    _pad: 0,
                }
            })
            .collect();

        tables.lights = scene
            .lights
            .iter()
            .map(|l| GpuLight {
                position: l.position.to_array(),
                kind: match l.kind {
                    LightKind::Directional => 0,
                    LightKind::Point => 1,
                },
                direction: l.direction.to_array(),
                range: l.range,
                color: l.color.to_array(),
                intensity: l.intensity,
            })
            .collect();

        tables
    }
}

/// Resample textures to fixed-size layers of one RGBA8 array.
///
/// Returns the packed layers and the layer count (at least one, so the
/// binding is never empty).
pub fn pack_texture_array(textures: &[Texture]) -> (Vec<u8>, u32) {
    use image::{imageops, RgbaImage};

    let size = TEXTURE_LAYER_SIZE;
    let layer_bytes = (size * size * 4) as usize;
    if textures.len() > MAX_TEXTURE_LAYERS {
        log::warn!(
            "Scene has {} textures, only the first {MAX_TEXTURE_LAYERS} are used",
            textures.len()
        );
    }
    let count = textures.len().clamp(1, MAX_TEXTURE_LAYERS);
    let mut data = vec![255u8; layer_bytes * count];

    for (layer, tex) in textures.iter().take(count).enumerate() {
        let Some(img) = RgbaImage::from_raw(tex.width, tex.height, tex.rgba.clone()) else {
            log::warn!("Texture {layer} has inconsistent size, left white");
            continue;
        };
        let resized = if tex.width == size && tex.height == size {
            img
        } else {
            imageops::resize(&img, size, size, imageops::FilterType::Triangle)
        };
        data[layer * layer_bytes..(layer + 1) * layer_bytes].copy_from_slice(resized.as_raw());
    }
    (data, count as u32)
}

/// Non-empty byte view of a table (wgpu rejects zero-sized bindings).
fn table_bytes<T: Pod>(items: &[T]) -> Vec<u8> {
    if items.is_empty() {
        vec![0u8; std::mem::size_of::<T>().max(4)]
    } else {
        bytemuck::cast_slice(items).to_vec()
    }
}

struct SceneBuffers {
    render_nodes: wgpu::Buffer,
    primitives: wgpu::Buffer,
    materials: wgpu::Buffer,
    lights: wgpu::Buffer,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    bvh: wgpu::Buffer,
    textures: wgpu::Texture,
}

/// GPU scene descriptor (group 0).
pub struct SceneDescriptor {
    pub layout: wgpu::BindGroupLayout,
    frame_info: wgpu::Buffer,
    sampler: wgpu::Sampler,
    buffers: SceneBuffers,
    bind_group: wgpu::BindGroup,
    primitives: Vec<GpuPrimitive>,
    render_nodes: Vec<GpuRenderNode>,
    tlas_root: u32,
    tlas_order_offset: u32,
    light_count: u32,
    texture_count: u32,
    version: Option<u64>,
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl SceneDescriptor {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let visibility = wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_bind_group_layout"),
            entries: &[
                // @binding(0) frame info
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, visibility), // render nodes
                storage_entry(2, visibility), // primitives
                storage_entry(3, visibility), // materials
                storage_entry(4, visibility), // lights
                storage_entry(5, visibility), // vertices (f32 words)
                storage_entry(6, visibility), // index pool
                storage_entry(7, visibility), // bvh nodes
                // @binding(8) texture array
                wgpu::BindGroupLayoutEntry {
                    binding: 8,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                // @binding(9) sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 9,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let frame_info = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_info"),
            size: std::mem::size_of::<FrameInfo>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("scene_texture_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let empty = Scene::default();
        let accel = AccelGpuData::build(&AccelCache::new(), &empty);
        let tables = SceneTables::build(&empty, &accel);
        let (texels, layers) = pack_texture_array(&[]);
        let buffers = create_buffers(device, queue, &tables, &accel, &texels, layers);
        let bind_group = create_bind_group(device, &layout, &frame_info, &sampler, &buffers);

        Self {
            layout,
            frame_info,
            sampler,
            buffers,
            bind_group,
            primitives: Vec::new(),
            render_nodes: Vec::new(),
            tlas_root: accel.tlas_root,
            tlas_order_offset: accel.tlas_order_offset,
            light_count: 0,
            texture_count: 0,
            version: None,
        }
    }

    /// Replace all tables. Call only while no frame is in flight.
    #[tracing::instrument(skip_all, fields(version = scene.version))]
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &Scene, accel: &AccelGpuData) {
        let tables = SceneTables::build(scene, accel);
        let (texels, layers) = pack_texture_array(&scene.textures);
        self.buffers = create_buffers(device, queue, &tables, accel, &texels, layers);
        self.bind_group = create_bind_group(device, &self.layout, &self.frame_info, &self.sampler, &self.buffers);
        self.tlas_root = accel.tlas_root;
        self.tlas_order_offset = accel.tlas_order_offset;
        self.light_count = tables.lights.len() as u32;
        self.texture_count = scene.textures.len().min(MAX_TEXTURE_LAYERS) as u32;
        self.primitives = tables.primitives;
        self.render_nodes = tables.render_nodes;
        self.version = Some(scene.version);
        log::debug!(
            "Scene descriptor uploaded: {} render nodes, {} primitives, {} textures",
            self.render_nodes.len(),
            self.primitives.len(),
            self.texture_count
        );
    }

    /// Scene version of the uploaded tables.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Fill the scene-dependent fields and write the frame-info block.
    pub fn write_frame_info(&self, queue: &wgpu::Queue, info: &mut FrameInfo) {
        info.light_count = self.light_count;
        info.render_node_count = self.render_nodes.len() as u32;
        info.texture_count = self.texture_count;
        info.tlas_root = self.tlas_root;
        info.tlas_order_offset = self.tlas_order_offset;
        queue.write_buffer(&self.frame_info, 0, bytemuck::bytes_of(info));
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.buffers.vertices
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.buffers.indices
    }

    pub fn primitives(&self) -> &[GpuPrimitive] {
        &self.primitives
    }

    pub fn render_nodes(&self) -> &[GpuRenderNode] {
        &self.render_nodes
    }
}

fn create_buffers(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    tables: &SceneTables,
    accel: &AccelGpuData,
    texels: &[u8],
    layers: u32,
) -> SceneBuffers {
    let storage = |label: &str, bytes: &[u8], extra: wgpu::BufferUsages| {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage: wgpu::BufferUsages::STORAGE | extra,
        })
    };
    let textures = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("scene_textures"),
            size: wgpu::Extent3d {
                width: TEXTURE_LAYER_SIZE,
                height: TEXTURE_LAYER_SIZE,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        texels,
    );

    SceneBuffers {
        render_nodes: storage("scene_render_nodes", &table_bytes(&tables.render_nodes), wgpu::BufferUsages::empty()),
        primitives: storage("scene_primitives", &table_bytes(&tables.primitives), wgpu::BufferUsages::empty()),
        materials: storage("scene_materials", &table_bytes(&tables.materials), wgpu::BufferUsages::empty()),
        lights: storage("scene_lights", &table_bytes(&tables.lights), wgpu::BufferUsages::empty()),
        vertices: storage("scene_vertices", &table_bytes(&tables.vertices), wgpu::BufferUsages::VERTEX),
        indices: storage("scene_index_pool", &accel.index_pool_bytes(), wgpu::BufferUsages::INDEX),
        bvh: storage("scene_bvh_nodes", &accel.nodes_bytes(), wgpu::BufferUsages::empty()),
        textures,
    }
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    frame_info: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    buffers: &SceneBuffers,
) -> wgpu::BindGroup {
    let view = buffers.textures.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    });
    let tables = [
        &buffers.render_nodes,
        &buffers.primitives,
        &buffers.materials,
        &buffers.lights,
        &buffers.vertices,
        &buffers.indices,
        &buffers.bvh,
    ];
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: frame_info.as_entire_binding(),
    }];
    entries.extend(tables.iter().enumerate().map(|(i, b)| wgpu::BindGroupEntry {
        binding: i as u32 + 1,
        resource: b.as_entire_binding(),
    }));
    entries.push(wgpu::BindGroupEntry {
        binding: 8,
        resource: wgpu::BindingResource::TextureView(&view),
    });
    entries.push(wgpu::BindGroupEntry {
        binding: 9,
        resource: wgpu::BindingResource::Sampler(sampler),
    });
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("scene_bind_group"),
        layout,
        entries: &entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::cube_scene;
    use gltf_pbr::AlphaMode;

    #[test]
    fn test_gpu_records_have_shader_sizes() {
        assert_eq!(std::mem::size_of::<FrameInfo>(), 416);
        assert_eq!(std::mem::size_of::<GpuRenderNode>(), 208);
        assert_eq!(std::mem::size_of::<GpuPrimitive>(), 32);
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
    }

    #[test]
    fn test_debug_method_codes_are_dense() {
        for (i, m) in DebugMethod::ALL.iter().enumerate() {
            assert_eq!(m.code(), i as u32);
        }
    }

    #[test]
    fn test_tables_carry_instance_flags() {
        let t = [Mat4::IDENTITY, Mat4::from_translation(Vec3::X * 3.0)];
        let mut scene = cube_scene(MaterialParams::default().with_double_sided(true), &t);
        scene.set_visible(1, false);
        let mut cache = AccelCache::new();
        cache.update(&scene, 1);
        let accel = AccelGpuData::build(&cache, &scene);
        let tables = SceneTables::build(&scene, &accel);

        assert_eq!(tables.render_nodes.len(), 2);
        let f0 = tables.render_nodes[0].flags;
        assert_ne!(f0 & INSTANCE_FLAG_OPAQUE, 0);
        assert_ne!(f0 & INSTANCE_FLAG_DOUBLE_SIDED, 0);
        assert_ne!(f0 & NODE_FLAG_VISIBLE, 0);
        assert_eq!(tables.render_nodes[1].flags & NODE_FLAG_VISIBLE, 0);
        assert_eq!(tables.primitives[0].triangle_count, 12);
        assert_eq!(tables.primitives[0].attributes & ATTR_UV0, ATTR_UV0);
        assert_eq!(tables.vertices.len(), 24);
    }

    #[test]
    fn test_blended_materials_are_not_opaque_instances() {
        let scene = cube_scene(MaterialParams::default().with_alpha_mode(AlphaMode::Blend), &[Mat4::IDENTITY]);
        let tables = SceneTables::build(&scene, &AccelGpuData::default());
        assert_eq!(tables.render_nodes[0].flags & INSTANCE_FLAG_OPAQUE, 0);
    }

    #[test]
    fn test_texture_layers_are_resampled() {
        let tex = Texture {
            width: 2,
            height: 2,
            rgba: vec![10, 20, 30, 255].repeat(4),
        };
        let (data, layers) = pack_texture_array(&[tex]);
        assert_eq!(layers, 1);
        assert_eq!(data.len(), (TEXTURE_LAYER_SIZE * TEXTURE_LAYER_SIZE * 4) as usize);
        assert_eq!(&data[..4], &[10, 20, 30, 255]);
        let (empty, layers) = pack_texture_array(&[]);
        assert_eq!(layers, 1);
        assert!(empty.iter().all(|&b| b == 255));
    }

    #[test]
    fn test_primary_ray_through_center_looks_forward() {
        let cam = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y, 1.0, 1.5);
        let (o, d) = cam.primary_ray(Vec2::splat(0.5));
        assert!((o - cam.eye).length() < 1e-4);
        assert!((d - -Vec3::Z).length() < 1e-4);
        // top of the screen looks up
        let (_, up) = cam.primary_ray(Vec2::new(0.5, 0.0));
        assert!(up.y > 0.0);
        let px = cam.project(Vec3::ZERO, (300, 200)).unwrap();
        assert!((px - Vec2::new(150.0, 100.0)).length() < 1e-3);
    }
}
