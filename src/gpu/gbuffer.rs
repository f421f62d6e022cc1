//! Per-pixel images shared by the path tracer, the rasterizer resolve,
//! the denoisers, tone mapping and the silhouette pass.
//!
//! Everything except the display image is a storage buffer indexed by
//! `y * width + x`; one bind group layout serves all compute passes.

/// Display image format (tone-mapped LDR).
pub const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Binding indices, shared with the WGSL declarations.
pub mod binding {
    pub const ACCUMULATION: u32 = 0;
    pub const ALBEDO: u32 = 1;
    pub const NORMAL_ROUGHNESS: u32 = 2;
    pub const DEPTH_MOTION: u32 = 3;
    pub const OBJECT_ID: u32 = 4;
    pub const DENOISED: u32 = 5;
    pub const SCRATCH: u32 = 6;
    pub const DISPLAY: u32 = 7;
}

pub struct GBuffer {
    width: u32,
    height: u32,
    pub accumulation: wgpu::Buffer,
    pub albedo: wgpu::Buffer,
    pub normal_roughness: wgpu::Buffer,
    pub depth_motion: wgpu::Buffer,
    pub object_id: wgpu::Buffer,
    pub denoised: wgpu::Buffer,
    pub scratch: wgpu::Buffer,
    pub display: wgpu::Texture,
    pub display_view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
}

fn buffer_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GBuffer {
    pub fn create_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gbuffer_bind_group_layout"),
            entries: &[
                buffer_entry(binding::ACCUMULATION),     // @binding(0) vec4 radiance, running mean
                buffer_entry(binding::ALBEDO),           // @binding(1) vec4 albedo
                buffer_entry(binding::NORMAL_ROUGHNESS), // @binding(2) vec4 normal.xyz, roughness
                buffer_entry(binding::DEPTH_MOTION),     // @binding(3) vec4 depth, motion.xy
                buffer_entry(binding::OBJECT_ID),        // @binding(4) u32 render node
                buffer_entry(binding::DENOISED),         // @binding(5) vec4 denoiser output
                buffer_entry(binding::SCRATCH),          // @binding(6) vec4 a-trous ping-pong
                // @binding(7) display image
                wgpu::BindGroupLayoutEntry {
                    binding: binding::DISPLAY,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: DISPLAY_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        })
    }

    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let pixels = width as u64 * height as u64;
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let buffer = |label: &str, texel_bytes: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: pixels * texel_bytes,
                usage,
                mapped_at_creation: false,
            })
        };

        let accumulation = buffer("gbuffer_accumulation", 16);
        let albedo = buffer("gbuffer_albedo", 16);
        let normal_roughness = buffer("gbuffer_normal_roughness", 16);
        let depth_motion = buffer("gbuffer_depth_motion", 16);
        let object_id = buffer("gbuffer_object_id", 4);
        let denoised = buffer("gbuffer_denoised", 16);
        let scratch = buffer("gbuffer_scratch", 16);

        let display = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gbuffer_display"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DISPLAY_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let display_view = display.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gbuffer_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: binding::ACCUMULATION,
                    resource: accumulation.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::ALBEDO,
                    resource: albedo.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::NORMAL_ROUGHNESS,
                    resource: normal_roughness.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::DEPTH_MOTION,
                    resource: depth_motion.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::OBJECT_ID,
                    resource: object_id.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::DENOISED,
                    resource: denoised.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::SCRATCH,
                    resource: scratch.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: binding::DISPLAY,
                    resource: wgpu::BindingResource::TextureView(&display_view),
                },
            ],
        });

        log::debug!("G-buffer allocated: {width}x{height}");

        Self {
            width,
            height,
            accumulation,
            albedo,
            normal_roughness,
            depth_motion,
            object_id,
            denoised,
            scratch,
            display,
            display_view,
            bind_group,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}
