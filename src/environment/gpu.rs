//! GPU resources of the environment: sky uniform, HDR mip texture and
//! the importance table. Bound as group 1 by the path tracer and the
//! raster background pass.

use half::f16;
use wgpu::util::DeviceExt;

use super::{GpuSkyParams, HdrEnvironment, PhysicalSky};

pub struct EnvironmentGpu {
    pub layout: wgpu::BindGroupLayout,
    sky_buffer: wgpu::Buffer,
    hdr_texture: wgpu::Texture,
    cdf_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    bind_group: wgpu::BindGroup,
    hdr_size: (u32, u32),
}

impl EnvironmentGpu {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let visibility = wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("env_bind_group_layout"),
            entries: &[
                // @binding(0) sky parameters
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
                // @binding(1) HDR map with blur mips
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                // @binding(2) sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // @binding(3) marginal CDF (H) followed by conditional CDF (W*H)
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sky_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("env_sky_params"),
            size: std::mem::size_of::<GpuSkyParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("env_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // 1x1 placeholders until a map is loaded
        let hdr_texture = create_hdr_texture(device, queue, 1, 1, &[vec![f16::ZERO; 4]]);
        let cdf_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("env_cdf"),
            contents: bytemuck::cast_slice(&[0.0f32; 2]),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let bind_group = create_bind_group(device, &layout, &sky_buffer, &hdr_texture, &sampler, &cdf_buffer);

        Self {
            layout,
            sky_buffer,
            hdr_texture,
            cdf_buffer,
            sampler,
            bind_group,
            hdr_size: (1, 1),
        }
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Size of the bound HDR map (1x1 when none is loaded).
    pub fn hdr_size(&self) -> (u32, u32) {
        self.hdr_size
    }

    pub fn mip_count(&self) -> u32 {
        self.hdr_texture.mip_level_count()
    }

    pub fn update_sky(&self, queue: &wgpu::Queue, sky: &PhysicalSky) {
        queue.write_buffer(&self.sky_buffer, 0, bytemuck::bytes_of(&sky.to_gpu()));
    }

    /// Upload the map's mip chain and importance table; rebuilds the bind group.
    #[tracing::instrument(skip_all)]
    pub fn upload_hdr(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, hdr: &HdrEnvironment) {
        let levels: Vec<Vec<f16>> = hdr
            .mips
            .iter()
            .map(|mip| {
                mip.pixels
                    .iter()
                    .flat_map(|p| [f16::from_f32(p.x), f16::from_f32(p.y), f16::from_f32(p.z), f16::ONE])
                    .collect()
            })
            .collect();
        let (w, h) = (hdr.width(), hdr.height());
        self.hdr_texture = create_hdr_texture(device, queue, w, h, &levels);

        let mut cdf = Vec::with_capacity(hdr.marginal_cdf.len() + hdr.conditional_cdf.len());
        cdf.extend_from_slice(&hdr.marginal_cdf);
        cdf.extend_from_slice(&hdr.conditional_cdf);
        self.cdf_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("env_cdf"),
            contents: bytemuck::cast_slice(&cdf),
            usage: wgpu::BufferUsages::STORAGE,
        });
        self.hdr_size = (w, h);
        self.bind_group = create_bind_group(
            device,
            &self.layout,
            &self.sky_buffer,
            &self.hdr_texture,
            &self.sampler,
            &self.cdf_buffer,
        );
        log::info!("Uploaded HDR environment {w}x{h} ({} mips)", levels.len());
    }
}

fn create_hdr_texture(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32, levels: &[Vec<f16>]) -> wgpu::Texture {
    let data: Vec<f16> = levels.iter().flatten().copied().collect();
    device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("env_hdr"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(&data),
    )
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sky: &wgpu::Buffer,
    texture: &wgpu::Texture,
    sampler: &wgpu::Sampler,
    cdf: &wgpu::Buffer,
) -> wgpu::BindGroup {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("env_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: sky.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: cdf.as_entire_binding(),
            },
        ],
    })
}
