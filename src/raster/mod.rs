//! Forward rasterizer, the path tracer's peer backend.
//!
//! Draws the background dome, then every visible render node in three
//! buckets (solid, double-sided, blend) and optionally a wireframe overlay.
//! Radiance and render-node IDs go to two color targets, optionally at 2x
//! supersampling, and a resolve pass box-filters them into the shared
//! G-buffer so tone mapping and the silhouette run unchanged.
//!
//! Scene draws are recorded into a [`wgpu::RenderBundle`] and replayed
//! until the scene, the target size, the wireframe toggle, the debug view
//! or the environment bindings change.

pub mod pipelines;

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use gltf_pbr::{AlphaMode, MaterialParams};
use serde::{Deserialize, Serialize};

use crate::gpu::{ComputeKernel, GBuffer, GpuContext, Profiler, Retired};
use crate::scene::descriptor::{DebugMethod, SceneDescriptor};
use crate::scene::Scene;
use crate::shaders;
use crate::util::Result;
use pipelines::{RasterPipelines, COLOR_FORMAT, DEPTH_FORMAT, ID_FORMAT};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterSettings {
    pub wireframe: bool,
    /// Replay recorded scene draws instead of re-recording every frame
    pub use_recorded: bool,
    pub supersample: bool,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            wireframe: false,
            use_recorded: true,
            supersample: true,
        }
    }
}

/// Push constants matching `RasterPush` in raster.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RasterPush {
    pub material_id: u32,
    pub render_node_id: u32,
    pub render_prim_id: u32,
    pub debug_method: u32,
    pub mouse_coord: [i32; 2],
    pub selected_render_node: i32,
    pub _pad: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    Solid,
    DoubleSided,
    Blend,
}

impl Bucket {
    pub const ORDER: [Bucket; 3] = [Bucket::Solid, Bucket::DoubleSided, Bucket::Blend];

    pub fn for_material(params: &MaterialParams) -> Self {
        if params.alpha_mode() == AlphaMode::Blend {
            Bucket::Blend
        } else if params.double_sided() {
            Bucket::DoubleSided
        } else {
            Bucket::Solid
        }
    }
}

/// One indexed draw of a render node.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    pub render_node: u32,
    pub primitive: u32,
    pub material: u32,
    pub indices: Range<u32>,
    pub base_vertex: i32,
}

/// Visible render nodes grouped by bucket, in scene order within a bucket.
pub fn draw_lists(scene: &Scene, descriptor: &SceneDescriptor) -> [Vec<DrawItem>; 3] {
    let mut lists: [Vec<DrawItem>; 3] = Default::default();
    let prims = descriptor.primitives();
    for (i, rn) in scene.render_nodes.iter().enumerate() {
        if !rn.visible {
            continue;
        }
        let (Some(prim), Some(material)) = (prims.get(rn.primitive), scene.materials.get(rn.material)) else {
            continue;
        };
        let bucket = Bucket::for_material(&material.params);
        let slot = Bucket::ORDER.iter().position(|b| *b == bucket).unwrap_or(0);
        lists[slot].push(DrawItem {
            render_node: i as u32,
            primitive: rn.primitive as u32,
            material: rn.material as u32,
            indices: prim.index_offset..prim.index_offset + prim.triangle_count * 3,
            base_vertex: prim.vertex_offset as i32,
        });
    }
    lists
}

/// Everything a recorded bundle depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleKey {
    pub scene_version: u64,
    pub size: (u32, u32),
    pub wireframe: bool,
    pub debug_method: DebugMethod,
    /// Bumped whenever the environment bind group is recreated
    pub env_generation: u64,
}

/// Supersampled raster attachments.
pub struct RasterTargets {
    pub color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub id: wgpu::Texture,
    pub id_view: wgpu::TextureView,
    pub depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    /// Attachment size
    pub size: (u32, u32),
    pub scale: u32,
    resolve_bind_group: wgpu::BindGroup,
}

impl RasterTargets {
    fn new(device: &wgpu::Device, resolve_layout: &wgpu::BindGroupLayout, output: (u32, u32), scale: u32) -> Self {
        let size = (output.0 * scale, output.1 * scale);
        let make = |label: &str, format: wgpu::TextureFormat, sampled: bool| {
            let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
            if sampled {
                usage |= wgpu::TextureUsages::TEXTURE_BINDING;
            }
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: size.0.max(1),
                    height: size.1.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        };
        let (color, color_view) = make("raster_color", COLOR_FORMAT, true);
        let (id, id_view) = make("raster_object_id", ID_FORMAT, true);
        let (depth, depth_view) = make("raster_depth", DEPTH_FORMAT, false);
        let resolve_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raster_resolve_bind_group"),
            layout: resolve_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&id_view),
                },
            ],
        });
        Self {
            color,
            color_view,
            id,
            id_view,
            depth,
            depth_view,
            size,
            scale,
            resolve_bind_group,
        }
    }
}

fn create_resolve_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture = |binding, sample_type| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("raster_resolve_layout"),
        entries: &[
            // @binding(0) radiance
            texture(0, wgpu::TextureSampleType::Float { filterable: false }),
            // @binding(1) render-node IDs
            texture(1, wgpu::TextureSampleType::Uint),
        ],
    })
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ResolvePush {
    width: u32,
    height: u32,
    scale: u32,
    _pad: u32,
}

/// Supersample factor for an output size, 1 when 2x would exceed `max_dim`.
pub fn supersample_scale(enabled: bool, output: (u32, u32), max_dim: u32) -> u32 {
    if enabled && output.0 * 2 <= max_dim && output.1 * 2 <= max_dim {
        2
    } else {
        1
    }
}

pub struct Rasterizer {
    pub settings: RasterSettings,
    layout: wgpu::PipelineLayout,
    pipelines: Option<RasterPipelines>,
    resolve_layout: wgpu::BindGroupLayout,
    resolve: ComputeKernel,
    targets: Option<RasterTargets>,
    bundle: Option<wgpu::RenderBundle>,
    bundle_key: Option<BundleKey>,
    recordings: u64,
    error: Option<String>,
}

impl Rasterizer {
    pub fn new(
        ctx: &mut GpuContext,
        scene_layout: &wgpu::BindGroupLayout,
        env_layout: &wgpu::BindGroupLayout,
        gbuffer_layout: &wgpu::BindGroupLayout,
        settings: RasterSettings,
    ) -> Self {
        let layout = pipelines::create_pipeline_layout(
            &ctx.device,
            scene_layout,
            env_layout,
            std::mem::size_of::<RasterPush>() as u32,
        );
        let resolve_layout = create_resolve_layout(&ctx.device);
        let resolve = ComputeKernel::new(
            ctx,
            "raster_resolve",
            &shaders::resolve_source(),
            &[gbuffer_layout, &resolve_layout],
            std::mem::size_of::<ResolvePush>() as u32,
        );
        let mut raster = Self {
            settings,
            layout,
            pipelines: None,
            resolve_layout,
            resolve,
            targets: None,
            bundle: None,
            bundle_key: None,
            recordings: 0,
            error: None,
        };
        let _ = raster.rebuild(ctx);
        raster
    }

    /// Recompile the raster shader; the previous pipelines survive a failure.
    pub fn rebuild(&mut self, ctx: &mut GpuContext) -> Result<()> {
        match pipelines::create_pipelines(ctx, &self.layout) {
            Ok(p) => {
                self.pipelines = Some(p);
                self.error = None;
                self.invalidate_bundle();
                Ok(())
            }
            Err(e) => {
                log::error!("{e}");
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn is_functional(&self) -> bool {
        self.pipelines.is_some() && self.resolve.is_functional()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn supports_wireframe(&self) -> bool {
        self.pipelines.as_ref().is_some_and(|p| p.wireframe.is_some())
    }

    /// Drop the recorded draws; the next frame records again.
    pub fn invalidate_bundle(&mut self) {
        self.bundle = None;
        self.bundle_key = None;
    }

    /// Number of times scene draws were recorded.
    pub fn recordings(&self) -> u64 {
        self.recordings
    }

    /// Make the attachments match `output`; old targets are retired.
    fn ensure_targets(&mut self, ctx: &mut GpuContext, output: (u32, u32)) {
        let max_dim = ctx.device.limits().max_texture_dimension_2d;
        let scale = supersample_scale(self.settings.supersample, output, max_dim);
        let wanted = (output.0 * scale, output.1 * scale);
        if self.targets.as_ref().is_some_and(|t| t.size == wanted) {
            return;
        }
        if let Some(old) = self.targets.take() {
            ctx.release.retire(Retired::Texture(old.color));
            ctx.release.retire(Retired::Texture(old.id));
            ctx.release.retire(Retired::Texture(old.depth));
        }
        log::debug!("Raster targets {}x{} (scale {scale})", wanted.0, wanted.1);
        self.targets = Some(RasterTargets::new(&ctx.device, &self.resolve_layout, output, scale));
        self.invalidate_bundle();
    }

    fn record_bundle(
        &self,
        device: &wgpu::Device,
        scene: &Scene,
        descriptor: &SceneDescriptor,
        env_bind_group: &wgpu::BindGroup,
        pipelines: &RasterPipelines,
        key: &BundleKey,
    ) -> wgpu::RenderBundle {
        let mut encoder = device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
            label: Some("raster_scene_bundle"),
            color_formats: &[Some(COLOR_FORMAT), Some(ID_FORMAT)],
            depth_stencil: Some(wgpu::RenderBundleDepthStencil {
                format: DEPTH_FORMAT,
                depth_read_only: false,
                stencil_read_only: true,
            }),
            sample_count: 1,
            multiview: None,
        });
        encoder.set_bind_group(0, descriptor.bind_group(), &[]);
        encoder.set_bind_group(1, env_bind_group, &[]);
        encoder.set_vertex_buffer(0, descriptor.vertex_buffer().slice(..));
        encoder.set_index_buffer(descriptor.index_buffer().slice(..), wgpu::IndexFormat::Uint32);

        let stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let lists = draw_lists(scene, descriptor);
        let draw = |encoder: &mut wgpu::RenderBundleEncoder, item: &DrawItem| {
            let push = RasterPush {
                material_id: item.material,
                render_node_id: item.render_node,
                render_prim_id: item.primitive,
                debug_method: key.debug_method.code(),
                mouse_coord: [-1, -1],
                selected_render_node: -1,
                _pad: 0,
            };
            encoder.set_push_constants(stages, 0, bytemuck::bytes_of(&push));
            encoder.draw_indexed(item.indices.clone(), item.base_vertex, 0..1);
        };

        for (bucket, list) in Bucket::ORDER.iter().zip(lists.iter()) {
            if list.is_empty() {
                continue;
            }
            encoder.set_pipeline(match bucket {
                Bucket::Solid => &pipelines.solid,
                Bucket::DoubleSided => &pipelines.double_sided,
                Bucket::Blend => &pipelines.blend,
            });
            for item in list {
                draw(&mut encoder, item);
            }
        }
        if key.wireframe {
            if let Some(wireframe) = &pipelines.wireframe {
                encoder.set_pipeline(wireframe);
                for item in lists.iter().flatten() {
                    draw(&mut encoder, item);
                }
            }
        }
        encoder.finish(&wgpu::RenderBundleDescriptor {
            label: Some("raster_scene_bundle"),
        })
    }

    /// Render the scene into `gbuffer` (accumulation and object IDs).
    /// Returns false when nothing was drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        ctx: &mut GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        descriptor: &SceneDescriptor,
        env_bind_group: &wgpu::BindGroup,
        env_generation: u64,
        gbuffer: &GBuffer,
        debug_method: DebugMethod,
        profiler: &mut Profiler,
    ) -> bool {
        let output = gbuffer.size();
        self.ensure_targets(ctx, output);

        let key = BundleKey {
            scene_version: descriptor.version().unwrap_or(0),
            size: output,
            wireframe: self.settings.wireframe,
            debug_method,
            env_generation,
        };
        let stale = !self.settings.use_recorded || self.bundle.is_none() || self.bundle_key != Some(key);
        if stale {
            let Some(pipelines) = self.pipelines.as_ref() else { return false; };
            let bundle = profiler.scope("raster_record", || {
                self.record_bundle(&ctx.device, scene, descriptor, env_bind_group, pipelines, &key)
            });
            self.bundle = Some(bundle);
            self.bundle_key = Some(key);
            self.recordings += 1;
        }

        let (Some(pipelines), Some(targets), Some(bundle)) = (&self.pipelines, &self.targets, &self.bundle) else {
            return false;
        };
        profiler.scope("raster_draw", || {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("raster_pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &targets.color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &targets.id_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: crate::scene::descriptor::NO_OBJECT as f64,
                                g: 0.0,
                                b: 0.0,
                                a: 0.0,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            // background first, scene draws load on top of it
            pass.set_pipeline(&pipelines.background);
            pass.set_bind_group(0, descriptor.bind_group(), &[]);
            pass.set_bind_group(1, env_bind_group, &[]);
            pass.draw(0..3, 0..1);
            pass.execute_bundles(std::iter::once(bundle));
        });

        let push = ResolvePush {
            width: output.0,
            height: output.1,
            scale: targets.scale,
            _pad: 0,
        };
        profiler.scope("raster_resolve", || {
            self.resolve.dispatch(
                encoder,
                &[gbuffer.bind_group(), &targets.resolve_bind_group],
                bytemuck::bytes_of(&push),
                output,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_push_constants_match_shader_layout() {
        assert_eq!(std::mem::size_of::<RasterPush>(), 32);
        assert_eq!(std::mem::offset_of!(RasterPush, mouse_coord), 16);
        assert_eq!(std::mem::offset_of!(RasterPush, selected_render_node), 24);
    }

    #[test]
    fn test_materials_pick_their_bucket() {
        let solid = MaterialParams::diffuse(Vec3::ONE);
        assert_eq!(Bucket::for_material(&solid), Bucket::Solid);
        let two_sided = solid.with_double_sided(true);
        assert_eq!(Bucket::for_material(&two_sided), Bucket::DoubleSided);
        let blend = two_sided.with_alpha_mode(AlphaMode::Blend);
        assert_eq!(Bucket::for_material(&blend), Bucket::Blend);
        let mask = solid.with_alpha_mode(AlphaMode::Mask(0.5));
        assert_eq!(Bucket::for_material(&mask), Bucket::Solid);
    }

    #[test]
    fn test_supersampling_respects_texture_limit() {
        assert_eq!(supersample_scale(true, (800, 600), 8192), 2);
        assert_eq!(supersample_scale(false, (800, 600), 8192), 1);
        assert_eq!(supersample_scale(true, (5000, 600), 8192), 1);
    }

    #[test]
    fn test_bundle_key_tracks_wireframe() {
        let key = BundleKey {
            scene_version: 3,
            size: (64, 64),
            wireframe: false,
            debug_method: DebugMethod::None,
            env_generation: 0,
        };
        let toggled = BundleKey { wireframe: true, ..key };
        assert_ne!(key, toggled);
        assert!(RasterSettings::default().use_recorded);
    }
}
