//! Compute pipeline for the progressive path tracer.
//!
//! Binds the scene tables (group 0), the environment (group 1) and the
//! G-buffer (group 2), pushes [`PtPushConstants`] and dispatches
//! `shaders/pathtrace.wgsl` over the viewport in 8x8 tiles.
//!
//! ## Usage
//! ```ignore
//! let mut pt = PathTracerPass::new(&mut ctx, &scene.layout, &env.layout, &gbuffer_layout, false);
//! let push = PtPushConstants::new(&settings, frame_index, accumulated, jitter);
//! pt.dispatch(&mut encoder, scene.bind_group(), env.bind_group(), &gbuffer, &push);
//! ```

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use super::PathTracerSettings;
use crate::gpu::{self, GBuffer, GpuContext};
use crate::shaders;
use crate::util::Result;

/// Workgroup size (must match @workgroup_size in WGSL).
const WG_SIZE: u32 = 8;

/// Push constants matching `PushConstants` in pathtrace.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PtPushConstants {
    /// F; negative skips the dispatch
    pub frame_index: i32,
    pub max_depth: u32,
    /// N: samples per pixel this frame
    pub max_samples: u32,
    pub firefly_clamp: f32,
    pub debug_method: u32,
    /// Render node to shoot object-ID rays for, -1 for none
    pub selected_render_node: i32,
    pub focal_distance: f32,
    pub aperture: f32,
    pub jitter: [f32; 2],
    pub mouse_coord: [i32; 2],
    /// S: samples already accumulated
    pub accumulated_samples: u32,
    pub _pad: [u32; 3],
}

impl PtPushConstants {
    pub fn new(settings: &PathTracerSettings, frame_index: i32, accumulated_samples: u64, jitter: Vec2) -> Self {
        let debug = settings.debug_method.code();
        Self {
            frame_index,
            max_depth: settings.max_depth,
            max_samples: if debug == 0 { settings.max_samples.max(1) } else { 1 },
            firefly_clamp: settings.firefly_clamp,
            debug_method: debug,
            selected_render_node: -1,
            focal_distance: settings.focal_distance,
            aperture: settings.aperture,
            jitter: jitter.to_array(),
            mouse_coord: [-1, -1],
            accumulated_samples: accumulated_samples.min(u32::MAX as u64) as u32,
            _pad: [0; 3],
        }
    }

    /// Request object-ID rays for `render_node` this frame.
    pub fn with_selection(mut self, render_node: Option<u32>) -> Self {
        self.selected_render_node = render_node.map_or(-1, |n| n as i32);
        self
    }

    pub fn with_mouse(mut self, mouse: Option<(i32, i32)>) -> Self {
        self.mouse_coord = mouse.map_or([-1, -1], |(x, y)| [x, y]);
        self
    }
}

/// Path trace compute pipeline state.
pub struct PathTracerPass {
    layout: wgpu::PipelineLayout,
    pipeline: Option<wgpu::ComputePipeline>,
    reorder: bool,
    /// Diagnostics of the last failed build
    error: Option<String>,
}

impl PathTracerPass {
    pub fn new(
        ctx: &mut GpuContext,
        scene_layout: &wgpu::BindGroupLayout,
        env_layout: &wgpu::BindGroupLayout,
        gbuffer_layout: &wgpu::BindGroupLayout,
        reorder: bool,
    ) -> Self {
        let layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pt_pipeline_layout"),
            bind_group_layouts: &[scene_layout, env_layout, gbuffer_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..std::mem::size_of::<PtPushConstants>() as u32,
            }],
        });
        let mut pass = Self {
            layout,
            pipeline: None,
            reorder,
            error: None,
        };
        // failure is recorded in `error`; the pass stays non-functional
        let _ = pass.rebuild(ctx, reorder);
        pass
    }

    /// Recompile the kernel. On failure the previous pipeline stays active.
    pub fn rebuild(&mut self, ctx: &mut GpuContext, reorder: bool) -> Result<()> {
        let source = shaders::pathtrace_source();
        let result = ctx
            .shaders
            .get_or_compile(&ctx.device, "pathtrace", &source)
            .and_then(|module| {
                let constants = [("USE_REORDER", if reorder { 1.0 } else { 0.0 })];
                gpu::validated(&ctx.device, "pathtrace pipeline", || {
                    ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some("pt_compute_pipeline"),
                        layout: Some(&self.layout),
                        module: &module,
                        entry_point: Some("main"),
                        compilation_options: wgpu::PipelineCompilationOptions {
                            constants: &constants,
                            zero_initialize_workgroup_memory: false,
                        },
                        cache: None,
                    })
                })
            });

        match result {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.reorder = reorder;
                self.error = None;
                log::info!("Path tracer pipeline ready (reorder: {reorder})");
                Ok(())
            }
            Err(e) => {
                if self.pipeline.is_some() {
                    log::warn!("Path tracer rebuild failed, keeping previous pipeline: {e}");
                } else {
                    log::error!("Path tracer unavailable: {e}");
                }
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Switch invocation ordering; rebuilds only when it changes.
    pub fn set_reorder(&mut self, ctx: &mut GpuContext, reorder: bool) {
        if reorder != self.reorder {
            let _ = self.rebuild(ctx, reorder);
        }
    }

    /// A pipeline is bound and usable.
    pub fn is_functional(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Dispatch the kernel. Returns false if nothing was recorded.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &wgpu::BindGroup,
        env: &wgpu::BindGroup,
        gbuffer: &GBuffer,
        push: &PtPushConstants,
    ) -> bool {
        let Some(pipeline) = &self.pipeline else { return false; };
        if push.frame_index < 0 {
            return false;
        }

        let (width, height) = gbuffer.size();
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("pt_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, scene, &[]);
        pass.set_bind_group(1, env, &[]);
        pass.set_bind_group(2, gbuffer.bind_group(), &[]);
        pass.set_push_constants(0, bytemuck::bytes_of(push));
        pass.dispatch_workgroups(gpu::workgroups(width, WG_SIZE), gpu::workgroups(height, WG_SIZE), 1);

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::descriptor::DebugMethod;

    #[test]
    fn test_push_constants_match_shader_layout() {
        assert_eq!(std::mem::size_of::<PtPushConstants>(), gpu::MIN_PUSH_CONSTANT_BYTES as usize);
        assert_eq!(std::mem::offset_of!(PtPushConstants, jitter), 32);
        assert_eq!(std::mem::offset_of!(PtPushConstants, mouse_coord), 40);
        assert_eq!(std::mem::offset_of!(PtPushConstants, accumulated_samples), 48);
    }

    #[test]
    fn test_debug_views_trace_one_sample() {
        let settings = PathTracerSettings {
            max_samples: 8,
            debug_method: DebugMethod::Roughness,
            ..Default::default()
        };
        let push = PtPushConstants::new(&settings, 0, 0, Vec2::ZERO);
        assert_eq!(push.max_samples, 1);
        assert_eq!(push.debug_method, DebugMethod::Roughness.code());
        assert_eq!(push.selected_render_node, -1);
        assert_eq!(push.with_selection(Some(3)).selected_render_node, 3);
    }
}
