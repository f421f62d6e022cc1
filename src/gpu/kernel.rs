//! Single-entry compute kernels driven by push constants.
//!
//! Post passes (resolve, a-trous, tone mapping, silhouette) all follow the
//! same shape: one `main` entry, 8x8 workgroups over the image, a small
//! push-constant record and the G-buffer bound at group 0.

use crate::gpu::{self, GpuContext};
use crate::util::Result;

/// Workgroup size (must match @workgroup_size in WGSL).
pub const WG_SIZE: u32 = 8;

pub struct ComputeKernel {
    label: &'static str,
    layout: wgpu::PipelineLayout,
    pipeline: Option<wgpu::ComputePipeline>,
}

impl ComputeKernel {
    pub fn new(
        ctx: &mut GpuContext,
        label: &'static str,
        source: &str,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        push_constant_bytes: u32,
    ) -> Self {
        let layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts,
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..push_constant_bytes,
            }],
        });
        let mut kernel = Self {
            label,
            layout,
            pipeline: None,
        };
        let _ = kernel.rebuild(ctx, source);
        kernel
    }

    /// Recompile from `source`; the previous pipeline survives a failure.
    pub fn rebuild(&mut self, ctx: &mut GpuContext, source: &str) -> Result<()> {
        let module = ctx.shaders.get_or_compile(&ctx.device, self.label, source)?;
        let pipeline = gpu::validated(&ctx.device, self.label, || {
            ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(self.label),
                layout: Some(&self.layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        })
        .inspect_err(|e| log::error!("{e}"))?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    pub fn is_functional(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Record one dispatch covering `size` pixels. Returns false without a pipeline.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_groups: &[&wgpu::BindGroup],
        push_constants: &[u8],
        size: (u32, u32),
    ) -> bool {
        let Some(pipeline) = &self.pipeline else { return false; };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        for (i, group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(i as u32, *group, &[]);
        }
        pass.set_push_constants(0, push_constants);
        pass.dispatch_workgroups(gpu::workgroups(size.0, WG_SIZE), gpu::workgroups(size.1, WG_SIZE), 1);
        true
    }
}
