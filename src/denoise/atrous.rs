//! Edge-avoiding a-trous wavelet filter (Dammertz et al. 2010).
//!
//! Each iteration is a 5x5 B3-spline kernel dilated by `2^i`, with its taps
//! weighted by color, normal and depth similarity. Iterations ping-pong
//! between the `denoised` and `scratch` buffers so the last one lands in
//! `denoised`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::DenoiseInputs;
use crate::gpu::gbuffer::binding;
use crate::gpu::{ComputeKernel, GBuffer, GpuContext};
use crate::shaders;

const KERNEL: [f32; 5] = [1.0 / 16.0, 1.0 / 4.0, 3.0 / 8.0, 1.0 / 4.0, 1.0 / 16.0];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrousSettings {
    pub iterations: u32,
    pub color_phi: f32,
    pub normal_phi: f32,
    pub depth_phi: f32,
}

impl Default for AtrousSettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            color_phi: 0.5,
            normal_phi: 1.0,
            depth_phi: 0.1,
        }
    }
}

/// Filter parameters of one iteration; the phis are squared before use.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationParams {
    pub step_width: u32,
    pub color_phi: f32,
    pub normal_phi: f32,
    pub depth_phi: f32,
}

impl AtrousSettings {
    pub fn iteration(&self, i: u32) -> IterationParams {
        let scale = (1u32 << i.min(31)) as f32;
        IterationParams {
            step_width: 1 << i.min(31),
            color_phi: self.color_phi * self.color_phi / scale,
            normal_phi: self.normal_phi * self.normal_phi,
            depth_phi: self.depth_phi * self.depth_phi,
        }
    }
}

fn normal_weight(a: Vec3, b: Vec3, phi: f32) -> f32 {
    let empty_a = a.length_squared() == 0.0;
    let empty_b = b.length_squared() == 0.0;
    if empty_a || empty_b {
        return if empty_a && empty_b { 1.0 } else { 0.0 };
    }
    a.dot(b).max(0.0).powf(phi)
}

fn filter_pass(inputs: &DenoiseInputs, src: &[Vec3], dst: &mut [Vec3], p: IterationParams) {
    let (w, h) = (inputs.width as i64, inputs.height as i64);
    for y in 0..h {
        for x in 0..w {
            let center = (y * w + x) as usize;
            let c0 = src[center];
            let n0 = inputs.normal_roughness[center].truncate();
            let d0 = inputs.depth[center];

            let mut sum = Vec3::ZERO;
            let mut weight_sum = 0.0;
            for (ky, hy) in KERNEL.iter().enumerate() {
                for (kx, hx) in KERNEL.iter().enumerate() {
                    let px = x + (kx as i64 - 2) * p.step_width as i64;
                    let py = y + (ky as i64 - 2) * p.step_width as i64;
                    if px < 0 || py < 0 || px >= w || py >= h {
                        continue;
                    }
                    let i = (py * w + px) as usize;
                    let c = src[i];
                    let dc = c - c0;
                    let dd = inputs.depth[i] - d0;
                    let w_color = (-dc.length_squared() / p.color_phi.max(1e-12)).exp();
                    let w_depth = (-(dd * dd) / p.depth_phi.max(1e-12)).exp();
                    let w_normal = normal_weight(n0, inputs.normal_roughness[i].truncate(), p.normal_phi);
                    let weight = hx * hy * w_color * w_depth * w_normal;
                    sum += c * weight;
                    weight_sum += weight;
                }
            }
            dst[center] = if weight_sum > 0.0 { sum / weight_sum } else { c0 };
        }
    }
}

/// CPU twin of the GPU filter.
pub fn atrous_cpu(inputs: &DenoiseInputs, settings: &AtrousSettings) -> Vec<Vec3> {
    let mut current = inputs.color.clone();
    let mut next = vec![Vec3::ZERO; current.len()];
    for i in 0..settings.iterations {
        filter_pass(inputs, &current, &mut next, settings.iteration(i));
        std::mem::swap(&mut current, &mut next);
    }
    current
}

/// Push constants matching `AtrousPush` in atrous.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AtrousPush {
    width: u32,
    height: u32,
    step_width: u32,
    src: u32,
    dst: u32,
    color_phi: f32,
    normal_phi: f32,
    depth_phi: f32,
}

/// (source, destination) binding of each iteration, ending in `denoised`.
pub fn ping_pong(iterations: u32) -> Vec<(u32, u32)> {
    let mut dst = if iterations % 2 == 0 {
        binding::SCRATCH
    } else {
        binding::DENOISED
    };
    let mut src = binding::ACCUMULATION;
    let mut passes = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        passes.push((src, dst));
        src = dst;
        dst = if dst == binding::DENOISED {
            binding::SCRATCH
        } else {
            binding::DENOISED
        };
    }
    passes
}

pub struct AtrousDenoiser {
    kernel: ComputeKernel,
    pub settings: AtrousSettings,
}

impl AtrousDenoiser {
    pub fn new(ctx: &mut GpuContext, gbuffer_layout: &wgpu::BindGroupLayout, settings: AtrousSettings) -> Self {
        let kernel = ComputeKernel::new(
            ctx,
            "atrous",
            &shaders::atrous_source(),
            &[gbuffer_layout],
            std::mem::size_of::<AtrousPush>() as u32,
        );
        Self { kernel, settings }
    }

    pub fn is_functional(&self) -> bool {
        self.kernel.is_functional()
    }

    /// Filter `accumulation` into `denoised`. Returns false when nothing
    /// was written (no pipeline or zero iterations).
    pub fn denoise(&self, encoder: &mut wgpu::CommandEncoder, gbuffer: &GBuffer) -> bool {
        let (width, height) = gbuffer.size();
        let mut written = false;
        for (i, (src, dst)) in ping_pong(self.settings.iterations).into_iter().enumerate() {
            let p = self.settings.iteration(i as u32);
            let push = AtrousPush {
                width,
                height,
                step_width: p.step_width,
                src,
                dst,
                color_phi: p.color_phi,
                normal_phi: p.normal_phi,
                depth_phi: p.depth_phi,
            };
            written = self
                .kernel
                .dispatch(encoder, &[gbuffer.bind_group()], bytemuck::bytes_of(&push), (width, height));
            if !written {
                return false;
            }
        }
        written
    }
}
