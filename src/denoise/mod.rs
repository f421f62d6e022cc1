//! Denoiser chain.
//!
//! Three interchangeable denoisers read the path tracer's G-buffer (color,
//! albedo, normal+roughness, depth+motion, jitter) and write the
//! `denoised` buffer that tone mapping then reads:
//!
//! - [`atrous`]: edge-avoiding wavelet filter, GPU with a CPU twin
//! - [`ai`]: AI ray reconstruction through an external runtime
//! - [`monte_carlo`]: one-shot denoise on an external device
//!
//! [`DenoiserChain`] owns one of each and tracks which is active. External
//! runtimes are optional; without them their denoiser reports itself
//! unavailable and cannot be selected.

pub mod ai;
pub mod atrous;
pub mod monte_carlo;

pub use ai::{AiDenoiser, ReconstructionInputs, ReconstructionRuntime};
pub use atrous::{atrous_cpu, AtrousDenoiser, AtrousSettings};
pub use monte_carlo::{ExternalDenoiseDevice, ExternalImages, MonteCarloDenoiser, MonteCarloSettings};

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::gpu::{GBuffer, GpuContext};
use crate::pathtracer::reference::ReferenceImage;

/// Host-side copy of the common input contract.
#[derive(Clone, Debug)]
pub struct DenoiseInputs {
    pub width: u32,
    pub height: u32,
    /// Linear accumulated radiance
    pub color: Vec<Vec3>,
    /// Demodulated base color
    pub albedo: Vec<Vec3>,
    /// World normal (xyz) and roughness (w)
    pub normal_roughness: Vec<Vec4>,
    /// Linear view depth
    pub depth: Vec<f32>,
    /// Pixel delta from the previous frame
    pub motion: Vec<Vec2>,
    pub jitter: Vec2,
}

impl From<&ReferenceImage> for DenoiseInputs {
    fn from(image: &ReferenceImage) -> Self {
        let p = &image.pixels;
        Self {
            width: image.width,
            height: image.height,
            color: p.iter().map(|s| s.color).collect(),
            albedo: p.iter().map(|s| s.albedo).collect(),
            normal_roughness: p.iter().map(|s| s.normal_roughness).collect(),
            depth: p.iter().map(|s| s.depth_motion.x).collect(),
            motion: p.iter().map(|s| Vec2::new(s.depth_motion.y, s.depth_motion.z)).collect(),
            jitter: Vec2::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenoiserKind {
    #[default]
    None,
    Atrous,
    AiReconstruction,
    MonteCarlo,
}

impl DenoiserKind {
    pub const ALL: [DenoiserKind; 4] = [Self::None, Self::Atrous, Self::AiReconstruction, Self::MonteCarlo];

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Atrous => "A-trous",
            Self::AiReconstruction => "AI reconstruction",
            Self::MonteCarlo => "Monte-Carlo (external)",
        }
    }
}

/// Per-frame buffers handed to the active denoiser.
pub struct DenoiseFrame<'a> {
    /// Render-size G-buffer written by the path tracer
    pub guides: &'a GBuffer,
    /// Output-size G-buffer; the same as `guides` unless the AI denoiser upscales
    pub output: &'a GBuffer,
    pub jitter: Vec2,
    /// Accumulation was reset this frame
    pub reset: bool,
}

pub enum Denoiser {
    Atrous(AtrousDenoiser),
    AiReconstruction(AiDenoiser),
    MonteCarlo(MonteCarloDenoiser),
}

impl Denoiser {
    pub fn kind(&self) -> DenoiserKind {
        match self {
            Self::Atrous(_) => DenoiserKind::Atrous,
            Self::AiReconstruction(_) => DenoiserKind::AiReconstruction,
            Self::MonteCarlo(_) => DenoiserKind::MonteCarlo,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Atrous(d) => d.is_functional(),
            Self::AiReconstruction(d) => d.is_available(),
            Self::MonteCarlo(d) => d.is_available(),
        }
    }

    /// Called when the denoiser becomes active.
    pub fn init(&mut self, ctx: &GpuContext, output: (u32, u32)) {
        if let Self::AiReconstruction(d) = self {
            d.update_size(ctx, output);
        }
    }

    pub fn deinit(&mut self) {
        match self {
            Self::Atrous(_) => {}
            Self::AiReconstruction(d) => d.deinit(),
            Self::MonteCarlo(d) => d.reset(),
        }
    }

    /// Render size for `output`; `Some` when it changed this call.
    pub fn update_size(&mut self, ctx: &GpuContext, output: (u32, u32)) -> Option<(u32, u32)> {
        match self {
            Self::AiReconstruction(d) => d.update_size(ctx, output),
            _ => None,
        }
    }

    /// Size the path tracer should render at for `output`.
    pub fn render_size(&self, output: (u32, u32)) -> (u32, u32) {
        match self {
            Self::AiReconstruction(d) if d.is_available() => d.render_size().unwrap_or(output),
            _ => output,
        }
    }

    /// Record this frame's denoise. Returns true when tone mapping should
    /// read `output.denoised` instead of the accumulation.
    pub fn denoise(&mut self, ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder, frame: &DenoiseFrame) -> bool {
        match self {
            Self::Atrous(d) => d.denoise(encoder, frame.guides),
            Self::AiReconstruction(d) => {
                let inputs = ReconstructionInputs {
                    guides: frame.guides,
                    jitter: frame.jitter,
                    reset: frame.reset,
                };
                d.denoise(ctx, encoder, &inputs, frame.output)
            }
            Self::MonteCarlo(d) => {
                if frame.reset {
                    d.reset();
                }
                d.showing_denoised()
            }
        }
    }
}

/// One denoiser of each kind plus the current selection.
pub struct DenoiserChain {
    denoisers: Vec<Denoiser>,
    active: DenoiserKind,
}

impl DenoiserChain {
    pub fn new(atrous: AtrousDenoiser, ai: AiDenoiser, monte_carlo: MonteCarloDenoiser) -> Self {
        Self {
            denoisers: vec![
                Denoiser::Atrous(atrous),
                Denoiser::AiReconstruction(ai),
                Denoiser::MonteCarlo(monte_carlo),
            ],
            active: DenoiserKind::None,
        }
    }

    pub fn active_kind(&self) -> DenoiserKind {
        self.active
    }

    pub fn get(&self, kind: DenoiserKind) -> Option<&Denoiser> {
        self.denoisers.iter().find(|d| d.kind() == kind)
    }

    pub fn get_mut(&mut self, kind: DenoiserKind) -> Option<&mut Denoiser> {
        self.denoisers.iter_mut().find(|d| d.kind() == kind)
    }

    pub fn active(&self) -> Option<&Denoiser> {
        self.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Denoiser> {
        let kind = self.active;
        self.get_mut(kind)
    }

    pub fn is_available(&self, kind: DenoiserKind) -> bool {
        kind == DenoiserKind::None || self.get(kind).is_some_and(Denoiser::is_available)
    }

    /// Switch the active denoiser. An unavailable one is refused and
    /// the selection is left unchanged.
    pub fn select(&mut self, ctx: &GpuContext, kind: DenoiserKind, output: (u32, u32)) -> bool {
        if kind == self.active {
            return true;
        }
        if !self.is_available(kind) {
            log::warn!("Denoiser '{}' is unavailable", kind.label());
            return false;
        }
        if let Some(d) = self.active_mut() {
            d.deinit();
        }
        self.active = kind;
        if let Some(d) = self.active_mut() {
            d.init(ctx, output);
        }
        log::info!("Denoiser: {}", kind.label());
        true
    }

    pub fn atrous_settings_mut(&mut self) -> Option<&mut AtrousSettings> {
        match self.get_mut(DenoiserKind::Atrous) {
            Some(Denoiser::Atrous(d)) => Some(&mut d.settings),
            _ => None,
        }
    }

    pub fn monte_carlo_mut(&mut self) -> Option<&mut MonteCarloDenoiser> {
        match self.get_mut(DenoiserKind::MonteCarlo) {
            Some(Denoiser::MonteCarlo(d)) => Some(d),
            _ => None,
        }
    }

    /// Reason shown next to a disabled denoiser in the UI.
    pub fn unavailable_reason(&self, kind: DenoiserKind) -> Option<String> {
        match self.get(kind)? {
            Denoiser::Atrous(d) if !d.is_functional() => Some("shader failed to compile".into()),
            Denoiser::AiReconstruction(d) => d.unavailable_reason().map(str::to_string),
            Denoiser::MonteCarlo(d) if !d.is_available() => Some("no external denoise device".into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathtracer::reference::PixelSample;
    use glam::Vec3;

    #[test]
    fn test_inputs_from_reference_image() {
        let mut px = PixelSample::default();
        px.color = Vec3::new(1.0, 2.0, 3.0);
        px.depth_motion = Vec3::new(4.0, 0.5, -0.5);
        let image = ReferenceImage {
            width: 2,
            height: 1,
            pixels: vec![px, PixelSample::default()],
        };
        let inputs = DenoiseInputs::from(&image);
        assert_eq!(inputs.color[0], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(inputs.depth[0], 4.0);
        assert_eq!(inputs.motion[0], Vec2::new(0.5, -0.5));
        assert_eq!(inputs.color.len(), 2);
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let labels: std::collections::HashSet<_> = DenoiserKind::ALL.iter().map(|k| k.label()).collect();
        assert_eq!(labels.len(), DenoiserKind::ALL.len());
        assert_eq!(DenoiserKind::default(), DenoiserKind::None);
    }
}
