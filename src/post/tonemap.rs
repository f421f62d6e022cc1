//! Tone mapping: linear radiance to the 8-bit display image.
//!
//! Order of operations: exposure, curve, saturation around luminance,
//! gamma, contrast around mid-grey, clamp. The CPU functions here are the
//! twins of `shaders/tonemap.wgsl`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::gpu::gbuffer::binding;
use crate::gpu::{ComputeKernel, GBuffer, GpuContext};
use crate::shaders;
use crate::util::luminance;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneCurve {
    Linear,
    Reinhard,
    Hable,
    #[default]
    Aces,
}

impl ToneCurve {
    pub const ALL: [ToneCurve; 4] = [Self::Linear, Self::Reinhard, Self::Hable, Self::Aces];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Linear => "Linear",
            Self::Reinhard => "Reinhard",
            Self::Hable => "Hable (Uncharted 2)",
            Self::Aces => "ACES (Narkowicz)",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMapSettings {
    pub curve: ToneCurve,
    pub exposure: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
}

impl Default for ToneMapSettings {
    fn default() -> Self {
        Self {
            curve: ToneCurve::Aces,
            exposure: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 2.2,
        }
    }
}

fn hable_partial(x: Vec3) -> Vec3 {
    const A: f32 = 0.15;
    const B: f32 = 0.50;
    const C: f32 = 0.10;
    const D: f32 = 0.20;
    const E: f32 = 0.02;
    const F: f32 = 0.30;
    // D*E - (E/F)*D*F cancels, so black maps to exactly 0
    x * (x * A + C * B - (x * A + B) * (E / F)) / (x * (x * A + B) + D * F)
}

pub fn apply_curve(x: Vec3, curve: ToneCurve) -> Vec3 {
    match curve {
        ToneCurve::Linear => x,
        ToneCurve::Reinhard => x / (Vec3::ONE + x),
        ToneCurve::Hable => hable_partial(x * 2.0) / hable_partial(Vec3::splat(11.2)),
        ToneCurve::Aces => (x * (x * 2.51 + 0.03)) / (x * (x * 2.43 + 0.59) + 0.14),
    }
}

/// Display value in [0, 1] for linear color `c`.
pub fn tonemap(c: Vec3, s: &ToneMapSettings) -> Vec3 {
    let mut c = c.max(Vec3::ZERO) * s.exposure;
    c = apply_curve(c, s.curve).max(Vec3::ZERO);
    let lum = luminance(c);
    c = Vec3::splat(lum).lerp(c, s.saturation).max(Vec3::ZERO);
    c = c.powf(1.0 / s.gamma.max(1e-3));
    c = (c - Vec3::splat(0.5)) * s.contrast + Vec3::splat(0.5);
    c.clamp(Vec3::ZERO, Vec3::ONE)
}

/// Quantize a display value the way an Rgba8Unorm store does.
pub fn to_rgba8(c: Vec3) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    [q(c.x), q(c.y), q(c.z), 255]
}

/// Push constants matching `TonemapPush` in tonemap.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TonemapPush {
    width: u32,
    height: u32,
    source: u32,
    curve: u32,
    exposure: f32,
    contrast: f32,
    saturation: f32,
    gamma: f32,
    active: u32,
    _pad: [u32; 3],
}

pub struct ToneMapPass {
    kernel: ComputeKernel,
}

impl ToneMapPass {
    pub fn new(ctx: &mut GpuContext, gbuffer_layout: &wgpu::BindGroupLayout) -> Self {
        let kernel = ComputeKernel::new(
            ctx,
            "tonemap",
            &shaders::tonemap_source(),
            &[gbuffer_layout],
            std::mem::size_of::<TonemapPush>() as u32,
        );
        Self { kernel }
    }

    pub fn is_functional(&self) -> bool {
        self.kernel.is_functional()
    }

    /// Write `gbuffer.display` from the accumulation or, with
    /// `from_denoised`, from the denoised buffer. `passthrough` skips the
    /// curve (debug views show raw attributes).
    pub fn run(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        gbuffer: &GBuffer,
        settings: &ToneMapSettings,
        from_denoised: bool,
        passthrough: bool,
    ) -> bool {
        let (width, height) = gbuffer.size();
        let push = TonemapPush {
            width,
            height,
            source: if from_denoised {
                binding::DENOISED
            } else {
                binding::ACCUMULATION
            },
            curve: settings.curve.code(),
            exposure: settings.exposure,
            contrast: settings.contrast,
            saturation: settings.saturation,
            gamma: settings.gamma,
            active: u32::from(!passthrough),
            _pad: [0; 3],
        };
        self.kernel
            .dispatch(encoder, &[gbuffer.bind_group()], bytemuck::bytes_of(&push), (width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-4
    }

    #[test]
    fn test_curve_codes_match_shader() {
        assert_eq!(ToneCurve::Linear.code(), 0);
        assert_eq!(ToneCurve::Reinhard.code(), 1);
        assert_eq!(ToneCurve::Hable.code(), 2);
        assert_eq!(ToneCurve::Aces.code(), 3);
    }

    #[test]
    fn test_black_stays_black_and_output_is_clamped() {
        for curve in ToneCurve::ALL {
            let s = ToneMapSettings {
                curve,
                ..Default::default()
            };
            assert_eq!(apply_curve(Vec3::ZERO, curve), Vec3::ZERO, "{curve:?}");
            assert_eq!(to_rgba8(tonemap(Vec3::ZERO, &s)), [0, 0, 0, 255], "{curve:?}");
            let hot = tonemap(Vec3::splat(1e6), &s);
            assert!(hot.max_element() <= 1.0);
        }
    }

    #[test]
    fn test_linear_with_unit_gamma_is_identity_in_range() {
        let s = ToneMapSettings {
            curve: ToneCurve::Linear,
            gamma: 1.0,
            ..Default::default()
        };
        let c = Vec3::new(0.1, 0.5, 0.9);
        assert!(close(tonemap(c, &s), c));
    }

    #[test]
    fn test_hable_matches_the_uncharted_curve() {
        // reference values of the unsimplified operator
        let partial = |x: f32| {
            (x * (0.15 * x + 0.05) + 0.004) / (x * (0.15 * x + 0.5) + 0.06) - 0.02 / 0.3
        };
        for x in [0.05f32, 0.5, 1.0, 4.0] {
            let expected = partial(2.0 * x) / partial(11.2);
            let got = apply_curve(Vec3::splat(x), ToneCurve::Hable).x;
            assert!((got - expected).abs() < 1e-5, "{x}: {got} vs {expected}");
        }
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in [ToneCurve::Reinhard, ToneCurve::Hable, ToneCurve::Aces] {
            let mut prev = -1.0;
            for i in 0..64 {
                let v = apply_curve(Vec3::splat(i as f32 * 0.25), curve).x;
                assert!(v >= prev, "{curve:?} not monotonic at {i}");
                prev = v;
            }
        }
    }

    #[test]
    fn test_zero_saturation_is_grey() {
        let s = ToneMapSettings {
            saturation: 0.0,
            ..Default::default()
        };
        let c = tonemap(Vec3::new(0.8, 0.2, 0.1), &s);
        assert!((c.x - c.y).abs() < 1e-5 && (c.y - c.z).abs() < 1e-5);
    }

    #[test]
    fn test_exposure_brightens() {
        let base = ToneMapSettings::default();
        let bright = ToneMapSettings {
            exposure: 4.0,
            ..Default::default()
        };
        let c = Vec3::splat(0.1);
        assert!(tonemap(c, &bright).x > tonemap(c, &base).x);
        assert_eq!(to_rgba8(Vec3::new(0.0, 1.0, 0.5)), [0, 255, 128, 255]);
    }
}
