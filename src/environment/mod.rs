//! Environment lighting: analytic sky, HDR map and solid color.
//!
//! Every emitter implements [`Emitter`], the contract used identically by
//! the path tracer (radiance on miss, NEE sampling, MIS pdf) and the
//! rasterizer (background dome). `shaders/environment.wgsl` is the GPU
//! twin of this module.

pub mod gpu;
mod hdr;
mod sky;

pub use gpu::EnvironmentGpu;
pub use hdr::HdrEnvironment;
pub use sky::{xyy_to_rgb, GpuSkyParams, PhysicalSky, SkyParams};

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;

use crate::util::{sampling, Vec2, Vec3};

/// Active environment emitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvKind {
    #[default]
    Sky,
    Hdr,
    SolidColor,
}

impl EnvKind {
    pub fn code(self) -> u32 {
        match self {
            EnvKind::Sky => 0,
            EnvKind::Hdr => 1,
            EnvKind::SolidColor => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnvKind::Sky => "Sky",
            EnvKind::Hdr => "HDR",
            EnvKind::SolidColor => "Solid color",
        }
    }
}

/// Environment parameters shared by both backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub kind: EnvKind,
    pub intensity: f32,
    /// Radians about the up axis
    pub rotation: f32,
    /// 0 = sharp, 1 = most blurred mip (HDR background only)
    pub blur: f32,
    pub solid_color: [f32; 3],
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            kind: EnvKind::Sky,
            intensity: 1.0,
            rotation: 0.0,
            blur: 0.0,
            solid_color: [0.0; 3],
        }
    }
}

/// A direction drawn for next-event estimation.
#[derive(Clone, Copy, Debug)]
pub struct EnvSample {
    pub direction: Vec3,
    /// Solid-angle pdf, or the selection probability for delta lights
    pub pdf: f32,
    /// Radiance arriving from `direction` (irradiance for delta lights)
    pub radiance: Vec3,
    /// Delta light (sun disc): excluded from MIS
    pub is_delta: bool,
}

/// Radiance source at infinity.
pub trait Emitter {
    /// Radiance arriving along `-dir`, as seen by secondary rays.
    fn radiance(&self, dir: Vec3) -> Vec3;

    /// Importance-sample an incoming direction from two uniform variates.
    fn sample(&self, xi: Vec2) -> EnvSample;

    /// Solid-angle pdf of [`Emitter::sample`] producing `dir` (non-delta part).
    fn eval_pdf(&self, dir: Vec3) -> f32;

    /// What the camera sees: includes delta features (sun disc) and blur.
    fn background(&self, dir: Vec3, blur: f32) -> Vec3;

    /// Luminance integral over the sphere; seeds the firefly clamp.
    fn integral(&self) -> f32;
}

/// Rotate about the +Y axis.
#[inline]
pub fn rotate_y(v: Vec3, angle: f32) -> Vec3 {
    let (s, c) = angle.sin_cos();
    Vec3::new(v.x * c + v.z * s, v.y, -v.x * s + v.z * c)
}

/// Latitude-longitude coordinates of a world direction.
///
/// `u` follows the azimuth `atan2(z, x)`, `v` = 0 at +Y.
#[inline]
pub fn direction_to_uv(dir: Vec3, rotation: f32) -> Vec2 {
    let d = rotate_y(dir, -rotation);
    let u = (d.z.atan2(d.x) + PI) / (2.0 * PI);
    let v = d.y.clamp(-1.0, 1.0).acos() / PI;
    Vec2::new(u, v)
}

/// Inverse of [`direction_to_uv`].
#[inline]
pub fn uv_to_direction(uv: Vec2, rotation: f32) -> Vec3 {
    let phi = uv.x * 2.0 * PI - PI;
    let theta = uv.y * PI;
    let (st, ct) = theta.sin_cos();
    let local = Vec3::new(st * phi.cos(), ct, st * phi.sin());
    rotate_y(local, rotation)
}

/// Uniform emitter used for the solid-color background.
#[derive(Clone, Copy, Debug)]
pub struct SolidColor {
    pub color: Vec3,
}

impl Emitter for SolidColor {
    fn radiance(&self, _dir: Vec3) -> Vec3 {
        self.color
    }

    fn sample(&self, xi: Vec2) -> EnvSample {
        EnvSample {
            direction: sampling::uniform_sphere(xi),
            pdf: 1.0 / (4.0 * PI),
            radiance: self.color,
            is_delta: false,
        }
    }

    fn eval_pdf(&self, _dir: Vec3) -> f32 {
        1.0 / (4.0 * PI)
    }

    fn background(&self, _dir: Vec3, _blur: f32) -> Vec3 {
        self.color
    }

    fn integral(&self) -> f32 {
        crate::util::luminance(self.color) * 4.0 * PI
    }
}

/// The environment subsystem: settings plus the emitters it can switch between.
///
/// Owns the HDR importance table exclusively.
pub struct Environment {
    pub settings: EnvironmentSettings,
    pub sky: PhysicalSky,
    hdr: Option<HdrEnvironment>,
    solid: SolidColor,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EnvironmentSettings::default(), SkyParams::default())
    }
}

impl Environment {
    pub fn new(settings: EnvironmentSettings, sky: SkyParams) -> Self {
        let mut env = Self {
            settings,
            sky: PhysicalSky::new(sky),
            hdr: None,
            solid: SolidColor { color: Vec3::ZERO },
        };
        env.sync();
        env
    }

    /// Push `settings` into the emitters (call after editing settings).
    pub fn sync(&mut self) {
        self.solid.color = Vec3::from(self.settings.solid_color) * self.settings.intensity;
        self.sky.set_scale(self.settings.intensity);
        if let Some(hdr) = &mut self.hdr {
            hdr.intensity = self.settings.intensity;
            hdr.rotation = self.settings.rotation;
        }
    }

    /// Load an HDR/EXR map and make it the active emitter.
    pub fn load_hdr(&mut self, path: &Path) -> crate::Result<()> {
        let hdr = HdrEnvironment::load(path)?;
        self.set_hdr(hdr);
        Ok(())
    }

    pub fn set_hdr(&mut self, hdr: HdrEnvironment) {
        self.hdr = Some(hdr);
        self.settings.kind = EnvKind::Hdr;
        self.sync();
    }

    pub fn hdr(&self) -> Option<&HdrEnvironment> {
        self.hdr.as_ref()
    }

    /// Kind actually in use (HDR falls back to the sky until a map is loaded).
    pub fn effective_kind(&self) -> EnvKind {
        match self.settings.kind {
            EnvKind::Hdr if self.hdr.is_none() => EnvKind::Sky,
            k => k,
        }
    }

    pub fn active(&self) -> &dyn Emitter {
        match self.effective_kind() {
            EnvKind::Sky => &self.sky,
            EnvKind::Hdr => match &self.hdr {
                Some(hdr) => hdr,
                None => &self.sky,
            },
            EnvKind::SolidColor => &self.solid,
        }
    }

    /// Firefly clamp seed for the active emitter.
    pub fn suggested_firefly_clamp(&self) -> f32 {
        match self.effective_kind() {
            EnvKind::Hdr => self.active().integral().max(1.0),
            _ => 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_mapping_round_trips() {
        for &rot in &[0.0, 0.7, -2.0] {
            for &d in &[Vec3::X, Vec3::Z, Vec3::new(0.3, 0.5, -0.8).normalize(), Vec3::new(-1.0, -0.2, 0.1).normalize()] {
                let uv = direction_to_uv(d, rot);
                assert!((0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y));
                assert!((uv_to_direction(uv, rot) - d).length() < 1e-4, "{d:?} rot {rot}");
            }
        }
        assert!(direction_to_uv(Vec3::Y, 0.0).y.abs() < 1e-6);
    }

    #[test]
    fn test_hdr_without_map_falls_back_to_sky() {
        let mut env = Environment::default();
        env.settings.kind = EnvKind::Hdr;
        assert_eq!(env.effective_kind(), EnvKind::Sky);
        assert_eq!(env.suggested_firefly_clamp(), 10.0);
    }

    #[test]
    fn test_solid_color_scales_with_intensity() {
        let mut env = Environment::default();
        env.settings.kind = EnvKind::SolidColor;
        env.settings.solid_color = [0.5, 0.5, 0.5];
        env.settings.intensity = 2.0;
        env.sync();
        assert_eq!(env.active().radiance(Vec3::Y), Vec3::ONE);
        assert_eq!(env.active().background(Vec3::Y, 0.5), Vec3::ONE);
    }
}
