//! Analytic daylight sky (Preetham/Perez) with a sun disc.
//!
//! The dome is evaluated in CIE xyY from the Perez distribution and
//! converted to linear sRGB. The sun is a delta light for NEE and a
//! small disc for the camera. Ground below the horizon reflects the
//! horizon radiance scaled by the ground albedo.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::{EnvSample, Emitter};
use crate::util::{luminance, sampling, Vec2, Vec3};

/// Radiance scale from kcd/m² to renderer units.
const SKY_SCALE: f32 = 0.05;
/// Sun irradiance (luminance units) at sun intensity 1 before extinction.
const SUN_IRRADIANCE: f32 = 3.0;

/// User-facing sky parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyParams {
    /// Direction towards the sun
    pub sun_direction: [f32; 3],
    pub turbidity: f32,
    pub ground_albedo: [f32; 3],
    pub sun_intensity: f32,
    /// Angular radius of the sun disc (radians)
    pub sun_angular_radius: f32,
    pub sky_intensity: f32,
    pub up: [f32; 3],
}

impl Default for SkyParams {
    fn default() -> Self {
        let sun = Vec3::new(0.0, 0.7, 0.7).normalize();
        Self {
            sun_direction: sun.to_array(),
            turbidity: 3.0,
            ground_albedo: [0.3; 3],
            sun_intensity: 1.0,
            sun_angular_radius: 0.00935,
            sky_intensity: 1.0,
            up: [0.0, 1.0, 0.0],
        }
    }
}

/// Uniform block consumed by `shaders/environment.wgsl` (160 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSkyParams {
    /// xyz = direction to the sun, w = sun selection probability
    pub sun_direction: [f32; 4],
    /// xyz = up axis, w = cos(sun angular radius)
    pub up: [f32; 4],
    /// rgb = ground albedo, w = dome radiance scale
    pub ground_albedo: [f32; 4],
    /// Zenith (Y, x, y) divided by the Perez value at the zenith
    pub zenith: [f32; 4],
    /// Perez coefficients A..E, xyz = (Y, x, y) channels
    pub perez: [[f32; 4]; 5],
    /// rgb = sun irradiance, w = sun disc solid angle
    pub sun_irradiance: [f32; 4],
}

/// Perez distribution coefficients for one channel.
#[derive(Clone, Copy, Debug)]
struct Perez {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
}

impl Perez {
    fn eval(&self, cos_theta: f32, gamma: f32, cos_gamma: f32) -> f32 {
        (1.0 + self.a * (self.b / cos_theta).exp()) * (1.0 + self.c * (self.d * gamma).exp() + self.e * cos_gamma * cos_gamma)
    }
}

fn perez_coefficients(t: f32) -> [Perez; 3] {
    [
        Perez {
            a: 0.1787 * t - 1.4630,
            b: -0.3554 * t + 0.4275,
            c: -0.0227 * t + 5.3251,
            d: 0.1206 * t - 2.5771,
            e: -0.0670 * t + 0.3703,
        },
        Perez {
            a: -0.0193 * t - 0.2592,
            b: -0.0665 * t + 0.0008,
            c: -0.0004 * t + 0.2125,
            d: -0.0641 * t - 0.8989,
            e: -0.0033 * t + 0.0452,
        },
        Perez {
            a: -0.0167 * t - 0.2608,
            b: -0.0950 * t + 0.0092,
            c: -0.0079 * t + 0.2102,
            d: -0.0441 * t - 1.6537,
            e: -0.0109 * t + 0.0529,
        },
    ]
}

/// Zenith luminance (kcd/m²) and chromaticity for a sun at zenith angle `theta_s`.
fn zenith_yxy(t: f32, theta_s: f32) -> Vec3 {
    let chi = (4.0 / 9.0 - t / 120.0) * (PI - 2.0 * theta_s);
    let y_z = ((4.0453 * t - 4.9710) * chi.tan() - 0.2155 * t + 2.4192).max(0.0);
    let (t2, s, s2, s3) = (t * t, theta_s, theta_s * theta_s, theta_s * theta_s * theta_s);
    let x_z = t2 * (0.00166 * s3 - 0.00375 * s2 + 0.00209 * s)
        + t * (-0.02903 * s3 + 0.06377 * s2 - 0.03202 * s + 0.00394)
        + (0.11693 * s3 - 0.21196 * s2 + 0.06052 * s + 0.25886);
    let yy_z = t2 * (0.00275 * s3 - 0.00610 * s2 + 0.00317 * s)
        + t * (-0.04214 * s3 + 0.08970 * s2 - 0.04153 * s + 0.00516)
        + (0.15346 * s3 - 0.26756 * s2 + 0.06670 * s + 0.26688);
    Vec3::new(y_z, x_z, yy_z)
}

/// CIE xyY to linear sRGB.
pub fn xyy_to_rgb(yxy: Vec3) -> Vec3 {
    let (big_y, x, y) = (yxy.x, yxy.y, yxy.z);
    if y <= 1e-6 {
        return Vec3::ZERO;
    }
    let big_x = x / y * big_y;
    let big_z = (1.0 - x - y) / y * big_y;
    Vec3::new(
        3.240_454_2 * big_x - 1.537_138_5 * big_y - 0.498_531_4 * big_z,
        -0.969_266 * big_x + 1.876_010_8 * big_y + 0.041_556 * big_z,
        0.055_643_4 * big_x - 0.204_025_9 * big_y + 1.057_225_2 * big_z,
    )
    .max(Vec3::ZERO)
}

/// Evaluated sky model.
#[derive(Clone, Debug)]
pub struct PhysicalSky {
    params: SkyParams,
    /// Global environment intensity
    scale: f32,
    sun: Vec3,
    up: Vec3,
    perez: [Perez; 3],
    /// zenith / F(0, theta_s) per channel
    zenith: Vec3,
    sun_irradiance: Vec3,
    sun_probability: f32,
    dome_integral: f32,
}

impl PhysicalSky {
    pub fn new(params: SkyParams) -> Self {
        let mut sky = Self {
            params,
            scale: 1.0,
            sun: Vec3::Y,
            up: Vec3::Y,
            perez: perez_coefficients(3.0),
            zenith: Vec3::ZERO,
            sun_irradiance: Vec3::ZERO,
            sun_probability: 0.0,
            dome_integral: 0.0,
        };
        sky.recompute();
        sky
    }

    pub fn params(&self) -> &SkyParams {
        &self.params
    }

    pub fn set_params(&mut self, params: SkyParams) {
        if params != self.params {
            self.params = params;
            self.recompute();
        }
    }

    pub fn set_scale(&mut self, scale: f32) {
        if scale != self.scale {
            self.scale = scale;
            self.recompute();
        }
    }

    pub fn sun_direction(&self) -> Vec3 {
        self.sun
    }

    fn recompute(&mut self) {
        let p = &self.params;
        self.up = Vec3::from(p.up).normalize_or(Vec3::Y);
        self.sun = Vec3::from(p.sun_direction).normalize_or(self.up);
        let t = p.turbidity.clamp(1.7, 10.0);
        self.perez = perez_coefficients(t);

        // Sun below the horizon still lights the dome as if it sat on it
        let cos_s = self.sun.dot(self.up).max(0.0);
        let theta_s = cos_s.acos();
        let z = zenith_yxy(t, theta_s);
        let f0 = Vec3::new(
            self.perez[0].eval(1.0, theta_s, cos_s),
            self.perez[1].eval(1.0, theta_s, cos_s),
            self.perez[2].eval(1.0, theta_s, cos_s),
        );
        self.zenith = z / f0;

        let elevation_cos = self.sun.dot(self.up);
        self.sun_irradiance = if elevation_cos > 0.0 {
            // Kasten-Young air mass and a turbidity-scaled extinction
            let zenith_deg = theta_s.to_degrees();
            let air_mass = 1.0 / (cos_s + 0.50572 * (96.07995 - zenith_deg).max(1e-3).powf(-1.6364));
            let tau = Vec3::new(0.08, 0.16, 0.36) * (t / 3.0);
            let transmittance = (-tau * air_mass).exp();
            transmittance * (SUN_IRRADIANCE * p.sun_intensity * self.scale)
        } else {
            Vec3::ZERO
        };

        self.dome_integral = self.estimate_dome_integral();
        let sun_lum = luminance(self.sun_irradiance);
        self.sun_probability = if sun_lum > 0.0 {
            (sun_lum / (sun_lum + self.dome_integral)).clamp(0.1, 0.9)
        } else {
            0.0
        };
    }

    /// Midpoint-rule luminance integral of the dome over the sphere.
    fn estimate_dome_integral(&self) -> f32 {
        const N_THETA: usize = 32;
        const N_PHI: usize = 64;
        let mut sum = 0.0;
        for i in 0..N_THETA {
            let theta = (i as f32 + 0.5) / N_THETA as f32 * PI;
            for j in 0..N_PHI {
                let phi = (j as f32 + 0.5) / N_PHI as f32 * 2.0 * PI;
                let local = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                sum += luminance(self.dome(self.to_world(local))) * theta.sin();
            }
        }
        sum * (PI / N_THETA as f32) * (2.0 * PI / N_PHI as f32)
    }

    /// Map a +Y-up local direction into the sky frame.
    fn to_world(&self, local: Vec3) -> Vec3 {
        let (t, b) = gltf_pbr::bsdf::orthonormal_basis(self.up);
        t * local.x + self.up * local.y + b * local.z
    }

    fn sky_rgb(&self, dir: Vec3, cos_theta: f32) -> Vec3 {
        let cos_gamma = dir.dot(self.sun).clamp(-1.0, 1.0);
        let gamma = cos_gamma.acos();
        let cos_theta = cos_theta.max(0.01);
        let yxy = Vec3::new(
            self.zenith.x * self.perez[0].eval(cos_theta, gamma, cos_gamma),
            self.zenith.y * self.perez[1].eval(cos_theta, gamma, cos_gamma),
            self.zenith.z * self.perez[2].eval(cos_theta, gamma, cos_gamma),
        );
        xyy_to_rgb(yxy) * (SKY_SCALE * self.params.sky_intensity * self.scale)
    }

    /// Dome radiance without the sun disc.
    fn dome(&self, dir: Vec3) -> Vec3 {
        let cos_theta = dir.dot(self.up);
        if cos_theta >= 0.0 {
            return self.sky_rgb(dir, cos_theta);
        }
        let horizontal = (dir - self.up * cos_theta).normalize_or(self.to_world(Vec3::X));
        Vec3::from(self.params.ground_albedo) * self.sky_rgb(horizontal, 0.0)
    }

    fn sun_solid_angle(&self) -> f32 {
        2.0 * PI * (1.0 - self.params.sun_angular_radius.cos())
    }

    pub fn to_gpu(&self) -> GpuSkyParams {
        let p = &self.perez;
        let row = |f: fn(&Perez) -> f32| [f(&p[0]), f(&p[1]), f(&p[2]), 0.0];
        GpuSkyParams {
            sun_direction: self.sun.extend(self.sun_probability).to_array(),
            up: self.up.extend(self.params.sun_angular_radius.cos()).to_array(),
            ground_albedo: Vec3::from(self.params.ground_albedo)
                .extend(SKY_SCALE * self.params.sky_intensity * self.scale)
                .to_array(),
            zenith: self.zenith.extend(0.0).to_array(),
            perez: [row(|c| c.a), row(|c| c.b), row(|c| c.c), row(|c| c.d), row(|c| c.e)],
            sun_irradiance: self.sun_irradiance.extend(self.sun_solid_angle()).to_array(),
        }
    }
}

impl Emitter for PhysicalSky {
    fn radiance(&self, dir: Vec3) -> Vec3 {
        self.dome(dir)
    }

    fn sample(&self, xi: Vec2) -> EnvSample {
        let p = self.sun_probability;
        if xi.x < p {
            return EnvSample {
                direction: self.sun,
                pdf: p,
                radiance: self.sun_irradiance,
                is_delta: true,
            };
        }
        let u = Vec2::new((xi.x - p) / (1.0 - p), xi.y);
        let direction = sampling::uniform_sphere(u);
        EnvSample {
            direction,
            pdf: (1.0 - p) / (4.0 * PI),
            radiance: self.dome(direction),
            is_delta: false,
        }
    }

    fn eval_pdf(&self, _dir: Vec3) -> f32 {
        (1.0 - self.sun_probability) / (4.0 * PI)
    }

    fn background(&self, dir: Vec3, _blur: f32) -> Vec3 {
        let mut c = self.dome(dir);
        if dir.dot(self.sun) >= self.params.sun_angular_radius.cos() {
            c += self.sun_irradiance / self.sun_solid_angle();
        }
        c
    }

    fn integral(&self) -> f32 {
        self.dome_integral + luminance(self.sun_irradiance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_block_is_160_bytes() {
        assert_eq!(std::mem::size_of::<GpuSkyParams>(), 160);
    }

    #[test]
    fn test_sky_is_brighter_near_the_sun() {
        let sky = PhysicalSky::new(SkyParams::default());
        let sun = sky.sun_direction();
        let away = Vec3::new(0.0, 0.7, -0.7).normalize();
        let near = (sun + Vec3::new(0.05, 0.0, 0.0)).normalize();
        assert!(luminance(sky.radiance(near)) > luminance(sky.radiance(away)));
        assert!(sky.radiance(Vec3::Y).min_element() > 0.0);
    }

    #[test]
    fn test_sun_disc_only_in_background() {
        let sky = PhysicalSky::new(SkyParams::default());
        let sun = sky.sun_direction();
        assert!(luminance(sky.background(sun, 0.0)) > 100.0 * luminance(sky.radiance(sun)));
    }

    #[test]
    fn test_ground_is_albedo_times_horizon() {
        let sky = PhysicalSky::new(SkyParams::default());
        let below = Vec3::new(1.0, -0.5, 0.0).normalize();
        let horizon = sky.radiance(Vec3::X);
        let ground = sky.radiance(below);
        assert!((ground - horizon * 0.3).length() < 1e-3 * horizon.length().max(1.0));
    }

    #[test]
    fn test_sampling_covers_sun_and_dome() {
        let sky = PhysicalSky::new(SkyParams::default());
        let sun = sky.sample(Vec2::new(0.0, 0.5));
        assert!(sun.is_delta);
        assert!((sun.direction - sky.sun_direction()).length() < 1e-6);
        let dome = sky.sample(Vec2::new(0.999, 0.5));
        assert!(!dome.is_delta);
        assert!((dome.pdf - sky.eval_pdf(dome.direction)).abs() < 1e-6);
    }

    #[test]
    fn test_sun_below_horizon_is_dark() {
        let sky = PhysicalSky::new(SkyParams {
            sun_direction: [0.0, -1.0, 0.2],
            ..Default::default()
        });
        assert_eq!(sky.sample(Vec2::new(0.0, 0.0)).is_delta, false);
        assert_eq!(sky.integral(), sky.dome_integral);
    }
}
