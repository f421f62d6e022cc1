//! CPU evaluation of the metallic-roughness BSDF.
//!
//! Mirrors `shaders/pbr.wgsl` function by function so the reference
//! integrator and the GPU kernel agree. Lobes:
//! - Lambert diffuse weighted by (1 - metallic)(1 - F)
//! - GGX / height-correlated Smith specular with Schlick Fresnel
//! - Thin-walled specular transmission (delta, straight through)
//!
//! All directions point away from the surface. `n` is the shading normal.

use glam::Vec3;
use std::f32::consts::{FRAC_1_PI, PI};

use crate::params::MaterialParams;

/// Lower bound on GGX alpha to keep the NDF finite.
pub const MIN_ALPHA: f32 = 1e-3;

/// Material inputs after texture lookups.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceSample {
    pub base_color: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub ior: f32,
    pub transmission: f32,
}

impl SurfaceSample {
    pub fn from_params(params: &MaterialParams) -> Self {
        Self {
            base_color: params.base_color.truncate(),
            metallic: params.metallic().clamp(0.0, 1.0),
            roughness: params.roughness().clamp(0.0, 1.0),
            ior: params.ior(),
            transmission: params.transmission().clamp(0.0, 1.0),
        }
    }

    fn alpha(&self) -> f32 {
        (self.roughness * self.roughness).max(MIN_ALPHA)
    }

    fn f0(&self) -> Vec3 {
        let r = (self.ior - 1.0) / (self.ior + 1.0);
        Vec3::splat(r * r).lerp(self.base_color, self.metallic)
    }

    /// Probability of picking the specular lobe.
    fn specular_probability(&self) -> f32 {
        0.5 + 0.5 * self.metallic
    }

    /// Probability of the thin transmission event.
    fn transmission_probability(&self) -> f32 {
        self.transmission * (1.0 - self.metallic)
    }
}

/// Result of sampling the BSDF.
#[derive(Clone, Copy, Debug)]
pub struct BsdfSample {
    pub direction: Vec3,
    /// f * cos / pdf
    pub weight: Vec3,
    pub pdf: f32,
    /// Delta lobe: excluded from MIS
    pub is_delta: bool,
}

pub fn schlick_fresnel(f0: Vec3, cos_theta: f32) -> Vec3 {
    let m = (1.0 - cos_theta).clamp(0.0, 1.0);
    let m5 = m * m * m * m * m;
    f0 + (Vec3::ONE - f0) * m5
}

pub fn ggx_d(n_dot_h: f32, alpha: f32) -> f32 {
    let a2 = alpha * alpha;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d)
}

/// Height-correlated Smith visibility term `G / (4 NdotL NdotV)`.
pub fn smith_visibility(n_dot_v: f32, n_dot_l: f32, alpha: f32) -> f32 {
    let a2 = alpha * alpha;
    let gv = n_dot_l * (n_dot_v * n_dot_v * (1.0 - a2) + a2).sqrt();
    let gl = n_dot_v * (n_dot_l * n_dot_l * (1.0 - a2) + a2).sqrt();
    let denom = gv + gl;
    if denom > 0.0 {
        0.5 / denom
    } else {
        0.0
    }
}

/// Evaluate `f * cos(theta_l)` and the combined pdf of sampling `l`.
///
/// Returns zero if either direction is below the surface.
pub fn eval(surface: &SurfaceSample, n: Vec3, v: Vec3, l: Vec3) -> (Vec3, f32) {
    let n_dot_v = n.dot(v);
    let n_dot_l = n.dot(l);
    if n_dot_v <= 0.0 || n_dot_l <= 0.0 {
        return (Vec3::ZERO, 0.0);
    }
    let h = (v + l).normalize();
    let n_dot_h = n.dot(h).max(0.0);
    let v_dot_h = v.dot(h).max(0.0);
    let alpha = surface.alpha();

    let f = schlick_fresnel(surface.f0(), v_dot_h);
    let d = ggx_d(n_dot_h, alpha);
    let vis = smith_visibility(n_dot_v, n_dot_l, alpha);
    let specular = f * (d * vis);

    let t = surface.transmission_probability();
    let diffuse_weight = (1.0 - surface.metallic) * (1.0 - t);
    let diffuse = (Vec3::ONE - f) * surface.base_color * (diffuse_weight * FRAC_1_PI);

    let value = (diffuse + specular) * n_dot_l;
    (value, pdf(surface, n, v, l))
}

/// Pdf of sampling `l` through the non-delta lobes.
pub fn pdf(surface: &SurfaceSample, n: Vec3, v: Vec3, l: Vec3) -> f32 {
    let n_dot_v = n.dot(v);
    let n_dot_l = n.dot(l);
    if n_dot_v <= 0.0 || n_dot_l <= 0.0 {
        return 0.0;
    }
    let h = (v + l).normalize();
    let n_dot_h = n.dot(h).max(0.0);
    let v_dot_h = v.dot(h).max(1e-6);
    let p_spec = surface.specular_probability();
    let spec_pdf = ggx_d(n_dot_h, surface.alpha()) * n_dot_h / (4.0 * v_dot_h);
    let diff_pdf = n_dot_l * FRAC_1_PI;
    let reflect = 1.0 - surface.transmission_probability();
    reflect * (p_spec * spec_pdf + (1.0 - p_spec) * diff_pdf)
}

/// Sample an outgoing direction. `xi` are three uniform variates.
pub fn sample(surface: &SurfaceSample, n: Vec3, v: Vec3, xi: Vec3) -> Option<BsdfSample> {
    if n.dot(v) <= 0.0 {
        return None;
    }

    let t = surface.transmission_probability();
    if xi.z < t {
        // Thin-walled transmission: continue through the surface, tinted
        return Some(BsdfSample {
            direction: -v,
            weight: surface.base_color,
            pdf: t,
            is_delta: true,
        });
    }
    // Reuse xi.z for the lobe choice within the reflective part
    let lobe = (xi.z - t) / (1.0 - t).max(1e-6);

    let (tangent, bitangent) = orthonormal_basis(n);
    let l = if lobe < surface.specular_probability() {
        let h_local = sample_ggx_half(surface.alpha(), xi.x, xi.y);
        let h = tangent * h_local.x + bitangent * h_local.y + n * h_local.z;
        reflect(-v, h)
    } else {
        let d = cosine_hemisphere(xi.x, xi.y);
        tangent * d.x + bitangent * d.y + n * d.z
    };

    let (value, pdf) = eval(surface, n, v, l);
    if pdf <= 0.0 {
        return None;
    }
    Some(BsdfSample {
        direction: l,
        weight: value / pdf,
        pdf,
        is_delta: false,
    })
}

pub fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - n * (2.0 * n.dot(i))
}

/// Duff et al. branchless ONB.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3::new(b, sign + n.y * n.y * a, -n.y),
    )
}

pub fn cosine_hemisphere(u1: f32, u2: f32) -> Vec3 {
    let r = u1.sqrt();
    let phi = 2.0 * PI * u2;
    Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u1).max(0.0).sqrt())
}

/// Sample a GGX half vector in tangent space (z = normal).
pub fn sample_ggx_half(alpha: f32, u1: f32, u2: f32) -> Vec3 {
    let a2 = alpha * alpha;
    let cos_theta = ((1.0 - u1) / (1.0 + (a2 - 1.0) * u1)).max(0.0).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * u2;
    Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambert(color: Vec3) -> SurfaceSample {
        SurfaceSample {
            base_color: color,
            metallic: 0.0,
            roughness: 1.0,
            ior: 1.0,
            transmission: 0.0,
        }
    }

    #[test]
    fn test_below_horizon_is_black() {
        let s = lambert(Vec3::ONE);
        let (f, pdf) = eval(&s, Vec3::Z, Vec3::Z, -Vec3::Z);
        assert_eq!(f, Vec3::ZERO);
        assert_eq!(pdf, 0.0);
    }

    #[test]
    fn test_onb_is_orthonormal() {
        for n in [Vec3::Z, -Vec3::Z, Vec3::new(0.3, -0.5, 0.8).normalize()] {
            let (t, b) = orthonormal_basis(n);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_white_lambert_furnace() {
        // With ior 1 there is no Fresnel; the estimator f*cos/pdf integrates to albedo
        let s = lambert(Vec3::ONE);
        let v = Vec3::new(0.2, 0.1, 1.0).normalize();
        let n = 64;
        let mut sum = Vec3::ZERO;
        let mut count = 0;
        for i in 0..n {
            for j in 0..n {
                let k = (i * n + j) as f32;
                let xi = Vec3::new(
                    (i as f32 + 0.5) / n as f32,
                    (j as f32 + 0.5) / n as f32,
                    (k * 0.618_034).fract(),
                );
                if let Some(bs) = sample(&s, Vec3::Z, v, xi) {
                    sum += bs.weight;
                }
                count += 1;
            }
        }
        let mean = sum / count as f32;
        assert!(mean.x < 1.05, "energy gain: {mean:?}");
        assert!(mean.x > 0.7, "energy loss: {mean:?}");
    }

    #[test]
    fn test_sampled_pdf_matches_pdf_function() {
        let s = SurfaceSample {
            base_color: Vec3::splat(0.8),
            metallic: 0.3,
            roughness: 0.4,
            ior: 1.5,
            transmission: 0.0,
        };
        let v = Vec3::new(0.0, 0.6, 0.8);
        let bs = sample(&s, Vec3::Z, v, Vec3::new(0.3, 0.7, 0.2)).unwrap();
        let p = pdf(&s, Vec3::Z, v, bs.direction);
        assert!((bs.pdf - p).abs() < 1e-4 * p.max(1.0));
    }

    #[test]
    fn test_transmission_is_delta_pass_through() {
        let s = SurfaceSample { transmission: 1.0, ..lambert(Vec3::splat(0.5)) };
        let v = Vec3::Z;
        let bs = sample(&s, Vec3::Z, v, Vec3::new(0.5, 0.5, 0.1)).unwrap();
        assert!(bs.is_delta);
        assert_eq!(bs.direction, -v);
    }
}
