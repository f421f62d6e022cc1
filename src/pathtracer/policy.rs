//! Sampling policies shared by the CPU reference and `shaders/pathtrace.wgsl`:
//! stochastic alpha acceptance, shadow transmission, firefly clamp,
//! MIS weights and Russian roulette.

use gltf_pbr::MaterialParams;

use crate::util::{luminance, sampling, sampling::Rng, Vec3};

/// Default transmission below which a shadow ray counts as blocked.
pub const SHADOW_T_MIN: f32 = 0.01;

/// Stochastic any-hit acceptance: commit with probability `opacity`.
///
/// Always advances the caller's seed so the random stream does not
/// depend on the opacity value.
#[inline]
pub fn accept_candidate(opacity: f32, rng: &mut Rng) -> bool {
    rng.next_f32() < opacity
}

/// Transmission accumulated by a shadow ray across candidate hits.
#[derive(Clone, Copy, Debug)]
pub struct ShadowTransmission {
    pub transmission: Vec3,
    t_min: f32,
    /// Inside a volume (toggled at every transmissive surface)
    inside: bool,
    /// Ray distance where the current volume segment started
    entry_t: f32,
}

impl ShadowTransmission {
    pub fn new(t_min: f32) -> Self {
        Self {
            transmission: Vec3::ONE,
            t_min,
            inside: false,
            entry_t: 0.0,
        }
    }

    /// Account for one candidate surface at ray distance `t`.
    ///
    /// `base_color` and `opacity` are the material values at the hit.
    /// Returns `false` once the ray counts as occluded.
    pub fn on_candidate(&mut self, params: &MaterialParams, base_color: Vec3, opacity: f32, t: f32, rng: &mut Rng) -> bool {
        if !accept_candidate(opacity, rng) {
            return true;
        }
        if !params.is_transmissive() {
            self.transmission = Vec3::ZERO;
            return false;
        }
        let mut t_hit = base_color * (params.transmission() * (1.0 - params.metallic()));
        if params.has_volume() {
            if self.inside {
                t_hit *= (-params.extinction() * (t - self.entry_t).max(0.0)).exp();
            } else {
                self.entry_t = t;
            }
            self.inside = !self.inside;
        }
        self.transmission *= t_hit;
        if self.transmission.max_element() <= self.t_min {
            self.transmission = Vec3::ZERO;
            return false;
        }
        true
    }

    pub fn is_blocked(&self) -> bool {
        self.transmission.max_element() <= self.t_min
    }
}

/// Clamp a sample's luminance to `max_luminance`; non-finite samples are dropped.
#[inline]
pub fn clamp_firefly(c: Vec3, max_luminance: f32) -> Vec3 {
    if !c.is_finite() {
        return Vec3::ZERO;
    }
    let lum = luminance(c);
    if max_luminance > 0.0 && lum > max_luminance {
        c * (max_luminance / lum)
    } else {
        c
    }
}

/// MIS weight of a light sample (delta lights are never hit by BSDF sampling).
#[inline]
pub fn light_mis_weight(is_delta: bool, light_pdf: f32, bsdf_pdf: f32) -> f32 {
    if is_delta {
        1.0
    } else {
        sampling::balance_heuristic(light_pdf, bsdf_pdf)
    }
}

/// MIS weight of an environment hit reached by BSDF sampling.
#[inline]
pub fn bsdf_mis_weight(bsdf_is_delta: bool, bsdf_pdf: f32, light_pdf: f32) -> f32 {
    if bsdf_is_delta {
        1.0
    } else {
        sampling::balance_heuristic(bsdf_pdf, light_pdf)
    }
}

/// Russian roulette on throughput. Returns the continuation probability,
/// or `None` if the path terminates. Paths shorter than `min_depth` always survive.
#[inline]
pub fn russian_roulette(throughput: Vec3, depth: u32, min_depth: u32, rng: &mut Rng) -> Option<f32> {
    if depth < min_depth {
        return Some(1.0);
    }
    let p = (throughput.max_element() + 0.001).min(0.95);
    if rng.next_f32() >= p {
        None
    } else {
        Some(p)
    }
}
