//! Random numbers, low-discrepancy sequences and sample warps.
//!
//! The PRNG and the seeding scheme match `shaders/common.wgsl`, so a CPU
//! reference render reproduces the GPU random stream for the same
//! pixel, frame and sample index.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

/// PCG hash (O'Neill), one round.
#[inline]
pub fn pcg(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Per-pixel seed keyed on pixel, frame and sample index.
#[inline]
pub fn seed(x: u32, y: u32, frame: u32, sample: u32) -> u32 {
    pcg(x ^ pcg(y ^ pcg(frame ^ pcg(sample))))
}

/// Seed-advancing PRNG. Every draw advances the caller's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rng {
    pub state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn for_pixel(x: u32, y: u32, frame: u32, sample: u32) -> Self {
        Self::new(seed(x, y, frame, sample))
    }

    /// Uniform in [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        self.state = pcg(self.state);
        (self.state >> 8) as f32 / 16_777_216.0
    }

    #[inline]
    pub fn next_vec2(&mut self) -> Vec2 {
        let x = self.next_f32();
        Vec2::new(x, self.next_f32())
    }

    #[inline]
    pub fn next_vec3(&mut self) -> Vec3 {
        let x = self.next_f32();
        let y = self.next_f32();
        Vec3::new(x, y, self.next_f32())
    }
}

/// Radical inverse in the given prime base.
pub fn radical_inverse(mut index: u32, base: u32) -> f32 {
    let inv_base = 1.0 / base as f32;
    let mut inv = inv_base;
    let mut result = 0.0f32;
    while index > 0 {
        result += (index % base) as f32 * inv;
        index /= base;
        inv *= inv_base;
    }
    result
}

/// Halton(2,3) sub-pixel jitter in [-0.5, 0.5)^2. Index 0 is skipped
/// because it maps to the pixel corner.
pub fn halton_jitter(frame: u32, period: u32) -> Vec2 {
    let i = frame % period.max(1) + 1;
    Vec2::new(radical_inverse(i, 2), radical_inverse(i, 3)) - Vec2::splat(0.5)
}

/// Stratified 2D variate for sample `s` of `n` within a pixel.
pub fn stratified(rng: &mut Rng, s: u32, n: u32) -> Vec2 {
    let n = n.max(1);
    let cols = (n as f32).sqrt().ceil() as u32;
    let rows = n.div_ceil(cols);
    let cell = Vec2::new((s % cols) as f32, ((s / cols) % rows) as f32);
    (cell + rng.next_vec2()) / Vec2::new(cols as f32, rows as f32)
}

/// Uniform point on the unit disk (polar mapping).
pub fn sample_disk(u: Vec2) -> Vec2 {
    let r = u.x.sqrt();
    let phi = 2.0 * PI * u.y;
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// Uniform direction on the unit sphere.
pub fn uniform_sphere(u: Vec2) -> Vec3 {
    let z = 1.0 - 2.0 * u.x;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u.y;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Balance heuristic weight of the first technique.
#[inline]
pub fn balance_heuristic(pdf_a: f32, pdf_b: f32) -> f32 {
    let sum = pdf_a + pdf_b;
    if sum > 0.0 {
        pdf_a / sum
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_is_deterministic_and_in_range() {
        let mut a = Rng::for_pixel(3, 7, 11, 0);
        let mut b = Rng::for_pixel(3, 7, 11, 0);
        for _ in 0..1000 {
            let x = a.next_f32();
            assert_eq!(x, b.next_f32());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_seeds_differ_across_frames() {
        assert_ne!(seed(1, 1, 0, 0), seed(1, 1, 1, 0));
        assert_ne!(seed(1, 1, 0, 0), seed(1, 1, 0, 1));
    }

    #[test]
    fn test_halton_jitter_is_centered() {
        let n = 64;
        let mut sum = Vec2::ZERO;
        for f in 0..n {
            let j = halton_jitter(f, n);
            assert!(j.x >= -0.5 && j.x < 0.5 && j.y >= -0.5 && j.y < 0.5);
            sum += j;
        }
        assert!((sum / n as f32).length() < 0.05);
    }

    #[test]
    fn test_radical_inverse_base2() {
        assert_eq!(radical_inverse(1, 2), 0.5);
        assert_eq!(radical_inverse(2, 2), 0.25);
        assert_eq!(radical_inverse(3, 2), 0.75);
    }

    #[test]
    fn test_disk_samples_inside_unit_disk() {
        let mut rng = Rng::new(42);
        for _ in 0..500 {
            assert!(sample_disk(rng.next_vec2()).length() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_stratified_covers_cells() {
        let mut rng = Rng::new(1);
        let n = 4;
        let pts: Vec<Vec2> = (0..n).map(|s| stratified(&mut rng, s, n)).collect();
        // one sample per quadrant
        for (qx, qy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert!(pts.iter().any(|p| (p.x >= 0.5) as i32 == qx && (p.y >= 0.5) as i32 == qy));
        }
    }
}
