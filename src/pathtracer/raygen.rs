//! Primary ray generation with sub-pixel offsets and thin-lens depth of field.
//!
//! `ray_gen` in `shaders/pathtrace.wgsl` performs the same steps.

use crate::accel::Ray;
use crate::scene::descriptor::Camera;
use crate::util::{sampling, sampling::Rng, Mat4, UVec2, Vec2, Vec3};
use std::f32::consts::PI;

/// Thin-lens parameters. `aperture <= 0` is a pinhole.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lens {
    pub aperture: f32,
    pub focal_distance: f32,
}

/// Sub-pixel offset in [0,1)² for sample `sample` of `samples`.
///
/// Jittered mode uses the frame's Halton offset (shifted from [-0.5,0.5)²)
/// so the reconstruction denoiser sees the same jitter it is told about.
pub fn subpixel_offset(rng: &mut Rng, sample: u32, samples: u32, jitter: Option<Vec2>) -> Vec2 {
    let random = sampling::stratified(rng, sample, samples);
    match jitter {
        Some(j) => j + Vec2::splat(0.5),
        None => random,
    }
}

/// Pinhole ray through `pixel + offset`.
pub fn pinhole_ray(inv_view: &Mat4, inv_proj: &Mat4, pixel: UVec2, offset: Vec2, viewport: UVec2) -> Ray {
    let uv = (pixel.as_vec2() + offset) / viewport.as_vec2();
    let d = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let target = inv_proj.project_point3(d.extend(1.0));
    let origin = inv_view.transform_point3(Vec3::ZERO);
    let direction = inv_view.transform_vector3(target.normalize_or(-Vec3::Z)).normalize_or(-Vec3::Z);
    Ray::new(origin, direction)
}

/// Primary ray with optional depth of field.
///
/// Lens variates are drawn even for a pinhole so the random stream of
/// the rest of the path does not depend on the aperture.
pub fn primary_ray(
    inv_view: &Mat4,
    inv_proj: &Mat4,
    pixel: UVec2,
    offset: Vec2,
    viewport: UVec2,
    lens: Lens,
    rng: &mut Rng,
) -> Ray {
    let ray = pinhole_ray(inv_view, inv_proj, pixel, offset, viewport);
    let r1 = rng.next_f32() * 2.0 * PI;
    let r2 = rng.next_f32();
    if lens.aperture <= 0.0 {
        return ray;
    }
    let right = inv_view.x_axis.truncate().normalize_or(Vec3::X);
    let up = inv_view.y_axis.truncate().normalize_or(Vec3::Y);
    let focal_point = ray.direction * lens.focal_distance;
    let lens_offset = (right * r1.cos() + up * r1.sin()) * (r2 * lens.aperture).sqrt();
    Ray::new(ray.origin + lens_offset, (focal_point - lens_offset).normalize_or(ray.direction))
}

/// Convenience for callers holding a [`Camera`].
pub fn camera_matrices(camera: &Camera) -> (Mat4, Mat4) {
    (camera.view.inverse(), camera.proj.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrices() -> (Mat4, Mat4) {
        let cam = Camera::look_at(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO, Vec3::Y, 0.8, 1.0);
        camera_matrices(&cam)
    }

    #[test]
    fn test_zero_aperture_is_pinhole() {
        let (iv, ip) = matrices();
        let viewport = UVec2::new(16, 16);
        for seed in 0..32 {
            let mut rng = Rng::new(seed);
            let pixel = UVec2::new(seed % 16, (seed * 7) % 16);
            let offset = Vec2::splat(0.25);
            let lens = Lens {
                aperture: 0.0,
                focal_distance: 3.0,
            };
            let a = primary_ray(&iv, &ip, pixel, offset, viewport, lens, &mut rng);
            let b = pinhole_ray(&iv, &ip, pixel, offset, viewport);
            assert_eq!(a.origin, b.origin);
            assert_eq!(a.direction, b.direction);
            // two lens variates consumed either way
            let mut expected = Rng::new(seed);
            expected.next_f32();
            expected.next_f32();
            assert_eq!(rng, expected);
        }
    }

    #[test]
    fn test_lens_rays_converge_on_focal_plane() {
        let (iv, ip) = matrices();
        let viewport = UVec2::new(8, 8);
        let lens = Lens {
            aperture: 0.5,
            focal_distance: 2.0,
        };
        let pin = pinhole_ray(&iv, &ip, UVec2::new(3, 4), Vec2::splat(0.5), viewport);
        let focus = pin.at(2.0);
        let mut rng = Rng::new(11);
        for _ in 0..16 {
            let r = primary_ray(&iv, &ip, UVec2::new(3, 4), Vec2::splat(0.5), viewport, lens, &mut rng);
            // the lens ray passes through the in-focus point
            let t = (focus - r.origin).dot(r.direction);
            assert!((r.at(t) - focus).length() < 1e-4);
            assert!((r.origin - pin.origin).length() <= 0.5f32.sqrt() + 1e-5);
        }
    }

    #[test]
    fn test_jitter_replaces_random_offset() {
        let mut rng = Rng::new(2);
        let o = subpixel_offset(&mut rng, 0, 1, Some(Vec2::new(-0.25, 0.25)));
        assert_eq!(o, Vec2::new(0.25, 0.75));
        let r = subpixel_offset(&mut rng, 1, 4, None);
        assert!(r.x >= 0.0 && r.x < 1.0);
    }
}
