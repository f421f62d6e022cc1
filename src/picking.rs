//! Selection picking through the acceleration structure.
//!
//! A single opaque closest-hit ray through the pixel centre; every
//! instance counts as opaque and both faces are hit.

use crate::accel::{AccelCache, Ray, TraceFlags};
use crate::scene::descriptor::Camera;
use crate::scene::Scene;
use crate::util::{Vec2, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PickHit {
    pub node_id: u32,
    pub hit_point: Vec3,
    pub distance: f32,
}

/// Pick the render node under pixel `(x, y)` (top-left origin).
/// `None` on a miss, outside the viewport or without a TLAS.
pub fn pick(
    scene: &Scene,
    accel: &AccelCache,
    camera: &Camera,
    viewport: (u32, u32),
    x: u32,
    y: u32,
) -> Option<PickHit> {
    if x >= viewport.0 || y >= viewport.1 {
        return None;
    }
    let uv = Vec2::new(
        (x as f32 + 0.5) / viewport.0 as f32,
        (y as f32 + 0.5) / viewport.1 as f32,
    );
    let (origin, direction) = camera.primary_ray(uv);
    let ray = Ray::new(origin, direction);
    let hit = accel.trace(scene, &ray, camera.near, f32::INFINITY, TraceFlags::PICK, &mut |_| true)?;
    Some(PickHit {
        node_id: hit.render_node,
        hit_point: ray.at(hit.t),
        distance: hit.t,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::cube_scene;
    use gltf_pbr::MaterialParams;
    use glam::Mat4;

    fn two_cubes() -> (Scene, AccelCache, Camera) {
        let scene = cube_scene(
            MaterialParams::default(),
            &[
                Mat4::from_translation(Vec3::new(-1.5, 0.0, 0.0)),
                Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0)),
            ],
        );
        let mut accel = AccelCache::new();
        accel.update(&scene, 1);
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO, Vec3::Y, 45f32.to_radians(), 1.0);
        (scene, accel, camera)
    }

    #[test]
    fn test_pick_returns_node_under_pixel() {
        let (scene, accel, camera) = two_cubes();
        let viewport = (200, 200);
        for (node, centre) in [(0u32, Vec3::new(-1.5, 0.0, 0.0)), (1, Vec3::new(1.5, 0.0, 0.0))] {
            let px = camera.project(centre, viewport).unwrap();
            let hit = pick(&scene, &accel, &camera, viewport, px.x as u32, px.y as u32).unwrap();
            assert_eq!(hit.node_id, node);
            assert!(hit.distance > 0.0);
            let bounds = scene.render_node_bounds(node as usize).unwrap();
            assert!(bounds.contains(hit.hit_point, 1e-3));
        }
    }

    #[test]
    fn test_pick_in_empty_sky_misses() {
        let (scene, accel, camera) = two_cubes();
        assert!(pick(&scene, &accel, &camera, (200, 200), 100, 5).is_none());
        assert!(pick(&scene, &accel, &camera, (200, 200), 300, 5).is_none());
    }

    #[test]
    fn test_pick_without_tlas_misses() {
        let (scene, _, camera) = two_cubes();
        let empty = AccelCache::new();
        assert!(pick(&scene, &empty, &camera, (200, 200), 100, 100).is_none());
    }
}
