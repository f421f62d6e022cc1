//! CPU traversal of the two-level structure.
//!
//! Mirrors `trace_closest` in `shaders/scene.wgsl`: instances flagged
//! opaque commit their candidates directly, every other candidate is
//! offered to an acceptance callback (the any-hit policy).

use smallvec::SmallVec;

use super::bvh::{ray_aabb, ray_triangle, BvhNode, Ray};
use super::{triangle_positions, AccelCache, Instance, INSTANCE_FLAG_DOUBLE_SIDED, INSTANCE_FLAG_OPAQUE};
use crate::scene::Scene;
use crate::util::Vec3;

/// Ray flags for one traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceFlags {
    /// Skip triangles whose back face points at the ray (unless double-sided)
    pub cull_back_faces: bool,
    /// Treat every instance as opaque (picking)
    pub force_opaque: bool,
    /// Stop at the first committed candidate (shadow rays)
    pub terminate_on_first_hit: bool,
}

impl TraceFlags {
    pub const CLOSEST: Self = Self {
        cull_back_faces: true,
        force_opaque: false,
        terminate_on_first_hit: false,
    };
    /// Shadow rays see both faces so volumes are entered and left
    pub const SHADOW: Self = Self {
        cull_back_faces: false,
        force_opaque: false,
        terminate_on_first_hit: true,
    };
    pub const PICK: Self = Self {
        cull_back_faces: false,
        force_opaque: true,
        terminate_on_first_hit: false,
    };
}

/// Intersection candidate (and, once committed, the hit).
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub render_node: u32,
    pub primitive: u32,
    /// Triangle index within the primitive (source order)
    pub triangle: u32,
    pub t: f32,
    /// Barycentric weights of (v0, v1, v2)
    pub barycentrics: Vec3,
    pub front_face: bool,
    /// Instance is flagged opaque; acceptance is implicit
    pub opaque: bool,
}

type Stack = SmallVec<[u32; 64]>;

impl AccelCache {
    /// Closest-hit traversal with a per-candidate acceptance callback.
    ///
    /// `accept` is invoked for candidates of non-opaque instances in
    /// traversal order (not sorted by distance); returning `false`
    /// ignores the candidate. Returns `None` when nothing was committed
    /// or when no TLAS exists.
    pub fn trace(
        &self,
        scene: &Scene,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        flags: TraceFlags,
        accept: &mut dyn FnMut(&Candidate) -> bool,
    ) -> Option<Candidate> {
        let tlas = self.tlas()?;
        let mut closest: Option<Candidate> = None;
        let mut t_far = t_max;
        let mut stack: Stack = SmallVec::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = tlas.bvh.nodes[idx as usize];
            if ray_aabb(ray, &node.aabb(), t_min, t_far).is_none() {
                continue;
            }
            if node.is_leaf() {
                for k in 0..node.count {
                    let inst = &tlas.instances[tlas.bvh.item_indices[(node.left_or_first + k) as usize] as usize];
                    if let Some(hit) = self.trace_instance(scene, inst, ray, t_min, t_far, flags, accept) {
                        t_far = hit.t;
                        closest = Some(hit);
                        if flags.terminate_on_first_hit {
                            return closest;
                        }
                    }
                }
            } else {
                push_children(&mut stack, &tlas.bvh.nodes, node.left_or_first, ray, t_min, t_far);
            }
        }
        closest
    }

    /// Any committed hit within `[t_min, t_max]`.
    pub fn occluded(
        &self,
        scene: &Scene,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        accept: &mut dyn FnMut(&Candidate) -> bool,
    ) -> bool {
        self.trace(scene, ray, t_min, t_max, TraceFlags::SHADOW, accept).is_some()
    }

    #[allow(clippy::too_many_arguments)]
    fn trace_instance(
        &self,
        scene: &Scene,
        inst: &Instance,
        world_ray: &Ray,
        t_min: f32,
        t_max: f32,
        flags: TraceFlags,
        accept: &mut dyn FnMut(&Candidate) -> bool,
    ) -> Option<Candidate> {
        let blas = self.blas().get(inst.custom_index as usize)?;
        let prim = scene.primitives.get(inst.custom_index as usize)?;
        // Unnormalized object-space direction keeps t comparable with world space
        let ray = Ray::new(
            inst.world_to_object.transform_point3(world_ray.origin),
            inst.world_to_object.transform_vector3(world_ray.direction),
        );
        let opaque = flags.force_opaque || inst.flags & INSTANCE_FLAG_OPAQUE != 0;
        let cull = flags.cull_back_faces && inst.flags & INSTANCE_FLAG_DOUBLE_SIDED == 0;

        let mut best: Option<Candidate> = None;
        let mut t_far = t_max;
        let mut stack: Stack = SmallVec::new();
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = blas.bvh.nodes[idx as usize];
            if ray_aabb(&ray, &node.aabb(), t_min, t_far).is_none() {
                continue;
            }
            if !node.is_leaf() {
                push_children(&mut stack, &blas.bvh.nodes, node.left_or_first, &ray, t_min, t_far);
                continue;
            }
            for k in 0..node.count {
                let tri = blas.bvh.item_indices[(node.left_or_first + k) as usize];
                let base = tri as usize * 3;
                let [a, b, c] = triangle_positions(prim, &prim.indices[base..base + 3]);
                let Some(h) = ray_triangle(&ray, a, b, c, t_min, t_far) else {
                    continue;
                };
                // Facing is decided in object space, so mirrored instances keep outward faces
                let front_face = h.front_face;
                if cull && !front_face {
                    continue;
                }
                let candidate = Candidate {
                    render_node: inst.render_node,
                    primitive: inst.custom_index,
                    triangle: tri,
                    t: h.t,
                    barycentrics: Vec3::new(1.0 - h.u - h.v, h.u, h.v),
                    front_face,
                    opaque,
                };
                if opaque || accept(&candidate) {
                    t_far = h.t;
                    best = Some(candidate);
                    if flags.terminate_on_first_hit {
                        return best;
                    }
                }
            }
        }
        best
    }
}

/// Push both children, nearer one last so it is popped first.
#[inline]
fn push_children(stack: &mut Stack, nodes: &[BvhNode], left: u32, ray: &Ray, t_min: f32, t_far: f32) {
    let l = ray_aabb(ray, &nodes[left as usize].aabb(), t_min, t_far);
    let r = ray_aabb(ray, &nodes[left as usize + 1].aabb(), t_min, t_far);
    match (l, r) {
        (Some(tl), Some(tr)) => {
            if tl <= tr {
                stack.push(left + 1);
                stack.push(left);
            } else {
                stack.push(left);
                stack.push(left + 1);
            }
        }
        (Some(_), None) => stack.push(left),
        (None, Some(_)) => stack.push(left + 1),
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::cube_scene;
    use crate::util::Mat4;
    use gltf_pbr::{AlphaMode, MaterialParams};

    fn cache_for(scene: &Scene) -> AccelCache {
        let mut cache = AccelCache::new();
        cache.update(scene, 1);
        cache
    }

    #[test]
    fn test_closest_hit_picks_nearest_instance() {
        let t = [Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)), Mat4::IDENTITY];
        let scene = cube_scene(MaterialParams::default(), &t);
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        let hit = cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |_| true)
            .unwrap();
        assert_eq!(hit.render_node, 1);
        assert!((hit.t - 4.5).abs() < 1e-4);
        assert!(hit.front_face);
        assert!((hit.barycentrics.element_sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_back_faces_are_culled_from_inside() {
        let scene = cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |_| true)
            .is_none());
        // Picking does not cull
        let hit = cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::PICK, &mut |_| true)
            .unwrap();
        assert!(!hit.front_face);
    }

    #[test]
    fn test_opaque_instances_skip_acceptance() {
        let scene = cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        let mut calls = 0;
        let hit = cache.trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |_| {
            calls += 1;
            false
        });
        assert!(hit.is_some());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_rejected_candidates_let_the_ray_through() {
        let t = [Mat4::IDENTITY, Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0))];
        let mut scene = cube_scene(
            MaterialParams::default().with_alpha_mode(AlphaMode::Blend).with_alpha(0.5),
            &t,
        );
        scene.bump_version();
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        // Reject everything belonging to node 0
        let hit = cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |c| c.render_node != 0)
            .unwrap();
        assert_eq!(hit.render_node, 1);
    }

    #[test]
    fn test_missing_tlas_misses() {
        let scene = Scene::default();
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |_| true)
            .is_none());
    }

    #[test]
    fn test_mirrored_instance_keeps_outward_faces() {
        let scene = cube_scene(MaterialParams::default(), &[Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))]);
        let cache = cache_for(&scene);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        let hit = cache
            .trace(&scene, &ray, 0.0, f32::INFINITY, TraceFlags::CLOSEST, &mut |_| true)
            .unwrap();
        assert!(hit.front_face);
    }
}
