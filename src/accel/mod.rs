//! Two-level acceleration structures for ray traversal.
//!
//! ## Architecture
//! ```text
//! RenderPrimitive triangles → BLAS (one per primitive, SAH)
//! visible RenderNodes       → TLAS instances (custom index = primitive) → TLAS (SAH)
//! ```
//!
//! The cache rebuilds bottom-level trees when the scene generation
//! changes (new geometry) and the top-level tree when the scene version
//! changes (visibility, materials). Both are consumed by the CPU
//! traversal in [`traverse`] and flattened for the GPU by [`gpu_data`].

pub mod build;
pub mod bvh;
pub mod gpu_data;
pub mod traverse;

use rayon::prelude::*;

pub use build::{build_bvh, Bvh};
pub use bvh::{Aabb, BvhNode, Ray};
pub use gpu_data::AccelGpuData;
pub use traverse::{Candidate, TraceFlags};

use crate::scene::{RenderPrimitive, Scene};
use crate::util::{Mat4, Vec3};

/// Traversal may commit this instance's candidates without an opacity test.
pub const INSTANCE_FLAG_OPAQUE: u32 = 1;
/// Back faces of this instance are never culled.
pub const INSTANCE_FLAG_DOUBLE_SIDED: u32 = 2;
/// The instance transform mirrors geometry (negative determinant).
pub const INSTANCE_FLAG_MIRRORED: u32 = 4;

/// Bottom-level structure over the triangles of one render primitive.
pub struct Blas {
    pub bvh: Bvh,
}

impl Blas {
    pub fn build(prim: &RenderPrimitive) -> Self {
        let aabbs: Vec<Aabb> = prim
            .indices
            .chunks_exact(3)
            .map(|tri| {
                let [a, b, c] = triangle_positions(prim, tri);
                Aabb::of_triangle(a, b, c)
            })
            .collect();
        Self {
            bvh: build_bvh(&aabbs, build::BLAS_LEAF_SIZE),
        }
    }
}

/// Object-space vertex positions of one triangle.
#[inline]
pub(crate) fn triangle_positions(prim: &RenderPrimitive, tri: &[u32]) -> [Vec3; 3] {
    [
        Vec3::from(prim.vertices[tri[0] as usize].position),
        Vec3::from(prim.vertices[tri[1] as usize].position),
        Vec3::from(prim.vertices[tri[2] as usize].position),
    ]
}

/// TLAS instance: one visible render node.
#[derive(Debug, Clone, Copy)]
pub struct Instance {
    pub render_node: u32,
    /// Render-primitive index (selects the BLAS)
    pub custom_index: u32,
    pub flags: u32,
    pub object_to_world: Mat4,
    pub world_to_object: Mat4,
}

/// Top-level structure over render-node instances.
pub struct Tlas {
    pub bvh: Bvh,
    pub instances: Vec<Instance>,
}

impl Tlas {
    /// Build over visible render nodes. Returns `None` when nothing is visible.
    #[tracing::instrument(skip_all, fields(render_nodes = scene.render_nodes.len()))]
    pub fn build(scene: &Scene, blas: &[Blas]) -> Option<Self> {
        let mut instances = Vec::new();
        let mut aabbs = Vec::new();
        for (i, rn) in scene.render_nodes.iter().enumerate() {
            if !rn.visible {
                continue;
            }
            let Some(b) = blas.get(rn.primitive) else { continue };
            if b.bvh.is_empty() {
                continue;
            }
            let material = scene.materials.get(rn.material).map(|m| m.params).unwrap_or_default();
            let mut flags = 0;
            if material.is_opaque() {
                flags |= INSTANCE_FLAG_OPAQUE;
            }
            if material.double_sided() {
                flags |= INSTANCE_FLAG_DOUBLE_SIDED;
            }
            if rn.transform.determinant() < 0.0 {
                flags |= INSTANCE_FLAG_MIRRORED;
            }
            let local = crate::util::BBox3f::new(Vec3::from(b.bvh.bounds().min), Vec3::from(b.bvh.bounds().max));
            aabbs.push(Aabb::from(local.transformed(&rn.transform)));
            instances.push(Instance {
                render_node: i as u32,
                custom_index: rn.primitive as u32,
                flags,
                object_to_world: rn.transform,
                world_to_object: rn.transform.inverse(),
            });
        }
        if instances.is_empty() {
            return None;
        }
        Some(Self {
            bvh: build_bvh(&aabbs, build::TLAS_LEAF_SIZE),
            instances,
        })
    }
}

/// Acceleration structures keyed by scene generation and version.
#[derive(Default)]
pub struct AccelCache {
    blas: Vec<Blas>,
    tlas: Option<Tlas>,
    blas_key: Option<u64>,
    tlas_key: Option<(u64, u64)>,
}

impl AccelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the structures up to date. Returns true if anything was rebuilt.
    ///
    /// `generation` identifies the geometry (bumped when a new scene is
    /// installed); `scene.version` covers visibility and material changes.
    pub fn update(&mut self, scene: &Scene, generation: u64) -> bool {
        let mut rebuilt = false;
        if self.blas_key != Some(generation) || self.blas.len() != scene.primitives.len() {
            let _span = tracing::info_span!("blas_build", primitives = scene.primitives.len()).entered();
            self.blas = scene.primitives.par_iter().map(Blas::build).collect();
            self.blas_key = Some(generation);
            self.tlas_key = None;
            rebuilt = true;
        }
        let key = (generation, scene.version);
        if self.tlas_key != Some(key) {
            self.tlas = Tlas::build(scene, &self.blas);
            self.tlas_key = Some(key);
            rebuilt = true;
            log::debug!(
                "TLAS rebuilt: {} instances",
                self.tlas.as_ref().map_or(0, |t| t.instances.len())
            );
        }
        rebuilt
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Key of the current TLAS (generation, scene version).
    pub fn key(&self) -> Option<(u64, u64)> {
        self.tlas_key
    }

    pub fn tlas(&self) -> Option<&Tlas> {
        self.tlas.as_ref()
    }

    pub fn blas(&self) -> &[Blas] {
        &self.blas
    }

    /// True when a TLAS with at least one instance exists.
    pub fn is_ready(&self) -> bool {
        self.tlas.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::cube_scene;
    use gltf_pbr::{AlphaMode, MaterialParams};

    #[test]
    fn test_cache_rebuilds_on_version_change_only() {
        let mut scene = cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        let mut cache = AccelCache::new();
        assert!(cache.update(&scene, 1));
        assert!(!cache.update(&scene, 1));
        scene.bump_version();
        assert!(cache.update(&scene, 1));
        assert!(cache.is_ready());
    }

    #[test]
    fn test_hidden_nodes_leave_no_tlas() {
        let mut scene = cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        scene.set_visible(0, false);
        let mut cache = AccelCache::new();
        cache.update(&scene, 1);
        assert!(!cache.is_ready());
    }

    #[test]
    fn test_instance_flags_follow_material() {
        let t = [Mat4::IDENTITY, Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))];
        let scene = cube_scene(
            MaterialParams::default()
                .with_alpha_mode(AlphaMode::Blend)
                .with_double_sided(true),
            &t,
        );
        let mut cache = AccelCache::new();
        cache.update(&scene, 1);
        let tlas = cache.tlas().unwrap();
        assert_eq!(tlas.instances.len(), 2);
        for inst in &tlas.instances {
            assert_eq!(inst.flags & INSTANCE_FLAG_OPAQUE, 0);
            assert_ne!(inst.flags & INSTANCE_FLAG_DOUBLE_SIDED, 0);
            assert_eq!(inst.custom_index, 0);
        }
        assert_ne!(tlas.instances[1].flags & INSTANCE_FLAG_MIRRORED, 0);
    }
}
