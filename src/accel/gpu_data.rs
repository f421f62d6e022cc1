//! Serialize the two-level BVH into GPU storage buffers.
//!
//! All BLAS node arrays and the TLAS node array are concatenated into
//! one node buffer with child indices rebased. Triangle indices are
//! written per primitive in BLAS leaf order so a leaf range addresses
//! them directly; the TLAS leaf order (render-node indices) follows.

use super::bvh::BvhNode;
use super::AccelCache;
use crate::scene::Scene;

/// Root index meaning "no tree" (empty primitive or no visible instance).
pub const NO_NODE: u32 = u32::MAX;

/// Flattened acceleration data ready for upload.
#[derive(Default)]
pub struct AccelGpuData {
    pub nodes: Vec<BvhNode>,
    /// Root node of each primitive's BLAS
    pub blas_roots: Vec<u32>,
    pub tlas_root: u32,
    /// Triangle indices per primitive (BLAS order), then TLAS leaf order
    pub index_pool: Vec<u32>,
    /// Offset of each primitive's first index in `index_pool`
    pub index_offsets: Vec<u32>,
    /// Offset of the TLAS leaf order in `index_pool`
    pub tlas_order_offset: u32,
}

impl AccelGpuData {
    /// Build GPU-ready buffers from the cache's current structures.
    #[tracing::instrument(skip_all)]
    pub fn build(cache: &AccelCache, scene: &Scene) -> Self {
        let mut data = Self {
            tlas_root: NO_NODE,
            ..Default::default()
        };

        for (prim, blas) in scene.primitives.iter().zip(cache.blas()) {
            data.index_offsets.push(data.index_pool.len() as u32);
            for &tri in &blas.bvh.item_indices {
                let base = tri as usize * 3;
                data.index_pool.extend_from_slice(&prim.indices[base..base + 3]);
            }
            if blas.bvh.is_empty() {
                data.blas_roots.push(NO_NODE);
                continue;
            }
            data.blas_roots.push(append_rebased(&mut data.nodes, &blas.bvh.nodes));
        }

        data.tlas_order_offset = data.index_pool.len() as u32;
        if let Some(tlas) = cache.tlas() {
            data.tlas_root = append_rebased(&mut data.nodes, &tlas.bvh.nodes);
            data.index_pool
                .extend(tlas.bvh.item_indices.iter().map(|&i| tlas.instances[i as usize].render_node));
        }

        log::debug!(
            "accel gpu data: {} nodes, {} pool entries",
            data.nodes.len(),
            data.index_pool.len()
        );
        data
    }

    /// BVH nodes as bytes (never empty: wgpu rejects zero-sized bindings).
    pub fn nodes_bytes(&self) -> Vec<u8> {
        if self.nodes.is_empty() {
            vec![0u8; std::mem::size_of::<BvhNode>()]
        } else {
            bytemuck::cast_slice(&self.nodes).to_vec()
        }
    }

    pub fn index_pool_bytes(&self) -> Vec<u8> {
        if self.index_pool.is_empty() {
            vec![0u8; 4]
        } else {
            bytemuck::cast_slice(&self.index_pool).to_vec()
        }
    }
}

/// Append a tree, rebasing internal child links. Returns the root index.
fn append_rebased(out: &mut Vec<BvhNode>, nodes: &[BvhNode]) -> u32 {
    let base = out.len() as u32;
    out.extend(nodes.iter().map(|n| {
        let mut n = *n;
        if !n.is_leaf() {
            n.left_or_first += base;
        }
        n
    }));
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::cube_scene;
    use crate::util::{Mat4, Vec3};
    use gltf_pbr::MaterialParams;

    #[test]
    fn test_flattened_tree_addresses_all_triangles() {
        let t = [Mat4::IDENTITY, Mat4::from_translation(Vec3::X * 3.0)];
        let scene = cube_scene(MaterialParams::default(), &t);
        let mut cache = AccelCache::new();
        cache.update(&scene, 1);
        let data = AccelGpuData::build(&cache, &scene);

        assert_eq!(data.blas_roots, vec![0]);
        assert_ne!(data.tlas_root, NO_NODE);
        // 12 triangles of the cube, then two instances
        assert_eq!(data.tlas_order_offset, 36);
        let mut order = data.index_pool[36..].to_vec();
        order.sort();
        assert_eq!(order, vec![0, 1]);

        // Reordered triangles are a permutation of the source triangles
        let mut src: Vec<[u32; 3]> = scene.primitives[0].indices.chunks(3).map(|c| [c[0], c[1], c[2]]).collect();
        let mut dst: Vec<[u32; 3]> = data.index_pool[..36].chunks(3).map(|c| [c[0], c[1], c[2]]).collect();
        src.sort();
        dst.sort();
        assert_eq!(src, dst);

        // TLAS children point inside the TLAS range
        let tlas_root = data.tlas_root as usize;
        for node in &data.nodes[tlas_root..] {
            if !node.is_leaf() {
                assert!(node.left_or_first as usize > tlas_root);
            }
        }
    }

    #[test]
    fn test_empty_scene_has_no_roots() {
        let data = AccelGpuData::build(&AccelCache::new(), &Scene::default());
        assert_eq!(data.tlas_root, NO_NODE);
        assert_eq!(data.nodes_bytes().len(), 32);
    }
}
