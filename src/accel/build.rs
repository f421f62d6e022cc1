//! SAH-based BVH builder.
//!
//! Constructs a flat BVH array over a list of item bounds. The same
//! builder produces bottom-level trees (items = triangles) and the
//! top-level tree (items = render-node instances).

use super::bvh::{Aabb, BvhNode};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection (typical GPU values).
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum triangles per bottom-level leaf before forcing a split.
pub const BLAS_LEAF_SIZE: usize = 4;

/// Instances per top-level leaf; instance transforms make TLAS leaves expensive.
pub const TLAS_LEAF_SIZE: usize = 2;

/// Built BVH result.
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered item indices (leaves reference into this).
    pub item_indices: Vec<u32>,
}

impl Bvh {
    pub fn is_empty(&self) -> bool {
        self.item_indices.is_empty()
    }

    /// Root bounds (empty for an empty tree).
    pub fn bounds(&self) -> Aabb {
        if self.is_empty() {
            Aabb::EMPTY
        } else {
            self.nodes[0].aabb()
        }
    }
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: Aabb::EMPTY,
        count: 0,
    };
}

const PLACEHOLDER: BvhNode = BvhNode {
    aabb_min: [0.0; 3],
    left_or_first: 0,
    aabb_max: [0.0; 3],
    count: 0,
};

/// Build a BVH over item bounds using binned SAH.
///
/// Returns a flat node array + reordered item index list.
/// Items are NOT modified; indices map into the original slice.
#[tracing::instrument(skip_all, fields(item_count = aabbs.len()))]
pub fn build_bvh(aabbs: &[Aabb], max_leaf_size: usize) -> Bvh {
    let n = aabbs.len();
    if n == 0 {
        return Bvh {
            nodes: vec![PLACEHOLDER],
            item_indices: vec![],
        };
    }
    let max_leaf_size = max_leaf_size.max(1);

    let centroids: Vec<[f32; 3]> = aabbs.iter().map(|b| b.centroid()).collect();

    // Working index array (will be reordered by partitioning)
    let mut indices: Vec<u32> = (0..n as u32).collect();

    // Worst case: 2*n - 1 for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(PLACEHOLDER);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let Task { node_idx, start, end } = task;
        let count = end - start;

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_aabb.grow(&aabbs[idx as usize]);
        }

        let leaf = BvhNode {
            aabb_min: node_aabb.min,
            left_or_first: start as u32,
            aabb_max: node_aabb.max,
            count: count as u32,
        };

        if count <= max_leaf_size {
            nodes[node_idx] = leaf;
            continue;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.grow_point(centroids[idx as usize]);
        }

        let split = find_best_split(&indices[start..end], aabbs, &centroids, &centroid_bounds);

        // Leaf cost, normalized by parent area like the split cost
        let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();

        // Oversized leaves are only allowed when centroids coincide
        let mid = match split {
            Some((_, _, cost)) if cost >= leaf_cost && count <= 4 * max_leaf_size => {
                nodes[node_idx] = leaf;
                continue;
            }
            Some((axis, pos, _)) => {
                partition(&mut indices[start..end], |&idx| centroids[idx as usize][axis] < pos) + start
            }
            None if count <= 4 * max_leaf_size => {
                nodes[node_idx] = leaf;
                continue;
            }
            None => start,
        };

        // Degenerate partition: split in the middle
        let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };

        let left_idx = nodes.len();
        let right_idx = left_idx + 1;
        nodes.push(PLACEHOLDER);
        nodes.push(PLACEHOLDER);

        nodes[node_idx] = BvhNode {
            aabb_min: node_aabb.min,
            left_or_first: left_idx as u32,
            aabb_max: node_aabb.max,
            count: 0,
        };

        // Push right first so left is processed first (depth-first)
        stack.push(Task {
            node_idx: right_idx,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        item_indices: indices,
    }
}

/// SAH binned split search across all 3 axes.
/// Returns (axis, split_position, cost), or None if every axis is degenerate.
fn find_best_split(
    indices: &[u32],
    aabbs: &[Aabb],
    centroids: &[[f32; 3]],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let idx = idx as usize;
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin_id = bin_id.min(NUM_BINS - 1);
            bins[bin_id].bounds.grow(&aabbs[idx]);
            bins[bin_id].count += 1;
        }

        // Sweep from left: prefix areas and counts
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = if sweep_count > 0 { sweep.area() } else { 0.0 };
            left_count[i] = sweep_count;
        }

        // Sweep from right and evaluate SAH cost
        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            if sweep_count == 0 || left_count[i - 1] == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST
                + INTERSECT_COST * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.area());

            if best.is_none_or(|(_, _, c)| cost < c) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(cx: f32, cy: f32, cz: f32) -> Aabb {
        Aabb {
            min: [cx - 0.5, cy - 0.5, cz - 0.5],
            max: [cx + 0.5, cy + 0.5, cz + 0.5],
        }
    }

    /// Every leaf's items lie inside the leaf bounds, and every item appears once.
    fn check_tree(bvh: &Bvh, aabbs: &[Aabb]) {
        let mut seen = vec![false; aabbs.len()];
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = bvh.nodes[i];
            if node.is_leaf() {
                for k in 0..node.count {
                    let item = bvh.item_indices[(node.left_or_first + k) as usize] as usize;
                    assert!(!seen[item]);
                    seen[item] = true;
                    for a in 0..3 {
                        assert!(aabbs[item].min[a] >= node.aabb_min[a] - 1e-6);
                        assert!(aabbs[item].max[a] <= node.aabb_max[a] + 1e-6);
                    }
                }
            } else {
                stack.push(node.left_or_first as usize);
                stack.push(node.left_or_first as usize + 1);
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[], BLAS_LEAF_SIZE);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.is_empty());
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_single_item() {
        let bvh = build_bvh(&[unit_box(0.0, 0.0, 0.0)], BLAS_LEAF_SIZE);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
    }

    #[test]
    fn test_many_items_builds_tree() {
        let aabbs: Vec<Aabb> = (0..100).map(|i| unit_box(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&aabbs, BLAS_LEAF_SIZE);
        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");
        check_tree(&bvh, &aabbs);

        let root = &bvh.nodes[0];
        assert!(root.aabb_min[0] < 0.0);
        assert!(root.aabb_max[0] > 198.0);
    }

    #[test]
    fn test_coincident_centroids_still_bounded() {
        // All centroids equal: no SAH split exists, leaves are forced by count
        let aabbs: Vec<Aabb> = (0..40).map(|_| unit_box(1.0, 1.0, 1.0)).collect();
        let bvh = build_bvh(&aabbs, 1);
        check_tree(&bvh, &aabbs);
        assert!(bvh.nodes.iter().all(|n| n.count <= 4));
    }

    #[test]
    fn test_leaf_count_correct() {
        let aabbs = vec![unit_box(0.0, 0.0, 0.0), unit_box(1.0, 0.0, 0.0), unit_box(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&aabbs, BLAS_LEAF_SIZE);
        assert_eq!(bvh.nodes[0].count, 3);
    }
}
