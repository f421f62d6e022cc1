//! BVH node type and ray/primitive intersection routines.
//!
//! Flat array layout shared with `shaders/scene.wgsl`:
//! - 32-byte nodes (cache-line friendly)
//! - internal nodes store the left child index; the right child follows it

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Centroid of the AABB.
    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn of_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let mut bb = Self::EMPTY;
        bb.grow_point(a.to_array());
        bb.grow_point(b.to_array());
        bb.grow_point(c.to_array());
        bb
    }
}

impl From<crate::util::BBox3f> for Aabb {
    fn from(b: crate::util::BBox3f) -> Self {
        Self {
            min: b.min.to_array(),
            max: b.max.to_array(),
        }
    }
}

/// GPU-friendly BVH node (32 bytes, matches WGSL struct).
///
/// Internal node: left_or_first = left child index, count = 0
/// Leaf node: left_or_first = first item index, count > 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: self.aabb_min,
            max: self.aabb_max,
        }
    }
}

/// Ray with precomputed reciprocal direction.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub inv_direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: direction.recip(),
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Slab test. Returns the entry distance if the box is hit within `[t_min, t_max]`.
#[inline]
pub fn ray_aabb(ray: &Ray, aabb: &Aabb, t_min: f32, t_max: f32) -> Option<f32> {
    let t0 = (Vec3::from(aabb.min) - ray.origin) * ray.inv_direction;
    let t1 = (Vec3::from(aabb.max) - ray.origin) * ray.inv_direction;
    let near = t0.min(t1).max_element().max(t_min);
    let far = t0.max(t1).min_element().min(t_max);
    (near <= far).then_some(near)
}

/// Triangle hit: distance, barycentrics of v1/v2, and the side that was hit.
#[derive(Debug, Clone, Copy)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// True when the ray hits the counter-clockwise (front) face
    pub front_face: bool,
}

/// Möller-Trumbore intersection without culling.
#[inline]
pub fn ray_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3, t_min: f32, t_max: f32) -> Option<TriangleHit> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t < t_min || t > t_max {
        return None;
    }
    Some(TriangleHit {
        t,
        u,
        v,
        // det < 0 when the ray travels against the CCW normal
        front_face: det > 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_is_32_bytes() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
    }

    #[test]
    fn test_slab_test_hits_and_misses() {
        let bb = Aabb {
            min: [-1.0; 3],
            max: [1.0; 3],
        };
        let hit = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert_eq!(ray_aabb(&hit, &bb, 0.0, f32::INFINITY), Some(4.0));
        let miss = Ray::new(Vec3::new(3.0, 0.0, -5.0), Vec3::Z);
        assert!(ray_aabb(&miss, &bb, 0.0, f32::INFINITY).is_none());
        // t_max before the box
        assert!(ray_aabb(&hit, &bb, 0.0, 3.0).is_none());
    }

    #[test]
    fn test_triangle_facing() {
        let (a, b, c) = (Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        // CCW seen from +Z, normal +Z
        let from_front = Ray::new(Vec3::new(0.0, 0.0, 2.0), -Vec3::Z);
        let h = ray_triangle(&from_front, a, b, c, 0.0, f32::INFINITY).unwrap();
        assert!(h.front_face);
        assert!((h.t - 2.0).abs() < 1e-6);
        let from_back = Ray::new(Vec3::new(0.0, 0.0, -2.0), Vec3::Z);
        assert!(!ray_triangle(&from_back, a, b, c, 0.0, f32::INFINITY).unwrap().front_face);
    }
}
