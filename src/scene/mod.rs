//! Scene model shared by both backends.
//!
//! A [`Scene`] is a flattened glTF scene:
//! - `nodes`: the glTF node graph (parent/children, local and world transforms)
//! - `meshes`: glTF meshes as lists of render-primitive indices
//! - `primitives`: one [`RenderPrimitive`] per glTF mesh primitive
//! - `render_nodes`: one [`RenderNode`] per (graph node, primitive) instance
//!
//! Render-node indices are dense and stable for a given [`Scene::version`].
//! Animation and material variants change transforms and material indices in
//! place and bump the version; they never reorder render nodes.

pub mod animation;
pub mod descriptor;
mod gltf_io;

pub use animation::{AnimationClip, Animations};
pub use gltf_io::{load_gltf, save_glb};

use gltf_pbr::{MaterialParams, Vertex};

use crate::util::{BBox3f, Mat4, Vec3};

/// Vertex attributes present in the source primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttributeMask {
    pub normals: bool,
    pub tangents: bool,
    pub colors: bool,
    pub uv0: bool,
    pub uv1: bool,
}

/// Geometry of one glTF mesh primitive (triangles only).
#[derive(Clone, Debug)]
pub struct RenderPrimitive {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: usize,
    pub bounds: BBox3f,
    pub attributes: AttributeMask,
    /// (variant, material) overrides from `KHR_materials_variants`
    pub variant_materials: Vec<(usize, usize)>,
}

impl RenderPrimitive {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>, material: usize, attributes: AttributeMask) -> Self {
        let mut bounds = BBox3f::EMPTY;
        for v in &vertices {
            bounds.expand_by_point(Vec3::from(v.position));
        }
        Self {
            vertices,
            indices,
            material,
            bounds,
            attributes,
            variant_materials: Vec::new(),
        }
    }

    /// Material used while `variant` is active; falls back to the primitive's own.
    pub fn material_for(&self, variant: Option<usize>) -> usize {
        variant
            .and_then(|v| self.variant_materials.iter().find(|(mv, _)| *mv == v))
            .map_or(self.material, |&(_, m)| m)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Area-weighted smooth normals for primitives that ship without them.
    pub fn compute_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let (pa, pb, pc) = (
                Vec3::from(self.vertices[a].position),
                Vec3::from(self.vertices[b].position),
                Vec3::from(self.vertices[c].position),
            );
            // unnormalized cross product = 2 * area * normal
            let n = (pb - pa).cross(pc - pa);
            acc[a] += n;
            acc[b] += n;
            acc[c] += n;
        }
        for (v, n) in self.vertices.iter_mut().zip(acc) {
            v.normal = n.normalize_or(Vec3::Y).to_array();
        }
    }
}

/// A glTF mesh: an ordered list of render primitives.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<usize>,
}

/// Node of the glTF scene graph.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    pub local: Mat4,
    pub world: Mat4,
    pub mesh: Option<usize>,
    pub light: Option<usize>,
    pub camera: Option<usize>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Instance of a render primitive in world space.
#[derive(Clone, Debug)]
pub struct RenderNode {
    pub transform: Mat4,
    /// Inverse-transpose of `transform` (for normals)
    pub normal_matrix: Mat4,
    pub primitive: usize,
    pub material: usize,
    pub visible: bool,
    /// Scene-graph node that instantiated this render node
    pub node: usize,
}

impl RenderNode {
    pub fn new(transform: Mat4, primitive: usize, material: usize, node: usize) -> Self {
        Self {
            transform,
            normal_matrix: transform.inverse().transpose(),
            primitive,
            material,
            visible: true,
            node,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub params: MaterialParams,
    /// Extension objects the renderer does not interpret, kept verbatim
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".into(),
            params: MaterialParams::default(),
            extensions: serde_json::Map::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

#[derive(Clone, Debug)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// 0 = infinite
    pub range: f32,
    pub position: Vec3,
    /// Direction the light travels (directional lights)
    pub direction: Vec3,
    pub name: String,
}

/// Camera defined in the glTF file, placed by its node.
#[derive(Clone, Debug)]
pub struct SceneCamera {
    pub name: String,
    pub node: usize,
    /// Vertical field of view in radians
    pub yfov: f32,
    pub znear: f32,
    pub zfar: Option<f32>,
    /// Orthographic cameras are shown with a perspective of `yfov`
    pub orthographic: bool,
}

/// Eye, orbit target and field of view of a scene camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraView {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
}

/// Decoded RGBA8 image referenced by materials.
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Read-only scene snapshot consumed by the renderers.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    pub roots: Vec<usize>,
    pub meshes: Vec<Mesh>,
    pub primitives: Vec<RenderPrimitive>,
    pub render_nodes: Vec<RenderNode>,
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub textures: Vec<Texture>,
    pub cameras: Vec<SceneCamera>,
    pub animations: Animations,
    /// Names from `KHR_materials_variants`
    pub variants: Vec<String>,
    pub active_variant: Option<usize>,
    /// Bumped on every mutation that affects rendering
    pub version: u64,
}

impl Scene {
    pub fn is_empty(&self) -> bool {
        self.render_nodes.is_empty()
    }

    /// World-space bounds of all visible render nodes.
    pub fn bounds(&self) -> BBox3f {
        let mut b = BBox3f::EMPTY;
        for rn in self.render_nodes.iter().filter(|rn| rn.visible) {
            b.expand_by_box(&self.primitives[rn.primitive].bounds.transformed(&rn.transform));
        }
        b
    }

    /// World-space bounds of one render node.
    pub fn render_node_bounds(&self, index: usize) -> Option<BBox3f> {
        let rn = self.render_nodes.get(index)?;
        Some(self.primitives.get(rn.primitive)?.bounds.transformed(&rn.transform))
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn set_visible(&mut self, render_node: usize, visible: bool) {
        if let Some(rn) = self.render_nodes.get_mut(render_node) {
            if rn.visible != visible {
                rn.visible = visible;
                self.bump_version();
            }
        }
    }

    /// Recompute world transforms from the graph and rebuild render nodes.
    ///
    /// Keeps the per-render-node visibility where the instance survives.
    pub fn rebuild_render_nodes(&mut self) {
        let mut stack: Vec<(usize, Mat4)> = self.roots.iter().rev().map(|&r| (r, Mat4::IDENTITY)).collect();
        while let Some((idx, parent_world)) = stack.pop() {
            let world = parent_world * self.nodes[idx].local;
            self.nodes[idx].world = world;
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push((child, world));
            }
        }

        let previous = std::mem::take(&mut self.render_nodes);
        for (node_idx, node) in self.nodes.iter().enumerate() {
            let Some(mesh) = node.mesh.and_then(|m| self.meshes.get(m)) else {
                continue;
            };
            for &prim in &mesh.primitives {
                let material = self.primitives[prim].material_for(self.active_variant);
                let mut rn = RenderNode::new(node.world, prim, material, node_idx);
                let index = self.render_nodes.len();
                if let Some(old) = previous.get(index) {
                    if old.node == node_idx && old.primitive == prim {
                        rn.visible = old.visible;
                    }
                }
                self.render_nodes.push(rn);
            }
        }
        self.place_lights();
        self.bump_version();
    }

    /// Lights take position and direction from the world transform of their node.
    fn place_lights(&mut self) {
        for node in &self.nodes {
            if let Some(light) = node.light.and_then(|l| self.lights.get_mut(l)) {
                light.position = node.world.transform_point3(Vec3::ZERO);
                light.direction = node.world.transform_vector3(-Vec3::Z).normalize_or(-Vec3::Z);
            }
        }
    }

    /// Switch material variant (`None` restores the primitives' own materials).
    ///
    /// Returns false when nothing changed.
    pub fn select_variant(&mut self, variant: Option<usize>) -> bool {
        if variant.is_some_and(|v| v >= self.variants.len()) || variant == self.active_variant {
            return false;
        }
        self.active_variant = variant;
        for rn in &mut self.render_nodes {
            rn.material = self.primitives[rn.primitive].material_for(variant);
        }
        self.bump_version();
        true
    }

    pub fn has_animation(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Advance the active clip by `delta` seconds and re-pose the scene.
    pub fn animate(&mut self, delta: f32) -> bool {
        if !self.has_animation() {
            return false;
        }
        self.animations.advance(delta);
        self.apply_pose();
        true
    }

    /// Jump to `time` seconds within the active clip.
    pub fn set_animation_time(&mut self, time: f32) -> bool {
        if !self.has_animation() {
            return false;
        }
        self.animations.set_time(time);
        self.apply_pose();
        true
    }

    /// Back to the start of the active clip.
    pub fn reset_animation(&mut self) -> bool {
        if !self.has_animation() {
            return false;
        }
        self.animations.rewind();
        self.apply_pose();
        true
    }

    pub fn set_active_animation(&mut self, index: usize) -> bool {
        if !self.animations.set_active(index) {
            return false;
        }
        self.apply_pose();
        true
    }

    /// Write the animated local transforms and re-flatten the graph.
    fn apply_pose(&mut self) {
        for (node, local) in self.animations.pose() {
            if let Some(n) = self.nodes.get_mut(node) {
                n.local = local;
            }
        }
        self.rebuild_render_nodes();
    }

    /// View of scene camera `index` at its node's current world transform.
    ///
    /// The orbit target lies on the view axis at the depth of the scene center.
    pub fn camera_view(&self, index: usize) -> Option<CameraView> {
        let camera = self.cameras.get(index)?;
        let world = self.nodes.get(camera.node)?.world;
        let eye = world.transform_point3(Vec3::ZERO);
        let forward = world.transform_vector3(-Vec3::Z).normalize_or(-Vec3::Z);
        let bounds = self.bounds();
        let depth = if bounds.is_empty() {
            1.0
        } else {
            (bounds.center() - eye).dot(forward).abs()
        };
        Some(CameraView {
            eye,
            target: eye + forward * depth.max(1e-3),
            up: Vec3::Y,
            fov_y_degrees: camera.yfov.to_degrees(),
        })
    }

    /// Check the index invariants the GPU tables rely on.
    pub fn validate(&self) -> crate::Result<()> {
        for (i, rn) in self.render_nodes.iter().enumerate() {
            if rn.primitive >= self.primitives.len() {
                return Err(crate::Error::invalid(format!(
                    "render node {i} references primitive {} (count {})",
                    rn.primitive,
                    self.primitives.len()
                )));
            }
            if rn.material >= self.materials.len() {
                return Err(crate::Error::invalid(format!(
                    "render node {i} references material {} (count {})",
                    rn.material,
                    self.materials.len()
                )));
            }
        }
        for (i, p) in self.primitives.iter().enumerate() {
            if p.indices.iter().any(|&ix| ix as usize >= p.vertices.len()) {
                return Err(crate::Error::invalid(format!("primitive {i} has out-of-range indices")));
            }
        }
        Ok(())
    }
}

/// Build a unit cube primitive centered at the origin (used by tests and demos).
pub fn unit_cube(material: usize) -> RenderPrimitive {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (-Vec3::X, Vec3::Y, -Vec3::Z),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (-Vec3::Y, Vec3::Z, -Vec3::X),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (-Vec3::Z, Vec3::X, -Vec3::Y),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        // u x v == n keeps the winding counter-clockwise seen from outside
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (n + u * su + v * sv) * 0.5;
            vertices.push(Vertex {
                position: p.to_array(),
                normal: n.to_array(),
                uv0: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5],
                color: [1.0; 4],
                ..Default::default()
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    let attributes = AttributeMask {
        normals: true,
        uv0: true,
        ..Default::default()
    };
    RenderPrimitive::new(vertices, indices, material, attributes)
}

/// Single-node scene with one cube per transform, sharing one material.
pub fn cube_scene(material: MaterialParams, transforms: &[Mat4]) -> Scene {
    let mut scene = Scene {
        materials: vec![Material {
            name: "cube".into(),
            params: material,
            extensions: serde_json::Map::new(),
        }],
        primitives: vec![unit_cube(0)],
        meshes: vec![Mesh {
            name: "cube".into(),
            primitives: vec![0],
        }],
        ..Default::default()
    };
    for (i, t) in transforms.iter().enumerate() {
        scene.nodes.push(SceneNode {
            name: format!("cube{i}"),
            local: *t,
            world: *t,
            mesh: Some(0),
            light: None,
            camera: None,
            parent: None,
            children: Vec::new(),
        });
        scene.roots.push(i);
    }
    scene.rebuild_render_nodes();
    scene
}
