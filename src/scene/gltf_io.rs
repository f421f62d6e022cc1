//! glTF import (via the `gltf` crate) and GLB export.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use gltf::mesh::Mode;
use gltf_pbr::{AlphaMode, MaterialParams, Vertex, NO_TEXTURE};
use serde_json::{json, Map, Value};

use super::animation::{AnimationClip, Animations, Channel, Interpolation, Property};
use super::{AttributeMask, Light, LightKind, Material, Mesh, RenderPrimitive, Scene, SceneCamera, SceneNode, Texture};
use crate::util::{Mat4, Vec3, Vec4};
use crate::{Error, Result};

const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const COMPONENT_FLOAT: u32 = 5126;
const COMPONENT_UNSIGNED_INT: u32 = 5125;

/// Import a `.gltf` or `.glb` file into a flattened [`Scene`].
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_gltf(path: &Path) -> Result<Scene> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let (document, buffers, images) = gltf::import(path)?;

    let mut scene = Scene::default();

    for material in document.materials() {
        scene.materials.push(convert_material(&material));
    }
    // Primitives without a material share one default appended on demand
    let mut default_material: Option<usize> = None;

    scene.textures = images.iter().map(convert_image).collect();
    scene.variants = document
        .variants()
        .map(|variants| variants.map(|v| v.name().to_string()).collect())
        .unwrap_or_default();

    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| Error::invalid("document has no scenes"))?;

    // Only nodes reachable from the scene are imported; remap indices densely
    let mut node_map: HashMap<usize, usize> = HashMap::new();
    let mut mesh_map: HashMap<usize, usize> = HashMap::new();
    let mut stack: Vec<(gltf::Node, Option<usize>)> = gltf_scene.nodes().map(|n| (n, None)).collect();
    stack.reverse();

    while let Some((node, parent)) = stack.pop() {
        if node_map.contains_key(&node.index()) {
            log::warn!("node {} is instanced more than once, skipping repeat", node.index());
            continue;
        }
        let index = scene.nodes.len();
        node_map.insert(node.index(), index);

        let mesh = match node.mesh() {
            Some(mesh) => Some(match mesh_map.get(&mesh.index()) {
                Some(&m) => m,
                None => {
                    let m = import_mesh(&mut scene, &mesh, &buffers, &mut default_material)?;
                    mesh_map.insert(mesh.index(), m);
                    m
                }
            }),
            None => None,
        };

        let light = node.light().map(|l| {
            scene.lights.push(convert_light(&l));
            scene.lights.len() - 1
        });
        let camera = node.camera().map(|c| {
            scene.cameras.push(convert_camera(&c, index));
            scene.cameras.len() - 1
        });

        scene.nodes.push(SceneNode {
            name: node.name().unwrap_or_default().to_string(),
            local: Mat4::from_cols_array_2d(&node.transform().matrix()),
            world: Mat4::IDENTITY,
            mesh,
            light,
            camera,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => scene.nodes[p].children.push(index),
            None => scene.roots.push(index),
        }
        for child in node.children().collect::<Vec<_>>().into_iter().rev() {
            stack.push((child, Some(index)));
        }
    }

    let clips: Vec<AnimationClip> = document
        .animations()
        .filter_map(|a| import_animation(&a, &buffers, &node_map))
        .collect();
    let locals: Vec<Mat4> = scene.nodes.iter().map(|n| n.local).collect();
    scene.animations = Animations::new(clips, &locals);

    // the first variant is active on load
    if !scene.variants.is_empty() {
        scene.active_variant = Some(0);
    }
    scene.rebuild_render_nodes();
    scene.validate()?;

    log::info!(
        "Loaded {}: {} render nodes, {} primitives, {} materials, {} lights, {} textures",
        path.display(),
        scene.render_nodes.len(),
        scene.primitives.len(),
        scene.materials.len(),
        scene.lights.len(),
        scene.textures.len()
    );
    log::debug!(
        "{} cameras, {} animations, {} variants",
        scene.cameras.len(),
        scene.animations.clips.len(),
        scene.variants.len()
    );
    Ok(scene)
}

fn import_mesh(
    scene: &mut Scene,
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    default_material: &mut Option<usize>,
) -> Result<usize> {
    let mut out = Mesh {
        name: mesh.name().unwrap_or_default().to_string(),
        primitives: Vec::new(),
    };
    for primitive in mesh.primitives() {
        let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));
        let Some(positions) = reader.read_positions() else {
            log::warn!("mesh '{}' primitive {} has no positions, skipped", out.name, primitive.index());
            continue;
        };
        let mut vertices: Vec<Vertex> = positions
            .map(|p| Vertex {
                position: p,
                color: [1.0; 4],
                ..Default::default()
            })
            .collect();

        let mut attributes = AttributeMask::default();
        if let Some(normals) = reader.read_normals() {
            attributes.normals = true;
            for (v, n) in vertices.iter_mut().zip(normals) {
                v.normal = n;
            }
        }
        if let Some(tangents) = reader.read_tangents() {
            attributes.tangents = true;
            for (v, t) in vertices.iter_mut().zip(tangents) {
                v.tangent = t;
            }
        }
        if let Some(uvs) = reader.read_tex_coords(0) {
            attributes.uv0 = true;
            for (v, uv) in vertices.iter_mut().zip(uvs.into_f32()) {
                v.uv0 = uv;
            }
        }
        if let Some(uvs) = reader.read_tex_coords(1) {
            attributes.uv1 = true;
            for (v, uv) in vertices.iter_mut().zip(uvs.into_f32()) {
                v.uv1 = uv;
            }
        }
        if let Some(colors) = reader.read_colors(0) {
            attributes.colors = true;
            for (v, c) in vertices.iter_mut().zip(colors.into_rgba_f32()) {
                v.color = c;
            }
        }

        let raw: Vec<u32> = match reader.read_indices() {
            Some(ix) => ix.into_u32().collect(),
            None => (0..vertices.len() as u32).collect(),
        };
        let indices = match triangulate(primitive.mode(), raw) {
            Some(ix) => ix,
            None => {
                log::warn!("mesh '{}': {:?} primitives are not rendered", out.name, primitive.mode());
                continue;
            }
        };

        let material = match primitive.material().index() {
            Some(m) => m,
            None => *default_material.get_or_insert_with(|| {
                scene.materials.push(Material::default());
                scene.materials.len() - 1
            }),
        };

        let mut prim = RenderPrimitive::new(vertices, indices, material, attributes);
        for mapping in primitive.mappings() {
            let Some(m) = mapping.material().index() else { continue; };
            for &variant in mapping.variants() {
                prim.variant_materials.push((variant as usize, m));
            }
        }
        if !attributes.normals {
            prim.compute_normals();
        }
        scene.primitives.push(prim);
        out.primitives.push(scene.primitives.len() - 1);
    }
    scene.meshes.push(out);
    Ok(scene.meshes.len() - 1)
}

/// Convert strips and fans to triangle lists. Points and lines are not rendered.
fn triangulate(mode: Mode, indices: Vec<u32>) -> Option<Vec<u32>> {
    match mode {
        Mode::Triangles => Some(indices),
        Mode::TriangleStrip => {
            let mut out = Vec::with_capacity(indices.len().saturating_sub(2) * 3);
            for i in 0..indices.len().saturating_sub(2) {
                if i % 2 == 0 {
                    out.extend_from_slice(&[indices[i], indices[i + 1], indices[i + 2]]);
                } else {
                    out.extend_from_slice(&[indices[i + 1], indices[i], indices[i + 2]]);
                }
            }
            Some(out)
        }
        Mode::TriangleFan => {
            let mut out = Vec::with_capacity(indices.len().saturating_sub(2) * 3);
            for i in 1..indices.len().saturating_sub(1) {
                out.extend_from_slice(&[indices[0], indices[i], indices[i + 1]]);
            }
            Some(out)
        }
        _ => None,
    }
}

fn texture_layer(info: Option<gltf::texture::Info>) -> i32 {
    info.map(|i| i.texture().source().index() as i32).unwrap_or(NO_TEXTURE)
}

fn convert_material(material: &gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let mut params = MaterialParams::default();
    params.base_color = pbr.base_color_factor().into();
    params.pbr.x = pbr.metallic_factor();
    params.pbr.y = pbr.roughness_factor();
    params.pbr.z = material.ior().unwrap_or(1.5);

    let strength = material.emissive_strength().unwrap_or(1.0);
    params.emissive_cutoff = (Vec3::from(material.emissive_factor()) * strength).extend(0.5);

    params = params
        .with_alpha_mode(match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask(material.alpha_cutoff().unwrap_or(0.5)),
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        })
        .with_double_sided(material.double_sided());

    if let Some(t) = material.transmission() {
        let (color, distance, thickness) = match material.volume() {
            Some(v) => (
                Vec3::from(v.attenuation_color()),
                // glTF uses +inf for "no attenuation"
                if v.attenuation_distance().is_finite() { v.attenuation_distance() } else { 0.0 },
                v.thickness_factor(),
            ),
            None => (Vec3::ONE, 0.0, 0.0),
        };
        params = params.with_transmission(t.transmission_factor(), color, distance, thickness);
    }

    params.textures = [
        texture_layer(pbr.base_color_texture()),
        texture_layer(pbr.metallic_roughness_texture()),
        material
            .normal_texture()
            .map(|n| n.texture().source().index() as i32)
            .unwrap_or(NO_TEXTURE),
        texture_layer(material.emissive_texture()),
    ];
    if let Some(n) = material.normal_texture() {
        params.misc.y = n.scale();
    }

    // Interpreted extensions are not duplicated into the opaque payload
    const HANDLED: [&str; 4] = [
        "KHR_materials_transmission",
        "KHR_materials_volume",
        "KHR_materials_ior",
        "KHR_materials_emissive_strength",
    ];
    let extensions = material
        .extensions()
        .map(|ext| {
            ext.iter()
                .filter(|(k, _)| !HANDLED.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    Material {
        name: material.name().unwrap_or("material").to_string(),
        params,
        extensions,
    }
}

fn convert_light(light: &gltf::khr_lights_punctual::Light) -> Light {
    use gltf::khr_lights_punctual::Kind;
    let kind = match light.kind() {
        Kind::Directional => LightKind::Directional,
        Kind::Point => LightKind::Point,
        Kind::Spot { .. } => {
            log::debug!("spot light '{}' imported as point light", light.name().unwrap_or_default());
            LightKind::Point
        }
    };
    Light {
        kind,
        color: Vec3::from(light.color()),
        intensity: light.intensity(),
        range: light.range().unwrap_or(0.0),
        position: Vec3::ZERO,
        direction: -Vec3::Z,
        name: light.name().unwrap_or_default().to_string(),
    }
}

fn convert_camera(camera: &gltf::Camera, node: usize) -> SceneCamera {
    use gltf::camera::Projection;
    let name = camera.name().unwrap_or_default().to_string();
    match camera.projection() {
        Projection::Perspective(p) => SceneCamera {
            name,
            node,
            yfov: p.yfov(),
            znear: p.znear(),
            zfar: p.zfar(),
            orthographic: false,
        },
        Projection::Orthographic(o) => {
            log::debug!("orthographic camera '{}' shown in perspective", name);
            SceneCamera {
                name,
                node,
                yfov: 45f32.to_radians(),
                znear: o.znear(),
                zfar: Some(o.zfar()),
                orthographic: true,
            }
        }
    }
}

/// Import the node TRS channels of one animation. Morph weights are not rendered.
fn import_animation(
    animation: &gltf::Animation,
    buffers: &[gltf::buffer::Data],
    node_map: &HashMap<usize, usize>,
) -> Option<AnimationClip> {
    use gltf::animation::util::ReadOutputs;

    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("animation {}", animation.index()));
    let mut channels = Vec::new();
    for channel in animation.channels() {
        let Some(&node) = node_map.get(&channel.target().node().index()) else {
            continue;
        };
        let reader = channel.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));
        let Some(inputs) = reader.read_inputs() else { continue; };
        let inputs: Vec<f32> = inputs.collect();
        let (property, outputs): (Property, Vec<Vec4>) = match reader.read_outputs() {
            Some(ReadOutputs::Translations(t)) => (Property::Translation, t.map(|v| Vec3::from(v).extend(0.0)).collect()),
            Some(ReadOutputs::Scales(s)) => (Property::Scale, s.map(|v| Vec3::from(v).extend(0.0)).collect()),
            Some(ReadOutputs::Rotations(r)) => (Property::Rotation, r.into_f32().map(Vec4::from_array).collect()),
            Some(ReadOutputs::MorphTargetWeights(_)) => {
                log::debug!("'{}': morph target weights are not animated", name);
                continue;
            }
            None => continue,
        };
        let interpolation = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Linear => Interpolation::Linear,
            gltf::animation::Interpolation::Step => Interpolation::Step,
            gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
        };
        if inputs.is_empty() || outputs.len() != Channel::expected_outputs(interpolation, inputs.len()) {
            log::warn!(
                "'{}': channel {} has {} keys but {} outputs, skipped",
                name,
                channel.index(),
                inputs.len(),
                outputs.len()
            );
            continue;
        }
        channels.push(Channel {
            node,
            property,
            interpolation,
            inputs,
            outputs,
        });
    }
    if channels.is_empty() {
        log::debug!("'{}' has no playable channels", name);
        return None;
    }
    Some(AnimationClip::new(name, channels))
}

fn convert_image(data: &gltf::image::Data) -> Texture {
    use gltf::image::Format;
    let px = (data.width * data.height) as usize;
    let rgba: Vec<u8> = match data.format {
        Format::R8G8B8A8 => data.pixels.clone(),
        Format::R8G8B8 => data.pixels.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect(),
        Format::R8G8 => data.pixels.chunks_exact(2).flat_map(|c| [c[0], c[1], 0, 255]).collect(),
        Format::R8 => data.pixels.iter().flat_map(|&r| [r, r, r, 255]).collect(),
        other => {
            log::warn!("texture format {:?} not supported, using white", other);
            vec![255; px * 4]
        }
    };
    Texture {
        width: data.width,
        height: data.height,
        rgba,
    }
}

/// Binary buffer under construction for GLB export.
#[derive(Default)]
struct BinWriter {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BinWriter {
    fn push_view(&mut self, bytes: &[u8], target: u32) -> usize {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": self.data.len(),
            "byteLength": bytes.len(),
            "target": target,
        }));
        self.data.extend_from_slice(bytes);
        self.views.len() - 1
    }

    fn push_floats<const N: usize>(&mut self, values: &[[f32; N]], kind: &str, with_bounds: bool) -> Result<usize> {
        let mut bytes = Vec::with_capacity(values.len() * N * 4);
        for v in values {
            for &c in v {
                bytes.write_f32::<LittleEndian>(c)?;
            }
        }
        let view = self.push_view(&bytes, TARGET_ARRAY_BUFFER);
        let mut accessor = json!({
            "bufferView": view,
            "componentType": COMPONENT_FLOAT,
            "count": values.len(),
            "type": kind,
        });
        if with_bounds && !values.is_empty() {
            let mut min = [f32::INFINITY; N];
            let mut max = [f32::NEG_INFINITY; N];
            for v in values {
                for i in 0..N {
                    min[i] = min[i].min(v[i]);
                    max[i] = max[i].max(v[i]);
                }
            }
            accessor["min"] = json!(min.to_vec());
            accessor["max"] = json!(max.to_vec());
        }
        self.accessors.push(accessor);
        Ok(self.accessors.len() - 1)
    }

    fn push_indices(&mut self, indices: &[u32]) -> Result<usize> {
        let mut bytes = Vec::with_capacity(indices.len() * 4);
        for &i in indices {
            bytes.write_u32::<LittleEndian>(i)?;
        }
        let view = self.push_view(&bytes, TARGET_ELEMENT_ARRAY_BUFFER);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        Ok(self.accessors.len() - 1)
    }
}

fn export_material(material: &Material) -> Value {
    let p = &material.params;
    let emissive = p.emissive();
    let strength = emissive.max_element().max(1.0);
    let mut out = json!({
        "name": material.name,
        "pbrMetallicRoughness": {
            "baseColorFactor": p.base_color.to_array(),
            "metallicFactor": p.metallic(),
            "roughnessFactor": p.roughness(),
        },
        "emissiveFactor": (emissive / strength).to_array(),
        "doubleSided": p.double_sided(),
    });
    match p.alpha_mode() {
        AlphaMode::Opaque => {}
        AlphaMode::Mask(cutoff) => {
            out["alphaMode"] = json!("MASK");
            out["alphaCutoff"] = json!(cutoff);
        }
        AlphaMode::Blend => out["alphaMode"] = json!("BLEND"),
    }

    let mut ext: Map<String, Value> = material.extensions.clone();
    if strength > 1.0 {
        ext.insert("KHR_materials_emissive_strength".into(), json!({ "emissiveStrength": strength }));
    }
    if (p.ior() - 1.5).abs() > 1e-6 {
        ext.insert("KHR_materials_ior".into(), json!({ "ior": p.ior() }));
    }
    if p.is_transmissive() {
        ext.insert("KHR_materials_transmission".into(), json!({ "transmissionFactor": p.transmission() }));
        if p.has_volume() {
            let mut volume = json!({
                "thicknessFactor": p.misc.x,
                "attenuationColor": p.attenuation.truncate().to_array(),
            });
            if p.attenuation.w > 0.0 {
                volume["attenuationDistance"] = json!(p.attenuation.w);
            }
            ext.insert("KHR_materials_volume".into(), volume);
        }
    }
    if !ext.is_empty() {
        out["extensions"] = Value::Object(ext);
    }
    out
}

/// Build the glTF JSON document and binary chunk for a scene.
fn build_document(scene: &Scene) -> Result<(Value, Vec<u8>)> {
    let mut bin = BinWriter::default();
    let mut extensions_used: Vec<String> = Vec::new();
    let mut use_extension = |name: &str| {
        if !extensions_used.iter().any(|e| e == name) {
            extensions_used.push(name.to_string());
        }
    };

    let mut primitive_json = Vec::with_capacity(scene.primitives.len());
    for prim in &scene.primitives {
        let positions: Vec<[f32; 3]> = prim.vertices.iter().map(|v| v.position).collect();
        let normals: Vec<[f32; 3]> = prim.vertices.iter().map(|v| v.normal).collect();
        let mut attributes = Map::new();
        attributes.insert("POSITION".into(), json!(bin.push_floats(&positions, "VEC3", true)?));
        attributes.insert("NORMAL".into(), json!(bin.push_floats(&normals, "VEC3", false)?));
        if prim.attributes.tangents {
            let t: Vec<[f32; 4]> = prim.vertices.iter().map(|v| v.tangent).collect();
            attributes.insert("TANGENT".into(), json!(bin.push_floats(&t, "VEC4", false)?));
        }
        if prim.attributes.uv0 {
            let uv: Vec<[f32; 2]> = prim.vertices.iter().map(|v| v.uv0).collect();
            attributes.insert("TEXCOORD_0".into(), json!(bin.push_floats(&uv, "VEC2", false)?));
        }
        if prim.attributes.uv1 {
            let uv: Vec<[f32; 2]> = prim.vertices.iter().map(|v| v.uv1).collect();
            attributes.insert("TEXCOORD_1".into(), json!(bin.push_floats(&uv, "VEC2", false)?));
        }
        if prim.attributes.colors {
            let c: Vec<[f32; 4]> = prim.vertices.iter().map(|v| v.color).collect();
            attributes.insert("COLOR_0".into(), json!(bin.push_floats(&c, "VEC4", false)?));
        }
        let indices = bin.push_indices(&prim.indices)?;
        let mut out = json!({
            "attributes": attributes,
            "indices": indices,
            "material": prim.material,
            "mode": 4,
        });
        if !prim.variant_materials.is_empty() && !scene.variants.is_empty() {
            let mut by_material: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &(variant, material) in &prim.variant_materials {
                by_material.entry(material).or_default().push(variant);
            }
            let mappings: Vec<Value> = by_material
                .into_iter()
                .map(|(material, variants)| json!({ "material": material, "variants": variants }))
                .collect();
            out["extensions"] = json!({ "KHR_materials_variants": { "mappings": mappings } });
        }
        primitive_json.push(out);
    }

    let meshes: Vec<Value> = scene
        .meshes
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "primitives": m.primitives.iter().map(|&p| primitive_json[p].clone()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let nodes: Vec<Value> = scene
        .nodes
        .iter()
        .map(|n| {
            let mut node = json!({
                "name": n.name,
                "matrix": n.local.to_cols_array().to_vec(),
            });
            if let Some(mesh) = n.mesh {
                node["mesh"] = json!(mesh);
            }
            if !n.children.is_empty() {
                node["children"] = json!(n.children);
            }
            if let Some(light) = n.light {
                node["extensions"] = json!({ "KHR_lights_punctual": { "light": light } });
            }
            node
        })
        .collect();

    let materials: Vec<Value> = scene.materials.iter().map(export_material).collect();
    for m in &materials {
        if let Some(ext) = m.get("extensions").and_then(Value::as_object) {
            for key in ext.keys() {
                use_extension(key);
            }
        }
    }

    let generator = format!(
        "gltf-viewer {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GLTF_VIEWER_BUILD_DATE").unwrap_or("unknown")
    );
    let mut doc = json!({
        "asset": { "version": "2.0", "generator": generator },
        "scene": 0,
        "scenes": [{ "nodes": scene.roots }],
        "nodes": nodes,
        "meshes": meshes,
        "materials": materials,
        "accessors": bin.accessors,
        "bufferViews": bin.views,
    });

    let mut root_extensions = Map::new();
    if !scene.variants.is_empty() {
        use_extension("KHR_materials_variants");
        let variants: Vec<Value> = scene.variants.iter().map(|name| json!({ "name": name })).collect();
        root_extensions.insert("KHR_materials_variants".into(), json!({ "variants": variants }));
    }
    if !scene.lights.is_empty() {
        use_extension("KHR_lights_punctual");
        let lights: Vec<Value> = scene
            .lights
            .iter()
            .map(|l| {
                let mut light = json!({
                    "name": l.name,
                    "type": match l.kind {
                        LightKind::Directional => "directional",
                        LightKind::Point => "point",
                    },
                    "color": l.color.to_array(),
                    "intensity": l.intensity,
                });
                if l.range > 0.0 && l.kind == LightKind::Point {
                    light["range"] = json!(l.range);
                }
                light
            })
            .collect();
        root_extensions.insert("KHR_lights_punctual".into(), json!({ "lights": lights }));
    }
    if !root_extensions.is_empty() {
        doc["extensions"] = Value::Object(root_extensions);
    }
    if !extensions_used.is_empty() {
        doc["extensionsUsed"] = json!(extensions_used);
    }

    let mut data = bin.data;
    while data.len() % 4 != 0 {
        data.push(0);
    }
    if !data.is_empty() {
        doc["buffers"] = json!([{ "byteLength": data.len() }]);
    }
    Ok((doc, data))
}

/// Write a scene as a self-contained binary glTF.
///
/// Images are not exported; material texture references are dropped.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn save_glb(scene: &Scene, path: &Path) -> Result<()> {
    let (doc, bin) = build_document(scene)?;
    let mut json_bytes = serde_json::to_vec(&doc)?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let mut total = 12 + 8 + json_bytes.len();
    if !bin.is_empty() {
        total += 8 + bin.len();
    }

    let mut out = Vec::with_capacity(total);
    out.write_u32::<LittleEndian>(GLB_MAGIC)?;
    out.write_u32::<LittleEndian>(2)?;
    out.write_u32::<LittleEndian>(total as u32)?;
    out.write_u32::<LittleEndian>(json_bytes.len() as u32)?;
    out.write_u32::<LittleEndian>(CHUNK_JSON)?;
    out.write_all(&json_bytes)?;
    if !bin.is_empty() {
        out.write_u32::<LittleEndian>(bin.len() as u32)?;
        out.write_u32::<LittleEndian>(CHUNK_BIN)?;
        out.write_all(&bin)?;
    }
    std::fs::write(path, out)?;
    log::info!("Saved {} ({} render nodes)", path.display(), scene.render_nodes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_and_fan_triangulation() {
        assert_eq!(triangulate(Mode::TriangleStrip, vec![0, 1, 2, 3]).unwrap(), vec![0, 1, 2, 2, 1, 3]);
        assert_eq!(triangulate(Mode::TriangleFan, vec![0, 1, 2, 3]).unwrap(), vec![0, 1, 2, 0, 2, 3]);
        assert!(triangulate(Mode::Lines, vec![0, 1]).is_none());
    }

    #[test]
    fn test_document_declares_used_extensions() {
        let mut scene = super::super::cube_scene(
            MaterialParams::default().with_transmission(0.8, Vec3::ONE, 0.0, 0.0),
            &[Mat4::IDENTITY],
        );
        scene.materials[0].extensions.insert("VENDOR_custom".into(), json!({ "k": 1 }));
        let (doc, bin) = build_document(&scene).unwrap();
        let used: Vec<&str> = doc["extensionsUsed"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(used.contains(&"KHR_materials_transmission"));
        assert!(used.contains(&"VENDOR_custom"));
        assert_eq!(bin.len() % 4, 0);
        assert_eq!(doc["buffers"][0]["byteLength"].as_u64().unwrap() as usize, bin.len());
    }

    #[test]
    fn test_variants_are_written_with_mappings() {
        let mut scene = super::super::cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        scene.materials.push(Material::default());
        scene.variants = vec!["day".into(), "night".into(), "dusk".into()];
        scene.primitives[0].variant_materials = vec![(1, 1), (2, 1), (0, 0)];
        let (doc, _) = build_document(&scene).unwrap();

        let names: Vec<&str> = doc["extensions"]["KHR_materials_variants"]["variants"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v["name"].as_str())
            .collect();
        assert_eq!(names, ["day", "night", "dusk"]);
        let mappings = &doc["meshes"][0]["primitives"][0]["extensions"]["KHR_materials_variants"]["mappings"];
        assert_eq!(mappings[0], json!({ "material": 0, "variants": [0] }));
        assert_eq!(mappings[1], json!({ "material": 1, "variants": [1, 2] }));
        assert!(doc["extensionsUsed"]
            .as_array()
            .unwrap()
            .contains(&json!("KHR_materials_variants")));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_gltf(Path::new("/definitely/not/here.glb")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
