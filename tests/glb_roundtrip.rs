//! Integration tests for GLB export and re-import through the loader.

use glam::{Mat4, Vec3};
use gltf_pbr::MaterialParams;
use gltf_viewer::loader;
use gltf_viewer::picking;
use gltf_viewer::scene::descriptor::Camera;
use gltf_viewer::scene::{self, cube_scene};
use gltf_viewer::Error;

use tempfile::TempDir;

fn two_cubes() -> scene::Scene {
    cube_scene(
        MaterialParams::diffuse(Vec3::new(0.8, 0.3, 0.1)),
        &[
            Mat4::from_translation(Vec3::new(-1.5, 0.0, 0.0)),
            Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(0.5)),
        ],
    )
}

#[test]
fn test_roundtrip_preserves_structure() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("cubes.glb");

    let original = two_cubes();
    scene::save_glb(&original, &path).expect("Failed to save GLB");

    let loaded = scene::load_gltf(&path).expect("Failed to load GLB");
    assert_eq!(loaded.render_nodes.len(), 2, "Both instances should survive");
    assert_eq!(loaded.primitives.len(), 1, "Shared mesh should stay one primitive");
    assert_eq!(loaded.primitives[0].triangle_count(), original.primitives[0].triangle_count());

    // node names and transforms
    let names: Vec<&str> = loaded.nodes.iter().map(|n| n.name.as_str()).collect();
    assert!(names.contains(&"cube0") && names.contains(&"cube1"), "names: {names:?}");

    let a = original.bounds();
    let b = loaded.bounds();
    assert!((a.min - b.min).abs().max_element() < 1e-5, "{a:?} vs {b:?}");
    assert!((a.max - b.max).abs().max_element() < 1e-5, "{a:?} vs {b:?}");

    // material factors
    let material = &loaded.materials[loaded.render_nodes[0].material].params;
    assert!((material.base_color.truncate() - Vec3::new(0.8, 0.3, 0.1)).abs().max_element() < 1e-6);
    assert_eq!(material.metallic(), 0.0);
}

#[test]
fn test_loaded_scene_is_pickable() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("pick.glb");
    scene::save_glb(&two_cubes(), &path).expect("Failed to save GLB");

    let (scene, accel) = loader::load_scene(&path, 1).expect("Failed to load scene");
    assert!(accel.is_ready());

    let camera = Camera::look_at(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO, Vec3::Y, 45f32.to_radians(), 1.0);
    let viewport = (160, 160);
    for centre in [Vec3::new(-1.5, 0.0, 0.0), Vec3::new(1.5, 0.0, 0.0)] {
        let px = camera.project(centre, viewport).expect("centre in front of camera");
        let hit = picking::pick(&scene, &accel, &camera, viewport, px.x as u32, px.y as u32)
            .expect("cube under its projected centre");
        let bounds = scene
            .render_node_bounds(hit.node_id as usize)
            .expect("hit node exists");
        assert!(bounds.contains(hit.hit_point, 1e-3));
    }
    assert!(picking::pick(&scene, &accel, &camera, viewport, 80, 2).is_none());
}

#[test]
fn test_visibility_is_not_exported() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("hidden.glb");

    let mut scene = two_cubes();
    scene.set_visible(1, false);
    scene::save_glb(&scene, &path).expect("Failed to save GLB");

    let loaded = scene::load_gltf(&path).expect("Failed to load GLB");
    assert_eq!(loaded.render_nodes.len(), 2, "Visibility is viewer state, not scene content");
}

#[test]
fn test_missing_and_unsupported_files() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let missing = dir.path().join("nope.glb");
    assert!(matches!(scene::load_gltf(&missing), Err(Error::FileNotFound(_))));

    let garbage = dir.path().join("garbage.glb");
    std::fs::write(&garbage, b"definitely not a glb").expect("Failed to write file");
    assert!(scene::load_gltf(&garbage).is_err());
}

#[test]
fn test_variants_survive_roundtrip() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("variants.glb");

    let mut original = two_cubes();
    original.materials.push(scene::Material {
        name: "blue".into(),
        params: MaterialParams::diffuse(Vec3::new(0.1, 0.2, 0.9)),
        extensions: Default::default(),
    });
    original.variants = vec!["orange".into(), "blue".into()];
    original.primitives[0].variant_materials = vec![(1, 1)];
    scene::save_glb(&original, &path).expect("Failed to save GLB");

    let mut loaded = scene::load_gltf(&path).expect("Failed to load GLB");
    assert_eq!(loaded.variants, ["orange", "blue"]);
    assert_eq!(loaded.active_variant, Some(0));
    assert!(loaded.render_nodes.iter().all(|rn| rn.material == 0));

    let version = loaded.version;
    assert!(loaded.select_variant(Some(1)));
    assert!(loaded.version > version);
    let blue = &loaded.materials[loaded.render_nodes[0].material];
    assert_eq!(blue.name, "blue");
}

/// Two-key translation animation on node 0 and a camera on node 1.
fn write_animated_gltf(dir: &std::path::Path) -> std::path::PathBuf {
    let mut bin = Vec::new();
    for v in [0.0f32, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0] {
        bin.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(dir.join("anim.bin"), &bin).expect("Failed to write buffer");

    let doc = serde_json::json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0, 1] }],
        "nodes": [
            { "name": "mover" },
            { "name": "eye", "camera": 0, "translation": [0.0, 0.0, 5.0] }
        ],
        "cameras": [{ "name": "front", "type": "perspective", "perspective": { "yfov": 0.8, "znear": 0.01 } }],
        "buffers": [{ "byteLength": bin.len(), "uri": "anim.bin" }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 8 },
            { "buffer": 0, "byteOffset": 8, "byteLength": 24 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0.0], "max": [1.0] },
            { "bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC3" }
        ],
        "animations": [{
            "name": "lift",
            "channels": [{ "sampler": 0, "target": { "node": 0, "path": "translation" } }],
            "samplers": [{ "input": 0, "output": 1, "interpolation": "LINEAR" }]
        }]
    });
    let path = dir.join("animated.gltf");
    std::fs::write(&path, serde_json::to_vec(&doc).expect("Failed to encode JSON")).expect("Failed to write glTF");
    path
}

#[test]
fn test_animation_and_cameras_are_imported() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_animated_gltf(dir.path());
    let mut loaded = scene::load_gltf(&path).expect("Failed to load glTF");

    assert_eq!(loaded.cameras.len(), 1);
    assert_eq!(loaded.cameras[0].name, "front");
    let view = loaded.camera_view(0).expect("camera view");
    assert!((view.eye - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-5);
    assert!((view.fov_y_degrees - 0.8f32.to_degrees()).abs() < 1e-4);

    assert!(loaded.has_animation());
    let clip = loaded.animations.active().expect("active clip");
    assert_eq!(clip.name, "lift");
    assert_eq!((clip.start, clip.end), (0.0, 1.0));

    let version = loaded.version;
    assert!(loaded.set_animation_time(0.5));
    assert!(loaded.version > version);
    let p = loaded.nodes[0].world.transform_point3(Vec3::ZERO);
    assert!((p - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5, "{p:?}");

    assert!(loaded.reset_animation());
    assert!(loaded.nodes[0].world.transform_point3(Vec3::ZERO).length() < 1e-5);
}
