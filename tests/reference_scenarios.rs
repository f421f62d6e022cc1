//! End-to-end CPU reference scenarios: load, trace, denoise, tone map, outline.

use glam::{Mat4, UVec2, Vec2, Vec3};
use gltf_pbr::MaterialParams;
use gltf_viewer::accel::AccelCache;
use gltf_viewer::denoise::{atrous_cpu, AtrousSettings, DenoiseInputs};
use gltf_viewer::environment::{EnvKind, Environment, EnvironmentSettings, HdrEnvironment, SkyParams};
use gltf_viewer::pathtracer::reference::FrameParams;
use gltf_viewer::pathtracer::{PathTracerSettings, ReferenceRenderer};
use gltf_viewer::post::{silhouette_mask, tonemap, ToneMapSettings};
use gltf_viewer::scene::descriptor::{Camera, NO_OBJECT};
use gltf_viewer::scene::{self, cube_scene, Scene};

use tempfile::TempDir;

fn camera() -> Camera {
    Camera::look_at(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y, 45f32.to_radians(), 1.0)
}

fn accel_for(scene: &Scene) -> AccelCache {
    let mut accel = AccelCache::new();
    accel.update(scene, 1);
    accel
}

fn solid(color: Vec3) -> Environment {
    let settings = EnvironmentSettings {
        kind: EnvKind::SolidColor,
        solid_color: color.to_array(),
        ..Default::default()
    };
    Environment::new(settings, SkyParams::default())
}

#[test]
fn test_black_background_unlit_scene_stays_black() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("cube.glb");
    let cube = cube_scene(MaterialParams::diffuse(Vec3::splat(0.8)), &[Mat4::IDENTITY]);
    scene::save_glb(&cube, &path).expect("Failed to save GLB");
    let scene = scene::load_gltf(&path).expect("Failed to load GLB");

    let accel = accel_for(&scene);
    let env = solid(Vec3::ZERO);
    let settings = PathTracerSettings {
        max_depth: 3,
        ..Default::default()
    };
    let renderer = ReferenceRenderer::new(&scene, &accel, &env, &settings);
    let colors = renderer.render_progressive(&camera(), UVec2::new(12, 12), 4);
    assert!(colors.iter().all(|c| c.max_element() <= 1e-6));

    let tm = ToneMapSettings::default();
    assert!(colors.iter().all(|&c| tonemap(c, &tm).max_element() <= 1e-6));
}

#[test]
fn test_empty_scene_with_constant_hdr_is_uniform() {
    let scene = Scene::default();
    let accel = accel_for(&scene);
    let mut env = Environment::default();
    env.settings.kind = EnvKind::Hdr;
    env.settings.intensity = 2.0;
    let hdr = HdrEnvironment::from_pixels(16, 8, vec![Vec3::new(0.5, 0.25, 0.125); 16 * 8])
        .expect("valid environment map");
    env.set_hdr(hdr);
    env.sync();

    let settings = PathTracerSettings {
        max_depth: 0,
        firefly_clamp: 0.0,
        ..Default::default()
    };
    let renderer = ReferenceRenderer::new(&scene, &accel, &env, &settings);
    let image = renderer.render_frame(&camera(), UVec2::new(8, 8), &FrameParams::new(0, 1));
    let expected = Vec3::new(1.0, 0.5, 0.25);
    for p in &image.pixels {
        assert!((p.color - expected).abs().max_element() < 1e-4, "{:?}", p.color);
        assert_eq!(p.object_id, NO_OBJECT);
    }
}

#[test]
fn test_selected_cube_outline_surrounds_its_pixels() {
    let scene = cube_scene(
        MaterialParams::diffuse(Vec3::splat(0.5)),
        &[
            Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(0.8)),
            Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(0.8)),
        ],
    );
    let accel = accel_for(&scene);
    let env = solid(Vec3::splat(0.5));
    let settings = PathTracerSettings {
        max_depth: 1,
        ..Default::default()
    };
    let renderer = ReferenceRenderer::new(&scene, &accel, &env, &settings);
    let (w, h) = (32u32, 32u32);
    let image = renderer.render_frame(&camera(), UVec2::new(w, h), &FrameParams::new(0, 1));
    let ids: Vec<u32> = image.pixels.iter().map(|p| p.object_id).collect();
    assert!(ids.contains(&0) && ids.contains(&1));

    let mask = silhouette_mask(&ids, w, h, 1);
    assert!(mask.iter().any(|&m| m));
    let (wi, hi) = (w as i64, h as i64);
    for y in 0..hi {
        for x in 0..wi {
            let neighbours: Vec<u32> = (-1..=1)
                .flat_map(|dy| (-1..=1).map(move |dx| (x + dx, y + dy)))
                .filter(|&(px, py)| px >= 0 && py >= 0 && px < wi && py < hi)
                .map(|(px, py)| ids[(py * wi + px) as usize])
                .collect();
            let expected = neighbours.contains(&1) && neighbours.iter().any(|&id| id != 1);
            assert_eq!(mask[(y * wi + x) as usize], expected, "pixel ({x}, {y})");
        }
    }
}

#[test]
fn test_fully_hidden_scene_shows_environment() {
    let mut scene = cube_scene(MaterialParams::diffuse(Vec3::splat(0.5)), &[Mat4::IDENTITY]);
    scene.set_visible(0, false);
    let accel = accel_for(&scene);
    assert!(accel.tlas().is_none());

    let env = solid(Vec3::new(0.2, 0.4, 0.6));
    let settings = PathTracerSettings {
        max_depth: 2,
        ..Default::default()
    };
    let renderer = ReferenceRenderer::new(&scene, &accel, &env, &settings);
    let image = renderer.render_frame(&camera(), UVec2::new(8, 8), &FrameParams::new(0, 1));
    for p in &image.pixels {
        assert!((p.color - Vec3::new(0.2, 0.4, 0.6)).abs().max_element() < 1e-5, "{:?}", p.color);
        assert_eq!(p.object_id, NO_OBJECT);
    }
}

#[test]
fn test_atrous_keeps_converged_flat_image() {
    let scene = cube_scene(MaterialParams::diffuse(Vec3::splat(0.7)), &[Mat4::IDENTITY]);
    let accel = accel_for(&scene);
    let env = solid(Vec3::ONE);
    let settings = PathTracerSettings {
        max_depth: 0,
        ..Default::default()
    };
    let renderer = ReferenceRenderer::new(&scene, &accel, &env, &settings);
    let (w, h) = (16u32, 16u32);
    let image = renderer.render_frame(&camera(), UVec2::new(w, h), &FrameParams::new(0, 1));

    let n = (w * h) as usize;
    let inputs = DenoiseInputs {
        width: w,
        height: h,
        color: vec![Vec3::splat(0.3); n],
        albedo: image.pixels.iter().map(|p| p.albedo).collect(),
        normal_roughness: image.pixels.iter().map(|p| p.normal_roughness).collect(),
        depth: image.pixels.iter().map(|p| p.depth_motion.x).collect(),
        motion: vec![Vec2::ZERO; n],
        jitter: Vec2::ZERO,
    };
    let out = atrous_cpu(&inputs, &AtrousSettings::default());
    assert_eq!(out.len(), n);
    assert!(out.iter().all(|c| (*c - Vec3::splat(0.3)).abs().max_element() < 1e-5));
}
