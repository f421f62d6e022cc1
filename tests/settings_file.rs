//! Integration tests for the INI settings file.

use gltf_viewer::cli::Options;
use gltf_viewer::denoise::DenoiserKind;
use gltf_viewer::environment::EnvKind;
use gltf_viewer::frame::Backend;
use gltf_viewer::settings::{CameraState, IniStore, RendererState, WindowState};

use tempfile::TempDir;

#[test]
fn test_settings_roundtrip_through_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    // parent directories are created on save
    let path = dir.path().join("config").join("gltf-viewer").join("settings.ini");

    let mut renderer = RendererState::default();
    renderer.renderer = Backend::Rasterizer;
    renderer.environment.kind = EnvKind::SolidColor;
    renderer.environment.solid_color = [0.25, 0.5, 1.0];
    renderer.path_tracer.max_depth = 7;
    renderer.tone_map.exposure = 1.5;
    renderer.denoiser = DenoiserKind::Atrous;
    renderer.raster.wireframe = true;
    renderer.last_hdr_file = Some(dir.path().join("studio.hdr"));

    let mut window = WindowState::default();
    window.width = 1280.0;
    window.add_recent(dir.path().join("a.glb"));
    window.add_recent(dir.path().join("b.gltf"));

    let camera = CameraState {
        eye: [1.0, 2.0, 3.0],
        target: [0.0, 0.5, 0.0],
        fov_y_degrees: 60.0,
    };

    let mut store = IniStore::new();
    store.set(&renderer).expect("Failed to store renderer state");
    store.set(&window).expect("Failed to store window state");
    store.set(&camera).expect("Failed to store camera state");
    store.save(&path).expect("Failed to save settings");

    let text = std::fs::read_to_string(&path).expect("Failed to read settings");
    assert!(text.contains("[ElementRenderer][State]"));
    assert!(text.contains("renderer=Rasterizer"));
    assert!(text.contains("raster.wireframe=1"));

    let loaded = IniStore::load(&path).expect("Failed to load settings");
    assert_eq!(loaded.get::<RendererState>(), renderer);
    assert_eq!(loaded.get::<WindowState>(), window);
    assert_eq!(loaded.get::<CameraState>(), camera);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = IniStore::load(&dir.path().join("absent.ini")).expect("Missing file is not an error");
    assert_eq!(store.get::<RendererState>(), RendererState::default());
    assert_eq!(store.get::<WindowState>(), WindowState::default());
}

#[test]
fn test_hand_edited_file_and_cli_overrides() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("settings.ini");
    std::fs::write(
        &path,
        "; edited by hand\n\
         [ElementRenderer][State]\n\
         path_tracer.max_frames=500\n\
         path_tracer.max_depth=banana\n\
         tone_map.gamma=2.4\n\
         no_such_key=1\n",
    )
    .expect("Failed to write settings");

    let store = IniStore::load(&path).expect("Failed to load settings");
    let mut state: RendererState = store.get();
    assert_eq!(state.path_tracer.max_frames, 500);
    assert_eq!(state.path_tracer.max_depth, RendererState::default().path_tracer.max_depth);
    assert_eq!(state.tone_map.gamma, 2.4);

    // command line wins for the session
    Options::parse(["--maxFrames", "10", "--raster", "--hdr", "sky.hdr"]).apply(&mut state);
    assert_eq!(state.path_tracer.max_frames, 10);
    assert_eq!(state.renderer, Backend::Rasterizer);
    assert_eq!(state.environment.kind, EnvKind::Hdr);
    assert_eq!(state.tone_map.gamma, 2.4);
}
