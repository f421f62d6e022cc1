//! glTF Viewer - progressive path tracer and rasterizer for .gltf/.glb files

mod app;
mod camera;
mod panels;
mod viewport;

use anyhow::Result;
use tracing_subscriber::prelude::*;

use crate::cli::Options;
use crate::settings::{IniStore, WindowState};

/// Run the viewer.
pub fn run(options: Options) -> Result<()> {
    env_logger::init();

    let trace_guard = init_tracing();

    // Friendly panic handler for GPU errors
    std::panic::set_hook(Box::new(|info| {
        let msg = info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("Unknown error");

        if msg.contains("wgpu") || msg.contains("Buffer") || msg.contains("shader") {
            eprintln!("\n[GPU Error] {}", msg);
            eprintln!("\nThe GPU rejected a resource or shader. Try RUST_LOG=debug for details.");
        } else {
            eprintln!("\n[Error] {}", msg);
            if let Some(loc) = info.location() {
                eprintln!("  at {}:{}:{}", loc.file(), loc.line(), loc.column());
            }
        }
    }));

    for flag in &options.ignored {
        log::debug!("Ignored command-line flag {flag}");
    }

    let settings_path = IniStore::default_path();
    let store = match settings_path.as_deref().map(IniStore::load) {
        Some(Ok(store)) => store,
        Some(Err(e)) => {
            log::warn!("Could not read settings, using defaults: {e}");
            IniStore::new()
        }
        None => IniStore::new(),
    };
    let window: WindowState = store.get();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([window.width, window.height])
            .with_title("glTF Viewer")
            .with_drag_and_drop(true),
        renderer: eframe::Renderer::Wgpu,
        wgpu_options: egui_wgpu::WgpuConfiguration {
            wgpu_setup: egui_wgpu::WgpuSetup::CreateNew(egui_wgpu::WgpuSetupCreateNew {
                device_descriptor: std::sync::Arc::new(crate::gpu::device_descriptor),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    };

    eframe::run_native(
        "glTF Viewer",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(app::ViewerApp::new(
                cc,
                options,
                store,
                settings_path,
                trace_guard,
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run: {}", e))
}

fn init_tracing() -> Option<tracing_chrome::FlushGuard> {
    if std::env::var("GLTF_VIEWER_TRACE").ok().as_deref() != Some("1") {
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();

    let subscriber = tracing_subscriber::registry().with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }

    Some(guard)
}
