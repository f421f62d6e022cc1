//! glTF Viewer - open a .gltf/.glb scene and path trace it progressively.

use gltf_viewer::cli::Options;

fn main() -> anyhow::Result<()> {
    if std::env::args().skip(1).any(|a| a == "--version" || a == "-V") {
        println!(
            "gltf-viewer {} (built {} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GLTF_VIEWER_BUILD_DATE"),
            env!("GLTF_VIEWER_BUILD_TIME")
        );
        return Ok(());
    }
    gltf_viewer::viewer::run(Options::from_env())
}
