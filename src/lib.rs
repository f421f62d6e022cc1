//! # glTF Viewer
//!
//! Progressive GPU path tracer and rasterizer for glTF 2.0 scenes.
//!
//! ## Modules
//!
//! - [`util`] - Error type, bounds, sampling math
//! - [`scene`] - Scene model, glTF import and GLB export, GPU scene descriptor
//! - [`accel`] - Two-level SAH BVH, acceleration cache, CPU traversal
//! - [`environment`] - Sky, HDR and solid-color emitters
//! - [`pathtracer`] - Accumulation, sampling policies, compute pass, CPU reference
//! - [`denoise`] - A-trous, AI reconstruction and Monte-Carlo denoisers
//! - [`raster`] - Rasterizer peer
//! - [`post`] - Tone mapping and selection silhouette
//! - [`gpu`] - Device resources, shader cache, G-buffer, profiler
//! - [`frame`] - Frame controller tying the above together
//! - [`picking`], [`loader`], [`settings`], [`cli`]
//!
//! ## Example
//!
//! ```ignore
//! use gltf_viewer::{loader, picking, scene::descriptor::Camera};
//!
//! let (scene, accel) = loader::load_scene("Box.glb".as_ref(), 1)?;
//! let camera = Camera::look_at(eye, target, glam::Vec3::Y, 0.8, 16.0 / 9.0);
//! let hit = picking::pick(&scene, &accel, &camera, (1280, 720), 640, 360);
//! ```

pub mod util;
pub mod scene;
pub mod accel;
pub mod environment;
pub mod pathtracer;
pub mod denoise;
pub mod raster;
pub mod post;
pub mod gpu;
pub mod shaders;
pub mod frame;
pub mod picking;
pub mod loader;
pub mod settings;
pub mod cli;

// Viewer application (optional, enabled with "viewer" feature)
#[cfg(feature = "viewer")]
pub mod viewer;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::frame::{Backend, DirtyFlags, FrameController, FrameStatus};
    pub use crate::scene::descriptor::{Camera, DebugMethod};
    pub use crate::scene::Scene;
    pub use crate::settings::{IniStore, RendererState};
    pub use crate::util::{Error, Result};
}
