//! WGSL sources.
//!
//! Shared modules are concatenated in dependency order by the `*_source`
//! functions; each kernel file assumes everything before it is in scope.

use crate::gpu::shader_cache::compose;

/// Frame info, PRNG and sampling policies
pub const COMMON: &str = include_str!("common.wgsl");
/// Scene tables (group 0), traversal and hit state
pub const SCENE: &str = include_str!("scene.wgsl");
/// Sky, HDR and solid-color emitters (group 1)
pub const ENVIRONMENT: &str = include_str!("environment.wgsl");

pub const PATHTRACE: &str = include_str!("pathtrace.wgsl");
pub const RASTER: &str = include_str!("raster.wgsl");
pub const RESOLVE: &str = include_str!("resolve.wgsl");
pub const ATROUS: &str = include_str!("atrous.wgsl");
pub const TONEMAP: &str = include_str!("tonemap.wgsl");
pub const SILHOUETTE: &str = include_str!("silhouette.wgsl");

pub fn pathtrace_source() -> String {
    compose(&[gltf_pbr::shader_lib::PBR, COMMON, SCENE, ENVIRONMENT, PATHTRACE])
}

pub fn raster_source() -> String {
    compose(&[gltf_pbr::shader_lib::PBR, COMMON, SCENE, ENVIRONMENT, RASTER])
}

pub fn resolve_source() -> String {
    compose(&[RESOLVE])
}

pub fn atrous_source() -> String {
    compose(&[ATROUS])
}

pub fn tonemap_source() -> String {
    compose(&[TONEMAP])
}

pub fn silhouette_source() -> String {
    compose(&[SILHOUETTE])
}
