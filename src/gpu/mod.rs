//! GPU resource pool shared by every backend.
//!
//! - [`GpuContext`]: device and queue handles, shader cache, deferred release
//! - [`GBuffer`]: accumulation image plus denoiser guides and display image
//! - [`ShaderCache`]: composed WGSL modules compiled inside a validation scope
//! - [`ComputeKernel`]: push-constant compute passes over the image
//! - [`Profiler`]: CPU wall time per named pass

pub mod gbuffer;
pub mod kernel;
pub mod profiler;
pub mod release;
pub mod shader_cache;

pub use gbuffer::GBuffer;
pub use kernel::ComputeKernel;
pub use profiler::{PassTiming, Profiler};
pub use release::DeferredRelease;
pub use shader_cache::ShaderCache;

use crate::util::{Error, Result};

/// Push-constant bytes the path tracer needs.
pub const MIN_PUSH_CONSTANT_BYTES: u32 = 64;

/// Storage buffers bound to the path-tracer kernel (scene + env + G-buffer).
pub const MIN_STORAGE_BUFFERS: u32 = 15;

/// Frames a retired resource is kept alive before it is dropped.
pub const FRAMES_IN_FLIGHT: u64 = 2;

/// Features the viewer asks for; anything the adapter lacks is left out.
pub fn wanted_features() -> wgpu::Features {
    wgpu::Features::PUSH_CONSTANTS | wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::FLOAT32_FILTERABLE
}

/// Device descriptor for `adapter`: the wanted features it supports and its own limits.
pub fn device_descriptor(adapter: &wgpu::Adapter) -> wgpu::DeviceDescriptor<'static> {
    let base_limits = if adapter.get_info().backend == wgpu::Backend::Gl {
        wgpu::Limits::downlevel_webgl2_defaults()
    } else {
        wgpu::Limits::default()
    };
    let supported = adapter.limits();
    wgpu::DeviceDescriptor {
        label: Some("gltf-viewer device"),
        required_features: wanted_features() & adapter.features(),
        required_limits: wgpu::Limits {
            max_storage_buffers_per_shader_stage: supported.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            max_push_constant_size: supported.max_push_constant_size.min(128),
            max_texture_array_layers: supported.max_texture_array_layers,
            max_texture_dimension_2d: supported.max_texture_dimension_2d.min(8192),
            ..base_limits
        },
        ..Default::default()
    }
}

/// Checks what the path-tracer kernel needs. The rasterizer has no such check.
pub fn check_path_tracer_support(features: wgpu::Features, limits: &wgpu::Limits) -> Result<()> {
    if !features.contains(wgpu::Features::PUSH_CONSTANTS) {
        return Err(Error::MissingCapability("push constants".into()));
    }
    if limits.max_push_constant_size < MIN_PUSH_CONSTANT_BYTES {
        return Err(Error::MissingCapability(format!(
            "{} bytes of push constants (have {})",
            MIN_PUSH_CONSTANT_BYTES, limits.max_push_constant_size
        )));
    }
    if limits.max_storage_buffers_per_shader_stage < MIN_STORAGE_BUFFERS {
        return Err(Error::MissingCapability(format!(
            "{} storage buffers per stage (have {})",
            MIN_STORAGE_BUFFERS, limits.max_storage_buffers_per_shader_stage
        )));
    }
    Ok(())
}

/// Run `f` inside a validation error scope. Any validation error becomes
/// [`Error::ShaderCompile`] tagged with `label`.
pub fn validated<T>(device: &wgpu::Device, label: &str, f: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(Error::ShaderCompile {
            label: label.to_string(),
            diagnostics: err.to_string(),
        }),
        None => Ok(value),
    }
}

/// Work-group count covering `size` pixels with `wg`-wide groups.
pub fn workgroups(size: u32, wg: u32) -> u32 {
    size.div_ceil(wg)
}

/// Device handles and the state every pass shares.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub shaders: ShaderCache,
    pub release: DeferredRelease<Retired>,
    /// Why the path tracer is off, if it is
    pub path_tracer_unsupported: Option<String>,
}

/// Resources replaced while a frame may still reference them.
pub enum Retired {
    GBuffer(GBuffer),
    Texture(wgpu::Texture),
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let path_tracer_unsupported = match check_path_tracer_support(device.features(), &device.limits()) {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Path tracer disabled: {e}");
                Some(e.to_string())
            }
        };
        Self {
            device,
            queue,
            shaders: ShaderCache::new(),
            release: DeferredRelease::new(FRAMES_IN_FLIGHT),
            path_tracer_unsupported,
        }
    }

    pub fn supports_path_tracer(&self) -> bool {
        self.path_tracer_unsupported.is_none()
    }

    pub fn supports_wireframe(&self) -> bool {
        self.device.features().contains(wgpu::Features::POLYGON_MODE_LINE)
    }

    /// Block until the queue is idle. Used before recreating resources.
    pub fn wait_idle(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("Device poll failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_check() {
        let limits = wgpu::Limits {
            max_push_constant_size: 128,
            max_storage_buffers_per_shader_stage: 16,
            ..wgpu::Limits::default()
        };
        assert!(check_path_tracer_support(wgpu::Features::PUSH_CONSTANTS, &limits).is_ok());
        assert!(matches!(
            check_path_tracer_support(wgpu::Features::empty(), &limits),
            Err(Error::MissingCapability(_))
        ));

        let few_buffers = wgpu::Limits {
            max_storage_buffers_per_shader_stage: 8,
            ..limits.clone()
        };
        assert!(check_path_tracer_support(wgpu::Features::PUSH_CONSTANTS, &few_buffers).is_err());
    }

    #[test]
    fn test_workgroups() {
        assert_eq!(workgroups(1, 8), 1);
        assert_eq!(workgroups(8, 8), 1);
        assert_eq!(workgroups(9, 8), 2);
    }
}
