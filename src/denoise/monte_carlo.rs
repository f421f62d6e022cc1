//! One-shot Monte-Carlo denoiser running on an external device.
//!
//! Color, albedo and normal are copied into mappable staging buffers,
//! read back, handed to the [`ExternalDenoiseDevice`] and the result is
//! written into the G-buffer's `denoised` buffer. The displayed image then
//! switches to the denoised output until the next invalidation.

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::gpu::{GBuffer, GpuContext};
use crate::util::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloSettings {
    pub auto_denoise: bool,
    /// Frames between automatic runs
    pub interval: u32,
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            auto_denoise: false,
            interval: 100,
        }
    }
}

/// Guide images read back from the G-buffer.
pub struct ExternalImages {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Vec4>,
    pub albedo: Vec<Vec4>,
    pub normal: Vec<Vec4>,
}

/// External (OptiX-style) denoiser device.
pub trait ExternalDenoiseDevice: Send {
    fn name(&self) -> &str;

    /// Denoised color, one texel per pixel.
    fn denoise(&mut self, images: &ExternalImages) -> Result<Vec<Vec4>>;
}

pub struct MonteCarloDenoiser {
    device: Option<Box<dyn ExternalDenoiseDevice>>,
    pub settings: MonteCarloSettings,
    showing_denoised: bool,
    last_run_frame: Option<u32>,
}

impl MonteCarloDenoiser {
    pub fn new(device: Option<Box<dyn ExternalDenoiseDevice>>, settings: MonteCarloSettings) -> Self {
        Self {
            device,
            settings,
            showing_denoised: false,
            last_run_frame: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }

    /// The display should read `denoised` instead of `accumulation`.
    pub fn showing_denoised(&self) -> bool {
        self.showing_denoised
    }

    /// Accumulation restarted; the denoised image is stale.
    pub fn reset(&mut self) {
        self.showing_denoised = false;
        self.last_run_frame = None;
    }

    /// Auto-denoise is due at accumulation frame `frame`.
    pub fn should_run(&self, frame: u32) -> bool {
        self.is_available()
            && self.settings.auto_denoise
            && self.settings.interval > 0
            && frame > 0
            && frame % self.settings.interval == 0
            && self.last_run_frame != Some(frame)
    }

    /// Read back the guides, denoise and upload the result. Blocks on the device.
    #[tracing::instrument(skip_all)]
    pub fn denoise_now(&mut self, ctx: &GpuContext, gbuffer: &GBuffer, frame: u32) -> Result<()> {
        let Some(device) = self.device.as_mut() else {
            return Err(Error::DenoiserUnavailable("no external denoise device registered".into()));
        };

        let (width, height) = gbuffer.size();
        let images = ExternalImages {
            width,
            height,
            color: read_texels(ctx, &gbuffer.accumulation, gbuffer.pixel_count())?,
            albedo: read_texels(ctx, &gbuffer.albedo, gbuffer.pixel_count())?,
            normal: read_texels(ctx, &gbuffer.normal_roughness, gbuffer.pixel_count())?,
        };
        let result = device.denoise(&images)?;
        if result.len() as u64 != gbuffer.pixel_count() {
            return Err(Error::DenoiserUnavailable(format!(
                "{} returned {} texels for {}x{}",
                device.name(),
                result.len(),
                width,
                height
            )));
        }
        ctx.queue.write_buffer(&gbuffer.denoised, 0, bytemuck::cast_slice(&result));
        self.showing_denoised = true;
        self.last_run_frame = Some(frame);
        log::info!("{} denoised frame {frame}", device.name());
        Ok(())
    }
}

/// Copy a vec4 storage buffer into host memory.
fn read_texels(ctx: &GpuContext, source: &wgpu::Buffer, texels: u64) -> Result<Vec<Vec4>> {
    let size = texels * 16;
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("mc_denoise_staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("mc_denoise_readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    ctx.wait_idle();
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(Error::DenoiserUnavailable(format!("readback failed: {e}"))),
        Err(_) => return Err(Error::DenoiserUnavailable("readback was dropped".into())),
    }
    let texels = bytemuck::cast_slice::<u8, Vec4>(&slice.get_mapped_range()).to_vec();
    staging.unmap();
    Ok(texels)
}
