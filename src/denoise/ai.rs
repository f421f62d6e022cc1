//! AI ray-reconstruction denoiser.
//!
//! The network lives in an external runtime behind [`ReconstructionRuntime`].
//! Every frame the runtime is asked for its preferred render size for the
//! current output size; a change reinitializes it and the path tracer
//! follows the new size. Sub-pixel jitter follows a Halton(2,3) sequence.

use glam::Vec2;

use crate::gpu::{GBuffer, GpuContext};
use crate::util::sampling::halton_jitter;
use crate::util::{Error, Result};

/// Jitter sequence length.
pub const JITTER_PERIOD: u32 = 64;

/// Inputs handed to the runtime each frame.
pub struct ReconstructionInputs<'a> {
    /// Render-size G-buffer: color, albedo, normal+roughness, depth+motion
    pub guides: &'a GBuffer,
    pub jitter: Vec2,
    /// Accumulation was reset this frame
    pub reset: bool,
}

/// External AI reconstruction runtime.
pub trait ReconstructionRuntime: Send {
    fn name(&self) -> &str;

    /// Internal render size for `output`, or `None` if unsupported.
    fn optimal_render_size(&self, output: (u32, u32)) -> Option<(u32, u32)>;

    fn init(&mut self, ctx: &GpuContext, render: (u32, u32), output: (u32, u32)) -> Result<()>;

    /// Record the reconstruction; the full-size result goes to `output.denoised`.
    fn evaluate(&mut self, ctx: &GpuContext, encoder: &mut wgpu::CommandEncoder, inputs: &ReconstructionInputs, output: &GBuffer) -> Result<()>;
}

pub struct AiDenoiser {
    runtime: Option<Box<dyn ReconstructionRuntime>>,
    render_size: Option<(u32, u32)>,
    output_size: Option<(u32, u32)>,
    unavailable: Option<String>,
}

impl AiDenoiser {
    /// A denoiser without a runtime reports itself unavailable.
    pub fn new(runtime: Option<Box<dyn ReconstructionRuntime>>) -> Self {
        let unavailable = runtime
            .is_none()
            .then(|| Error::DenoiserUnavailable("no AI reconstruction runtime registered".into()).to_string());
        Self {
            runtime,
            render_size: None,
            output_size: None,
            unavailable,
        }
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    /// Size the path tracer should render at (the output size until initialized).
    pub fn render_size(&self) -> Option<(u32, u32)> {
        self.render_size
    }

    /// Re-query the runtime for `output`. Returns the render size when it
    /// changed, reinitializing the runtime; a failure disables the denoiser.
    pub fn update_size(&mut self, ctx: &GpuContext, output: (u32, u32)) -> Option<(u32, u32)> {
        let render = self.query_render_size(output)?;
        if self.render_size == Some(render) && self.output_size == Some(output) {
            return None;
        }
        let runtime = self.runtime.as_mut()?;
        ctx.wait_idle();
        if let Err(e) = runtime.init(ctx, render, output) {
            self.mark_unavailable(e.to_string());
            return None;
        }
        log::info!(
            "{} initialized: render {}x{} -> output {}x{}",
            runtime.name(),
            render.0,
            render.1,
            output.0,
            output.1
        );
        self.render_size = Some(render);
        self.output_size = Some(output);
        Some(render)
    }

    /// Runtime's render size for `output`; an unsupported size disables the denoiser.
    fn query_render_size(&mut self, output: (u32, u32)) -> Option<(u32, u32)> {
        if !self.is_available() {
            return None;
        }
        let runtime = self.runtime.as_ref()?;
        match runtime.optimal_render_size(output) {
            Some(render) => Some(render),
            None => {
                let reason = format!("{} does not support {}x{}", runtime.name(), output.0, output.1);
                self.mark_unavailable(reason);
                None
            }
        }
    }

    pub fn jitter(frame: u32) -> Vec2 {
        halton_jitter(frame, JITTER_PERIOD)
    }

    pub fn denoise(
        &mut self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &ReconstructionInputs,
        output: &GBuffer,
    ) -> bool {
        if !self.is_available() {
            return false;
        }
        let Some(runtime) = self.runtime.as_mut() else { return false; };
        match runtime.evaluate(ctx, encoder, inputs, output) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("AI denoiser failed: {e}");
                false
            }
        }
    }

    pub fn deinit(&mut self) {
        self.render_size = None;
        self.output_size = None;
    }

    fn mark_unavailable(&mut self, reason: String) {
        log::warn!("AI denoiser unavailable: {reason}");
        self.unavailable = Some(reason);
        self.render_size = None;
    }
}
