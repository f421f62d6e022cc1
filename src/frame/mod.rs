//! Frame controller.
//!
//! Ties the scene descriptor, environment, the two backends, the denoiser
//! chain and post-processing into one per-frame schedule:
//!
//! 1. resize the render target if the AI denoiser changed its render size
//! 2. flush dirty flags (TLAS and table upload, sky uniform, invalidation)
//! 3. camera check and F increment ([`FrameTracker::begin_frame`])
//! 4. frame-info write, backend dispatch
//! 5. denoise, tone mapping, silhouette
//! 6. submit, then the Monte-Carlo hook and deferred release
//!
//! Per-frame failures never propagate: the frame is skipped and the
//! display keeps its previous image.

mod dirty;

pub use dirty::{diff_state, DirtyFlags, FrameTracker, Selection};

use std::path::Path;
use std::time::Instant;

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::accel::{AccelCache, AccelGpuData};
use crate::denoise::{
    AiDenoiser, AtrousDenoiser, DenoiseFrame, DenoiserChain, DenoiserKind, ExternalDenoiseDevice, MonteCarloDenoiser,
    ReconstructionRuntime,
};
use crate::environment::{EnvKind, Environment, EnvironmentGpu, HdrEnvironment};
use crate::gpu::{GBuffer, GpuContext, Profiler, Retired};
use crate::pathtracer::{Accumulation, AdaptiveSamples, PathTracerPass, PtPushConstants};
use crate::picking::{self, PickHit};
use crate::post::{SilhouettePass, ToneMapPass};
use crate::raster::Rasterizer;
use crate::scene::descriptor::{Camera, DebugMethod, FrameInfo, SceneDescriptor, FRAME_FLAG_JITTER};
use crate::scene::{self, Scene};
use crate::settings::RendererState;
use crate::util::Result;

/// Active renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Nothing is drawn; the display keeps its last image
    Empty,
    Rasterizer,
    #[default]
    PathTracer,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Empty, Backend::Rasterizer, Backend::PathTracer];

    pub fn label(self) -> &'static str {
        match self {
            Backend::Empty => "None",
            Backend::Rasterizer => "Rasterizer",
            Backend::PathTracer => "Path tracer",
        }
    }
}

/// Backend actually used for `requested`: the path tracer falls back to
/// the rasterizer when the adapter cannot run it.
pub fn choose_backend(requested: Backend, path_tracer_supported: bool) -> Backend {
    match requested {
        Backend::PathTracer if !path_tracer_supported => Backend::Rasterizer,
        b => b,
    }
}

/// Outcome of [`FrameController::render`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Path tracer accumulated frame F
    Accumulated(u32),
    Rasterized,
    /// F reached F_max; the display keeps the converged image
    Converged,
    /// Nothing was rendered (no backend, no TLAS or no pipeline)
    Skipped,
}

/// Optional external denoise runtimes.
#[derive(Default)]
pub struct ExternalDenoisers {
    pub ai: Option<Box<dyn ReconstructionRuntime>>,
    pub monte_carlo: Option<Box<dyn ExternalDenoiseDevice>>,
}

pub struct FrameController {
    state: RendererState,
    tracker: FrameTracker,

    scene: Scene,
    accel: AccelCache,
    generation: u64,
    /// (generation, scene version) of the tables on the GPU
    uploaded: Option<(u64, u64)>,

    environment: Environment,
    env_generation: u64,

    descriptor: SceneDescriptor,
    env_gpu: EnvironmentGpu,
    gbuffer_layout: wgpu::BindGroupLayout,
    /// Output-size G-buffer holding the display image
    output: GBuffer,
    /// Render-size G-buffer while the AI denoiser upscales
    render_target: Option<GBuffer>,

    path_tracer: PathTracerPass,
    rasterizer: Rasterizer,
    denoisers: DenoiserChain,
    tonemap: ToneMapPass,
    silhouette: SilhouettePass,

    adaptive: AdaptiveSamples,
    profiler: Profiler,
    prev_view_proj: Option<Mat4>,
    last_frame_start: Option<Instant>,
    last_status: FrameStatus,
    mouse: Option<(i32, i32)>,
}

impl FrameController {
    pub fn new(ctx: &mut GpuContext, state: RendererState, size: (u32, u32), externals: ExternalDenoisers) -> Self {
        let _span = tracing::info_span!("frame_controller_init").entered();
        let descriptor = SceneDescriptor::new(&ctx.device, &ctx.queue);
        let env_gpu = EnvironmentGpu::new(&ctx.device, &ctx.queue);
        let gbuffer_layout = GBuffer::create_layout(&ctx.device);
        let output = GBuffer::new(&ctx.device, &gbuffer_layout, size.0, size.1);

        let path_tracer = PathTracerPass::new(
            ctx,
            &descriptor.layout,
            &env_gpu.layout,
            &gbuffer_layout,
            state.path_tracer.reorder,
        );
        let rasterizer = Rasterizer::new(ctx, &descriptor.layout, &env_gpu.layout, &gbuffer_layout, state.raster.clone());
        let denoisers = DenoiserChain::new(
            AtrousDenoiser::new(ctx, &gbuffer_layout, state.atrous.clone()),
            AiDenoiser::new(externals.ai),
            MonteCarloDenoiser::new(externals.monte_carlo, state.monte_carlo.clone()),
        );
        let tonemap = ToneMapPass::new(ctx, &gbuffer_layout);
        let silhouette = SilhouettePass::new(ctx, &gbuffer_layout);

        let environment = Environment::new(state.environment.clone(), state.sky.clone());
        env_gpu.update_sky(&ctx.queue, &environment.sky);

        let pt = &state.path_tracer;
        let adaptive = AdaptiveSamples::new(pt.adaptive_samples, pt.target_fps, pt.max_samples);

        let mut this = Self {
            state: RendererState {
                denoiser: DenoiserKind::None,
                ..state.clone()
            },
            tracker: FrameTracker::new(pt.effective_max_frames()),
            scene: Scene::default(),
            accel: AccelCache::new(),
            generation: 0,
            uploaded: None,
            environment,
            env_generation: 0,
            descriptor,
            env_gpu,
            gbuffer_layout,
            output,
            render_target: None,
            path_tracer,
            rasterizer,
            denoisers,
            tonemap,
            silhouette,
            adaptive,
            profiler: Profiler::new(),
            prev_view_proj: None,
            last_frame_start: None,
            last_status: FrameStatus::Skipped,
            mouse: None,
        };
        this.state.renderer = choose_backend(state.renderer, ctx.supports_path_tracer());
        if this.denoisers.select(ctx, state.denoiser, size) {
            this.state.denoiser = state.denoiser;
        }
        this
    }

    /// Current (effective) renderer state. Edit a copy and hand it back
    /// through [`FrameController::apply_state`].
    pub fn state(&self) -> &RendererState {
        &self.state
    }

    /// Adopt `new`, raising the dirty flags its differences imply.
    /// Requests that cannot be honoured (unavailable denoiser or backend)
    /// are reverted in the stored state.
    pub fn apply_state(&mut self, ctx: &mut GpuContext, mut new: RendererState) -> DirtyFlags {
        new.renderer = choose_backend(new.renderer, ctx.supports_path_tracer());
        let flags = diff_state(&self.state, &new);

        if new.renderer != self.state.renderer {
            self.detach(self.state.renderer);
            log::info!("Renderer: {}", new.renderer.label());
        }
        if flags.contains(DirtyFlags::DENOISER) {
            if !self.denoisers.select(ctx, new.denoiser, self.output.size()) {
                new.denoiser = self.denoisers.active_kind();
            }
            if let Some(atrous) = self.denoisers.atrous_settings_mut() {
                *atrous = new.atrous.clone();
            }
            if let Some(mc) = self.denoisers.monte_carlo_mut() {
                mc.settings = new.monte_carlo.clone();
            }
        }
        if flags.contains(DirtyFlags::RASTER) {
            self.rasterizer.settings = new.raster.clone();
            self.rasterizer.invalidate_bundle();
        }
        if flags.contains(DirtyFlags::PIPELINES) {
            self.path_tracer.set_reorder(ctx, new.path_tracer.reorder);
        }
        if flags.contains(DirtyFlags::ENVIRONMENT) {
            self.environment.settings = new.environment.clone();
            self.environment.sky.set_params(new.sky.clone());
        }

        let pt = &new.path_tracer;
        self.adaptive.enabled = pt.adaptive_samples;
        self.adaptive.target_fps = pt.target_fps;
        if !pt.adaptive_samples || pt.max_samples != self.state.path_tracer.max_samples {
            self.adaptive.set_samples(pt.max_samples);
        }
        self.tracker.accumulation.set_max_frames(pt.effective_max_frames());

        self.state = new;
        self.tracker.on_scene_dirty(flags);
        flags
    }

    fn detach(&mut self, backend: Backend) {
        match backend {
            Backend::Rasterizer => self.rasterizer.invalidate_bundle(),
            Backend::PathTracer => self.tracker.accumulation.invalidate(),
            Backend::Empty => {}
        }
    }

    /// Restart accumulation on the next frame.
    pub fn invalidate_accumulation(&mut self) {
        self.tracker.invalidate_accumulation();
    }

    /// Record externally made changes.
    pub fn on_scene_dirty(&mut self, flags: DirtyFlags) {
        self.tracker.on_scene_dirty(flags);
    }

    /// Resize the output G-buffer. The old one is released once the
    /// frames that use it retire. Returns true if the size changed.
    pub fn on_viewport_resize(&mut self, ctx: &mut GpuContext, width: u32, height: u32) -> bool {
        let size = (width.max(1), height.max(1));
        if self.output.size() == size {
            return false;
        }
        log::debug!("Viewport resized to {}x{}", size.0, size.1);
        let fresh = GBuffer::new(&ctx.device, &self.gbuffer_layout, size.0, size.1);
        let old = std::mem::replace(&mut self.output, fresh);
        ctx.release.retire(Retired::GBuffer(old));
        self.tracker.selection.rearm();
        self.tracker.on_scene_dirty(DirtyFlags::VIEWPORT);
        true
    }

    /// Install a loaded scene. `accel` may have been built on the loader
    /// thread for `generation`; it is rebuilt if the generation is reused.
    pub fn set_scene(&mut self, scene: Scene, accel: AccelCache, generation: u64) {
        self.generation = generation.max(self.generation + 1);
        self.scene = scene;
        self.accel = accel;
        self.tracker.selection.set(None);
        self.tracker.on_scene_dirty(DirtyFlags::SCENE);
    }

    pub fn clear_scene(&mut self) {
        self.set_scene(Scene::default(), AccelCache::new(), 0);
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn accel(&self) -> &AccelCache {
        &self.accel
    }

    /// Show or hide one render node.
    pub fn set_render_node_visible(&mut self, render_node: usize, visible: bool) {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.set_visible(render_node, visible);
        });
    }

    /// Advance the active animation clip by `delta` seconds.
    pub fn animate(&mut self, delta: f32) -> bool {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.animate(delta);
        })
    }

    pub fn set_animation_time(&mut self, time: f32) -> bool {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.set_animation_time(time);
        })
    }

    pub fn reset_animation(&mut self) -> bool {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.reset_animation();
        })
    }

    pub fn set_active_animation(&mut self, index: usize) -> bool {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.set_active_animation(index);
        })
    }

    pub fn select_variant(&mut self, variant: Option<usize>) -> bool {
        edit_scene(&mut self.scene, &mut self.tracker, |s| {
            s.select_variant(variant);
        })
    }

    /// Write the current scene as GLB.
    pub fn save_scene(&self, path: &Path) -> Result<()> {
        scene::save_glb(&self.scene, path)
    }

    /// Make `hdr` the active environment and seed the firefly clamp from
    /// its integral.
    pub fn set_hdr(&mut self, ctx: &mut GpuContext, hdr: HdrEnvironment) {
        self.env_gpu.upload_hdr(&ctx.device, &ctx.queue, &hdr);
        self.environment.settings = self.state.environment.clone();
        self.environment.set_hdr(hdr);
        self.state.environment.kind = EnvKind::Hdr;
        self.state.path_tracer.firefly_clamp = self.environment.suggested_firefly_clamp();
        self.tracker.on_scene_dirty(DirtyFlags::ENVIRONMENT | DirtyFlags::ACCUMULATION);
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Environment generation; bumped whenever the emitter changes.
    pub fn env_generation(&self) -> u64 {
        self.env_generation
    }

    /// Closest render node under pixel `(x, y)` of the output.
    pub fn pick(&self, camera: &Camera, x: u32, y: u32) -> Option<PickHit> {
        picking::pick(&self.scene, &self.accel, camera, self.output.size(), x, y)
    }

    /// Pick and select. With auto-focus the focal distance follows the hit.
    pub fn select_at(&mut self, camera: &Camera, x: u32, y: u32) -> Option<PickHit> {
        let hit = self.pick(camera, x, y);
        self.select(hit.map(|h| h.node_id), hit.map(|h| h.distance));
        hit
    }

    pub fn select(&mut self, node: Option<u32>, hit_distance: Option<f32>) {
        if !self.tracker.selection.set(node) {
            return;
        }
        if let (true, Some(d)) = (self.state.path_tracer.auto_focus, hit_distance) {
            self.state.path_tracer.focal_distance = d;
        }
        self.invalidate_accumulation();
    }

    pub fn selected(&self) -> Option<u32> {
        self.tracker.selection.current()
    }

    /// Mouse position in output pixels, forwarded to the kernels.
    pub fn set_mouse(&mut self, mouse: Option<(i32, i32)>) {
        self.mouse = mouse;
    }

    pub fn accumulation(&self) -> &Accumulation {
        &self.tracker.accumulation
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn denoisers(&self) -> &DenoiserChain {
        &self.denoisers
    }

    pub fn rasterizer(&self) -> &Rasterizer {
        &self.rasterizer
    }

    pub fn output(&self) -> &GBuffer {
        &self.output
    }

    pub fn last_status(&self) -> FrameStatus {
        self.last_status
    }

    /// Why the path tracer cannot run, if it cannot.
    pub fn path_tracer_error(&self, ctx: &GpuContext) -> Option<String> {
        ctx.path_tracer_unsupported
            .clone()
            .or_else(|| self.path_tracer.last_error().map(str::to_string))
    }

    /// Recompile every pipeline from source. Failing pipelines keep their
    /// previous version; the first error is returned.
    pub fn reload_shaders(&mut self, ctx: &mut GpuContext) -> Result<()> {
        ctx.wait_idle();
        ctx.shaders.clear();
        let pt = self.path_tracer.rebuild(ctx, self.state.path_tracer.reorder);
        let raster = self.rasterizer.rebuild(ctx);
        self.invalidate_accumulation();
        pt.and(raster)
    }

    /// Render one frame.
    #[tracing::instrument(skip_all, fields(backend = ?self.state.renderer))]
    pub fn render(&mut self, ctx: &mut GpuContext, camera: &Camera) -> FrameStatus {
        let now = Instant::now();
        let interval = self.last_frame_start.replace(now).map(|t| now - t);

        self.profiler.begin_frame();
        self.ensure_render_target(ctx);
        self.flush_dirty(ctx);

        let status = match self.state.renderer {
            Backend::Empty => FrameStatus::Skipped,
            Backend::PathTracer => self.render_path_traced(ctx, camera),
            Backend::Rasterizer => self.render_rasterized(ctx, camera),
        };

        // frame time is only meaningful between two accumulating frames
        if let (FrameStatus::Accumulated(_), FrameStatus::Accumulated(_), Some(dt)) = (status, self.last_status, interval) {
            if self.adaptive.enabled {
                self.state.path_tracer.max_samples = self.adaptive.update(dt.as_secs_f32());
            }
        }

        self.prev_view_proj = Some(camera.view_proj());
        self.last_status = status;
        self.profiler.end_frame();
        ctx.release.advance();
        status
    }

    /// Follow the active denoiser's render size.
    fn ensure_render_target(&mut self, ctx: &mut GpuContext) {
        let output = self.output.size();
        if let Some(d) = self.denoisers.active_mut() {
            if d.update_size(ctx, output).is_some() {
                self.tracker.on_scene_dirty(DirtyFlags::VIEWPORT);
            }
        }
        let render = self.denoisers.active().map_or(output, |d| d.render_size(output));
        if render == output {
            if let Some(old) = self.render_target.take() {
                ctx.release.retire(Retired::GBuffer(old));
                self.tracker.selection.rearm();
                self.tracker.on_scene_dirty(DirtyFlags::VIEWPORT);
            }
        } else if self.render_target.as_ref().map(GBuffer::size) != Some(render) {
            log::debug!("Render target {}x{} for output {}x{}", render.0, render.1, output.0, output.1);
            let target = GBuffer::new(&ctx.device, &self.gbuffer_layout, render.0, render.1);
            if let Some(old) = self.render_target.replace(target) {
                ctx.release.retire(Retired::GBuffer(old));
            }
            self.tracker.on_scene_dirty(DirtyFlags::VIEWPORT);
        }
    }

    fn flush_dirty(&mut self, ctx: &mut GpuContext) {
        let flags = self.tracker.flush();
        if flags.contains(DirtyFlags::SCENE) {
            self.sync_scene(ctx);
            self.rasterizer.invalidate_bundle();
        }
        if flags.contains(DirtyFlags::ENVIRONMENT) {
            self.environment.sync();
            self.env_gpu.update_sky(&ctx.queue, &self.environment.sky);
            self.env_generation += 1;
        }
    }

    /// Bring the TLAS and the scene tables up to date.
    fn sync_scene(&mut self, ctx: &mut GpuContext) {
        self.profiler.scope("accel_update", || self.accel.update(&self.scene, self.generation));
        let key = (self.generation, self.scene.version);
        if self.uploaded == Some(key) {
            return;
        }
        // tables are replaced only while nothing is in flight
        ctx.wait_idle();
        let data = AccelGpuData::build(&self.accel, &self.scene);
        self.descriptor.upload(&ctx.device, &ctx.queue, &self.scene, &data);
        self.uploaded = Some(key);
    }

    fn frame_info(&self, camera: &Camera, size: (u32, u32), jitter: bool) -> FrameInfo {
        let prev = self.prev_view_proj.unwrap_or_else(|| camera.view_proj());
        let mut info = FrameInfo::new(camera, prev, size);
        let env = &self.environment.settings;
        info.env_kind = self.environment.effective_kind().code();
        info.env_color = (Vec3::from(env.solid_color) * env.intensity).extend(1.0).to_array();
        info.env = [env.intensity, env.rotation, env.blur, self.environment.active().integral()];
        let pt = &self.state.path_tracer;
        info.rr_min_depth = pt.rr_min_depth;
        info.shadow_t_min = pt.shadow_t_min;
        info.flags = if jitter { FRAME_FLAG_JITTER } else { 0 };
        info
    }

    fn render_path_traced(&mut self, ctx: &mut GpuContext, camera: &Camera) -> FrameStatus {
        // an empty or fully hidden scene still dispatches: every ray misses
        if !self.path_tracer.is_functional() {
            return FrameStatus::Skipped;
        }
        self.tracker.accumulation
            .set_max_frames(self.state.path_tracer.effective_max_frames());
        let Some((frame, object_ids)) = self.tracker.begin_frame(&camera.view, camera.fov_y) else {
            return FrameStatus::Converged;
        };

        let ai_active = self.denoisers.active_kind() == DenoiserKind::AiReconstruction;
        let jitter = if ai_active { AiDenoiser::jitter(frame) } else { Vec2::ZERO };
        let target = self.render_target.as_ref().unwrap_or(&self.output);
        let mut info = self.frame_info(camera, target.size(), ai_active);
        self.descriptor.write_frame_info(&ctx.queue, &mut info);

        let push = PtPushConstants::new(&self.state.path_tracer, frame as i32, self.tracker.accumulation.total_samples(), jitter)
            .with_selection(object_ids)
            .with_mouse(self.mouse);

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });
        let dispatched = self.profiler.scope("pathtrace", || {
            self.path_tracer.dispatch(
                &mut encoder,
                self.descriptor.bind_group(),
                self.env_gpu.bind_group(),
                target,
                &push,
            )
        });
        if !dispatched {
            self.tracker.accumulation.invalidate();
            return FrameStatus::Skipped;
        }
        self.tracker.accumulation.end_frame(push.max_samples);

        let denoise_frame = DenoiseFrame {
            guides: target,
            output: &self.output,
            jitter,
            reset: frame == 0,
        };
        let gpu: &GpuContext = ctx;
        let from_denoised = self.profiler.scope("denoise", || match self.denoisers.active_mut() {
            Some(d) => d.denoise(gpu, &mut encoder, &denoise_frame),
            None => false,
        });

        let upscaled = self.render_target.is_some();
        // an upscaling denoiser that failed leaves the output accumulation empty
        if !upscaled || from_denoised {
            self.post_process(&mut encoder, from_denoised, !upscaled);
        }
        ctx.queue.submit(Some(encoder.finish()));

        if self.run_monte_carlo(ctx, frame) {
            let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mc_display_encoder"),
            });
            self.post_process(&mut encoder, true, !upscaled);
            ctx.queue.submit(Some(encoder.finish()));
        }
        FrameStatus::Accumulated(frame)
    }

    /// Auto-denoise on the external device after the frame was submitted.
    /// Returns true if the denoised buffer was refreshed.
    fn run_monte_carlo(&mut self, ctx: &GpuContext, frame: u32) -> bool {
        if self.denoisers.active_kind() != DenoiserKind::MonteCarlo {
            return false;
        }
        let Some(mc) = self.denoisers.monte_carlo_mut() else { return false; };
        if !mc.should_run(frame) {
            return false;
        }
        let output = &self.output;
        match self.profiler.scope("denoise_mc", || mc.denoise_now(ctx, output, frame)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Monte-Carlo denoise failed: {e}");
                false
            }
        }
    }

    /// Run the Monte-Carlo denoiser now, regardless of the interval.
    pub fn denoise_now(&mut self, ctx: &mut GpuContext) -> bool {
        let frame = self.tracker.accumulation.frame().max(0) as u32;
        let Some(mc) = self.denoisers.monte_carlo_mut() else { return false; };
        if let Err(e) = mc.denoise_now(ctx, &self.output, frame) {
            log::warn!("Monte-Carlo denoise failed: {e}");
            return false;
        }
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mc_display_encoder"),
        });
        self.post_process(&mut encoder, true, self.render_target.is_none());
        ctx.queue.submit(Some(encoder.finish()));
        true
    }

    fn render_rasterized(&mut self, ctx: &mut GpuContext, camera: &Camera) -> FrameStatus {
        let size = self.output.size();
        let mut info = self.frame_info(camera, size, false);
        self.descriptor.write_frame_info(&ctx.queue, &mut info);

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });
        let drawn = self.rasterizer.render(
            ctx,
            &mut encoder,
            &self.scene,
            &self.descriptor,
            self.env_gpu.bind_group(),
            self.env_generation,
            &self.output,
            self.state.path_tracer.debug_method,
            &mut self.profiler,
        );
        if !drawn {
            return FrameStatus::Skipped;
        }
        self.post_process(&mut encoder, false, true);
        ctx.queue.submit(Some(encoder.finish()));
        FrameStatus::Rasterized
    }

    fn post_process(&mut self, encoder: &mut wgpu::CommandEncoder, from_denoised: bool, silhouette: bool) {
        let passthrough = self.state.path_tracer.debug_method != DebugMethod::None;
        self.profiler.scope("tonemap", || {
            self.tonemap
                .run(encoder, &self.output, &self.state.tone_map, from_denoised, passthrough)
        });
        // object IDs exist at render size only; skip while upscaling
        let Some(selected) = self.tracker.selection.current().filter(|_| silhouette) else { return; };
        self.profiler.scope("silhouette", || {
            self.silhouette
                .run(encoder, &self.output, selected, self.state.silhouette_color)
        });
    }
}

/// Run a scene mutation; a version change marks the scene dirty.
fn edit_scene(scene: &mut Scene, tracker: &mut FrameTracker, edit: impl FnOnce(&mut Scene)) -> bool {
    let version = scene.version;
    edit(scene);
    let changed = scene.version != version;
    if changed {
        tracker.on_scene_dirty(DirtyFlags::SCENE);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use gltf_pbr::MaterialParams;

    #[test]
    fn test_scene_edits_restart_accumulation_only_when_they_change_something() {
        let mut scene = scene::cube_scene(MaterialParams::default(), &[Mat4::IDENTITY]);
        scene.variants = vec!["a".into()];
        let mut tracker = FrameTracker::new(16);
        tracker.flush();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y);
        for _ in 0..3 {
            tracker.begin_frame(&view, 0.8);
        }
        assert_eq!(tracker.accumulation.frame(), 2);

        // no animation: nothing to do
        assert!(!edit_scene(&mut scene, &mut tracker, |s| {
            s.animate(0.1);
        }));
        assert!(tracker.pending().is_empty());

        assert!(edit_scene(&mut scene, &mut tracker, |s| {
            s.select_variant(Some(0));
        }));
        assert!(tracker.pending().contains(DirtyFlags::SCENE));
        tracker.flush();
        assert_eq!(tracker.begin_frame(&view, 0.8).map(|(f, _)| f), Some(0));
    }

    #[test]
    fn test_path_tracer_falls_back_without_support() {
        assert_eq!(choose_backend(Backend::PathTracer, true), Backend::PathTracer);
        assert_eq!(choose_backend(Backend::PathTracer, false), Backend::Rasterizer);
        assert_eq!(choose_backend(Backend::Rasterizer, false), Backend::Rasterizer);
        assert_eq!(choose_backend(Backend::Empty, false), Backend::Empty);
    }

    #[test]
    fn test_backend_serializes_by_name() {
        assert_eq!(Backend::default(), Backend::PathTracer);
        let json = serde_json::to_string(&Backend::Rasterizer).unwrap();
        assert_eq!(json, "\"Rasterizer\"");
        let back: Backend = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Backend::Rasterizer);
        let labels: std::collections::HashSet<_> = Backend::ALL.iter().map(|b| b.label()).collect();
        assert_eq!(labels.len(), Backend::ALL.len());
    }
}
