//! Main application state and UI

use std::path::{Path, PathBuf};

use egui::{CentralPanel, RichText, SidePanel, TopBottomPanel};

use super::camera::OrbitCamera;
use super::panels::{self, Capabilities, PanelAction, Playback};
use super::viewport::{Viewport, ViewportInput};
use crate::cli::Options;
use crate::frame::{ExternalDenoisers, FrameController, FrameStatus};
use crate::gpu::GpuContext;
use crate::loader::{self, FileKind, LoaderHandle, LoaderResult};
use crate::settings::{CameraState, IniStore, RendererState, WindowState};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Main viewer application
pub struct ViewerApp {
    viewport: Viewport,
    /// `None` when eframe did not give us a wgpu device
    gpu: Option<(GpuContext, FrameController)>,
    loader: LoaderHandle,

    store: IniStore,
    settings_path: Option<PathBuf>,
    window: WindowState,

    current_file: Option<PathBuf>,
    /// Frame the camera on the next scene that arrives
    fit_on_load: bool,
    status_message: String,
    node_filter: String,
    playback: Playback,

    _trace_guard: Option<tracing_chrome::FlushGuard>,
}

impl ViewerApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        options: Options,
        store: IniStore,
        settings_path: Option<PathBuf>,
        trace_guard: Option<tracing_chrome::FlushGuard>,
    ) -> Self {
        let mut state: RendererState = store.get();
        options.apply(&mut state);
        let window: WindowState = store.get();
        let camera: CameraState = store.get();

        let size = (window.width.max(1.0) as u32, window.height.max(1.0) as u32);
        let gpu = cc.wgpu_render_state.as_ref().map(|rs| {
            let mut ctx = GpuContext::new(rs.device.clone(), rs.queue.clone());
            let frame = FrameController::new(&mut ctx, state.clone(), size, ExternalDenoisers::default());
            (ctx, frame)
        });
        if gpu.is_none() {
            log::error!("No wgpu render state; the viewport stays empty");
        }

        let mut app = Self {
            viewport: Viewport::new(OrbitCamera::new(&camera)),
            gpu,
            loader: LoaderHandle::spawn(),
            store,
            settings_path,
            window,
            current_file: None,
            fit_on_load: options.scene.is_some(),
            status_message: "Ready".into(),
            node_filter: String::new(),
            playback: Playback::default(),
            _trace_guard: trace_guard,
        };

        // CLI file first, then the last session's file
        let scene = options
            .scene
            .clone()
            .or_else(|| app.window.last_file.clone().filter(|p| p.exists()));
        if let Some(path) = scene {
            app.request_load(path);
        }
        let hdr = options.hdr.clone().or_else(|| {
            (state.environment.kind == crate::environment::EnvKind::Hdr)
                .then(|| state.last_hdr_file.clone())
                .flatten()
                .filter(|p| p.exists())
        });
        if let Some(path) = hdr {
            app.request_load(path);
        }
        app
    }

    fn request_load(&mut self, path: PathBuf) {
        let kind = loader::classify(&path);
        if self.loader.request(path.clone()) {
            self.status_message = format!("Loading {}...", file_name(&path));
        } else {
            self.status_message = format!("Unsupported file: {}", file_name(&path));
            return;
        }
        if kind == Some(FileKind::Scene) {
            self.current_file = Some(path);
        }
    }

    fn open_file_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("glTF", &["gltf", "glb"])
            .pick_file()
        {
            self.fit_on_load = true;
            self.request_load(path);
        }
    }

    fn load_hdr_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Radiance HDR", &["hdr"])
            .pick_file()
        {
            self.request_load(path);
        }
    }

    fn save_as_dialog(&mut self) {
        let Some((_, frame)) = &self.gpu else { return; };
        let default_name = self
            .current_file
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| format!("{}.glb", s.to_string_lossy()))
            .unwrap_or_else(|| "scene.glb".to_string());

        if let Some(path) = rfd::FileDialog::new()
            .add_filter("glTF binary", &["glb"])
            .set_file_name(&default_name)
            .save_file()
        {
            self.status_message = match frame.save_scene(&path) {
                Ok(()) => format!("Saved {}", file_name(&path)),
                Err(e) => {
                    log::error!("Save failed: {e}");
                    format!("Save failed: {e}")
                }
            };
        }
    }

    /// Install finished loads (non-blocking).
    fn process_loader_results(&mut self) {
        while let Some(result) = self.loader.try_recv() {
            let Some((ctx, frame)) = &mut self.gpu else { continue; };
            match result {
                LoaderResult::SceneReady {
                    path,
                    scene,
                    accel,
                    generation,
                } => {
                    let bounds = scene.bounds();
                    frame.set_scene(*scene, *accel, generation);
                    if std::mem::take(&mut self.fit_on_load) {
                        // the file's first camera wins over framing the bounds
                        match frame.scene().camera_view(0) {
                            Some(view) => self.viewport.camera.apply_view(&view),
                            None => self.viewport.camera.fit(&bounds),
                        }
                    }
                    self.status_message = format!(
                        "Loaded {} ({} nodes)",
                        file_name(&path),
                        frame.scene().render_nodes.len()
                    );
                    self.window.add_recent(path.clone());
                    self.current_file = Some(path);
                }
                LoaderResult::HdrReady { path, hdr } => {
                    frame.set_hdr(ctx, *hdr);
                    let mut state = frame.state().clone();
                    state.last_hdr_file = Some(path.clone());
                    frame.apply_state(ctx, state);
                    self.status_message = format!("Loaded environment {}", file_name(&path));
                }
                LoaderResult::Failed { path, error } => {
                    log::error!("Failed to load {}: {error}", path.display());
                    self.status_message = format!("Failed to load {}: {error}", file_name(&path));
                    if self.current_file.as_ref() == Some(&path) {
                        self.current_file = None;
                    }
                }
            }
        }
    }

    fn menu_bar(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let recent: Vec<PathBuf> = self.window.recent_files().into_iter().cloned().collect();
        let has_scene = self.gpu.as_ref().is_some_and(|(_, f)| !f.scene().is_empty());

        egui::MenuBar::new().ui(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open glTF...").clicked() {
                    self.open_file_dialog();
                    ui.close();
                }
                if ui.button("Load HDR...").clicked() {
                    self.load_hdr_dialog();
                    ui.close();
                }
                if ui.add_enabled(has_scene, egui::Button::new("Save As GLB...")).clicked() {
                    self.save_as_dialog();
                    ui.close();
                }

                if !recent.is_empty() {
                    ui.menu_button("Recent", |ui| {
                        for path in &recent {
                            if ui.button(file_name(path)).clicked() {
                                self.fit_on_load = true;
                                self.request_load(path.clone());
                                ui.close();
                            }
                        }
                        ui.separator();
                        if ui.button("Clear Recent").clicked() {
                            self.window.recent_files.clear();
                            ui.close();
                        }
                    });
                }

                ui.separator();
                if ui.button("Exit").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });

            ui.menu_button("View", |ui| {
                if ui.button("Fit Scene (F)").clicked() {
                    self.fit_scene();
                    ui.close();
                }
                if ui.button("Reset Camera (H)").clicked() {
                    self.viewport.camera.reset();
                    ui.close();
                }
                ui.separator();
                if ui.button("Reload Shaders").clicked() {
                    if let Some((gpu, frame)) = &mut self.gpu {
                        self.status_message = match frame.reload_shaders(gpu) {
                            Ok(()) => "Shaders reloaded".into(),
                            Err(e) => format!("Shader reload failed: {e}"),
                        };
                    }
                    ui.close();
                }
            });
        });
    }

    fn fit_scene(&mut self) {
        if let Some((_, frame)) = &self.gpu {
            let bounds = frame.scene().bounds();
            if bounds.is_empty() {
                self.status_message = "No scene bounds".into();
            } else {
                self.viewport.camera.fit(&bounds);
                self.status_message = format!("Fit to scene (radius: {:.2})", bounds.radius());
            }
        }
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        let Some((gpu, frame)) = &mut self.gpu else {
            ui.label("No GPU");
            return;
        };
        let mut state = frame.state().clone();
        let mut actions = Vec::new();

        egui::ScrollArea::vertical().show(ui, |ui| {
            ui.heading("Scene");
            match &self.current_file {
                Some(path) => ui.label(format!("File: {}", file_name(path))),
                None => ui.label("No file loaded"),
            };
            let caps = Capabilities {
                path_tracer_error: frame.path_tracer_error(gpu),
                wireframe: gpu.supports_wireframe(),
                denoisers: frame.denoisers(),
                has_hdr: frame.environment().hdr().is_some(),
            };
            ui.separator();
            panels::renderer_section(ui, &mut state, &caps);
            panels::environment_section(ui, &mut state, &caps, &mut actions);
            panels::path_tracer_section(ui, &mut state);
            panels::denoiser_section(ui, &mut state, &caps, &mut actions);
            panels::raster_section(ui, &mut state, &caps);
            panels::tone_map_section(ui, &mut state);
            ui.separator();
            panels::scene_section(ui, frame.scene(), &mut self.playback, &mut actions);
            panels::node_list(ui, frame.scene(), frame.selected(), &mut self.node_filter, &mut actions);
        });

        if &state != frame.state() {
            frame.apply_state(gpu, state);
        }
        for action in actions {
            match action {
                PanelAction::LoadHdr => self.load_hdr_dialog(),
                PanelAction::DenoiseNow => {
                    let Some((gpu, frame)) = &mut self.gpu else { continue; };
                    if !frame.denoise_now(gpu) {
                        self.status_message = "Denoise failed".into();
                    }
                }
                PanelAction::ToggleNode(i, visible) => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.set_render_node_visible(i, visible);
                    }
                }
                PanelAction::SelectNode(i) => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.select(Some(i as u32), None);
                    }
                }
                PanelAction::ClearSelection => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.select(None, None);
                    }
                }
                PanelAction::UseCamera(i) => {
                    if let Some(view) = self.gpu.as_ref().and_then(|(_, f)| f.scene().camera_view(i)) {
                        self.viewport.camera.apply_view(&view);
                    }
                }
                PanelAction::SelectVariant(variant) => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.select_variant(variant);
                    }
                }
                PanelAction::SelectAnimation(i) => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.set_active_animation(i);
                    }
                }
                PanelAction::SeekAnimation(time) => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.set_animation_time(time);
                    }
                }
                PanelAction::ResetAnimation => {
                    if let Some((_, frame)) = &mut self.gpu {
                        frame.reset_animation();
                    }
                }
            }
        }
    }

    /// Play the active clip; returns true while the scene keeps moving.
    fn advance_animation(&mut self, ctx: &egui::Context) -> bool {
        let _span = tracing::info_span!("update_animation").entered();
        let Some((_, frame)) = &mut self.gpu else { return false; };
        if !frame.scene().has_animation() || self.loader.is_busy() {
            return false;
        }
        let dt = ctx.input(|i| i.stable_dt);
        if let Some(delta) = self.playback.delta(dt) {
            frame.animate(delta);
        }
        self.playback.playing
    }

    fn status_bar(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(&self.status_message);
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let Some((_, frame)) = &self.gpu else { return; };
                let fps = ui.ctx().input(|i| 1.0 / i.stable_dt.max(1e-6));
                ui.label(format!("{:.0} FPS", fps));
                ui.separator();

                let timings = frame
                    .profiler()
                    .last_frame_timings()
                    .iter()
                    .map(|t| format!("{} {:.2}ms", t.name, t.duration.as_secs_f64() * 1000.0))
                    .collect::<Vec<_>>()
                    .join("  ");
                ui.label(RichText::new(timings).monospace().small());
                ui.separator();

                let acc = frame.accumulation();
                let state = frame.state();
                let text = match frame.last_status() {
                    FrameStatus::Rasterized => "Rasterized".to_string(),
                    FrameStatus::Skipped => "Idle".to_string(),
                    status => format!(
                        "F {}/{}  spp/frame {}  samples {}{}",
                        acc.frame().max(0),
                        acc.max_frames(),
                        state.path_tracer.max_samples,
                        acc.total_samples(),
                        if status == FrameStatus::Converged { "  (converged)" } else { "" },
                    ),
                };
                ui.label(text);
                ui.label(format!(
                    "{:.2} ms",
                    frame.profiler().last_frame_time().as_secs_f64() * 1000.0
                ));
            });
        });
    }

    /// Lay out, render and paint the viewport.
    fn central_panel(&mut self, ui: &mut egui::Ui, render_state: Option<&egui_wgpu::RenderState>) {
        let (response, input) = self.viewport.layout(ui);
        self.handle_viewport_input(&input);

        let (Some((gpu, frame)), Some(render_state)) = (&mut self.gpu, render_state) else {
            Viewport::paint_placeholder(ui, response.rect, "No GPU device");
            return;
        };

        let busy = self.loader.is_busy();
        if !busy {
            let (w, h) = self.viewport.requested;
            frame.on_viewport_resize(gpu, w, h);
            frame.set_mouse(input.hover);
            let camera = self.viewport.render_camera();
            frame.render(gpu, &camera);
        }

        let show_axis = frame.state().show_axis;
        self.viewport.paint(ui, &response, render_state, frame, show_axis);

        if busy {
            let painter = ui.painter();
            painter.rect_filled(response.rect, 0.0, egui::Color32::from_black_alpha(140));
            painter.text(
                response.rect.center(),
                egui::Align2::CENTER_CENTER,
                "Loading...",
                egui::FontId::proportional(24.0),
                egui::Color32::WHITE,
            );
        }
    }

    fn handle_viewport_input(&mut self, input: &ViewportInput) {
        if input.reset {
            self.viewport.camera.reset();
            self.status_message = "Camera reset".into();
        }
        if input.fit {
            self.fit_scene();
        }
        let Some((x, y)) = input.click else { return; };
        let camera = self.viewport.render_camera();
        let Some((_, frame)) = &mut self.gpu else { return; };
        self.status_message = match frame.select_at(&camera, x, y) {
            Some(hit) => {
                let scene = frame.scene();
                let name = scene
                    .render_nodes
                    .get(hit.node_id as usize)
                    .and_then(|rn| scene.nodes.get(rn.node))
                    .map_or("", |n| n.name.as_str());
                format!("Selected #{} {} at {:.2}", hit.node_id, name, hit.distance)
            }
            None => "Nothing selected".into(),
        };
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<PathBuf> = ctx.input(|i| i.raw.dropped_files.iter().filter_map(|f| f.path.clone()).collect());
        for path in dropped {
            if loader::classify(&path) == Some(FileKind::Scene) {
                self.fit_on_load = true;
            }
            self.request_load(path);
        }
    }

    fn save_settings(&mut self) {
        let Some(path) = self.settings_path.clone() else { return; };
        let camera = self.viewport.camera.state();
        let mut result = self.store.set(&self.window).and_then(|_| self.store.set(&camera));
        if let Some((_, frame)) = &self.gpu {
            result = result.and_then(|_| self.store.set(frame.state()));
        }
        if let Err(e) = result.and_then(|_| self.store.save(&path)) {
            log::warn!("Could not save settings: {e}");
        }
    }
}

impl eframe::App for ViewerApp {
    fn on_exit(&mut self) {
        self.loader.stop();
        if let Some((gpu, _)) = &mut self.gpu {
            gpu.wait_idle();
            gpu.release.flush();
        }
        self.save_settings();
    }

    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let _span = tracing::info_span!("viewer_update").entered();

        self.process_loader_results();
        self.handle_dropped_files(ctx);
        let animating = self.advance_animation(ctx);

        TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.menu_bar(ctx, ui);
        });

        TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            self.status_bar(ui);
        });

        let response = SidePanel::right("side_panel")
            .default_width(self.window.side_panel_width)
            .min_width(220.0)
            .max_width(500.0)
            .resizable(true)
            .show(ctx, |ui| {
                self.side_panel(ui);
            });
        self.window.side_panel_width = response.response.rect.width();

        CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                self.central_panel(ui, frame.wgpu_render_state());
            });

        // Track window size for saving on exit
        ctx.input(|i| {
            if let Some(rect) = i.viewport().inner_rect {
                self.window.width = rect.width();
                self.window.height = rect.height();
            }
        });

        let accumulating = self
            .gpu
            .as_ref()
            .is_some_and(|(_, f)| matches!(f.last_status(), FrameStatus::Accumulated(_)));
        if self.loader.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(50));
        } else if accumulating || animating {
            ctx.request_repaint();
        }
    }
}
