//! Side-panel sections editing a copy of the renderer state

use egui::{CollapsingHeader, ComboBox, Slider, Ui};
use glam::Vec3;

use crate::denoise::{DenoiserChain, DenoiserKind};
use crate::environment::{EnvKind, SkyParams};
use crate::frame::Backend;
use crate::post::ToneCurve;
use crate::scene::descriptor::DebugMethod;
use crate::scene::Scene;
use crate::settings::RendererState;

/// Target frame rates offered for adaptive samples.
const TARGET_FPS: [u32; 4] = [60, 30, 15, 10];

/// Requests a section cannot carry out itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PanelAction {
    LoadHdr,
    DenoiseNow,
    ToggleNode(usize, bool),
    SelectNode(usize),
    ClearSelection,
    UseCamera(usize),
    SelectVariant(Option<usize>),
    SelectAnimation(usize),
    SeekAnimation(f32),
    ResetAnimation,
}

/// Animation transport: play/pause, single step and speed.
#[derive(Clone, Debug, PartialEq)]
pub struct Playback {
    pub playing: bool,
    step_once: bool,
    pub speed: f32,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            playing: true,
            step_once: false,
            speed: 1.0,
        }
    }
}

impl Playback {
    /// Advance one 60 Hz tick on the next frame and pause.
    pub fn step(&mut self) {
        self.step_once = true;
        self.playing = false;
    }

    /// Seconds of animation to play this frame, if any.
    ///
    /// Zero speed plays nothing so a paused pose keeps accumulating.
    pub fn delta(&mut self, frame_dt: f32) -> Option<f32> {
        let delta = if std::mem::take(&mut self.step_once) {
            self.speed / 60.0
        } else if self.playing {
            frame_dt * self.speed
        } else {
            return None;
        };
        (delta > 0.0).then_some(delta)
    }
}

/// What the panels need to know about the GPU.
pub struct Capabilities<'a> {
    pub path_tracer_error: Option<String>,
    pub wireframe: bool,
    pub denoisers: &'a DenoiserChain,
    pub has_hdr: bool,
}

pub fn renderer_section(ui: &mut Ui, state: &mut RendererState, caps: &Capabilities) {
    ComboBox::from_label("Renderer")
        .selected_text(state.renderer.label())
        .show_ui(ui, |ui| {
            for backend in Backend::ALL {
                // the path tracer is hidden on adapters that cannot run it
                if backend == Backend::PathTracer && caps.path_tracer_error.is_some() {
                    continue;
                }
                ui.selectable_value(&mut state.renderer, backend, backend.label());
            }
        });
    if let Some(err) = &caps.path_tracer_error {
        ui.colored_label(egui::Color32::from_rgb(220, 160, 60), format!("Path tracer unavailable: {err}"));
    }
    ui.checkbox(&mut state.show_axis, "Show axis");
}

pub fn environment_section(ui: &mut Ui, state: &mut RendererState, caps: &Capabilities, actions: &mut Vec<PanelAction>) {
    CollapsingHeader::new("Environment").default_open(true).show(ui, |ui| {
        let env = &mut state.environment;
        ComboBox::from_label("Emitter")
            .selected_text(env.kind.label())
            .show_ui(ui, |ui| {
                for kind in [EnvKind::Sky, EnvKind::Hdr, EnvKind::SolidColor] {
                    ui.selectable_value(&mut env.kind, kind, kind.label());
                }
            });
        ui.add(Slider::new(&mut env.intensity, 0.0..=10.0).text("Intensity"));
        ui.add(Slider::new(&mut env.rotation, -std::f32::consts::PI..=std::f32::consts::PI).text("Rotation"));

        match env.kind {
            EnvKind::Hdr => {
                ui.add(Slider::new(&mut env.blur, 0.0..=1.0).text("Blur"));
                if !caps.has_hdr {
                    ui.label("No HDR loaded; the sky is used.");
                }
                if ui.button("Load HDR...").clicked() {
                    actions.push(PanelAction::LoadHdr);
                }
            }
            EnvKind::SolidColor => {
                ui.horizontal(|ui| {
                    ui.label("Color");
                    ui.color_edit_button_rgb(&mut env.solid_color);
                });
            }
            EnvKind::Sky => sky_controls(ui, &mut state.sky),
        }
    });
}

fn sky_controls(ui: &mut Ui, sky: &mut SkyParams) {
    let sun = Vec3::from(sky.sun_direction).normalize_or(Vec3::Y);
    let mut elevation = sun.y.clamp(-1.0, 1.0).asin().to_degrees();
    let mut azimuth = sun.x.atan2(sun.z).to_degrees();
    let mut moved = ui.add(Slider::new(&mut elevation, -10.0..=90.0).text("Sun elevation")).changed();
    moved |= ui.add(Slider::new(&mut azimuth, -180.0..=180.0).text("Sun azimuth")).changed();
    if moved {
        let (el, az) = (elevation.to_radians(), azimuth.to_radians());
        sky.sun_direction = [el.cos() * az.sin(), el.sin(), el.cos() * az.cos()];
    }
    ui.add(Slider::new(&mut sky.turbidity, 1.0..=10.0).text("Turbidity"));
    ui.add(Slider::new(&mut sky.sun_intensity, 0.0..=10.0).text("Sun intensity"));
    ui.add(Slider::new(&mut sky.sky_intensity, 0.0..=10.0).text("Sky intensity"));
    ui.horizontal(|ui| {
        ui.label("Ground albedo");
        ui.color_edit_button_rgb(&mut sky.ground_albedo);
    });
}

pub fn path_tracer_section(ui: &mut Ui, state: &mut RendererState) {
    CollapsingHeader::new("Path tracer").default_open(true).show(ui, |ui| {
        let pt = &mut state.path_tracer;
        ui.add(Slider::new(&mut pt.max_depth, 1..=32).text("Max depth"));
        ui.add_enabled(
            !pt.adaptive_samples,
            Slider::new(&mut pt.max_samples, 1..=100).text("Samples / frame"),
        );
        ui.horizontal(|ui| {
            ui.checkbox(&mut pt.adaptive_samples, "Adaptive");
            ComboBox::from_id_salt("target_fps")
                .selected_text(format!("{} FPS", pt.target_fps))
                .show_ui(ui, |ui| {
                    for fps in TARGET_FPS {
                        ui.selectable_value(&mut pt.target_fps, fps, format!("{fps} FPS"));
                    }
                });
        });
        ui.add(Slider::new(&mut pt.max_frames, 1..=200_000).logarithmic(true).text("Max frames"));
        ui.add(
            Slider::new(&mut pt.firefly_clamp, 0.1..=1000.0)
                .logarithmic(true)
                .text("Firefly clamp"),
        );

        ui.separator();
        ui.add(Slider::new(&mut pt.aperture, 0.0..=1.0).text("Aperture"));
        ui.add_enabled(
            !pt.auto_focus,
            Slider::new(&mut pt.focal_distance, 0.01..=1000.0)
                .logarithmic(true)
                .text("Focal distance"),
        );
        ui.checkbox(&mut pt.auto_focus, "Focus on selection");

        ui.separator();
        ComboBox::from_label("Debug")
            .selected_text(pt.debug_method.label())
            .show_ui(ui, |ui| {
                for method in DebugMethod::ALL {
                    ui.selectable_value(&mut pt.debug_method, method, method.label());
                }
            });
        ui.checkbox(&mut pt.reorder, "Reorder invocations");
    });
}

pub fn denoiser_section(ui: &mut Ui, state: &mut RendererState, caps: &Capabilities, actions: &mut Vec<PanelAction>) {
    CollapsingHeader::new("Denoiser").default_open(false).show(ui, |ui| {
        for kind in DenoiserKind::ALL {
            let available = caps.denoisers.is_available(kind);
            let response = ui
                .add_enabled_ui(available, |ui| ui.radio_value(&mut state.denoiser, kind, kind.label()))
                .inner;
            if let Some(reason) = caps.denoisers.unavailable_reason(kind) {
                response.on_disabled_hover_text(reason);
            }
        }
        match state.denoiser {
            DenoiserKind::Atrous => {
                let a = &mut state.atrous;
                ui.add(Slider::new(&mut a.iterations, 1..=5).text("Iterations"));
                ui.add(Slider::new(&mut a.color_phi, 0.01..=2.0).text("Color phi"));
                ui.add(Slider::new(&mut a.normal_phi, 0.01..=2.0).text("Normal phi"));
                ui.add(Slider::new(&mut a.depth_phi, 0.01..=2.0).text("Depth phi"));
            }
            DenoiserKind::MonteCarlo => {
                let mc = &mut state.monte_carlo;
                ui.checkbox(&mut mc.auto_denoise, "Auto denoise");
                ui.add_enabled(mc.auto_denoise, Slider::new(&mut mc.interval, 1..=1000).text("Interval"));
                if ui.button("Denoise now").clicked() {
                    actions.push(PanelAction::DenoiseNow);
                }
            }
            DenoiserKind::None | DenoiserKind::AiReconstruction => {}
        }
    });
}

pub fn raster_section(ui: &mut Ui, state: &mut RendererState, caps: &Capabilities) {
    CollapsingHeader::new("Rasterizer").default_open(false).show(ui, |ui| {
        let r = &mut state.raster;
        ui.add_enabled(caps.wireframe, egui::Checkbox::new(&mut r.wireframe, "Wireframe"));
        ui.checkbox(&mut r.use_recorded, "Replay recorded draws");
        ui.checkbox(&mut r.supersample, "2x supersample");
    });
}

pub fn tone_map_section(ui: &mut Ui, state: &mut RendererState) {
    CollapsingHeader::new("Tone mapping").default_open(false).show(ui, |ui| {
        let tm = &mut state.tone_map;
        ComboBox::from_label("Curve")
            .selected_text(tm.curve.label())
            .show_ui(ui, |ui| {
                for curve in ToneCurve::ALL {
                    ui.selectable_value(&mut tm.curve, curve, curve.label());
                }
            });
        ui.add(Slider::new(&mut tm.exposure, 0.01..=16.0).logarithmic(true).text("Exposure"));
        ui.add(Slider::new(&mut tm.contrast, 0.0..=2.0).text("Contrast"));
        ui.add(Slider::new(&mut tm.saturation, 0.0..=2.0).text("Saturation"));
        ui.add(Slider::new(&mut tm.gamma, 1.0..=3.0).text("Gamma"));
        ui.horizontal(|ui| {
            ui.label("Silhouette");
            ui.color_edit_button_rgb(&mut state.silhouette_color);
        });
    });
}

/// Render nodes with visibility toggles; click to select.
pub fn node_list(ui: &mut Ui, scene: &Scene, selected: Option<u32>, filter: &mut String, actions: &mut Vec<PanelAction>) {
    CollapsingHeader::new(format!("Nodes ({})", scene.render_nodes.len()))
        .default_open(true)
        .show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label("Filter:");
                ui.text_edit_singleline(filter);
            });
            if selected.is_some() && ui.small_button("Clear selection").clicked() {
                actions.push(PanelAction::ClearSelection);
            }
            let needle = filter.to_lowercase();
            let rows: Vec<(usize, String, bool)> = scene
                .render_nodes
                .iter()
                .enumerate()
                .map(|(i, rn)| {
                    let name = scene.nodes.get(rn.node).map_or("", |n| n.name.as_str());
                    let label = if name.is_empty() {
                        format!("#{i}")
                    } else {
                        format!("{name} #{i}")
                    };
                    (i, label, rn.visible)
                })
                .filter(|(_, label, _)| needle.is_empty() || label.to_lowercase().contains(&needle))
                .collect();

            let row_height = ui.spacing().interact_size.y;
            egui::ScrollArea::vertical()
                .max_height(300.0)
                .show_rows(ui, row_height, rows.len(), |ui, range| {
                    for (i, label, visible) in &rows[range] {
                        ui.horizontal(|ui| {
                            let mut v = *visible;
                            if ui.checkbox(&mut v, "").changed() {
                                actions.push(PanelAction::ToggleNode(*i, v));
                            }
                            let is_selected = selected == Some(*i as u32);
                            if ui.selectable_label(is_selected, label.as_str()).clicked() {
                                actions.push(PanelAction::SelectNode(*i));
                            }
                        });
                    }
                });
        });
}

/// Scene cameras, material variants and animation transport.
pub fn scene_section(ui: &mut Ui, scene: &Scene, playback: &mut Playback, actions: &mut Vec<PanelAction>) {
    if !scene.cameras.is_empty() {
        CollapsingHeader::new("Cameras").show(ui, |ui| {
            for (i, camera) in scene.cameras.iter().enumerate() {
                let label = if camera.name.is_empty() {
                    format!("Camera {i}")
                } else {
                    camera.name.clone()
                };
                if ui.button(label).clicked() {
                    actions.push(PanelAction::UseCamera(i));
                }
            }
        });
    }

    if !scene.variants.is_empty() {
        CollapsingHeader::new("Variants").show(ui, |ui| {
            for (i, name) in scene.variants.iter().enumerate() {
                if ui.selectable_label(scene.active_variant == Some(i), name.as_str()).clicked() {
                    actions.push(PanelAction::SelectVariant(Some(i)));
                }
            }
        });
    }

    let Some(clip) = scene.animations.active() else { return; };
    CollapsingHeader::new("Animation").default_open(true).show(ui, |ui| {
        if scene.animations.clips.len() > 1 {
            ComboBox::from_label("Clip")
                .selected_text(clip.name.as_str())
                .show_ui(ui, |ui| {
                    for (i, c) in scene.animations.clips.iter().enumerate() {
                        if ui
                            .selectable_label(i == scene.animations.active_index(), c.name.as_str())
                            .clicked()
                        {
                            actions.push(PanelAction::SelectAnimation(i));
                        }
                    }
                });
        }
        ui.horizontal(|ui| {
            if ui.button(if playback.playing { "Pause" } else { "Play" }).clicked() {
                playback.playing = !playback.playing;
            }
            if ui.button("Step").clicked() {
                playback.step();
            }
            if ui.button("Reset").clicked() {
                actions.push(PanelAction::ResetAnimation);
            }
        });
        ui.add(Slider::new(&mut playback.speed, 0.0..=2.0).text("Speed"));
        let mut time = scene.animations.time();
        if ui
            .add(Slider::new(&mut time, clip.start..=clip.end.max(clip.start)).text("Time (s)"))
            .changed()
        {
            actions.push(PanelAction::SeekAnimation(time));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_steps_once_then_pauses() {
        let mut p = Playback::default();
        assert_eq!(p.delta(0.5), Some(0.5));
        p.speed = 2.0;
        p.step();
        assert_eq!(p.delta(0.5), Some(2.0 / 60.0));
        assert!(!p.playing);
        assert_eq!(p.delta(0.5), None);
        p.playing = true;
        p.speed = 0.0;
        assert_eq!(p.delta(0.5), None);
    }
}
