//! 3D viewport widget for egui

use egui::{Response, Sense, Ui, Vec2};
use glam::Vec3;

use super::camera::OrbitCamera;
use crate::frame::FrameController;
use crate::gpu::GBuffer;
use crate::scene::descriptor::Camera;

/// What the user did in the viewport this frame.
#[derive(Default)]
pub struct ViewportInput {
    /// Left click without drag, in output pixels
    pub click: Option<(u32, u32)>,
    /// Pointer position in output pixels
    pub hover: Option<(i32, i32)>,
    pub fit: bool,
    pub reset: bool,
}

/// Viewport state: the orbit camera plus the egui handle of the display image.
pub struct Viewport {
    pub camera: OrbitCamera,
    texture_id: Option<egui::TextureId>,
    /// Size of the display image `texture_id` refers to
    registered: Option<(u32, u32)>,
    /// Size in physical pixels the last layout asked for
    pub requested: (u32, u32),
}

impl Viewport {
    pub fn new(camera: OrbitCamera) -> Self {
        Self {
            camera,
            texture_id: None,
            registered: None,
            requested: (0, 0),
        }
    }

    /// Allocate the viewport area and read its input. The output size is
    /// the area in physical pixels.
    pub fn layout(&mut self, ui: &mut Ui) -> (Response, ViewportInput) {
        let available = ui.available_size();
        let size = Vec2::new(available.x.max(64.0), available.y.max(64.0));
        let (_rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());

        let ppp = ui.ctx().pixels_per_point();
        self.requested = (
            (size.x * ppp).round().max(1.0) as u32,
            (size.y * ppp).round().max(1.0) as u32,
        );

        let input = self.handle_input(ui, &response, ppp);
        self.camera.update(ui.input(|i| i.stable_dt));
        (response, input)
    }

    /// Render camera for the current output.
    pub fn render_camera(&self) -> Camera {
        let (w, h) = self.requested;
        self.camera.camera(w.max(1) as f32 / h.max(1) as f32)
    }

    /// Paint the display image into `response.rect`, re-registering it
    /// with egui whenever the G-buffer was replaced.
    pub fn paint(
        &mut self,
        ui: &Ui,
        response: &Response,
        render_state: &egui_wgpu::RenderState,
        frame: &FrameController,
        show_axis: bool,
    ) {
        let output = frame.output();
        self.ensure_registered(render_state, output);
        let rect = response.rect;
        if let Some(tex_id) = self.texture_id {
            ui.painter().image(
                tex_id,
                rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
        if show_axis {
            self.paint_axis(ui, rect);
        }
    }

    /// Placeholder while no GPU is available.
    pub fn paint_placeholder(ui: &Ui, rect: egui::Rect, text: &str) {
        ui.painter().rect_filled(rect, 0.0, egui::Color32::from_rgb(30, 30, 35));
        ui.painter().text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            text,
            egui::FontId::default(),
            egui::Color32::GRAY,
        );
    }

    fn ensure_registered(&mut self, render_state: &egui_wgpu::RenderState, output: &GBuffer) {
        if self.registered == Some(output.size()) && self.texture_id.is_some() {
            return;
        }
        let mut renderer = render_state.renderer.write();
        let tex_id = renderer.register_native_texture(&render_state.device, &output.display_view, wgpu::FilterMode::Linear);
        if let Some(old_id) = self.texture_id.replace(tex_id) {
            renderer.free_texture(&old_id);
        }
        self.registered = Some(output.size());
    }

    /// World axes gizmo in the lower-left corner.
    fn paint_axis(&self, ui: &Ui, rect: egui::Rect) {
        let view = self.render_camera().view;
        let origin = egui::pos2(rect.left() + 40.0, rect.bottom() - 40.0);
        let len = 28.0;
        let axes = [
            (Vec3::X, egui::Color32::from_rgb(230, 70, 70), "X"),
            (Vec3::Y, egui::Color32::from_rgb(90, 200, 90), "Y"),
            (Vec3::Z, egui::Color32::from_rgb(80, 130, 240), "Z"),
        ];
        let painter = ui.painter();
        for (axis, color, label) in axes {
            let v = view.transform_vector3(axis);
            let tip = origin + egui::vec2(v.x, -v.y) * len;
            painter.line_segment([origin, tip], egui::Stroke::new(2.0, color));
            painter.text(tip, egui::Align2::CENTER_CENTER, label, egui::FontId::proportional(11.0), color);
        }
    }

    fn handle_input(&mut self, ui: &Ui, response: &Response, ppp: f32) -> ViewportInput {
        let mut out = ViewportInput::default();
        let rect = response.rect;
        let to_pixels = |pos: egui::Pos2| -> Option<(f32, f32)> {
            rect.contains(pos)
                .then(|| ((pos.x - rect.left()) * ppp, (pos.y - rect.top()) * ppp))
        };

        if response.dragged_by(egui::PointerButton::Primary) {
            let delta = response.drag_delta();
            self.camera.orbit(delta.x, delta.y);
        }
        if response.dragged_by(egui::PointerButton::Middle) {
            let delta = response.drag_delta();
            self.camera.pan(delta.x, delta.y);
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll.abs() > 0.0 {
                self.camera.zoom(scroll);
            }
        }

        if response.clicked_by(egui::PointerButton::Primary) {
            if let Some((x, y)) = response.interact_pointer_pos().and_then(to_pixels) {
                out.click = Some((x as u32, y as u32));
            }
        }
        if response.hovered() {
            out.hover = ui
                .input(|i| i.pointer.hover_pos())
                .and_then(to_pixels)
                .map(|(x, y)| (x as i32, y as i32));
        }

        // shortcuts only while no text field has focus
        if !ui.ctx().wants_keyboard_input() {
            ui.input(|i| {
                out.fit = i.key_pressed(egui::Key::F);
                out.reset = i.key_pressed(egui::Key::H);
            });
        }
        out
    }
}
