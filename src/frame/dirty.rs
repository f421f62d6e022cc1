//! Dirty flags and the settings diff that produces them.

use std::ops::{BitOr, BitOrAssign};

use glam::Mat4;

use crate::pathtracer::Accumulation;
use crate::settings::RendererState;

/// What changed since the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyFlags(u32);

impl DirtyFlags {
    pub const NONE: Self = Self(0);
    /// Geometry, visibility or materials: rebuild TLAS and tables
    pub const SCENE: Self = Self(1);
    /// Emitter kind or parameters: rewrite sky uniform, bump env generation
    pub const ENVIRONMENT: Self = Self(1 << 1);
    /// Anything else that changes the linear image
    pub const ACCUMULATION: Self = Self(1 << 2);
    /// Output size changed
    pub const VIEWPORT: Self = Self(1 << 3);
    /// Raster options: re-record the draw bundle
    pub const RASTER: Self = Self(1 << 4);
    /// Denoiser selection or parameters
    pub const DENOISER: Self = Self(1 << 5);
    /// Path-tracer kernel specialization changed
    pub const PIPELINES: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Return the current flags and clear them.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// True if the linear accumulation must restart.
    pub fn invalidates_accumulation(self) -> bool {
        self.intersects(Self::SCENE | Self::ENVIRONMENT | Self::ACCUMULATION | Self::VIEWPORT)
    }
}

impl BitOr for DirtyFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags raised by replacing `old` with `new`.
///
/// Sample count, F_max, adaptive SPP and tone mapping do not touch the
/// linear image and raise nothing that resets accumulation.
pub fn diff_state(old: &RendererState, new: &RendererState) -> DirtyFlags {
    let mut flags = DirtyFlags::NONE;
    if old.environment != new.environment || old.sky != new.sky {
        flags |= DirtyFlags::ENVIRONMENT;
    }
    if new.path_tracer.invalidates(&old.path_tracer) {
        flags |= DirtyFlags::ACCUMULATION;
    }
    if old.renderer != new.renderer {
        flags |= DirtyFlags::ACCUMULATION;
    }
    if old.path_tracer.reorder != new.path_tracer.reorder {
        flags |= DirtyFlags::PIPELINES;
    }
    if old.raster != new.raster {
        flags |= DirtyFlags::RASTER;
    }
    if old.denoiser != new.denoiser || old.atrous != new.atrous || old.monte_carlo != new.monte_carlo {
        flags |= DirtyFlags::DENOISER;
    }
    flags
}

/// Selected render node plus the one-shot request for object-ID rays.
///
/// Object-ID rays are shot on one frame only: the first after a selection
/// change, a restart of accumulation or a reallocation of the image. The
/// silhouette keeps using that frame's IDs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    current: Option<u32>,
    pending: bool,
}

impl Selection {
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Returns true if the selection changed.
    pub fn set(&mut self, node: Option<u32>) -> bool {
        if self.current == node {
            return false;
        }
        self.current = node;
        self.pending = node.is_some();
        true
    }

    /// Node to shoot object-ID rays for this frame; clears the request.
    pub fn take_request(&mut self) -> Option<u32> {
        if std::mem::take(&mut self.pending) {
            self.current
        } else {
            None
        }
    }

    /// Re-arm the request (the object-ID image was reallocated).
    pub fn rearm(&mut self) {
        self.pending = self.current.is_some();
    }
}

/// GPU-free bookkeeping of the frame loop: pending dirty flags, the
/// accumulation counters and the selection request.
#[derive(Clone, Debug)]
pub struct FrameTracker {
    dirty: DirtyFlags,
    pub accumulation: Accumulation,
    pub selection: Selection,
}

impl FrameTracker {
    /// A fresh tracker uploads the scene and the environment on its first frame.
    pub fn new(max_frames: u32) -> Self {
        Self {
            dirty: DirtyFlags::SCENE | DirtyFlags::ENVIRONMENT,
            accumulation: Accumulation::new(max_frames),
            selection: Selection::default(),
        }
    }

    pub fn invalidate_accumulation(&mut self) {
        self.dirty |= DirtyFlags::ACCUMULATION;
    }

    pub fn on_scene_dirty(&mut self, flags: DirtyFlags) {
        self.dirty |= flags;
    }

    pub fn pending(&self) -> DirtyFlags {
        self.dirty
    }

    /// Take the pending flags, restarting accumulation if they touch the
    /// linear image.
    pub fn flush(&mut self) -> DirtyFlags {
        let flags = self.dirty.take();
        if flags.invalidates_accumulation() {
            self.accumulation.invalidate();
        }
        flags
    }

    /// Start a path-traced frame. Returns the frame index and the node to
    /// shoot object-ID rays for, or `None` when converged.
    pub fn begin_frame(&mut self, view: &Mat4, fov_y: f32) -> Option<(u32, Option<u32>)> {
        let frame = self.accumulation.begin_frame(view, fov_y)?;
        // a restarted image needs IDs for the current view
        if frame == 0 {
            self.selection.rearm();
        }
        Some((frame, self.selection.take_request()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::DenoiserKind;
    use crate::environment::EnvKind;
    use crate::frame::Backend;
    use crate::scene::descriptor::DebugMethod;

    #[test]
    fn test_flag_set_operations() {
        let mut f = DirtyFlags::NONE;
        assert!(f.is_empty());
        f.insert(DirtyFlags::SCENE);
        f |= DirtyFlags::RASTER;
        assert!(f.contains(DirtyFlags::SCENE));
        assert!(f.contains(DirtyFlags::SCENE | DirtyFlags::RASTER));
        assert!(!f.contains(DirtyFlags::VIEWPORT));
        assert!(f.invalidates_accumulation());
        assert_eq!(f.take(), DirtyFlags::SCENE | DirtyFlags::RASTER);
        assert!(f.is_empty());
        assert!(!DirtyFlags::RASTER.invalidates_accumulation());
    }

    #[test]
    fn test_environment_and_debug_changes_reset_accumulation() {
        let base = RendererState::default();

        let mut s = base.clone();
        s.environment.intensity = 2.0;
        assert!(diff_state(&base, &s).invalidates_accumulation());

        let mut s = base.clone();
        s.environment.kind = EnvKind::SolidColor;
        assert!(diff_state(&base, &s).contains(DirtyFlags::ENVIRONMENT));

        let mut s = base.clone();
        s.environment.rotation = 0.5;
        assert!(diff_state(&base, &s).invalidates_accumulation());

        let mut s = base.clone();
        s.path_tracer.debug_method = DebugMethod::Normal;
        assert!(diff_state(&base, &s).invalidates_accumulation());

        let mut s = base.clone();
        s.path_tracer.firefly_clamp = 3.0;
        assert!(diff_state(&base, &s).invalidates_accumulation());

        let mut s = base.clone();
        s.renderer = Backend::Rasterizer;
        assert!(diff_state(&base, &s).invalidates_accumulation());
    }

    #[test]
    fn test_display_only_changes_keep_accumulation() {
        let base = RendererState::default();

        let mut s = base.clone();
        s.path_tracer.max_samples = 16;
        s.path_tracer.max_frames = 50;
        s.tone_map.exposure = 2.0;
        s.silhouette_color = [0.0, 1.0, 0.0];
        assert!(diff_state(&base, &s).is_empty());

        let mut s = base.clone();
        s.raster.wireframe = true;
        assert_eq!(diff_state(&base, &s), DirtyFlags::RASTER);

        let mut s = base.clone();
        s.denoiser = DenoiserKind::Atrous;
        assert_eq!(diff_state(&base, &s), DirtyFlags::DENOISER);

        let mut s = base.clone();
        s.path_tracer.reorder = true;
        assert_eq!(diff_state(&base, &s), DirtyFlags::PIPELINES);
    }

    #[test]
    fn test_selection_request_is_one_shot() {
        let mut sel = Selection::default();
        assert_eq!(sel.take_request(), None);
        assert!(sel.set(Some(4)));
        assert_eq!(sel.take_request(), Some(4));
        assert_eq!(sel.take_request(), None);
        assert_eq!(sel.current(), Some(4));
        assert!(!sel.set(Some(4)));
        assert_eq!(sel.take_request(), None);
        sel.rearm();
        assert_eq!(sel.take_request(), Some(4));
        assert!(sel.set(None));
        assert_eq!(sel.take_request(), None);
        assert_eq!(sel.current(), None);
    }

    fn run_frames(tracker: &mut FrameTracker, frames: usize, view: &Mat4) -> Vec<(u32, Option<u32>)> {
        (0..frames)
            .filter_map(|_| {
                let f = tracker.begin_frame(view, 0.8);
                tracker.accumulation.end_frame(1);
                f
            })
            .collect()
    }

    #[test]
    fn test_camera_move_reshoots_object_ids() {
        let mut tracker = FrameTracker::new(100);
        tracker.flush();
        tracker.selection.set(Some(4));
        let still = Mat4::IDENTITY;
        assert_eq!(run_frames(&mut tracker, 3, &still), vec![(0, Some(4)), (1, None), (2, None)]);

        let moved = Mat4::from_translation(glam::Vec3::X);
        assert_eq!(run_frames(&mut tracker, 2, &moved), vec![(0, Some(4)), (1, None)]);
    }

    #[test]
    fn test_scene_dirty_restarts_accumulation_and_object_ids() {
        let mut tracker = FrameTracker::new(100);
        assert!(tracker.flush().contains(DirtyFlags::SCENE));
        tracker.selection.set(Some(2));
        let view = Mat4::IDENTITY;
        run_frames(&mut tracker, 5, &view);
        assert_eq!(tracker.accumulation.frame(), 4);

        // a visibility toggle
        tracker.on_scene_dirty(DirtyFlags::SCENE);
        assert_eq!(tracker.pending(), DirtyFlags::SCENE);
        assert!(tracker.flush().contains(DirtyFlags::SCENE));
        assert_eq!(tracker.accumulation.total_samples(), 0);
        assert_eq!(run_frames(&mut tracker, 1, &view), vec![(0, Some(2))]);

        tracker.invalidate_accumulation();
        tracker.flush();
        assert_eq!(tracker.accumulation.frame(), -1);
        assert_eq!(run_frames(&mut tracker, 2, &view), vec![(0, Some(2)), (1, None)]);
    }

    #[test]
    fn test_display_flags_keep_accumulating() {
        let mut tracker = FrameTracker::new(100);
        tracker.flush();
        let view = Mat4::IDENTITY;
        run_frames(&mut tracker, 3, &view);
        tracker.on_scene_dirty(DirtyFlags::RASTER | DirtyFlags::DENOISER);
        tracker.flush();
        assert_eq!(run_frames(&mut tracker, 1, &view), vec![(3, None)]);
    }

    #[test]
    fn test_nothing_selected_shoots_no_ids() {
        let mut tracker = FrameTracker::new(100);
        assert_eq!(run_frames(&mut tracker, 1, &Mat4::IDENTITY), vec![(0, None)]);
    }
}
