//! Progressive accumulation state.
//!
//! `frame` is the F counter: -1 after invalidation, 0 on the first
//! rendered frame, capped at `max_frames`. The accumulation buffer holds
//! the running mean of `total_samples` independent estimates:
//! `acc <- (acc * S + e * N) / (S + N)`.

use crate::util::{Mat4, Vec3};

/// Phase of the accumulation state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Invalidated; the next frame starts from scratch
    Idle,
    Accumulating,
    /// `frame == max_frames`; rendering is skipped
    Converged,
}

#[derive(Clone, Debug)]
pub struct Accumulation {
    frame: i32,
    total_samples: u64,
    max_frames: i32,
    reference_view: Option<Mat4>,
    reference_fov: f32,
}

impl Accumulation {
    pub fn new(max_frames: u32) -> Self {
        Self {
            frame: -1,
            total_samples: 0,
            max_frames: max_frames.min(i32::MAX as u32) as i32,
            reference_view: None,
            reference_fov: 0.0,
        }
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn max_frames(&self) -> u32 {
        self.max_frames as u32
    }

    /// Raising the cap resumes a converged image; lowering it never discards samples.
    pub fn set_max_frames(&mut self, max_frames: u32) {
        self.max_frames = max_frames.min(i32::MAX as u32) as i32;
    }

    pub fn phase(&self) -> Phase {
        if self.frame < 0 {
            Phase::Idle
        } else if self.frame >= self.max_frames {
            Phase::Converged
        } else {
            Phase::Accumulating
        }
    }

    pub fn invalidate(&mut self) {
        self.frame = -1;
        self.total_samples = 0;
    }

    /// Camera check, convergence check and frame increment.
    ///
    /// Returns the frame index to render, or `None` when converged.
    pub fn begin_frame(&mut self, view: &Mat4, fov_y: f32) -> Option<u32> {
        if self.reference_view.as_ref() != Some(view) || self.reference_fov != fov_y {
            self.reference_view = Some(*view);
            self.reference_fov = fov_y;
            self.invalidate();
        }
        if self.frame >= self.max_frames {
            return None;
        }
        self.frame += 1;
        Some(self.frame as u32)
    }

    /// Weight of this frame's estimate in the running mean, for `samples`
    /// new samples on top of what is already accumulated.
    pub fn blend_weight(&self, samples: u32) -> f32 {
        let n = samples.max(1) as f64;
        (n / (self.total_samples as f64 + n)) as f32
    }

    /// Record the samples the frame added.
    pub fn end_frame(&mut self, samples: u32) {
        self.total_samples += samples.max(1) as u64;
    }
}

/// Running-mean update for one pixel.
#[inline]
pub fn accumulate(acc: Vec3, estimate: Vec3, weight: f32) -> Vec3 {
    acc + (estimate - acc) * weight
}

/// Adaptive samples-per-frame controller.
#[derive(Clone, Debug)]
pub struct AdaptiveSamples {
    pub enabled: bool,
    /// One of 60, 30, 15, 10
    pub target_fps: u32,
    samples: u32,
}

impl AdaptiveSamples {
    pub const TARGETS: [u32; 4] = [60, 30, 15, 10];
    pub const MAX_SAMPLES: u32 = 100;

    pub fn new(enabled: bool, target_fps: u32, samples: u32) -> Self {
        Self {
            enabled,
            target_fps,
            samples: samples.clamp(1, Self::MAX_SAMPLES),
        }
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn set_samples(&mut self, samples: u32) {
        self.samples = samples.clamp(1, Self::MAX_SAMPLES);
    }

    /// Adjust after a frame; returns the sample count for the next frame.
    pub fn update(&mut self, frame_seconds: f32) -> u32 {
        if !self.enabled || self.target_fps == 0 {
            return self.samples;
        }
        let budget = 1.0 / self.target_fps as f32;
        if frame_seconds < 0.8 * budget {
            self.samples = (self.samples + 1).min(Self::MAX_SAMPLES);
        } else if frame_seconds > 1.2 * budget {
            self.samples = (self.samples / 2).max(1);
        }
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_progress_to_cap() {
        let mut acc = Accumulation::new(3);
        let view = Mat4::IDENTITY;
        assert_eq!(acc.phase(), Phase::Idle);
        let frames: Vec<Option<u32>> = (0..6).map(|_| acc.begin_frame(&view, 1.0)).collect();
        assert_eq!(frames, vec![Some(0), Some(1), Some(2), Some(3), None, None]);
        assert_eq!(acc.phase(), Phase::Converged);
    }

    #[test]
    fn test_camera_change_invalidates() {
        let mut acc = Accumulation::new(100);
        let view = Mat4::IDENTITY;
        for _ in 0..5 {
            acc.begin_frame(&view, 1.0);
            acc.end_frame(1);
        }
        assert_eq!(acc.frame(), 4);
        assert_eq!(acc.total_samples(), 5);

        let moved = Mat4::from_translation(Vec3::X);
        assert_eq!(acc.begin_frame(&moved, 1.0), Some(0));
        assert_eq!(acc.total_samples(), 0);
        // fov change alone also restarts
        acc.begin_frame(&moved, 1.0);
        assert_eq!(acc.begin_frame(&moved, 0.5), Some(0));
    }

    #[test]
    fn test_invalidate_returns_to_idle() {
        let mut acc = Accumulation::new(1);
        acc.begin_frame(&Mat4::IDENTITY, 1.0);
        acc.begin_frame(&Mat4::IDENTITY, 1.0);
        assert_eq!(acc.phase(), Phase::Converged);
        acc.invalidate();
        assert_eq!(acc.phase(), Phase::Idle);
        assert_eq!(acc.frame(), -1);
        assert_eq!(acc.begin_frame(&Mat4::IDENTITY, 1.0), Some(0));
    }

    #[test]
    fn test_running_mean_matches_plain_mean() {
        let mut state = Accumulation::new(1000);
        let estimates = [(2u32, 1.0f32), (1, 4.0), (3, 0.5), (1, 2.0)];
        let mut acc = Vec3::ZERO;
        let mut sum = 0.0;
        let mut n = 0;
        for (samples, e) in estimates {
            state.begin_frame(&Mat4::IDENTITY, 1.0);
            acc = accumulate(acc, Vec3::splat(e), state.blend_weight(samples));
            state.end_frame(samples);
            sum += e * samples as f32;
            n += samples;
        }
        assert_eq!(state.total_samples(), n as u64);
        assert!((acc.x - sum / n as f32).abs() < 1e-5);
    }

    #[test]
    fn test_adaptive_samples_follow_budget() {
        let mut a = AdaptiveSamples::new(true, 60, 4);
        assert_eq!(a.update(0.001), 5);
        assert_eq!(a.update(0.05), 2);
        assert_eq!(a.update(1.0 / 60.0), 2);
        a.update(1.0);
        a.update(1.0);
        assert_eq!(a.samples(), 1);
        let mut off = AdaptiveSamples::new(false, 60, 3);
        assert_eq!(off.update(0.0), 3);
    }
}
