//! Progressive path tracer.
//!
//! - [`accumulation`]: F / S counters, camera change detection, adaptive SPP
//! - [`raygen`]: primary rays, sub-pixel offsets, thin lens
//! - [`policy`]: alpha acceptance, shadow transmission, firefly clamp, MIS, roulette
//! - [`reference`]: CPU integrator used to validate the GPU kernel
//! - [`compute`]: the wgpu compute pass running `shaders/pathtrace.wgsl`

pub mod accumulation;
pub mod compute;
pub mod policy;
pub mod raygen;
pub mod reference;

pub use accumulation::{Accumulation, AdaptiveSamples, Phase};
pub use compute::{PathTracerPass, PtPushConstants};
pub use reference::ReferenceRenderer;

use serde::{Deserialize, Serialize};

use crate::scene::descriptor::DebugMethod;

/// Path tracer parameters exposed in the UI and persisted in settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathTracerSettings {
    /// Maximum bounces after the primary hit
    pub max_depth: u32,
    /// Samples per pixel per frame
    pub max_samples: u32,
    /// Per-sample luminance cap
    pub firefly_clamp: f32,
    /// F_max
    pub max_frames: u32,
    pub aperture: f32,
    pub focal_distance: f32,
    /// Focus on the look-at point when the selection changes
    pub auto_focus: bool,
    pub rr_min_depth: u32,
    pub shadow_t_min: f32,
    pub debug_method: DebugMethod,
    pub adaptive_samples: bool,
    pub target_fps: u32,
    /// Morton-swizzled invocation order (shader override constant)
    pub reorder: bool,
}

impl Default for PathTracerSettings {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_samples: 1,
            firefly_clamp: 10.0,
            max_frames: 200_000,
            aperture: 0.0,
            focal_distance: 10.0,
            auto_focus: true,
            rr_min_depth: 2,
            shadow_t_min: policy::SHADOW_T_MIN,
            debug_method: DebugMethod::None,
            adaptive_samples: false,
            target_fps: 60,
            reorder: false,
        }
    }
}

impl PathTracerSettings {
    /// F_max actually used: debug views converge after one frame.
    pub fn effective_max_frames(&self) -> u32 {
        if self.debug_method == DebugMethod::None {
            self.max_frames
        } else {
            1
        }
    }

    /// True if switching from `other` to `self` changes the linear image.
    pub fn invalidates(&self, other: &Self) -> bool {
        self.max_depth != other.max_depth
            || self.firefly_clamp != other.firefly_clamp
            || self.aperture != other.aperture
            || self.focal_distance != other.focal_distance
            || self.rr_min_depth != other.rr_min_depth
            || self.shadow_t_min != other.shadow_t_min
            || self.debug_method != other.debug_method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_count_change_keeps_accumulation() {
        let a = PathTracerSettings::default();
        let b = PathTracerSettings {
            max_samples: 8,
            max_frames: 10,
            ..a.clone()
        };
        assert!(!b.invalidates(&a));
        let c = PathTracerSettings {
            debug_method: DebugMethod::Normal,
            ..a.clone()
        };
        assert!(c.invalidates(&a));
        assert_eq!(c.effective_max_frames(), 1);
    }
}
