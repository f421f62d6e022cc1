//! Keyframe animation of node transforms.
//!
//! Channels target the translation, rotation or scale of one scene node.
//! Evaluating a clip overrides those properties on top of the node's rest
//! pose; the caller then re-flattens world transforms.

use crate::util::{Mat4, Quat, Vec3, Vec4};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    Translation,
    Rotation,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    /// Outputs hold (in-tangent, value, out-tangent) per key
    CubicSpline,
}

/// Keyframes driving one property of one node.
#[derive(Clone, Debug)]
pub struct Channel {
    pub node: usize,
    pub property: Property,
    pub interpolation: Interpolation,
    /// Key times in seconds, ascending
    pub inputs: Vec<f32>,
    /// Vec3 properties use xyz; rotations are xyzw quaternions
    pub outputs: Vec<Vec4>,
}

impl Channel {
    /// Number of outputs the interpolation mode requires for the key count.
    pub fn expected_outputs(interpolation: Interpolation, keys: usize) -> usize {
        match interpolation {
            Interpolation::CubicSpline => keys * 3,
            _ => keys,
        }
    }

    fn value(&self, key: usize) -> Vec4 {
        match self.interpolation {
            Interpolation::CubicSpline => self.outputs[key * 3 + 1],
            _ => self.outputs[key],
        }
    }

    /// Sample the channel at `time`, clamped to the first and last key.
    pub fn sample(&self, time: f32) -> Option<Vec4> {
        let (&first, &last) = (self.inputs.first()?, self.inputs.last()?);
        if self.outputs.len() < Self::expected_outputs(self.interpolation, self.inputs.len()) {
            return None;
        }
        if self.inputs.len() == 1 || time <= first {
            return Some(self.value(0));
        }
        if time >= last {
            return Some(self.value(self.inputs.len() - 1));
        }

        let i = self.inputs.partition_point(|&t| t <= time).saturating_sub(1);
        let (t0, t1) = (self.inputs[i], self.inputs[i + 1]);
        let dt = t1 - t0;
        let u = if dt > 0.0 { ((time - t0) / dt).clamp(0.0, 1.0) } else { 0.0 };

        let value = match self.interpolation {
            Interpolation::Step => self.value(i),
            Interpolation::Linear => match self.property {
                Property::Rotation => {
                    let a = Quat::from_vec4(self.value(i));
                    let b = Quat::from_vec4(self.value(i + 1));
                    Vec4::from(a.slerp(b, u).normalize())
                }
                _ => self.value(i).lerp(self.value(i + 1), u),
            },
            Interpolation::CubicSpline => {
                let p0 = self.outputs[i * 3 + 1];
                let m0 = self.outputs[i * 3 + 2] * dt;
                let p1 = self.outputs[(i + 1) * 3 + 1];
                let m1 = self.outputs[(i + 1) * 3] * dt;
                let (u2, u3) = (u * u, u * u * u);
                let v = p0 * (2.0 * u3 - 3.0 * u2 + 1.0)
                    + m0 * (u3 - 2.0 * u2 + u)
                    + p1 * (-2.0 * u3 + 3.0 * u2)
                    + m1 * (u3 - u2);
                match self.property {
                    Property::Rotation => v.normalize_or(Vec4::W),
                    _ => v,
                }
            }
        };
        Some(value)
    }
}

/// A named set of channels played together.
#[derive(Clone, Debug, Default)]
pub struct AnimationClip {
    pub name: String,
    pub channels: Vec<Channel>,
    pub start: f32,
    pub end: f32,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let start = channels
            .iter()
            .filter_map(|c| c.inputs.first().copied())
            .fold(f32::INFINITY, f32::min);
        let end = channels
            .iter()
            .filter_map(|c| c.inputs.last().copied())
            .fold(f32::NEG_INFINITY, f32::max);
        let (start, end) = if start <= end { (start, end) } else { (0.0, 0.0) };
        Self {
            name: name.into(),
            channels,
            start,
            end,
        }
    }

    pub fn duration(&self) -> f32 {
        self.end - self.start
    }

    /// Time `time` wrapped into `[start, end]`.
    pub fn wrap(&self, time: f32) -> f32 {
        let duration = self.duration();
        if duration <= 0.0 {
            return self.start;
        }
        self.start + (time - self.start).rem_euclid(duration)
    }
}

/// Decomposed local transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trs {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Trs {
    pub fn from_matrix(m: &Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Clips of a scene plus the playback position.
#[derive(Clone, Debug, Default)]
pub struct Animations {
    pub clips: Vec<AnimationClip>,
    /// Rest pose of every animated node
    rest: Vec<(usize, Trs)>,
    active: usize,
    time: f32,
}

impl Animations {
    /// Collect clips and record the rest pose of the nodes they drive.
    pub fn new(clips: Vec<AnimationClip>, locals: &[Mat4]) -> Self {
        let mut rest: Vec<(usize, Trs)> = Vec::new();
        for channel in clips.iter().flat_map(|c| &c.channels) {
            if rest.iter().all(|(n, _)| *n != channel.node) {
                if let Some(local) = locals.get(channel.node) {
                    rest.push((channel.node, Trs::from_matrix(local)));
                }
            }
        }
        let time = clips.first().map_or(0.0, |c| c.start);
        Self {
            clips,
            rest,
            active: 0,
            time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn active(&self) -> Option<&AnimationClip> {
        self.clips.get(self.active)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Switch clips; playback restarts at the new clip's start.
    pub fn set_active(&mut self, index: usize) -> bool {
        if index >= self.clips.len() || index == self.active {
            return false;
        }
        self.active = index;
        self.time = self.clips[index].start;
        true
    }

    /// Move the playback position, wrapping around the clip.
    pub fn set_time(&mut self, time: f32) {
        if let Some(clip) = self.active() {
            self.time = clip.wrap(time);
        }
    }

    pub fn advance(&mut self, delta: f32) {
        self.set_time(self.time + delta);
    }

    pub fn rewind(&mut self) {
        self.time = self.active().map_or(0.0, |c| c.start);
    }

    /// Local matrices of the animated nodes at the current time.
    ///
    /// Nodes the active clip does not drive go back to their rest pose.
    pub fn pose(&self) -> Vec<(usize, Mat4)> {
        let mut poses: Vec<(usize, Trs)> = self.rest.clone();
        let Some(clip) = self.active() else {
            return poses.into_iter().map(|(n, trs)| (n, trs.to_matrix())).collect();
        };
        for channel in &clip.channels {
            let Some(value) = channel.sample(self.time) else { continue; };
            let Some((_, trs)) = poses.iter_mut().find(|(n, _)| *n == channel.node) else {
                continue;
            };
            match channel.property {
                Property::Translation => trs.translation = value.truncate(),
                Property::Rotation => trs.rotation = Quat::from_vec4(value).normalize(),
                Property::Scale => trs.scale = value.truncate(),
            }
        }
        poses.into_iter().map(|(n, trs)| (n, trs.to_matrix())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation_channel(interpolation: Interpolation, inputs: Vec<f32>, xs: &[f32]) -> Channel {
        Channel {
            node: 0,
            property: Property::Translation,
            interpolation,
            inputs,
            outputs: xs.iter().map(|&x| Vec4::new(x, 0.0, 0.0, 0.0)).collect(),
        }
    }

    #[test]
    fn test_linear_and_step_sampling() {
        let linear = translation_channel(Interpolation::Linear, vec![0.0, 2.0], &[0.0, 4.0]);
        assert_eq!(linear.sample(1.0).unwrap().x, 2.0);
        // clamped outside the key range
        assert_eq!(linear.sample(-1.0).unwrap().x, 0.0);
        assert_eq!(linear.sample(9.0).unwrap().x, 4.0);

        let step = translation_channel(Interpolation::Step, vec![0.0, 1.0, 2.0], &[1.0, 5.0, 9.0]);
        assert_eq!(step.sample(0.99).unwrap().x, 1.0);
        assert_eq!(step.sample(1.0).unwrap().x, 5.0);
        assert_eq!(step.sample(1.5).unwrap().x, 5.0);
    }

    #[test]
    fn test_cubic_spline_hits_keys_and_uses_tangents() {
        // (in, value, out) per key; zero tangents give a smoothstep
        let flat = translation_channel(
            Interpolation::CubicSpline,
            vec![0.0, 1.0],
            &[0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        );
        assert_eq!(flat.sample(0.0).unwrap().x, 0.0);
        assert_eq!(flat.sample(1.0).unwrap().x, 1.0);
        assert!((flat.sample(0.5).unwrap().x - 0.5).abs() < 1e-6);
        assert!((flat.sample(0.25).unwrap().x - 0.15625).abs() < 1e-6);

        // unit tangents on a unit ramp reproduce the line
        let ramp = translation_channel(
            Interpolation::CubicSpline,
            vec![0.0, 1.0],
            &[1.0, 0.0, 1.0, 1.0, 1.0, 1.0],
        );
        assert!((ramp.sample(0.3).unwrap().x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rotation_is_slerped() {
        let quarter = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let channel = Channel {
            node: 0,
            property: Property::Rotation,
            interpolation: Interpolation::Linear,
            inputs: vec![0.0, 1.0],
            outputs: vec![Vec4::from(Quat::IDENTITY), Vec4::from(quarter)],
        };
        let q = Quat::from_vec4(channel.sample(0.5).unwrap());
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(q.angle_between(expected) < 1e-4);
        assert!((q.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_short_outputs_are_ignored() {
        let mut c = translation_channel(Interpolation::CubicSpline, vec![0.0, 1.0], &[0.0, 1.0]);
        assert!(c.sample(0.5).is_none());
        c.inputs.clear();
        assert!(c.sample(0.5).is_none());
    }

    #[test]
    fn test_playback_wraps_and_rewinds() {
        let clip = AnimationClip::new(
            "move",
            vec![translation_channel(Interpolation::Linear, vec![1.0, 3.0], &[0.0, 2.0])],
        );
        assert_eq!((clip.start, clip.end), (1.0, 3.0));
        let mut anim = Animations::new(vec![clip], &[Mat4::IDENTITY]);
        assert_eq!(anim.time(), 1.0);
        anim.advance(2.5);
        assert!((anim.time() - 1.5).abs() < 1e-6);
        anim.rewind();
        assert_eq!(anim.time(), 1.0);
        anim.set_time(0.5);
        assert!((anim.time() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_pose_overrides_only_animated_properties() {
        let rest = Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::from_rotation_z(0.3), Vec3::ZERO);
        let clip = AnimationClip::new(
            "slide",
            vec![translation_channel(Interpolation::Linear, vec![0.0, 1.0], &[0.0, 10.0])],
        );
        let mut anim = Animations::new(vec![clip], &[rest]);
        anim.set_time(0.5);
        let pose = anim.pose();
        assert_eq!(pose.len(), 1);
        let trs = Trs::from_matrix(&pose[0].1);
        assert!((trs.translation - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
        assert!((trs.scale - Vec3::splat(2.0)).length() < 1e-5);
        assert!(trs.rotation.angle_between(Quat::from_rotation_z(0.3)) < 1e-4);
    }

    #[test]
    fn test_switching_clips_restarts_and_restores_rest_pose() {
        let a = AnimationClip::new(
            "a",
            vec![translation_channel(Interpolation::Linear, vec![0.0, 1.0], &[0.0, 1.0])],
        );
        let b = AnimationClip::new("b", Vec::new());
        let mut anim = Animations::new(vec![a, b], &[Mat4::from_translation(Vec3::Y)]);
        assert!(anim.set_active(1));
        assert!(!anim.set_active(1));
        assert!(!anim.set_active(7));
        assert_eq!(anim.time(), 0.0);
        let pose = anim.pose();
        assert!((pose[0].1.w_axis.truncate() - Vec3::Y).length() < 1e-6);
    }
}
