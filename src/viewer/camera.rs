//! Orbit camera using dolly

use dolly::prelude::*;
use glam::Vec3;

use crate::scene::descriptor::Camera;
use crate::scene::CameraView;
use crate::settings::CameraState;
use crate::util::BBox3f;

const MIN_DISTANCE: f32 = 0.01;
const MAX_DISTANCE: f32 = 10_000.0;

/// Orbit rig: target position, yaw/pitch around it, arm length.
pub struct OrbitCamera {
    rig: CameraRig,
    /// Vertical FOV in degrees
    pub fov_y_degrees: f32,
}

/// Yaw/pitch (degrees) and distance that put the eye at `eye` looking at `target`.
fn orbit_angles(eye: Vec3, target: Vec3) -> (f32, f32, f32) {
    let offset = eye - target;
    let distance = offset.length();
    if distance < 1e-6 {
        return (0.0, 0.0, MIN_DISTANCE);
    }
    let dir = offset / distance;
    let yaw = dir.x.atan2(dir.z).to_degrees();
    let pitch = (-dir.y).clamp(-1.0, 1.0).asin().to_degrees();
    (yaw, pitch, distance)
}

impl OrbitCamera {
    pub fn new(state: &CameraState) -> Self {
        let eye = Vec3::from(state.eye);
        let target = Vec3::from(state.target);
        let (yaw, pitch, distance) = orbit_angles(eye, target);

        let rig = CameraRig::builder()
            .with(Position::new(target))
            .with(YawPitch::new().yaw_degrees(yaw).pitch_degrees(pitch))
            .with(Smooth::new_rotation(0.0))
            .with(Arm::new(Vec3::new(0.0, 0.0, distance.clamp(MIN_DISTANCE, MAX_DISTANCE))))
            .with(Smooth::new_position(0.0))
            .build();

        Self {
            rig,
            fov_y_degrees: state.fov_y_degrees,
        }
    }

    /// Place the eye at `eye` looking at `target`.
    pub fn set_view(&mut self, eye: Vec3, target: Vec3) {
        let (yaw, pitch, distance) = orbit_angles(eye, target);
        self.rig.driver_mut::<Position>().position = target.into();
        let yp = self.rig.driver_mut::<YawPitch>();
        yp.yaw_degrees = yaw;
        yp.pitch_degrees = pitch;
        self.set_distance(distance);
    }

    /// Jump to a camera stored in the scene.
    pub fn apply_view(&mut self, view: &CameraView) {
        self.fov_y_degrees = view.fov_y_degrees.clamp(1.0, 170.0);
        self.set_view(view.eye, view.target);
    }

    /// Orbit around the target (drag, pixels)
    pub fn orbit(&mut self, delta_x: f32, delta_y: f32) {
        let sensitivity = 0.4;
        self.rig
            .driver_mut::<YawPitch>()
            .rotate_yaw_pitch(-delta_x * sensitivity, -delta_y * sensitivity);
    }

    /// Move the target in the view plane (drag, pixels)
    pub fn pan(&mut self, delta_x: f32, delta_y: f32) {
        let right: Vec3 = self.rig.final_transform.right();
        let up: Vec3 = self.rig.final_transform.up();
        let sensitivity = 0.0015 * self.distance();
        let offset = right * (-delta_x * sensitivity) + up * (delta_y * sensitivity);

        let target = self.target() + offset;
        self.rig.driver_mut::<Position>().position = target.into();
    }

    /// Scale the arm (scroll, points)
    pub fn zoom(&mut self, scroll: f32) {
        let factor = (-scroll * 0.002).exp();
        self.set_distance(self.distance() * factor);
    }

    /// Frame `bounds`. Empty bounds leave the camera unchanged.
    pub fn fit(&mut self, bounds: &BBox3f) {
        if bounds.is_empty() {
            return;
        }
        let radius = bounds.radius().max(1e-3);
        let half_fov = (self.fov_y_degrees.to_radians() * 0.5).max(0.05);
        self.rig.driver_mut::<Position>().position = bounds.center().into();
        self.set_distance(radius / half_fov.sin() * 1.1);
    }

    /// Back to the default view.
    pub fn reset(&mut self) {
        let default = CameraState::default();
        self.fov_y_degrees = default.fov_y_degrees;
        self.set_view(Vec3::from(default.eye), Vec3::from(default.target));
    }

    pub fn target(&self) -> Vec3 {
        let p = self.rig.driver::<Position>().position;
        Vec3::new(p.x, p.y, p.z)
    }

    pub fn distance(&self) -> f32 {
        self.rig.driver::<Arm>().offset.z
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.rig.driver_mut::<Arm>().offset.z = distance.clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    /// Update the rig (call each frame)
    pub fn update(&mut self, dt: f32) {
        self.rig.update(dt);
    }

    pub fn position(&self) -> Vec3 {
        let p = self.rig.final_transform.position;
        Vec3::new(p.x, p.y, p.z)
    }

    /// Render camera for an output of the given aspect ratio.
    pub fn camera(&self, aspect: f32) -> Camera {
        let t = &self.rig.final_transform;
        let eye = self.position();
        let forward: Vec3 = t.forward();
        let up: Vec3 = t.up();
        Camera::look_at(eye, eye + forward, up, self.fov_y_degrees.to_radians(), aspect)
    }

    pub fn state(&self) -> CameraState {
        CameraState {
            eye: self.position().to_array(),
            target: self.target().to_array(),
            fov_y_degrees: self.fov_y_degrees,
        }
    }
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new(&CameraState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled(state: &CameraState) -> OrbitCamera {
        let mut cam = OrbitCamera::new(state);
        cam.update(1.0);
        cam
    }

    #[test]
    fn test_persisted_view_round_trips() {
        let state = CameraState {
            eye: [3.0, 2.0, 4.0],
            target: [1.0, 0.5, -1.0],
            fov_y_degrees: 50.0,
        };
        let back = settled(&state).state();
        for i in 0..3 {
            assert!((back.eye[i] - state.eye[i]).abs() < 1e-3, "{:?} vs {:?}", back.eye, state.eye);
            assert!((back.target[i] - state.target[i]).abs() < 1e-6);
        }
        assert_eq!(back.fov_y_degrees, 50.0);
    }

    #[test]
    fn test_camera_looks_at_target() {
        let cam = settled(&CameraState::default());
        let c = cam.camera(1.0);
        let (_, dir) = c.primary_ray(glam::Vec2::splat(0.5));
        assert!(dir.dot(-Vec3::Z) > 0.999);
        assert!((c.eye - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_fit_frames_bounds() {
        let mut cam = OrbitCamera::default();
        let bounds = BBox3f::new(Vec3::new(9.0, -1.0, -1.0), Vec3::new(11.0, 1.0, 1.0));
        cam.fit(&bounds);
        cam.update(1.0);
        assert!((cam.target() - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
        assert!(cam.distance() > bounds.radius());

        let before = cam.distance();
        cam.fit(&BBox3f::EMPTY);
        assert_eq!(cam.distance(), before);
    }

    #[test]
    fn test_scene_camera_view_is_applied() {
        let mut cam = OrbitCamera::default();
        cam.apply_view(&CameraView {
            eye: Vec3::new(4.0, 1.0, 0.0),
            target: Vec3::new(0.0, 1.0, 0.0),
            up: Vec3::Y,
            fov_y_degrees: 30.0,
        });
        cam.update(1.0);
        assert!((cam.position() - Vec3::new(4.0, 1.0, 0.0)).length() < 1e-3);
        assert!((cam.target() - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(cam.fov_y_degrees, 30.0);
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.zoom(1e6);
        assert_eq!(cam.distance(), MIN_DISTANCE);
        cam.zoom(-1e6);
        assert_eq!(cam.distance(), MAX_DISTANCE);
        cam.reset();
        assert_eq!(cam.distance(), 5.0);
    }
}
