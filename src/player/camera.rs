//! Third-person orbit camera with collision and idle pan.

use crate::constants::{
    CAMERA_COLLISION_EPSILON, CAMERA_COLLISION_RADIUS, CAMERA_LERP_RATE, CAMERA_MAX_DISTANCE,
    CAMERA_MIN_DISTANCE, CAMERA_PIVOT_HEIGHT, CAMERA_ZOOM_RATE, IDLE_ORBIT_TIMEOUT,
};
use glam::Vec3;

/// Per-frame camera output.
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame {
    pub position: Vec3,
    pub forward: Vec3,
    /// True when the camera is close enough that the avatar model
    /// should be hidden (effective first person).
    pub hide_avatar: bool,
}

pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub invert_mouse: bool,
    pub sensitivity: f32,
    pub idle_orbit_timeout: f32,
    distance_target: f32,
    distance_eased: f32,
    position: Vec3,
    idle_timer: f32,
    first_frame: bool,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: -0.35,
            invert_mouse: false,
            sensitivity: 0.003,
            idle_orbit_timeout: IDLE_ORBIT_TIMEOUT,
            distance_target: 8.0,
            distance_eased: 8.0,
            position: Vec3::ZERO,
            idle_timer: 0.0,
            first_frame: true,
        }
    }
}

impl OrbitCamera {
    pub fn distance_target(&self) -> f32 {
        self.distance_target
    }

    pub fn handle_mouse(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.idle_timer = 0.0;
        self.yaw -= dx * self.sensitivity;
        let dy = if self.invert_mouse { -dy } else { dy };
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-1.5, 1.5);
    }

    pub fn handle_scroll(&mut self, delta: f32) {
        self.idle_timer = 0.0;
        self.distance_target =
            (self.distance_target - delta).clamp(CAMERA_MIN_DISTANCE, CAMERA_MAX_DISTANCE);
    }

    pub fn notify_input(&mut self) {
        self.idle_timer = 0.0;
    }

    /// Unit direction the camera looks along.
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
        )
    }

    /// Advance the camera toward its orbit position around `feet`.
    /// `raycast` reports the nearest obstruction along a ray, used to
    /// pull the camera in front of walls.
    pub fn update(
        &mut self,
        dt: f32,
        feet: Vec3,
        mut raycast: impl FnMut(Vec3, Vec3, f32) -> Option<f32>,
    ) -> CameraFrame {
        self.idle_timer += dt;
        if self.idle_timer >= self.idle_orbit_timeout {
            // Slow automatic pan until any input cancels it.
            self.yaw += 0.1 * dt;
        }

        let zoom_step = (CAMERA_ZOOM_RATE * dt).min(1.0);
        self.distance_eased += (self.distance_target - self.distance_eased) * zoom_step;

        let pivot = feet + Vec3::new(0.0, 0.0, CAMERA_PIVOT_HEIGHT);
        let back = -self.forward();
        let mut distance = self.distance_eased;
        if let Some(hit) = raycast(pivot, back, distance + CAMERA_COLLISION_RADIUS) {
            let pulled = hit - CAMERA_COLLISION_RADIUS - CAMERA_COLLISION_EPSILON;
            distance = distance.min(pulled.max(CAMERA_MIN_DISTANCE));
        }

        let desired = pivot + back * distance;
        if self.first_frame {
            self.position = desired;
            self.first_frame = false;
        } else {
            let step = (CAMERA_LERP_RATE * dt).min(1.0);
            self.position += (desired - self.position) * step;
        }

        CameraFrame {
            position: self.position,
            forward: self.forward(),
            hide_avatar: distance < CAMERA_MIN_DISTANCE + 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_clamps_to_range() {
        let mut cam = OrbitCamera::default();
        cam.handle_scroll(100.0);
        assert_eq!(cam.distance_target(), CAMERA_MIN_DISTANCE);
        cam.handle_scroll(-500.0);
        assert_eq!(cam.distance_target(), CAMERA_MAX_DISTANCE);
    }

    #[test]
    fn wall_pulls_camera_in() {
        let mut cam = OrbitCamera::default();
        let feet = Vec3::ZERO;
        // Obstruction 2 m behind the pivot.
        let frame = cam.update(10.0, feet, |_, _, _| Some(2.0));
        let pivot = feet + Vec3::new(0.0, 0.0, CAMERA_PIVOT_HEIGHT);
        let dist = (frame.position - pivot).length();
        assert!(dist <= 2.0);
        assert!(!frame.hide_avatar);
    }

    #[test]
    fn point_blank_wall_hides_avatar() {
        let mut cam = OrbitCamera::default();
        let frame = cam.update(10.0, Vec3::ZERO, |_, _, _| Some(0.4));
        assert!(frame.hide_avatar);
    }

    #[test]
    fn idle_orbit_starts_and_input_cancels() {
        let mut cam = OrbitCamera::default();
        cam.idle_orbit_timeout = 1.0;
        let yaw0 = cam.yaw;
        for _ in 0..30 {
            cam.update(0.1, Vec3::ZERO, |_, _, _| None);
        }
        assert!(cam.yaw != yaw0);

        let drifted = cam.yaw;
        cam.handle_mouse(0.0, 1.0); // any input resets the idle timer
        cam.update(0.1, Vec3::ZERO, |_, _, _| None);
        assert_eq!(cam.yaw, drifted);
    }

    #[test]
    fn zoom_eases_rather_than_snaps() {
        let mut cam = OrbitCamera::default();
        cam.update(10.0, Vec3::ZERO, |_, _, _| None); // settle
        cam.handle_scroll(-10.0); // target 18
        let frame = cam.update(0.016, Vec3::ZERO, |_, _, _| None);
        let pivot = Vec3::new(0.0, 0.0, CAMERA_PIVOT_HEIGHT);
        let dist = (frame.position - pivot).length();
        assert!(dist > 8.0 && dist < 18.0);
    }
}
