//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Movement direction relative to the camera basis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

/// Free-fly camera driven by yaw/pitch angles in degrees
///
/// The basis is recomputed from the angles on every mutation; pitch is
/// clamped short of +-90 degrees so the up vector never degenerates.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    yaw: f32,
    pitch: f32,
    world_up: Vec3,
    front: Vec3,
    right: Vec3,
    up: Vec3,
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    pub move_speed: f32,
    pub look_sensitivity: f32,
}

pub const PITCH_LIMIT: f32 = 89.0;
const FOV_MIN: f32 = 1.0;
const FOV_MAX: f32 = 45.0;

impl Default for Camera {
    fn default() -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            yaw: -90.0,
            pitch: 0.0,
            world_up: Vec3::Y,
            front: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
            near: 0.1,
            far: 100.0,
            fov_y: 45.0,
            move_speed: 8.0,
            look_sensitivity: 0.05,
        };
        camera.update_basis();
        camera
    }
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self::default();
        camera.set_pose(position, yaw, pitch);
        camera
    }

    /// Set position and orientation in one step
    pub fn set_pose(&mut self, position: Vec3, yaw: f32, pitch: f32) {
        self.position = position;
        self.yaw = yaw;
        self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.update_basis();
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Move along the camera basis
    pub fn movement(&mut self, directions: &[MoveDirection], dt: f32, speed_multiplier: f32) {
        let velocity = self.move_speed * speed_multiplier * dt;
        for direction in directions {
            let axis = match direction {
                MoveDirection::Forward => self.front,
                MoveDirection::Backward => -self.front,
                MoveDirection::Left => -self.right,
                MoveDirection::Right => self.right,
                MoveDirection::Up => self.world_up,
                MoveDirection::Down => -self.world_up,
            };
            self.position += axis * velocity;
        }
    }

    /// Apply a look delta in screen pixels
    pub fn look(&mut self, delta_x: f32, delta_y: f32) {
        self.yaw += delta_x * self.look_sensitivity;
        self.pitch = (self.pitch + delta_y * self.look_sensitivity)
            .clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.update_basis();
    }

    /// Narrow or widen the field of view
    pub fn zoom(&mut self, delta: f32) {
        self.fov_y = (self.fov_y - delta).clamp(FOV_MIN, FOV_MAX);
    }

    fn update_basis(&mut self) {
        let (yaw_sin, yaw_cos) = self.yaw.to_radians().sin_cos();
        let (pitch_sin, pitch_cos) = self.pitch.to_radians().sin_cos();
        self.front = Vec3::new(yaw_cos * pitch_cos, pitch_sin, yaw_sin * pitch_cos).normalize();
        self.right = self.front.cross(self.world_up).normalize();
        self.up = self.right.cross(self.front).normalize();
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front, self.up)
    }

    /// Get the projection matrix for the camera's own near/far
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix_with(aspect, self.near, self.far)
    }

    /// Projection with explicit near/far, used when fitting shadow cascades
    pub fn projection_matrix_with(&self, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y.to_radians(), aspect, near, far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// Build camera uniform data for shaders
    pub fn uniform_data(&self, aspect: f32) -> CameraUniformData {
        let view = self.view_matrix();
        let proj = self.projection_matrix(aspect);
        let view_proj = proj * view;

        CameraUniformData {
            view,
            proj,
            view_proj,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            inv_view_proj: view_proj.inverse(),
            position: self.position.extend(1.0),
            near_far: Vec4::new(self.near, self.far, 0.0, 0.0),
        }
    }
}

/// Camera uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub position: Vec4,
    pub near_far: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.look(0.0, 100000.0);
        assert!(camera.pitch() <= PITCH_LIMIT);
        camera.set_pose(Vec3::ZERO, 0.0, -180.0);
        assert_eq!(camera.pitch(), -PITCH_LIMIT);
        // up vector stays usable at the clamp
        assert!(camera.up().length() > 0.9);
    }

    #[test]
    fn basis_is_orthonormal() {
        let mut camera = Camera::default();
        camera.set_pose(Vec3::ZERO, 37.0, -20.0);
        assert_relative_eq!(camera.front().dot(camera.right()), 0.0, epsilon = 1e-6);
        assert_relative_eq!(camera.front().dot(camera.up()), 0.0, epsilon = 1e-6);
        assert_relative_eq!(camera.right().dot(camera.up()), 0.0, epsilon = 1e-6);
        assert_relative_eq!(camera.front().length(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn default_yaw_faces_negative_z() {
        let camera = Camera::default();
        assert_relative_eq!(camera.front().z, -1.0, epsilon = 1e-6);
        assert_relative_eq!(camera.right().x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn movement_follows_basis() {
        let mut camera = Camera::default();
        camera.set_pose(Vec3::ZERO, -90.0, 0.0);
        camera.movement(&[MoveDirection::Forward], 1.0, 1.0);
        assert!(camera.position.z < 0.0);
        let z = camera.position.z;
        camera.movement(&[MoveDirection::Right, MoveDirection::Up], 0.5, 2.0);
        assert!(camera.position.x > 0.0);
        assert!(camera.position.y > 0.0);
        assert_relative_eq!(camera.position.z, z, epsilon = 1e-6);
    }

    #[test]
    fn zoom_clamps_fov() {
        let mut camera = Camera::default();
        camera.zoom(1000.0);
        assert_eq!(camera.fov_y, 1.0);
        camera.zoom(-1000.0);
        assert_eq!(camera.fov_y, 45.0);
    }

    #[test]
    fn unproject_ndc_corner_lands_on_near_plane() {
        let camera = Camera::default();
        let inv = camera.uniform_data(1.0).inv_view_proj;
        let corner = inv * Vec4::new(-1.0, -1.0, 0.0, 1.0);
        let world = corner.truncate() / corner.w;
        let view_space = camera.view_matrix() * world.extend(1.0);
        assert_relative_eq!(view_space.z, -camera.near, epsilon = 1e-4);
    }
}
