//! Scene management

pub mod camera;
pub mod cascade;
mod light;
mod transform;

pub use camera::{Camera, CameraUniformData, MoveDirection};
pub use cascade::{Cascade, CascadeFitter, CascadeSplits};
pub use light::*;
pub use transform::*;

use glam::Vec3;

/// A renderable object in the scene
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub mesh_id: usize,
    pub material_id: usize,
    pub transform: Transform,
    /// Whether the object renders into the shadow map
    pub casts_shadows: bool,
}

impl RenderObject {
    pub fn new(mesh_id: usize, material_id: usize) -> Self {
        Self {
            mesh_id,
            material_id,
            transform: Transform::default(),
            casts_shadows: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }

    pub fn without_shadows(mut self) -> Self {
        self.casts_shadows = false;
        self
    }
}

/// The scene containing all renderable content
///
/// Owned and mutated by the frame loop between draws; render passes only
/// ever read it through the per-frame execute context.
pub struct Scene {
    pub camera: Camera,
    pub point_lights: Vec<PointLight>,
    pub directional_light: Option<DirectionalLight>,
    pub objects: Vec<RenderObject>,
    pub ambient_light: Vec3,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            camera: Camera::default(),
            point_lights: Vec::new(),
            directional_light: None,
            objects: Vec::new(),
            ambient_light: Vec3::new(0.03, 0.03, 0.03),
        }
    }

    /// Add a point light to the scene
    pub fn add_point_light(&mut self, position: Vec3, color: Vec3, intensity: f32) {
        self.point_lights
            .push(PointLight::new(position, color, intensity));
    }

    /// Set the directional light
    pub fn set_directional_light(&mut self, direction: Vec3, color: Vec3, intensity: f32) {
        self.directional_light = Some(DirectionalLight::new(direction, color, intensity));
    }

    /// Add a render object to the scene
    pub fn add_object(&mut self, object: RenderObject) -> usize {
        let id = self.objects.len();
        self.objects.push(object);
        id
    }

    /// Objects that render into the shadow map
    pub fn shadow_casters(&self) -> impl Iterator<Item = &RenderObject> {
        self.objects.iter().filter(|o| o.casts_shadows)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
