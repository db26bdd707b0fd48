//! Surface materials

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Surface parameters written into the G-buffer
///
/// `specular` tints the reflective response; `roughness` drives both the
/// specular lobe width and the IBL prefilter mip selection.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec3,
    pub specular: Vec3,
    pub roughness: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec3::splat(0.8),
            specular: Vec3::splat(0.5),
            roughness: 0.5,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec3) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_specular(mut self, specular: Vec3) -> Self {
        self.specular = specular;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn uniform_data(&self) -> MaterialUniformData {
        MaterialUniformData {
            base_color: self.base_color.extend(1.0),
            specular_roughness: self.specular.extend(self.roughness),
        }
    }
}

/// Material uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniformData {
    pub base_color: Vec4,
    /// rgb = specular tint, a = roughness
    pub specular_roughness: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roughness_is_clamped() {
        let material = Material::new("test").with_roughness(3.0);
        assert_eq!(material.roughness, 1.0);
        assert_eq!(material.uniform_data().specular_roughness.w, 1.0);
    }
}
