//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Point light with quadratic distance attenuation
#[derive(Debug, Clone)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Attenuation coefficients: constant, linear, quadratic
    pub attenuation: Vec3,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            attenuation: Vec3::new(1.0, 0.7, 1.8),
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            ..Default::default()
        }
    }

    /// Attenuation factor at distance `d`
    pub fn attenuation_at(&self, d: f32) -> f32 {
        let Vec3 { x: c, y: l, z: q } = self.attenuation;
        1.0 / (c + l * d + q * d * d)
    }

    /// Distance at which the light's brightest channel falls to `min_intensity`
    ///
    /// Solves the attenuation quadratic so that
    /// `max_channel * attenuation(range) == min_intensity`. Used as the
    /// bounding-sphere radius by the light-volume accumulator.
    pub fn effective_range(&self, min_intensity: f32) -> f32 {
        let max_channel = self.color.max_element() * self.intensity;
        if max_channel <= min_intensity {
            return 0.0;
        }

        let Vec3 { x: c, y: l, z: q } = self.attenuation;
        let rhs = c - max_channel / min_intensity;
        if q.abs() < f32::EPSILON {
            if l.abs() < f32::EPSILON {
                return f32::INFINITY;
            }
            return -rhs / l;
        }

        (-l + (l * l - 4.0 * q * rhs).sqrt()) / (2.0 * q)
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self, range: f32) -> GpuLightData {
        GpuLightData {
            position_range: self.position.extend(range),
            color_intensity: Vec4::new(self.color.x, self.color.y, self.color.z, self.intensity),
            direction_type: Vec4::new(0.0, 0.0, 0.0, 0.0), // type 0 = point
            attenuation: self.attenuation.extend(0.0),
        }
    }
}

/// Directional light (like the sun); the shadow-casting light
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self) -> GpuLightData {
        GpuLightData {
            position_range: Vec4::new(0.0, 0.0, 0.0, f32::INFINITY),
            color_intensity: Vec4::new(self.color.x, self.color.y, self.color.z, self.intensity),
            direction_type: Vec4::new(
                self.direction.x,
                self.direction.y,
                self.direction.z,
                1.0, // type 1 = directional
            ),
            attenuation: Vec4::ZERO,
        }
    }
}

/// GPU-friendly light data structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuLightData {
    /// xyz = position, w = effective range
    pub position_range: Vec4,
    /// xyz = color, w = intensity
    pub color_intensity: Vec4,
    /// xyz = direction, w = light type (0=point, 1=directional)
    pub direction_type: Vec4,
    /// xyz = constant/linear/quadratic coefficients
    pub attenuation: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn attenuation_at_range_matches_threshold() {
        let light = PointLight {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 2.0,
            attenuation: Vec3::new(1.0, 0.7, 1.8),
        };
        let threshold = 0.05;
        let range = light.effective_range(threshold);
        assert!(range > 0.0);
        let brightest = light.color.max_element() * light.intensity;
        assert_relative_eq!(
            brightest * light.attenuation_at(range),
            threshold,
            epsilon = 1e-4
        );
    }

    #[test]
    fn dim_light_has_zero_range() {
        let light = PointLight {
            intensity: 0.01,
            ..Default::default()
        };
        assert_eq!(light.effective_range(0.05), 0.0);
    }

    #[test]
    fn range_grows_with_intensity() {
        let dim = PointLight::new(Vec3::ZERO, Vec3::ONE, 1.0);
        let bright = PointLight::new(Vec3::ZERO, Vec3::ONE, 10.0);
        assert!(bright.effective_range(0.05) > dim.effective_range(0.05));
    }
}
