//! CPU-side cubemap data
//!
//! Environment precompute runs on the CPU at startup and uploads the
//! results once; faces follow the wgpu layer order +X, -X, +Y, -Y,
//! +Z, -Z.

use crate::resources::AssetError;
use glam::Vec3;
use half::f16;
use std::path::Path;

pub const FACE_COUNT: usize = 6;

/// Linear RGB cubemap held in memory
#[derive(Debug, Clone)]
pub struct CubemapData {
    size: u32,
    faces: [Vec<Vec3>; FACE_COUNT],
}

impl CubemapData {
    pub fn new(size: u32) -> Self {
        let face = vec![Vec3::ZERO; (size * size) as usize];
        Self {
            size,
            faces: std::array::from_fn(|_| face.clone()),
        }
    }

    /// Constant-color environment, used as a fallback and in tests
    pub fn solid(size: u32, color: Vec3) -> Self {
        let face = vec![color; (size * size) as usize];
        Self {
            size,
            faces: std::array::from_fn(|_| face.clone()),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texel(&self, face: usize, x: u32, y: u32) -> Vec3 {
        self.faces[face][(y * self.size + x) as usize]
    }

    pub fn set_texel(&mut self, face: usize, x: u32, y: u32, color: Vec3) {
        self.faces[face][(y * self.size + x) as usize] = color;
    }

    /// World direction through the center of a texel
    pub fn direction_for_texel(face: usize, x: u32, y: u32, size: u32) -> Vec3 {
        let u = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
        let v = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
        Self::direction_for_uv(face, u, v)
    }

    fn direction_for_uv(face: usize, u: f32, v: f32) -> Vec3 {
        match face {
            0 => Vec3::new(1.0, -v, -u),
            1 => Vec3::new(-1.0, -v, u),
            2 => Vec3::new(u, 1.0, v),
            3 => Vec3::new(u, -1.0, -v),
            4 => Vec3::new(u, -v, 1.0),
            _ => Vec3::new(-u, -v, -1.0),
        }
        .normalize()
    }

    /// Nearest-texel lookup along a direction
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        let (face, u, v) = Self::face_uv(dir);
        let size = self.size as f32;
        let x = (((u * 0.5 + 0.5) * size) as u32).min(self.size - 1);
        let y = (((v * 0.5 + 0.5) * size) as u32).min(self.size - 1);
        self.texel(face, x, y)
    }

    fn face_uv(dir: Vec3) -> (usize, f32, f32) {
        let abs = dir.abs();
        if abs.x >= abs.y && abs.x >= abs.z {
            if dir.x > 0.0 {
                (0, -dir.z / abs.x, -dir.y / abs.x)
            } else {
                (1, dir.z / abs.x, -dir.y / abs.x)
            }
        } else if abs.y >= abs.z {
            if dir.y > 0.0 {
                (2, dir.x / abs.y, dir.z / abs.y)
            } else {
                (3, dir.x / abs.y, -dir.z / abs.y)
            }
        } else if dir.z > 0.0 {
            (4, dir.x / abs.z, -dir.y / abs.z)
        } else {
            (5, -dir.x / abs.z, -dir.y / abs.z)
        }
    }

    /// Project an equirectangular HDR image onto the six faces
    pub fn from_equirect(image: &EquirectImage, size: u32) -> Self {
        let mut cubemap = Self::new(size);
        for face in 0..FACE_COUNT {
            for y in 0..size {
                for x in 0..size {
                    let dir = Self::direction_for_texel(face, x, y, size);
                    cubemap.set_texel(face, x, y, image.sample(dir));
                }
            }
        }
        cubemap
    }

    /// One face as rgba16f texel bytes for upload
    pub fn face_rgba16f(&self, face: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.size * self.size * 8) as usize);
        for color in &self.faces[face] {
            for channel in [color.x, color.y, color.z, 1.0] {
                bytes.extend_from_slice(&f16::from_f32(channel).to_le_bytes());
            }
        }
        bytes
    }
}

/// Equirectangular HDR environment image in linear RGB
pub struct EquirectImage {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl EquirectImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.display().to_string(),
            source,
        })?;
        let rgb = img.to_rgb32f();
        let (width, height) = (rgb.width(), rgb.height());
        let pixels = rgb
            .pixels()
            .map(|p| Vec3::new(p.0[0], p.0[1], p.0[2]))
            .collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Spherical lookup with equirectangular mapping
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        let dir = dir.normalize();
        let u = 0.5 + dir.z.atan2(dir.x) / (2.0 * std::f32::consts::PI);
        let v = 0.5 - dir.y.asin() / std::f32::consts::PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn face_centers_point_along_axes() {
        let size = 9;
        let center = size / 2;
        let expected = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        for (face, axis) in expected.iter().enumerate() {
            let dir = CubemapData::direction_for_texel(face, center, center, size);
            assert!(dir.dot(*axis) > 0.99, "face {} points {:?}", face, dir);
        }
    }

    #[test]
    fn texel_direction_roundtrips_through_sample() {
        let size = 16;
        let mut cubemap = CubemapData::new(size);
        cubemap.set_texel(3, 5, 11, Vec3::new(1.0, 2.0, 3.0));
        let dir = CubemapData::direction_for_texel(3, 5, 11, size);
        assert_relative_eq!(cubemap.sample(dir).x, 1.0);
        assert_relative_eq!(cubemap.sample(dir).z, 3.0);
    }

    #[test]
    fn solid_environment_samples_uniformly(){
        let cubemap = CubemapData::solid(8, Vec3::splat(0.7));
        for dir in [Vec3::X, Vec3::new(0.3, -0.8, 0.5).normalize(), Vec3::NEG_Z] {
            assert_relative_eq!(cubemap.sample(dir).x, 0.7);
        }
    }

    #[test]
    fn face_bytes_cover_every_texel() {
        let cubemap = CubemapData::solid(4, Vec3::ONE);
        assert_eq!(cubemap.face_rgba16f(0).len(), 4 * 4 * 8);
    }
}
