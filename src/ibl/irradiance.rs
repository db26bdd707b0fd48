//! Diffuse irradiance convolution

use crate::ibl::cubemap::{CubemapData, FACE_COUNT};
use glam::Vec3;
use std::f32::consts::PI;

/// Angular step of the hemisphere sweep
const SAMPLE_DELTA: f32 = 0.075;

/// Cosine-weighted convolution of the environment
///
/// Each output texel integrates incoming radiance over the hemisphere
/// around its direction, so a surface normal lookup returns diffuse
/// irradiance directly. A uniform environment convolves to itself.
pub fn convolve(environment: &CubemapData, out_size: u32) -> CubemapData {
    let mut irradiance = CubemapData::new(out_size);

    for face in 0..FACE_COUNT {
        for y in 0..out_size {
            for x in 0..out_size {
                let normal = CubemapData::direction_for_texel(face, x, y, out_size);
                irradiance.set_texel(face, x, y, convolve_direction(environment, normal));
            }
        }
    }
    irradiance
}

fn convolve_direction(environment: &CubemapData, normal: Vec3) -> Vec3 {
    let up = if normal.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let right = up.cross(normal).normalize();
    let up = normal.cross(right);

    let mut sum = Vec3::ZERO;
    let mut count = 0u32;

    let mut phi = 0.0;
    while phi < 2.0 * PI {
        let mut theta = 0.0;
        while theta < 0.5 * PI {
            let tangent = Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            let world = right * tangent.x + up * tangent.y + normal * tangent.z;
            sum += environment.sample(world) * theta.cos() * theta.sin();
            count += 1;
            theta += SAMPLE_DELTA;
        }
        phi += SAMPLE_DELTA;
    }

    sum * PI / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_environment_convolves_to_itself() {
        let environment = CubemapData::solid(16, Vec3::splat(1.0));
        let irradiance = convolve(&environment, 8);

        for face in 0..FACE_COUNT {
            for y in 0..8 {
                for x in 0..8 {
                    let texel = irradiance.texel(face, x, y);
                    assert!(
                        (texel.x - 1.0).abs() < 0.05,
                        "face {} texel ({}, {}) = {:?}",
                        face,
                        x,
                        y,
                        texel
                    );
                    assert!((texel.x - texel.y).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn irradiance_blurs_a_point_source() {
        // A single bright texel spreads over the whole facing hemisphere
        let mut environment = CubemapData::solid(16, Vec3::ZERO);
        environment.set_texel(2, 8, 8, Vec3::splat(100.0));
        let irradiance = convolve(&environment, 8);

        let toward = irradiance.sample(Vec3::Y);
        let away = irradiance.sample(Vec3::NEG_Y);
        assert!(toward.x > away.x);
        // Far less than the source but nonzero for any normal whose
        // hemisphere contains the source
        assert!(toward.x < 100.0);
        let oblique = irradiance.sample(Vec3::new(1.0, 1.0, 0.0).normalize());
        assert!(oblique.x > 0.0);
    }
}
