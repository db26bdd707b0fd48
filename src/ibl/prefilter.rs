//! Specular environment prefiltering
//!
//! Builds the mip chain sampled by the split-sum ambient term: mip
//! level `m` holds the environment convolved with a GGX lobe of
//! roughness `m / (mips - 1)`.

use crate::ibl::cubemap::{CubemapData, FACE_COUNT};
use glam::Vec3;
use std::f32::consts::PI;

const SAMPLES: u32 = 1024;

/// Van der Corput radical inverse for the Hammersley sequence
pub(crate) fn radical_inverse_vdc(mut bits: u32) -> f32 {
    bits = (bits << 16) | (bits >> 16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

pub(crate) fn hammersley(i: u32, n: u32) -> (f32, f32) {
    (i as f32 / n as f32, radical_inverse_vdc(i))
}

/// GGX importance sample around a normal
pub(crate) fn importance_sample_ggx(xi: (f32, f32), normal: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;
    let phi = 2.0 * PI * xi.0;
    let cos_theta = ((1.0 - xi.1) / (1.0 + (a * a - 1.0) * xi.1)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();

    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if normal.z.abs() > 0.999 { Vec3::X } else { Vec3::Z };
    let tangent = up.cross(normal).normalize();
    let bitangent = normal.cross(tangent);
    (tangent * h.x + bitangent * h.y + normal * h.z).normalize()
}

/// Build the prefiltered mip chain
///
/// Mip 0 copies the environment at `base_size`; subsequent mips halve
/// in size and widen the lobe.
pub fn prefilter(environment: &CubemapData, base_size: u32, mip_count: u32) -> Vec<CubemapData> {
    (0..mip_count)
        .map(|mip| {
            let size = (base_size >> mip).max(1);
            let roughness = mip as f32 / (mip_count - 1).max(1) as f32;
            prefilter_level(environment, size, roughness)
        })
        .collect()
}

fn prefilter_level(environment: &CubemapData, size: u32, roughness: f32) -> CubemapData {
    let mut level = CubemapData::new(size);
    for face in 0..FACE_COUNT {
        for y in 0..size {
            for x in 0..size {
                let dir = CubemapData::direction_for_texel(face, x, y, size);
                level.set_texel(face, x, y, prefilter_direction(environment, dir, roughness));
            }
        }
    }
    level
}

fn prefilter_direction(environment: &CubemapData, reflection: Vec3, roughness: f32) -> Vec3 {
    if roughness <= 0.0 {
        return environment.sample(reflection);
    }

    // Split-sum approximation: normal and view collapse onto the
    // reflection vector
    let normal = reflection;
    let view = reflection;

    let mut sum = Vec3::ZERO;
    let mut weight = 0.0;
    for i in 0..SAMPLES {
        let xi = hammersley(i, SAMPLES);
        let halfway = importance_sample_ggx(xi, normal, roughness);
        let light = (2.0 * view.dot(halfway) * halfway - view).normalize();
        let n_dot_l = normal.dot(light);
        if n_dot_l > 0.0 {
            sum += environment.sample(light) * n_dot_l;
            weight += n_dot_l;
        }
    }
    if weight > 0.0 {
        sum / weight
    } else {
        environment.sample(reflection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_halves_in_size() {
        let environment = CubemapData::solid(32, Vec3::ONE);
        let mips = prefilter(&environment, 32, 5);
        assert_eq!(mips.len(), 5);
        assert_eq!(mips[0].size(), 32);
        assert_eq!(mips[1].size(), 16);
        assert_eq!(mips[4].size(), 2);
    }

    #[test]
    fn uniform_environment_prefilters_to_itself() {
        let environment = CubemapData::solid(16, Vec3::splat(0.6));
        for mip in prefilter(&environment, 16, 3) {
            let texel = mip.sample(Vec3::new(0.4, 0.7, -0.2).normalize());
            assert!((texel.x - 0.6).abs() < 1e-3, "texel {:?}", texel);
        }
    }

    #[test]
    fn rough_mips_spread_a_highlight() {
        let mut environment = CubemapData::solid(32, Vec3::ZERO);
        // Bright patch on the +Z face
        for y in 12..20 {
            for x in 12..20 {
                environment.set_texel(4, x, y, Vec3::splat(50.0));
            }
        }
        let mips = prefilter(&environment, 32, 5);

        // Off-axis direction: dark at roughness 0, lit once the lobe widens
        let off_axis = Vec3::new(0.35, 0.0, 1.0).normalize();
        let sharp = mips[0].sample(off_axis);
        let rough = mips[4].sample(off_axis);
        assert!(rough.x > sharp.x);
    }

    #[test]
    fn ggx_samples_stay_in_upper_hemisphere() {
        let normal = Vec3::new(0.3, 0.6, 0.74).normalize();
        for i in 0..SAMPLES {
            let h = importance_sample_ggx(hammersley(i, SAMPLES), normal, 0.5);
            assert!(h.dot(normal) > 0.0);
            assert!((h.length() - 1.0).abs() < 1e-5);
        }
    }
}
