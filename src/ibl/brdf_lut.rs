//! Split-sum BRDF integration lookup table
//!
//! The LUT is environment independent, so one computation is shared by
//! every renderer instance behind a mutex-guarded cache.

use crate::ibl::prefilter::{hammersley, importance_sample_ggx};
use glam::Vec3;
use half::f16;
use parking_lot::Mutex;
use std::sync::Arc;

pub const BRDF_LUT_SIZE: u32 = 256;
const SAMPLES: u32 = 64;

static LUT_CACHE: Mutex<Option<Arc<Vec<u8>>>> = Mutex::new(None);

/// Geometry term with the IBL k remapping
fn geometry_smith_ibl(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    let ggx_v = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let ggx_l = n_dot_l / (n_dot_l * (1.0 - k) + k);
    ggx_v * ggx_l
}

/// Integrate the specular BRDF for one (n_dot_v, roughness) pair
///
/// Returns the Fresnel scale and bias of the split-sum approximation.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32) -> (f32, f32) {
    let n_dot_v = n_dot_v.max(1e-4);
    let view = Vec3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let normal = Vec3::Z;

    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..SAMPLES {
        let xi = hammersley(i, SAMPLES);
        let halfway = importance_sample_ggx(xi, normal, roughness);
        let light = (2.0 * view.dot(halfway) * halfway - view).normalize();

        let n_dot_l = light.z.max(0.0);
        if n_dot_l <= 0.0 {
            continue;
        }
        let n_dot_h = halfway.z.max(0.0);
        let v_dot_h = view.dot(halfway).max(0.0);

        let g = geometry_smith_ibl(n_dot_v, n_dot_l, roughness);
        let g_vis = g * v_dot_h / (n_dot_h * n_dot_v).max(1e-4);
        let fc = (1.0 - v_dot_h).powi(5);

        scale += (1.0 - fc) * g_vis;
        bias += fc * g_vis;
    }
    (scale / SAMPLES as f32, bias / SAMPLES as f32)
}

/// The full LUT as rg16f texel bytes, computed once per process
pub fn brdf_lut_rg16f() -> Arc<Vec<u8>> {
    let mut cache = LUT_CACHE.lock();
    if let Some(lut) = cache.as_ref() {
        return Arc::clone(lut);
    }

    let size = BRDF_LUT_SIZE;
    let mut bytes = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        // v axis is roughness
        let roughness = (y as f32 + 0.5) / size as f32;
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            let (scale, bias) = integrate_brdf(n_dot_v, roughness);
            bytes.extend_from_slice(&f16::from_f32(scale).to_le_bytes());
            bytes.extend_from_slice(&f16::from_f32(bias).to_le_bytes());
        }
    }

    let lut = Arc::new(bytes);
    *cache = Some(Arc::clone(&lut));
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integration_stays_in_unit_range() {
        for &n_dot_v in &[0.05, 0.3, 0.7, 1.0] {
            for &roughness in &[0.0, 0.25, 0.6, 1.0] {
                let (scale, bias) = integrate_brdf(n_dot_v, roughness);
                assert!((0.0..=1.2).contains(&scale), "scale {}", scale);
                assert!((0.0..=1.0).contains(&bias), "bias {}", bias);
            }
        }
    }

    #[test]
    fn smooth_grazing_angles_are_fresnel_dominated() {
        // At grazing incidence on a smooth surface the bias term takes
        // over from the scale term
        let (_, grazing_bias) = integrate_brdf(0.02, 0.1);
        let (_, facing_bias) = integrate_brdf(0.98, 0.1);
        assert!(grazing_bias > facing_bias);
    }

    #[test]
    fn lut_is_cached_between_calls() {
        let first = brdf_lut_rg16f();
        let second = brdf_lut_rg16f();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), (BRDF_LUT_SIZE * BRDF_LUT_SIZE * 4) as usize);
    }
}
