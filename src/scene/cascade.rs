//! Cascaded shadow map splitting and light-space fitting

use crate::scene::camera::Camera;
use crate::scene::light::DirectionalLight;
use glam::{Mat4, Vec3, Vec4};

/// Depth-range partition of the camera frustum
///
/// Fractions run from 0 at the camera near plane to 1 at the far plane
/// and are strictly increasing.
#[derive(Debug, Clone)]
pub struct CascadeSplits {
    fractions: Vec<f32>,
}

impl CascadeSplits {
    /// Near-weighted splits: shadow resolution matters most close to the
    /// viewer, so fractions follow a quadratic curve toward the near plane
    pub fn practical(count: usize) -> Self {
        assert!(count > 0, "cascade count must be positive");
        let fractions = (0..=count)
            .map(|i| {
                let t = i as f32 / count as f32;
                t * t
            })
            .collect();
        Self { fractions }
    }

    /// Evenly spaced splits
    pub fn uniform(count: usize) -> Self {
        assert!(count > 0, "cascade count must be positive");
        let fractions = (0..=count).map(|i| i as f32 / count as f32).collect();
        Self { fractions }
    }

    /// Custom split fractions; must start at 0, end at 1 and increase
    pub fn from_fractions(fractions: Vec<f32>) -> Self {
        assert!(fractions.len() >= 2, "need at least one cascade");
        assert_eq!(fractions[0], 0.0, "first fraction must be 0");
        assert_eq!(*fractions.last().expect("non-empty"), 1.0, "last fraction must be 1");
        assert!(
            fractions.windows(2).all(|w| w[0] < w[1]),
            "fractions must be strictly increasing"
        );
        Self { fractions }
    }

    pub fn count(&self) -> usize {
        self.fractions.len() - 1
    }

    /// Contiguous `[near_i, far_i]` depth ranges covering `[near, far]`
    pub fn split_depths(&self, near: f32, far: f32) -> Vec<(f32, f32)> {
        let span = far - near;
        self.fractions
            .windows(2)
            .map(|w| (near + w[0] * span, near + w[1] * span))
            .collect()
    }
}

/// One fitted shadow cascade
#[derive(Debug, Clone, Copy)]
pub struct Cascade {
    /// View-space depth range this cascade covers
    pub near: f32,
    pub far: f32,
    /// Light-space orthographic view-projection for the shadow pass
    pub view_proj: Mat4,
}

/// Fits a light-space orthographic box around each sub-frustum
///
/// The z bounds are widened asymmetrically: the maximum-z bound moves
/// toward the light so off-slice casters still land in the shadow map,
/// and the minimum-z bound moves away so distant receivers keep a valid
/// depth to compare against.
#[derive(Debug, Clone)]
pub struct CascadeFitter {
    /// Multiplier on the light-space minimum z, stretching the box away
    /// from the light (the orthographic far plane)
    pub z_stretch_away: f32,
    /// Multiplier on the light-space maximum z, stretching the box
    /// toward the light (the orthographic near plane)
    pub z_stretch_toward: f32,
    /// Minimum light-space depth extent, guards a singular projection
    pub min_depth: f32,
}

impl Default for CascadeFitter {
    fn default() -> Self {
        Self {
            z_stretch_away: 10.0,
            z_stretch_toward: 2.0,
            min_depth: 0.01,
        }
    }
}

/// NDC cube corners with wgpu's zero-to-one depth range
const NDC_CORNERS: [Vec3; 8] = [
    Vec3::new(-1.0, -1.0, 0.0),
    Vec3::new(1.0, -1.0, 0.0),
    Vec3::new(-1.0, 1.0, 0.0),
    Vec3::new(1.0, 1.0, 0.0),
    Vec3::new(-1.0, -1.0, 1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
];

impl CascadeFitter {
    /// Fit one cascade per split range
    pub fn fit(
        &self,
        camera: &Camera,
        aspect: f32,
        light: &DirectionalLight,
        splits: &CascadeSplits,
    ) -> Vec<Cascade> {
        splits
            .split_depths(camera.near, camera.far)
            .into_iter()
            .map(|(near, far)| Cascade {
                near,
                far,
                view_proj: self.fit_range(camera, aspect, light.direction, near, far),
            })
            .collect()
    }

    fn fit_range(
        &self,
        camera: &Camera,
        aspect: f32,
        light_dir: Vec3,
        near: f32,
        far: f32,
    ) -> Mat4 {
        let corners = Self::frustum_corners(camera, aspect, near, far);

        let centroid = corners.iter().sum::<Vec3>() / corners.len() as f32;
        let light_view = Self::light_view(centroid, light_dir);

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for corner in &corners {
            let p = (light_view * corner.extend(1.0)).truncate();
            min = min.min(p);
            max = max.max(p);
        }

        self.widen_depth(&mut min.z, &mut max.z);

        // Light looks down -z, so the closest plane sits at max z
        let projection =
            Mat4::orthographic_rh(min.x, max.x, min.y, max.y, -max.z, -min.z);
        projection * light_view
    }

    /// World-space corners of the sub-frustum spanning `[near, far]`
    fn frustum_corners(camera: &Camera, aspect: f32, near: f32, far: f32) -> [Vec3; 8] {
        let view_proj = camera.projection_matrix_with(aspect, near, far) * camera.view_matrix();
        let inv = view_proj.inverse();
        NDC_CORNERS.map(|ndc| {
            let p: Vec4 = inv * ndc.extend(1.0);
            p.truncate() / p.w
        })
    }

    fn light_view(centroid: Vec3, light_dir: Vec3) -> Mat4 {
        let dir = light_dir.normalize();
        let up = if dir.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_at_rh(centroid - dir, centroid, up)
    }

    /// Stretch the light-space z bounds and enforce a minimum extent
    ///
    /// The light looks down -z, so max z is the bound toward the light
    /// and min z the bound away from it. The multiply/divide split keeps
    /// each stretch moving outward whatever the bound's sign.
    fn widen_depth(&self, min_z: &mut f32, max_z: &mut f32) {
        if *max_z < 0.0 {
            *max_z /= self.z_stretch_toward;
        } else {
            *max_z *= self.z_stretch_toward;
        }
        if *min_z < 0.0 {
            *min_z *= self.z_stretch_away;
        } else {
            *min_z /= self.z_stretch_away;
        }

        if *max_z - *min_z < self.min_depth {
            let mid = (*max_z + *min_z) * 0.5;
            *min_z = mid - self.min_depth * 0.5;
            *max_z = mid + self.min_depth * 0.5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn splits_are_contiguous_and_cover_range() {
        for splits in [
            CascadeSplits::practical(4),
            CascadeSplits::uniform(3),
            CascadeSplits::from_fractions(vec![0.0, 0.1, 0.35, 1.0]),
        ] {
            let ranges = splits.split_depths(0.1, 100.0);
            assert_eq!(ranges.len(), splits.count());
            assert_relative_eq!(ranges[0].0, 0.1);
            assert_relative_eq!(ranges.last().unwrap().1, 100.0);
            for pair in ranges.windows(2) {
                assert_relative_eq!(pair[0].1, pair[1].0);
            }
        }
    }

    #[test]
    fn practical_splits_favor_near_plane() {
        let practical = CascadeSplits::practical(4).split_depths(0.1, 100.0);
        let uniform = CascadeSplits::uniform(4).split_depths(0.1, 100.0);
        // the first practical cascade is tighter than the uniform one
        assert!(practical[0].1 < uniform[0].1);
    }

    #[test]
    #[should_panic]
    fn non_monotone_fractions_are_rejected() {
        CascadeSplits::from_fractions(vec![0.0, 0.5, 0.3, 1.0]);
    }

    #[test]
    fn fitted_box_contains_all_frustum_corners() {
        let mut camera = Camera::default();
        camera.set_pose(Vec3::new(3.0, 4.0, -2.0), 123.0, -25.0);
        let light = DirectionalLight::new(Vec3::new(-2.0, -4.0, -1.0), Vec3::ONE, 1.0);
        let splits = CascadeSplits::practical(4);
        let fitter = CascadeFitter::default();

        for cascade in fitter.fit(&camera, 16.0 / 9.0, &light, &splits) {
            let corners =
                CascadeFitter::frustum_corners(&camera, 16.0 / 9.0, cascade.near, cascade.far);
            for corner in corners {
                let clip = cascade.view_proj * corner.extend(1.0);
                let ndc = clip.truncate() / clip.w;
                assert!(ndc.x >= -1.0 - 1e-3 && ndc.x <= 1.0 + 1e-3, "x = {}", ndc.x);
                assert!(ndc.y >= -1.0 - 1e-3 && ndc.y <= 1.0 + 1e-3, "y = {}", ndc.y);
                assert!(ndc.z >= -1e-3 && ndc.z <= 1.0 + 1e-3, "z = {}", ndc.z);
            }
        }
    }

    #[test]
    fn cascade_count_matches_splits() {
        let camera = Camera::default();
        let light = DirectionalLight::default();
        let splits = CascadeSplits::practical(3);
        let cascades = CascadeFitter::default().fit(&camera, 1.0, &light, &splits);
        assert_eq!(cascades.len(), 3);
        assert_relative_eq!(cascades[0].near, camera.near);
        assert_relative_eq!(cascades[2].far, camera.far);
    }

    #[test]
    fn widen_stretches_each_bound_outward() {
        let fitter = CascadeFitter {
            z_stretch_away: 10.0,
            z_stretch_toward: 2.0,
            min_depth: 0.01,
        };

        let mut min_z = -5.0;
        let mut max_z = 3.0;
        fitter.widen_depth(&mut min_z, &mut max_z);
        assert_relative_eq!(min_z, -50.0);
        assert_relative_eq!(max_z, 6.0);

        // both bounds on one side of the light still stretch outward
        let mut min_z = -5.0;
        let mut max_z = -1.0;
        fitter.widen_depth(&mut min_z, &mut max_z);
        assert_relative_eq!(min_z, -50.0);
        assert_relative_eq!(max_z, -0.5);
    }

    #[test]
    fn degenerate_depth_is_padded() {
        let fitter = CascadeFitter::default();
        let mut min_z = 0.0;
        let mut max_z = 0.0;
        fitter.widen_depth(&mut min_z, &mut max_z);
        assert!(max_z - min_z >= fitter.min_depth - 1e-6);
    }

    #[test]
    fn light_parallel_to_up_still_fits() {
        let camera = Camera::default();
        let light = DirectionalLight::new(Vec3::new(0.0, -1.0, 0.0), Vec3::ONE, 1.0);
        let splits = CascadeSplits::practical(2);
        let cascades = CascadeFitter::default().fit(&camera, 1.0, &light, &splits);
        for cascade in cascades {
            assert!(cascade.view_proj.is_finite());
        }
    }
}
