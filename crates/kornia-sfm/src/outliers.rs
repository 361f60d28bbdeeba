use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::scene::{Landmark, LandmarkId, Landmarks, Scene};

/// Parameters of the landmark outlier removal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Remove landmarks whose largest angle between two viewing rays is below this value,
    /// in degrees.
    pub min_angle_deg: f64,
    /// Remove landmarks with a reprojection error above this value in any view, in pixels.
    pub max_pixel_residual: Option<f64>,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            min_angle_deg: 2.0,
            max_pixel_residual: None,
        }
    }
}

/// Largest angle, in degrees, between the rays joining the observing camera centers to the
/// landmark. Views without a pose are ignored.
pub fn max_viewing_angle_deg(scene: &Scene, landmark: &Landmark) -> f64 {
    let rays = landmark
        .observations
        .keys()
        .filter_map(|&view_id| scene.pose(view_id))
        .map(|pose| landmark.position - pose.center())
        .collect::<Vec<_>>();

    let mut max_angle = 0.0f64;
    for (i, a) in rays.iter().enumerate() {
        for b in &rays[i + 1..] {
            let n1 = a.length();
            let n2 = b.length();
            if n1 <= 1e-12 || n2 <= 1e-12 {
                continue;
            }
            let cos_angle = (a.dot(*b) / (n1 * n2)).clamp(-1.0, 1.0);
            max_angle = max_angle.max(cos_angle.acos().to_degrees());
        }
    }
    max_angle
}

/// Largest reprojection error of a landmark over its observations, in pixels.
pub fn max_pixel_residual(scene: &Scene, landmark: &Landmark) -> f64 {
    landmark
        .observations
        .iter()
        .map(|(&view_id, obs)| {
            scene
                .camera(view_id)
                .map(|camera| camera.residual(landmark.position, obs.x))
                .unwrap_or(f64::INFINITY)
        })
        .fold(0.0, f64::max)
}

fn remove_where(
    landmarks: &mut Landmarks,
    is_outlier: impl Fn(&Landmark) -> bool + Sync,
) -> usize {
    let outliers = landmarks
        .par_iter()
        .filter(|(_, landmark)| is_outlier(*landmark))
        .map(|(&id, _)| id)
        .collect::<BTreeSet<LandmarkId>>();
    landmarks.retain(|id, _| !outliers.contains(id));
    outliers.len()
}

/// Remove the landmarks seen under a too small angle. Returns the number of removed landmarks.
///
/// Each landmark is tested independently, so applying the filter twice removes nothing more.
pub fn remove_outliers_angle_error(
    scene: &Scene,
    landmarks: &mut Landmarks,
    min_angle_deg: f64,
) -> usize {
    remove_where(landmarks, |landmark| {
        max_viewing_angle_deg(scene, landmark) < min_angle_deg
    })
}

/// Remove the landmarks with a reprojection error above `max_residual` in any of their views.
/// Returns the number of removed landmarks.
pub fn remove_outliers_pixel_residual(
    scene: &Scene,
    landmarks: &mut Landmarks,
    max_residual: f64,
) -> usize {
    remove_where(landmarks, |landmark| {
        max_pixel_residual(scene, landmark) > max_residual
    })
}

/// Apply the configured outlier filters. Returns the number of removed landmarks.
pub fn remove_outliers(scene: &Scene, landmarks: &mut Landmarks, config: &OutlierConfig) -> usize {
    let mut removed = 0;
    if let Some(max_residual) = config.max_pixel_residual {
        removed += remove_outliers_pixel_residual(scene, landmarks, max_residual);
    }
    removed += remove_outliers_angle_error(scene, landmarks, config.min_angle_deg);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, Distortion, PinholeCamera, Pose};
    use crate::describer::DescriberType;
    use crate::scene::{Observation, View, ViewId};
    use approx::assert_relative_eq;
    use glam::{DMat3, DVec2, DVec3};
    use std::collections::BTreeMap;

    fn scene() -> Result<Scene, CameraError> {
        let mut scene = Scene::new();
        scene.intrinsics.insert(
            0,
            PinholeCamera::new((500.0, 500.0), (320.0, 240.0), (640, 480), Distortion::None)?,
        );
        for (id, x) in [(0, -1.0), (1, 1.0), (2, 1.05)] {
            scene
                .poses
                .insert(id, Pose::new(DMat3::IDENTITY, DVec3::new(x, 0.0, 0.0)));
            scene.views.insert(
                id,
                View {
                    view_id: id,
                    intrinsic_id: Some(0),
                    pose_id: Some(id),
                    path: String::new(),
                    width: 640,
                    height: 480,
                },
            );
        }
        Ok(scene)
    }

    fn landmark(scene: &Scene, position: DVec3, views: &[ViewId]) -> Landmark {
        let observations = views
            .iter()
            .map(|&view_id| {
                let x = scene
                    .camera(view_id)
                    .and_then(|c| c.project(position))
                    .unwrap_or(DVec2::ZERO);
                (view_id, Observation { x, feature_id: 0 })
            })
            .collect::<BTreeMap<_, _>>();
        Landmark {
            position,
            describer: DescriberType::Sift,
            color: [255; 3],
            observations,
        }
    }

    #[test]
    fn test_max_viewing_angle() -> Result<(), CameraError> {
        let scene = scene()?;
        // the two centers are 2 units apart, the point 1 unit in front of their midpoint
        let lm = landmark(&scene, DVec3::new(0.0, 0.0, 1.0), &[0, 1]);
        assert_relative_eq!(max_viewing_angle_deg(&scene, &lm), 90.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_remove_outliers_angle_error_idempotent() -> Result<(), CameraError> {
        let scene = scene()?;
        let mut landmarks = Landmarks::new();
        landmarks.insert(0, landmark(&scene, DVec3::new(0.0, 0.0, 5.0), &[0, 1]));
        // nearly coincident centers, far point
        landmarks.insert(1, landmark(&scene, DVec3::new(1.0, 0.0, 50.0), &[1, 2]));
        landmarks.insert(2, landmark(&scene, DVec3::new(0.5, 0.2, 8.0), &[0, 1, 2]));

        let removed = remove_outliers_angle_error(&scene, &mut landmarks, 2.0);
        assert_eq!(removed, 1);
        assert_eq!(landmarks.keys().copied().collect::<Vec<_>>(), vec![0, 2]);

        let again = remove_outliers_angle_error(&scene, &mut landmarks, 2.0);
        assert_eq!(again, 0);
        assert_eq!(landmarks.len(), 2);
        Ok(())
    }

    #[test]
    fn test_remove_outliers_pixel_residual() -> Result<(), CameraError> {
        let scene = scene()?;
        let mut landmarks = Landmarks::new();
        landmarks.insert(0, landmark(&scene, DVec3::new(0.0, 0.0, 5.0), &[0, 1]));
        let mut shifted = landmark(&scene, DVec3::new(0.2, 0.1, 6.0), &[0, 1, 2]);
        if let Some(obs) = shifted.observations.get_mut(&2) {
            obs.x += DVec2::new(10.0, 0.0);
        }
        landmarks.insert(1, shifted);

        let config = OutlierConfig {
            min_angle_deg: 2.0,
            max_pixel_residual: Some(2.0),
        };
        assert_eq!(remove_outliers(&scene, &mut landmarks, &config), 1);
        // the whole landmark is removed, never a single observation
        assert_eq!(landmarks.len(), 1);
        assert_eq!(landmarks[&0].observations.len(), 2);
        Ok(())
    }
}
