use glam::{DVec2, DVec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::Pose;
use crate::regions::RegionsPerView;
use crate::scene::{Landmark, Landmarks, Observation, Scene};
use crate::tracks::{Track, Tracks};

/// Parameters of the track triangulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Minimum number of views a track must span.
    pub min_views: usize,
    /// Reject points whose reprojection error exceeds this value in any view, in pixels.
    pub max_reprojection_error: Option<f64>,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            min_views: 2,
            max_reprojection_error: None,
        }
    }
}

/// Reasons a track cannot be turned into a landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DegenerateTrack {
    /// Fewer than two observations.
    #[error("Not enough observations")]
    NotEnoughViews,

    /// The viewing rays are parallel, the point is not constrained.
    #[error("Parallel viewing rays")]
    ParallelRays,

    /// The homogeneous solution has a vanishing scale.
    #[error("Point at infinity")]
    PointAtInfinity,

    /// The solution has non-finite coordinates.
    #[error("Non-finite point")]
    NonFinite,

    /// The point lies at or behind one of the cameras.
    #[error("Point behind a camera")]
    BehindCamera,

    /// The reprojection error is above the threshold in one of the views.
    #[error("Reprojection error above threshold")]
    ReprojectionError,

    /// An observation references a view or feature that is not available.
    #[error("Missing view or feature")]
    MissingData,
}

/// Counters of the triangulation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriangulationStats {
    /// Tracks given to the triangulator.
    pub tracks: usize,
    /// Landmarks created.
    pub landmarks: usize,
    /// Tracks rejected as degenerate.
    pub degenerate: usize,
}

// minimum 1 - cos between two rays for the point to be constrained
const PARALLEL_RAYS_TOLERANCE: f64 = 1e-12;

/// Triangulate a point seen by several posed cameras with the linear (DLT) method.
///
/// The system is conditioned before the SVD: the world frame is translated to the centroid of
/// the camera centers and scaled by their mean distance to it, and every row is normalized.
/// The solution is then checked for parallel rays, points at infinity and cheirality.
///
/// # Arguments
///
/// * `poses` - The camera poses.
/// * `points` - The observations in undistorted normalized camera coordinates, one per pose.
///
/// # Returns
///
/// The point in world coordinates.
pub fn triangulate_nview(poses: &[&Pose], points: &[DVec2]) -> Result<DVec3, DegenerateTrack> {
    if poses.len() != points.len() || poses.len() < 2 {
        return Err(DegenerateTrack::NotEnoughViews);
    }

    let rays = poses
        .iter()
        .zip(points)
        .map(|(pose, x)| pose.rotation().transpose() * x.extend(1.0).normalize())
        .collect::<Vec<_>>();
    let max_ray_angle = rays
        .iter()
        .enumerate()
        .flat_map(|(i, a)| rays[i + 1..].iter().map(move |b| 1.0 - a.dot(*b)))
        .fold(0.0f64, f64::max);
    if max_ray_angle < PARALLEL_RAYS_TOLERANCE {
        return Err(DegenerateTrack::ParallelRays);
    }

    // conditioning transform: X = s * X' + c
    let n = poses.len();
    let centroid = poses.iter().map(|p| p.center()).sum::<DVec3>() / n as f64;
    let mean_distance = poses
        .iter()
        .map(|p| (p.center() - centroid).length())
        .sum::<f64>()
        / n as f64;
    let scale = if mean_distance < 1e-12 {
        1.0
    } else {
        mean_distance
    };

    let mut a = faer::Mat::<f64>::zeros(2 * n, 4);
    for (k, (pose, x)) in poses.iter().zip(points).enumerate() {
        // P' = [s R | R (c - C)]
        let r = pose.rotation();
        let t = r * (centroid - pose.center());
        let row = |i: usize| {
            let r_row = r.row(i) * scale;
            [r_row.x, r_row.y, r_row.z, t[i]]
        };
        let (p0, p1, p2) = (row(0), row(1), row(2));
        write_dlt_row(&mut a, 2 * k, x.x, &p2, &p0);
        write_dlt_row(&mut a, 2 * k + 1, x.y, &p2, &p1);
    }

    let svd = a.svd();
    let v = svd.v();
    let xh = v.col(3);
    let w = xh[3];
    let norm = (xh[0] * xh[0] + xh[1] * xh[1] + xh[2] * xh[2] + w * w).sqrt();
    if w.abs() < 1e-12 * norm {
        return Err(DegenerateTrack::PointAtInfinity);
    }

    let point = DVec3::new(xh[0] / w, xh[1] / w, xh[2] / w) * scale + centroid;
    if !point.is_finite() {
        return Err(DegenerateTrack::NonFinite);
    }

    if poses.iter().any(|pose| pose.depth(point) <= 0.0) {
        return Err(DegenerateTrack::BehindCamera);
    }

    Ok(point)
}

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, x: f64, p3: &[f64; 4], p1: &[f64; 4]) {
    let values: [f64; 4] = std::array::from_fn(|j| x * p3[j] - p1[j]);
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm = if norm > 0.0 { norm } else { 1.0 };
    for (j, value) in values.iter().enumerate() {
        a.write(row, j, value / norm);
    }
}

/// Triangulate one track into a landmark.
pub fn triangulate_track(
    scene: &Scene,
    regions: &RegionsPerView,
    track: &Track,
    config: &TriangulationConfig,
) -> Result<Landmark, DegenerateTrack> {
    let mut cameras = Vec::with_capacity(track.len());
    let mut normalized = Vec::with_capacity(track.len());
    let mut observations = std::collections::BTreeMap::new();
    for (&view_id, &feature_id) in &track.features {
        let camera = scene.camera(view_id).ok_or(DegenerateTrack::MissingData)?;
        let x = regions
            .feature_coords(view_id, track.describer, feature_id)
            .ok_or(DegenerateTrack::MissingData)?;
        normalized.push(camera.intrinsic.pixel_to_normalized(x));
        observations.insert(view_id, Observation { x, feature_id });
        cameras.push(camera);
    }

    let poses = cameras.iter().map(|c| c.pose).collect::<Vec<_>>();
    let position = triangulate_nview(&poses, &normalized)?;

    if let Some(max_error) = config.max_reprojection_error {
        let exceeded = cameras
            .iter()
            .zip(observations.values())
            .any(|(camera, obs)| camera.residual(position, obs.x) > max_error);
        if exceeded {
            return Err(DegenerateTrack::ReprojectionError);
        }
    }

    Ok(Landmark {
        position,
        describer: track.describer,
        color: [255, 255, 255],
        observations,
    })
}

/// Triangulate all the tracks in parallel.
///
/// The landmark id of a track is its track id, so the result does not depend on the
/// scheduling. Degenerate tracks yield no landmark and are counted in the statistics.
pub fn triangulate_tracks(
    scene: &Scene,
    regions: &RegionsPerView,
    tracks: &Tracks,
    config: &TriangulationConfig,
) -> (Landmarks, TriangulationStats) {
    let tracks = tracks
        .iter()
        .filter(|(_, track)| track.len() >= config.min_views.max(2))
        .collect::<Vec<_>>();

    let landmarks = tracks
        .par_iter()
        .filter_map(|&(&id, track)| {
            triangulate_track(scene, regions, track, config)
                .ok()
                .map(|landmark| (id, landmark))
        })
        .collect::<Landmarks>();

    let stats = TriangulationStats {
        tracks: tracks.len(),
        landmarks: landmarks.len(),
        degenerate: tracks.len() - landmarks.len(),
    };
    log::debug!(
        "triangulated {} landmarks from {} tracks",
        stats.landmarks,
        stats.tracks
    );
    (landmarks, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DMat3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn look_at(center: DVec3, target: DVec3) -> Pose {
        let z = (target - center).normalize();
        let x = DVec3::Y.cross(z).normalize();
        let y = z.cross(x);
        // rows of the world-to-camera rotation are the camera axes
        Pose::new(DMat3::from_cols(x, y, z).transpose(), center)
    }

    fn observe(pose: &Pose, point: DVec3) -> DVec2 {
        let p = pose.transform(point);
        p.truncate() / p.z
    }

    #[test]
    fn test_triangulate_nview_noiseless() -> Result<(), DegenerateTrack> {
        let mut rng = StdRng::seed_from_u64(7);
        let poses = (0..4)
            .map(|i| {
                let angle = i as f64 * 0.3;
                look_at(
                    DVec3::new(6.0 * angle.sin(), 0.5, -6.0 * angle.cos()),
                    DVec3::ZERO,
                )
            })
            .collect::<Vec<_>>();

        for _ in 0..20 {
            let point = DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            for n in 2..=poses.len() {
                let refs = poses[..n].iter().collect::<Vec<_>>();
                let obs = refs.iter().map(|p| observe(p, point)).collect::<Vec<_>>();
                let x = triangulate_nview(&refs, &obs)?;
                assert!((x - point).length() <= 1e-6 * point.length().max(1.0));
            }
        }
        Ok(())
    }

    #[test]
    fn test_triangulate_nview_order_invariant() -> Result<(), DegenerateTrack> {
        let poses = [
            look_at(DVec3::new(-2.0, 0.0, -8.0), DVec3::ZERO),
            look_at(DVec3::new(2.0, 0.3, -8.0), DVec3::ZERO),
            look_at(DVec3::new(0.0, 2.0, -7.0), DVec3::ZERO),
        ];
        let point = DVec3::new(0.2, -0.3, 0.4);
        // small perturbation so the solution is a least-squares one
        let obs = [
            observe(&poses[0], point) + DVec2::new(1e-4, 0.0),
            observe(&poses[1], point) - DVec2::new(0.0, 2e-4),
            observe(&poses[2], point),
        ];

        let a = triangulate_nview(&[&poses[0], &poses[1], &poses[2]], &obs)?;
        let b = triangulate_nview(
            &[&poses[2], &poses[0], &poses[1]],
            &[obs[2], obs[0], obs[1]],
        )?;
        assert_relative_eq!((a - b).length(), 0.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_triangulate_nview_degenerate() {
        let a = Pose::new(DMat3::IDENTITY, DVec3::ZERO);
        let b = Pose::new(DMat3::IDENTITY, DVec3::new(1.0, 0.0, 0.0));

        // same ray direction in both cameras
        let parallel = triangulate_nview(&[&a, &b], &[DVec2::ZERO, DVec2::ZERO]);
        assert_eq!(parallel, Err(DegenerateTrack::ParallelRays));

        // rays that meet behind the cameras
        let point = DVec3::new(0.5, 0.0, -4.0);
        let behind = triangulate_nview(
            &[&a, &b],
            &[
                point.truncate() / point.z,
                (point - b.center()).truncate() / point.z,
            ],
        );
        assert_eq!(behind, Err(DegenerateTrack::BehindCamera));

        let single = triangulate_nview(&[&a], &[DVec2::ZERO]);
        assert_eq!(single, Err(DegenerateTrack::NotEnoughViews));
    }
}
