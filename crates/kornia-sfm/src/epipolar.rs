//! Epipolar geometry between two posed cameras.
//!
//! Poses are known, so the two-view relation is computed directly from them instead of being
//! estimated from correspondences.

use glam::{DMat3, DVec2, DVec3};

use crate::camera::{Pose, ViewCamera};

/// The skew-symmetric matrix `[t]x` such that `[t]x * v = t x v`.
pub fn skew(t: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, t.z, -t.y),
        DVec3::new(-t.z, 0.0, t.x),
        DVec3::new(t.y, -t.x, 0.0),
    )
}

/// Relative motion `(R, t)` mapping camera `i` coordinates to camera `j`: `x_j = R x_i + t`.
pub fn relative_pose(pose_i: &Pose, pose_j: &Pose) -> (DMat3, DVec3) {
    let r_j = pose_j.rotation();
    let rotation = r_j * pose_i.rotation().transpose();
    let translation = r_j * (pose_i.center() - pose_j.center());
    (rotation, translation)
}

/// Essential matrix between two poses, `x_j^T E x_i = 0` in normalized coordinates.
pub fn essential_from_poses(pose_i: &Pose, pose_j: &Pose) -> DMat3 {
    let (r, t) = relative_pose(pose_i, pose_j);
    skew(t) * r
}

/// Fundamental matrix between two cameras, `x_j^T F x_i = 0` in undistorted pixels.
///
/// F = K_j^-T * E * K_i^-1
pub fn fundamental_from_cameras(camera_i: &ViewCamera, camera_j: &ViewCamera) -> DMat3 {
    let e = essential_from_poses(camera_i.pose, camera_j.pose);
    let k_i_inv = camera_i.intrinsic.camera_matrix().inverse();
    let k_j_inv = camera_j.intrinsic.camera_matrix().inverse();
    k_j_inv.transpose() * e * k_i_inv
}

/// Squared Sampson distance of a correspondence to the epipolar geometry, in pixels².
///
/// The first order approximation of the squared geometric error:
/// `(x2^T F x1)^2 / ((F x1)_0^2 + (F x1)_1^2 + (F^T x2)_0^2 + (F^T x2)_1^2)`
pub fn sampson_distance(f: &DMat3, x1: DVec2, x2: DVec2) -> f64 {
    let x1h = x1.extend(1.0);
    let x2h = x2.extend(1.0);
    let fx1 = *f * x1h;
    let ftx2 = f.transpose() * x2h;
    let num = x2h.dot(fx1);
    let denom = fx1.x * fx1.x + fx1.y * fx1.y + ftx2.x * ftx2.x + ftx2.y * ftx2.y;
    if denom <= f64::EPSILON {
        return f64::INFINITY;
    }
    num * num / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, Distortion, PinholeCamera};
    use approx::assert_relative_eq;

    fn cameras() -> Result<(PinholeCamera, Pose, Pose), CameraError> {
        let intrinsic =
            PinholeCamera::new((700.0, 700.0), (320.0, 240.0), (640, 480), Distortion::None)?;
        let pose_i = Pose::new(DMat3::IDENTITY, DVec3::new(0.0, 0.0, -5.0));
        let pose_j = Pose::new(
            DMat3::from_rotation_y(-0.2),
            DVec3::new(1.0, 0.1, -4.8),
        );
        Ok((intrinsic, pose_i, pose_j))
    }

    #[test]
    fn test_skew() {
        let t = DVec3::new(1.0, -2.0, 3.0);
        let v = DVec3::new(0.5, 0.25, -1.0);
        let expected = t.cross(v);
        let got = skew(t) * v;
        assert_relative_eq!((got - expected).length(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_pose_maps_points() -> Result<(), CameraError> {
        let (_, pose_i, pose_j) = cameras()?;
        let (r, t) = relative_pose(&pose_i, &pose_j);
        let x = DVec3::new(0.3, -0.2, 0.7);
        let expected = pose_j.transform(x);
        let got = r * pose_i.transform(x) + t;
        assert_relative_eq!((got - expected).length(), 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_fundamental_from_cameras_epipolar_constraint() -> Result<(), CameraError> {
        let (intrinsic, pose_i, pose_j) = cameras()?;
        let cam_i = ViewCamera {
            pose: &pose_i,
            intrinsic: &intrinsic,
        };
        let cam_j = ViewCamera {
            pose: &pose_j,
            intrinsic: &intrinsic,
        };
        let f = fundamental_from_cameras(&cam_i, &cam_j);

        for x in [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.5, -0.4, 1.0),
            DVec3::new(-0.7, 0.3, -0.5),
        ] {
            let (Some(x1), Some(x2)) = (cam_i.project(x), cam_j.project(x)) else {
                panic!("point not visible");
            };
            assert!(sampson_distance(&f, x1, x2) < 1e-12);
        }

        // a point displaced perpendicular to the epipolar lines is far off
        let (Some(x1), Some(x2)) = (cam_i.project(DVec3::ZERO), cam_j.project(DVec3::ZERO)) else {
            panic!("point not visible");
        };
        assert!(sampson_distance(&f, x1, x2 + DVec2::new(0.0, 30.0)) > 16.0);
        Ok(())
    }
}
