use glam::{DMat3, DVec2, DVec3};

/// Error types for the camera module.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The camera model name is not known.
    #[error("Unknown camera model: {0}")]
    UnknownModel(String),

    /// The number of distortion coefficients does not match the camera model.
    #[error("Camera model {model} expects {expected} distortion coefficients, got {actual}")]
    InvalidDistortion {
        /// Name of the camera model.
        model: &'static str,
        /// Number of coefficients the model expects.
        expected: usize,
        /// Number of coefficients provided.
        actual: usize,
    },

    /// Focal length or image size are not strictly positive.
    #[error("Invalid pinhole parameters: focal length {focal_length:?}, image size {image_size:?}")]
    InvalidParameters {
        /// The focal length in pixels (fx, fy).
        focal_length: (f64, f64),
        /// The image dimensions (width, height).
        image_size: (u32, u32),
    },
}

/// Radial lens distortion applied in normalized camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    /// Ideal pinhole, no distortion.
    None,
    /// One radial coefficient: `1 + k1 r²`.
    RadialK1 {
        /// First radial coefficient.
        k1: f64,
    },
    /// Three radial coefficients: `1 + k1 r² + k2 r⁴ + k3 r⁶`.
    RadialK3 {
        /// First radial coefficient.
        k1: f64,
        /// Second radial coefficient.
        k2: f64,
        /// Third radial coefficient.
        k3: f64,
    },
}

// maximum number of fixed-point iterations used to invert the radial model
const UNDISTORT_MAX_ITERATIONS: usize = 20;

impl Distortion {
    /// Build a distortion model from its camera model name and coefficients.
    ///
    /// Accepted names are `pinhole`, `radial1` and `radial3`.
    pub fn from_model(model: &str, coefficients: &[f64]) -> Result<Self, CameraError> {
        let (name, expected) = match model {
            "pinhole" => ("pinhole", 0),
            "radial1" => ("radial1", 1),
            "radial3" => ("radial3", 3),
            _ => return Err(CameraError::UnknownModel(model.to_string())),
        };

        if coefficients.len() != expected {
            return Err(CameraError::InvalidDistortion {
                model: name,
                expected,
                actual: coefficients.len(),
            });
        }

        Ok(match coefficients {
            [k1] => Distortion::RadialK1 { k1: *k1 },
            [k1, k2, k3] => Distortion::RadialK3 {
                k1: *k1,
                k2: *k2,
                k3: *k3,
            },
            _ => Distortion::None,
        })
    }

    /// The camera model name associated with this distortion.
    pub fn model_name(&self) -> &'static str {
        match self {
            Distortion::None => "pinhole",
            Distortion::RadialK1 { .. } => "radial1",
            Distortion::RadialK3 { .. } => "radial3",
        }
    }

    /// The distortion coefficients in model order.
    pub fn coefficients(&self) -> Vec<f64> {
        match *self {
            Distortion::None => vec![],
            Distortion::RadialK1 { k1 } => vec![k1],
            Distortion::RadialK3 { k1, k2, k3 } => vec![k1, k2, k3],
        }
    }

    #[inline]
    fn radial_factor(&self, r2: f64) -> f64 {
        match *self {
            Distortion::None => 1.0,
            Distortion::RadialK1 { k1 } => 1.0 + k1 * r2,
            Distortion::RadialK3 { k1, k2, k3 } => 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3)),
        }
    }

    /// Apply the distortion to a normalized point.
    pub fn distort(&self, p: DVec2) -> DVec2 {
        p * self.radial_factor(p.length_squared())
    }

    /// Remove the distortion from a normalized point.
    ///
    /// The radial model has no closed-form inverse; it is inverted by fixed-point iteration.
    pub fn undistort(&self, p: DVec2) -> DVec2 {
        if matches!(self, Distortion::None) {
            return p;
        }

        let mut undistorted = p;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let factor = self.radial_factor(undistorted.length_squared());
            if factor.abs() < f64::EPSILON {
                break;
            }
            let next = p / factor;
            let converged = (next - undistorted).length_squared() < 1e-24;
            undistorted = next;
            if converged {
                break;
            }
        }
        undistorted
    }
}

/// A struct representing the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    /// The focal length in pixels (fx, fy)
    pub focal_length: (f64, f64),
    /// The principal point in pixels (cx, cy)
    pub principal_point: (f64, f64),
    /// The image dimensions (width, height)
    pub image_size: (u32, u32),
    /// The radial distortion model
    pub distortion: Distortion,
}

impl PinholeCamera {
    /// Creates a new PinholeCamera with the given parameters.
    pub fn new(
        focal_length: (f64, f64),
        principal_point: (f64, f64),
        image_size: (u32, u32),
        distortion: Distortion,
    ) -> Result<Self, CameraError> {
        let valid = focal_length.0 > 0.0
            && focal_length.1 > 0.0
            && focal_length.0.is_finite()
            && focal_length.1.is_finite()
            && image_size.0 > 0
            && image_size.1 > 0;
        if !valid {
            return Err(CameraError::InvalidParameters {
                focal_length,
                image_size,
            });
        }

        Ok(Self {
            focal_length,
            principal_point,
            image_size,
            distortion,
        })
    }

    /// Returns the camera matrix K.
    pub fn camera_matrix(&self) -> DMat3 {
        let (fx, fy) = self.focal_length;
        let (cx, cy) = self.principal_point;
        DMat3::from_cols(
            DVec3::new(fx, 0.0, 0.0),
            DVec3::new(0.0, fy, 0.0),
            DVec3::new(cx, cy, 1.0),
        )
    }

    /// Whether the camera carries a non-trivial distortion model.
    pub fn has_distortion(&self) -> bool {
        !matches!(self.distortion, Distortion::None)
    }

    /// Map a pixel to undistorted normalized camera coordinates.
    pub fn pixel_to_normalized(&self, pixel: DVec2) -> DVec2 {
        let (fx, fy) = self.focal_length;
        let (cx, cy) = self.principal_point;
        let distorted = DVec2::new((pixel.x - cx) / fx, (pixel.y - cy) / fy);
        self.distortion.undistort(distorted)
    }

    /// Map undistorted normalized camera coordinates to a (distorted) pixel.
    pub fn normalized_to_pixel(&self, p: DVec2) -> DVec2 {
        let (fx, fy) = self.focal_length;
        let (cx, cy) = self.principal_point;
        let d = self.distortion.distort(p);
        DVec2::new(fx * d.x + cx, fy * d.y + cy)
    }

    /// Remove the lens distortion from a pixel, staying in pixel units.
    pub fn undistort_pixel(&self, pixel: DVec2) -> DVec2 {
        if !self.has_distortion() {
            return pixel;
        }
        let (fx, fy) = self.focal_length;
        let (cx, cy) = self.principal_point;
        let n = self.pixel_to_normalized(pixel);
        DVec2::new(fx * n.x + cx, fy * n.y + cy)
    }

    /// Unit bearing vector in the camera frame for a pixel.
    pub fn bearing(&self, pixel: DVec2) -> DVec3 {
        self.pixel_to_normalized(pixel).extend(1.0).normalize()
    }
}

/// A camera pose: rotation from world to camera and the camera center in world coordinates.
///
/// A world point `X` maps to the camera frame as `R * (X - C)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    rotation: DMat3,
    center: DVec3,
}

impl Pose {
    /// Create a pose from a world-to-camera rotation and a camera center.
    pub fn new(rotation: DMat3, center: DVec3) -> Self {
        Self { rotation, center }
    }

    /// Create a pose from a world-to-camera rotation and translation (`x = R X + t`).
    pub fn from_rotation_translation(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            center: -(rotation.transpose() * translation),
        }
    }

    /// The world-to-camera rotation.
    #[inline]
    pub fn rotation(&self) -> DMat3 {
        self.rotation
    }

    /// The camera center in world coordinates.
    #[inline]
    pub fn center(&self) -> DVec3 {
        self.center
    }

    /// The world-to-camera translation `t = -R C`.
    #[inline]
    pub fn translation(&self) -> DVec3 {
        -(self.rotation * self.center)
    }

    /// Transform a world point into the camera frame.
    #[inline]
    pub fn transform(&self, point: DVec3) -> DVec3 {
        self.rotation * (point - self.center)
    }

    /// Depth of a world point along the camera optical axis.
    #[inline]
    pub fn depth(&self, point: DVec3) -> f64 {
        self.transform(point).z
    }

    /// Check that the rotation is orthonormal with a positive determinant.
    pub fn has_valid_rotation(&self, tolerance: f64) -> bool {
        let r = self.rotation;
        (r * r.transpose()).abs_diff_eq(DMat3::IDENTITY, tolerance)
            && (r.determinant() - 1.0).abs() < tolerance
    }
}

/// A posed and calibrated camera borrowed from the scene.
#[derive(Debug, Clone, Copy)]
pub struct ViewCamera<'a> {
    /// The camera pose.
    pub pose: &'a Pose,
    /// The camera intrinsics.
    pub intrinsic: &'a PinholeCamera,
}

impl ViewCamera<'_> {
    /// Project a world point to a pixel. Returns `None` for points at or behind the camera.
    pub fn project(&self, point: DVec3) -> Option<DVec2> {
        let p = self.pose.transform(point);
        if p.z <= 0.0 {
            return None;
        }
        Some(self.intrinsic.normalized_to_pixel(p.truncate() / p.z))
    }

    /// Pixel distance between the projection of a world point and an observation.
    pub fn residual(&self, point: DVec3, observed: DVec2) -> f64 {
        self.project(point)
            .map(|projected| (projected - observed).length())
            .unwrap_or(f64::INFINITY)
    }

    /// Direction of the viewing ray through a pixel, expressed in world coordinates.
    pub fn ray_direction(&self, pixel: DVec2) -> DVec3 {
        self.pose.rotation().transpose() * self.intrinsic.bearing(pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera(distortion: Distortion) -> Result<PinholeCamera, CameraError> {
        PinholeCamera::new((500.0, 510.0), (320.0, 240.0), (640, 480), distortion)
    }

    #[test]
    fn test_camera_matrix() -> Result<(), CameraError> {
        let cam = camera(Distortion::None)?;
        let k = cam.camera_matrix();
        let p = k * DVec3::new(0.1, -0.2, 1.0);
        assert_relative_eq!(p.x, 370.0);
        assert_relative_eq!(p.y, 138.0);
        assert_relative_eq!(p.z, 1.0);
        Ok(())
    }

    #[test]
    fn test_invalid_parameters() {
        let res = PinholeCamera::new((0.0, 500.0), (320.0, 240.0), (640, 480), Distortion::None);
        assert!(matches!(res, Err(CameraError::InvalidParameters { .. })));
    }

    #[test]
    fn test_distortion_from_model() -> Result<(), CameraError> {
        assert_eq!(Distortion::from_model("pinhole", &[])?, Distortion::None);
        assert_eq!(
            Distortion::from_model("radial1", &[0.1])?,
            Distortion::RadialK1 { k1: 0.1 }
        );
        assert!(matches!(
            Distortion::from_model("radial3", &[0.1]),
            Err(CameraError::InvalidDistortion { expected: 3, .. })
        ));
        assert!(matches!(
            Distortion::from_model("fisheye", &[]),
            Err(CameraError::UnknownModel(_))
        ));
        Ok(())
    }

    #[test]
    fn test_undistort_inverts_distort() -> Result<(), CameraError> {
        let cam = camera(Distortion::RadialK3 {
            k1: -0.12,
            k2: 0.03,
            k3: -0.001,
        })?;
        let normalized = DVec2::new(0.25, -0.18);
        let pixel = cam.normalized_to_pixel(normalized);
        let back = cam.pixel_to_normalized(pixel);
        assert_relative_eq!(back.x, normalized.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, normalized.y, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_pose_transform_and_project() -> Result<(), CameraError> {
        let cam = camera(Distortion::None)?;
        let pose = Pose::new(DMat3::IDENTITY, DVec3::new(0.0, 0.0, -5.0));
        let view = ViewCamera {
            pose: &pose,
            intrinsic: &cam,
        };
        let point = DVec3::new(0.5, 0.25, 0.0);
        assert_relative_eq!(pose.depth(point), 5.0);
        let pixel = view.project(point).unwrap_or(DVec2::NAN);
        assert_relative_eq!(pixel.x, 370.0);
        assert_relative_eq!(pixel.y, 240.0 + 510.0 * 0.05);
        assert_relative_eq!(view.residual(point, pixel), 0.0, epsilon = 1e-12);

        // a point behind the camera has no projection
        assert!(view.project(DVec3::new(0.0, 0.0, -10.0)).is_none());
        Ok(())
    }

    #[test]
    fn test_pose_from_rotation_translation() {
        let r = DMat3::from_rotation_y(0.3);
        let c = DVec3::new(1.0, 2.0, 3.0);
        let pose = Pose::new(r, c);
        let other = Pose::from_rotation_translation(r, pose.translation());
        assert_relative_eq!((other.center() - c).length(), 0.0, epsilon = 1e-12);
        assert!(pose.has_valid_rotation(1e-9));
        assert!(!Pose::new(DMat3::from_diagonal(DVec3::new(1.0, 1.0, -1.0)), c)
            .has_valid_rotation(1e-9));
    }
}
