use glam::DVec3;

use crate::scene::Landmarks;

/// A point cloud with points, colors, and normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Create a colored point cloud from the landmark positions, in landmark id order.
    pub fn from_landmarks(landmarks: &Landmarks) -> Self {
        let (points, colors) = landmarks
            .values()
            .map(|landmark| (landmark.position.to_array(), landmark.color))
            .unzip();
        Self::new(points, Some(colors), None)
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Get the minimum and maximum corners of the bounding box, `None` if empty.
    pub fn bounds(&self) -> Option<(DVec3, DVec3)> {
        let first = DVec3::from_array(*self.points.first()?);
        Some(self.points.iter().map(|p| DVec3::from_array(*p)).fold(
            (first, first),
            |(lo, hi), p| (lo.min(p), hi.max(p)),
        ))
    }
}
