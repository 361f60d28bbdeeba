//! Camera frustums and the frustum-overlap pair selection.

use glam::{DVec2, DVec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::camera::ViewCamera;
use crate::pairs::{Pair, PairSet};
use crate::scene::{Scene, ViewId};

/// Depth range of the camera frustums, in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrustumConfig {
    /// Distance of the near plane to the camera center.
    pub z_near: f64,
    /// Distance of the far plane to the camera center.
    pub z_far: f64,
}

impl Default for FrustumConfig {
    fn default() -> Self {
        Self {
            z_near: 0.1,
            z_far: 100.0,
        }
    }
}

/// A truncated pyramid bounding the region of space seen by a camera.
///
/// Corners are in world coordinates: the first four lie on the near plane and the last four
/// on the far plane, both in the order top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    corners: [DVec3; 8],
}

// relative tolerance used to discard near-zero separating axes
const AXIS_EPSILON: f64 = 1e-12;

impl Frustum {
    /// Build the frustum of a camera between the depths `z_near` and `z_far`.
    pub fn from_camera(camera: &ViewCamera, z_near: f64, z_far: f64) -> Self {
        let (width, height) = camera.intrinsic.image_size;
        let (w, h) = (width as f64, height as f64);
        let image_corners = [
            DVec2::new(0.0, 0.0),
            DVec2::new(w, 0.0),
            DVec2::new(w, h),
            DVec2::new(0.0, h),
        ];

        let rotation_t = camera.pose.rotation().transpose();
        let center = camera.pose.center();
        let mut corners = [DVec3::ZERO; 8];
        for (k, pixel) in image_corners.iter().enumerate() {
            let ray = camera.intrinsic.pixel_to_normalized(*pixel).extend(1.0);
            corners[k] = rotation_t * (ray * z_near) + center;
            corners[k + 4] = rotation_t * (ray * z_far) + center;
        }
        Self { corners }
    }

    /// The eight corners in world coordinates.
    pub fn corners(&self) -> &[DVec3; 8] {
        &self.corners
    }

    fn face_normals(&self) -> [DVec3; 6] {
        let c = &self.corners;
        let normal = |a: usize, b: usize, d: usize| (c[b] - c[a]).cross(c[d] - c[a]);
        [
            normal(0, 1, 3), // near
            normal(4, 5, 7), // far
            normal(0, 4, 1), // top
            normal(1, 5, 2), // right
            normal(2, 6, 3), // bottom
            normal(3, 7, 0), // left
        ]
    }

    fn edge_directions(&self) -> [DVec3; 8] {
        let c = &self.corners;
        [
            c[1] - c[0],
            c[2] - c[1],
            c[3] - c[2],
            c[0] - c[3],
            c[4] - c[0],
            c[5] - c[1],
            c[6] - c[2],
            c[7] - c[3],
        ]
    }

    fn project(&self, axis: DVec3) -> (f64, f64) {
        self.corners
            .iter()
            .map(|c| c.dot(axis))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| {
                (lo.min(d), hi.max(d))
            })
    }

    fn scale(&self) -> f64 {
        self.corners
            .iter()
            .map(|c| c.length())
            .fold(1.0f64, f64::max)
    }

    /// Whether two frustums share at least one point.
    ///
    /// Both volumes are convex, so they are disjoint iff a separating axis exists among the
    /// face normals of both and the cross products of their edge directions. Touching volumes
    /// intersect.
    pub fn intersects(&self, other: &Frustum) -> bool {
        let edges_a = self.edge_directions();
        let edges_b = other.edge_directions();
        let scale = self.scale().max(other.scale());
        let min_axis_length = AXIS_EPSILON * scale * scale;

        let normals = self.face_normals().into_iter().chain(other.face_normals());
        let crosses = edges_a
            .iter()
            .flat_map(|a| edges_b.iter().map(move |b| a.cross(*b)));

        for axis in normals.chain(crosses) {
            if axis.length() <= min_axis_length {
                continue;
            }
            let (min_a, max_a) = self.project(axis);
            let (min_b, max_b) = other.project(axis);
            if max_a < min_b || max_b < min_a {
                return false;
            }
        }
        true
    }
}

/// Select the pairs of valid views whose frustums intersect.
///
/// Each unordered pair of valid views is tested once.
pub fn frustum_intersection_pairs(scene: &Scene, config: &FrustumConfig) -> PairSet {
    let frustums = scene
        .valid_views()
        .into_iter()
        .filter_map(|view_id| {
            let camera = scene.camera(view_id)?;
            Some((
                view_id,
                Frustum::from_camera(&camera, config.z_near, config.z_far),
            ))
        })
        .collect::<Vec<(ViewId, Frustum)>>();

    let candidates = &frustums;
    let pairs = (0..frustums.len())
        .into_par_iter()
        .flat_map_iter(move |i| {
            let (view_i, frustum_i) = &candidates[i];
            candidates[i + 1..]
                .iter()
                .filter(move |(_, frustum_j)| frustum_i.intersects(frustum_j))
                .filter_map(move |(view_j, _)| Pair::new(*view_i, *view_j))
        })
        .collect::<Vec<_>>();

    log::debug!(
        "frustum pairing: {} pairs out of {} views",
        pairs.len(),
        frustums.len()
    );
    pairs.into_iter().collect()
}
