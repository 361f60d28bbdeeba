use std::collections::{BTreeMap, BTreeSet};

use glam::{DVec2, DVec3};

use crate::camera::{PinholeCamera, Pose, ViewCamera};
use crate::describer::DescriberType;

/// Index type shared by every scene entity.
pub type IndexT = u32;
/// Identifier of a view.
pub type ViewId = IndexT;
/// Identifier of a set of intrinsics.
pub type IntrinsicId = IndexT;
/// Identifier of a pose.
pub type PoseId = IndexT;
/// Identifier of a landmark.
pub type LandmarkId = IndexT;
/// Index of a feature inside the region set of a view.
pub type FeatureId = IndexT;

/// An image of the scene and the ids of its camera parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    /// Unique view identifier.
    pub view_id: ViewId,
    /// Intrinsics used by the view, if calibrated.
    pub intrinsic_id: Option<IntrinsicId>,
    /// Pose of the view, if localized.
    pub pose_id: Option<PoseId>,
    /// Path of the image.
    pub path: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// The 2D observation of a landmark in one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Pixel coordinates of the observation.
    pub x: DVec2,
    /// Index of the feature in the region set of the view.
    pub feature_id: FeatureId,
}

/// A triangulated 3D point and the observations supporting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    /// Position in world coordinates.
    pub position: DVec3,
    /// Describer type of the observed features.
    pub describer: DescriberType,
    /// Display color.
    pub color: [u8; 3],
    /// One observation per view.
    pub observations: BTreeMap<ViewId, Observation>,
}

/// The landmark collection of a scene.
pub type Landmarks = BTreeMap<LandmarkId, Landmark>;

/// Views, camera parameters and landmarks of a reconstruction.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// The views, by id.
    pub views: BTreeMap<ViewId, View>,
    /// The intrinsics, by id.
    pub intrinsics: BTreeMap<IntrinsicId, PinholeCamera>,
    /// The poses, by id.
    pub poses: BTreeMap<PoseId, Pose>,
    /// The landmarks, by id.
    pub landmarks: Landmarks,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ids of all the views.
    pub fn view_ids(&self) -> BTreeSet<ViewId> {
        self.views.keys().copied().collect()
    }

    /// The intrinsics of a view, if defined.
    pub fn intrinsic(&self, view_id: ViewId) -> Option<&PinholeCamera> {
        let view = self.views.get(&view_id)?;
        self.intrinsics.get(&view.intrinsic_id?)
    }

    /// The pose of a view, if defined.
    pub fn pose(&self, view_id: ViewId) -> Option<&Pose> {
        let view = self.views.get(&view_id)?;
        self.poses.get(&view.pose_id?)
    }

    /// The posed camera of a view, when both the pose and the intrinsics are defined.
    pub fn camera(&self, view_id: ViewId) -> Option<ViewCamera<'_>> {
        Some(ViewCamera {
            pose: self.pose(view_id)?,
            intrinsic: self.intrinsic(view_id)?,
        })
    }

    /// Whether a view has both valid intrinsics and a valid pose.
    pub fn is_valid_view(&self, view_id: ViewId) -> bool {
        self.camera(view_id).is_some()
    }

    /// The ids of the views with valid intrinsics and pose.
    pub fn valid_views(&self) -> BTreeSet<ViewId> {
        self.views
            .keys()
            .copied()
            .filter(|&id| self.is_valid_view(id))
            .collect()
    }

    /// Replace the landmark collection, returning the previous one.
    pub fn set_landmarks(&mut self, landmarks: Landmarks) -> Landmarks {
        std::mem::replace(&mut self.landmarks, landmarks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, Distortion};
    use glam::DMat3;

    fn view(view_id: ViewId, intrinsic_id: Option<IntrinsicId>, pose_id: Option<PoseId>) -> View {
        View {
            view_id,
            intrinsic_id,
            pose_id,
            path: format!("{view_id}.jpg"),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_valid_views() -> Result<(), CameraError> {
        let mut scene = Scene::new();
        scene.intrinsics.insert(
            0,
            PinholeCamera::new((500.0, 500.0), (320.0, 240.0), (640, 480), Distortion::None)?,
        );
        scene.poses.insert(0, Pose::new(DMat3::IDENTITY, DVec3::ZERO));
        scene.poses.insert(1, Pose::new(DMat3::IDENTITY, DVec3::X));
        scene.views.insert(0, view(0, Some(0), Some(0)));
        scene.views.insert(1, view(1, Some(0), Some(1)));
        // no pose
        scene.views.insert(2, view(2, Some(0), None));
        // dangling intrinsic id
        scene.views.insert(3, view(3, Some(7), Some(0)));

        assert_eq!(scene.valid_views(), BTreeSet::from([0, 1]));
        assert_eq!(scene.view_ids().len(), 4);
        assert!(scene.camera(2).is_none());
        assert!(!scene.is_valid_view(42));
        Ok(())
    }
}
