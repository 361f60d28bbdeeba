use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraError, Distortion, PinholeCamera, Pose};
use crate::describer::{DescriberType, DescriberTypeError};
use crate::io::ply::{write_ply_binary, PlyError};
use crate::pointcloud::PointCloud;
use crate::scene::{
    FeatureId, IntrinsicId, Landmark, LandmarkId, Observation, PoseId, Scene, View, ViewId,
};

/// Error types for reading and writing scenes.
#[derive(Debug, thiserror::Error)]
pub enum SceneIoError {
    /// Failed to read or write the scene file.
    #[error("Failed to access scene file {path}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The scene file is not valid JSON for the scene schema.
    #[error("Failed to parse scene file {path}")]
    Json {
        /// Path of the file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize the scene.
    #[error("Failed to serialize scene")]
    Serialize(#[from] serde_json::Error),

    /// An intrinsic has invalid parameters.
    #[error("Invalid intrinsic {intrinsic_id}")]
    InvalidIntrinsic {
        /// The offending intrinsic.
        intrinsic_id: IntrinsicId,
        /// The validation error.
        #[source]
        source: CameraError,
    },

    /// A pose rotation is not a rotation matrix.
    #[error("Pose {0} has an invalid rotation matrix")]
    InvalidRotation(PoseId),

    /// A landmark uses an unknown describer type.
    #[error("Landmark {landmark_id} has an invalid describer type")]
    InvalidDescriber {
        /// The offending landmark.
        landmark_id: LandmarkId,
        /// The parse error.
        #[source]
        source: DescriberTypeError,
    },

    /// Two entities share an id.
    #[error("Duplicated {kind} id {id}")]
    DuplicateId {
        /// Entity kind.
        kind: &'static str,
        /// The id.
        id: u32,
    },

    /// A landmark observes a view that is not in the scene.
    #[error("Landmark {landmark_id} observes unknown view {view_id}")]
    UnknownView {
        /// The offending landmark.
        landmark_id: LandmarkId,
        /// The unknown view.
        view_id: ViewId,
    },

    /// The output extension is not one of `json`, `sfm` or `ply`.
    #[error("Unsupported scene file extension: {0}")]
    UnsupportedExtension(PathBuf),

    /// Failed to write the point cloud.
    #[error("Failed to write point cloud")]
    Ply(#[from] PlyError),
}

/// Selects the parts of a scene to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneParts {
    /// Views.
    pub views: bool,
    /// Intrinsics.
    pub intrinsics: bool,
    /// Poses.
    pub extrinsics: bool,
    /// Landmarks.
    pub structure: bool,
}

impl SceneParts {
    /// Everything.
    pub const ALL: Self = Self {
        views: true,
        intrinsics: true,
        extrinsics: true,
        structure: true,
    };

    /// Views, intrinsics and poses, without the landmarks.
    pub const CAMERAS: Self = Self {
        views: true,
        intrinsics: true,
        extrinsics: true,
        structure: false,
    };
}

const SCENE_VERSION: &str = "1.0";
const ROTATION_TOLERANCE: f64 = 1e-6;

// landmarks are kept as raw JSON on input and only decoded when requested
#[derive(Debug, Serialize, Deserialize)]
struct SceneFile<L = LandmarkEntry> {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    views: Vec<ViewEntry>,
    #[serde(default)]
    intrinsics: Vec<IntrinsicEntry>,
    #[serde(default)]
    poses: Vec<PoseEntry>,
    #[serde(default)]
    structure: Vec<L>,
}

fn default_version() -> String {
    SCENE_VERSION.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ViewEntry {
    view_id: ViewId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    intrinsic_id: Option<IntrinsicId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pose_id: Option<PoseId>,
    #[serde(default)]
    path: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct IntrinsicEntry {
    intrinsic_id: IntrinsicId,
    #[serde(rename = "type", default = "default_camera_model")]
    model: String,
    width: u32,
    height: u32,
    focal_length: [f64; 2],
    principal_point: [f64; 2],
    #[serde(default)]
    distortion: Vec<f64>,
}

fn default_camera_model() -> String {
    "pinhole".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct PoseEntry {
    pose_id: PoseId,
    rotation: [[f64; 3]; 3],
    center: [f64; 3],
}

#[derive(Debug, Serialize, Deserialize)]
struct LandmarkEntry {
    landmark_id: LandmarkId,
    describer_type: String,
    x: [f64; 3],
    #[serde(default = "default_color")]
    color: [u8; 3],
    observations: Vec<ObservationEntry>,
}

fn default_color() -> [u8; 3] {
    [255, 255, 255]
}

#[derive(Debug, Serialize, Deserialize)]
struct ObservationEntry {
    view_id: ViewId,
    feature_id: FeatureId,
    x: [f64; 2],
}

fn rotation_from_rows(rows: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(rows).transpose()
}

fn rotation_to_rows(rotation: &DMat3) -> [[f64; 3]; 3] {
    rotation.transpose().to_cols_array_2d()
}

fn insert_unique<V>(
    map: &mut BTreeMap<u32, V>,
    kind: &'static str,
    id: u32,
    value: V,
) -> Result<(), SceneIoError> {
    if map.insert(id, value).is_some() {
        return Err(SceneIoError::DuplicateId { kind, id });
    }
    Ok(())
}

fn scene_from_file(
    path: &Path,
    file: SceneFile<serde_json::Value>,
    parts: SceneParts,
) -> Result<Scene, SceneIoError> {
    let mut scene = Scene::new();

    if parts.views {
        for entry in file.views {
            let view = View {
                view_id: entry.view_id,
                intrinsic_id: entry.intrinsic_id,
                pose_id: entry.pose_id,
                path: entry.path,
                width: entry.width,
                height: entry.height,
            };
            insert_unique(&mut scene.views, "view", entry.view_id, view)?;
        }
    }

    if parts.intrinsics {
        for entry in file.intrinsics {
            let id = entry.intrinsic_id;
            let intrinsic = Distortion::from_model(&entry.model, &entry.distortion)
                .and_then(|distortion| {
                    PinholeCamera::new(
                        (entry.focal_length[0], entry.focal_length[1]),
                        (entry.principal_point[0], entry.principal_point[1]),
                        (entry.width, entry.height),
                        distortion,
                    )
                })
                .map_err(|source| SceneIoError::InvalidIntrinsic {
                    intrinsic_id: id,
                    source,
                })?;
            insert_unique(&mut scene.intrinsics, "intrinsic", id, intrinsic)?;
        }
    }

    if parts.extrinsics {
        for entry in file.poses {
            let pose = Pose::new(
                rotation_from_rows(&entry.rotation),
                DVec3::from_array(entry.center),
            );
            if !pose.has_valid_rotation(ROTATION_TOLERANCE) {
                return Err(SceneIoError::InvalidRotation(entry.pose_id));
            }
            insert_unique(&mut scene.poses, "pose", entry.pose_id, pose)?;
        }
    }

    if parts.structure {
        for value in file.structure {
            let entry: LandmarkEntry =
                serde_json::from_value(value).map_err(|source| SceneIoError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
            let landmark_id = entry.landmark_id;
            let describer = entry
                .describer_type
                .parse::<DescriberType>()
                .map_err(|source| SceneIoError::InvalidDescriber {
                    landmark_id,
                    source,
                })?;
            let mut observations = BTreeMap::new();
            for obs in entry.observations {
                if parts.views && !scene.views.contains_key(&obs.view_id) {
                    return Err(SceneIoError::UnknownView {
                        landmark_id,
                        view_id: obs.view_id,
                    });
                }
                observations.insert(
                    obs.view_id,
                    Observation {
                        x: DVec2::from_array(obs.x),
                        feature_id: obs.feature_id,
                    },
                );
            }
            let landmark = Landmark {
                position: DVec3::from_array(entry.x),
                describer,
                color: entry.color,
                observations,
            };
            insert_unique(&mut scene.landmarks, "landmark", landmark_id, landmark)?;
        }
    }

    Ok(scene)
}

fn scene_to_file(scene: &Scene, parts: SceneParts) -> SceneFile {
    let views = if parts.views {
        scene
            .views
            .values()
            .map(|view| ViewEntry {
                view_id: view.view_id,
                intrinsic_id: view.intrinsic_id,
                pose_id: view.pose_id,
                path: view.path.clone(),
                width: view.width,
                height: view.height,
            })
            .collect()
    } else {
        vec![]
    };

    let intrinsics = if parts.intrinsics {
        scene
            .intrinsics
            .iter()
            .map(|(&intrinsic_id, camera)| IntrinsicEntry {
                intrinsic_id,
                model: camera.distortion.model_name().to_string(),
                width: camera.image_size.0,
                height: camera.image_size.1,
                focal_length: [camera.focal_length.0, camera.focal_length.1],
                principal_point: [camera.principal_point.0, camera.principal_point.1],
                distortion: camera.distortion.coefficients(),
            })
            .collect()
    } else {
        vec![]
    };

    let poses = if parts.extrinsics {
        scene
            .poses
            .iter()
            .map(|(&pose_id, pose)| PoseEntry {
                pose_id,
                rotation: rotation_to_rows(&pose.rotation()),
                center: pose.center().to_array(),
            })
            .collect()
    } else {
        vec![]
    };

    let structure = if parts.structure {
        scene
            .landmarks
            .iter()
            .map(|(&landmark_id, landmark)| LandmarkEntry {
                landmark_id,
                describer_type: landmark.describer.to_string(),
                x: landmark.position.to_array(),
                color: landmark.color,
                observations: landmark
                    .observations
                    .iter()
                    .map(|(&view_id, obs)| ObservationEntry {
                        view_id,
                        feature_id: obs.feature_id,
                        x: obs.x.to_array(),
                    })
                    .collect(),
            })
            .collect()
    } else {
        vec![]
    };

    SceneFile {
        version: default_version(),
        views,
        intrinsics,
        poses,
        structure,
    }
}

/// Read the selected parts of a scene from a JSON file.
///
/// Intrinsics and rotations are validated. Views may reference intrinsics or poses that are
/// not defined; such views are simply not valid for reconstruction.
pub fn load_scene(path: impl AsRef<Path>, parts: SceneParts) -> Result<Scene, SceneIoError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| SceneIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = std::io::BufReader::new(file);
    let scene_file: SceneFile<serde_json::Value> =
        serde_json::from_reader(reader).map_err(|source| SceneIoError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let scene = scene_from_file(path, scene_file, parts)?;

    log::info!(
        "loaded scene {}: {} views, {} intrinsics, {} poses",
        path.display(),
        scene.views.len(),
        scene.intrinsics.len(),
        scene.poses.len()
    );
    Ok(scene)
}

/// The output formats of a scene, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFormat {
    /// The whole scene as JSON, extension `json` or `sfm`.
    Json,
    /// The landmark positions and colors as a binary PLY, extension `ply`.
    PointCloud,
}

impl SceneFormat {
    /// The format of a scene path, or [`SceneIoError::UnsupportedExtension`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SceneIoError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") | Some("sfm") => Ok(SceneFormat::Json),
            Some("ply") => Ok(SceneFormat::PointCloud),
            _ => Err(SceneIoError::UnsupportedExtension(path.to_path_buf())),
        }
    }
}

/// Write the selected parts of a scene.
///
/// The format follows the extension, see [`SceneFormat`].
pub fn save_scene(
    scene: &Scene,
    path: impl AsRef<Path>,
    parts: SceneParts,
) -> Result<(), SceneIoError> {
    let path = path.as_ref();
    match SceneFormat::from_path(path)? {
        SceneFormat::Json => {
            let file = std::fs::File::create(path).map_err(|source| SceneIoError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &scene_to_file(scene, parts))?;
        }
        SceneFormat::PointCloud => {
            write_ply_binary(path, &PointCloud::from_landmarks(&scene.landmarks))?;
        }
    }

    log::info!(
        "saved scene {} with {} landmarks",
        path.display(),
        scene.landmarks.len()
    );
    Ok(())
}

/// The path of the point cloud written next to a scene output: same stem, `.ply` extension.
pub fn point_cloud_companion_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension("ply")
}
