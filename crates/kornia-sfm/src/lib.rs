#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole intrinsics, lens distortion and camera poses.
pub mod camera;

/// Feature describer types and their descriptor metrics.
pub mod describer;

/// Epipolar geometry from known camera poses.
pub mod epipolar;

/// Geometric validation of the putative correspondences.
pub mod filter;

/// Camera frustums and frustum based pair selection.
pub mod frustum;

/// Reading and writing scenes, regions, matches and point clouds.
pub mod io;

/// Nearest neighbor descriptor matching.
pub mod matching;

/// Removal of badly conditioned or inconsistent landmarks.
pub mod outliers;

/// Unordered view pairs.
pub mod pairs;

/// The staged structure estimation.
pub mod pipeline;

/// Point cloud representation of the landmarks.
pub mod pointcloud;

/// Keypoints and descriptors of the views.
pub mod regions;

/// Views, intrinsics, poses and landmarks.
pub mod scene;

/// Feature tracks built from pairwise correspondences.
pub mod tracks;

/// Multi-view triangulation of the tracks.
pub mod triangulation;
