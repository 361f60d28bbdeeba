/// Keypoint and descriptor files.
pub mod features;

/// Pairwise correspondence files.
pub mod matches;

/// PLY point cloud files.
pub mod ply;

/// Scene description files.
pub mod scene;
