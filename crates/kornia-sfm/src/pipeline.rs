//! Structure estimation from known poses, stage by stage.
//!
//! The estimator borrows the scene read-only and owns the regions. Each stage consumes the
//! result of the previous one, and the landmarks are handed back to the caller at the end.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::camera::CameraError;
use crate::describer::{describer_types_to_string, DescriberType, DescriberTypeError};
use crate::filter::{geometric_filter, FilterStats, GeometricFilterConfig};
use crate::frustum::{frustum_intersection_pairs, FrustumConfig};
use crate::io::matches::MatchesError;
use crate::io::ply::PlyError;
use crate::io::scene::SceneIoError;
use crate::matching::{count_matches, match_pairs, MatcherConfig, PairwiseMatches};
use crate::outliers::{remove_outliers, OutlierConfig};
use crate::pairs::{filter_pairs, pairs_from_matches, PairSet};
use crate::regions::{RegionsError, RegionsPerView};
use crate::scene::{Landmarks, Scene};
use crate::tracks::{TrackStats, TracksBuilder};
use crate::triangulation::{triangulate_tracks, TriangulationConfig, TriangulationStats};

/// Error types for invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A threshold must be a finite strictly positive number.
    #[error("{name} must be finite and positive, got {value}")]
    NotPositive {
        /// Name of the parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The frustum depth range is empty.
    #[error("Invalid frustum depth range: z_near {z_near} must be below z_far {z_far}")]
    InvalidDepthRange {
        /// Near plane distance.
        z_near: f64,
        /// Far plane distance.
        z_far: f64,
    },

    /// Tracks need at least two views.
    #[error("min_views must be at least 2, got {0}")]
    InvalidMinViews(usize),

    /// The matcher ratio must be in `(0, 1]`.
    #[error("Matcher ratio must be in (0, 1], got {0}")]
    InvalidRatio(f32),

    /// The minimum viewing angle must be in `[0, 180)` degrees.
    #[error("min_angle_deg must be in [0, 180), got {0}")]
    InvalidAngle(f64),

    /// No describer type was requested.
    #[error("At least one describer type is required")]
    NoDescriberType,

    /// The configuration file cannot be read.
    #[error("Failed to read configuration")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid.
    #[error("Failed to parse configuration")]
    Parse(#[from] serde_json::Error),
}

/// Error types for the structure estimation.
#[derive(Debug, thiserror::Error)]
pub enum SfmError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid describer type.
    #[error(transparent)]
    DescriberType(#[from] DescriberTypeError),

    /// Invalid camera.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The scene cannot be read or written.
    #[error(transparent)]
    SceneIo(#[from] SceneIoError),

    /// Invalid regions.
    #[error(transparent)]
    Regions(#[from] RegionsError),

    /// The pairwise matches cannot be read.
    #[error(transparent)]
    Matches(#[from] MatchesError),

    /// The point cloud cannot be read or written.
    #[error(transparent)]
    Ply(#[from] PlyError),

    /// A stage was run out of order.
    #[error("Cannot run stage {requested} from stage {current}")]
    InvalidStage {
        /// The current stage.
        current: Stage,
        /// The stage that was requested.
        requested: Stage,
    },
}

/// The steps of the structure estimation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Scene and regions are loaded.
    Loaded,
    /// The image pairs are selected.
    PairsSelected,
    /// The putative correspondences are computed.
    Matched,
    /// The correspondences are geometrically validated.
    Filtered,
    /// The landmarks are triangulated.
    Triangulated,
    /// The outlier landmarks are removed.
    Cleaned,
    /// The scene is written.
    Saved,
}

impl Stage {
    /// The stage that follows, `None` after [`Stage::Saved`].
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Loaded => Some(Stage::PairsSelected),
            Stage::PairsSelected => Some(Stage::Matched),
            Stage::Matched => Some(Stage::Filtered),
            Stage::Filtered => Some(Stage::Triangulated),
            Stage::Triangulated => Some(Stage::Cleaned),
            Stage::Cleaned => Some(Stage::Saved),
            Stage::Saved => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// All the parameters of the structure estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// Frustum pairing.
    pub frustum: FrustumConfig,
    /// Descriptor matching.
    pub matcher: MatcherConfig,
    /// Geometric validation.
    pub filter: GeometricFilterConfig,
    /// Triangulation.
    pub triangulation: TriangulationConfig,
    /// Outlier removal.
    pub outliers: OutlierConfig,
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

impl StructureConfig {
    /// Read a configuration from a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let FrustumConfig { z_near, z_far } = self.frustum;
        check_positive("z_near", z_near)?;
        check_positive("z_far", z_far)?;
        if z_near >= z_far {
            return Err(ConfigError::InvalidDepthRange { z_near, z_far });
        }

        if let Some(ratio) = self.matcher.ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::InvalidRatio(ratio));
            }
        }
        if let Some(max_distance) = self.matcher.max_distance {
            check_positive("max_distance", max_distance as f64)?;
        }

        check_positive("max_epipolar_error", self.filter.max_epipolar_error)?;
        check_positive(
            "max_triplet_reprojection_error",
            self.filter.max_triplet_reprojection_error,
        )?;

        if self.triangulation.min_views < 2 {
            return Err(ConfigError::InvalidMinViews(self.triangulation.min_views));
        }
        if let Some(max_error) = self.triangulation.max_reprojection_error {
            check_positive("max_reprojection_error", max_error)?;
        }

        // zero disables the angle filter
        let min_angle = self.outliers.min_angle_deg;
        if !(min_angle.is_finite() && (0.0..180.0).contains(&min_angle)) {
            return Err(ConfigError::InvalidAngle(min_angle));
        }
        if let Some(max_residual) = self.outliers.max_pixel_residual {
            check_positive("max_pixel_residual", max_residual)?;
        }
        Ok(())
    }
}

/// Where the image pairs come from.
#[derive(Debug, Clone)]
pub enum PairSource {
    /// Pairs of valid views whose frustums intersect.
    Frustum,
    /// The pairs of precomputed correspondences, restricted to valid views.
    Matches {
        /// The precomputed correspondences.
        matches: PairwiseMatches,
        /// Use these correspondences instead of matching the descriptors again.
        reuse: bool,
    },
}

/// Summary of a structure estimation run.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureReport {
    /// Last completed stage.
    pub stage: Stage,
    /// Views in the scene.
    pub num_views: usize,
    /// Views with valid intrinsics and pose.
    pub num_valid_views: usize,
    /// Selected image pairs.
    pub num_pairs: usize,
    /// Correspondences before and after the geometric validation.
    pub filter: FilterStats,
    /// Track building counters.
    pub tracks: TrackStats,
    /// Triangulation counters.
    pub triangulation: TriangulationStats,
    /// Landmarks removed as outliers.
    pub outliers_removed: usize,
    /// Landmarks in the final structure.
    pub num_landmarks: usize,
    /// Time spent in each completed stage.
    pub durations: Vec<(Stage, Duration)>,
}

impl StructureReport {
    fn new(scene: &Scene) -> Self {
        Self {
            stage: Stage::Loaded,
            num_views: scene.views.len(),
            num_valid_views: scene.valid_views().len(),
            num_pairs: 0,
            filter: FilterStats::default(),
            tracks: TrackStats::default(),
            triangulation: TriangulationStats::default(),
            outliers_removed: 0,
            num_landmarks: 0,
            durations: Vec::new(),
        }
    }

    /// Total time spent in the completed stages.
    pub fn elapsed(&self) -> Duration {
        self.durations.iter().map(|(_, d)| *d).sum()
    }

    /// Record that the scene has been written.
    pub fn mark_saved(&mut self, duration: Duration) {
        if self.stage == Stage::Cleaned {
            self.stage = Stage::Saved;
            self.durations.push((Stage::Saved, duration));
        }
    }
}

/// Runs the structure estimation stages on a scene with known poses.
pub struct StructureEstimator<'a> {
    scene: &'a Scene,
    regions: RegionsPerView,
    describers: Vec<DescriberType>,
    config: StructureConfig,
    pairs: PairSet,
    provided_matches: Option<PairwiseMatches>,
    matches: PairwiseMatches,
    landmarks: Landmarks,
    report: StructureReport,
}

impl<'a> StructureEstimator<'a> {
    /// Create an estimator in the [`Stage::Loaded`] stage.
    ///
    /// The configuration is validated before anything runs.
    pub fn new(
        scene: &'a Scene,
        regions: RegionsPerView,
        describers: &[DescriberType],
        config: StructureConfig,
    ) -> Result<Self, SfmError> {
        config.validate()?;
        if describers.is_empty() {
            return Err(ConfigError::NoDescriberType.into());
        }
        Ok(Self {
            scene,
            regions,
            describers: describers.to_vec(),
            config,
            pairs: PairSet::new(),
            provided_matches: None,
            matches: PairwiseMatches::new(),
            landmarks: Landmarks::new(),
            report: StructureReport::new(scene),
        })
    }

    /// The last completed stage.
    pub fn stage(&self) -> Stage {
        self.report.stage
    }

    /// The report so far.
    pub fn report(&self) -> &StructureReport {
        &self.report
    }

    /// The selected pairs.
    pub fn pairs(&self) -> &PairSet {
        &self.pairs
    }

    /// The current correspondences.
    pub fn matches(&self) -> &PairwiseMatches {
        &self.matches
    }

    /// The current landmarks.
    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    fn begin(&self, requested: Stage) -> Result<Instant, SfmError> {
        if self.report.stage.next() != Some(requested) {
            return Err(SfmError::InvalidStage {
                current: self.report.stage,
                requested,
            });
        }
        Ok(Instant::now())
    }

    fn complete(&mut self, stage: Stage, start: Instant) {
        let duration = start.elapsed();
        log::info!("{stage} in {duration:?}");
        self.report.stage = stage;
        self.report.durations.push((stage, duration));
    }

    /// Select the image pairs.
    pub fn select_pairs(&mut self, source: PairSource) -> Result<&PairSet, SfmError> {
        let start = self.begin(Stage::PairsSelected)?;

        self.pairs = match source {
            PairSource::Frustum => {
                log::info!("selecting pairs from frustum intersections");
                frustum_intersection_pairs(self.scene, &self.config.frustum)
            }
            PairSource::Matches { matches, reuse } => {
                let pairs = filter_pairs(&pairs_from_matches(&matches), &self.scene.valid_views());
                log::info!(
                    "selecting {} of {} pairs from the provided matches",
                    pairs.len(),
                    matches.len()
                );
                if reuse {
                    self.provided_matches = Some(matches);
                }
                pairs
            }
        };
        self.report.num_pairs = self.pairs.len();

        self.complete(Stage::PairsSelected, start);
        Ok(&self.pairs)
    }

    /// Compute the putative correspondences of the selected pairs.
    ///
    /// The descriptors are released afterwards, only the keypoints are used from here on.
    pub fn match_pairs(&mut self) -> Result<usize, SfmError> {
        let start = self.begin(Stage::Matched)?;

        self.matches = match self.provided_matches.take() {
            Some(provided) => provided
                .into_iter()
                .filter(|(pair, _)| self.pairs.contains(pair))
                .map(|(pair, per_type)| {
                    let per_type = per_type
                        .into_iter()
                        .filter(|(describer, _)| self.describers.contains(describer))
                        .collect();
                    (pair, per_type)
                })
                .collect(),
            None => {
                log::info!(
                    "matching {} pairs with {}",
                    self.pairs.len(),
                    describer_types_to_string(&self.describers)
                );
                match_pairs(
                    &self.pairs,
                    &self.regions,
                    &self.describers,
                    &self.config.matcher,
                )
            }
        };
        self.regions.clear_descriptors();

        let putative = count_matches(&self.matches);
        self.report.filter.putative = putative;
        self.complete(Stage::Matched, start);
        Ok(putative)
    }

    /// Keep the correspondences consistent with the known camera geometry.
    pub fn filter(&mut self) -> Result<usize, SfmError> {
        let start = self.begin(Stage::Filtered)?;

        let (filtered, stats) =
            geometric_filter(self.scene, &self.regions, &self.matches, &self.config.filter);
        log::info!(
            "{} of {} correspondences are geometrically valid",
            stats.triplet_inliers.unwrap_or(stats.epipolar_inliers),
            stats.putative
        );
        self.matches = filtered;
        self.report.filter = stats;

        self.complete(Stage::Filtered, start);
        Ok(count_matches(&self.matches))
    }

    /// Build the tracks and triangulate one landmark per track.
    pub fn triangulate(&mut self) -> Result<usize, SfmError> {
        let start = self.begin(Stage::Triangulated)?;

        let (tracks, track_stats) =
            TracksBuilder::build(&self.matches).into_tracks(self.config.triangulation.min_views);
        log::info!(
            "{} tracks ({} conflicting, {} too short)",
            tracks.len(),
            track_stats.conflicting,
            track_stats.too_short
        );

        let (landmarks, stats) = triangulate_tracks(
            self.scene,
            &self.regions,
            &tracks,
            &self.config.triangulation,
        );
        log::info!(
            "{} landmarks triangulated, {} degenerate tracks",
            stats.landmarks,
            stats.degenerate
        );
        self.landmarks = landmarks;
        self.report.tracks = track_stats;
        self.report.triangulation = stats;

        self.complete(Stage::Triangulated, start);
        Ok(self.landmarks.len())
    }

    /// Remove the landmarks failing the outlier criteria.
    pub fn remove_outliers(&mut self) -> Result<usize, SfmError> {
        let start = self.begin(Stage::Cleaned)?;

        let removed = remove_outliers(self.scene, &mut self.landmarks, &self.config.outliers);
        log::info!(
            "removed {removed} outliers, {} landmarks left",
            self.landmarks.len()
        );
        self.report.outliers_removed = removed;
        self.report.num_landmarks = self.landmarks.len();

        self.complete(Stage::Cleaned, start);
        Ok(removed)
    }

    /// Hand over the landmarks and the report once the outliers are removed.
    pub fn finish(self) -> Result<(Landmarks, StructureReport), SfmError> {
        if self.report.stage != Stage::Cleaned {
            return Err(SfmError::InvalidStage {
                current: self.report.stage,
                requested: Stage::Saved,
            });
        }
        Ok((self.landmarks, self.report))
    }

    /// Run every stage up to [`Stage::Cleaned`].
    pub fn run(mut self, source: PairSource) -> Result<(Landmarks, StructureReport), SfmError> {
        self.select_pairs(source)?;
        self.match_pairs()?;
        self.filter()?;
        self.triangulate()?;
        self.remove_outliers()?;
        self.finish()
    }
}

/// Estimate the structure of a scene with known poses.
///
/// The scene is not modified; the caller installs the returned landmarks with
/// [`Scene::set_landmarks`].
pub fn estimate_structure(
    scene: &Scene,
    regions: RegionsPerView,
    describers: &[DescriberType],
    source: PairSource,
    config: StructureConfig,
) -> Result<(Landmarks, StructureReport), SfmError> {
    StructureEstimator::new(scene, regions, describers, config)?.run(source)
}
