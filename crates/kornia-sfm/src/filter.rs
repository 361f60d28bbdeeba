use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::describer::DescriberType;
use crate::epipolar::{fundamental_from_cameras, sampson_distance};
use crate::matching::{count_matches, IndMatch, MatchesPerDescType, PairwiseMatches};
use crate::pairs::{view_triplets, Pair, PairSet};
use crate::regions::RegionsPerView;
use crate::scene::Scene;
use crate::tracks::TracksBuilder;
use crate::triangulation::{triangulate_track, TriangulationConfig};

/// Parameters of the geometric validation of the correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricFilterConfig {
    /// Maximum Sampson distance to the epipolar geometry of the pair, in pixels.
    pub max_epipolar_error: f64,
    /// Additionally require the correspondences to be consistent in a view triplet.
    pub triplet_validation: bool,
    /// Maximum reprojection error of a triplet track in each of its views, in pixels.
    pub max_triplet_reprojection_error: f64,
}

impl Default for GeometricFilterConfig {
    fn default() -> Self {
        Self {
            max_epipolar_error: 4.0,
            triplet_validation: false,
            max_triplet_reprojection_error: 4.0,
        }
    }
}

/// Counters of the geometric filtering step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Correspondences given to the filter.
    pub putative: usize,
    /// Correspondences kept by the epipolar test.
    pub epipolar_inliers: usize,
    /// Correspondences kept after the triplet validation, if enabled.
    pub triplet_inliers: Option<usize>,
}

/// Keep the correspondences of a pair that agree with the epipolar geometry of its known poses.
///
/// The fundamental matrix is computed from the poses and intrinsics of the two views. The
/// observations are undistorted before measuring their Sampson distance.
pub fn epipolar_filter_pair(
    scene: &Scene,
    regions: &RegionsPerView,
    pair: Pair,
    matches: &MatchesPerDescType,
    max_error: f64,
) -> MatchesPerDescType {
    let cameras = (scene.camera(pair.first()), scene.camera(pair.second()));
    let (Some(camera_i), Some(camera_j)) = cameras else {
        return MatchesPerDescType::new();
    };
    let f = fundamental_from_cameras(&camera_i, &camera_j);
    let threshold = max_error * max_error;

    matches
        .iter()
        .filter_map(|(&describer, correspondences)| {
            let inliers = correspondences
                .iter()
                .filter(|m| {
                    let x_i = regions.feature_coords(pair.first(), describer, m.i);
                    let x_j = regions.feature_coords(pair.second(), describer, m.j);
                    let (Some(x_i), Some(x_j)) = (x_i, x_j) else {
                        return false;
                    };
                    let x_i = camera_i.intrinsic.undistort_pixel(x_i);
                    let x_j = camera_j.intrinsic.undistort_pixel(x_j);
                    sampson_distance(&f, x_i, x_j) <= threshold
                })
                .copied()
                .collect::<Vec<_>>();
            (!inliers.is_empty()).then_some((describer, inliers))
        })
        .collect()
}

/// Apply the epipolar test to every pair in parallel. Pairs left without correspondences are
/// dropped.
pub fn epipolar_filter(
    scene: &Scene,
    regions: &RegionsPerView,
    matches: &PairwiseMatches,
    max_error: f64,
) -> PairwiseMatches {
    let pairs = matches.iter().collect::<Vec<_>>();
    pairs
        .par_iter()
        .filter_map(|&(&pair, per_type)| {
            let inliers = epipolar_filter_pair(scene, regions, pair, per_type, max_error);
            (!inliers.is_empty()).then_some((pair, inliers))
        })
        .collect()
}

// correspondences of one pair, tagged for set operations
type TaggedMatch = (Pair, DescriberType, IndMatch);

/// Keep only the correspondences confirmed by a consistent view triplet.
///
/// For each triplet of views whose three pairs have correspondences, the tracks spanning the
/// three views are triangulated. A track is consistent if its point lies in front of the three
/// cameras and reprojects within `max_reprojection_error` in each of them; the correspondences
/// it is made of are kept. Correspondences of pairs that belong to no triplet are dropped.
pub fn triplet_filter(
    scene: &Scene,
    regions: &RegionsPerView,
    matches: &PairwiseMatches,
    max_reprojection_error: f64,
) -> PairwiseMatches {
    let pairs = matches.keys().copied().collect::<PairSet>();
    let triplets = view_triplets(&pairs);
    log::debug!("triplet validation over {} triplets", triplets.len());

    let config = TriangulationConfig {
        min_views: 3,
        max_reprojection_error: Some(max_reprojection_error),
    };

    let confirmed = triplets
        .par_iter()
        .flat_map_iter(|&[a, b, c]| {
            let mut sub = PairwiseMatches::new();
            for pair in [Pair::new(a, b), Pair::new(a, c), Pair::new(b, c)]
                .into_iter()
                .flatten()
            {
                if let Some(per_type) = matches.get(&pair) {
                    sub.insert(pair, per_type.clone());
                }
            }
            let (tracks, _) = TracksBuilder::build(&sub).into_tracks(3);

            let mut kept = Vec::new();
            for track in tracks.values() {
                if triangulate_track(scene, regions, track, &config).is_err() {
                    continue;
                }
                let features = &track.features;
                for (x, y) in [(a, b), (a, c), (b, c)] {
                    let (Some(&fx), Some(&fy)) = (features.get(&x), features.get(&y)) else {
                        continue;
                    };
                    if let Some(pair) = Pair::new(x, y) {
                        kept.push((pair, track.describer, IndMatch::new(fx, fy)));
                    }
                }
            }
            kept
        })
        .collect::<BTreeSet<TaggedMatch>>();

    // a track link is only kept if the pair actually held that correspondence
    let mut filtered = PairwiseMatches::new();
    for (pair, per_type) in matches {
        for (&describer, correspondences) in per_type {
            let inliers = correspondences
                .iter()
                .filter(|m| confirmed.contains(&(*pair, describer, **m)))
                .copied()
                .collect::<Vec<_>>();
            if !inliers.is_empty() {
                filtered
                    .entry(*pair)
                    .or_insert_with(MatchesPerDescType::new)
                    .insert(describer, inliers);
            }
        }
    }
    filtered
}

/// Run the geometric validation configured in `config`.
pub fn geometric_filter(
    scene: &Scene,
    regions: &RegionsPerView,
    matches: &PairwiseMatches,
    config: &GeometricFilterConfig,
) -> (PairwiseMatches, FilterStats) {
    let putative = count_matches(matches);
    let filtered = epipolar_filter(scene, regions, matches, config.max_epipolar_error);
    let epipolar_inliers = count_matches(&filtered);

    if !config.triplet_validation {
        return (
            filtered,
            FilterStats {
                putative,
                epipolar_inliers,
                triplet_inliers: None,
            },
        );
    }

    let filtered = triplet_filter(
        scene,
        regions,
        &filtered,
        config.max_triplet_reprojection_error,
    );
    let triplet_inliers = count_matches(&filtered);
    (
        filtered,
        FilterStats {
            putative,
            epipolar_inliers,
            triplet_inliers: Some(triplet_inliers),
        },
    )
}
