use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::describer::DescriberType;
use crate::pairs::{Pair, PairSet};
use crate::regions::{Descriptors, RegionsPerView};
use crate::scene::FeatureId;

/// A correspondence between feature `i` of the first view and feature `j` of the second view
/// of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndMatch {
    /// Feature index in the first view.
    pub i: FeatureId,
    /// Feature index in the second view.
    pub j: FeatureId,
}

impl IndMatch {
    /// Create a correspondence.
    pub fn new(i: FeatureId, j: FeatureId) -> Self {
        Self { i, j }
    }
}

/// Correspondences of a pair, per describer type.
pub type MatchesPerDescType = BTreeMap<DescriberType, Vec<IndMatch>>;

/// Correspondences of all the pairs.
pub type PairwiseMatches = BTreeMap<Pair, MatchesPerDescType>;

/// Total number of correspondences.
pub fn count_matches(matches: &PairwiseMatches) -> usize {
    matches
        .values()
        .flat_map(|per_type| per_type.values())
        .map(Vec::len)
        .sum()
}

/// Parameters of the nearest neighbor descriptor matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Lowe's ratio test: keep a match if `best < ratio * second_best`.
    pub ratio: Option<f32>,
    /// Keep only mutual nearest neighbors.
    pub cross_check: bool,
    /// Discard matches with a distance above this value.
    pub max_distance: Option<f32>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ratio: Some(0.8),
            cross_check: true,
            max_distance: None,
        }
    }
}

#[inline]
fn hamming_distance(a: &[u8], b: &[u8]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum::<u32>() as f32
}

#[inline]
fn l2_distance_u8(a: &[u8], b: &[u8]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum::<u32>() as f32
}

#[inline]
fn l2_distance_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
}

/// Match two descriptor sets with brute-force nearest neighbor search.
///
/// For each descriptor in `descriptors1`, finds the nearest neighbor in `descriptors2` using the
/// L2 distance (Hamming for binary descriptors). Matches are filtered by the optional maximum
/// distance, the optional ratio test and the optional cross-check.
///
/// Descriptor sets of different kinds or dimensions cannot be compared and produce no match.
///
/// # Arguments
///
/// * `descriptors1` - Descriptors of the first view.
/// * `descriptors2` - Descriptors of the second view.
/// * `config` - Matching policy.
///
/// # Returns
///
/// The correspondences sorted by the first feature index.
pub fn match_descriptors(
    descriptors1: &Descriptors,
    descriptors2: &Descriptors,
    config: &MatcherConfig,
) -> Vec<IndMatch> {
    if descriptors1.dimension() != descriptors2.dimension() {
        return vec![];
    }

    match (descriptors1, descriptors2) {
        (Descriptors::U8 { dim, data: d1 }, Descriptors::U8 { data: d2, .. }) => {
            // squared distances, so the thresholds are squared too
            let squared = MatcherConfig {
                ratio: config.ratio.map(|r| r * r),
                max_distance: config.max_distance.map(|d| d * d),
                ..*config
            };
            nearest_neighbors(d1, d2, *dim as usize, &squared, l2_distance_u8)
        }
        (Descriptors::F32 { dim, data: d1 }, Descriptors::F32 { data: d2, .. }) => {
            let squared = MatcherConfig {
                ratio: config.ratio.map(|r| r * r),
                max_distance: config.max_distance.map(|d| d * d),
                ..*config
            };
            nearest_neighbors(d1, d2, *dim as usize, &squared, l2_distance_f32)
        }
        (Descriptors::Binary { bytes, data: d1 }, Descriptors::Binary { data: d2, .. }) => {
            nearest_neighbors(d1, d2, *bytes as usize, config, hamming_distance)
        }
        _ => vec![],
    }
}

fn nearest_neighbors<T>(
    descriptors1: &[T],
    descriptors2: &[T],
    dim: usize,
    config: &MatcherConfig,
    distance: impl Fn(&[T], &[T]) -> f32,
) -> Vec<IndMatch> {
    if dim == 0 {
        return vec![];
    }
    let m = descriptors1.len() / dim;
    let n = descriptors2.len() / dim;
    if m == 0 || n == 0 {
        return vec![];
    }

    // Forward pass: for each desc1[i], find best and second-best match in desc2.
    let mut fwd_best_j = vec![0usize; m];
    let mut fwd_best_dist = vec![f32::INFINITY; m];
    let mut fwd_second_dist = vec![f32::INFINITY; m];

    for (i, d1) in descriptors1.chunks_exact(dim).enumerate() {
        for (j, d2) in descriptors2.chunks_exact(dim).enumerate() {
            let dist = distance(d1, d2);
            if dist < fwd_best_dist[i] {
                fwd_second_dist[i] = fwd_best_dist[i];
                fwd_best_dist[i] = dist;
                fwd_best_j[i] = j;
            } else if dist < fwd_second_dist[i] {
                fwd_second_dist[i] = dist;
            }
        }
    }

    // Reverse pass (only if cross-check): for each desc2[j], find best match in desc1.
    let rev_best_i = if config.cross_check {
        let mut rev = vec![0usize; n];
        let mut rev_dist = vec![f32::INFINITY; n];
        for (i, d1) in descriptors1.chunks_exact(dim).enumerate() {
            for (j, d2) in descriptors2.chunks_exact(dim).enumerate() {
                let dist = distance(d1, d2);
                if dist < rev_dist[j] {
                    rev_dist[j] = dist;
                    rev[j] = i;
                }
            }
        }
        Some(rev)
    } else {
        None
    };

    // Build matches applying all filters in one pass.
    let mut matches = Vec::new();
    for i in 0..m {
        let j = fwd_best_j[i];
        let best_dist = fwd_best_dist[i];

        if !best_dist.is_finite() {
            continue;
        }

        if let Some(max_dist) = config.max_distance {
            if best_dist > max_dist {
                continue;
            }
        }

        if let Some(ref rev) = rev_best_i {
            if rev[j] != i {
                continue;
            }
        }

        if let Some(ratio) = config.ratio {
            let second = fwd_second_dist[i];
            if second.is_finite() && best_dist >= ratio * second {
                continue;
            }
        }

        matches.push(IndMatch::new(i as FeatureId, j as FeatureId));
    }

    matches
}

/// Match the region sets of every pair, for each describer type.
///
/// Pairs are processed in parallel. Pairs without regions or descriptors for a describer type
/// contribute no correspondence, and pairs without any correspondence are not reported.
pub fn match_pairs(
    pairs: &PairSet,
    regions: &RegionsPerView,
    describers: &[DescriberType],
    config: &MatcherConfig,
) -> PairwiseMatches {
    let pairs = pairs.iter().copied().collect::<Vec<_>>();
    pairs
        .par_iter()
        .filter_map(|pair| {
            let mut per_type = MatchesPerDescType::new();
            for &describer in describers {
                let descriptors = (
                    regions
                        .get(pair.first(), describer)
                        .and_then(|r| r.descriptors()),
                    regions
                        .get(pair.second(), describer)
                        .and_then(|r| r.descriptors()),
                );
                let (Some(d1), Some(d2)) = descriptors else {
                    continue;
                };
                let matches = match_descriptors(d1, d2, config);
                if !matches.is_empty() {
                    per_type.insert(describer, matches);
                }
            }
            (!per_type.is_empty()).then_some((*pair, per_type))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{Feature, Regions, RegionsError};

    fn binary(rows: &[[u8; 2]]) -> Descriptors {
        Descriptors::Binary {
            bytes: 2,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[test]
    fn test_match_binary_mutual() {
        let d1 = binary(&[[0b1111_0000, 0], [0b0000_1111, 0xff], [0xff, 0xff]]);
        let d2 = binary(&[[0b0000_1111, 0xff], [0b1111_0000, 0x01]]);
        let config = MatcherConfig {
            ratio: None,
            cross_check: true,
            max_distance: None,
        };
        let matches = match_descriptors(&d1, &d2, &config);
        // desc1[2] is closest to desc2[0] but desc2[0] prefers desc1[1]
        assert_eq!(matches, vec![IndMatch::new(0, 1), IndMatch::new(1, 0)]);
    }

    #[test]
    fn test_match_ratio_test() {
        let d1 = Descriptors::F32 {
            dim: 2,
            data: vec![0.0, 0.0, 10.0, 10.0],
        };
        // two equally good candidates for desc1[0], a clear one for desc1[1]
        let d2 = Descriptors::F32 {
            dim: 2,
            data: vec![1.0, 0.0, -1.0, 0.0, 10.0, 10.5],
        };
        let config = MatcherConfig {
            ratio: Some(0.8),
            cross_check: false,
            max_distance: None,
        };
        let matches = match_descriptors(&d1, &d2, &config);
        assert_eq!(matches, vec![IndMatch::new(1, 2)]);
    }

    #[test]
    fn test_match_incompatible_descriptors() {
        let d1 = Descriptors::U8 {
            dim: 2,
            data: vec![1, 2],
        };
        let d2 = Descriptors::F32 {
            dim: 2,
            data: vec![1.0, 2.0],
        };
        assert!(match_descriptors(&d1, &d2, &MatcherConfig::default()).is_empty());
    }

    #[test]
    fn test_match_pairs_missing_regions() -> Result<(), RegionsError> {
        let descriptors = Descriptors::U8 {
            dim: 4,
            data: vec![0, 0, 0, 0, 200, 200, 200, 200],
        };
        let features = vec![Feature::new(0.0, 0.0), Feature::new(1.0, 1.0)];
        let mut regions = RegionsPerView::new();
        regions.insert(0, DescriberType::Sift, Regions::new(features.clone(), descriptors.clone())?);
        regions.insert(1, DescriberType::Sift, Regions::new(features, descriptors)?);

        let pairs = [Pair::new(0, 1), Pair::new(0, 2)]
            .into_iter()
            .flatten()
            .collect::<PairSet>();
        let matches = match_pairs(
            &pairs,
            &regions,
            &[DescriberType::Sift, DescriberType::Akaze],
            &MatcherConfig::default(),
        );

        assert_eq!(matches.len(), 1);
        let sift = matches
            .get(&Pair::new(0, 1).unwrap())
            .and_then(|m| m.get(&DescriberType::Sift));
        assert_eq!(
            sift,
            Some(&vec![IndMatch::new(0, 0), IndMatch::new(1, 1)])
        );
        assert_eq!(count_matches(&matches), 2);
        Ok(())
    }
}
