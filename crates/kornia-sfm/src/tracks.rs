//! Feature tracks built from pairwise correspondences with a disjoint-set forest.

use std::collections::{BTreeMap, BTreeSet};

use crate::describer::DescriberType;
use crate::matching::PairwiseMatches;
use crate::scene::{FeatureId, ViewId};

/// A disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// Create `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether the forest has no element.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// The representative of the set containing `x`.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// A feature of a view for a describer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureKey {
    /// The view holding the feature.
    pub view_id: ViewId,
    /// The describer type of the feature.
    pub describer: DescriberType,
    /// The feature index in the region set.
    pub feature_id: FeatureId,
}

/// A set of features of distinct views seen as the same scene point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Describer type shared by all the features.
    pub describer: DescriberType,
    /// The feature observed in each view.
    pub features: BTreeMap<ViewId, FeatureId>,
}

impl Track {
    /// Number of views observing the track.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the track has no observation.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Tracks by id.
pub type Tracks = BTreeMap<u32, Track>;

/// Counters of the track building step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    /// Number of connected components of the correspondence graph.
    pub components: usize,
    /// Components dropped because they hold two features of the same view.
    pub conflicting: usize,
    /// Components dropped because they span too few views.
    pub too_short: usize,
}

/// Builds tracks by merging pairwise correspondences.
#[derive(Debug, Clone)]
pub struct TracksBuilder {
    keys: Vec<FeatureKey>,
    union_find: UnionFind,
}

impl TracksBuilder {
    /// Link the features of every correspondence.
    pub fn build(matches: &PairwiseMatches) -> Self {
        let mut key_set = BTreeSet::new();
        for (pair, per_type) in matches {
            for (&describer, correspondences) in per_type {
                for m in correspondences {
                    key_set.insert(FeatureKey {
                        view_id: pair.first(),
                        describer,
                        feature_id: m.i,
                    });
                    key_set.insert(FeatureKey {
                        view_id: pair.second(),
                        describer,
                        feature_id: m.j,
                    });
                }
            }
        }

        let keys = key_set.into_iter().collect::<Vec<_>>();
        let mut union_find = UnionFind::new(keys.len());

        let index_of = |key: &FeatureKey| keys.binary_search(key).ok();
        for (pair, per_type) in matches {
            for (&describer, correspondences) in per_type {
                for m in correspondences {
                    let a = index_of(&FeatureKey {
                        view_id: pair.first(),
                        describer,
                        feature_id: m.i,
                    });
                    let b = index_of(&FeatureKey {
                        view_id: pair.second(),
                        describer,
                        feature_id: m.j,
                    });
                    if let (Some(a), Some(b)) = (a, b) {
                        union_find.union(a, b);
                    }
                }
            }
        }

        Self { keys, union_find }
    }

    /// Number of distinct features referenced by the correspondences.
    pub fn num_features(&self) -> usize {
        self.keys.len()
    }

    /// Extract the valid tracks spanning at least `min_views` views.
    ///
    /// Track ids are dense and follow the order of the smallest feature key of each track,
    /// so they do not depend on the order the correspondences were inserted in.
    pub fn into_tracks(mut self, min_views: usize) -> (Tracks, TrackStats) {
        // keys are sorted, so groups are created in order of their first key
        let mut groups: Vec<Vec<FeatureKey>> = Vec::new();
        let mut group_of_root = BTreeMap::new();
        for index in 0..self.keys.len() {
            let root = self.union_find.find(index);
            let group = *group_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(self.keys[index]);
        }

        let mut stats = TrackStats {
            components: groups.len(),
            ..Default::default()
        };
        let mut tracks = Tracks::new();
        for group in groups {
            let Some(describer) = group.first().map(|k| k.describer) else {
                continue;
            };
            let mut features = BTreeMap::new();
            let mut conflict = false;
            for key in &group {
                // keys of different describer types are never linked
                if key.describer != describer
                    || features.insert(key.view_id, key.feature_id).is_some()
                {
                    conflict = true;
                    break;
                }
            }
            if conflict {
                stats.conflicting += 1;
                continue;
            }
            if features.len() < min_views {
                stats.too_short += 1;
                continue;
            }
            let id = tracks.len() as u32;
            tracks.insert(id, Track {
                describer,
                features,
            });
        }

        (tracks, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{IndMatch, MatchesPerDescType};
    use crate::pairs::Pair;

    fn add(matches: &mut PairwiseMatches, a: ViewId, b: ViewId, m: &[(FeatureId, FeatureId)]) {
        let Some(pair) = Pair::new(a, b) else {
            return;
        };
        let swapped = a > b;
        let per_type: &mut MatchesPerDescType = matches.entry(pair).or_default();
        per_type
            .entry(DescriberType::Sift)
            .or_default()
            .extend(m.iter().map(|&(i, j)| {
                if swapped {
                    IndMatch::new(j, i)
                } else {
                    IndMatch::new(i, j)
                }
            }));
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 4);
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
        assert_eq!(uf.len(), 5);
    }

    #[test]
    fn test_tracks_transitive_merge() {
        let mut matches = PairwiseMatches::new();
        add(&mut matches, 0, 1, &[(10, 20), (11, 21)]);
        add(&mut matches, 1, 2, &[(20, 30)]);

        let (tracks, stats) = TracksBuilder::build(&matches).into_tracks(2);
        assert_eq!(stats.components, 2);
        assert_eq!(tracks.len(), 2);
        assert_eq!(
            tracks[&0].features,
            BTreeMap::from([(0, 10), (1, 20), (2, 30)])
        );
        assert_eq!(tracks[&1].features, BTreeMap::from([(0, 11), (1, 21)]));

        let (long_tracks, stats) = TracksBuilder::build(&matches).into_tracks(3);
        assert_eq!(long_tracks.len(), 1);
        assert_eq!(stats.too_short, 1);
    }

    #[test]
    fn test_tracks_conflict_dropped() {
        let mut matches = PairwiseMatches::new();
        // feature 0 of view 0 ends up linked with both 5 and 6 of view 1
        add(&mut matches, 0, 1, &[(0, 5)]);
        add(&mut matches, 1, 2, &[(5, 7), (6, 7)]);
        add(&mut matches, 0, 2, &[(3, 8), (4, 9)]);
        add(&mut matches, 1, 2, &[(1, 9)]);

        let (tracks, stats) = TracksBuilder::build(&matches).into_tracks(2);
        assert_eq!(stats.conflicting, 1);
        for track in tracks.values() {
            assert!(!track.features.contains_key(&0) || track.features[&0] != 0);
        }
        assert_eq!(tracks.len(), 2);
    }

    #[test]
    fn test_tracks_independent_of_insertion_order() {
        let mut forward = PairwiseMatches::new();
        add(&mut forward, 0, 1, &[(1, 2), (3, 4)]);
        add(&mut forward, 1, 2, &[(2, 5), (4, 6)]);

        let mut backward = PairwiseMatches::new();
        add(&mut backward, 2, 1, &[(6, 4), (5, 2)]);
        add(&mut backward, 1, 0, &[(4, 3), (2, 1)]);

        let (a, _) = TracksBuilder::build(&forward).into_tracks(2);
        let (b, _) = TracksBuilder::build(&backward).into_tracks(2);
        assert_eq!(a, b);
    }
}
