use std::collections::{BTreeMap, BTreeSet};

use crate::matching::PairwiseMatches;
use crate::scene::ViewId;

/// An unordered pair of distinct views, stored with the smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pair {
    first: ViewId,
    second: ViewId,
}

impl Pair {
    /// Create a pair from two view ids in any order. Returns `None` for a self pair.
    pub fn new(a: ViewId, b: ViewId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self {
                first: a,
                second: b,
            }),
            std::cmp::Ordering::Greater => Some(Self {
                first: b,
                second: a,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The smaller view id.
    #[inline]
    pub fn first(&self) -> ViewId {
        self.first
    }

    /// The larger view id.
    #[inline]
    pub fn second(&self) -> ViewId {
        self.second
    }

    /// Whether the pair contains a view.
    #[inline]
    pub fn contains(&self, view_id: ViewId) -> bool {
        self.first == view_id || self.second == view_id
    }
}

/// A set of pairs iterated in lexicographic order.
pub type PairSet = BTreeSet<Pair>;

/// The distinct pairs present in a set of pairwise matches.
pub fn pairs_from_matches(matches: &PairwiseMatches) -> PairSet {
    matches.keys().copied().collect()
}

/// Keep only the pairs whose two views are in the given set.
pub fn filter_pairs(pairs: &PairSet, valid_views: &BTreeSet<ViewId>) -> PairSet {
    pairs
        .iter()
        .filter(|p| valid_views.contains(&p.first) && valid_views.contains(&p.second))
        .copied()
        .collect()
}

/// List the view triplets `a < b < c` whose three pairs are all in the pair set.
pub fn view_triplets(pairs: &PairSet) -> Vec<[ViewId; 3]> {
    let mut adjacency: BTreeMap<ViewId, BTreeSet<ViewId>> = BTreeMap::new();
    for pair in pairs {
        adjacency.entry(pair.first).or_default().insert(pair.second);
    }

    let mut triplets = Vec::new();
    for (&a, neighbors_a) in &adjacency {
        for &b in neighbors_a {
            let Some(neighbors_b) = adjacency.get(&b) else {
                continue;
            };
            for &c in neighbors_b {
                if neighbors_a.contains(&c) {
                    triplets.push([a, b, c]);
                }
            }
        }
    }
    triplets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_set(pairs: &[(ViewId, ViewId)]) -> PairSet {
        pairs.iter().filter_map(|&(a, b)| Pair::new(a, b)).collect()
    }

    #[test]
    fn test_pair_is_unordered() {
        assert_eq!(Pair::new(3, 1), Pair::new(1, 3));
        assert_eq!(Pair::new(2, 2), None);
        let pairs = pair_set(&[(1, 0), (0, 1), (2, 2), (2, 0)]);
        assert_eq!(pairs.len(), 2);
        for p in &pairs {
            assert!(p.first() < p.second());
        }
    }

    #[test]
    fn test_filter_pairs() {
        let pairs = pair_set(&[(0, 1), (0, 2), (1, 2), (1, 3)]);
        let valid = BTreeSet::from([0, 1, 3]);
        let filtered = filter_pairs(&pairs, &valid);
        assert_eq!(filtered, pair_set(&[(0, 1), (1, 3)]));
        assert!(filtered.iter().all(|p| !p.contains(2)));
    }

    #[test]
    fn test_view_triplets() {
        let pairs = pair_set(&[(0, 1), (1, 2), (0, 2), (2, 3), (1, 3), (3, 4)]);
        assert_eq!(view_triplets(&pairs), vec![[0, 1, 2], [1, 2, 3]]);
    }
}
