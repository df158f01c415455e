//! # VectorIndex
//!
//! Exact inner-product nearest-neighbour search over a fixed-dimension corpus.
//!
//! Vectors are stored row-major in one flat `Vec<f32>` next to a parallel
//! `Vec<ItemId>`; a query scores every row (`O(n × D)`) and keeps the top `k`.
//! At the expected corpus scale (tens of thousands of vectors) this is fast
//! enough and, unlike HNSW-style indexes, returns exact results.
//!
//! Callers that only need ranking go through the [`SimilarityIndex`] trait so an
//! approximate structure can be dropped in later without touching them.
//!
//! ## Ordering
//! Results are sorted by descending score. Equal scores keep the order in which
//! entries were passed to [`VectorIndex::build`], so identical inputs always
//! produce identical rankings.
//!
//! ## Quick Example
//! ```
//! use swipe_rank::store::ItemId;
//! use swipe_rank::vector_index::{SimilarityIndex, VectorIndex};
//!
//! let (index, rejected) = VectorIndex::build(
//!     2,
//!     vec![
//!         (ItemId::from("x"), vec![1.0, 0.0]),
//!         (ItemId::from("y"), vec![0.0, 1.0]),
//!         (ItemId::from("bad"), vec![1.0, 0.0, 0.0]),
//!     ],
//! );
//! assert_eq!(rejected, vec![ItemId::from("bad")]);
//!
//! let hits = index.search(&[0.9, 0.1], 1).unwrap();
//! assert_eq!(hits[0].id, ItemId::from("x"));
//! ```

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RecommendError, Result};
use crate::store::ItemId;
use crate::vector::{componentwise_mean, dot, validate_embedding, validate_vector};

/// Row count above which scoring is spread over the rayon pool.
const PARALLEL_SCORING_THRESHOLD: usize = 4096;

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: ItemId,
    pub score: f32,
}

/// The search surface shared by every index implementation.
pub trait SimilarityIndex: Send + Sync {
    /// Dimensionality every indexed vector (and every query) must have.
    fn dimension(&self) -> usize;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `min(k, len)` hits by descending inner product.
    ///
    /// Searching an empty index returns an empty list, never an error.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Component-wise mean of every indexed vector; `None` when empty.
    ///
    /// Used as the neutral query for subjects without a preference.
    fn centroid(&self) -> Option<Vec<f32>>;
}

/// Brute-force exact index. Immutable once built.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<ItemId>,
    data: Vec<f32>,
}

impl VectorIndex {
    /// An index with no entries.
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Build an index from `(id, vector)` pairs.
    ///
    /// Vectors whose length differs from `dimension`, that contain non-finite
    /// values, or whose norm is not 1 are not indexed, since inner product
    /// only ranks by cosine similarity over unit vectors; their ids are returned as
    /// the second element in input order.
    pub fn build<I>(dimension: usize, entries: I) -> (Self, Vec<ItemId>)
    where
        I: IntoIterator<Item = (ItemId, Vec<f32>)>,
    {
        let entries = entries.into_iter();
        let (lower, _) = entries.size_hint();
        let mut ids = Vec::with_capacity(lower);
        let mut data = Vec::with_capacity(lower * dimension);
        let mut rejected = Vec::new();

        for (id, vector) in entries {
            match validate_embedding(&vector, dimension) {
                Ok(()) => {
                    ids.push(id);
                    data.extend_from_slice(&vector);
                }
                Err(err) => {
                    warn!("Rejecting vector for item {}: {}", id, err);
                    rejected.push(id);
                }
            }
        }

        debug!(
            "Built exact index: {} vectors, {} rejected, dimension {}",
            ids.len(),
            rejected.len(),
            dimension
        );

        (
            Self {
                dimension,
                ids,
                data,
            },
            rejected,
        )
    }

    /// Ids in enumeration order.
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids.contains(id)
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    fn scores(&self, query: &[f32]) -> Vec<f32> {
        if self.ids.len() >= PARALLEL_SCORING_THRESHOLD {
            self.data
                .par_chunks_exact(self.dimension)
                .map(|row| dot(row, query))
                .collect()
        } else {
            (0..self.ids.len()).map(|i| dot(self.row(i), query)).collect()
        }
    }
}

impl SimilarityIndex for VectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn centroid(&self) -> Option<Vec<f32>> {
        componentwise_mean((0..self.ids.len()).map(|i| self.row(i)))
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        validate_vector(query, self.dimension).map_err(|err| match err {
            RecommendError::InvalidVector { reason } => RecommendError::InvalidVector {
                reason: format!("query: {reason}"),
            },
            other => other,
        })?;

        let scores = self.scores(query);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        let by_rank = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b));

        let n = k.min(order.len());
        if n < order.len() {
            order.select_nth_unstable_by(n - 1, by_rank);
            order.truncate(n);
        }
        order.sort_unstable_by(by_rank);

        Ok(order
            .into_iter()
            .map(|i| SearchHit {
                id: self.ids[i].clone(),
                score: scores[i],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> VectorIndex {
        let (index, rejected) = VectorIndex::build(
            2,
            vec![
                (ItemId::from("X"), vec![1.0, 0.0]),
                (ItemId::from("Y"), vec![0.0, 1.0]),
                (ItemId::from("Z"), vec![0.707, 0.707]),
            ],
        );
        assert!(rejected.is_empty());
        index
    }

    #[test]
    fn cold_start_mean_query_ranks_center_first_then_ties_by_enumeration() {
        let index = toy();
        let hits = index.search(&[0.569, 0.569], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, ItemId::from("Z"));
        assert_eq!(hits[1].id, ItemId::from("X"));

        let all = index.search(&[0.569, 0.569], 3).unwrap();
        let ids: Vec<_> = all.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["Z", "X", "Y"]);
    }

    #[test]
    fn search_returns_at_most_min_k_n_sorted_descending() {
        let index = toy();
        for k in 0..6 {
            let hits = index.search(&[0.2, 0.98], k).unwrap();
            assert_eq!(hits.len(), k.min(3));
            for pair in hits.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
            for hit in &hits {
                assert!(index.contains(&hit.id));
            }
        }
    }

    #[test]
    fn empty_index_returns_empty_not_error() {
        let index = VectorIndex::empty(512);
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn wrong_dimension_entries_are_rejected() {
        let (index, rejected) = VectorIndex::build(
            3,
            vec![
                (ItemId::from("a"), vec![1.0, 0.0, 0.0]),
                (ItemId::from("b"), vec![1.0, 0.0]),
                (ItemId::from("c"), vec![f32::NAN, 0.0, 0.0]),
                (ItemId::from("d"), vec![0.0, 0.0, 1.0]),
            ],
        );
        assert_eq!(rejected, vec![ItemId::from("b"), ItemId::from("c")]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.ids(), &[ItemId::from("a"), ItemId::from("d")]);
    }

    #[test]
    fn centroid_is_mean_of_rows() {
        let c = toy().centroid().unwrap();
        assert!((c[0] - 0.569).abs() < 1e-3);
        assert!((c[1] - 0.569).abs() < 1e-3);
        assert!(VectorIndex::empty(2).centroid().is_none());
    }

    #[test]
    fn non_unit_entries_are_rejected_and_cannot_outrank() {
        let (index, rejected) = VectorIndex::build(
            2,
            vec![
                (ItemId::from("X"), vec![1.0, 0.0]),
                (ItemId::from("BIG"), vec![3.0, 4.0]),
                (ItemId::from("tiny"), vec![0.1, 0.0]),
            ],
        );
        assert_eq!(rejected, vec![ItemId::from("BIG"), ItemId::from("tiny")]);
        let hits = index.search(&[0.6, 0.8], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ItemId::from("X"));
    }

    #[test]
    fn query_with_wrong_dimension_is_invalid_vector() {
        let err = toy().search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err.category(), "invalid_vector");
    }

    #[test]
    fn parallel_scoring_matches_sequential_order() {
        let n = PARALLEL_SCORING_THRESHOLD + 10;
        let entries = (0..n).map(|i| {
            let angle = i as f32 / n as f32;
            (ItemId::from(format!("i{i}")), vec![angle.cos(), angle.sin()])
        });
        let (index, _) = VectorIndex::build(2, entries);
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["i0", "i1", "i2"]);
    }
}
