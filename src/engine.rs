//! # Recommendation engine
//!
//! Turns a subject plus a pool of items into a ranked list.
//!
//! The default path filters first and ranks second: the subject's rated items
//! and items failing the attribute filter are removed, a request-scoped exact
//! index is built over exactly what remains, and that index is searched. A
//! large exclusion set therefore can neither under-fill the result nor bias
//! the top-k.
//!
//! [`RecommendationEngine::recommend_from_index`] is the alternative for large
//! corpora: search a widened window of the published global index and
//! post-filter. If fewer than `k` hits survive, the short list is returned as
//! is; widening further is the caller's decision.
//!
//! Which query is used:
//!
//! | subject state         | query                               | type                 |
//! |-----------------------|-------------------------------------|----------------------|
//! | no candidates         | n/a                                 | `no_available_candidates` |
//! | no preference yet     | mean of the candidate embeddings    | `cold_start_neutral` |
//! | learned preference    | the preference vector               | `personalized`       |
//!
//! This module never writes to the store.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{Item, ItemId, ItemMetadata, Subject, Tag};
use crate::vector::{componentwise_mean, validate_embedding};
use crate::vector_index::{SearchHit, SimilarityIndex, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Personalized,
    ColdStartNeutral,
    NoAvailableCandidates,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Personalized => "personalized",
            RecommendationType::ColdStartNeutral => "cold_start_neutral",
            RecommendationType::NoAvailableCandidates => "no_available_candidates",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub id: ItemId,
    pub score: f32,
    /// 1-based.
    pub rank: usize,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendations {
    pub items: Vec<RankedItem>,
    pub recommendation_type: RecommendationType,
    /// The subject's like count when personalized, otherwise 0.
    pub based_on_samples: u32,
}

impl Recommendations {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            recommendation_type: RecommendationType::NoAvailableCandidates,
            based_on_samples: 0,
        }
    }

    /// Empty result for `k == 0`, typed by the query the subject would get.
    fn nothing_requested(subject: &Subject) -> Self {
        let (recommendation_type, based_on_samples) = match subject.preference {
            Some(_) => (RecommendationType::Personalized, subject.sample_count),
            None => (RecommendationType::ColdStartNeutral, 0),
        };
        Self {
            items: Vec::new(),
            recommendation_type,
            based_on_samples,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine {
    dimension: usize,
}

impl RecommendationEngine {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Rank `items` for `subject`, filter-then-rank.
    ///
    /// Items without an embedding, already rated by the subject, failing the
    /// attribute filter, or carrying an embedding that is not a unit vector of
    /// the configured dimension are not candidates.
    ///
    /// `k == 0` asks for nothing: the result is empty and typed by the
    /// subject's state alone, the same as on the snapshot path.
    pub fn get_recommendations(
        &self,
        subject: &Subject,
        items: Vec<Item>,
        attribute_filter: Option<&Tag>,
        k: usize,
    ) -> Result<Recommendations> {
        if k == 0 {
            return Ok(Recommendations::nothing_requested(subject));
        }

        let excluded = subject.excluded();
        let mut entries: Vec<(ItemId, Vec<f32>)> = Vec::new();
        let mut metadata: HashMap<ItemId, ItemMetadata> = HashMap::new();
        for item in items {
            if excluded.contains(&item.id) {
                continue;
            }
            if attribute_filter.is_some() && item.attribute.as_ref() != attribute_filter {
                continue;
            }
            let Some(embedding) = item.embedding else {
                continue;
            };
            if let Err(err) = validate_embedding(&embedding, self.dimension) {
                debug!("Skipping item {} as a candidate: {}", item.id, err);
                continue;
            }
            metadata.insert(item.id.clone(), item.metadata);
            entries.push((item.id, embedding));
        }

        if entries.is_empty() {
            info!("Subject {}: no available candidates", subject.id);
            return Ok(Recommendations::empty());
        }
        let n = entries.len();
        info!(
            "Subject {}: {} candidates after excluding {} rated items",
            subject.id,
            n,
            excluded.len()
        );

        let (query, recommendation_type, based_on_samples) = match &subject.preference {
            Some(preference) => (
                preference.as_slice().to_vec(),
                RecommendationType::Personalized,
                subject.sample_count,
            ),
            None => {
                let mean = componentwise_mean(entries.iter().map(|(_, e)| e.as_slice()))
                    .unwrap_or_default();
                (mean, RecommendationType::ColdStartNeutral, 0)
            }
        };

        let (index, _) = VectorIndex::build(self.dimension, entries);
        let hits = index.search(&query, k.min(n))?;

        Ok(Recommendations {
            items: rank(hits, |id| metadata.remove(id).unwrap_or_default()),
            recommendation_type,
            based_on_samples,
        })
    }

    /// Rank from a published global index: search `k × oversample_factor`,
    /// drop rated or filtered-out hits, truncate to `k`.
    ///
    /// `lookup` resolves a hit to its current item; hits that no longer
    /// resolve are dropped. The result may hold fewer than `k` items.
    pub fn recommend_from_index<F>(
        &self,
        subject: &Subject,
        index: &dyn SimilarityIndex,
        attribute_filter: Option<&Tag>,
        k: usize,
        oversample_factor: usize,
        mut lookup: F,
    ) -> Result<Recommendations>
    where
        F: FnMut(&ItemId) -> Result<Option<Item>>,
    {
        if k == 0 {
            return Ok(Recommendations::nothing_requested(subject));
        }

        let (query, recommendation_type, based_on_samples) = match &subject.preference {
            Some(preference) => (
                preference.as_slice().to_vec(),
                RecommendationType::Personalized,
                subject.sample_count,
            ),
            None => match index.centroid() {
                Some(center) => (center, RecommendationType::ColdStartNeutral, 0),
                None => return Ok(Recommendations::empty()),
            },
        };

        let window = k.saturating_mul(oversample_factor.max(1));
        let excluded: HashSet<&ItemId> = subject.excluded();

        let mut kept = Vec::with_capacity(k);
        for hit in index.search(&query, window)? {
            if kept.len() == k {
                break;
            }
            if excluded.contains(&hit.id) {
                continue;
            }
            let Some(item) = lookup(&hit.id)? else {
                continue;
            };
            if attribute_filter.is_some() && item.attribute.as_ref() != attribute_filter {
                continue;
            }
            kept.push((hit, item.metadata));
        }

        if kept.is_empty() {
            return Ok(Recommendations::empty());
        }
        if kept.len() < k {
            debug!(
                "Subject {}: only {} of {} requested survived the window of {}",
                subject.id,
                kept.len(),
                k,
                window
            );
        }

        Ok(Recommendations {
            items: kept
                .into_iter()
                .enumerate()
                .map(|(i, (hit, metadata))| RankedItem {
                    id: hit.id,
                    score: hit.score,
                    rank: i + 1,
                    metadata,
                })
                .collect(),
            recommendation_type,
            based_on_samples,
        })
    }
}

fn rank(
    hits: Vec<SearchHit>,
    mut metadata_of: impl FnMut(&ItemId) -> ItemMetadata,
) -> Vec<RankedItem> {
    hits.into_iter()
        .enumerate()
        .map(|(i, hit)| RankedItem {
            metadata: metadata_of(&hit.id),
            id: hit.id,
            score: hit.score,
            rank: i + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SubjectId;
    use crate::vector::UnitVector;

    fn item(id: &str, v: &[f32], tag: &str) -> Item {
        Item {
            id: ItemId::from(id),
            embedding: Some(v.to_vec()),
            attribute: Some(Tag::from(tag)),
            metadata: ItemMetadata {
                filename: Some(format!("{id}.jpg")),
                content_type: Some("image/jpeg".into()),
            },
        }
    }

    fn toy() -> Vec<Item> {
        vec![
            item("X", &[1.0, 0.0], "M"),
            item("Y", &[0.0, 1.0], "F"),
            item("Z", &[0.707, 0.707], "F"),
        ]
    }

    fn cold() -> Subject {
        Subject::new(SubjectId::from("ann"))
    }

    fn ids(recs: &Recommendations) -> Vec<&str> {
        recs.items.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn cold_start_uses_candidate_mean() {
        let engine = RecommendationEngine::new(2);
        let recs = engine.get_recommendations(&cold(), toy(), None, 2).unwrap();

        assert_eq!(recs.recommendation_type, RecommendationType::ColdStartNeutral);
        assert_eq!(ids(&recs), vec!["Z", "X"]);
        assert_eq!(recs.items[0].rank, 1);
        assert_eq!(recs.items[1].rank, 2);
        assert_eq!(recs.based_on_samples, 0);
        // mean = (0.569, 0.569); Z scores 2 * 0.569 * 0.707
        assert!((recs.items[0].score - 0.8046).abs() < 1e-3);
        assert_eq!(recs.items[0].metadata.filename.as_deref(), Some("Z.jpg"));
    }

    #[test]
    fn personalized_uses_preference() {
        let mut subject = cold();
        subject.preference = Some(UnitVector::normalize(vec![0.1, 1.0]).unwrap());
        subject.sample_count = 4;

        let recs = RecommendationEngine::new(2)
            .get_recommendations(&subject, toy(), None, 10)
            .unwrap();
        assert_eq!(recs.recommendation_type, RecommendationType::Personalized);
        assert_eq!(recs.based_on_samples, 4);
        assert_eq!(ids(&recs), vec!["Y", "Z", "X"]);
    }

    #[test]
    fn rated_items_are_never_returned() {
        let mut subject = cold();
        subject.liked.insert(ItemId::from("Z"));
        subject.disliked.insert(ItemId::from("Y"));

        let recs = RecommendationEngine::new(2)
            .get_recommendations(&subject, toy(), None, 10)
            .unwrap();
        assert_eq!(ids(&recs), vec!["X"]);
    }

    #[test]
    fn exclusions_never_leak_for_any_subset() {
        let corpus: Vec<Item> = (0..6)
            .map(|i| {
                let a = i as f32;
                item(&format!("i{i}"), &[a.cos(), a.sin()], "F")
            })
            .collect();
        let engine = RecommendationEngine::new(2);
        for mask in 0u32..64 {
            let mut subject = cold();
            for i in 0..6 {
                if mask & (1 << i) != 0 {
                    let id = ItemId::from(format!("i{i}"));
                    if i % 2 == 0 {
                        subject.liked.insert(id);
                    } else {
                        subject.disliked.insert(id);
                    }
                }
            }
            let recs = engine
                .get_recommendations(&subject, corpus.clone(), None, 6)
                .unwrap();
            let excluded = subject.excluded();
            assert!(recs.items.iter().all(|r| !excluded.contains(&r.id)));
            assert_eq!(recs.items.len(), 6 - mask.count_ones() as usize);
        }
    }

    #[test]
    fn attribute_filter_restricts_candidates() {
        let female = Tag::from("F");
        let recs = RecommendationEngine::new(2)
            .get_recommendations(&cold(), toy(), Some(&female), 10)
            .unwrap();
        assert_eq!(recs.items.len(), 2);
        assert!(recs.items.iter().all(|r| r.id.as_str() != "X"));
    }

    #[test]
    fn no_candidates_is_a_named_outcome() {
        let mut subject = cold();
        for id in ["X", "Y", "Z"] {
            subject.liked.insert(ItemId::from(id));
        }
        let recs = RecommendationEngine::new(2)
            .get_recommendations(&subject, toy(), None, 10)
            .unwrap();
        assert!(recs.items.is_empty());
        assert_eq!(
            recs.recommendation_type,
            RecommendationType::NoAvailableCandidates
        );

        let none = RecommendationEngine::new(2)
            .get_recommendations(&cold(), Vec::new(), None, 10)
            .unwrap();
        assert_eq!(none.recommendation_type.as_str(), "no_available_candidates");
    }

    #[test]
    fn malformed_embeddings_are_not_candidates() {
        let mut items = toy();
        items.push(item("W", &[1.0, 0.0, 0.0], "M"));
        items.push(Item {
            embedding: None,
            ..item("V", &[1.0, 0.0], "M")
        });
        let recs = RecommendationEngine::new(2)
            .get_recommendations(&cold(), items, None, 10)
            .unwrap();
        assert_eq!(recs.items.len(), 3);
    }

    #[test]
    fn non_unit_embeddings_cannot_outrank_closer_items() {
        let items = vec![
            item("X", &[1.0, 0.0], "M"),
            item("BIG", &[3.0, 4.0], "M"),
        ];
        let recs = RecommendationEngine::new(2)
            .get_recommendations(&cold(), items, None, 10)
            .unwrap();
        assert_eq!(ids(&recs), vec!["X"]);
        assert!((recs.items[0].score - 1.0).abs() < 1e-6);
        assert_eq!(recs.items[0].metadata.filename.as_deref(), Some("X.jpg"));
    }

    #[test]
    fn zero_k_is_typed_the_same_on_both_paths() {
        let corpus = vec![item("X", &[1.0, 0.0], "M")];
        let (index, _) = VectorIndex::build(2, vec![(ItemId::from("X"), vec![1.0, 0.0])]);
        let lookup = |id: &ItemId| Ok(corpus.iter().find(|i| &i.id == id).cloned());
        let engine = RecommendationEngine::new(2);

        let mut personalized = cold();
        personalized.preference = Some(UnitVector::normalize(vec![0.0, 1.0]).unwrap());
        personalized.sample_count = 2;

        for subject in [cold(), personalized] {
            let filtered = engine
                .get_recommendations(&subject, corpus.clone(), None, 0)
                .unwrap();
            let snapshot = engine
                .recommend_from_index(&subject, &index, None, 0, 4, lookup)
                .unwrap();
            assert!(filtered.items.is_empty());
            assert_eq!(filtered, snapshot);
            assert_ne!(
                filtered.recommendation_type,
                RecommendationType::NoAvailableCandidates
            );
        }
    }

    #[test]
    fn snapshot_path_post_filters_and_truncates() {
        let corpus = toy();
        let (index, _) = VectorIndex::build(
            2,
            corpus
                .iter()
                .map(|i| (i.id.clone(), i.embedding.clone().unwrap())),
        );
        let lookup = |id: &ItemId| Ok(corpus.iter().find(|i| &i.id == id).cloned());

        let mut subject = cold();
        subject.preference = Some(UnitVector::normalize(vec![1.0, 0.0]).unwrap());
        subject.sample_count = 1;
        subject.liked.insert(ItemId::from("X"));

        let engine = RecommendationEngine::new(2);
        let recs = engine
            .recommend_from_index(&subject, &index, None, 1, 4, lookup)
            .unwrap();
        assert_eq!(ids(&recs), vec!["Z"]);
        assert_eq!(recs.items[0].rank, 1);

        // A window of one only sees the excluded X, so the list comes back short.
        let short = engine
            .recommend_from_index(&subject, &index, None, 1, 1, lookup)
            .unwrap();
        assert!(short.items.is_empty());
        assert_eq!(
            short.recommendation_type,
            RecommendationType::NoAvailableCandidates
        );

        let male = Tag::from("M");
        let filtered = engine
            .recommend_from_index(&cold(), &index, Some(&male), 3, 1, lookup)
            .unwrap();
        assert_eq!(filtered.recommendation_type, RecommendationType::ColdStartNeutral);
        assert_eq!(ids(&filtered), vec!["X"]);
    }
}
