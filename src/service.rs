//! # Recommender
//!
//! The caller-facing surface. A [`Recommender`] owns everything a request
//! needs (config, store, oracle runner, preference model, index builder) and
//! exposes the feedback, recommendation and maintenance operations.
//!
//! Feedback for one subject is serialized by a per-subject async mutex held
//! across the whole read-modify-write of the preference, so concurrent likes
//! from the same subject are never lost. Different subjects never contend.
//! The oracle call a like may need happens *before* the lock is taken; a
//! cancelled or timed-out extraction therefore leaves the subject untouched.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::RecommenderConfig;
use crate::engine::{RecommendationEngine, Recommendations};
use crate::error::{RecommendError, Result};
use crate::index_builder::{BuildStats, IndexBuilder, IndexStatus};
use crate::maintenance::{self, MaintenanceStats};
use crate::oracle::{EmbeddingOracle, OracleRunner};
use crate::preference::{PreferenceModel, PreferenceState};
use crate::store::{Item, ItemFilter, ItemId, ItemMetadata, NewItem, Store, Subject, SubjectId, Tag};
use crate::vector::UnitVector;

/// Why a feedback event left the preference unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The oracle found no feature in the liked item.
    NoFeature,
    /// A pass arrived before any like.
    ColdStart,
    /// The pass would have cancelled the preference out.
    Degenerate,
    /// The passed item has no embedding yet.
    NotEmbedded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackOutcome {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub sample_count: u32,
}

impl FeedbackOutcome {
    fn applied(sample_count: u32) -> Self {
        Self {
            applied: true,
            reason: None,
            sample_count,
        }
    }

    fn skipped(reason: SkipReason, sample_count: u32) -> Self {
        Self {
            applied: false,
            reason: Some(reason),
            sample_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub id: ItemId,
    /// Whether the oracle found a feature.
    pub embedded: bool,
    pub attribute: Option<Tag>,
}

pub struct Recommender<S: Store> {
    config: RecommenderConfig,
    store: Arc<S>,
    runner: OracleRunner,
    model: PreferenceModel,
    engine: RecommendationEngine,
    index: IndexBuilder,
    locks: DashMap<SubjectId, Arc<Mutex<()>>>,
}

impl<S: Store> Recommender<S> {
    /// # Errors
    /// `InvalidConfig` when `config` fails validation.
    pub fn new(
        config: RecommenderConfig,
        store: Arc<S>,
        oracle: Arc<dyn EmbeddingOracle>,
    ) -> Result<Self> {
        config.validate()?;
        let model = PreferenceModel::new(
            config.decay_schedule(),
            config.negative_feedback_weight,
            config.super_like_weight_multiplier,
        );
        Ok(Self {
            runner: OracleRunner::from_config(oracle, &config),
            engine: RecommendationEngine::new(config.dimension),
            index: IndexBuilder::new(config.dimension),
            locks: DashMap::new(),
            model,
            store,
            config,
        })
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn subject_lock(&self, id: &SubjectId) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(id.clone()).or_default())
    }

    /// Drop a subject's lock entry once no other task holds or waits on it.
    fn release_lock(&self, id: &SubjectId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(id, |_, m| Arc::strong_count(m) == 1);
    }

    fn require_subject(&self, id: &SubjectId) -> Result<Subject> {
        self.store
            .get_subject(id)?
            .ok_or_else(|| RecommendError::SubjectNotFound(id.clone()))
    }

    fn require_item(&self, id: &ItemId) -> Result<Item> {
        self.store
            .get_item(id)?
            .ok_or_else(|| RecommendError::ItemNotFound(id.clone()))
    }

    pub fn register_subject(&self, id: &SubjectId) -> Result<()> {
        self.store.register_subject(id)?;
        info!("Registered subject {}", id);
        Ok(())
    }

    /// Filter-then-rank recommendations over every embedded item.
    ///
    /// `k` defaults to `k_default`.
    #[instrument(skip(self))]
    pub fn recommend(
        &self,
        subject_id: &SubjectId,
        attribute_filter: Option<&Tag>,
        k: Option<usize>,
    ) -> Result<Recommendations> {
        let subject = self.require_subject(subject_id)?;
        let items = self
            .store
            .list_items(&ItemFilter::embedded().with_attribute(attribute_filter.cloned()))?;
        self.engine.get_recommendations(
            &subject,
            items,
            attribute_filter,
            k.unwrap_or(self.config.k_default),
        )
    }

    /// Recommendations from the published global index, oversampled by
    /// `oversample_factor` and post-filtered. May return fewer than `k`.
    ///
    /// Before the first rebuild there is no snapshot and this falls back to
    /// [`recommend`](Self::recommend).
    #[instrument(skip(self))]
    pub fn recommend_from_snapshot(
        &self,
        subject_id: &SubjectId,
        attribute_filter: Option<&Tag>,
        k: Option<usize>,
    ) -> Result<Recommendations> {
        let Some(snapshot) = self.index.snapshot() else {
            info!("No published index yet; ranking request-scoped candidates");
            return self.recommend(subject_id, attribute_filter, k);
        };
        let subject = self.require_subject(subject_id)?;
        self.engine.recommend_from_index(
            &subject,
            &snapshot.index,
            attribute_filter,
            k.unwrap_or(self.config.k_default),
            self.config.oversample_factor,
            |id| self.store.get_item(id),
        )
    }

    pub async fn record_like(&self, subject_id: &SubjectId, item_id: &ItemId) -> Result<FeedbackOutcome> {
        self.record_positive(subject_id, item_id, 1.0).await
    }

    pub async fn record_super_like(
        &self,
        subject_id: &SubjectId,
        item_id: &ItemId,
    ) -> Result<FeedbackOutcome> {
        self.record_positive(subject_id, item_id, self.model.super_like_weight_multiplier())
            .await
    }

    #[instrument(skip(self))]
    async fn record_positive(
        &self,
        subject_id: &SubjectId,
        item_id: &ItemId,
        weight_multiplier: f32,
    ) -> Result<FeedbackOutcome> {
        let subject = self.require_subject(subject_id)?;
        let item = self.require_item(item_id)?;

        let vector = match item.embedding {
            Some(embedding) => UnitVector::from_unit(embedding, self.config.dimension)?,
            None => {
                let payload = self
                    .store
                    .item_payload(item_id)?
                    .ok_or_else(|| RecommendError::ItemNotFound(item_id.clone()))?;
                let Some(features) = self.runner.extract(payload).await else {
                    warn!("No feature detected in liked item {}; nothing recorded", item_id);
                    return Ok(FeedbackOutcome::skipped(
                        SkipReason::NoFeature,
                        subject.sample_count,
                    ));
                };
                let attribute = item.attribute.as_ref().unwrap_or(&features.attribute);
                self.store
                    .set_item_embedding(item_id, features.vector.as_slice(), Some(attribute))?;
                features.vector
            }
        };

        let lock = self.subject_lock(subject_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_positive(subject_id, item_id, &vector, weight_multiplier)
        };
        self.release_lock(subject_id, lock);
        outcome
    }

    fn apply_positive(
        &self,
        subject_id: &SubjectId,
        item_id: &ItemId,
        vector: &UnitVector,
        weight_multiplier: f32,
    ) -> Result<FeedbackOutcome> {
        let subject = self.require_subject(subject_id)?;
        let state = PreferenceState::new(subject.preference, subject.sample_count);
        let next = self.model.update_like(&state, vector, weight_multiplier)?;

        self.store
            .upsert_subject_preference(subject_id, next.preference.as_ref(), next.sample_count)?;
        self.store.add_liked(subject_id, item_id)?;

        info!(
            "Subject {} liked {} (x{}); {} samples",
            subject_id, item_id, weight_multiplier, next.sample_count
        );
        Ok(FeedbackOutcome::applied(next.sample_count))
    }

    /// Record a pass and, when the item is already embedded, push the
    /// preference away from it. Never calls the oracle.
    #[instrument(skip(self))]
    pub async fn record_pass(&self, subject_id: &SubjectId, item_id: &ItemId) -> Result<FeedbackOutcome> {
        self.require_subject(subject_id)?;
        let item = self.require_item(item_id)?;
        let vector = item
            .embedding
            .map(|embedding| UnitVector::from_unit(embedding, self.config.dimension))
            .transpose()?;

        let lock = self.subject_lock(subject_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_pass(subject_id, item_id, vector.as_ref())
        };
        self.release_lock(subject_id, lock);
        outcome
    }

    fn apply_pass(
        &self,
        subject_id: &SubjectId,
        item_id: &ItemId,
        vector: Option<&UnitVector>,
    ) -> Result<FeedbackOutcome> {
        self.store.add_disliked(subject_id, item_id)?;
        let subject = self.require_subject(subject_id)?;

        let Some(vector) = vector else {
            return Ok(FeedbackOutcome::skipped(
                SkipReason::NotEmbedded,
                subject.sample_count,
            ));
        };
        if subject.preference.is_none() {
            return Ok(FeedbackOutcome::skipped(SkipReason::ColdStart, 0));
        }

        let state = PreferenceState::new(subject.preference, subject.sample_count);
        let (next, applied) = self.model.update_dislike(&state, vector)?;
        if !applied {
            return Ok(FeedbackOutcome::skipped(
                SkipReason::Degenerate,
                next.sample_count,
            ));
        }

        self.store
            .upsert_subject_preference(subject_id, next.preference.as_ref(), next.sample_count)?;
        info!("Subject {} passed on {}", subject_id, item_id);
        Ok(FeedbackOutcome::applied(next.sample_count))
    }

    pub async fn clear_preferences(&self, subject_id: &SubjectId) -> Result<()> {
        let lock = self.subject_lock(subject_id);
        let cleared = {
            let _guard = lock.lock().await;
            self.store.clear_preferences(subject_id)
        };
        self.release_lock(subject_id, lock);
        cleared?;
        info!("Cleared preferences of subject {}", subject_id);
        Ok(())
    }

    pub fn preference_state(&self, subject_id: &SubjectId) -> Result<PreferenceState> {
        let subject = self.require_subject(subject_id)?;
        Ok(PreferenceState::new(subject.preference, subject.sample_count))
    }

    /// Store a new item, embedding it through the oracle when possible.
    ///
    /// An item without a detectable feature is still stored, without an
    /// embedding. `attribute_override` wins over the detected attribute.
    pub async fn ingest_item(
        &self,
        payload: Vec<u8>,
        attribute_override: Option<Tag>,
        metadata: ItemMetadata,
    ) -> Result<IngestOutcome> {
        let features = self.runner.extract(payload.clone()).await;
        let embedded = features.is_some();
        let (embedding, detected) = match features {
            Some(f) => (Some(f.vector.into_inner()), Some(f.attribute)),
            None => (None, None),
        };
        let attribute = attribute_override.or(detected);

        let id = self.store.insert_item(NewItem {
            payload,
            embedding,
            attribute: attribute.clone(),
            metadata,
        })?;
        if embedded {
            info!("Ingested item {} with embedding", id);
        } else {
            warn!("Ingested item {} without embedding: no feature detected", id);
        }
        Ok(IngestOutcome {
            id,
            embedded,
            attribute,
        })
    }

    pub async fn rebuild_index(&self) -> Result<BuildStats> {
        self.index.rebuild(self.store.as_ref(), &self.runner).await
    }

    pub fn index_status(&self) -> IndexStatus {
        self.index.status()
    }

    pub async fn process_embeddings(&self, force: bool) -> Result<MaintenanceStats> {
        maintenance::process_embeddings(
            self.store.as_ref(),
            &self.runner,
            self.config.dimension,
            force,
        )
        .await
    }
}
