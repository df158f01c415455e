//! # Maintenance
//!
//! The write-side companion to the read-only recommendation path: it backfills
//! missing embeddings through the oracle and deletes items that can never be
//! indexed. It is run explicitly (`sr process`, or as the first step of an
//! index rebuild) and never from inside a recommendation request.
//!
//! Each item is handled independently. A failure on one item is counted and
//! logged, and the run carries on; the caller always gets a complete
//! [`MaintenanceStats`].

use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::oracle::OracleRunner;
use crate::store::{Item, ItemFilter, ItemId, Store};
use crate::vector::validate_embedding;

/// Outcome of running one item through the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmbedOutcome {
    Embedded,
    NoFeatureDeleted,
    Failed,
}

/// Aggregate result of [`process_embeddings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    /// Items in the store before the run.
    pub total_items: usize,
    /// Items that received an embedding.
    pub processed: usize,
    /// Items deleted because the oracle found no feature.
    pub no_feature_deleted: usize,
    /// Items deleted because their stored embedding can never be indexed.
    pub invalid_deleted: usize,
    /// Items whose processing failed; they are left untouched.
    pub failed: usize,
    /// Items with an embedding after the run.
    pub with_embeddings: usize,
    /// Items in the store after the run.
    pub remaining: usize,
}

/// Run a single item through the oracle and write the result back.
///
/// An item with no detectable feature is deleted.
pub(crate) async fn embed_item<S>(store: &S, runner: &OracleRunner, id: &ItemId) -> EmbedOutcome
where
    S: Store + ?Sized,
{
    let payload = match store.item_payload(id) {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            warn!("Item {} disappeared before it could be embedded", id);
            return EmbedOutcome::Failed;
        }
        Err(err) => {
            warn!("Could not read payload of item {}: {}", id, err);
            return EmbedOutcome::Failed;
        }
    };

    match runner.extract(payload).await {
        Some(features) => {
            match store.set_item_embedding(id, features.vector.as_slice(), Some(&features.attribute))
            {
                Ok(()) => {
                    info!("Added embedding and attribute for item {}", id);
                    EmbedOutcome::Embedded
                }
                Err(err) => {
                    warn!("Could not store embedding for item {}: {}", id, err);
                    EmbedOutcome::Failed
                }
            }
        }
        None => match store.delete_item(id) {
            Ok(_) => {
                warn!("No feature detected in item {}; deleted", id);
                EmbedOutcome::NoFeatureDeleted
            }
            Err(err) => {
                warn!("Could not delete featureless item {}: {}", id, err);
                EmbedOutcome::Failed
            }
        },
    }
}

/// Embed every listed item, at most `runner.workers()` at a time.
pub(crate) async fn embed_items<S>(
    store: &S,
    runner: &OracleRunner,
    items: Vec<Item>,
) -> Vec<EmbedOutcome>
where
    S: Store + ?Sized,
{
    futures::stream::iter(items)
        .map(|item| async move { embed_item(store, runner, &item.id).await })
        .buffer_unordered(runner.workers())
        .collect()
        .await
}

/// Backfill embeddings and compact the item store.
///
/// Items lacking an embedding or attribute (every item when `force` is set)
/// are run through the oracle. Afterwards every stored embedding that does not
/// have exactly `dimension` finite components and unit norm is deleted.
///
/// # Errors
/// Only listing/counting failures abort the run; per-item failures are counted.
pub async fn process_embeddings<S>(
    store: &S,
    runner: &OracleRunner,
    dimension: usize,
    force: bool,
) -> Result<MaintenanceStats>
where
    S: Store + ?Sized,
{
    let total_items = store.count_items()?;
    let targets = if force {
        store.list_items(&ItemFilter::all())?
    } else {
        store.list_items(&ItemFilter::needs_processing())?
    };
    info!(
        "Processing {} of {} items for embeddings (force={})",
        targets.len(),
        total_items,
        force
    );

    let mut stats = MaintenanceStats {
        total_items,
        ..MaintenanceStats::default()
    };
    for outcome in embed_items(store, runner, targets).await {
        match outcome {
            EmbedOutcome::Embedded => stats.processed += 1,
            EmbedOutcome::NoFeatureDeleted => stats.no_feature_deleted += 1,
            EmbedOutcome::Failed => stats.failed += 1,
        }
    }

    for item in store.list_items(&ItemFilter::embedded())? {
        let Some(embedding) = &item.embedding else {
            continue;
        };
        if validate_embedding(embedding, dimension).is_ok() {
            continue;
        }
        match store.delete_item(&item.id) {
            Ok(_) => {
                warn!(
                    "Deleted item {} with unusable embedding ({} components)",
                    item.id,
                    embedding.len()
                );
                stats.invalid_deleted += 1;
            }
            Err(err) => {
                warn!("Could not delete invalid item {}: {}", item.id, err);
                stats.failed += 1;
            }
        }
    }

    stats.with_embeddings = store.list_items(&ItemFilter::embedded())?.len();
    stats.remaining = store.count_items()?;
    info!("Maintenance finished: {:?}", stats);
    Ok(stats)
}
