//! # Index builder
//!
//! Rebuilds the global [`VectorIndex`] from the store and publishes it.
//!
//! Publication is a single atomic pointer swap ([`ArcSwapOption`]): a rebuild
//! assembles a complete snapshot off to the side and only then makes it
//! current. A reader that loaded the previous snapshot keeps a reference to it
//! until its query ends, so readers see either the old or the new snapshot in
//! full and never block on a rebuild.
//!
//! Rebuilds themselves are serialized so snapshot versions increase
//! monotonically and the oracle backfill is not run twice in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::maintenance::{EmbedOutcome, embed_items};
use crate::oracle::OracleRunner;
use crate::store::{ItemFilter, ItemId, Store};
use crate::vector_index::{SimilarityIndex, VectorIndex};

/// An immutable, versioned index.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub version: u64,
    pub index: VectorIndex,
}

/// Result of one [`IndexBuilder::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStats {
    pub version: u64,
    /// Vectors in the published snapshot.
    pub indexed: usize,
    /// Items whose stored embedding was malformed; not indexed.
    pub rejected: Vec<ItemId>,
    /// Items that received an embedding from the oracle during the rebuild.
    pub embedded: usize,
    /// Items deleted because the oracle found no feature.
    pub no_feature_deleted: usize,
    /// Items whose oracle backfill failed.
    pub failed: usize,
}

/// What [`IndexBuilder::status`] reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub initialized: bool,
    pub count: usize,
    pub dimension: Option<usize>,
    pub version: Option<u64>,
}

pub struct IndexBuilder {
    dimension: usize,
    current: ArcSwapOption<IndexSnapshot>,
    next_version: AtomicU64,
    rebuilding: Mutex<()>,
}

impl IndexBuilder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            current: ArcSwapOption::empty(),
            next_version: AtomicU64::new(1),
            rebuilding: Mutex::new(()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The currently published snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.load_full()
    }

    /// Build a snapshot from an explicit list of entries and publish it.
    pub fn publish_entries<I>(&self, entries: I) -> (Arc<IndexSnapshot>, Vec<ItemId>)
    where
        I: IntoIterator<Item = (ItemId, Vec<f32>)>,
    {
        let (index, rejected) = VectorIndex::build(self.dimension, entries);
        let snapshot = Arc::new(IndexSnapshot {
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
            index,
        });
        self.current.store(Some(Arc::clone(&snapshot)));
        (snapshot, rejected)
    }

    /// Backfill missing embeddings, rebuild from every embedded item, publish.
    ///
    /// Items the oracle finds no feature in are deleted from the store.
    /// Embeddings of the wrong dimension (or with non-finite values) are
    /// reported in [`BuildStats::rejected`] and left out of the snapshot.
    pub async fn rebuild<S>(&self, store: &S, runner: &OracleRunner) -> Result<BuildStats>
    where
        S: Store + ?Sized,
    {
        let _guard = self.rebuilding.lock().await;

        let pending = store.list_items(&ItemFilter {
            embedded: Some(false),
            ..ItemFilter::default()
        })?;
        info!("Found {} items without embeddings", pending.len());

        let mut stats = BuildStats::default();
        for outcome in embed_items(store, runner, pending).await {
            match outcome {
                EmbedOutcome::Embedded => stats.embedded += 1,
                EmbedOutcome::NoFeatureDeleted => stats.no_feature_deleted += 1,
                EmbedOutcome::Failed => stats.failed += 1,
            }
        }

        let entries: Vec<(ItemId, Vec<f32>)> = store
            .list_items(&ItemFilter::embedded())?
            .into_iter()
            .filter_map(|item| item.embedding.map(|e| (item.id, e)))
            .collect();
        if entries.is_empty() {
            warn!("No items with embeddings found; publishing an empty index");
        }

        let (snapshot, rejected) = self.publish_entries(entries);
        stats.version = snapshot.version;
        stats.indexed = snapshot.index.len();
        stats.rejected = rejected;

        info!(
            "Published index v{} with {} vectors ({} rejected)",
            stats.version,
            stats.indexed,
            stats.rejected.len()
        );
        Ok(stats)
    }

    pub fn status(&self) -> IndexStatus {
        match self.snapshot() {
            Some(snapshot) => IndexStatus {
                initialized: true,
                count: snapshot.index.len(),
                dimension: Some(snapshot.index.dimension()),
                version: Some(snapshot.version),
            },
            None => IndexStatus {
                initialized: false,
                count: 0,
                dimension: None,
                version: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{VectorPayloadOracle, vector_payload};
    use crate::store::{MemoryStore, NewItem, Tag};
    use std::time::Duration;

    fn unit_axis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn embedded(store: &MemoryStore, id: &str, vector: Vec<f32>) {
        store
            .insert_with_id(
                ItemId::from(id),
                NewItem {
                    embedding: Some(vector),
                    attribute: Some(Tag::from("F")),
                    ..NewItem::default()
                },
            )
            .unwrap();
    }

    fn runner(dim: usize) -> OracleRunner {
        OracleRunner::new(Arc::new(VectorPayloadOracle), 2, Duration::from_secs(2), dim)
    }

    #[tokio::test]
    async fn wrong_dimension_item_is_rejected_and_not_counted() {
        let store = MemoryStore::new();
        embedded(&store, "a", unit_axis(512, 0));
        embedded(&store, "tiny", vec![0.6, 0.8, 0.0]);
        embedded(&store, "b", unit_axis(512, 1));

        let builder = IndexBuilder::new(512);
        assert!(!builder.status().initialized);

        let stats = builder.rebuild(&store, &runner(512)).await.unwrap();
        assert_eq!(stats.rejected, vec![ItemId::from("tiny")]);
        assert_eq!(stats.indexed, 2);

        let status = builder.status();
        assert!(status.initialized);
        assert_eq!(status.count, 2);
        assert_eq!(status.dimension, Some(512));

        let snapshot = builder.snapshot().unwrap();
        assert!(!snapshot.index.contains(&ItemId::from("tiny")));
    }

    #[tokio::test]
    async fn non_unit_item_is_rejected_by_rebuild() {
        let store = MemoryStore::new();
        let mut big = unit_axis(512, 0);
        big[0] = 3.0;
        big[1] = 4.0;
        embedded(&store, "a", unit_axis(512, 0));
        embedded(&store, "big", big);

        let builder = IndexBuilder::new(512);
        let stats = builder.rebuild(&store, &runner(512)).await.unwrap();
        assert_eq!(stats.rejected, vec![ItemId::from("big")]);
        assert_eq!(stats.indexed, 1);
        assert!(!builder.snapshot().unwrap().index.contains(&ItemId::from("big")));
    }

    #[tokio::test]
    async fn rebuild_backfills_embeddings_through_oracle() {
        let store = MemoryStore::new();
        store
            .insert_with_id(
                ItemId::from("raw"),
                NewItem {
                    payload: vector_payload(&[0.0, 1.0], "M"),
                    ..NewItem::default()
                },
            )
            .unwrap();
        store
            .insert_with_id(
                ItemId::from("faceless"),
                NewItem {
                    payload: b"nothing".to_vec(),
                    ..NewItem::default()
                },
            )
            .unwrap();

        let builder = IndexBuilder::new(2);
        let stats = builder.rebuild(&store, &runner(2)).await.unwrap();

        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.no_feature_deleted, 1);
        assert_eq!(stats.indexed, 1);
        assert!(store.get_item(&ItemId::from("faceless")).unwrap().is_none());
    }

    #[tokio::test]
    async fn old_snapshot_survives_republish() {
        let store = MemoryStore::new();
        embedded(&store, "a", vec![1.0, 0.0]);

        let builder = IndexBuilder::new(2);
        builder.rebuild(&store, &runner(2)).await.unwrap();
        let held = builder.snapshot().unwrap();

        embedded(&store, "b", vec![0.0, 1.0]);
        let stats = builder.rebuild(&store, &runner(2)).await.unwrap();

        assert_eq!(held.index.len(), 1);
        assert_eq!(held.index.search(&[0.0, 1.0], 5).unwrap().len(), 1);
        let current = builder.snapshot().unwrap();
        assert_eq!(current.index.len(), 2);
        assert!(current.version > held.version);
        assert_eq!(stats.version, current.version);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_only_ever_see_complete_snapshots() {
        let builder = Arc::new(IndexBuilder::new(2));
        builder.publish_entries(vec![(ItemId::from("seed"), vec![1.0, 0.0])]);

        let writer = {
            let builder = Arc::clone(&builder);
            tokio::spawn(async move {
                for round in 1..50usize {
                    let entries = (0..round * 10).map(|i| {
                        let angle = i as f32 * 0.01;
                        (ItemId::from(format!("r{round}-{i}")), vec![angle.cos(), angle.sin()])
                    });
                    builder.publish_entries(entries);
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let builder = Arc::clone(&builder);
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let snapshot = builder.snapshot().unwrap();
                        let n = snapshot.index.len();
                        // Every published snapshot has a consistent size: 1 or a multiple of 10.
                        assert!(n == 1 || n % 10 == 0);
                        let hits = snapshot.index.search(&[1.0, 0.0], n + 5).unwrap();
                        assert_eq!(hits.len(), n);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
