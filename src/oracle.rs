//! # Embedding oracle
//!
//! The boundary to the feature extractor that turns raw item bytes (an image,
//! typically) into a unit-norm vector plus a categorical attribute.
//!
//! Extraction may be slow and CPU-heavy, so calls go through an
//! [`OracleRunner`]:
//!
//! - at most `oracle_workers` extractions run at once (a tokio [`Semaphore`]),
//! - each one runs on the blocking pool so request-serving tasks are never stalled,
//! - each one is bounded by `oracle_timeout_ms`.
//!
//! Every failure mode (no feature, timeout, panic inside the extractor, a
//! vector of the wrong shape) collapses into `None`. Callers never see an
//! oracle error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::RecommenderConfig;
use crate::store::Tag;
use crate::vector::UnitVector;

/// Raw extractor output.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub vector: Vec<f32>,
    pub attribute: Tag,
}

/// Extractor output that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub vector: UnitVector,
    pub attribute: Tag,
}

/// Feature extractor. Implementations must not panic across this boundary,
/// but the runner tolerates it if they do.
pub trait EmbeddingOracle: Send + Sync + 'static {
    /// `None` when no feature could be found in `raw`.
    fn extract(&self, raw: &[u8]) -> Option<Extraction>;
}

/// Bounded, time-limited executor for an [`EmbeddingOracle`].
#[derive(Clone)]
pub struct OracleRunner {
    oracle: Arc<dyn EmbeddingOracle>,
    permits: Arc<Semaphore>,
    workers: usize,
    timeout: Duration,
    dimension: usize,
}

impl OracleRunner {
    pub fn new(
        oracle: Arc<dyn EmbeddingOracle>,
        workers: usize,
        timeout: Duration,
        dimension: usize,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            oracle,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            timeout,
            dimension,
        }
    }

    pub fn from_config(oracle: Arc<dyn EmbeddingOracle>, config: &RecommenderConfig) -> Self {
        Self::new(
            oracle,
            config.oracle_workers,
            config.oracle_timeout(),
            config.dimension,
        )
    }

    /// Maximum number of concurrent extractions.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the oracle on `payload`.
    ///
    /// The time limit covers waiting for a worker slot as well as the
    /// extraction itself. A timed-out extraction keeps its slot until the
    /// blocking call actually returns, so the pool bound always holds.
    pub async fn extract(&self, payload: Vec<u8>) -> Option<Features> {
        let permits = Arc::clone(&self.permits);
        let oracle = Arc::clone(&self.oracle);

        let work = async move {
            let permit = permits.acquire_owned().await.ok()?;
            let task = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                oracle.extract(&payload)
            });
            match task.await {
                Ok(extraction) => extraction,
                Err(err) => {
                    warn!("Embedding oracle task failed: {}", err);
                    None
                }
            }
        };

        let extraction = match tokio::time::timeout(self.timeout, work).await {
            Ok(extraction) => extraction?,
            Err(_) => {
                warn!(
                    "Embedding oracle timed out after {:?}; treating as no feature",
                    self.timeout
                );
                return None;
            }
        };

        match UnitVector::from_unit(extraction.vector, self.dimension) {
            Ok(vector) => {
                debug!("Oracle extracted feature with attribute {}", extraction.attribute);
                Some(Features {
                    vector,
                    attribute: extraction.attribute,
                })
            }
            Err(err) => {
                warn!("Discarding oracle output: {}", err);
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct VectorPayload {
    vector: Vec<f32>,
    attribute: String,
}

/// Oracle for payloads that already carry their feature vector, encoded as
/// JSON: `{"vector": [..], "attribute": "F"}`.
///
/// Used by the `sr` binary for pre-embedded corpora and by tests. Any payload
/// that is not such a document yields no feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorPayloadOracle;

impl EmbeddingOracle for VectorPayloadOracle {
    fn extract(&self, raw: &[u8]) -> Option<Extraction> {
        let payload: VectorPayload = serde_json::from_slice(raw).ok()?;
        Some(Extraction {
            vector: payload.vector,
            attribute: Tag::from(payload.attribute),
        })
    }
}

/// Encode a vector and attribute the way [`VectorPayloadOracle`] expects.
pub fn vector_payload(vector: &[f32], attribute: &str) -> Vec<u8> {
    serde_json::json!({ "vector": vector, "attribute": attribute })
        .to_string()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner(oracle: impl EmbeddingOracle, workers: usize, timeout_ms: u64) -> OracleRunner {
        OracleRunner::new(Arc::new(oracle), workers, Duration::from_millis(timeout_ms), 2)
    }

    #[tokio::test]
    async fn payload_oracle_round_trip() {
        let runner = runner(VectorPayloadOracle, 1, 1_000);
        let features = runner
            .extract(vector_payload(&[0.0, 1.0], "F"))
            .await
            .unwrap();
        assert_eq!(features.vector.as_slice(), &[0.0, 1.0]);
        assert_eq!(features.attribute, Tag::from("F"));

        assert!(runner.extract(b"not json".to_vec()).await.is_none());
    }

    #[tokio::test]
    async fn wrong_dimension_output_is_no_feature() {
        let runner = runner(VectorPayloadOracle, 1, 1_000);
        assert!(runner
            .extract(vector_payload(&[1.0, 0.0, 0.0], "M"))
            .await
            .is_none());
        assert!(runner
            .extract(vector_payload(&[3.0, 4.0], "M"))
            .await
            .is_none());
    }

    struct Slow;

    impl EmbeddingOracle for Slow {
        fn extract(&self, _raw: &[u8]) -> Option<Extraction> {
            std::thread::sleep(Duration::from_millis(300));
            Some(Extraction {
                vector: vec![1.0, 0.0],
                attribute: Tag::from("M"),
            })
        }
    }

    #[tokio::test]
    async fn timeout_maps_to_no_feature() {
        let runner = runner(Slow, 1, 20);
        assert!(runner.extract(Vec::new()).await.is_none());
    }

    struct Panics;

    impl EmbeddingOracle for Panics {
        fn extract(&self, _raw: &[u8]) -> Option<Extraction> {
            panic!("extractor crashed");
        }
    }

    #[tokio::test]
    async fn panic_maps_to_no_feature() {
        let runner = runner(Panics, 1, 1_000);
        assert!(runner.extract(Vec::new()).await.is_none());
    }

    #[derive(Default)]
    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl EmbeddingOracle for Arc<Counting> {
        fn extract(&self, _raw: &[u8]) -> Option<Extraction> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Some(Extraction {
                vector: vec![1.0, 0.0],
                attribute: Tag::from("M"),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_extractions_are_bounded() {
        let counting = Arc::new(Counting::default());
        let runner = runner(Arc::clone(&counting), 2, 5_000);

        let calls = (0..8).map(|_| runner.extract(Vec::new()));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Option::is_some));
        assert!(counting.peak.load(Ordering::SeqCst) <= 2);
    }
}
