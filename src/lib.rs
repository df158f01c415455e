//! # Swipe Rank (library root)
//!
//! Personalized top-k recommendation over a corpus of feature vectors, with a
//! per-subject preference vector learned online from likes, super-likes and
//! passes.
//!
//! - Exact inner-product search (`vector_index`) and its atomically published
//!   global snapshot (`index_builder`).
//! - The online preference update rules (`preference`).
//! - Filter-then-rank recommendation with cold start (`engine`).
//! - The bounded, time-limited embedding oracle (`oracle`) and the embedding
//!   backfill / compaction job (`maintenance`).
//! - Storage behind the [`store::Store`] trait, in memory or in SQLite
//!   (`store`, `models`, `schema`).
//! - The caller-facing facade tying it together ([`service::Recommender`]).
//! - Config, CLI and terminal output (`config`, `commands`, `pretty`).
//!
//! ## Quick Example
//! ```
//! use std::sync::Arc;
//! use swipe_rank::config::RecommenderConfig;
//! use swipe_rank::oracle::{VectorPayloadOracle, vector_payload};
//! use swipe_rank::service::Recommender;
//! use swipe_rank::store::{ItemMetadata, MemoryStore, SubjectId};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RecommenderConfig { dimension: 2, ..RecommenderConfig::default() };
//! let rec = Recommender::new(config, Arc::new(MemoryStore::new()), Arc::new(VectorPayloadOracle))?;
//!
//! let x = rec.ingest_item(vector_payload(&[1.0, 0.0], "M"), None, ItemMetadata::default()).await?;
//! rec.ingest_item(vector_payload(&[0.0, 1.0], "F"), None, ItemMetadata::default()).await?;
//!
//! let ann = SubjectId::from("ann");
//! rec.register_subject(&ann)?;
//! rec.record_pass(&ann, &x.id).await?;
//!
//! let recs = rec.recommend(&ann, None, None)?;
//! assert_eq!(recs.items.len(), 1);
//! # Ok(()) }
//! ```

use directories::ProjectDirs;
use std::error::Error;

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod index_builder;
pub mod maintenance;
pub mod models;
pub mod oracle;
pub mod preference;
pub mod pretty;
pub mod schema;
pub mod service;
pub mod store;
pub mod vector;
pub mod vector_index;

/// Per-platform configuration directory for `sr`.
///
/// Uses [`directories::ProjectDirs`] with `("com", "swipe-rank", "sr")`. The
/// directory is not created here.
///
/// # Errors
/// When the platform has no notion of a config directory.
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "swipe-rank", "sr")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
