//! `sr`: the Swipe Rank command-line front end.
//!
//! Loads `config.yaml`, opens the SQLite store it names and runs one
//! subcommand against a [`Recommender`].
//!
//! ```sh
//! sr init
//! sr register ann
//! sr ingest photo.json --attribute F
//! sr like ann 1
//! sr recommend ann -k 5
//! ```
//!
//! The global index lives in process memory, so commands that read it
//! (`status`, `recommend --snapshot`) rebuild it first.

use std::{env, error::Error, fs, path::Path, sync::Arc};

use clap::Parser;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use swipe_rank::commands::{Cli, Commands};
use swipe_rank::config::{self, RecommenderConfig};
use swipe_rank::config_dir;
use swipe_rank::oracle::VectorPayloadOracle;
use swipe_rank::pretty;
use swipe_rank::service::Recommender;
use swipe_rank::store::{ItemId, ItemMetadata, SqliteStore, SubjectId, Tag};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Parse the command line, load config and dispatch.
///
/// # Errors
/// Config, store and command failures are returned as is.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Commands::Init = cli.command {
        debug!("Initializing configuration");
        return init();
    }

    let config_path = if env::var("SR_CONFIG_IN_CWD").is_ok() {
        env::current_dir()?.join("config.yaml")
    } else {
        config_dir()?.join("config.yaml")
    };
    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(&config_path.to_string_lossy())?;
    debug!("Config loaded: {:?}", config);

    let store = SqliteStore::open(&config.store_db_url)?;
    let rec = Recommender::new(config, Arc::new(store), Arc::new(VectorPayloadOracle))?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Register { subject } => {
            rec.register_subject(&SubjectId::from(subject.as_str()))?;
            println!("Registered {}", subject);
        }
        Commands::Ingest { file, attribute } => {
            let payload = fs::read(&file)?;
            let outcome = rec
                .ingest_item(payload, attribute.map(Tag::from), metadata_for(&file))
                .await?;
            pretty::print_ingest(&outcome)?;
        }
        Commands::Like { subject, item } => {
            let outcome = rec
                .record_like(&SubjectId::from(subject), &ItemId::from(item))
                .await?;
            pretty::print_feedback("like", &outcome)?;
        }
        Commands::SuperLike { subject, item } => {
            let outcome = rec
                .record_super_like(&SubjectId::from(subject), &ItemId::from(item))
                .await?;
            pretty::print_feedback("super-like", &outcome)?;
        }
        Commands::Pass { subject, item } => {
            let outcome = rec
                .record_pass(&SubjectId::from(subject), &ItemId::from(item))
                .await?;
            pretty::print_feedback("pass", &outcome)?;
        }
        Commands::Recommend {
            subject,
            attribute,
            k,
            snapshot,
        } => {
            let subject = SubjectId::from(subject);
            let filter = attribute.map(Tag::from);
            let recs = if snapshot {
                rec.rebuild_index().await?;
                rec.recommend_from_snapshot(&subject, filter.as_ref(), k)?
            } else {
                rec.recommend(&subject, filter.as_ref(), k)?
            };
            pretty::print_recommendations(&recs)?;
        }
        Commands::Clear { subject } => {
            rec.clear_preferences(&SubjectId::from(subject.as_str())).await?;
            println!("Cleared preferences of {}", subject);
        }
        Commands::Rebuild => {
            let stats = rec.rebuild_index().await?;
            pretty::print_build_stats(&stats)?;
        }
        Commands::Status => {
            rec.rebuild_index().await?;
            pretty::print_index_status(&rec.index_status())?;
        }
        Commands::Process { force } => {
            let stats = rec.process_embeddings(force).await?;
            pretty::print_maintenance(&stats)?;
        }
    }

    Ok(())
}

fn metadata_for(file: &Path) -> ItemMetadata {
    let content_type = match file.extension().and_then(|e| e.to_str()) {
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("json") => Some("application/json"),
        _ => None,
    };
    ItemMetadata {
        filename: file.file_name().map(|n| n.to_string_lossy().into_owned()),
        content_type: content_type.map(str::to_owned),
    }
}

/// Write a default `config.yaml` into the config directory.
///
/// # Errors
/// When the directory cannot be created or the file cannot be written.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    info!("Creating config directory: {}", config_dir.display());
    fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.yaml");
    info!("Creating config file: {}", config_path.display());
    let config = RecommenderConfig {
        store_db_url: config_dir.join("swipe_rank.db").to_string_lossy().into_owned(),
        ..RecommenderConfig::default()
    };
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    println!("Wrote {}", config_path.display());

    Ok(())
}
