//! Command-line interface for `sr`, defined with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use swipe_rank::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Recommend { subject, k, .. } = cli.command {
//!     println!("{subject}: top {:?}", k);
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config.yaml to the config directory.
    Init,

    /// Register a new subject.
    #[clap(name = "register")]
    Register { subject: String },

    /// Store an item from a file and try to embed it.
    #[clap(name = "ingest", alias = "add")]
    Ingest {
        file: PathBuf,

        /// Attribute to store instead of the detected one.
        #[arg(long, short = 'a')]
        attribute: Option<String>,
    },

    #[clap(name = "like", alias = "l")]
    Like { subject: String, item: String },

    #[clap(name = "super-like", alias = "s")]
    SuperLike { subject: String, item: String },

    #[clap(name = "pass", alias = "p")]
    Pass { subject: String, item: String },

    /// Rank unrated items for a subject.
    #[clap(name = "recommend", alias = "r")]
    Recommend {
        subject: String,

        /// Only recommend items with this attribute.
        #[arg(long, short = 'a')]
        attribute: Option<String>,

        /// Number of items; defaults to `k_default`.
        #[arg(short = 'k')]
        k: Option<usize>,

        /// Search the global index (oversampled) instead of the filtered pool.
        #[arg(long)]
        snapshot: bool,
    },

    /// Forget everything a subject has rated.
    Clear { subject: String },

    /// Embed pending items and rebuild the global index.
    Rebuild,

    /// Show index status.
    Status,

    /// Backfill embeddings and delete unusable items.
    Process {
        /// Re-run the oracle on every item.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recommend_flags() {
        let cli = Cli::try_parse_from(["sr", "recommend", "ann", "-a", "F", "-k", "5"]).unwrap();
        match cli.command {
            Commands::Recommend {
                subject,
                attribute,
                k,
                snapshot,
            } => {
                assert_eq!(subject, "ann");
                assert_eq!(attribute.as_deref(), Some("F"));
                assert_eq!(k, Some(5));
                assert!(!snapshot);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_feedback_and_maintenance() {
        let cli = Cli::try_parse_from(["sr", "super-like", "ann", "item-3"]).unwrap();
        assert!(matches!(cli.command, Commands::SuperLike { .. }));

        let cli = Cli::try_parse_from(["sr", "process", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Process { force: true }));

        assert!(Cli::try_parse_from(["sr", "like", "ann"]).is_err());
    }
}
