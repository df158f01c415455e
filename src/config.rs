//! This module provides functionality for loading and validating the
//! recommender's configuration.
//!
//! It defines the `RecommenderConfig` struct, which holds every tunable the
//! core consumes (corpus dimension, learning-rate schedule, feedback weights,
//! oracle limits), and a `load_config` function to load it from a YAML file.
//!
//! Every field has a default, so a config file only needs the values it
//! changes.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use swipe_rank::config::load_config;
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use tracing::*;

use crate::error::{RecommendError, Result};
use crate::preference::DecaySchedule;

/// Represents the recommender's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Dimension `D` every embedding and preference vector must have.
    pub dimension: usize,

    /// Number of recommendations returned when the caller does not ask for a specific `k`.
    pub k_default: usize,

    /// Decay applied to the first like after cold start.
    pub early_min: f32,

    /// Decay reached at `threshold1` likes.
    pub early_max: f32,

    /// Decay reached at `threshold2` likes and kept from then on.
    pub mid_decay: f32,

    pub threshold1: u32,

    pub threshold2: u32,

    // Strength of the push away from a passed item.
    pub negative_feedback_weight: f32,

    // Amplification of the new-item term on a super-like.
    pub super_like_weight_multiplier: f32,

    // Search window multiplier for the global-snapshot recommendation path.
    pub oversample_factor: usize,

    // Store database url (SQLite file path or ":memory:").
    pub store_db_url: String,

    // Per-call budget for the embedding oracle, in milliseconds.
    pub oracle_timeout_ms: u64,

    // Maximum concurrent oracle calls.
    pub oracle_workers: usize,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            dimension: 512,
            k_default: 10,
            early_min: 0.5,
            early_max: 0.7,
            mid_decay: 0.9,
            threshold1: 10,
            threshold2: 50,
            negative_feedback_weight: 0.05,
            super_like_weight_multiplier: 3.0,
            oversample_factor: 4,
            store_db_url: "swipe_rank.db".to_string(),
            oracle_timeout_ms: 5_000,
            oracle_workers: 2,
        }
    }
}

impl RecommenderConfig {
    /// Reject values the core cannot work with.
    ///
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(RecommendError::InvalidConfig(msg.to_string())) };

        if self.dimension == 0 {
            return fail("dimension must be positive");
        }
        if self.k_default == 0 {
            return fail("k_default must be positive");
        }
        for (name, value) in [
            ("early_min", self.early_min),
            ("early_max", self.early_max),
            ("mid_decay", self.mid_decay),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RecommendError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.early_min > self.early_max || self.early_max > self.mid_decay {
            return fail("decays must satisfy early_min <= early_max <= mid_decay");
        }
        if self.threshold1 == 0 || self.threshold2 <= self.threshold1 {
            return fail("thresholds must satisfy 0 < threshold1 < threshold2");
        }
        if !(self.negative_feedback_weight.is_finite() && self.negative_feedback_weight >= 0.0) {
            return fail("negative_feedback_weight must be a non-negative number");
        }
        if !(self.super_like_weight_multiplier.is_finite() && self.super_like_weight_multiplier > 0.0)
        {
            return fail("super_like_weight_multiplier must be positive");
        }
        if self.oversample_factor == 0 {
            return fail("oversample_factor must be positive");
        }
        if self.oracle_workers == 0 {
            return fail("oracle_workers must be positive");
        }
        Ok(())
    }

    pub fn decay_schedule(&self) -> DecaySchedule {
        DecaySchedule {
            early_min: self.early_min,
            early_max: self.early_max,
            mid_decay: self.mid_decay,
            threshold1: self.threshold1,
            threshold2: self.threshold2,
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

/// Loads the recommender's configuration from a YAML file.
///
/// This function reads the file at the given path, parses it as YAML, and
/// validates the result.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(RecommenderConfig)`: The loaded configuration.
/// - `Err(RecommendError)`: The file could not be read or parsed, or a value is out of range.
pub fn load_config(file: &str) -> Result<RecommenderConfig> {
    debug!("Loading config: {:?}", file);
    let content = fs::read_to_string(file)?;
    let config: RecommenderConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
