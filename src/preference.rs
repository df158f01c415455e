//! # Preference model
//!
//! Online learning of a subject's preference vector from swipe feedback.
//!
//! A like folds the item's embedding into the preference with an exponential
//! moving average whose decay grows with the number of likes seen so far: early
//! likes move the preference a lot, later likes refine it. A pass pushes the
//! preference a small, fixed step away from the item. Every update ends with a
//! renormalization so inner-product ranking stays equal to cosine similarity.
//!
//! All functions here are pure; persistence and per-subject serialization are
//! handled by [`Recommender`](crate::service::Recommender).
//!
//! ```
//! use swipe_rank::preference::{DecaySchedule, PreferenceModel, PreferenceState};
//! use swipe_rank::vector::UnitVector;
//!
//! let model = PreferenceModel::new(DecaySchedule::default(), 0.05, 3.0);
//! let v = UnitVector::normalize(vec![1.0, 0.0]).unwrap();
//!
//! let state = model.update_like(&PreferenceState::default(), &v, 1.0).unwrap();
//! assert_eq!(state.sample_count, 1);
//! assert_eq!(state.preference.as_ref(), Some(&v));
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RecommendError, Result};
use crate::vector::{UnitVector, l2_norm};

/// Norm below which a blended or subtracted vector is treated as collapsed.
const DEGENERATE_NORM: f32 = 1e-6;

/// Piecewise-linear learning-rate decay over the like count.
///
/// ```text
/// decay
///  mid ┤                 ┌──────────
///      │              ╱
///  max ┤         ╱
///      │     ╱
///  min ┤ ╱
///      └────┬─────────┬──────────── n
///          t1        t2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecaySchedule {
    pub early_min: f32,
    pub early_max: f32,
    pub mid_decay: f32,
    pub threshold1: u32,
    pub threshold2: u32,
}

impl Default for DecaySchedule {
    fn default() -> Self {
        Self {
            early_min: 0.5,
            early_max: 0.7,
            mid_decay: 0.9,
            threshold1: 10,
            threshold2: 50,
        }
    }
}

impl DecaySchedule {
    /// Weight kept by the old preference when the `n`-th like arrives.
    pub fn decay(&self, n: u32) -> f32 {
        if n < self.threshold1 {
            let t = n as f32 / self.threshold1 as f32;
            self.early_min + t * (self.early_max - self.early_min)
        } else if n < self.threshold2 {
            let t = (n - self.threshold1) as f32 / (self.threshold2 - self.threshold1) as f32;
            self.early_max + t * (self.mid_decay - self.early_max)
        } else {
            self.mid_decay
        }
    }
}

/// Learned state of one subject.
///
/// `preference.is_none()` exactly when `sample_count == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreferenceState {
    pub preference: Option<UnitVector>,
    pub sample_count: u32,
}

impl PreferenceState {
    pub fn new(preference: Option<UnitVector>, sample_count: u32) -> Self {
        match preference {
            Some(p) => Self {
                preference: Some(p),
                sample_count: sample_count.max(1),
            },
            None => Self::default(),
        }
    }
}

/// Update rules for likes, super-likes and passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreferenceModel {
    schedule: DecaySchedule,
    negative_feedback_weight: f32,
    super_like_weight_multiplier: f32,
}

impl PreferenceModel {
    pub fn new(
        schedule: DecaySchedule,
        negative_feedback_weight: f32,
        super_like_weight_multiplier: f32,
    ) -> Self {
        Self {
            schedule,
            negative_feedback_weight,
            super_like_weight_multiplier,
        }
    }

    pub fn schedule(&self) -> &DecaySchedule {
        &self.schedule
    }

    pub fn super_like_weight_multiplier(&self) -> f32 {
        self.super_like_weight_multiplier
    }

    /// Fold a liked item into the preference.
    ///
    /// On cold start the item vector becomes the preference. Otherwise
    /// `raw = p·decay + v·(1 − decay)·weight_multiplier` is renormalized; if
    /// `raw` collapses to zero the old preference is kept. The sample count
    /// grows by one either way.
    ///
    /// # Errors
    /// `InvalidVector` when `item` and the current preference differ in dimension.
    pub fn update_like(
        &self,
        state: &PreferenceState,
        item: &UnitVector,
        weight_multiplier: f32,
    ) -> Result<PreferenceState> {
        let Some(preference) = &state.preference else {
            return Ok(PreferenceState {
                preference: Some(item.clone()),
                sample_count: 1,
            });
        };
        check_dimensions(preference, item)?;

        let decay = self.schedule.decay(state.sample_count);
        let item_weight = (1.0 - decay) * weight_multiplier;
        let raw: Vec<f32> = preference
            .as_slice()
            .iter()
            .zip(item.as_slice())
            .map(|(p, v)| p * decay + v * item_weight)
            .collect();

        let sample_count = state.sample_count.saturating_add(1);
        let preference = match renormalize(raw) {
            Some(p) => p,
            None => {
                debug!("Like collapsed the preference vector; keeping previous preference");
                preference.clone()
            }
        };

        Ok(PreferenceState {
            preference: Some(preference),
            sample_count,
        })
    }

    /// [`update_like`](Self::update_like) with the configured super-like multiplier.
    pub fn update_super_like(
        &self,
        state: &PreferenceState,
        item: &UnitVector,
    ) -> Result<PreferenceState> {
        self.update_like(state, item, self.super_like_weight_multiplier)
    }

    /// Push the preference away from a passed item.
    ///
    /// Returns the new state and whether the update was applied. Nothing is
    /// applied on cold start or when the subtraction cancels the preference
    /// out. Passes never change the sample count.
    pub fn update_dislike(
        &self,
        state: &PreferenceState,
        item: &UnitVector,
    ) -> Result<(PreferenceState, bool)> {
        let Some(preference) = &state.preference else {
            return Ok((state.clone(), false));
        };
        check_dimensions(preference, item)?;

        let weight = self.negative_feedback_weight;
        let raw: Vec<f32> = preference
            .as_slice()
            .iter()
            .zip(item.as_slice())
            .map(|(p, v)| p - v * weight)
            .collect();

        match renormalize(raw) {
            Some(p) => Ok((
                PreferenceState {
                    preference: Some(p),
                    sample_count: state.sample_count,
                },
                true,
            )),
            None => {
                debug!("Pass would cancel the preference vector; update rejected");
                Ok((state.clone(), false))
            }
        }
    }
}

fn check_dimensions(preference: &UnitVector, item: &UnitVector) -> Result<()> {
    if preference.dim() != item.dim() {
        return Err(RecommendError::invalid_vector(format!(
            "item dimension {} does not match preference dimension {}",
            item.dim(),
            preference.dim()
        )));
    }
    Ok(())
}

fn renormalize(raw: Vec<f32>) -> Option<UnitVector> {
    if !(l2_norm(&raw) > DEGENERATE_NORM) {
        return None;
    }
    UnitVector::normalize(raw).ok()
}
