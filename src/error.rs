//! # Errors
//!
//! The domain error type shared by every module in the crate.
//!
//! Only genuine failures live here. Expected edge cases are modelled as values
//! instead:
//!
//! - a degenerate preference update is an `applied == false` outcome,
//! - an empty candidate pool is [`RecommendationType::NoAvailableCandidates`],
//! - an oracle timeout or crash is "no feature found".
//!
//! [`RecommendationType::NoAvailableCandidates`]: crate::engine::RecommendationType::NoAvailableCandidates

use thiserror::Error;

use crate::store::{ItemId, SubjectId};

#[derive(Error, Debug)]
pub enum RecommendError {
    #[error("subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("subject already exists: {0}")]
    SubjectExists(SubjectId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RecommendError {
    /// Stable, machine-readable category for callers that map errors onto
    /// status codes or exit codes.
    pub fn category(&self) -> &'static str {
        match self {
            RecommendError::SubjectNotFound(_) | RecommendError::ItemNotFound(_) => "not_found",
            RecommendError::SubjectExists(_) => "conflict",
            RecommendError::InvalidVector { .. } => "invalid_vector",
            RecommendError::InvalidConfig(_) => "invalid_config",
            RecommendError::Store(_) => "store",
            RecommendError::Io(_) | RecommendError::Yaml(_) => "io",
        }
    }

    pub(crate) fn invalid_vector(reason: impl Into<String>) -> Self {
        RecommendError::InvalidVector {
            reason: reason.into(),
        }
    }
}

impl From<diesel::result::Error> for RecommendError {
    fn from(err: diesel::result::Error) -> Self {
        RecommendError::Store(err.to_string())
    }
}

impl From<diesel::ConnectionError> for RecommendError {
    fn from(err: diesel::ConnectionError) -> Self {
        RecommendError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecommendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(
            RecommendError::SubjectNotFound(SubjectId::from("ann")).category(),
            "not_found"
        );
        assert_eq!(
            RecommendError::ItemNotFound(ItemId::from("p1")).category(),
            "not_found"
        );
        assert_eq!(
            RecommendError::invalid_vector("empty").category(),
            "invalid_vector"
        );
        assert_eq!(
            RecommendError::InvalidConfig("k".into()).category(),
            "invalid_config"
        );
    }

    #[test]
    fn display_does_not_leak_debug_formatting() {
        let err = RecommendError::SubjectNotFound(SubjectId::from("ann"));
        assert_eq!(err.to_string(), "subject not found: ann");
    }
}
