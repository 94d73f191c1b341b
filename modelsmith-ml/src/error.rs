//! Error types for the modelsmith-ml crate.

use thiserror::Error;

/// Top-level error type for model selection and ensembling.
///
/// Per-candidate failures during a search never surface here: the candidate
/// evaluator turns them into penalized trials.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Unknown or unavailable model family: {0}")]
    UnknownFamily(String),

    #[error("Invalid configuration for {family}: {reason}")]
    InvalidConfiguration { family: String, reason: String },

    #[error("No valid trial after {attempted} attempts ({penalized} penalized)")]
    NoValidTrial { attempted: usize, penalized: usize },

    #[error("Model not fitted: {0}")]
    NotFitted(String),

    #[error("Base model {index} ({name}) failed to fit: {reason}")]
    BaseModelFit {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_fitted(what: impl Into<String>) -> Self {
        Self::NotFitted(what.into())
    }

    pub fn invalid_configuration(family: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            family: family.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MlError>;
