//! Error types for the vnn-ml crate.

use thiserror::Error;

/// Top-level error type for training, evaluation and model operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("No such {kind}: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Unknown registry, dataset, loss, activation, optimizer or method key.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MlError>;
