//! Error types for world construction and configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] nimbus_model::ModelError),

    #[error("A skeleton named `{0}` already exists")]
    DuplicateSkeleton(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, WorldError>;
