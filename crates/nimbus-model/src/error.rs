//! Error types for model construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("body `{body}` references parent {parent}, which is not an earlier body")]
    InvalidParent { body: String, parent: i32 },

    #[error("joint axis of body `{0}` has zero length")]
    DegenerateAxis(String),

    #[error("limits of body `{body}` are inverted: [{lower}, {upper}]")]
    InvertedLimits {
        body: String,
        lower: f64,
        upper: f64,
    },

    #[error("body `{0}` has negative mass")]
    NegativeMass(String),

    #[error("no body has been added yet to attach `{0}` to")]
    NoBody(&'static str),
}

pub type Result<T> = std::result::Result<T, ModelError>;
