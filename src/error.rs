//! Typed failures raised by the normalization and inference pipeline.
//!
//! Every variant aborts the per-file pipeline that detected it. None of them
//! are retried internally; the orchestration layer wraps them in
//! `anyhow::Error` with file context before surfacing them to the user.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The separator, a null token, or an extra substitution cannot be
    /// turned into a usable matcher.
    #[error("Invalid null-token pattern: {0}")]
    InvalidPattern(String),

    /// No sampled chunk produced a single type guess.
    #[error("No column type data to combine ({0})")]
    NoDtypeData(String),

    /// A chunk reported a type token outside the known storage classes.
    #[error("Column '{column}' contains unsupported dtypes: {values:?}")]
    UnsupportedDtype { column: String, values: Vec<String> },

    /// Normalization stopped before the whole input was written. The partial
    /// output must not be handed to a loader.
    #[error("Normalization incomplete after {bytes_written} byte(s): {reason}")]
    IncompleteNormalization { bytes_written: u64, reason: String },

    /// Two raw headers normalized to the same identifier under the strict
    /// collision policy.
    #[error("Columns {first:?} and {second:?} both normalize to '{normalized}'")]
    ColumnNameCollision {
        first: String,
        second: String,
        normalized: String,
    },
}

impl PipelineError {
    pub(crate) fn incomplete(bytes_written: u64, reason: impl Into<String>) -> Self {
        PipelineError::IncompleteNormalization {
            bytes_written,
            reason: reason.into(),
        }
    }
}
