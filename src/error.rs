//! Error types for chart construction and ingestion.
//!
//! Every failure is a caller error: the engine never retries and never
//! panics on bad input. A rejected call leaves the chart exactly as it was.

use thiserror::Error;

use crate::spc::{ChartMethod, PayloadKind};

/// Errors returned by charts, the registry, and configuration loading.
#[derive(Error, Debug)]
pub enum SpcError {
    /// Invalid construction parameters or an impossible sample
    /// (e.g. `defective > sample_size`).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Subgroup of the wrong length (or empty).
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// NaN or infinite input.
    #[error("non-finite input: {0}")]
    Numeric(String),

    /// Payload shape does not match the chart already registered for a metric.
    #[error("type mismatch: {expected} chart cannot accept a {found} payload")]
    TypeMismatch {
        expected: ChartMethod,
        found: PayloadKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{0}` is already registered")]
    DuplicateMetric(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl SpcError {
    /// Reject a non-finite value, naming the offending input.
    pub(crate) fn ensure_finite(what: &str, value: f64) -> Result<(), SpcError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(SpcError::Numeric(format!("{what} must be finite, got {value}")))
        }
    }
}
