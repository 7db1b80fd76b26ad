//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Diagnostics captured when the SARIMA optimizer fails to converge.
#[derive(Debug, Clone, PartialEq)]
pub struct FitFailure {
    /// Termination reason reported by the optimizer.
    pub termination: String,
    /// Number of residual evaluations performed before giving up.
    pub evaluations: usize,
    /// Half the sum of squared innovations at the last accepted parameters.
    pub objective: f64,
    /// Last parameter vector `[ar, ma, seasonal_ar, seasonal_ma]`.
    pub params: [f64; 4],
}

/// How a table file failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoFailure {
    /// The file does not exist.
    NotFound,
    /// The file exists but could not be read or written.
    Read(String),
}

impl std::fmt::Display for IoFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoFailure::NotFound => write!(f, "not found"),
            IoFailure::Read(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Missing or malformed input columns. Fatal for the region.
    #[error("schema error: {0}")]
    Schema(String),

    /// A filter matched no rows.
    #[error("no rows match: {0}")]
    EmptyResult(String),

    /// Not enough rows for the requested operation.
    #[error("insufficient data: need at least {required}, got {actual} ({context})")]
    InsufficientData {
        required: usize,
        actual: usize,
        context: String,
    },

    /// The dataset is at the wrong granularity for the requested operation.
    #[error("aggregation policy: {0}")]
    AggregationPolicy(String),

    /// The SARIMA fit did not converge.
    #[error(
        "model fit failed: {} after {} evaluations (objective {:.4})",
        .0.termination, .0.evaluations, .0.objective
    )]
    ModelFit(FitFailure),

    /// A caller-supplied argument or config value is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Work was aborted through a cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Table file could not be accessed.
    #[error("table I/O on '{path}': {failure}")]
    Io { path: String, failure: IoFailure },
}

impl AnalysisError {
    pub(crate) fn insufficient(required: usize, actual: usize, context: &str) -> Self {
        AnalysisError::InsufficientData {
            required,
            actual,
            context: context.to_string(),
        }
    }
}
