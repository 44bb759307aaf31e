//! Error types for point-process training and evaluation.
//!
//! Numerical degeneracy inside the intensity numerics (log of a zero
//! intensity, a diverging integral) is not an error: it flows out as
//! `-inf`/`NaN`. The loss-level guard in the training loop turns a
//! non-finite loss into [`TppError::NonFiniteLoss`] before it can reach the
//! optimizer. Caller misuse (history not preceding the query window) panics.

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum TppError {
    /// A single batch ran out of compute memory. Training skips the batch.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Two buffers that must agree in length do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: String,
        /// Actual dimension.
        actual: String,
    },

    /// The batch loss was NaN or infinite and would poison the optimizer.
    #[error("non-finite loss {value} at batch {batch}")]
    NonFiniteLoss {
        /// Index of the batch within the epoch.
        batch: usize,
        /// Offending loss value.
        value: f64,
    },

    /// The gradient of a batch contained NaN or infinite entries.
    #[error("non-finite gradient at batch {batch}")]
    NonFiniteGradient {
        /// Index of the batch within the epoch.
        batch: usize,
    },

    /// Failure reported by the model collaborator.
    #[error("model error: {0}")]
    Model(String),

    /// No saved parameter state under the requested run and name.
    #[error("no checkpoint named {name:?} for run {run_id:?}")]
    CheckpointMissing {
        /// Run identifier searched.
        run_id: String,
        /// Checkpoint name searched.
        name: String,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization of a record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TppError {
    /// Create a resource exhaustion error.
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a model error.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure is recoverable by skipping the current batch.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Result type alias for point-process operations.
pub type Result<T> = std::result::Result<T, TppError>;
