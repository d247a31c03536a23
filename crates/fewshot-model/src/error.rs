use thiserror::Error;

/// The error type for few-shot segmentor operations.
///
/// This enum encapsulates all errors the model crate can raise, from configuration
/// issues to tensor shape mismatches and snapshot failures.
#[derive(Error, Debug)]
pub enum FewShotError {
    /// Error for when an invalid model configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("{operation}: invalid tensor shape, expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The operation that rejected the tensor.
        operation: &'static str,
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when a required runtime argument was not supplied.
    #[error("{operation}: missing required parameter `{parameter}`")]
    MissingParameter {
        /// The operation that needed the parameter.
        operation: &'static str,
        /// The name of the missing parameter.
        parameter: &'static str,
    },

    /// Error for when model parameters are not resident on the requested device.
    #[error("Model parameters reside on {actual}, requested device is {expected}")]
    DeviceMismatch {
        /// The requested device.
        expected: String,
        /// The devices holding the parameters.
        actual: String,
    },

    /// Error for when an inference-only operation is called on a model that tracks gradients.
    #[error("{operation}: the model tracks gradients, call it on `valid()` or use `predict_no_grad`")]
    GradientTrackingEnabled {
        /// The operation that was refused.
        operation: &'static str,
    },

    /// Error for when a snapshot was written by an unknown format version.
    #[error("Unsupported snapshot format version {found} (supported: {supported})")]
    UnsupportedSnapshotVersion {
        /// The version found in the manifest.
        found: u32,
        /// The version this build reads and writes.
        supported: u32,
    },

    /// Error for when saving or loading a snapshot fails.
    #[error("Snapshot operation failed for {path}: {reason}")]
    SnapshotFailed {
        /// The snapshot path.
        path: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Error for when a tensor operation fails.
    #[error("Tensor operation failed: {operation}")]
    TensorOperationFailed {
        /// A description of the failed tensor operation.
        operation: String,
    },
}

/// A specialized `Result` type for few-shot segmentor operations.
pub type FewShotResult<T> = Result<T, FewShotError>;

impl FewShotError {
    pub(crate) fn shape(
        operation: &'static str,
        expected: impl Into<String>,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTensorShape {
            operation,
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }
}
