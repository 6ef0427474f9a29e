use thiserror::Error;

use crate::expected::ExpectedStatus;

/// Input rejected before any write happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Expected amount must be positive, got {0}")]
    NonPositiveAmount(String),
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrency(String),
    #[error("A reason is required to skip an expected transaction")]
    MissingSkipReason,
    #[error("Status cannot be set to {0} directly")]
    StatusNotEditable(ExpectedStatus),
    #[error("Confidence threshold must be between 0 and 100, got {0}")]
    ThresholdOutOfRange(u32),
}

/// Failure reported by an expectation or transaction store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded write found the record already claimed or changed underneath it.
    #[error("Conflicting update: {0}")]
    Conflict(String),
    /// The record disappeared between the engine's read and its write.
    #[error("Record vanished during write: {0}")]
    Missing(String),
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}
