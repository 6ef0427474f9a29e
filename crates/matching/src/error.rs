use thiserror::Error;

use tally_core::{StoreError, ValidationError};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The requested transition is not legal from the record's current state.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MatchError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        MatchError::NotFound(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;
