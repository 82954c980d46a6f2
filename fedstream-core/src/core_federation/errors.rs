//! Federation registry errors

use crate::core_store::StoreError;
use thiserror::Error;

pub type FederationResult<T> = Result<T, FederationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FederationError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    Conflict(String),

    #[error("Invalid entity: {0}")]
    Invalid(String),

    #[error("Peer {peer} unavailable: {reason}")]
    PeerUnavailable { peer: String, reason: String },

    #[error("Store failure: {0}")]
    Store(String),
}

impl From<StoreError> for FederationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => FederationError::NotFound(what),
            StoreError::Conflict(what) => FederationError::Conflict(what),
            other => FederationError::Store(other.to_string()),
        }
    }
}
