//! Authoring errors
//!
//! Every variant means the call failed as a whole. Partial fan-out is not
//! an error; it is reported per stream in a `FanoutReport`.

use crate::core_signature::SignatureError;
use crate::core_store::StoreError;
use crate::core_stream::StreamError;
use thiserror::Error;

pub type AuthoringResult<T> = Result<T, AuthoringError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthoringError {
    /// Signature does not verify; nothing was persisted
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence failed before commit; the whole call is safe to retry
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Malformed payload, signature or request fields
    #[error("Validation failure: {0}")]
    ValidationFailure(String),
}

impl From<SignatureError> for AuthoringError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::Malformed(msg) => AuthoringError::ValidationFailure(msg),
            SignatureError::Invalid(msg) => AuthoringError::InvalidSignature(msg),
            SignatureError::UnknownSigner(signer) => {
                AuthoringError::InvalidSignature(format!("unknown signer {}", signer))
            }
        }
    }
}

impl From<StoreError> for AuthoringError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AuthoringError::NotFound(what),
            other => AuthoringError::StoreFailure(other.to_string()),
        }
    }
}

impl From<StreamError> for AuthoringError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidStream(msg) => AuthoringError::ValidationFailure(msg),
            other => AuthoringError::StoreFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_error_mapping() {
        assert!(matches!(
            AuthoringError::from(SignatureError::Malformed("x".into())),
            AuthoringError::ValidationFailure(_)
        ));
        assert!(matches!(
            AuthoringError::from(SignatureError::Invalid("x".into())),
            AuthoringError::InvalidSignature(_)
        ));
        assert!(matches!(
            AuthoringError::from(SignatureError::UnknownSigner("ab".into())),
            AuthoringError::InvalidSignature(_)
        ));
    }

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            AuthoringError::from(StoreError::NotFound("message m-1".into())),
            AuthoringError::NotFound("message m-1".into())
        );
        assert!(matches!(
            AuthoringError::from(StoreError::Storage("locked".into())),
            AuthoringError::StoreFailure(_)
        ));
    }
}
