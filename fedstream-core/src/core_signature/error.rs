//! Signature verification errors

use thiserror::Error;

pub type SignatureResult<T> = Result<T, SignatureError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Payload or signature is not in the expected shape
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Well-formed signature that does not cover the payload for this signer
    #[error("Invalid signature: {0}")]
    Invalid(String),

    /// No public key material could be resolved for the signer
    #[error("Unknown signer: {0}")]
    UnknownSigner(String),
}
