//! Signature gate
//!
//! Every authored object passes through a [`SignatureVerifier`] before it
//! is persisted. A failed check is terminal: the caller persists nothing.

pub mod error;
pub mod keypair;
pub mod payload;
pub mod verifier;

pub use error::{SignatureError, SignatureResult};
pub use keypair::Keypair;
pub use payload::SignedPayload;
pub use verifier::{Ed25519Verifier, EmbeddedKeyResolver, KeyResolver, SignatureVerifier};
