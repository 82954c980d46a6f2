/*
    payload.rs - Signed payload envelope

    Clients sign the raw JSON text of an object. The server only needs a
    handful of fields from it (who signed, which schema, what it targets);
    the text itself is kept untouched for storage and verification.
*/

use super::error::{SignatureError, SignatureResult};
use serde::Deserialize;
use serde_json::Value;

/// Fields the server reads out of a signed payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignedPayload {
    /// Hex-encoded Ed25519 public key of the author
    pub signer: String,
    /// Type discriminator URI
    pub schema: String,
    /// Annotated object, present on associations
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, rename = "signedAt")]
    pub signed_at: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl SignedPayload {
    /// Parse the envelope; the input must be a JSON object with a
    /// non-empty `signer` and `schema`
    pub fn parse(raw: &str) -> SignatureResult<Self> {
        let payload: SignedPayload = serde_json::from_str(raw)
            .map_err(|e| SignatureError::Malformed(format!("payload is not a signed object: {}", e)))?;

        if payload.signer.trim().is_empty() {
            return Err(SignatureError::Malformed("payload has an empty signer".to_string()));
        }
        if payload.schema.trim().is_empty() {
            return Err(SignatureError::Malformed("payload has an empty schema".to_string()));
        }

        Ok(payload)
    }
}
