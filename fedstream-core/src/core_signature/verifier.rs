/*
    verifier.rs - Signature gate for authored objects

    Verification runs over the exact bytes the client submitted. Nothing
    here parses, reorders or re-encodes the payload before checking it.

    Public keys are resolved through a KeyResolver. The default resolver
    treats the signer id as the hex-encoded Ed25519 public key, which is
    also the key of the author's registry Entity.
*/

use super::error::{SignatureError, SignatureResult};
use ed25519_dalek::{Signature, VerifyingKey};

/// Resolves a signer id to its current public key
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, signer: &str) -> SignatureResult<VerifyingKey>;
}

/// Signer id *is* the hex-encoded public key
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedKeyResolver;

impl KeyResolver for EmbeddedKeyResolver {
    fn resolve(&self, signer: &str) -> SignatureResult<VerifyingKey> {
        let bytes = hex::decode(signer)
            .map_err(|e| SignatureError::Malformed(format!("signer id is not hex: {}", e)))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SignatureError::Malformed(format!(
                "signer id must encode 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::UnknownSigner(signer.to_string()))
    }
}

/// Checks that `signer` produced `signature_hex` over `payload`
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signer: &str, signature_hex: &str) -> SignatureResult<()>;
}

/// Ed25519 verification with strict (non-malleable) signature checks
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier<R = EmbeddedKeyResolver> {
    resolver: R,
}

impl Ed25519Verifier<EmbeddedKeyResolver> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: KeyResolver> Ed25519Verifier<R> {
    pub fn with_resolver(resolver: R) -> Self {
        Ed25519Verifier { resolver }
    }
}

impl<R: KeyResolver> SignatureVerifier for Ed25519Verifier<R> {
    fn verify(&self, payload: &[u8], signer: &str, signature_hex: &str) -> SignatureResult<()> {
        let sig_bytes = hex::decode(signature_hex)
            .map_err(|e| SignatureError::Malformed(format!("signature is not hex: {}", e)))?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| {
            SignatureError::Malformed(format!(
                "signature must be 64 bytes, got {}",
                sig_bytes.len()
            ))
        })?;

        let key = self.resolver.resolve(signer)?;

        key.verify_strict(payload, &signature)
            .map_err(|_| SignatureError::Invalid(format!("signature does not match signer {}", signer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_signature::Keypair;

    const PAYLOAD: &str = r#"{"signer":"x","schema":"s","body":{"text":"hello"}}"#;

    #[test]
    fn test_valid_signature_verifies() {
        let kp = Keypair::generate();
        let sig = kp.sign_hex(PAYLOAD.as_bytes());
        let verifier = Ed25519Verifier::new();
        assert!(verifier.verify(PAYLOAD.as_bytes(), &kp.signer_id(), &sig).is_ok());
    }

    #[test]
    fn test_reserialized_payload_fails() {
        let kp = Keypair::generate();
        let sig = kp.sign_hex(PAYLOAD.as_bytes());

        // Same JSON value, different bytes
        let value: serde_json::Value = serde_json::from_str(PAYLOAD).unwrap();
        let pretty = serde_json::to_string_pretty(&value).unwrap();

        let verifier = Ed25519Verifier::new();
        assert!(matches!(
            verifier.verify(pretty.as_bytes(), &kp.signer_id(), &sig),
            Err(SignatureError::Invalid(_))
        ));
    }

    #[test]
    fn test_wrong_signer_fails() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let sig = kp.sign_hex(PAYLOAD.as_bytes());

        let verifier = Ed25519Verifier::new();
        assert!(matches!(
            verifier.verify(PAYLOAD.as_bytes(), &other.signer_id(), &sig),
            Err(SignatureError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let kp = Keypair::generate();
        let verifier = Ed25519Verifier::new();

        assert!(matches!(
            verifier.verify(PAYLOAD.as_bytes(), &kp.signer_id(), "not-hex"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verifier.verify(PAYLOAD.as_bytes(), &kp.signer_id(), "abcd"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verifier.verify(PAYLOAD.as_bytes(), "0x1234", &"00".repeat(64)),
            Err(SignatureError::Malformed(_))
        ));
    }

    struct FixedResolver(VerifyingKey);

    impl KeyResolver for FixedResolver {
        fn resolve(&self, _signer: &str) -> SignatureResult<VerifyingKey> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_custom_resolver() {
        let kp = Keypair::generate();
        let key = VerifyingKey::from_bytes(kp.public_key()).unwrap();
        let verifier = Ed25519Verifier::with_resolver(FixedResolver(key));

        let sig = kp.sign_hex(b"raw");
        assert!(verifier.verify(b"raw", "alias@host", &sig).is_ok());
    }
}
