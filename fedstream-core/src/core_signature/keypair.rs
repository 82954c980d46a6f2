//! Keypair module
//!
//! Ed25519 signing keys for authors. The server itself never signs; this
//! exists for clients, the CLI and tests.
//!
//! Security: secret bytes are zeroized on drop.

use super::error::{SignatureError, SignatureResult};
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Ed25519 keypair; the signer id is the hex-encoded public key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    public: [u8; 32],
    secret: [u8; 32],
}

impl Keypair {
    /// Generate a fresh keypair from the thread-local CSPRNG
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_secret_bytes(seed)
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
        Keypair { public, secret }
    }

    /// Restore from a hex-encoded 32-byte secret seed
    pub fn from_secret_hex(secret_hex: &str) -> SignatureResult<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| SignatureError::Malformed(format!("secret key is not hex: {}", e)))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignatureError::Malformed("secret key must be 32 bytes".to_string()))?;
        Ok(Self::from_secret_bytes(secret))
    }

    /// Signer id embedded in payloads
    pub fn signer_id(&self) -> String {
        hex::encode(self.public)
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }

    /// Sign raw bytes; returns the 64-byte signature hex-encoded
    pub fn sign_hex(&self, payload: &[u8]) -> String {
        let signature = SigningKey::from_bytes(&self.secret).sign(payload);
        hex::encode(signature.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = Keypair::generate();
        assert_eq!(kp.signer_id().len(), 64);
        assert_ne!(Keypair::generate().signer_id(), kp.signer_id());
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(restored.signer_id(), kp.signer_id());
        assert!(Keypair::from_secret_hex("abcd").is_err());
        assert!(Keypair::from_secret_hex("zz").is_err());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let kp = Keypair::generate();
        let sig = kp.sign_hex(b"payload");
        assert_eq!(sig.len(), 128);
        assert_eq!(sig, kp.sign_hex(b"payload"));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let kp = Keypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.contains("<redacted>"));
        assert!(!debug_str.contains(&kp.secret_hex()));
    }
}
