//! Identity keypair for relay-authored signing.
//!
//! Used to sign moderation decisions and resolution tickets so they carry
//! the same kind of event-level signature client-submitted events do
//! (SPEC_FULL.md §4.4). `X25519`/`ChaCha20Poly1305` session crypto (the
//! teacher's peer-to-peer transport handshake) has no counterpart here and
//! was dropped in the final trim pass.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}

/// Ed25519 keypair for signing and identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from seed bytes (for deterministic testing)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature
    pub fn verify(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &[u8; 64],
    ) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let sig = Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let kp = KeyPair::generate();
        let msg = b"hello world";
        let sig = kp.sign(msg);

        assert!(KeyPair::verify(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn test_seeded_keypair_is_deterministic() {
        let a = KeyPair::from_seed(&[4u8; 32]);
        let b = KeyPair::from_seed(&[4u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_wrong_signature_fails() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = other.sign(b"hello");
        assert!(KeyPair::verify(&kp.public_key(), b"hello", &sig).is_err());
    }
}
