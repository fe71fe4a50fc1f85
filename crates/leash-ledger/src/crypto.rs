//! Cryptographic utilities for funding receipts
//!
//! Receipts are signed with Ed25519. Keys and signatures travel as
//! hex-encoded strings so receipts stay plain JSON.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use leash_types::{LeashError, Result};
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A keypair for signing receipts
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from a seed (32 bytes)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        hex::encode(signature.to_bytes())
    }
}

/// Verify a signature against a public key
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let public_key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| LeashError::InvalidSignature {
            reason: format!("Invalid public key hex: {}", e),
        })?
        .try_into()
        .map_err(|_| LeashError::InvalidSignature {
            reason: "Public key must be 32 bytes".to_string(),
        })?;

    let verifying_key =
        VerifyingKey::from_bytes(&public_key_bytes).map_err(|e| LeashError::InvalidSignature {
            reason: format!("Invalid public key: {}", e),
        })?;

    let signature_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| LeashError::InvalidSignature {
            reason: format!("Invalid signature hex: {}", e),
        })?
        .try_into()
        .map_err(|_| LeashError::InvalidSignature {
            reason: "Signature must be 64 bytes".to_string(),
        })?;

    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|e| LeashError::InvalidSignature {
            reason: format!("Signature mismatch: {}", e),
        })
}

/// Compute SHA256 hash of data
pub fn hash_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash any serializable object
pub fn hash_object<T: Serialize>(obj: &T) -> Result<String> {
    let json = serde_json::to_vec(obj)?;
    Ok(hash_sha256(&json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = Keypair::generate();
        assert_eq!(kp.public_key_hex().len(), 64); // 32 bytes = 64 hex chars
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::generate();
        let message = b"funding receipt payload";
        let signature = kp.sign(message);

        assert!(verify_signature(&kp.public_key_hex(), message, &signature).is_ok());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let kp = Keypair::generate();
        let signature = kp.sign(b"original");

        assert!(verify_signature(&kp.public_key_hex(), b"tampered", &signature).is_err());
    }

    #[test]
    fn test_hash_object_is_stable() {
        #[derive(Serialize)]
        struct Payload {
            label: String,
            value: u64,
        }

        let payload = Payload {
            label: "limit".to_string(),
            value: 30000,
        };

        let hash = hash_object(&payload).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_object(&payload).unwrap());
    }
}
