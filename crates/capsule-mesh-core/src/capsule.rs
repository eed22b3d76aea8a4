//! Capsule model: `{manifest, payload, signature}` and the trust invariant.
//!
//! A capsule is trusted only when its payload hashes to `digest` AND `signature`
//! verifies over the payload with `publisher_public_key`. Nothing else about the
//! payload is interpreted here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{self, Keypair};
use crate::path_validation::{validate_capsule_name, NameError};

/// Why a capsule failed the trust invariant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrustError {
    #[error("digest mismatch: manifest says {expected}, payload hashes to {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("signature does not verify against publisher key {publisher}")]
    Untrusted { publisher: String },

    #[error("malformed manifest: {0}")]
    Malformed(String),
}

/// A named, immutable, signed content unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule {
    pub name: String,
    /// Lowercase hex SHA-256 of `payload`.
    pub digest: String,
    pub payload: Vec<u8>,
    /// Detached Ed25519 signature over `payload`.
    pub signature: Vec<u8>,
    /// Base64 Ed25519 public key.
    pub publisher_public_key: String,
}

/// Verification-relevant metadata that travels with the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleManifest {
    pub name: String,
    pub digest: String,
    /// Base64 signature.
    pub signature: String,
    pub publisher_public_key: String,
}

impl Capsule {
    /// Build and sign a capsule: computes the digest and signs the payload.
    pub fn publish(name: &str, payload: Vec<u8>, keypair: &Keypair) -> Result<Self, NameError> {
        validate_capsule_name(name)?;
        Ok(Self {
            name: name.to_string(),
            digest: identity::hash(&payload),
            signature: keypair.sign(&payload),
            publisher_public_key: keypair.public_key_base64(),
            payload,
        })
    }

    /// Reassemble a capsule from a received manifest and payload. Does not verify.
    pub fn from_parts(manifest: CapsuleManifest, payload: Vec<u8>) -> Result<Self, TrustError> {
        let signature = BASE64
            .decode(manifest.signature.trim())
            .map_err(|e| TrustError::Malformed(format!("signature: {e}")))?;
        Ok(Self {
            name: manifest.name,
            digest: manifest.digest,
            payload,
            signature,
            publisher_public_key: manifest.publisher_public_key,
        })
    }

    pub fn manifest(&self) -> CapsuleManifest {
        CapsuleManifest {
            name: self.name.clone(),
            digest: self.digest.clone(),
            signature: BASE64.encode(&self.signature),
            publisher_public_key: self.publisher_public_key.clone(),
        }
    }

    /// Check the trust invariant. Digest is checked first so a corrupted transfer
    /// reports as corruption rather than as a forgery.
    pub fn verify(&self) -> Result<(), TrustError> {
        let actual = identity::hash(&self.payload);
        if !actual.eq_ignore_ascii_case(&self.digest) {
            return Err(TrustError::DigestMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }
        if !identity::verify(&self.payload, &self.signature, &self.publisher_public_key) {
            return Err(TrustError::Untrusted {
                publisher: self.publisher_public_key.clone(),
            });
        }
        Ok(())
    }

    pub fn is_trusted(&self) -> bool {
        self.verify().is_ok()
    }
}
