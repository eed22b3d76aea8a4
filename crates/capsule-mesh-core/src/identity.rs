//! Publisher identity: SHA-256 content digests and Ed25519 detached signatures.
//!
//! Public keys and signatures travel as standard base64; digests as lowercase hex.
//! [`verify`] never errors: a malformed key or signature is simply not a proof.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors from decoding or persisting key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key encoding: {0}")]
    Encoding(String),

    #[error("Key file already exists: {0}")]
    AlreadyExists(String),

    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Content digest of `payload`: lowercase hex SHA-256.
pub fn hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Signing key pair of a capsule publisher.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random key pair from the OS RNG.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Deterministic key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Decode a base64 secret key (32-byte seed).
    pub fn from_secret_base64(secret: &str) -> Result<Self, KeyError> {
        let bytes = BASE64
            .decode(secret.trim())
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Encoding("secret key must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Base64 public key, the form carried in capsule manifests.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn secret_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        sign(payload, &self.signing_key)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Generate a key pair, returning `(public_key_base64, signing_key)`.
pub fn generate_keypair() -> (String, SigningKey) {
    let pair = Keypair::generate();
    (pair.public_key_base64(), pair.signing_key)
}

/// Detached Ed25519 signature over exactly `payload`.
pub fn sign(payload: &[u8], private_key: &SigningKey) -> Vec<u8> {
    private_key.sign(payload).to_bytes().to_vec()
}

/// True iff `signature` was produced over `payload` by the holder of `public_key_b64`.
pub fn verify(payload: &[u8], signature: &[u8], public_key_b64: &str) -> bool {
    let Ok(pk_bytes) = BASE64.decode(public_key_b64.trim()) else {
        return false;
    };
    let Ok(pk_array): Result<[u8; 32], _> = pk_bytes.try_into() else {
        return false;
    };
    let Ok(sig_array): Result<[u8; 64], _> = signature.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_array) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);
    verifying_key.verify(payload, &signature).is_ok()
}

/// On-disk key file: `{ "public_key": .., "secret_key": .. }`, both base64.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    public_key: String,
    secret_key: String,
}

/// Load a key pair written by [`save_keypair`]. The stored public key must match the secret.
pub fn load_keypair(path: &Path) -> Result<Keypair, KeyError> {
    let content = fs::read_to_string(path)?;
    let file: KeyFile = serde_json::from_str(&content)?;
    let pair = Keypair::from_secret_base64(&file.secret_key)?;
    if pair.public_key_base64() != file.public_key.trim() {
        return Err(KeyError::Encoding(format!(
            "public key in {} does not match its secret key",
            path.display()
        )));
    }
    Ok(pair)
}

/// Write `pair` to `path` (owner-only permissions on unix). Refuses to overwrite unless `force`.
pub fn save_keypair(path: &Path, pair: &Keypair, force: bool) -> Result<(), KeyError> {
    if path.exists() && !force {
        return Err(KeyError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = KeyFile {
        public_key: pair.public_key_base64(),
        secret_key: pair.secret_key_base64(),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
