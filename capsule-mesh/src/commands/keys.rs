use anyhow::{Context, Result};
use std::path::Path;

use capsule_mesh_core::identity::{load_keypair, save_keypair};
use capsule_mesh_core::{KeyError, Keypair};

/// `capsule-mesh keygen`: write a fresh key file and print its public key.
pub fn cmd_keygen(path: &Path, force: bool) -> Result<()> {
    let pair = Keypair::generate();
    match save_keypair(path, &pair, force) {
        Ok(()) => {}
        Err(KeyError::AlreadyExists(p)) => {
            anyhow::bail!("Key file {} already exists (use --force to overwrite)", p)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to write key file {}", path.display()))
        }
    }
    tracing::info!(path = %path.display(), "Generated publisher key");
    println!("{}", pair.public_key_base64());
    Ok(())
}

/// The publisher key at `path`, with a hint when it does not exist yet.
pub fn load_publisher(path: &Path) -> Result<Keypair> {
    if !path.exists() {
        anyhow::bail!(
            "No publisher key at {}. Run `capsule-mesh keygen` first.",
            path.display()
        );
    }
    load_keypair(path).with_context(|| format!("Failed to load key file {}", path.display()))
}
