//! Local store commands: publish, list, show, remove.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

use capsule_mesh_core::{Capsule, CapsuleManifest, CapsuleStore, Keypair};

/// What `publish`, `show` and `fetch` print for a capsule.
#[derive(Debug, Serialize)]
pub struct CapsuleSummary {
    #[serde(flatten)]
    pub manifest: CapsuleManifest,
    pub size: usize,
}

impl From<&Capsule> for CapsuleSummary {
    fn from(capsule: &Capsule) -> Self {
        Self {
            manifest: capsule.manifest(),
            size: capsule.payload.len(),
        }
    }
}

fn open_store(store_dir: &Path) -> Result<CapsuleStore> {
    CapsuleStore::open(store_dir)
        .with_context(|| format!("Failed to open capsule store {}", store_dir.display()))
}

fn read_payload(file: &Path) -> Result<Vec<u8>> {
    if file.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read payload from stdin")?;
        return Ok(buf);
    }
    std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// `capsule-mesh publish NAME FILE`
pub fn cmd_publish(store_dir: &Path, name: &str, file: &Path, key: &Keypair) -> Result<Capsule> {
    let payload = read_payload(file)?;
    let capsule = Capsule::publish(name, payload, key)
        .with_context(|| format!("Invalid capsule name '{}'", name))?;
    open_store(store_dir)?
        .write(&capsule)
        .with_context(|| format!("Failed to store capsule '{}'", name))?;
    tracing::info!(capsule = %capsule.name, digest = %capsule.digest, "Published capsule");
    println!(
        "{}",
        serde_json::to_string_pretty(&CapsuleSummary::from(&capsule))?
    );
    Ok(capsule)
}

/// `capsule-mesh list`
pub fn cmd_list(store_dir: &Path) -> Result<Vec<String>> {
    let names = open_store(store_dir)?.list()?;
    for name in &names {
        println!("{}", name);
    }
    Ok(names)
}

/// `capsule-mesh show NAME`: reads through verification, so corrupt entries error out.
pub fn cmd_show(store_dir: &Path, name: &str) -> Result<CapsuleSummary> {
    let capsule = open_store(store_dir)?.read(name)?;
    let summary = CapsuleSummary::from(&capsule);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

/// `capsule-mesh remove NAME`
pub fn cmd_remove(store_dir: &Path, name: &str) -> Result<()> {
    if open_store(store_dir)?.remove(name)? {
        tracing::info!(capsule = %name, "Removed capsule");
        Ok(())
    } else {
        anyhow::bail!("Capsule not found: {}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_list_show_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, b"meeting notes").unwrap();
        let key = Keypair::from_seed(&[4u8; 32]);

        let capsule = cmd_publish(&store_dir, "notes", &file, &key).unwrap();
        assert_eq!(capsule.payload, b"meeting notes");
        assert_eq!(cmd_list(&store_dir).unwrap(), vec!["notes".to_string()]);

        let summary = cmd_show(&store_dir, "notes").unwrap();
        assert_eq!(summary.size, 13);
        assert_eq!(summary.manifest.digest, capsule.digest);

        cmd_remove(&store_dir, "notes").unwrap();
        assert!(cmd_list(&store_dir).unwrap().is_empty());
        assert!(cmd_remove(&store_dir, "notes").is_err());
    }

    #[test]
    fn test_publish_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let key = Keypair::from_seed(&[4u8; 32]);
        assert!(cmd_publish(&dir.path().join("s"), "bad/name", &file, &key).is_err());
    }

    #[test]
    fn test_show_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_show(dir.path(), "ghost").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
