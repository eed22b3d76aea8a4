//! CLI commands.
//!
//! - `keys`: keygen, loading the publisher key
//! - `capsule`: local store (publish, list, show, remove)
//! - `node`: networked (serve, peers, fetch)

pub mod capsule;
pub mod keys;
pub mod node;

use anyhow::{Context, Result};
use std::path::Path;

use capsule_mesh_core::config::MeshConfig;

/// Environment config with CLI overrides applied.
pub fn load_config(store_dir: Option<&Path>) -> MeshConfig {
    let mut config = MeshConfig::from_env();
    if let Some(dir) = store_dir {
        config.store_dir = dir.to_path_buf();
    }
    config
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}
