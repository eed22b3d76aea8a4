//! Networked commands. `peers` and `fetch` run a short-lived node on an ephemeral
//! port so they can share a machine with a running `serve`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use capsule_mesh_core::config::MeshConfig;
use capsule_mesh_swarm::{serve_mesh, start_node, CapsuleKey, PeerRecord};

use super::capsule::CapsuleSummary;
use super::runtime;

const EPHEMERAL_LISTEN: &str = "0.0.0.0:0";

/// `capsule-mesh serve`
pub fn cmd_serve(mut config: MeshConfig, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    runtime()?.block_on(serve_mesh(config))
}

#[derive(Debug, Serialize)]
struct PeerView {
    node_id: String,
    address: SocketAddr,
    last_seen_ms_ago: u64,
}

impl From<&PeerRecord> for PeerView {
    fn from(peer: &PeerRecord) -> Self {
        Self {
            node_id: peer.node_id.clone(),
            address: peer.address,
            last_seen_ms_ago: peer.last_seen.elapsed().as_millis() as u64,
        }
    }
}

/// Short-lived node settings: ephemeral port and its own node id, so a `serve`
/// pinned by `CAPSULE_MESH_NODE_ID` on the same machine is still seen as a peer.
fn ephemeral(mut config: MeshConfig) -> MeshConfig {
    config.listen = EPHEMERAL_LISTEN.to_string();
    config.node_id = format!("{}-{}", config.node_id, uuid::Uuid::new_v4());
    config
}

/// `capsule-mesh peers`
pub fn cmd_peers(config: MeshConfig, wait: u64) -> Result<()> {
    let config = ephemeral(config);
    runtime()?.block_on(async move {
        let running = start_node(config).await?;
        tokio::time::sleep(Duration::from_secs(wait)).await;
        let peers: Vec<PeerView> = running
            .node()
            .catalog()
            .snapshot()
            .iter()
            .map(PeerView::from)
            .collect();
        println!("{}", serde_json::to_string_pretty(&peers)?);
        running.shutdown().await
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum FetchReport {
    Fetched {
        key: String,
        #[serde(flatten)]
        capsule: CapsuleSummary,
    },
    Failed {
        key: String,
        error: String,
    },
}

pub struct FetchArgs<'a> {
    pub keys: &'a [String],
    pub peers: &'a [SocketAddr],
    pub wait: u64,
    pub deadline_ms: Option<u64>,
    pub out: Option<&'a Path>,
}

/// `capsule-mesh fetch KEY..`: all keys fetched concurrently; fails if any key failed.
pub fn cmd_fetch(mut config: MeshConfig, args: FetchArgs<'_>) -> Result<()> {
    let keys = args
        .keys
        .iter()
        .map(|raw| CapsuleKey::parse(raw).with_context(|| format!("Invalid capsule key '{}'", raw)))
        .collect::<Result<Vec<_>>>()?;
    if let Some(ms) = args.deadline_ms {
        config.fetch_deadline = Some(Duration::from_millis(ms));
    }
    let config = ephemeral(config);
    if let Some(dir) = args.out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let total = keys.len();
    let failed = runtime()?.block_on(async move {
        let running = start_node(config).await?;
        if args.wait > 0 {
            tracing::info!(wait_secs = args.wait, "Discovering peers");
            tokio::time::sleep(Duration::from_secs(args.wait)).await;
        }
        for addr in args.peers {
            running.add_static_peer(*addr);
        }
        tracing::info!(
            peers = running.node().catalog().len(),
            keys = keys.len(),
            "Fetching capsules"
        );

        let node = running.node().clone();
        let outcomes =
            futures_util::future::join_all(keys.iter().map(|key| node.fetch(key))).await;

        let mut failed = 0usize;
        for (key, outcome) in keys.iter().zip(outcomes) {
            let report = match outcome {
                Ok(capsule) => {
                    if let Some(dir) = args.out {
                        let target = dir.join(&capsule.name);
                        std::fs::write(&target, &capsule.payload)
                            .with_context(|| format!("Failed to write {}", target.display()))?;
                    }
                    FetchReport::Fetched {
                        key: key.to_string(),
                        capsule: CapsuleSummary::from(&capsule),
                    }
                }
                Err(e) => {
                    failed += 1;
                    FetchReport::Failed {
                        key: key.to_string(),
                        error: e.to_string(),
                    }
                }
            };
            println!("{}", serde_json::to_string(&report)?);
        }
        running.shutdown().await?;
        Ok::<_, anyhow::Error>(failed)
    })?;

    if failed > 0 {
        anyhow::bail!("{} of {} fetches failed", failed, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_mesh_core::Capsule;

    #[test]
    fn test_invalid_key_fails_before_networking() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MeshConfig::from_env();
        config.store_dir = dir.path().to_path_buf();
        let keys = vec!["../etc/passwd".to_string()];
        let err = cmd_fetch(
            config,
            FetchArgs {
                keys: &keys,
                peers: &[],
                wait: 0,
                deadline_ms: None,
                out: None,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid capsule key"));
    }

    #[test]
    fn test_ephemeral_node_gets_its_own_id() {
        let mut config = MeshConfig::from_env();
        config.node_id = "pinned".to_string();
        config.listen = "0.0.0.0:7400".to_string();

        let first = ephemeral(config.clone());
        let second = ephemeral(config.clone());
        assert_ne!(first.node_id, config.node_id);
        assert_ne!(first.node_id, second.node_id);
        assert!(first.node_id.starts_with("pinned-"));
        assert_eq!(first.listen, EPHEMERAL_LISTEN);
        assert_eq!(first.store_dir, config.store_dir);
    }

    #[test]
    fn test_fetch_report_shape() {
        let pair = capsule_mesh_core::Keypair::from_seed(&[8u8; 32]);
        let capsule = Capsule::publish("doc", b"abc".to_vec(), &pair).unwrap();
        let report = FetchReport::Fetched {
            key: "doc".into(),
            capsule: CapsuleSummary::from(&capsule),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "fetched");
        assert_eq!(value["name"], "doc");
        assert_eq!(value["size"], 3);

        let failed = FetchReport::Failed {
            key: "x".into(),
            error: "boom".into(),
        };
        assert_eq!(serde_json::to_value(&failed).unwrap()["status"], "failed");
    }
}
