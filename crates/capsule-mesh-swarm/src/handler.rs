//! Node daemon: store, Transfer Server, Announcer, Peer Catalog and eviction sweep
//! wired together; `serve_mesh` blocks until Ctrl+C.

use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use capsule_mesh_core::config::MeshConfig;

use crate::catalog::{spawn_eviction_sweep, PeerRecord};
use crate::discovery::{Announcer, MdnsChannel, PresenceChannel, PresenceRecord};
use crate::node::MeshNode;
use crate::server;

/// Parse listen address "host:port" into (host, port).
pub fn parse_listen_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port_str) = match addr.rsplit_once(':') {
        Some(("", p)) => ("0.0.0.0", p),
        Some((h, p)) => (h.trim_start_matches('[').trim_end_matches(']'), p),
        None if addr.parse::<u16>().is_ok() => ("0.0.0.0", addr),
        None => anyhow::bail!("Invalid listen address: expected host:port or :port, got {}", addr),
    };
    let port: u16 = port_str.parse().context("Invalid port number")?;
    Ok((host.to_string(), port))
}

/// Address peers should dial. A wildcard bind is announced as this machine's LAN IP.
fn announce_host(bind_host: &str) -> String {
    match bind_host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => match local_ip_address::local_ip() {
            Ok(lan) => lan.to_string(),
            Err(e) => {
                tracing::warn!(err = %e, "Could not determine LAN address; announcing loopback");
                "127.0.0.1".to_string()
            }
        },
        _ => bind_host.to_string(),
    }
}

/// A started node. Drop without [`shutdown`](Self::shutdown) leaves the server task running
/// until the runtime exits.
pub struct RunningNode {
    node: Arc<MeshNode>,
    local_addr: SocketAddr,
    announcer: Arc<Announcer>,
    sweep: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl RunningNode {
    pub fn node(&self) -> &Arc<MeshNode> {
        &self.node
    }

    /// Bound Transfer Server address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Seed the catalog with a manually supplied peer (`static:<addr>`).
    pub fn add_static_peer(&self, address: SocketAddr) {
        let node_id = format!("static:{address}");
        tracing::info!(peer = %node_id, "Adding static peer");
        self.node.catalog().upsert(PeerRecord::observed(node_id, address));
    }

    pub async fn shutdown(mut self) -> Result<()> {
        let announcer = self.announcer.clone();
        tokio::task::spawn_blocking(move || announcer.stop())
            .await
            .context("Announcer shutdown panicked")?;
        self.sweep.abort();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.server
            .await
            .context("Transfer server task panicked")?
            .context("Transfer server failed")?;
        tracing::info!(node = %self.node.node_id(), "Capsule node stopped");
        Ok(())
    }
}

/// Start a node announcing over mDNS.
pub async fn start_node(config: MeshConfig) -> Result<RunningNode> {
    start_node_with(config, Arc::new(MdnsChannel::new())).await
}

/// Start a node on an arbitrary presence channel. Bind failures of the Transfer
/// Server or the channel are returned.
pub async fn start_node_with(
    config: MeshConfig,
    channel: Arc<dyn PresenceChannel>,
) -> Result<RunningNode> {
    let (host, port) = parse_listen_addr(&config.listen)?;
    let node = MeshNode::new(&config).with_context(|| {
        format!("Failed to open capsule store {}", config.store_dir.display())
    })?;
    let node = Arc::new(node);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind transfer server on {}", config.listen))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    let app = server::router(node.store().clone(), node.node_id());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let announcer = Arc::new(Announcer::new(channel));
    let self_id = node.node_id().to_string();
    let catalog = node.catalog().clone();
    announcer.on_peer_announced(move |record| {
        if record.node_id == self_id {
            return;
        }
        match record.socket_addr() {
            Some(address) => catalog.upsert(PeerRecord::observed(record.node_id.clone(), address)),
            None => tracing::debug!(
                peer = %record.node_id,
                host = %record.host,
                "Ignoring announcement without an IP address"
            ),
        }
    });
    let catalog = node.catalog().clone();
    announcer.on_peer_withdrawn(move |node_id| {
        catalog.remove(node_id);
    });

    let record = PresenceRecord {
        node_id: node.node_id().to_string(),
        host: announce_host(&host),
        port: local_addr.port(),
    };
    let start = {
        let announcer = announcer.clone();
        let interval = config.announce_interval;
        tokio::task::spawn_blocking(move || announcer.start(interval, record)).await
    };
    if let Err(e) = start
        .context("Announcer start panicked")
        .and_then(|r| r.context("Failed to start announcer"))
    {
        let _ = shutdown_tx.send(());
        let _ = server.await;
        return Err(e);
    }

    let sweep = spawn_eviction_sweep(node.catalog().clone());

    tracing::info!(
        node = %node.node_id(),
        listen = %local_addr,
        store = %config.store_dir.display(),
        "Capsule node started"
    );
    Ok(RunningNode {
        node,
        local_addr,
        announcer,
        sweep,
        shutdown_tx: Some(shutdown_tx),
        server,
    })
}

/// Run the node daemon until Ctrl+C.
pub async fn serve_mesh(config: MeshConfig) -> Result<()> {
    let running = start_node(config).await?;
    tracing::info!(
        listen = %running.local_addr(),
        node = %running.node().node_id(),
        "Capsule mesh node running (mDNS discovery active). Press Ctrl+C to stop."
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to set Ctrl+C handler")?;
    tracing::info!("Received Ctrl+C, shutting down capsule node...");
    running.shutdown().await
}
