//! Peer Catalog: live remote nodes and when each was last heard from.
//!
//! Populated from the Announcer's receive callback, read by the Fetch Coordinator.
//! A peer silent for longer than the liveness window is never returned by
//! [`PeerCatalog::snapshot`] and is dropped by the next eviction sweep.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// A discovered remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub node_id: String,
    /// Transfer Server address.
    pub address: SocketAddr,
    pub last_seen: Instant,
}

impl PeerRecord {
    /// Record for a peer heard from just now.
    pub fn observed(node_id: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            address,
            last_seen: Instant::now(),
        }
    }
}

/// Concurrency-safe registry of peers, keyed by node id.
#[derive(Debug)]
pub struct PeerCatalog {
    peers: RwLock<HashMap<String, PeerRecord>>,
    liveness_window: Duration,
}

impl PeerCatalog {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Insert a peer or refresh it. `last_seen` never moves backwards.
    pub fn upsert(&self, record: PeerRecord) {
        let mut peers = self.peers.write().unwrap_or_else(|p| p.into_inner());
        match peers.get_mut(&record.node_id) {
            Some(existing) => {
                if existing.address != record.address {
                    tracing::debug!(
                        peer = %record.node_id,
                        old = %existing.address,
                        new = %record.address,
                        "Peer address changed"
                    );
                    existing.address = record.address;
                }
                existing.last_seen = existing.last_seen.max(record.last_seen);
            }
            None => {
                tracing::info!(
                    peer = %record.node_id,
                    addr = %record.address,
                    "Discovered capsule peer"
                );
                peers.insert(record.node_id.clone(), record);
            }
        }
    }

    /// Drop a peer that withdrew its announcement.
    pub fn remove(&self, node_id: &str) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|p| p.into_inner());
        let removed = peers.remove(node_id).is_some();
        if removed {
            tracing::info!(peer = %node_id, "Peer withdrew");
        }
        removed
    }

    /// Live peers, most recently seen first (ties by node id).
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Vec<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|p| p.into_inner());
        let mut live: Vec<PeerRecord> = peers
            .values()
            .filter(|p| !is_stale(p, now, self.liveness_window))
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        live
    }

    /// Remove every peer last seen more than `liveness_window` before `now`. Returns the count.
    pub fn evict_stale(&self, now: Instant, liveness_window: Duration) -> usize {
        let mut peers = self.peers.write().unwrap_or_else(|p| p.into_inner());
        let before = peers.len();
        peers.retain(|node_id, p| {
            let keep = !is_stale(p, now, liveness_window);
            if !keep {
                tracing::info!(peer = %node_id, addr = %p.address, "Evicted stale peer");
            }
            keep
        });
        before - peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_stale(peer: &PeerRecord, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(peer.last_seen) > window
}

/// Run [`PeerCatalog::evict_stale`] every half liveness window until the task is aborted.
pub fn spawn_eviction_sweep(catalog: Arc<PeerCatalog>) -> tokio::task::JoinHandle<()> {
    let window = catalog.liveness_window();
    let period = (window / 2).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = catalog.evict_stale(Instant::now(), window);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = catalog.len(), "Eviction sweep");
            }
        }
    })
}
