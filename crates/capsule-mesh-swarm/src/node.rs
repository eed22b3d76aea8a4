//! MeshNode: the collaborator-facing surface: fetch, list and publish.

use std::sync::Arc;

use capsule_mesh_core::config::MeshConfig;
use capsule_mesh_core::{Capsule, CapsuleStore, Keypair, StoreError};

use crate::catalog::PeerCatalog;
use crate::fetch::{FetchCoordinator, FetchError, TrustPolicy};
use crate::key::CapsuleKey;
use crate::transport::{HttpTransport, PeerTransport};

pub struct MeshNode {
    config: MeshConfig,
    store: Arc<CapsuleStore>,
    catalog: Arc<PeerCatalog>,
    coordinator: FetchCoordinator,
}

impl MeshNode {
    /// Open the store and wire a coordinator that talks HTTP to peers.
    pub fn new(config: &MeshConfig) -> Result<Self, StoreError> {
        let transport = Arc::new(HttpTransport::new(config.peer_timeout));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: &MeshConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(CapsuleStore::open(&config.store_dir)?);
        let catalog = Arc::new(PeerCatalog::new(config.liveness_window()));
        let coordinator = FetchCoordinator::builder(store.clone(), catalog.clone(), transport)
            .policy(TrustPolicy::allowlist(config.trusted_publishers.iter().cloned()))
            .peer_timeout(config.peer_timeout)
            .build();
        Ok(Self {
            config: config.clone(),
            store,
            catalog,
            coordinator,
        })
    }

    /// Fetch through the coordinator, bounded by the configured deadline if any.
    pub async fn fetch(&self, key: &CapsuleKey) -> Result<Capsule, FetchError> {
        match self.config.fetch_deadline {
            Some(deadline) => self.coordinator.fetch_with_deadline(key, deadline).await,
            None => self.coordinator.fetch(key).await,
        }
    }

    pub fn list_local(&self) -> Result<Vec<String>, StoreError> {
        self.store.list()
    }

    /// Hash, sign and store `payload` under `name`.
    pub fn publish(
        &self,
        name: &str,
        payload: Vec<u8>,
        keypair: &Keypair,
    ) -> Result<Capsule, StoreError> {
        let capsule = Capsule::publish(name, payload, keypair)?;
        self.store.write(&capsule)?;
        tracing::info!(
            capsule = %capsule.name,
            digest = %capsule.digest,
            publisher = %capsule.publisher_public_key,
            "Published capsule"
        );
        Ok(capsule)
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CapsuleStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<PeerCatalog> {
        &self.catalog
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }
}
