//! Capsule Mesh networking: presence, peer catalog, transfer and verified fetch.
//!
//! This crate implements the node daemon for `capsule-mesh serve --listen <ADDR>`:
//! - **Discovery**: periodic mDNS presence announcements and browsing for peer nodes
//! - **Catalog**: live peers with liveness-window eviction
//! - **HTTP transfer**: read-only capsule server and client transport
//! - **Fetch**: local-first, single-flight, verify-every-response coordinator

mod catalog;
mod discovery;
mod fetch;
mod handler;
mod key;
mod node;
pub mod protocol;
mod server;
mod transport;

pub use catalog::{spawn_eviction_sweep, PeerCatalog, PeerRecord};
pub use discovery::{
    Announcer, DiscoveryError, MdnsChannel, PresenceChannel, PresenceEvent, PresenceRecord,
    SERVICE_TYPE,
};
pub use fetch::{FetchCoordinator, FetchCoordinatorBuilder, FetchError, FetchObserver, TrustPolicy};
pub use handler::{parse_listen_addr, serve_mesh, start_node, start_node_with, RunningNode};
pub use key::CapsuleKey;
pub use node::MeshNode;
pub use server::router;
pub use transport::{HttpTransport, PeerFailure, PeerFailureKind, PeerTransport};
