//! Environment variable names.
//!
//! Everything uses the `CAPSULE_MESH_*` prefix.

/// Local store and signing key
pub mod paths {
    pub const CAPSULE_MESH_STORE_DIR: &str = "CAPSULE_MESH_STORE_DIR";
    pub const STORE_DIR_ALIASES: &[&str] = &["CAPSULE_STORE_DIR"];

    pub const CAPSULE_MESH_KEY_FILE: &str = "CAPSULE_MESH_KEY_FILE";
}

/// Node identity, listen address and discovery timing
pub mod node {
    pub const CAPSULE_MESH_NODE_ID: &str = "CAPSULE_MESH_NODE_ID";
    pub const CAPSULE_MESH_LISTEN: &str = "CAPSULE_MESH_LISTEN";

    /// Presence broadcast period in milliseconds. Default 2000.
    pub const CAPSULE_MESH_ANNOUNCE_INTERVAL_MS: &str = "CAPSULE_MESH_ANNOUNCE_INTERVAL_MS";
    /// Missed intervals before a peer is evicted. Default 3.
    pub const CAPSULE_MESH_LIVENESS_INTERVALS: &str = "CAPSULE_MESH_LIVENESS_INTERVALS";
}

/// Fetch policy
pub mod fetch {
    /// Per-peer request timeout in milliseconds. Default 3000.
    pub const CAPSULE_MESH_PEER_TIMEOUT_MS: &str = "CAPSULE_MESH_PEER_TIMEOUT_MS";
    /// Optional overall caller deadline in milliseconds.
    pub const CAPSULE_MESH_FETCH_DEADLINE_MS: &str = "CAPSULE_MESH_FETCH_DEADLINE_MS";
    /// Comma separated base64 publisher keys. Empty = accept any valid signature.
    pub const CAPSULE_MESH_TRUSTED_PUBLISHERS: &str = "CAPSULE_MESH_TRUSTED_PUBLISHERS";
}

/// Logging
pub mod observability {
    pub const CAPSULE_MESH_QUIET: &str = "CAPSULE_MESH_QUIET";
    pub const CAPSULE_MESH_LOG_LEVEL: &str = "CAPSULE_MESH_LOG_LEVEL";
    pub const CAPSULE_MESH_LOG_JSON: &str = "CAPSULE_MESH_LOG_JSON";
    pub const CAPSULE_MESH_SECURITY_EVENTS_LOG: &str = "CAPSULE_MESH_SECURITY_EVENTS_LOG";
}
