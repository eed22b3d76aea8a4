//! Transfer wire protocol shared by the server and the HTTP transport.
//!
//! - `GET /capsules` → `{"names": [..]}`
//! - `GET /capsules/{name}` / `GET /digests/{digest}` → raw payload body, manifest in
//!   `x-capsule-*` headers; `404 {"error":"not_found"}` when absent
//! - `GET /health` → `{"status":"ok","node_id":..}`

use serde::{Deserialize, Serialize};

pub const HEADER_NAME: &str = "x-capsule-name";
pub const HEADER_DIGEST: &str = "x-capsule-digest";
pub const HEADER_SIGNATURE: &str = "x-capsule-signature";
pub const HEADER_PUBLISHER: &str = "x-capsule-publisher";

/// Upper bound on a payload accepted from a peer.
pub const MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `not_found`, `corrupt_entry`, `bad_request` or `internal`.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}
