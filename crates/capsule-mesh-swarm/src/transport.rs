//! Peer transport: how the fetch coordinator talks to another node's Transfer Server.
//!
//! Capsules returned here are NOT verified; the caller checks them.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use capsule_mesh_core::{Capsule, CapsuleManifest};

use crate::catalog::PeerRecord;
use crate::key::CapsuleKey;
use crate::protocol::{
    ListResponse, HEADER_DIGEST, HEADER_NAME, HEADER_PUBLISHER, HEADER_SIGNATURE,
    MAX_PAYLOAD_BYTES,
};

/// Why a single peer could not supply a capsule. Recovered inside the coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerFailure {
    #[error("peer does not have the capsule")]
    NotFound,

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer returned a corrupt capsule: {0}")]
    Corrupt(String),

    #[error("peer returned an untrusted capsule: {0}")]
    Untrusted(String),

    #[error("peer protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerFailureKind {
    NotFound,
    Unreachable,
    Corrupt,
    Untrusted,
    Protocol,
}

impl PeerFailure {
    pub fn kind(&self) -> PeerFailureKind {
        match self {
            PeerFailure::NotFound => PeerFailureKind::NotFound,
            PeerFailure::Unreachable(_) => PeerFailureKind::Unreachable,
            PeerFailure::Corrupt(_) => PeerFailureKind::Corrupt,
            PeerFailure::Untrusted(_) => PeerFailureKind::Untrusted,
            PeerFailure::Protocol(_) => PeerFailureKind::Protocol,
        }
    }
}

impl fmt::Display for PeerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerFailureKind::NotFound => "not_found",
            PeerFailureKind::Unreachable => "unreachable",
            PeerFailureKind::Corrupt => "corrupt",
            PeerFailureKind::Untrusted => "untrusted",
            PeerFailureKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Names the peer serves.
    async fn list_capsules(&self, peer: &PeerRecord) -> Result<Vec<String>, PeerFailure>;

    /// One capsule by name or digest, unverified.
    async fn get_capsule(
        &self,
        peer: &PeerRecord,
        key: &CapsuleKey,
    ) -> Result<Capsule, PeerFailure>;
}

/// [`PeerTransport`] over the HTTP transfer protocol.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` bounds each request end to end.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    err = %e,
                    "Failed to build HTTP client with timeouts; using defaults"
                );
                reqwest::Client::new()
            });
        Self { client }
    }

    fn url(peer: &PeerRecord, path: &str) -> String {
        format!("http://{}{}", peer.address, path)
    }

    fn capsule_path(key: &CapsuleKey) -> String {
        match key {
            CapsuleKey::Name(name) => format!("/capsules/{}", urlencoding::encode(name)),
            CapsuleKey::Digest(digest) => format!("/digests/{}", digest),
        }
    }
}

fn unreachable(e: reqwest::Error) -> PeerFailure {
    if e.is_decode() {
        PeerFailure::Protocol(e.to_string())
    } else {
        PeerFailure::Unreachable(e.to_string())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, PeerFailure> {
    headers
        .get(name)
        .ok_or_else(|| PeerFailure::Protocol(format!("missing header {name}")))?
        .to_str()
        .map_err(|_| PeerFailure::Protocol(format!("non-ASCII header {name}")))
}

/// Manifest carried in `x-capsule-*` response headers.
fn manifest_from_headers(headers: &HeaderMap) -> Result<CapsuleManifest, PeerFailure> {
    let name = urlencoding::decode(header(headers, HEADER_NAME)?)
        .map_err(|e| PeerFailure::Protocol(format!("bad {HEADER_NAME}: {e}")))?
        .into_owned();
    Ok(CapsuleManifest {
        name,
        digest: header(headers, HEADER_DIGEST)?.to_string(),
        signature: header(headers, HEADER_SIGNATURE)?.to_string(),
        publisher_public_key: header(headers, HEADER_PUBLISHER)?.to_string(),
    })
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn list_capsules(&self, peer: &PeerRecord) -> Result<Vec<String>, PeerFailure> {
        let resp = self
            .client
            .get(Self::url(peer, "/capsules"))
            .send()
            .await
            .map_err(unreachable)?;
        if !resp.status().is_success() {
            return Err(PeerFailure::Protocol(format!(
                "list returned {}",
                resp.status()
            )));
        }
        let body: ListResponse = resp.json().await.map_err(unreachable)?;
        Ok(body.names)
    }

    async fn get_capsule(
        &self,
        peer: &PeerRecord,
        key: &CapsuleKey,
    ) -> Result<Capsule, PeerFailure> {
        let url = Self::url(peer, &Self::capsule_path(key));
        let mut resp = self.client.get(&url).send().await.map_err(unreachable)?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(PeerFailure::NotFound),
            status => {
                return Err(PeerFailure::Protocol(format!("GET {url} returned {status}")));
            }
        }

        if resp.content_length().unwrap_or(0) > MAX_PAYLOAD_BYTES {
            return Err(PeerFailure::Protocol(format!(
                "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }
        let manifest = manifest_from_headers(resp.headers())?;

        let mut payload = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(unreachable)? {
            if payload.len() as u64 + chunk.len() as u64 > MAX_PAYLOAD_BYTES {
                return Err(PeerFailure::Protocol(format!(
                    "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
                )));
            }
            payload.extend_from_slice(&chunk);
        }

        Capsule::from_parts(manifest, payload).map_err(|e| PeerFailure::Corrupt(e.to_string()))
    }
}
