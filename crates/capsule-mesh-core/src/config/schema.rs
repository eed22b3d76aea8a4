//! Config structs, grouped by concern.
//!
//! Loaded from the environment through `loader`.

use super::env_keys::{fetch as fetch_keys, node, observability as obv_keys, paths};
use super::loader::{env_bool, env_duration_ms, env_optional, env_or};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:7780";
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_LIVENESS_INTERVALS: u32 = 3;
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_millis(3000);

/// Node configuration: where capsules live, how this node announces itself,
/// and how fetches treat remote peers.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub store_dir: PathBuf,
    pub key_file: PathBuf,
    pub node_id: String,
    pub listen: String,
    pub announce_interval: Duration,
    pub liveness_intervals: u32,
    pub peer_timeout: Duration,
    pub fetch_deadline: Option<Duration>,
    /// Base64 publisher keys accepted by fetch. Empty accepts any valid signature.
    pub trusted_publishers: Vec<String>,
}

impl MeshConfig {
    /// Load from the environment (and `.env`). Empty values take the default.
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let store_dir = env_optional(paths::CAPSULE_MESH_STORE_DIR, paths::STORE_DIR_ALIASES)
            .map(PathBuf::from)
            .unwrap_or_else(|| mesh_home().join("capsules"));
        let key_file = env_optional(paths::CAPSULE_MESH_KEY_FILE, &[])
            .map(PathBuf::from)
            .unwrap_or_else(|| mesh_home().join("identity.key.json"));
        let node_id = env_or(node::CAPSULE_MESH_NODE_ID, &[], || {
            uuid::Uuid::new_v4().to_string()
        });
        let listen = env_or(node::CAPSULE_MESH_LISTEN, &[], || DEFAULT_LISTEN.to_string());
        let announce_interval = env_duration_ms(
            node::CAPSULE_MESH_ANNOUNCE_INTERVAL_MS,
            DEFAULT_ANNOUNCE_INTERVAL,
        );
        let liveness_intervals = env_optional(node::CAPSULE_MESH_LIVENESS_INTERVALS, &[])
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LIVENESS_INTERVALS);
        let peer_timeout =
            env_duration_ms(fetch_keys::CAPSULE_MESH_PEER_TIMEOUT_MS, DEFAULT_PEER_TIMEOUT);
        let fetch_deadline = env_optional(fetch_keys::CAPSULE_MESH_FETCH_DEADLINE_MS, &[])
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let trusted_publishers = env_optional(fetch_keys::CAPSULE_MESH_TRUSTED_PUBLISHERS, &[])
            .map(|s| parse_key_list(&s))
            .unwrap_or_default();

        Self {
            store_dir,
            key_file,
            node_id,
            listen,
            announce_interval,
            liveness_intervals,
            peer_timeout,
            fetch_deadline,
            trusted_publishers,
        }
    }

    /// Maximum silence before a peer is evicted: `announce_interval * liveness_intervals`.
    pub fn liveness_window(&self) -> Duration {
        self.announce_interval * self.liveness_intervals
    }
}

/// `~/.capsule-mesh`, or the current directory when there is no home.
pub fn mesh_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".capsule-mesh")
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Logging config: quiet, log_level, log_json, security_events_log.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::CAPSULE_MESH_QUIET, &[], false),
                log_level: env_or(obv_keys::CAPSULE_MESH_LOG_LEVEL, &[], || {
                    "capsule_mesh=info".to_string()
                }),
                log_json: env_bool(obv_keys::CAPSULE_MESH_LOG_JSON, &[], false),
                security_events_log: env_optional(obv_keys::CAPSULE_MESH_SECURITY_EVENTS_LOG, &[]),
            }
        })
    }
}
