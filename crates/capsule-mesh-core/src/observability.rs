//! Observability: tracing init and security events.
//!
//! Uses config::ObservabilityConfig for CAPSULE_MESH_QUIET, LOG_LEVEL, LOG_JSON and
//! SECURITY_EVENTS_LOG. Security events are logged through `tracing` and, when a log
//! path is configured, appended as JSON lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static SECURITY_EVENTS_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call at process startup.
/// When CAPSULE_MESH_QUIET=1, only WARN and above are logged. `RUST_LOG` wins over both.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level: String = if cfg.quiet {
        "capsule_mesh=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn get_security_events_path() -> Option<String> {
    {
        let guard = SECURITY_EVENTS_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env()
        .security_events_log
        .clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = SECURITY_EVENTS_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn security_event(kind: &str, category: &str, details: serde_json::Value) {
    if let Some(path) = get_security_events_path() {
        let record = json!({
            "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "type": kind,
            "category": category,
            "details": details,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: a local store entry failed verification on read.
pub fn security_corrupt_entry(capsule: &str, reason: &str) {
    tracing::warn!(
        capsule = %capsule,
        reason = %reason,
        "Security: corrupt capsule entry in local store"
    );
    security_event(
        "corrupt_entry",
        "store",
        json!({ "capsule": capsule, "reason": reason }),
    );
}

/// Security event: bytes received from a peer were rejected by verification or policy.
pub fn security_capsule_rejected(peer: &str, key: &str, reason: &str) {
    tracing::warn!(
        peer = %peer,
        key = %key,
        reason = %reason,
        "Security: rejected capsule from peer"
    );
    security_event(
        "capsule_rejected",
        "fetch",
        json!({ "peer": peer, "key": key, "reason": reason }),
    );
}
