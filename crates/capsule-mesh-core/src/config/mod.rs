//! Capsule Mesh configuration.
//!
//! All environment reads happen here; the rest of the code takes `MeshConfig`.
//!
//! - `loader`: env_or, env_optional, env_bool, env_duration_ms
//! - `schema`: MeshConfig, ObservabilityConfig
//! - `env_keys`: variable names

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_duration_ms, env_optional, env_or, load_dotenv};
pub use schema::{MeshConfig, ObservabilityConfig};
