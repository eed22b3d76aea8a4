use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Capsule Mesh - publish, announce, discover and fetch signed content capsules on the local network
#[derive(Parser, Debug)]
#[command(name = "capsule-mesh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Capsule store directory (default: from env or ~/.capsule-mesh/capsules)
    #[arg(long, global = true, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an Ed25519 publisher key file
    Keygen {
        /// Where to write the key (default: from env or ~/.capsule-mesh/identity.key.json)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Overwrite an existing key file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Hash, sign and store a file as a capsule
    Publish {
        /// Capsule name
        #[arg(value_name = "NAME")]
        name: String,

        /// Payload file. Use "-" to read from stdin
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Publisher key file
        #[arg(long, value_name = "FILE", env = "CAPSULE_MESH_KEY_FILE")]
        key: Option<PathBuf>,
    },

    /// List local capsule names
    List,

    /// Print the verified manifest of a local capsule
    Show {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete a local capsule
    Remove {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Run the node: Transfer Server + mDNS announcer until Ctrl+C
    Serve {
        /// Listen address for the Transfer Server (host:port or :port)
        #[arg(long, value_name = "ADDR", env = "CAPSULE_MESH_LISTEN")]
        listen: Option<String>,
    },

    /// Discover peers for a while and print the live ones
    Peers {
        /// Seconds to listen for announcements
        #[arg(long, default_value = "3", value_name = "SECS")]
        wait: u64,
    },

    /// Fetch capsules by name or digest (sha256:<hex>) from the mesh
    Fetch {
        /// Capsule names or digests
        #[arg(value_name = "KEY", required = true)]
        keys: Vec<String>,

        /// Static peer Transfer Server address (repeatable), for networks without multicast
        #[arg(long = "peer", value_name = "ADDR")]
        peers: Vec<SocketAddr>,

        /// Seconds to discover peers before fetching
        #[arg(long, default_value = "3", value_name = "SECS")]
        wait: u64,

        /// Give up on each key after this many milliseconds (default: from env or none)
        #[arg(long, value_name = "MS")]
        deadline_ms: Option<u64>,

        /// Also write each fetched payload to DIR/<name>
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_with_static_peers() {
        let cli = Cli::try_parse_from([
            "capsule-mesh",
            "fetch",
            "notes",
            "sha256:abc",
            "--peer",
            "10.0.0.2:7780",
            "--peer",
            "10.0.0.3:7780",
            "--wait",
            "0",
            "--deadline-ms",
            "1500",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch {
                keys,
                peers,
                wait,
                deadline_ms,
                out,
            } => {
                assert_eq!(keys, vec!["notes", "sha256:abc"]);
                assert_eq!(peers.len(), 2);
                assert_eq!(wait, 0);
                assert_eq!(deadline_ms, Some(1500));
                assert!(out.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_fetch_requires_a_key() {
        assert!(Cli::try_parse_from(["capsule-mesh", "fetch"]).is_err());
    }

    #[test]
    fn test_store_dir_is_global() {
        let cli =
            Cli::try_parse_from(["capsule-mesh", "list", "--store-dir", "/tmp/caps"]).unwrap();
        assert_eq!(cli.store_dir, Some(PathBuf::from("/tmp/caps")));
        assert!(matches!(cli.command, Commands::List));
    }
}
