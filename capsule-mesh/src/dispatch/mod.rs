//! Command dispatch: one register function per command group.

use crate::cli::Commands;
use crate::command_registry::CommandRegistry;
use crate::commands::{self, capsule, keys, node};

/// Register every command handler.
pub fn register_all(reg: &mut CommandRegistry) {
    register_keys(reg);
    register_store(reg);
    register_network(reg);
}

fn register_keys(reg: &mut CommandRegistry) {
    reg.register(|cli| {
        if let Commands::Keygen { out, force } = &cli.command {
            let path = out
                .clone()
                .unwrap_or_else(|| commands::load_config(None).key_file);
            Some(keys::cmd_keygen(&path, *force))
        } else {
            None
        }
    });
}

fn register_store(reg: &mut CommandRegistry) {
    reg.register(|cli| {
        let config = commands::load_config(cli.store_dir.as_deref());
        match &cli.command {
            Commands::Publish { name, file, key } => Some((|| {
                let key_path = key.clone().unwrap_or_else(|| config.key_file.clone());
                let publisher = keys::load_publisher(&key_path)?;
                capsule::cmd_publish(&config.store_dir, name, file, &publisher).map(|_| ())
            })()),
            Commands::List => Some(capsule::cmd_list(&config.store_dir).map(|_| ())),
            Commands::Show { name } => Some(capsule::cmd_show(&config.store_dir, name).map(|_| ())),
            Commands::Remove { name } => Some(capsule::cmd_remove(&config.store_dir, name)),
            _ => None,
        }
    });
}

fn register_network(reg: &mut CommandRegistry) {
    reg.register(|cli| {
        let config = commands::load_config(cli.store_dir.as_deref());
        match &cli.command {
            Commands::Serve { listen } => Some(node::cmd_serve(config, listen.clone())),
            Commands::Peers { wait } => Some(node::cmd_peers(config, *wait)),
            Commands::Fetch {
                keys,
                peers,
                wait,
                deadline_ms,
                out,
            } => Some(node::cmd_fetch(
                config,
                node::FetchArgs {
                    keys,
                    peers,
                    wait: *wait,
                    deadline_ms: *deadline_ms,
                    out: out.as_deref(),
                },
            )),
            _ => None,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn run(args: &[&str]) -> anyhow::Result<()> {
        let mut reg = CommandRegistry::new();
        register_all(&mut reg);
        reg.dispatch(&Cli::try_parse_from(args).unwrap())
    }

    #[test]
    fn test_store_commands_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store");
        let store = store.to_str().unwrap();
        let key = dir.path().join("key.json");
        let key = key.to_str().unwrap();
        let payload = dir.path().join("payload.bin");
        std::fs::write(&payload, b"\x00\x01binary").unwrap();

        run(&["capsule-mesh", "keygen", "--out", key]).unwrap();
        run(&[
            "capsule-mesh",
            "publish",
            "blob",
            payload.to_str().unwrap(),
            "--key",
            key,
            "--store-dir",
            store,
        ])
        .unwrap();
        run(&["capsule-mesh", "list", "--store-dir", store]).unwrap();
        run(&["capsule-mesh", "show", "blob", "--store-dir", store]).unwrap();
        run(&["capsule-mesh", "remove", "blob", "--store-dir", store]).unwrap();
        assert!(run(&["capsule-mesh", "show", "blob", "--store-dir", store]).is_err());
    }
}
