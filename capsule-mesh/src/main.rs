mod cli;
mod command_registry;
mod commands;
mod dispatch;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use command_registry::CommandRegistry;

fn main() -> Result<()> {
    capsule_mesh_core::observability::init_tracing();
    let cli = Cli::parse();

    let mut registry = CommandRegistry::new();
    dispatch::register_all(&mut registry);
    registry.dispatch(&cli)
}
