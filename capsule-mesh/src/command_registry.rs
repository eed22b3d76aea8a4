//! Command registry. Dispatch modules register handlers so main.rs never matches on commands.
//!
//! Adding a command:
//! 1. Add a variant to `Commands` in cli.rs
//! 2. Call `reg.register(...)` for it in the dispatch module

use anyhow::Result;
use std::sync::Arc;

use crate::cli::Cli;

/// Returns `Some(result)` when the handler owns the command, `None` otherwise.
pub type CommandHandler = Arc<dyn Fn(&Cli) -> Option<Result<()>> + Send + Sync>;

/// Handlers are tried in registration order; the first `Some` wins.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: Vec<CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, f: F)
    where
        F: Fn(&Cli) -> Option<Result<()>> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(f));
    }

    pub fn dispatch(&self, cli: &Cli) -> Result<()> {
        for h in &self.handlers {
            if let Some(r) = h(cli) {
                return r;
            }
        }
        anyhow::bail!("No handler registered for command {:?}", cli.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use clap::Parser;

    #[test]
    fn test_first_matching_handler_wins() {
        let mut reg = CommandRegistry::new();
        reg.register(|cli| matches!(cli.command, Commands::Show { .. }).then(|| Ok(())));
        reg.register(|cli| {
            matches!(cli.command, Commands::List).then(|| Err(anyhow::anyhow!("list handler ran")))
        });

        let list = Cli::try_parse_from(["capsule-mesh", "list"]).unwrap();
        let err = reg.dispatch(&list).unwrap_err();
        assert_eq!(err.to_string(), "list handler ran");

        let show = Cli::try_parse_from(["capsule-mesh", "show", "x"]).unwrap();
        assert!(reg.dispatch(&show).is_ok());
    }

    #[test]
    fn test_unhandled_command_is_an_error() {
        let reg = CommandRegistry::new();
        let cli = Cli::try_parse_from(["capsule-mesh", "list"]).unwrap();
        assert!(reg.dispatch(&cli).is_err());
    }
}
