// src/bin/strata.rs

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use colored::*;
use strata::cli::{Cli, handlers};

// --- Command Definition and Registry ---

/// A command, its aliases and its handler. Handlers receive their own arguments and
/// the `--file` override.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, Option<&str>) -> Result<()>,
}

static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "check",
        aliases: &["validate"],
        handler: handlers::check::handle,
    },
    CommandDefinition {
        name: "lineage",
        aliases: &["mro"],
        handler: handlers::lineage::handle,
    },
    CommandDefinition {
        name: "order",
        aliases: &["plan"],
        handler: handlers::order::handle,
    },
    CommandDefinition {
        name: "resolve",
        aliases: &["res", "get"],
        handler: handlers::resolve::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(name) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match find_command(&name) {
        Some(command) => (command.handler)(cli.args, cli.file.as_deref()),
        None => {
            let known: Vec<&str> = COMMAND_REGISTRY.iter().map(|cmd| cmd.name).collect();
            bail!("Unknown command '{}'. Available: {}", name, known.join(", "))
        }
    }
}
