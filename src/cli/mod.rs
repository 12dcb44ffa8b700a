// src/cli/mod.rs

//! Command-line surface of `strata`.

use clap::Parser;

pub mod handlers;

/// strata: hierarchical configuration resolution for deployment plans.
///
/// Usage: `strata [--file <path>] <command> [args...]`
///
/// Commands:
/// - `resolve <project> --env <env>`: the variables, job order and hosts of a deployment.
/// - `order <plan>`: the execution order of a deploy plan.
/// - `lineage <kind> <name>`: the linearized hierarchy of a node.
/// - `check`: validates every hierarchy of the inventory.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// Inventory file or directory. Defaults to `$STRATA_INVENTORY`, then
    /// `./strata.toml`, then `~/.config/strata/inventory.toml`.
    #[arg(long, short)]
    pub file: Option<String>,

    /// The command to run.
    pub command: Option<String>,

    /// Arguments handed to the command.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}
