// src/cli/handlers/lineage.rs

//! The `lineage` command.

use crate::{cli::handlers::commons, core::inventory::NodeKind};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Prints the linearized inheritance hierarchy of a node."
)]
struct LineageArgs {
    /// Node kind: environment, project, playbook or host-group.
    kind: NodeKind,

    /// Node name.
    name: String,

    /// Most specific first instead of most general first.
    #[arg(long, short)]
    ascending: bool,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// The main handler for the `lineage` command.
pub fn handle(args: Vec<String>, file: Option<&str>) -> Result<()> {
    let args = LineageArgs::try_parse_from(&args)?;
    let loaded = commons::load(file)?;

    let mut order = loaded
        .inventory
        .lineage(args.kind, &args.name)
        .with_context(|| format!("Could not linearize {} '{}'", args.kind, args.name))?;
    if args.ascending {
        order.reverse();
    }

    if args.json {
        return commons::print_json(&order);
    }
    println!(
        "\n--- {} of {} '{}' ---",
        "Lineage".bold(),
        args.kind,
        args.name.yellow()
    );
    for (position, name) in order.iter().enumerate() {
        let label = if *name == args.name { name.green().bold() } else { name.normal() };
        println!("  {:>3}. {}", position + 1, label);
    }
    println!();
    Ok(())
}
