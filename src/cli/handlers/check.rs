// src/cli/handlers/check.rs

//! The `check` command.

use crate::{cli::handlers::commons, core::inventory::NodeKind};
use anyhow::{Result, bail};
use clap::Parser;
use colored::*;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Checks that every hierarchy of the inventory linearizes."
)]
struct CheckArgs {}

/// The main handler for the `check` command.
pub fn handle(args: Vec<String>, file: Option<&str>) -> Result<()> {
    let _check_args = CheckArgs::try_parse_from(&args)?;
    let loaded = commons::load(file)?;

    let kinds = [
        NodeKind::Environment,
        NodeKind::Project,
        NodeKind::Playbook,
        NodeKind::HostGroup,
    ];
    for kind in kinds {
        println!(
            "  {:<12} {}",
            kind.to_string().blue(),
            loaded.inventory.names(kind).len()
        );
    }
    println!("  {:<12} {}", "plans".blue(), loaded.file.plans.len());

    match loaded.inventory.validate() {
        Ok(()) => {
            println!("\n{}", "Inventory is valid.".green());
            Ok(())
        }
        Err(problems) => {
            println!();
            for (kind, problem) in &problems {
                println!("  {} {}: {}", "x".red().bold(), kind, problem);
            }
            bail!("{} hierarchy problems found", problems.len())
        }
    }
}
