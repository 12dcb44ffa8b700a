// src/cli/handlers/commons.rs

//! Helpers shared by the command handlers.

use crate::{
    constants::DEFAULT_BRANCH,
    core::{
        config_loader::{self, InventoryFile},
        history::History,
        inventory::Inventory,
        paths,
    },
    models::Variable,
};
use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

/// A loaded inventory and its folded snapshot.
#[derive(Debug)]
pub struct Loaded {
    /// Records and plans as read from disk.
    pub file: InventoryFile,
    /// The snapshot of the default branch after committing the records.
    pub inventory: Inventory,
}

/// Locates, loads and folds the inventory.
///
/// The records are committed to a fresh history so that the snapshot is exactly what
/// a checkout of the default branch produces.
pub fn load(file: Option<&str>) -> Result<Loaded> {
    let path = paths::locate_inventory(file)?;
    let loaded = config_loader::load_inventory(&path)
        .with_context(|| format!("Failed to load inventory '{}'", path.display()))?;

    let mut history = History::new();
    let head = history.commit(
        DEFAULT_BRANCH,
        format!("load {}", path.display()),
        loaded.records.clone(),
    )?;
    log::debug!(
        "Loaded {} records and {} plans from '{}' (commit {}).",
        loaded.records.len(),
        loaded.plans.len(),
        path.display(),
        head
    );
    let inventory = history.snapshot(DEFAULT_BRANCH)?;

    if let Err(problems) = inventory.validate() {
        for (kind, problem) in &problems {
            log::warn!("Invalid {} hierarchy: {}", kind, problem);
        }
    }

    Ok(Loaded {
        file: loaded,
        inventory,
    })
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A one-line human rendering of a variable.
pub fn render_variable(variable: &Variable) -> String {
    match variable {
        Variable::Value(value) => value.to_string(),
        Variable::Reference(name) => format!("{} {}", "->".cyan(), name),
        Variable::List(items) => {
            let rendered: Vec<String> = items.iter().map(render_variable).collect();
            format!("[{}]", rendered.join(", "))
        }
        Variable::Map(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{} = {}", key, render_variable(value)))
                .collect();
            format!("{{ {} }}", rendered.join(", "))
        }
        Variable::Closure(source) => format!("{} {}", "closure".magenta(), source.dimmed()),
        Variable::Encrypted { key, .. } => match key {
            Some(key) => format!("{} (key '{}')", "<encrypted>".yellow(), key),
            None => "<encrypted>".yellow().to_string(),
        },
    }
}
