// src/cli/handlers/order.rs

//! The `order` command.

use crate::{
    cli::handlers::commons,
    core::{
        inventory::Inventory,
        resolver,
        scheduler::{self, ExpandedItem},
    },
    models::DeployPlan,
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use serde_json::{Value, json};

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Prints the execution order of a deploy plan."
)]
struct OrderArgs {
    /// The plan to order.
    plan: String,

    /// Also resolve every deployment of the plan and print it as JSON.
    #[arg(long, short)]
    resolve: bool,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// The main handler for the `order` command.
pub fn handle(args: Vec<String>, file: Option<&str>) -> Result<()> {
    let args = OrderArgs::try_parse_from(&args)?;
    let loaded = commons::load(file)?;
    let plan = loaded.file.plan(&args.plan).ok_or_else(|| {
        let known: Vec<&str> = loaded.file.plans.iter().map(|p| p.name.as_str()).collect();
        anyhow!(
            "Unknown plan '{}'. Known plans: {}",
            args.plan,
            if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
        )
    })?;

    if args.resolve {
        let deployments = resolver::resolve_plan_variables(plan, &loaded.inventory)
            .with_context(|| format!("Could not resolve plan '{}'", plan.name))?;
        return commons::print_json(&json!({
            "plan": plan.name,
            "session": plan.session,
            "environment": plan.environment,
            "deployments": deployments,
        }));
    }

    let ordered = scheduler::sort_items(plan, &loaded.inventory)
        .with_context(|| format!("Could not order plan '{}'", plan.name))?;
    if args.json {
        return commons::print_json(&order_report(plan, &ordered));
    }
    print_order(plan, &ordered, &loaded.inventory);
    Ok(())
}

/// The JSON document printed by `order --json`.
fn order_report(plan: &DeployPlan, ordered: &[ExpandedItem]) -> Value {
    json!({
        "plan": plan.name,
        "session": plan.session,
        "environment": plan.environment,
        "reverse_order": plan.reverse_order,
        "items": ordered,
    })
}

fn print_order(plan: &DeployPlan, ordered: &[ExpandedItem], inventory: &Inventory) {
    println!(
        "\n--- {} '{}' @ {}{} ---",
        "Plan".bold(),
        plan.name.yellow(),
        plan.environment.cyan(),
        if plan.reverse_order { " (reversed)".dimmed().to_string() } else { String::new() }
    );
    println!("  {}", format!("session {}", plan.session).dimmed());
    for (position, expanded) in ordered.iter().enumerate() {
        let Some(project) = &expanded.project else {
            let source = expanded
                .item
                .search
                .as_deref()
                .or(expanded.item.project.as_deref())
                .unwrap_or("?");
            println!(
                "  {:>3}. {} {}",
                position + 1,
                source.red(),
                "(unresolved)".dimmed()
            );
            continue;
        };
        let job_order = expanded
            .item
            .job_order
            .or_else(|| resolver::resolve_job_order(inventory, project).ok());
        let mut line = format!("  {:>3}. {}", position + 1, project.green());
        if let Some(order) = job_order {
            line.push_str(&format!(" {}", format!("[job order {order}]").dimmed()));
        }
        if !expanded.item.depends_on.is_empty() {
            line.push_str(&format!(
                " {} {}",
                "after".dimmed(),
                expanded.item.depends_on.join(", ")
            ));
        }
        println!("{line}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeployItem;

    #[test]
    fn test_order_report_carries_the_plan_session() {
        // --- Setup ---
        let mut plan = DeployPlan::new("release", "prod");
        plan.push(DeployItem::for_project("app"));
        let ordered = vec![ExpandedItem {
            index: 0,
            project: Some("app".to_string()),
            item: DeployItem::for_project("app"),
        }];

        // --- Execute ---
        let report = order_report(&plan, &ordered);

        // --- Assert ---
        assert_eq!(report["session"], json!(plan.session.to_string()));
        assert_eq!(report["plan"], "release");
        assert_eq!(report["items"][0]["project"], "app");
    }
}
