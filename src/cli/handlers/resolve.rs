// src/cli/handlers/resolve.rs

//! The `resolve` command.

use crate::{
    cli::handlers::commons,
    core::resolver::{self, ResolvedDeployment},
};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use serde_json::json;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Resolves the configuration of a project deployed to an environment."
)]
struct ResolveArgs {
    /// The project to deploy.
    project: String,

    /// The target environment.
    #[arg(long, short)]
    env: String,

    /// Print a single variable, following references.
    #[arg(long, short)]
    get: Option<String>,

    /// Show the layer each variable comes from.
    #[arg(long, short = 'x')]
    explain: bool,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// The main handler for the `resolve` command.
pub fn handle(args: Vec<String>, file: Option<&str>) -> Result<()> {
    let args = ResolveArgs::try_parse_from(&args)?;
    let loaded = commons::load(file)?;

    if let Some(name) = &args.get {
        let value = resolver::resolve_variable(&loaded.inventory, &args.project, &args.env, name)
            .with_context(|| format!("Could not resolve '{}' of '{}'", name, args.project))?;
        if args.json {
            return commons::print_json(&json!({ "name": name, "variable": value }));
        }
        match value {
            Some(variable) => println!("{}", commons::render_variable(&variable)),
            None => println!("{}", "<undefined>".dimmed()),
        }
        return Ok(());
    }

    let deployment = resolver::resolve_deployment(&loaded.inventory, &args.project, &args.env)
        .with_context(|| format!("Could not resolve '{}' for '{}'", args.project, args.env))?;

    if args.json {
        return commons::print_json(&deployment);
    }
    print_deployment(&deployment, args.explain);
    Ok(())
}

fn print_deployment(deployment: &ResolvedDeployment, explain: bool) {
    println!(
        "\n--- {} '{}' @ {} ---",
        "Deployment".bold(),
        deployment.project.yellow(),
        deployment.environment.cyan()
    );
    println!("  {:<12} {}", "job order".blue(), deployment.job_order);

    println!("\n  {}", "hosts".blue());
    if deployment.hosts.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for host in &deployment.hosts {
        println!(
            "    {:<20} {:<20} {}",
            host.name,
            host.address,
            host.host_group.dimmed()
        );
    }

    println!("\n  {}", "variables".blue());
    if deployment.variables.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    let width = deployment
        .variables
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0);
    for (name, resolved) in &deployment.variables {
        let rendered = commons::render_variable(&resolved.variable.variable);
        if explain {
            println!(
                "    {:<width$} = {}  {}",
                name.green(),
                rendered,
                format!("({})", resolved.origin).dimmed(),
                width = width
            );
        } else {
            println!("    {:<width$} = {}", name.green(), rendered, width = width);
        }
    }
    println!();
}
