//! # Resolver
//!
//! Builds the layered variable view of a node "as if deploying to" an environment.
//!
//! Every resolution starts from an empty [`LayeredVariables`] and walks the relevant
//! hierarchies general to specific, so the most specific and most environment-relevant
//! definition ends up on top. Scoped overrides are layered right above the base
//! variables of the node that declares them.

use crate::constants::DEFAULT_JOB_ORDER;
use crate::core::info::HostInfo;
use crate::core::inventory::{Inventory, NodeKind};
use crate::core::layers::{Layer, LayerError, LayeredVariables, ResolvedVariable};
use crate::core::lineage::{self, LineageError};
use crate::core::scheduler;
use crate::models::{DeployPlan, Variable};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving a node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested node does not exist.
    #[error("Unknown {kind} '{name}'.")]
    UnknownNode {
        /// Kind of the missing node.
        kind: NodeKind,
        /// Its name.
        name: String,
    },
    /// Abstract nodes can be inherited from but not deployed.
    #[error("The {kind} '{name}' is abstract and cannot be deployed.")]
    AbstractNode {
        /// Kind of the node.
        kind: NodeKind,
        /// Its name.
        name: String,
    },
    /// No playbook of the chain defines the play.
    #[error("Play '{play}' is not defined by playbook '{playbook}' or any of its ancestors.")]
    MissingPlay {
        /// The resolved playbook.
        playbook: String,
        /// The requested play.
        play: String,
    },
    /// Several unrelated ancestors define the play.
    #[error("Play '{play}' of playbook '{playbook}' is inherited from several playbooks: {}.", .candidates.join(", "))]
    AmbiguousSuperPlay {
        /// The resolved playbook.
        playbook: String,
        /// The requested play.
        play: String,
        /// Ancestors defining the play, none inheriting from another.
        candidates: Vec<String>,
    },
    /// A hierarchy could not be linearized.
    #[error(transparent)]
    Lineage(#[from] LineageError),
    /// A reference could not be followed.
    #[error(transparent)]
    Layer(#[from] LayerError),
}

/// Result alias of this module.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// The resolved configuration of one project deployed to one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDeployment {
    /// Deployed project.
    pub project: String,
    /// Target environment.
    pub environment: String,
    /// Effective job order.
    pub job_order: i64,
    /// Every visible variable with the layer that supplied it.
    pub variables: BTreeMap<String, ResolvedVariable>,
    /// Hosts the project deploys to in this environment.
    pub hosts: Vec<HostInfo>,
}

// --- EXISTENCE CHECKS ---

fn require(inventory: &Inventory, kind: NodeKind, name: &str) -> ResolveResult<bool> {
    let is_abstract = match kind {
        NodeKind::Environment => inventory.environment(name).map(|i| i.is_abstract),
        NodeKind::Project => inventory.project(name).map(|i| i.is_abstract),
        NodeKind::Playbook => inventory.playbook(name).map(|i| i.is_abstract),
        NodeKind::HostGroup => inventory.host_group(name).map(|_| false),
    };
    is_abstract.ok_or_else(|| ResolveError::UnknownNode {
        kind,
        name: name.to_string(),
    })
}

fn require_deployable(inventory: &Inventory, kind: NodeKind, name: &str) -> ResolveResult<()> {
    if require(inventory, kind, name)? {
        return Err(ResolveError::AbstractNode {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

// --- VARIABLES ---

/// Global variables, then the environment chain general to specific.
///
/// # Errors
/// `UnknownNode` or a lineage error of the environment hierarchy.
pub fn resolve_environment_variables(
    inventory: &Inventory,
    environment: &str,
) -> ResolveResult<LayeredVariables> {
    require(inventory, NodeKind::Environment, environment)?;
    let mut store = LayeredVariables::new();
    store.layer(Layer::new("global", Arc::clone(inventory.globals())));
    layer_environment_chain(&mut store, inventory, environment)?;
    Ok(store)
}

fn layer_environment_chain(
    store: &mut LayeredVariables,
    inventory: &Inventory,
    environment: &str,
) -> ResolveResult<()> {
    for name in lineage::descending(environment, inventory.environment_parents())? {
        if let Some(info) = inventory.environment(&name) {
            store.layer(Layer::new(
                format!("environment:{}", name),
                Arc::clone(&info.variables),
            ));
        }
    }
    Ok(())
}

/// The variables of `project` as seen from `environment`.
///
/// Each project of the chain, general to specific, layers its own variables and then
/// every override whose environment query includes `environment`.
///
/// # Errors
/// `UnknownNode` for an unknown project or environment, or a lineage error.
pub fn resolve_project_variables(
    inventory: &Inventory,
    project: &str,
    environment: &str,
) -> ResolveResult<LayeredVariables> {
    require(inventory, NodeKind::Project, project)?;
    require(inventory, NodeKind::Environment, environment)?;
    let mut store = LayeredVariables::new();
    layer_project_chain(&mut store, inventory, project, environment)?;
    Ok(store)
}

fn layer_project_chain(
    store: &mut LayeredVariables,
    inventory: &Inventory,
    project: &str,
    environment: &str,
) -> ResolveResult<()> {
    for name in lineage::descending(project, inventory.project_parents())? {
        let Some(info) = inventory.project(&name) else {
            continue;
        };
        let origin = format!("project:{}", name);
        for layer in info
            .scope
            .layers(&origin, environment, inventory.environment_parents())?
        {
            store.layer(layer);
        }
    }
    Ok(())
}

/// Everything a deployment of `project` to `environment` sees: globals, the
/// environment chain, then the project chain with its overrides.
///
/// # Errors
/// `AbstractNode` when either side is abstract, plus the errors of
/// [`resolve_project_variables`].
pub fn resolve_deploy_variables(
    inventory: &Inventory,
    project: &str,
    environment: &str,
) -> ResolveResult<LayeredVariables> {
    require_deployable(inventory, NodeKind::Project, project)?;
    require_deployable(inventory, NodeKind::Environment, environment)?;
    let mut store = resolve_environment_variables(inventory, environment)?;
    layer_project_chain(&mut store, inventory, project, environment)?;
    log::debug!(
        "Resolved '{}' for '{}' over {} layers.",
        project,
        environment,
        store.depth()
    );
    Ok(store)
}

/// The variables of `play` in `playbook` as seen from `environment`.
///
/// Each playbook of the chain, general to specific, layers its own variables (plus
/// matching overrides), then its definition of the play, if any (plus matching
/// overrides).
///
/// # Errors
/// `MissingPlay` when no playbook of the chain defines the play.
pub fn resolve_play_variables(
    inventory: &Inventory,
    playbook: &str,
    play: &str,
    environment: &str,
) -> ResolveResult<LayeredVariables> {
    require(inventory, NodeKind::Playbook, playbook)?;
    require(inventory, NodeKind::Environment, environment)?;
    let chain = lineage::descending(playbook, inventory.playbook_parents())?;
    let defines_play = |name: &String| {
        inventory
            .playbook(name)
            .is_some_and(|info| info.play(play).is_some())
    };
    if !chain.iter().any(defines_play) {
        return Err(ResolveError::MissingPlay {
            playbook: playbook.to_string(),
            play: play.to_string(),
        });
    }

    let mut store = LayeredVariables::new();
    for name in &chain {
        let Some(info) = inventory.playbook(name) else {
            continue;
        };
        let origin = format!("playbook:{}", name);
        for layer in info
            .scope
            .layers(&origin, environment, inventory.environment_parents())?
        {
            store.layer(layer);
        }
        if let Some(definition) = info.play(play) {
            let origin = format!("play:{}/{}", name, play);
            for layer in definition
                .scope
                .layers(&origin, environment, inventory.environment_parents())?
            {
                store.layer(layer);
            }
        }
    }
    Ok(store)
}

/// The ancestor playbook whose definition of `play` the given playbook extends.
///
/// Candidates are the strict ancestors defining the play. A candidate that is itself
/// an ancestor of another candidate is shadowed by it. `None` when no ancestor defines
/// the play.
///
/// # Errors
/// `AmbiguousSuperPlay` when more than one candidate remains.
pub fn find_super_play(
    inventory: &Inventory,
    playbook: &str,
    play: &str,
) -> ResolveResult<Option<String>> {
    require(inventory, NodeKind::Playbook, playbook)?;
    let parents_of = inventory.playbook_parents();
    let candidates: Vec<String> = lineage::descending_parents(playbook, &parents_of)?
        .into_iter()
        .filter(|name| {
            inventory
                .playbook(name)
                .is_some_and(|info| info.play(play).is_some())
        })
        .collect();

    let mut remaining = Vec::new();
    for candidate in &candidates {
        let mut shadowed = false;
        for other in candidates.iter().filter(|o| *o != candidate) {
            if lineage::is_ancestor(candidate, other, &parents_of)? {
                shadowed = true;
                break;
            }
        }
        if !shadowed {
            remaining.push(candidate.clone());
        }
    }

    match remaining.len() {
        0 | 1 => Ok(remaining.pop()),
        _ => Err(ResolveError::AmbiguousSuperPlay {
            playbook: playbook.to_string(),
            play: play.to_string(),
            candidates: remaining,
        }),
    }
}

/// The value `name` takes when deploying `project` to `environment`, with references
/// followed to their target. `None` when no layer defines it.
///
/// # Errors
/// The errors of [`resolve_deploy_variables`], or a `Layer` error for a dangling or
/// circular reference.
pub fn resolve_variable(
    inventory: &Inventory,
    project: &str,
    environment: &str,
    name: &str,
) -> ResolveResult<Option<Variable>> {
    let store = resolve_deploy_variables(inventory, project, environment)?;
    Ok(store.dereference(name)?.cloned())
}

// --- ATTRIBUTES ---

/// The job order of `project`, inherited from the nearest ancestor declaring one.
///
/// # Errors
/// `UnknownNode` or a lineage error.
pub fn resolve_job_order(inventory: &Inventory, project: &str) -> ResolveResult<i64> {
    require(inventory, NodeKind::Project, project)?;
    let found = lineage::nearest(project, inventory.project_parents(), |name| {
        inventory.project(name).and_then(|info| info.job_order)
    })?;
    Ok(found.unwrap_or(DEFAULT_JOB_ORDER))
}

/// The hosts of `host_group` that serve `environment`.
///
/// Groups are walked general to specific; unscoped hosts always qualify, scoped ones
/// when their query includes the environment. A later definition of a host name
/// replaces the earlier one in place.
///
/// # Errors
/// `UnknownNode` or a lineage error.
pub fn resolve_hosts(
    inventory: &Inventory,
    host_group: &str,
    environment: &str,
) -> ResolveResult<Vec<HostInfo>> {
    require(inventory, NodeKind::HostGroup, host_group)?;
    require(inventory, NodeKind::Environment, environment)?;
    let mut hosts: Vec<HostInfo> = Vec::new();
    for name in lineage::descending(host_group, inventory.host_group_parents())? {
        let Some(group) = inventory.host_group(&name) else {
            continue;
        };
        for host in group.hosts.iter() {
            let serves = match &host.environment {
                Some(query) => query.includes(environment, inventory.environment_parents())?,
                None => true,
            };
            if !serves {
                continue;
            }
            match hosts.iter_mut().find(|h| h.name == host.name) {
                Some(existing) => *existing = host.clone(),
                None => hosts.push(host.clone()),
            }
        }
    }
    Ok(hosts)
}

/// The hosts of every host group `project` deploys to. The groups come from the
/// nearest project of the chain declaring any.
///
/// # Errors
/// See [`resolve_hosts`].
pub fn resolve_project_hosts(
    inventory: &Inventory,
    project: &str,
    environment: &str,
) -> ResolveResult<Vec<HostInfo>> {
    require(inventory, NodeKind::Project, project)?;
    let groups = lineage::nearest(project, inventory.project_parents(), |name| {
        inventory
            .project(name)
            .filter(|info| !info.host_groups.is_empty())
            .map(|info| Arc::clone(&info.host_groups))
    })?
    .unwrap_or_default();

    let mut hosts: Vec<HostInfo> = Vec::new();
    for group in groups.iter() {
        for host in resolve_hosts(inventory, group, environment)? {
            if !hosts
                .iter()
                .any(|h| h.host_group == host.host_group && h.name == host.name)
            {
                hosts.push(host);
            }
        }
    }
    Ok(hosts)
}

// --- PLANS ---

/// Resolves one deployment: variables, job order and hosts.
///
/// # Errors
/// See [`resolve_deploy_variables`].
pub fn resolve_deployment(
    inventory: &Inventory,
    project: &str,
    environment: &str,
) -> ResolveResult<ResolvedDeployment> {
    let store = resolve_deploy_variables(inventory, project, environment)?;
    Ok(ResolvedDeployment {
        project: project.to_string(),
        environment: environment.to_string(),
        job_order: resolve_job_order(inventory, project)?,
        variables: store.materialize(),
        hosts: resolve_project_hosts(inventory, project, environment)?,
    })
}

/// Resolves every project of `plan` against the plan's environment, in parallel.
///
/// Items without a project are skipped. Results follow plan expansion order.
///
/// # Errors
/// A resolution error of one of the failing items.
pub fn resolve_plan_variables(
    plan: &DeployPlan,
    inventory: &Inventory,
) -> ResolveResult<Vec<ResolvedDeployment>> {
    let projects: Vec<String> = scheduler::expand_items(plan, inventory)
        .into_iter()
        .filter_map(|item| item.project)
        .collect();
    log::debug!(
        "Resolving {} deployments of plan '{}' in parallel.",
        projects.len(),
        plan.name
    );
    projects
        .par_iter()
        .map(|project| resolve_deployment(inventory, project, &plan.environment))
        .collect()
}
