//! # Scheduler
//!
//! Turns a deploy plan into an execution order.
//!
//! 1. Items are expanded into one entry per project (search expressions may match many).
//! 2. The projects are ordered topologically along the items' `depends_on` arcs.
//! 3. The final order sorts by job order first, topological position second, and puts
//!    items without a project last. `reverse_order` flips the whole result.

use crate::core::inventory::Inventory;
use crate::core::resolver::{self, ResolveError};
use crate::models::{DeployItem, DeployPlan};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Errors raised while ordering a plan.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// The `depends_on` arcs of the plan form a cycle.
    #[error("Dependency cycle between deploy items involving project '{project}': {}.", .members.join(" -> "))]
    DependencyCycle {
        /// A project on the cycle.
        project: String,
        /// The cycle in dependency order, ending with its first member again.
        members: Vec<String>,
    },
    /// The job order of a project could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Result alias of this module.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// One deploy item bound to (at most) one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedItem {
    /// Position of the source item in the plan.
    pub index: usize,
    /// The bound project; `None` when nothing could be resolved.
    pub project: Option<String>,
    /// The source item.
    pub item: DeployItem,
}

/// Expands every item of `plan` into one entry per project.
///
/// A literal project yields itself when the inventory knows it. A search yields every
/// non-abstract project whose name matches, sorted by name. Unknown projects, invalid
/// patterns and searches without matches yield a single entry with no project.
pub fn expand_items(plan: &DeployPlan, inventory: &Inventory) -> Vec<ExpandedItem> {
    let mut expanded = Vec::new();
    for (index, item) in plan.items.iter().enumerate() {
        let projects = match (&item.project, &item.search) {
            (Some(name), _) => {
                if inventory.project(name).is_some() {
                    vec![name.clone()]
                } else {
                    log::warn!("Plan '{}': unknown project '{}'.", plan.name, name);
                    Vec::new()
                }
            }
            (None, Some(pattern)) => match Regex::new(pattern) {
                Ok(re) => inventory
                    .projects()
                    .filter(|p| !p.is_abstract && re.is_match(&p.name))
                    .map(|p| p.name.clone())
                    .collect(),
                Err(e) => {
                    log::warn!("Plan '{}': invalid search '{}': {}", plan.name, pattern, e);
                    Vec::new()
                }
            },
            (None, None) => Vec::new(),
        };

        if projects.is_empty() {
            expanded.push(ExpandedItem {
                index,
                project: None,
                item: item.clone(),
            });
        }
        for project in projects {
            expanded.push(ExpandedItem {
                index,
                project: Some(project),
                item: item.clone(),
            });
        }
    }
    log::debug!(
        "Plan '{}': {} items expanded to {}.",
        plan.name,
        plan.items.len(),
        expanded.len()
    );
    expanded
}

/// Orders the projects of `items` so that every dependency precedes its dependents.
///
/// Kahn's algorithm; among ready projects the one declared first goes first.
/// Dependencies on projects that are not part of the plan add no arc.
///
/// # Errors
/// `DependencyCycle` naming the projects of one cycle.
pub fn topological_order(items: &[ExpandedItem]) -> ScheduleResult<Vec<String>> {
    // Nodes in first-declaration order.
    let mut names: Vec<&str> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();
    for project in items.iter().filter_map(|i| i.project.as_deref()) {
        if !position.contains_key(project) {
            position.insert(project, names.len());
            names.push(project);
        }
    }

    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    let mut arcs: HashSet<(usize, usize)> = HashSet::new();
    for item in items {
        let Some(to) = item.project.as_deref().and_then(|p| position.get(p).copied()) else {
            continue;
        };
        for dependency in &item.item.depends_on {
            let Some(from) = position.get(dependency.as_str()).copied() else {
                continue;
            };
            if arcs.insert((from, to)) {
                if let Some(list) = successors.get_mut(from) {
                    list.push(to);
                }
                if let Some(list) = predecessors.get_mut(to) {
                    list.push(from);
                }
            }
        }
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| node)
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(names.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for next in successors.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(*next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    let name_of = |node: usize| names.get(node).map(|n| n.to_string()).unwrap_or_default();
    if order.len() < names.len() {
        let members: Vec<String> = find_cycle(&in_degree, &predecessors)
            .into_iter()
            .map(name_of)
            .collect();
        let project = members.first().cloned().unwrap_or_default();
        return Err(ScheduleError::DependencyCycle { project, members });
    }

    let order: Vec<String> = order.into_iter().map(name_of).collect();
    log::debug!("Topological order: {:?}", order);
    Ok(order)
}

/// Extracts one cycle from the nodes Kahn's algorithm could not release.
///
/// Every unreleased node keeps at least one unreleased predecessor, so walking
/// predecessors from any of them must come back to a node already seen.
fn find_cycle(in_degree: &[usize], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let stuck = |node: &usize| in_degree.get(*node).is_some_and(|d| *d > 0);
    let Some(mut current) = (0..in_degree.len()).find(stuck) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    loop {
        if let Some(at) = path.iter().position(|n| *n == current) {
            // path[at..] walks against the arcs; flip it into dependency order.
            let mut cycle: Vec<usize> = path.split_off(at);
            cycle.reverse();
            if let Some(first) = cycle.first().copied() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(current);
        match predecessors
            .get(current)
            .and_then(|preds| preds.iter().copied().find(stuck))
        {
            Some(previous) => current = previous,
            None => return path,
        }
    }
}

/// Produces the execution order of `plan`.
///
/// Sort keys, in order: items with a project first, job order ascending (the item's
/// own `job_order`, else the project's inherited one), topological position. The sort
/// is stable, so equal keys keep plan order. With `reverse_order` the final order is
/// reversed as a whole.
///
/// # Errors
/// `DependencyCycle`, or a resolution error while computing job orders.
pub fn sort_items(plan: &DeployPlan, inventory: &Inventory) -> ScheduleResult<Vec<ExpandedItem>> {
    let mut items = expand_items(plan, inventory);
    let topological: HashMap<String, usize> = topological_order(&items)?
        .into_iter()
        .enumerate()
        .map(|(position, project)| (project, position))
        .collect();

    let mut keyed = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let key = match &item.project {
            Some(project) => {
                let job_order = match item.item.job_order {
                    Some(order) => order,
                    None => resolver::resolve_job_order(inventory, project)?,
                };
                let position = topological.get(project).copied().unwrap_or(usize::MAX);
                (false, job_order, position)
            }
            None => (true, 0, usize::MAX),
        };
        keyed.push((key, item));
    }
    keyed.sort_by_key(|(key, _)| *key);

    let mut ordered: Vec<ExpandedItem> = keyed.into_iter().map(|(_, item)| item).collect();
    if plan.reverse_order {
        ordered.reverse();
    }
    log::debug!(
        "Plan '{}' execution order: {:?}",
        plan.name,
        ordered.iter().map(|i| i.project.as_deref()).collect::<Vec<_>>()
    );
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectRecord, Record};

    fn inventory(projects: &[(&str, Option<i64>, bool)]) -> Inventory {
        let records: Vec<Record> = projects
            .iter()
            .map(|(name, job_order, is_abstract)| {
                Record::Project(ProjectRecord {
                    name: name.to_string(),
                    job_order: *job_order,
                    is_abstract: *is_abstract,
                    ..Default::default()
                })
            })
            .collect();
        Inventory::fold(&records)
    }

    fn plan(items: Vec<DeployItem>) -> DeployPlan {
        let mut plan = DeployPlan::new("release", "prod");
        for item in items {
            plan.push(item);
        }
        plan
    }

    fn projects(items: &[ExpandedItem]) -> Vec<Option<&str>> {
        items.iter().map(|i| i.project.as_deref()).collect()
    }

    #[test]
    fn test_dependencies_run_first() {
        // --- Setup: web depends on api, api depends on db ---
        let inv = inventory(&[("db", None, false), ("api", None, false), ("web", None, false)]);
        let plan = plan(vec![
            DeployItem::for_project("web").depends_on(["api"]),
            DeployItem::for_project("api").depends_on(["db"]),
            DeployItem::for_project("db"),
        ]);

        // --- Execute ---
        let ordered = sort_items(&plan, &inv).unwrap();

        // --- Assert ---
        assert_eq!(projects(&ordered), vec![Some("db"), Some("api"), Some("web")]);
    }

    #[test]
    fn test_independent_items_keep_declaration_order() {
        let inv = inventory(&[("a", None, false), ("b", None, false), ("c", None, false)]);
        let plan = plan(vec![
            DeployItem::for_project("c"),
            DeployItem::for_project("a"),
            DeployItem::for_project("b"),
        ]);
        let ordered = sort_items(&plan, &inv).unwrap();
        assert_eq!(projects(&ordered), vec![Some("c"), Some("a"), Some("b")]);
    }

    #[test]
    fn test_job_order_is_the_primary_key() {
        // --- Setup: 'late' has a higher job order but no dependents ---
        let inv = inventory(&[("late", Some(10), false), ("early", Some(-1), false), ("mid", None, false)]);
        let plan = plan(vec![
            DeployItem::for_project("late"),
            DeployItem::for_project("mid"),
            DeployItem::for_project("early"),
        ]);

        // --- Execute ---
        let ordered = sort_items(&plan, &inv).unwrap();

        // --- Assert ---
        assert_eq!(projects(&ordered), vec![Some("early"), Some("mid"), Some("late")]);
    }

    #[test]
    fn test_job_order_beats_a_conflicting_dependency() {
        // --- Setup: 'q' depends on 'p' but has the lower job order ---
        let inv = inventory(&[("p", Some(5), false), ("q", Some(1), false)]);
        let plan = plan(vec![
            DeployItem::for_project("p"),
            DeployItem::for_project("q").depends_on(["p"]),
        ]);

        // --- Execute ---
        let topological = topological_order(&expand_items(&plan, &inv)).unwrap();
        let ordered = sort_items(&plan, &inv).unwrap();

        // --- Assert: the arc is honored topologically, job order still decides ---
        assert_eq!(topological, vec!["p".to_string(), "q".to_string()]);
        assert_eq!(projects(&ordered), vec![Some("q"), Some("p")]);
    }

    #[test]
    fn test_item_job_order_overrides_project_job_order() {
        let inv = inventory(&[("a", Some(5), false), ("b", Some(1), false)]);
        let mut first = DeployItem::for_project("a");
        first.job_order = Some(0);
        let plan = plan(vec![DeployItem::for_project("b"), first]);

        let ordered = sort_items(&plan, &inv).unwrap();
        assert_eq!(projects(&ordered), vec![Some("a"), Some("b")]);
    }

    #[test]
    fn test_unresolved_items_sort_last() {
        let inv = inventory(&[("app", None, false)]);
        let plan = plan(vec![
            DeployItem::for_search("^nothing-matches$"),
            DeployItem::for_project("ghost"),
            DeployItem::for_search("(unclosed"),
            DeployItem::for_project("app"),
        ]);

        let ordered = sort_items(&plan, &inv).unwrap();
        assert_eq!(projects(&ordered), vec![Some("app"), None, None, None]);
        assert_eq!(ordered[1].index, 0);
    }

    #[test]
    fn test_search_expands_to_concrete_projects_sorted_by_name() {
        let inv = inventory(&[
            ("svc-b", None, false),
            ("svc-a", None, false),
            ("svc-base", None, true),
            ("other", None, false),
        ]);
        let plan = plan(vec![DeployItem::for_search("^svc-")]);

        let expanded = expand_items(&plan, &inv);
        assert_eq!(projects(&expanded), vec![Some("svc-a"), Some("svc-b")]);
        assert!(expanded.iter().all(|i| i.index == 0));
    }

    #[test]
    fn test_reverse_order_flips_everything() {
        let inv = inventory(&[("db", None, false), ("api", None, false)]);
        let mut plan = plan(vec![
            DeployItem::for_project("api").depends_on(["db"]),
            DeployItem::for_project("db"),
        ]);
        plan.reverse_order = true;

        let ordered = sort_items(&plan, &inv).unwrap();
        assert_eq!(projects(&ordered), vec![Some("api"), Some("db")]);
    }

    #[test]
    fn test_dependencies_outside_the_plan_are_ignored() {
        let inv = inventory(&[("api", None, false), ("db", None, false)]);
        let plan = plan(vec![DeployItem::for_project("api").depends_on(["db", "cache"])]);

        let ordered = sort_items(&plan, &inv).unwrap();
        assert_eq!(projects(&ordered), vec![Some("api")]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        // --- Setup: p <-> q, and r downstream of the cycle ---
        let inv = inventory(&[("p", None, false), ("q", None, false), ("r", None, false)]);
        let plan = plan(vec![
            DeployItem::for_project("r").depends_on(["q"]),
            DeployItem::for_project("p").depends_on(["q"]),
            DeployItem::for_project("q").depends_on(["p"]),
        ]);

        // --- Execute ---
        let result = sort_items(&plan, &inv);

        // --- Assert ---
        match result {
            Err(ScheduleError::DependencyCycle { project, members }) => {
                assert!(project == "p" || project == "q");
                assert!(!members.contains(&"r".to_string()));
                assert_eq!(members.first(), members.last());
                assert_eq!(members.len(), 3);
            }
            other => panic!("Expected a dependency cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let inv = inventory(&[("p", None, false)]);
        let plan = plan(vec![DeployItem::for_project("p").depends_on(["p"])]);
        assert!(matches!(
            sort_items(&plan, &inv),
            Err(ScheduleError::DependencyCycle { members, .. }) if members == vec!["p", "p"]
        ));
    }
}
