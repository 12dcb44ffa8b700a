//! # Lineage
//!
//! Linearizes multi-parent inheritance graphs into a deterministic resolution order.
//!
//! The graph is never materialized: callers hand in a `parents_of` function that
//! returns the declared parents of a node, or `None` when the node does not exist.
//! Traversal is an iterative depth-first search with an explicit frame stack, so deep
//! or wide hierarchies cannot exhaust the call stack.
//!
//! - `descending`: most general ancestor first, the start node last. Every ancestor of
//!   a node precedes it and each node appears exactly once, even in diamonds. Sibling
//!   ties follow parent declaration order.
//! - `ascending`: the exact reverse.
//! - `nearest`: pre-order search for the first node carrying an attribute, self first.

use std::collections::HashSet;
use std::ops::ControlFlow;
use thiserror::Error;

/// Errors raised while walking an inheritance graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineageError {
    /// A node (or a parent reference) names something that does not exist.
    #[error("Unknown node '{name}'{}.", describe_reference(.referenced_by))]
    MissingNode {
        /// The name that could not be found.
        name: String,
        /// The node that declared it as a parent, if any.
        referenced_by: Option<String>,
    },
    /// The traversal re-entered a node that is still being visited.
    #[error("Cyclic inheritance detected: {}.", .cycle.join(" -> "))]
    Cyclic {
        /// The cycle, starting and ending with the re-entered node.
        cycle: Vec<String>,
    },
}

fn describe_reference(referenced_by: &Option<String>) -> String {
    referenced_by
        .as_ref()
        .map(|child| format!(" referenced as a parent of '{}'", child))
        .unwrap_or_default()
}

type LineageResult<T> = Result<T, LineageError>;

/// One node on the DFS stack together with the position of its next parent.
struct Frame<'a> {
    node: String,
    parents: &'a [String],
    next: usize,
}

/// Shared depth-first walk.
///
/// `on_enter` runs when a node is first reached (pre-order) and may stop the walk
/// with a value. `on_exit` runs once every ancestor of the node has been finished
/// (post-order). A node already finished through another path is skipped.
fn walk<'a, F, T>(
    start: &str,
    parents_of: F,
    mut on_enter: impl FnMut(&str) -> ControlFlow<T>,
    mut on_exit: impl FnMut(&str),
) -> LineageResult<Option<T>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let root_parents = parents_of(start).ok_or_else(|| LineageError::MissingNode {
        name: start.to_string(),
        referenced_by: None,
    })?;
    if let ControlFlow::Break(found) = on_enter(start) {
        return Ok(Some(found));
    }

    let mut visiting: HashSet<String> = HashSet::from([start.to_string()]);
    let mut done: HashSet<String> = HashSet::new();
    let mut stack = vec![Frame {
        node: start.to_string(),
        parents: root_parents,
        next: 0,
    }];

    loop {
        let Some(frame) = stack.last_mut() else {
            break;
        };
        let parents = frame.parents;
        let next_parent = parents.get(frame.next);
        frame.next += 1;

        let Some(parent) = next_parent else {
            // Every parent of this node is finished.
            if let Some(finished) = stack.pop() {
                visiting.remove(&finished.node);
                on_exit(&finished.node);
                done.insert(finished.node);
            }
            continue;
        };
        let child = frame.node.clone();

        if done.contains(parent.as_str()) {
            continue;
        }
        if visiting.contains(parent.as_str()) {
            let entered_at = stack
                .iter()
                .position(|f| f.node == *parent)
                .unwrap_or_default();
            let mut cycle: Vec<String> = stack
                .iter()
                .skip(entered_at)
                .map(|f| f.node.clone())
                .collect();
            cycle.push(parent.clone());
            return Err(LineageError::Cyclic { cycle });
        }

        let grandparents = parents_of(parent).ok_or_else(|| LineageError::MissingNode {
            name: parent.clone(),
            referenced_by: Some(child),
        })?;
        if let ControlFlow::Break(found) = on_enter(parent) {
            return Ok(Some(found));
        }
        visiting.insert(parent.clone());
        stack.push(Frame {
            node: parent.clone(),
            parents: grandparents,
            next: 0,
        });
    }

    Ok(None)
}

/// Returns `start` and all of its ancestors, most general first and `start` last.
///
/// # Errors
/// `MissingNode` for an unknown start or parent, `Cyclic` when the graph loops.
pub fn descending<'a, F>(start: &str, parents_of: F) -> LineageResult<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut order = Vec::new();
    walk(
        start,
        parents_of,
        |_| ControlFlow::<()>::Continue(()),
        |node| order.push(node.to_string()),
    )?;
    log::trace!("Lineage of '{}' (descending): {:?}", start, order);
    Ok(order)
}

/// Returns `start` and all of its ancestors, `start` first. Exact reverse of [`descending`].
pub fn ascending<'a, F>(start: &str, parents_of: F) -> LineageResult<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut order = descending(start, parents_of)?;
    order.reverse();
    Ok(order)
}

/// Same as [`descending`] without `start` itself.
pub fn descending_parents<'a, F>(start: &str, parents_of: F) -> LineageResult<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut order = descending(start, parents_of)?;
    // The start node always finishes last.
    order.pop();
    Ok(order)
}

/// Whether `ancestor` appears among the (transitive) parents of `node`.
pub fn is_ancestor<'a, F>(ancestor: &str, node: &str, parents_of: F) -> LineageResult<bool>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    Ok(descending_parents(node, parents_of)?
        .iter()
        .any(|name| name == ancestor))
}

/// Finds the nearest value of an inherited attribute.
///
/// `start` is checked first; otherwise parents are searched depth-first in declaration
/// order and the first value found wins. The walk stops as soon as a value is found.
pub fn nearest<'a, F, A, T>(start: &str, parents_of: F, attribute_of: A) -> LineageResult<Option<T>>
where
    F: Fn(&str) -> Option<&'a [String]>,
    A: Fn(&str) -> Option<T>,
{
    walk(
        start,
        parents_of,
        |node| match attribute_of(node) {
            Some(value) => ControlFlow::Break(value),
            None => ControlFlow::Continue(()),
        },
        |_| {},
    )
}
