//! # Assignments
//!
//! Folds a log of versioned variable edits into a materialized variable list.
//!
//! A list is split in two regions: unassigned entries (no id) first, then entries
//! carrying an assignment id, kept sorted by the dotted-id order. Edits usually arrive
//! in id order, so the insertion point is found with a short backward scan from the tail.

use crate::models::{Assignment, VariableInfo};
use std::cmp::Ordering;

/// What a single merge did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was inserted at `index`.
    Inserted {
        /// Position of the new entry.
        index: usize,
    },
    /// The entry with the same id at `index` was overwritten.
    Replaced {
        /// Position of the overwritten entry.
        index: usize,
    },
    /// A tombstone erased `count` entries (0 when the id was not present).
    Removed {
        /// Number of erased entries.
        count: usize,
    },
}

/// Merges one assignment into `list`.
///
/// A disabled assignment removes every entry with its id and is a no-op when the id is
/// absent, so replaying the same log is safe. Otherwise the assignment's variable,
/// tagged with its id, replaces the entry with an equal id or is inserted right after
/// the closest smaller id (or right after the unassigned region, or at the head).
pub fn insert_to_variable_info_list(
    assignment: &Assignment,
    list: &mut Vec<VariableInfo>,
) -> MergeOutcome {
    if assignment.disabled {
        let before = list.len();
        list.retain(|entry| entry.id.as_ref() != Some(&assignment.id));
        let count = before - list.len();
        log::trace!("Tombstone '{}' removed {} entries.", assignment.id, count);
        return MergeOutcome::Removed { count };
    }

    let entry = assignment.variable.clone().with_id(assignment.id.clone());

    // `index` is the insertion point; it moves left past every larger id.
    let mut index = list.len();
    while let Some(existing) = index.checked_sub(1).and_then(|i| list.get(i)) {
        let Some(existing_id) = &existing.id else {
            // Reached the unassigned region.
            break;
        };
        match existing_id.cmp(&assignment.id) {
            Ordering::Equal => {
                let at = index - 1;
                if let Some(slot) = list.get_mut(at) {
                    *slot = entry;
                }
                log::trace!("Assignment '{}' replaced entry #{}.", assignment.id, at);
                return MergeOutcome::Replaced { index: at };
            }
            Ordering::Less => break,
            Ordering::Greater => index -= 1,
        }
    }

    list.insert(index, entry);
    log::trace!("Assignment '{}' inserted at #{}.", assignment.id, index);
    MergeOutcome::Inserted { index }
}

/// Merges `assignments` into `list` in iteration order.
pub fn merge_assignments<'a, I>(list: &mut Vec<VariableInfo>, assignments: I)
where
    I: IntoIterator<Item = &'a Assignment>,
{
    for assignment in assignments {
        insert_to_variable_info_list(assignment, list);
    }
}

/// Checks the list invariant: unassigned entries first, then strictly ascending ids.
pub fn is_well_ordered(list: &[VariableInfo]) -> bool {
    list.windows(2).all(|pair| match pair {
        [a, b] => match (&a.id, &b.id) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(x), Some(y)) => x < y,
        },
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentId, Variable};

    fn id(s: &str) -> AssignmentId {
        s.parse().unwrap()
    }

    fn assign(dotted: &str, name: &str, value: i64) -> Assignment {
        Assignment::new(id(dotted), VariableInfo::new(name, Variable::value(value)))
    }

    fn ids(list: &[VariableInfo]) -> Vec<String> {
        list.iter()
            .map(|e| e.id.as_ref().map(|i| i.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_out_of_order_arrival_is_sorted() {
        let mut list = Vec::new();
        for dotted in ["1", "3", "2"] {
            insert_to_variable_info_list(&assign(dotted, "v", 0), &mut list);
        }
        assert_eq!(ids(&list), vec!["1", "2", "3"]);
        assert!(is_well_ordered(&list));
    }

    #[test]
    fn test_same_id_replaces_in_place() {
        let mut list = Vec::new();
        insert_to_variable_info_list(&assign("4", "timeout", 30), &mut list);
        insert_to_variable_info_list(&assign("5", "retries", 3), &mut list);
        let outcome = insert_to_variable_info_list(&assign("4", "timeout", 45), &mut list);

        assert_eq!(outcome, MergeOutcome::Replaced { index: 0 });
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].variable, Variable::value(45));
    }

    #[test]
    fn test_tombstone_for_missing_id_is_noop() {
        let mut list = Vec::new();
        insert_to_variable_info_list(&assign("1", "a", 1), &mut list);
        let before = list.clone();

        let outcome = insert_to_variable_info_list(&Assignment::tombstone(id("5"), "a"), &mut list);

        assert_eq!(outcome, MergeOutcome::Removed { count: 0 });
        assert_eq!(list, before);
    }

    #[test]
    fn test_tombstone_removes_exactly_its_entry() {
        let mut list = Vec::new();
        for dotted in ["4", "5", "6"] {
            insert_to_variable_info_list(&assign(dotted, "v", 0), &mut list);
        }
        let outcome = insert_to_variable_info_list(&Assignment::tombstone(id("5"), "v"), &mut list);
        assert_eq!(outcome, MergeOutcome::Removed { count: 1 });
        assert_eq!(ids(&list), vec!["4", "6"]);

        // Replaying the same tombstone changes nothing.
        insert_to_variable_info_list(&Assignment::tombstone(id("5"), "v"), &mut list);
        assert_eq!(ids(&list), vec!["4", "6"]);
    }

    #[test]
    fn test_unassigned_prefix_is_preserved() {
        let mut list = vec![
            VariableInfo::new("seed_a", Variable::value(1)),
            VariableInfo::new("seed_b", Variable::value(2)),
        ];
        insert_to_variable_info_list(&assign("7", "x", 0), &mut list);
        insert_to_variable_info_list(&assign("2", "y", 0), &mut list);

        assert_eq!(list[0].name, "seed_a");
        assert_eq!(list[1].name, "seed_b");
        assert_eq!(ids(&list), vec!["", "", "2", "7"]);
        assert!(is_well_ordered(&list));
    }

    #[test]
    fn test_smallest_id_goes_to_head_without_prefix() {
        let mut list = Vec::new();
        insert_to_variable_info_list(&assign("9", "a", 0), &mut list);
        let outcome = insert_to_variable_info_list(&assign("1.5", "b", 0), &mut list);
        assert_eq!(outcome, MergeOutcome::Inserted { index: 0 });
    }

    #[test]
    fn test_dotted_components_compare_as_integers() {
        let mut list = Vec::new();
        for dotted in ["3.10", "3.1.2", "3.2", "3.1", "10", "3"] {
            insert_to_variable_info_list(&assign(dotted, "v", 0), &mut list);
        }
        assert_eq!(ids(&list), vec!["3", "3.1", "3.1.2", "3.2", "3.10", "10"]);
    }

    #[test]
    fn test_merge_keeps_invariant_for_scrambled_log() {
        // --- Setup: a deterministic permutation of 40 ids, with replays ---
        let log: Vec<Assignment> = (0..60u64)
            .map(|i| (i * 17) % 40)
            .map(|n| assign(&format!("{}.{}", n / 4, n % 4), "v", n as i64))
            .collect();

        // --- Execute ---
        let mut list = Vec::new();
        merge_assignments(&mut list, &log);

        // --- Assert ---
        assert_eq!(list.len(), 40);
        assert!(is_well_ordered(&list));
    }

    #[test]
    fn test_is_well_ordered_detects_violations() {
        let unassigned_after_assigned = vec![
            VariableInfo::new("a", Variable::value(1)).with_id(id("1")),
            VariableInfo::new("b", Variable::value(2)),
        ];
        assert!(!is_well_ordered(&unassigned_after_assigned));

        let descending = vec![
            VariableInfo::new("a", Variable::value(1)).with_id(id("2")),
            VariableInfo::new("b", Variable::value(2)).with_id(id("1")),
        ];
        assert!(!is_well_ordered(&descending));
    }
}
