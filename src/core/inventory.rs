//! # Inventory
//!
//! The Info snapshot: every node of every kind, folded from a record stream.
//!
//! Records may arrive in any order. An assignment, host or play addressed to an owner
//! that has not been declared yet creates a placeholder owner with no parents; the
//! later declaration fills it in. [`Inventory::validate`] checks the finished
//! snapshot for dangling parent references.

use crate::core::info::{EnvironmentInfo, HostGroupInfo, PlaybookInfo, ProjectInfo};
use crate::core::lineage::{self, LineageError};
use crate::core::assignments::insert_to_variable_info_list;
use crate::models::{Assignment, Record, VariableInfo};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The node kinds carrying an inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// See [`EnvironmentInfo`].
    Environment,
    /// See [`ProjectInfo`].
    Project,
    /// See [`PlaybookInfo`].
    Playbook,
    /// See [`HostGroupInfo`].
    HostGroup,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Environment => "environment",
            Self::Project => "project",
            Self::Playbook => "playbook",
            Self::HostGroup => "host group",
        };
        f.write_str(label)
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "environment" | "env" => Ok(Self::Environment),
            "project" => Ok(Self::Project),
            "playbook" => Ok(Self::Playbook),
            "host group" | "hostgroup" | "group" => Ok(Self::HostGroup),
            other => Err(format!(
                "unknown node kind '{other}' (expected environment, project, playbook or host-group)"
            )),
        }
    }
}

type Table<T> = Arc<BTreeMap<String, Arc<T>>>;

/// Replaces `table[name]` with `change(current)`, starting from `create()` when absent.
fn update<T>(
    table: &mut Table<T>,
    name: &str,
    create: impl FnOnce() -> T,
    change: impl FnOnce(&T) -> T,
) {
    let entries = Arc::make_mut(table);
    let next = match entries.get(name) {
        Some(current) => change(current),
        None => change(&create()),
    };
    entries.insert(name.to_string(), Arc::new(next));
}

fn parents_in<'s, T>(
    table: &'s Table<T>,
    parents: impl Fn(&'s T) -> &'s [String] + 's,
) -> impl Fn(&str) -> Option<&'s [String]> + 's {
    move |name: &str| table.get(name).map(|info| parents(info))
}

/// A snapshot of every environment, project, playbook and host group.
///
/// Cloning is cheap: tables are shared until one of the clones is edited.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    environments: Table<EnvironmentInfo>,
    projects: Table<ProjectInfo>,
    playbooks: Table<PlaybookInfo>,
    host_groups: Table<HostGroupInfo>,
    globals: Arc<Vec<VariableInfo>>,
}

impl Inventory {
    /// An empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `records` in order into an empty inventory.
    pub fn fold<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        Self::new().with_records(records)
    }

    /// Returns a new inventory with `record` applied.
    pub fn with_record(&self, record: &Record) -> Self {
        let mut next = self.clone();
        next.apply(record);
        next
    }

    /// Returns a new inventory with every record applied in order.
    pub fn with_records<'a, I>(&self, records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut next = self.clone();
        let mut count = 0usize;
        for record in records {
            next.apply(record);
            count += 1;
        }
        log::debug!("Folded {} records into the inventory.", count);
        next
    }

    fn apply(&mut self, record: &Record) {
        log::trace!("Applying {}.", record.describe());
        match record {
            Record::Environment(r) => update(
                &mut self.environments,
                &r.name,
                || EnvironmentInfo::new(&r.name),
                |info| info.with_record(r),
            ),
            Record::Project(r) => update(
                &mut self.projects,
                &r.name,
                || ProjectInfo::new(&r.name),
                |info| info.with_record(r),
            ),
            Record::HostGroup(r) => update(
                &mut self.host_groups,
                &r.name,
                || HostGroupInfo::new(&r.name),
                |info| info.with_record(r),
            ),
            Record::Host(r) => update(
                &mut self.host_groups,
                &r.host_group,
                || HostGroupInfo::new(&r.host_group),
                |info| info.with_host(r),
            ),
            Record::Playbook(r) => update(
                &mut self.playbooks,
                &r.name,
                || PlaybookInfo::new(&r.name),
                |info| info.with_record(r),
            ),
            Record::Play(r) => update(
                &mut self.playbooks,
                &r.playbook,
                || PlaybookInfo::new(&r.playbook),
                |info| info.with_play_record(r),
            ),
            Record::Assignment(a) => self.apply_assignment(a),
        }
    }

    /// Routes an assignment to its owner: project, then playbook, then environment,
    /// falling back to the global variables.
    fn apply_assignment(&mut self, assignment: &Assignment) {
        if let Some(project) = &assignment.project {
            update(
                &mut self.projects,
                project,
                || ProjectInfo::new(project),
                |info| info.with_assign_records([assignment]),
            );
        } else if let Some(playbook) = &assignment.playbook {
            update(
                &mut self.playbooks,
                playbook,
                || PlaybookInfo::new(playbook),
                |info| info.with_assign_records([assignment]),
            );
        } else if let Some(environment) = &assignment.environment {
            update(
                &mut self.environments,
                environment,
                || EnvironmentInfo::new(environment),
                |info| info.with_assign_records([assignment]),
            );
        } else {
            insert_to_variable_info_list(assignment, Arc::make_mut(&mut self.globals));
        }
    }

    // --- LOOKUPS ---

    /// Global variables, below every environment.
    pub fn globals(&self) -> &Arc<Vec<VariableInfo>> {
        &self.globals
    }

    /// The environment named `name`.
    pub fn environment(&self, name: &str) -> Option<&EnvironmentInfo> {
        self.environments.get(name).map(Arc::as_ref)
    }

    /// The project named `name`.
    pub fn project(&self, name: &str) -> Option<&ProjectInfo> {
        self.projects.get(name).map(Arc::as_ref)
    }

    /// The playbook named `name`.
    pub fn playbook(&self, name: &str) -> Option<&PlaybookInfo> {
        self.playbooks.get(name).map(Arc::as_ref)
    }

    /// The host group named `name`.
    pub fn host_group(&self, name: &str) -> Option<&HostGroupInfo> {
        self.host_groups.get(name).map(Arc::as_ref)
    }

    /// All projects, sorted by name.
    pub fn projects(&self) -> impl Iterator<Item = &ProjectInfo> {
        self.projects.values().map(Arc::as_ref)
    }

    /// Names of every node of `kind`, sorted.
    pub fn names(&self, kind: NodeKind) -> Vec<&str> {
        match kind {
            NodeKind::Environment => self.environments.keys().map(String::as_str).collect(),
            NodeKind::Project => self.projects.keys().map(String::as_str).collect(),
            NodeKind::Playbook => self.playbooks.keys().map(String::as_str).collect(),
            NodeKind::HostGroup => self.host_groups.keys().map(String::as_str).collect(),
        }
    }

    // --- PARENT FUNCTIONS (for lineage) ---

    /// Parent lookup over the environment hierarchy.
    pub fn environment_parents<'s>(&'s self) -> impl Fn(&str) -> Option<&'s [String]> + 's {
        parents_in(&self.environments, |info: &'s EnvironmentInfo| info.parents.as_slice())
    }

    /// Parent lookup over the project hierarchy.
    pub fn project_parents<'s>(&'s self) -> impl Fn(&str) -> Option<&'s [String]> + 's {
        parents_in(&self.projects, |info: &'s ProjectInfo| info.parents.as_slice())
    }

    /// Parent lookup over the playbook hierarchy.
    pub fn playbook_parents<'s>(&'s self) -> impl Fn(&str) -> Option<&'s [String]> + 's {
        parents_in(&self.playbooks, |info: &'s PlaybookInfo| info.parents.as_slice())
    }

    /// Parent lookup over the host group hierarchy.
    pub fn host_group_parents<'s>(&'s self) -> impl Fn(&str) -> Option<&'s [String]> + 's {
        parents_in(&self.host_groups, |info: &'s HostGroupInfo| info.parents.as_slice())
    }

    /// Linearizes the hierarchy of `kind` from `name`, most general first.
    ///
    /// # Errors
    /// See [`lineage::descending`].
    pub fn lineage(&self, kind: NodeKind, name: &str) -> Result<Vec<String>, LineageError> {
        match kind {
            NodeKind::Environment => lineage::descending(name, self.environment_parents()),
            NodeKind::Project => lineage::descending(name, self.project_parents()),
            NodeKind::Playbook => lineage::descending(name, self.playbook_parents()),
            NodeKind::HostGroup => lineage::descending(name, self.host_group_parents()),
        }
    }

    /// Checks that every node of every kind linearizes: all parent references
    /// resolve and no hierarchy is cyclic. Errors are returned in kind then name order.
    ///
    /// # Errors
    /// The lineage errors found, tagged with the kind of the offending node.
    pub fn validate(&self) -> Result<(), Vec<(NodeKind, LineageError)>> {
        let mut problems = Vec::new();
        for kind in [
            NodeKind::Environment,
            NodeKind::Project,
            NodeKind::Playbook,
            NodeKind::HostGroup,
        ] {
            for name in self.names(kind) {
                if let Err(e) = self.lineage(kind, name)
                    && !problems.iter().any(|(k, known)| *k == kind && *known == e)
                {
                    problems.push((kind, e));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AssignmentId, EnvironmentRecord, HostRecord, PlayRecord, ProjectRecord, Variable,
    };

    fn env(name: &str, parents: &[&str]) -> Record {
        Record::Environment(EnvironmentRecord {
            name: name.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        })
    }

    fn project(name: &str, parents: &[&str]) -> Record {
        Record::Project(ProjectRecord {
            name: name.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        })
    }

    fn assign(id: &str, name: &str, value: i64) -> Assignment {
        Assignment::new(
            id.parse::<AssignmentId>().unwrap(),
            VariableInfo::new(name, Variable::value(value)),
        )
    }

    #[test]
    fn test_node_kind_parses_cli_spellings() {
        assert_eq!("env".parse::<NodeKind>(), Ok(NodeKind::Environment));
        assert_eq!("Project".parse::<NodeKind>(), Ok(NodeKind::Project));
        assert_eq!("host-group".parse::<NodeKind>(), Ok(NodeKind::HostGroup));
        assert_eq!("host_group".parse::<NodeKind>(), Ok(NodeKind::HostGroup));
        assert!("cluster".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_fold_routes_assignments_to_owners() {
        // --- Setup ---
        let records = vec![
            env("root", &[]),
            project("app", &[]),
            Record::Assignment(assign("1", "region", 1)),
            Record::Assignment(assign("2", "tier", 1).in_environment("root")),
            Record::Assignment(assign("3", "timeout", 30).for_project("app")),
            Record::Assignment(
                assign("4", "workers", 2).for_playbook("site", Some("web".to_string())),
            ),
        ];

        // --- Execute ---
        let inventory = Inventory::fold(&records);

        // --- Assert ---
        assert_eq!(inventory.globals().len(), 1);
        assert_eq!(inventory.environment("root").unwrap().variables.len(), 1);
        assert_eq!(inventory.project("app").unwrap().scope.variables().len(), 1);
        assert!(inventory.playbook("site").unwrap().play("web").is_some());
    }

    #[test]
    fn test_assignment_before_declaration_creates_placeholder() {
        let records = vec![
            Record::Assignment(assign("1", "timeout", 30).for_project("app")),
            project("app", &["base"]),
            project("base", &[]),
        ];
        let inventory = Inventory::fold(&records);
        let app = inventory.project("app").unwrap();

        assert_eq!(app.parents.as_slice(), ["base".to_string()]);
        assert_eq!(app.scope.variables().len(), 1);
        assert!(inventory.validate().is_ok());
    }

    #[test]
    fn test_with_record_keeps_previous_snapshot() {
        let before = Inventory::fold(&[env("root", &[])]);
        let after = before.with_record(&env("prod", &["root"]));

        assert!(before.environment("prod").is_none());
        assert!(after.environment("prod").is_some());
        assert_eq!(after.lineage(NodeKind::Environment, "prod").unwrap(), vec!["root", "prod"]);
    }

    #[test]
    fn test_hosts_and_plays_create_their_owner() {
        let inventory = Inventory::fold(&[
            Record::Host(HostRecord {
                name: "web-1".to_string(),
                host_group: "web".to_string(),
                address: "10.0.0.1".to_string(),
                environment: None,
            }),
            Record::Play(PlayRecord {
                playbook: "site".to_string(),
                name: "deploy".to_string(),
                ..Default::default()
            }),
        ]);

        assert_eq!(inventory.host_group("web").unwrap().hosts.len(), 1);
        assert!(inventory.playbook("site").unwrap().play("deploy").is_some());
    }

    #[test]
    fn test_validate_reports_dangling_parents_and_cycles() {
        // --- Setup ---
        let inventory = Inventory::fold(&[
            project("app", &["ghost"]),
            env("a", &["b"]),
            env("b", &["a"]),
        ]);

        // --- Execute ---
        let problems = inventory.validate().unwrap_err();

        // --- Assert ---
        assert!(problems.iter().any(|(kind, e)| *kind == NodeKind::Project
            && matches!(e, LineageError::MissingNode { name, referenced_by: Some(child) }
                if name == "ghost" && child == "app")));
        assert!(problems.iter().any(|(kind, e)| *kind == NodeKind::Environment
            && matches!(e, LineageError::Cyclic { .. })));
    }
}
