//! # Info Snapshots
//!
//! Immutable views of every configurable node, produced by folding records.
//!
//! Each `with_*` method returns a new value and leaves `self` untouched. Collections sit
//! behind `Arc`s and are copied only when a change actually touches them
//! (`Arc::make_mut`), so successive snapshots share everything they did not edit.

use crate::core::assignments::insert_to_variable_info_list;
use crate::core::env_query::EnvironmentQuery;
use crate::core::layers::Layer;
use crate::core::lineage::LineageError;
use crate::models::{
    Assignment, EnvironmentRecord, HostGroupRecord, HostRecord, PlayRecord, PlaybookRecord,
    ProjectRecord, VariableInfo,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

// --- VARIABLE SCOPES ---

/// Variables applied only when resolving against environments matched by `query`.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Which environments the override applies to.
    pub query: EnvironmentQuery,
    /// The overriding variables.
    pub variables: Arc<Vec<VariableInfo>>,
}

impl Override {
    /// An empty override for `query`.
    pub fn new(query: EnvironmentQuery) -> Self {
        Self {
            query,
            variables: Arc::default(),
        }
    }
}

/// The variables a node declares itself, plus its environment-scoped overrides in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    variables: Arc<Vec<VariableInfo>>,
    overrides: Arc<Vec<Override>>,
}

impl VariableScope {
    /// Unscoped variables.
    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    /// Overrides, in the order their environment was first assigned to.
    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    /// An assignment carrying an environment goes to the override for that
    /// environment, which is created on first use.
    fn merge(&mut self, assignment: &Assignment) {
        let Some(environment) = &assignment.environment else {
            insert_to_variable_info_list(assignment, Arc::make_mut(&mut self.variables));
            return;
        };

        let overrides = Arc::make_mut(&mut self.overrides);
        let target = match overrides
            .iter()
            .position(|o| o.query.environment() == environment)
        {
            Some(index) => overrides.get_mut(index),
            None => {
                overrides.push(Override::new(EnvironmentQuery::new(environment.clone())));
                overrides.last_mut()
            }
        };
        if let Some(target) = target {
            insert_to_variable_info_list(assignment, Arc::make_mut(&mut target.variables));
        }
    }

    /// The layers this scope contributes when resolving against `environment`: the
    /// unscoped variables, then every override whose query includes the environment.
    ///
    /// # Errors
    /// Propagates lineage errors from the environment hierarchy.
    pub fn layers<'a, F>(
        &self,
        origin: &str,
        environment: &str,
        env_parents_of: F,
    ) -> Result<Vec<Layer>, LineageError>
    where
        F: Fn(&str) -> Option<&'a [String]>,
    {
        let mut layers = vec![Layer::new(origin, Arc::clone(&self.variables))];
        for candidate in self.overrides.iter() {
            if candidate.query.includes(environment, &env_parents_of)? {
                layers.push(Layer::new(
                    format!("{}{}", origin, candidate.query),
                    Arc::clone(&candidate.variables),
                ));
            }
        }
        Ok(layers)
    }
}

fn merge_scope<'a, I>(scope: &VariableScope, assignments: I) -> VariableScope
where
    I: IntoIterator<Item = &'a Assignment>,
{
    let mut next = scope.clone();
    for assignment in assignments {
        next.merge(assignment);
    }
    next
}

// --- ENVIRONMENTS ---

/// A deployment target in the environment hierarchy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentInfo {
    /// Unique name.
    pub name: String,
    /// Declared parents.
    pub parents: Arc<Vec<String>>,
    /// Abstract environments cannot be deployed to.
    pub is_abstract: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Variables assigned to the environment.
    pub variables: Arc<Vec<VariableInfo>>,
}

impl EnvironmentInfo {
    /// An undeclared environment with no parents.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Applies the structural attributes of `record`.
    pub fn with_record(&self, record: &EnvironmentRecord) -> Self {
        Self {
            name: record.name.clone(),
            parents: Arc::new(record.parents.clone()),
            is_abstract: record.is_abstract,
            description: record.description.clone().or_else(|| self.description.clone()),
            variables: Arc::clone(&self.variables),
        }
    }

    /// Merges `assignments` into the environment's variables.
    pub fn with_assign_records<'a, I>(&self, assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a Assignment>,
    {
        let mut next = self.clone();
        let variables = Arc::make_mut(&mut next.variables);
        for assignment in assignments {
            insert_to_variable_info_list(assignment, variables);
        }
        next
    }
}

// --- PROJECTS ---

/// A deployable unit of configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectInfo {
    /// Unique name.
    pub name: String,
    /// Declared parents.
    pub parents: Arc<Vec<String>>,
    /// Abstract projects cannot be deployed.
    pub is_abstract: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Local job order, `None` when inherited.
    pub job_order: Option<i64>,
    /// Host groups the project deploys to.
    pub host_groups: Arc<Vec<String>>,
    /// Local variables and overrides.
    pub scope: VariableScope,
}

impl ProjectInfo {
    /// An undeclared project with no parents.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Applies the structural attributes of `record`.
    pub fn with_record(&self, record: &ProjectRecord) -> Self {
        Self {
            name: record.name.clone(),
            parents: Arc::new(record.parents.clone()),
            is_abstract: record.is_abstract,
            description: record.description.clone().or_else(|| self.description.clone()),
            job_order: record.job_order,
            host_groups: Arc::new(record.host_groups.clone()),
            scope: self.scope.clone(),
        }
    }

    /// Merges `assignments`; environment-scoped ones land in overrides.
    pub fn with_assign_records<'a, I>(&self, assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a Assignment>,
    {
        Self {
            scope: merge_scope(&self.scope, assignments),
            ..self.clone()
        }
    }
}

// --- PLAYBOOKS ---

/// One play of a playbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayInfo {
    /// Owning playbook.
    pub playbook: String,
    /// Name, unique within the playbook.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Tags.
    pub tags: Arc<Vec<String>>,
    /// Targeted host groups.
    pub host_groups: Arc<Vec<String>>,
    /// Local variables and overrides.
    pub scope: VariableScope,
}

impl PlayInfo {
    /// An undeclared play.
    pub fn new(playbook: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            playbook: playbook.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Applies the attributes of `record`.
    pub fn with_record(&self, record: &PlayRecord) -> Self {
        Self {
            playbook: record.playbook.clone(),
            name: record.name.clone(),
            description: record.description.clone().or_else(|| self.description.clone()),
            tags: Arc::new(record.tags.clone()),
            host_groups: Arc::new(record.host_groups.clone()),
            scope: self.scope.clone(),
        }
    }

    /// Merges `assignments`; environment-scoped ones land in overrides.
    pub fn with_assign_records<'a, I>(&self, assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a Assignment>,
    {
        Self {
            scope: merge_scope(&self.scope, assignments),
            ..self.clone()
        }
    }
}

/// A named, inheritable collection of plays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybookInfo {
    /// Unique name.
    pub name: String,
    /// Declared parents.
    pub parents: Arc<Vec<String>>,
    /// Abstract playbooks are only inherited from.
    pub is_abstract: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Playbook-wide variables and overrides.
    pub scope: VariableScope,
    /// Plays defined (or redefined) by this playbook.
    pub plays: Arc<BTreeMap<String, Arc<PlayInfo>>>,
}

impl PlaybookInfo {
    /// An undeclared playbook with no parents.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The play named `name`, when this playbook defines it.
    pub fn play(&self, name: &str) -> Option<&PlayInfo> {
        self.plays.get(name).map(Arc::as_ref)
    }

    /// Applies the structural attributes of `record`; plays are kept.
    pub fn with_record(&self, record: &PlaybookRecord) -> Self {
        Self {
            name: record.name.clone(),
            parents: Arc::new(record.parents.clone()),
            is_abstract: record.is_abstract,
            description: record.description.clone().or_else(|| self.description.clone()),
            scope: self.scope.clone(),
            plays: Arc::clone(&self.plays),
        }
    }

    /// Defines or updates one of the plays.
    pub fn with_play_record(&self, record: &PlayRecord) -> Self {
        let mut next = self.clone();
        let plays = Arc::make_mut(&mut next.plays);
        let updated = plays
            .get(&record.name)
            .map(|play| play.with_record(record))
            .unwrap_or_else(|| PlayInfo::new(&self.name, &record.name).with_record(record));
        plays.insert(record.name.clone(), Arc::new(updated));
        next
    }

    /// Merges `assignments`. Assignments naming a play go to that play, which is
    /// created when missing; the others go to the playbook itself.
    pub fn with_assign_records<'a, I>(&self, assignments: I) -> Self
    where
        I: IntoIterator<Item = &'a Assignment>,
    {
        let mut next = self.clone();
        for assignment in assignments {
            match &assignment.play {
                None => next.scope.merge(assignment),
                Some(play_name) => {
                    let plays = Arc::make_mut(&mut next.plays);
                    let play = plays
                        .entry(play_name.clone())
                        .or_insert_with(|| Arc::new(PlayInfo::new(&self.name, play_name)));
                    Arc::make_mut(play).scope.merge(assignment);
                }
            }
        }
        next
    }
}

// --- HOSTS ---

/// A machine inside a host group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostInfo {
    /// Name, unique within the group.
    pub name: String,
    /// Owning group.
    pub host_group: String,
    /// Network address.
    pub address: String,
    /// Environments the host serves; every environment when `None`.
    pub environment: Option<EnvironmentQuery>,
}

impl From<&HostRecord> for HostInfo {
    fn from(record: &HostRecord) -> Self {
        Self {
            name: record.name.clone(),
            host_group: record.host_group.clone(),
            address: record.address.clone(),
            environment: record.environment.clone().map(EnvironmentQuery::new),
        }
    }
}

/// An inheritable set of hosts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostGroupInfo {
    /// Unique name.
    pub name: String,
    /// Declared parents.
    pub parents: Arc<Vec<String>>,
    /// Free-form description.
    pub description: Option<String>,
    /// Hosts in declaration order.
    pub hosts: Arc<Vec<HostInfo>>,
}

impl HostGroupInfo {
    /// An undeclared group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Applies the structural attributes of `record`.
    pub fn with_record(&self, record: &HostGroupRecord) -> Self {
        Self {
            name: record.name.clone(),
            parents: Arc::new(record.parents.clone()),
            description: record.description.clone().or_else(|| self.description.clone()),
            hosts: Arc::clone(&self.hosts),
        }
    }

    /// Applies several group records in order and returns the resulting group.
    pub fn with_host_group_records<'a, I>(&self, records: I) -> Self
    where
        I: IntoIterator<Item = &'a HostGroupRecord>,
    {
        records
            .into_iter()
            .fold(self.clone(), |group, record| group.with_record(record))
    }

    /// Adds a host, replacing any host with the same name.
    pub fn with_host(&self, record: &HostRecord) -> Self {
        let mut next = self.clone();
        let hosts = Arc::make_mut(&mut next.hosts);
        let host = HostInfo::from(record);
        match hosts.iter_mut().find(|h| h.name == host.name) {
            Some(existing) => *existing = host,
            None => hosts.push(host),
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentId, Variable};

    fn assign(id: &str, name: &str, value: i64) -> Assignment {
        Assignment::new(
            id.parse::<AssignmentId>().unwrap(),
            VariableInfo::new(name, Variable::value(value)),
        )
    }

    #[test]
    fn test_with_methods_leave_the_original_untouched() {
        // --- Setup ---
        let base = ProjectInfo::new("app").with_assign_records([&assign("1", "timeout", 30)]);

        // --- Execute ---
        let edited = base.with_assign_records([&assign("2", "retries", 3)]);

        // --- Assert ---
        assert_eq!(base.scope.variables().len(), 1);
        assert_eq!(edited.scope.variables().len(), 2);
    }

    #[test]
    fn test_untouched_collections_are_shared() {
        let base = ProjectInfo::new("app").with_assign_records([&assign("1", "timeout", 30)]);
        let renamed = base.with_record(&ProjectRecord {
            name: "app".to_string(),
            job_order: Some(5),
            ..Default::default()
        });

        assert!(Arc::ptr_eq(&base.scope.variables, &renamed.scope.variables));
        assert_eq!(renamed.job_order, Some(5));
    }

    #[test]
    fn test_environment_scoped_assignments_become_overrides() {
        let project = ProjectInfo::new("app").with_assign_records([
            &assign("1", "timeout", 30),
            &assign("2", "timeout", 10).in_environment("staging"),
            &assign("3", "timeout", 60).in_environment("prod"),
            &assign("4", "retries", 1).in_environment("staging"),
        ]);

        let overrides = project.scope.overrides();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].query, EnvironmentQuery::new("staging"));
        assert_eq!(overrides[0].variables.len(), 2);
        assert_eq!(overrides[1].query, EnvironmentQuery::new("prod"));
        assert_eq!(project.scope.variables().len(), 1);
    }

    #[test]
    fn test_scope_layers_filter_overrides_by_environment() {
        // --- Setup: root <- staging, root <- prod ---
        let parents: BTreeMap<String, Vec<String>> = [
            ("root".to_string(), vec![]),
            ("staging".to_string(), vec!["root".to_string()]),
            ("prod".to_string(), vec!["root".to_string()]),
        ]
        .into_iter()
        .collect();
        let project = ProjectInfo::new("app").with_assign_records([
            &assign("1", "timeout", 30),
            &assign("2", "timeout", 10).in_environment("staging"),
            &assign("3", "region", 1).in_environment("root"),
        ]);

        // --- Execute ---
        let layers = project
            .scope
            .layers("project:app", "staging", |n| {
                parents.get(n).map(Vec::as_slice)
            })
            .unwrap();

        // --- Assert ---
        let origins: Vec<&str> = layers.iter().map(Layer::origin).collect();
        assert_eq!(
            origins,
            vec!["project:app", "project:app@staging", "project:app@root"]
        );
    }

    #[test]
    fn test_play_assignments_are_routed_to_the_play() {
        let playbook = PlaybookInfo::new("site").with_assign_records([
            &assign("1", "workers", 2),
            &assign("2", "workers", 8).for_playbook("site", Some("web".to_string())),
        ]);

        assert_eq!(playbook.scope.variables().len(), 1);
        let play = playbook.play("web").unwrap();
        assert_eq!(play.playbook, "site");
        assert_eq!(play.scope.variables()[0].variable, Variable::value(8));
    }

    #[test]
    fn test_play_record_keeps_previous_variables() {
        let playbook = PlaybookInfo::new("site")
            .with_assign_records([&assign("1", "w", 1).for_playbook("site", Some("web".to_string()))])
            .with_play_record(&PlayRecord {
                playbook: "site".to_string(),
                name: "web".to_string(),
                tags: vec!["frontend".to_string()],
                ..Default::default()
            });

        let play = playbook.play("web").unwrap();
        assert_eq!(play.tags.as_slice(), ["frontend".to_string()]);
        assert_eq!(play.scope.variables().len(), 1);
    }

    #[test]
    fn test_host_group_records_return_the_new_value() {
        // --- Setup ---
        let original = HostGroupInfo::new("web");
        let records = [
            HostGroupRecord {
                name: "web".to_string(),
                parents: vec!["all".to_string()],
                description: Some("front".to_string()),
            },
            HostGroupRecord {
                name: "web".to_string(),
                parents: vec!["all".to_string(), "linux".to_string()],
                description: None,
            },
        ];

        // --- Execute ---
        let updated = original.with_host_group_records(&records);

        // --- Assert ---
        assert!(original.parents.is_empty());
        assert_eq!(updated.parents.len(), 2);
        assert_eq!(updated.description.as_deref(), Some("front"));
    }

    #[test]
    fn test_with_host_replaces_by_name() {
        let record = |address: &str| HostRecord {
            name: "web-1".to_string(),
            host_group: "web".to_string(),
            address: address.to_string(),
            environment: None,
        };
        let group = HostGroupInfo::new("web")
            .with_host(&record("10.0.0.1"))
            .with_host(&record("10.0.0.2"));

        assert_eq!(group.hosts.len(), 1);
        assert_eq!(group.hosts[0].address, "10.0.0.2");
    }
}
