// src/models.rs

//! Plain data handed to and returned from the resolution engine: variables and
//! their wire format, the record stream produced by front-ends, deploy plans and
//! version history entries.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

lazy_static! {
    // Dot-separated non-negative integers: "3", "3.1", "3.1.2".
    static ref ASSIGNMENT_ID_RE: Regex = Regex::new(r"^\d+(\.\d+)*$").unwrap();
}

// --- ASSIGNMENT IDS ---

/// Errors raised while parsing a dotted assignment id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    /// The text is not a sequence of dot-separated integers.
    #[error("Invalid assignment id '{0}': expected dot-separated integers such as '3.1.2'.")]
    Malformed(String),
    /// One of the components does not fit into 64 bits.
    #[error("Invalid assignment id '{0}': component out of range.")]
    OutOfRange(String),
}

/// A hierarchical, dot-separated assignment id such as `3.1.2`.
///
/// Ids compare component-wise as integers. When one id is a strict prefix of the
/// other, the shorter one sorts first (`3.1` < `3.1.2`). This is the derived
/// lexicographic order of the component vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssignmentId(Vec<u64>);

impl AssignmentId {
    /// Builds a single-component id.
    pub fn root(value: u64) -> Self {
        Self(vec![value])
    }

    /// Returns a new id with `value` appended as the last component (`3.1` -> `3.1.value`).
    pub fn child(&self, value: u64) -> Self {
        let mut components = self.0.clone();
        components.push(value);
        Self(components)
    }

    /// The integer components of this id.
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for AssignmentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !ASSIGNMENT_ID_RE.is_match(trimmed) {
            return Err(IdParseError::Malformed(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| IdParseError::OutOfRange(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TryFrom<String> for AssignmentId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssignmentId> for String {
    fn from(value: AssignmentId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", component)?;
            first = false;
        }
        Ok(())
    }
}

// --- VARIABLES ---

/// A typed configuration value.
///
/// Closures are opaque source text: the engine locates and layers them, it never
/// evaluates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariableWire", into = "VariableWire")]
pub enum Variable {
    /// A plain JSON scalar or document. `Value(Null)` is "defined as null".
    Value(serde_json::Value),
    /// A reference to another variable by name.
    Reference(String),
    /// An ordered list of variables.
    List(Vec<Variable>),
    /// A name to variable map.
    Map(BTreeMap<String, Variable>),
    /// Lazily computed value, kept as source.
    Closure(String),
    /// An encrypted payload and the optional alias of the key that sealed it.
    Encrypted {
        /// The sealed payload.
        ciphertext: String,
        /// Alias of the key used for sealing.
        key: Option<String>,
    },
}

impl Variable {
    /// Shorthand for a plain value.
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Self::Value(value.into())
    }

    /// Shorthand for a reference to another variable.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// The wire discriminant of this variable.
    pub fn kind(&self) -> VariableKind {
        match self {
            Self::Value(_) => VariableKind::Value,
            Self::Reference(_) => VariableKind::Variable,
            Self::List(_) => VariableKind::List,
            Self::Map(_) => VariableKind::Map,
            Self::Closure(_) => VariableKind::Closure,
            Self::Encrypted { .. } => VariableKind::Encrypted,
        }
    }
}

/// A named entry of a variable list, optionally tagged with the assignment id
/// that produced it. Entries without an id form the unordered prefix of a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariableWire", into = "VariableWire")]
pub struct VariableInfo {
    /// The variable name.
    pub name: String,
    /// The id of the assignment this entry comes from.
    pub id: Option<AssignmentId>,
    /// The value.
    pub variable: Variable,
}

impl VariableInfo {
    /// Creates an unassigned entry.
    pub fn new(name: impl Into<String>, variable: Variable) -> Self {
        Self {
            name: name.into(),
            id: None,
            variable,
        }
    }

    /// Returns a copy of this entry tagged with `id`.
    pub fn with_id(mut self, id: AssignmentId) -> Self {
        self.id = Some(id);
        self
    }
}

/// The `type` discriminant of the variable wire format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Payload in `value`.
    #[default]
    Value,
    /// Payload in `variable`.
    Variable,
    /// Payload in `list`.
    List,
    /// Payload in `map`.
    Map,
    /// Payload in `closure`.
    Closure,
    /// Payload in `value`, key alias in `option`.
    Encrypted,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Value => "value",
            Self::Variable => "variable",
            Self::List => "list",
            Self::Map => "map",
            Self::Closure => "closure",
            Self::Encrypted => "encrypted",
        };
        f.write_str(label)
    }
}

/// Errors raised when a wire object does not describe a valid variable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The field selected by `type` is absent.
    #[error("Variable of type '{kind}' is missing its '{field}' field.")]
    MissingPayload {
        /// The declared type.
        kind: VariableKind,
        /// The field that should carry the payload.
        field: &'static str,
    },
    /// A named entry has no `name`.
    #[error("Variable entry is missing its 'name' field.")]
    MissingName,
    /// The ciphertext of an encrypted variable is not a string.
    #[error("Encrypted variable '{0}' must carry its ciphertext as a string.")]
    EncryptedNotString(String),
}

/// The flat JSON shape shared by every variable: `type` selects which of the
/// other fields carries the payload.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub(crate) struct VariableWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<AssignmentId>,
    #[serde(rename = "type")]
    kind: VariableKind,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list: Option<Vec<VariableWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    map: Option<BTreeMap<String, VariableWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    option: Option<String>,
}

/// Keeps an explicit `null` as `Some(Null)` so "defined as null" survives a round trip.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl From<Variable> for VariableWire {
    fn from(variable: Variable) -> Self {
        let kind = variable.kind();
        let mut wire = Self {
            kind,
            ..Default::default()
        };
        match variable {
            Variable::Value(value) => wire.value = Some(value),
            Variable::Reference(name) => wire.variable = Some(name),
            Variable::List(items) => {
                wire.list = Some(items.into_iter().map(Self::from).collect());
            }
            Variable::Map(entries) => {
                wire.map = Some(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, Self::from(v)))
                        .collect(),
                );
            }
            Variable::Closure(source) => wire.closure = Some(source),
            Variable::Encrypted { ciphertext, key } => {
                wire.value = Some(serde_json::Value::String(ciphertext));
                wire.option = key;
            }
        }
        wire
    }
}

impl From<VariableInfo> for VariableWire {
    fn from(info: VariableInfo) -> Self {
        let mut wire = Self::from(info.variable);
        wire.name = Some(info.name);
        wire.id = info.id;
        wire
    }
}

impl TryFrom<VariableWire> for Variable {
    type Error = WireError;

    fn try_from(wire: VariableWire) -> Result<Self, Self::Error> {
        let missing = |field| WireError::MissingPayload {
            kind: wire.kind,
            field,
        };
        match wire.kind {
            VariableKind::Value => wire.value.map(Self::Value).ok_or_else(|| missing("value")),
            VariableKind::Variable => wire
                .variable
                .map(Self::Reference)
                .ok_or_else(|| missing("variable")),
            VariableKind::List => {
                let items = wire.list.ok_or_else(|| missing("list"))?;
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::List)
            }
            VariableKind::Map => {
                let entries = wire.map.ok_or_else(|| missing("map"))?;
                entries
                    .into_iter()
                    .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Self::Map)
            }
            VariableKind::Closure => wire
                .closure
                .map(Self::Closure)
                .ok_or_else(|| missing("closure")),
            VariableKind::Encrypted => match wire.value {
                Some(serde_json::Value::String(ciphertext)) => Ok(Self::Encrypted {
                    ciphertext,
                    key: wire.option,
                }),
                Some(_) => Err(WireError::EncryptedNotString(
                    wire.name.unwrap_or_default(),
                )),
                None => Err(missing("value")),
            },
        }
    }
}

impl TryFrom<VariableWire> for VariableInfo {
    type Error = WireError;

    fn try_from(mut wire: VariableWire) -> Result<Self, Self::Error> {
        let name = wire.name.take().ok_or(WireError::MissingName)?;
        let id = wire.id.take();
        // Keep the name around for error messages of the payload conversion.
        wire.name = Some(name.clone());
        let variable = Variable::try_from(wire)?;
        Ok(Self { name, id, variable })
    }
}

// --- RECORDS (the stream folded into Info snapshots) ---

/// One versioned edit to a single variable.
///
/// The scope fields route the edit: `project`, `playbook` (+ `play`) or
/// `environment` select the owner; when an owner other than an environment is
/// selected, `environment` turns the edit into an environment-scoped override.
/// An assignment with no scope at all edits the global variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The dotted id addressing this edit.
    pub id: AssignmentId,
    /// The assigned variable.
    pub variable: VariableInfo,
    /// A disabled assignment is a tombstone: it erases the entry with the same id.
    #[serde(default)]
    pub disabled: bool,
    /// Environment scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Project owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Playbook owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    /// Play owner, inside `playbook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play: Option<String>,
}

impl Assignment {
    /// Creates an unscoped, enabled assignment.
    pub fn new(id: AssignmentId, variable: VariableInfo) -> Self {
        Self {
            id,
            variable,
            disabled: false,
            environment: None,
            project: None,
            playbook: None,
            play: None,
        }
    }

    /// Creates a tombstone for `id`.
    pub fn tombstone(id: AssignmentId, name: impl Into<String>) -> Self {
        Self {
            disabled: true,
            ..Self::new(id, VariableInfo::new(name, Variable::Value(serde_json::Value::Null)))
        }
    }

    /// Scopes the assignment to an environment.
    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Routes the assignment to a project.
    pub fn for_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Routes the assignment to a playbook, or to one of its plays.
    pub fn for_playbook(mut self, playbook: impl Into<String>, play: Option<String>) -> Self {
        self.playbook = Some(playbook.into());
        self.play = play;
        self
    }
}

/// Declares or updates an environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Unique environment name.
    pub name: String,
    /// Parent environments, in declaration order.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Abstract environments can only be inherited from.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Declares or updates a project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Unique project name.
    pub name: String,
    /// Parent projects, in declaration order.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Abstract projects can only be inherited from.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Manual execution priority. Inherited from the nearest ancestor when absent.
    #[serde(default)]
    pub job_order: Option<i64>,
    /// Host groups this project deploys to.
    #[serde(default)]
    pub host_groups: Vec<String>,
}

/// Declares or updates a host group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostGroupRecord {
    /// Unique host group name.
    pub name: String,
    /// Parent host groups, in declaration order.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Declares or updates a host inside a host group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostRecord {
    /// Host name, unique within its group.
    pub name: String,
    /// Owning host group.
    pub host_group: String,
    /// Network address.
    pub address: String,
    /// Restricts the host to environments included by this one.
    #[serde(default)]
    pub environment: Option<String>,
}

/// Declares or updates a playbook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybookRecord {
    /// Unique playbook name.
    pub name: String,
    /// Parent playbooks, in declaration order.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Abstract playbooks can only be inherited from.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Declares or updates a play inside a playbook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayRecord {
    /// Owning playbook.
    pub playbook: String,
    /// Play name, unique within its playbook.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags selecting parts of the play.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Host groups the play targets.
    #[serde(default)]
    pub host_groups: Vec<String>,
}

/// One entry of the record stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// See [`EnvironmentRecord`].
    Environment(EnvironmentRecord),
    /// See [`ProjectRecord`].
    Project(ProjectRecord),
    /// See [`HostGroupRecord`].
    HostGroup(HostGroupRecord),
    /// See [`HostRecord`].
    Host(HostRecord),
    /// See [`PlaybookRecord`].
    Playbook(PlaybookRecord),
    /// See [`PlayRecord`].
    Play(PlayRecord),
    /// See [`Assignment`].
    Assignment(Assignment),
}

impl Record {
    /// A short label for logs: `project 'app'`, `assignment '3.1'`.
    pub fn describe(&self) -> String {
        match self {
            Self::Environment(r) => format!("environment '{}'", r.name),
            Self::Project(r) => format!("project '{}'", r.name),
            Self::HostGroup(r) => format!("host group '{}'", r.name),
            Self::Host(r) => format!("host '{}/{}'", r.host_group, r.name),
            Self::Playbook(r) => format!("playbook '{}'", r.name),
            Self::Play(r) => format!("play '{}/{}'", r.playbook, r.name),
            Self::Assignment(a) => format!("assignment '{}' ({})", a.id, a.variable.name),
        }
    }
}

// --- DEPLOY PLANS ---

/// A unit of work: one project, or every project matched by a search expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployItem {
    /// A literal project name.
    #[serde(default)]
    pub project: Option<String>,
    /// A regular expression over project names, used when `project` is absent.
    #[serde(default)]
    pub search: Option<String>,
    /// Only run the parts of the deployment with these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Skip the parts of the deployment with these tags.
    #[serde(default)]
    pub skip_tags: Vec<String>,
    /// Restrict the deployment to these servers.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Projects that must be deployed before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the project's job order for this item.
    #[serde(default)]
    pub job_order: Option<i64>,
}

impl DeployItem {
    /// An item deploying a single named project.
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    /// An item deploying every project matched by `pattern`.
    pub fn for_search(pattern: impl Into<String>) -> Self {
        Self {
            search: Some(pattern.into()),
            ..Default::default()
        }
    }

    /// Adds dependency project names.
    pub fn depends_on<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(projects.into_iter().map(Into::into));
        self
    }
}

/// An ordered list of deploy items targeting one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPlan {
    /// Identifies the editing session that opened this plan.
    #[serde(default = "Uuid::new_v4")]
    pub session: Uuid,
    /// Plan name.
    pub name: String,
    /// The environment the plan deploys to.
    pub environment: String,
    /// Items in declaration order.
    #[serde(default)]
    pub items: Vec<DeployItem>,
    /// Reverses the final execution order (rollback-style plans).
    #[serde(default)]
    pub reverse_order: bool,
}

impl DeployPlan {
    /// Opens a new, empty plan.
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            session: Uuid::new_v4(),
            name: name.into(),
            environment: environment.into(),
            items: Vec::new(),
            reverse_order: false,
        }
    }

    /// Appends an item.
    pub fn push(&mut self, item: DeployItem) -> &mut Self {
        self.items.push(item);
        self
    }
}

// --- VERSION HISTORY ---

/// Content-derived id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of records applied on top of a parent commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Content id.
    pub id: CommitId,
    /// The previous commit in the chain.
    pub parent: Option<CommitId>,
    /// Free-form message.
    pub message: String,
    /// Records introduced by this commit, in application order.
    pub records: Vec<Record>,
}

/// A named pointer to the head of a commit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name.
    pub name: String,
    /// Head commit, `None` for an empty branch.
    pub head: Option<CommitId>,
}
