//! # Config Loader
//!
//! Reads TOML inventory files and turns them into the record stream the engine folds,
//! plus the deploy plans they declare.
//!
//! Every variable becomes an [`Assignment`] with a sequential id in file order. When
//! several files are loaded together, ids are prefixed with the file's position
//! (`1.1`, `1.2`, `2.1`), so later files supersede earlier ones. Files are read and
//! parsed in parallel; their records are concatenated in sorted path order.

use crate::constants::INVENTORY_EXTENSION;
use crate::core::inventory::Inventory;
use crate::models::{
    Assignment, AssignmentId, DeployItem, DeployPlan, EnvironmentRecord, HostGroupRecord,
    HostRecord, PlayRecord, PlaybookRecord, ProjectRecord, Record, Variable, VariableInfo,
};
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    static ref VARIABLE_NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").unwrap();
}

/// Errors raised while loading inventory files.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The file could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// The file.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid inventory document.
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        /// The file.
        path: String,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// A directory could not be walked.
    #[error("Failed to scan '{path}': {source}")]
    Walk {
        /// The directory.
        path: String,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },
    /// A directory holds no inventory file.
    #[error("No inventory files found under '{0}'.")]
    EmptyDirectory(String),
    /// A variable name is not a valid identifier.
    #[error("Invalid variable name '{name}' in {owner}.")]
    InvalidVariableName {
        /// The rejected name.
        name: String,
        /// Where it was declared.
        owner: String,
    },
    /// An `overrides.<environment>` entry is not a table of variables.
    #[error("Override '{environment}' in {owner} must be a table of variables.")]
    InvalidOverride {
        /// The environment the override is keyed by.
        environment: String,
        /// Where it was declared.
        owner: String,
    },
    /// A `ref`, `closure` or `encrypted` table has a non-string payload.
    #[error("Variable '{name}' in {owner}: '{key}' must be a string.")]
    InvalidSpecialValue {
        /// The variable.
        name: String,
        /// Where it was declared.
        owner: String,
        /// The offending key.
        key: String,
    },
}

/// Result alias of this module.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Everything one load produced.
#[derive(Debug, Clone, Default)]
pub struct InventoryFile {
    /// Records in application order.
    pub records: Vec<Record>,
    /// Declared deploy plans.
    pub plans: Vec<DeployPlan>,
}

impl InventoryFile {
    /// Folds the records into a snapshot.
    pub fn inventory(&self) -> Inventory {
        Inventory::fold(&self.records)
    }

    /// The plan named `name`.
    pub fn plan(&self, name: &str) -> Option<&DeployPlan> {
        self.plans.iter().find(|p| p.name == name)
    }

    fn extend(&mut self, other: Self) {
        self.records.extend(other.records);
        self.plans.extend(other.plans);
    }
}

// --- DOCUMENT SHAPE ---

type VarTable = toml::Table;

#[derive(Deserialize, Debug, Default)]
struct Document {
    #[serde(default)]
    vars: VarTable,
    #[serde(default)]
    environment: Vec<EnvironmentSection>,
    #[serde(default)]
    host_group: Vec<HostGroupSection>,
    #[serde(default)]
    project: Vec<ProjectSection>,
    #[serde(default)]
    playbook: Vec<PlaybookSection>,
    #[serde(default)]
    plan: Vec<PlanSection>,
}

#[derive(Deserialize, Debug)]
struct EnvironmentSection {
    #[serde(flatten)]
    record: EnvironmentRecord,
    #[serde(default)]
    vars: VarTable,
}

#[derive(Deserialize, Debug)]
struct HostSection {
    name: String,
    address: String,
    #[serde(default)]
    environment: Option<String>,
}

#[derive(Deserialize, Debug)]
struct HostGroupSection {
    #[serde(flatten)]
    record: HostGroupRecord,
    #[serde(default)]
    hosts: Vec<HostSection>,
}

#[derive(Deserialize, Debug)]
struct ProjectSection {
    #[serde(flatten)]
    record: ProjectRecord,
    #[serde(default)]
    vars: VarTable,
    #[serde(default)]
    overrides: VarTable,
}

#[derive(Deserialize, Debug)]
struct PlaySection {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    host_groups: Vec<String>,
    #[serde(default)]
    vars: VarTable,
    #[serde(default)]
    overrides: VarTable,
}

#[derive(Deserialize, Debug)]
struct PlaybookSection {
    #[serde(flatten)]
    record: PlaybookRecord,
    #[serde(default)]
    vars: VarTable,
    #[serde(default)]
    overrides: VarTable,
    #[serde(default)]
    plays: Vec<PlaySection>,
}

#[derive(Deserialize, Debug)]
struct PlanSection {
    name: String,
    environment: String,
    #[serde(default)]
    reverse_order: bool,
    #[serde(default)]
    items: Vec<DeployItem>,
}

// --- VALUE MAPPING ---

/// Converts a TOML value to a variable.
///
/// Scalars become values, arrays lists and tables maps, except for the special
/// single-purpose tables `{ ref = "name" }`, `{ closure = "source" }` and
/// `{ encrypted = "payload", key = "alias" }`.
fn to_variable(value: &toml::Value, name: &str, owner: &str) -> LoaderResult<Variable> {
    let special_string = |table: &toml::Table, key: &str| -> LoaderResult<String> {
        table
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LoaderError::InvalidSpecialValue {
                name: name.to_string(),
                owner: owner.to_string(),
                key: key.to_string(),
            })
    };

    let variable = match value {
        toml::Value::String(s) => Variable::value(s.as_str()),
        toml::Value::Integer(i) => Variable::value(*i),
        toml::Value::Float(f) => Variable::value(*f),
        toml::Value::Boolean(b) => Variable::value(*b),
        toml::Value::Datetime(dt) => Variable::value(dt.to_string()),
        toml::Value::Array(items) => Variable::List(
            items
                .iter()
                .map(|item| to_variable(item, name, owner))
                .collect::<LoaderResult<Vec<_>>>()?,
        ),
        toml::Value::Table(table) => {
            let only = |keys: &[&str]| table.keys().all(|k| keys.contains(&k.as_str()));
            if table.len() == 1 && table.contains_key("ref") {
                Variable::Reference(special_string(table, "ref")?)
            } else if table.len() == 1 && table.contains_key("closure") {
                Variable::Closure(special_string(table, "closure")?)
            } else if table.contains_key("encrypted") && only(&["encrypted", "key"]) {
                Variable::Encrypted {
                    ciphertext: special_string(table, "encrypted")?,
                    key: match table.get("key") {
                        Some(_) => Some(special_string(table, "key")?),
                        None => None,
                    },
                }
            } else {
                Variable::Map(
                    table
                        .iter()
                        .map(|(k, v)| to_variable(v, name, owner).map(|v| (k.clone(), v)))
                        .collect::<LoaderResult<BTreeMap<_, _>>>()?,
                )
            }
        }
    };
    Ok(variable)
}

// --- RECORD EMISSION ---

/// Hands out sequential assignment ids, optionally under a per-file prefix.
struct IdSequence {
    prefix: Option<u64>,
    next: u64,
}

impl IdSequence {
    fn new(prefix: Option<u64>) -> Self {
        Self { prefix, next: 1 }
    }

    fn next_id(&mut self) -> AssignmentId {
        let id = match self.prefix {
            Some(prefix) => AssignmentId::root(prefix).child(self.next),
            None => AssignmentId::root(self.next),
        };
        self.next += 1;
        id
    }
}

/// Where the assignments of one variable table go.
#[derive(Default)]
struct Target<'a> {
    environment: Option<&'a str>,
    project: Option<&'a str>,
    playbook: Option<&'a str>,
    play: Option<&'a str>,
}

impl Target<'_> {
    fn describe(&self) -> String {
        match (self.project, self.playbook, self.play, self.environment) {
            (Some(p), _, _, _) => format!("project '{}'", p),
            (None, Some(pb), Some(play), _) => format!("play '{}/{}'", pb, play),
            (None, Some(pb), None, _) => format!("playbook '{}'", pb),
            (None, None, _, Some(env)) => format!("environment '{}'", env),
            (None, None, _, None) => "global variables".to_string(),
        }
    }
}

struct Emitter {
    ids: IdSequence,
    records: Vec<Record>,
}

impl Emitter {
    fn assign(&mut self, vars: &VarTable, target: &Target<'_>) -> LoaderResult<()> {
        let owner = target.describe();
        for (name, value) in vars {
            if !VARIABLE_NAME_RE.is_match(name) {
                return Err(LoaderError::InvalidVariableName {
                    name: name.clone(),
                    owner,
                });
            }
            let variable = to_variable(value, name, &owner)?;
            let assignment = Assignment {
                environment: target.environment.map(str::to_string),
                project: target.project.map(str::to_string),
                playbook: target.playbook.map(str::to_string),
                play: target.play.map(str::to_string),
                ..Assignment::new(self.ids.next_id(), VariableInfo::new(name, variable))
            };
            self.records.push(Record::Assignment(assignment));
        }
        Ok(())
    }

    /// Override tables are emitted in declaration order.
    fn assign_overrides(&mut self, overrides: &VarTable, base: &Target<'_>) -> LoaderResult<()> {
        for (environment, vars) in overrides {
            let Some(vars) = vars.as_table() else {
                return Err(LoaderError::InvalidOverride {
                    environment: environment.clone(),
                    owner: base.describe(),
                });
            };
            let scoped = Target {
                environment: Some(environment.as_str()),
                project: base.project,
                playbook: base.playbook,
                play: base.play,
            };
            self.assign(vars, &scoped)?;
        }
        Ok(())
    }
}

/// Parses one inventory document. `file_index` prefixes the assignment ids.
///
/// # Errors
/// `Parse` for malformed TOML, or a variable validation error.
pub fn parse_inventory(
    source: &str,
    origin: &str,
    file_index: Option<u64>,
) -> LoaderResult<InventoryFile> {
    let document: Document = toml::from_str(source).map_err(|e| LoaderError::Parse {
        path: origin.to_string(),
        source: e,
    })?;

    let mut out = Emitter {
        ids: IdSequence::new(file_index),
        records: Vec::new(),
    };
    out.assign(&document.vars, &Target::default())?;

    for section in &document.environment {
        out.records.push(Record::Environment(section.record.clone()));
        let target = Target {
            environment: Some(section.record.name.as_str()),
            ..Default::default()
        };
        out.assign(&section.vars, &target)?;
    }

    for section in &document.host_group {
        out.records.push(Record::HostGroup(section.record.clone()));
        for host in &section.hosts {
            out.records.push(Record::Host(HostRecord {
                name: host.name.clone(),
                host_group: section.record.name.clone(),
                address: host.address.clone(),
                environment: host.environment.clone(),
            }));
        }
    }

    for section in &document.project {
        out.records.push(Record::Project(section.record.clone()));
        let target = Target {
            project: Some(section.record.name.as_str()),
            ..Default::default()
        };
        out.assign(&section.vars, &target)?;
        out.assign_overrides(&section.overrides, &target)?;
    }

    for section in &document.playbook {
        let playbook = section.record.name.as_str();
        out.records.push(Record::Playbook(section.record.clone()));
        let target = Target {
            playbook: Some(playbook),
            ..Default::default()
        };
        out.assign(&section.vars, &target)?;
        out.assign_overrides(&section.overrides, &target)?;

        for play in &section.plays {
            out.records.push(Record::Play(PlayRecord {
                playbook: playbook.to_string(),
                name: play.name.clone(),
                description: play.description.clone(),
                tags: play.tags.clone(),
                host_groups: play.host_groups.clone(),
            }));
            let target = Target {
                playbook: Some(playbook),
                play: Some(play.name.as_str()),
                ..Default::default()
            };
            out.assign(&play.vars, &target)?;
            out.assign_overrides(&play.overrides, &target)?;
        }
    }

    let plans = document
        .plan
        .into_iter()
        .map(|section| {
            let mut plan = DeployPlan::new(section.name, section.environment);
            plan.reverse_order = section.reverse_order;
            plan.items = section.items;
            plan
        })
        .collect();

    log::debug!(
        "Parsed '{}': {} records, {} assignments.",
        origin,
        out.records.len(),
        out.ids.next - 1
    );
    Ok(InventoryFile {
        records: out.records,
        plans,
    })
}

fn read_file(path: &Path, file_index: Option<u64>) -> LoaderResult<InventoryFile> {
    let origin = path.display().to_string();
    let source = fs::read_to_string(path).map_err(|e| LoaderError::Io {
        path: origin.clone(),
        source: e,
    })?;
    parse_inventory(&source, &origin, file_index)
}

/// Every `*.toml` file below `dir`, in sorted path order.
fn collect_files(dir: &Path) -> LoaderResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| LoaderError::Walk {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(INVENTORY_EXTENSION)
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Loads an inventory file, or every inventory file below a directory.
///
/// # Errors
/// I/O, parse and validation errors; `EmptyDirectory` for a directory without
/// inventory files.
pub fn load_inventory(path: &Path) -> LoaderResult<InventoryFile> {
    if !path.is_dir() {
        return read_file(path, None);
    }

    let files = collect_files(path)?;
    if files.is_empty() {
        return Err(LoaderError::EmptyDirectory(path.display().to_string()));
    }
    log::debug!("Loading {} inventory files from '{}'.", files.len(), path.display());

    let prefixed = files.len() > 1;
    let parsed: Vec<InventoryFile> = files
        .par_iter()
        .enumerate()
        .map(|(position, file)| {
            let index = u64::try_from(position + 1).unwrap_or(u64::MAX);
            read_file(file, prefixed.then_some(index))
        })
        .collect::<LoaderResult<_>>()?;

    let mut merged = InventoryFile::default();
    for file in parsed {
        merged.extend(file);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[vars]
owner = "platform"

[[environment]]
name = "root"
abstract = true

[[environment]]
name = "staging"
parents = ["root"]

[[environment]]
name = "prod"
parents = ["root"]
[environment.vars]
replicas = 3

[[project]]
name = "app"
job_order = 2
[project.vars]
timeout = 30
db_host = { ref = "primary_db" }
health = { closure = "{ -> ping(host) }" }
password = { encrypted = "c2VjcmV0", key = "prod-key" }
ports = [80, 443]
limits = { cpu = 2, memory = "1G" }
[project.overrides.staging]
timeout = 10

[[plan]]
name = "release"
environment = "prod"
[[plan.items]]
project = "app"
depends_on = ["db"]
"#;

    fn assignment_named<'a>(file: &'a InventoryFile, name: &str) -> &'a Assignment {
        file.records
            .iter()
            .find_map(|r| match r {
                Record::Assignment(a) if a.variable.name == name => Some(a),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_parse_emits_records_and_plans() {
        // --- Execute ---
        let file = parse_inventory(SAMPLE, "sample.toml", None).unwrap();

        // --- Assert ---
        let environments = file
            .records
            .iter()
            .filter(|r| matches!(r, Record::Environment(_)))
            .count();
        assert_eq!(environments, 3);
        assert_eq!(file.plans.len(), 1);
        let plan = file.plan("release").unwrap();
        assert_eq!(plan.environment, "prod");
        assert_eq!(plan.items[0].depends_on, vec!["db".to_string()]);
    }

    #[test]
    fn test_value_mapping() {
        let file = parse_inventory(SAMPLE, "sample.toml", None).unwrap();

        assert_eq!(
            assignment_named(&file, "db_host").variable.variable,
            Variable::reference("primary_db")
        );
        assert_eq!(
            assignment_named(&file, "health").variable.variable,
            Variable::Closure("{ -> ping(host) }".to_string())
        );
        assert_eq!(
            assignment_named(&file, "password").variable.variable,
            Variable::Encrypted {
                ciphertext: "c2VjcmV0".to_string(),
                key: Some("prod-key".to_string()),
            }
        );
        assert_eq!(
            assignment_named(&file, "ports").variable.variable,
            Variable::List(vec![Variable::value(80), Variable::value(443)])
        );
        assert!(matches!(
            assignment_named(&file, "limits").variable.variable,
            Variable::Map(ref m) if m.len() == 2
        ));
    }

    #[test]
    fn test_ids_are_sequential_and_scoped() {
        let file = parse_inventory(SAMPLE, "sample.toml", None).unwrap();

        assert_eq!(assignment_named(&file, "owner").id.to_string(), "1");
        assert_eq!(assignment_named(&file, "replicas").environment.as_deref(), Some("prod"));
        let ids: Vec<String> = file
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Assignment(a) => Some(a.id.to_string()),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (1..=ids.len()).map(|n| n.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_overrides_keep_declaration_order() {
        // --- Setup: `live` inherits `shared` but sorts before it ---
        let source = r#"
[[environment]]
name = "shared"

[[environment]]
name = "live"
parents = ["shared"]

[[project]]
name = "app"
[project.vars]
timeout = 30
[project.overrides.shared]
timeout = 20
[project.overrides.live]
timeout = 5
"#;
        let file = parse_inventory(source, "order.toml", None).unwrap();
        let inventory = file.inventory();

        // --- Execute ---
        let store = resolver::resolve_project_variables(&inventory, "app", "live").unwrap();

        // --- Assert ---
        let overrides: Vec<&str> = inventory
            .project("app")
            .unwrap()
            .scope
            .overrides()
            .iter()
            .map(|o| o.query.environment())
            .collect();
        assert_eq!(overrides, vec!["shared", "live"]);
        let (info, origin) = store.get_with_origin("timeout").unwrap();
        assert_eq!(info.variable, Variable::value(5));
        assert_eq!(origin, "project:app@live");
    }

    #[test]
    fn test_ids_follow_file_order_within_a_table() {
        let source = r#"
[vars]
zeta = 1
alpha = 2
"#;
        let file = parse_inventory(source, "vars.toml", None).unwrap();

        assert_eq!(assignment_named(&file, "zeta").id.to_string(), "1");
        assert_eq!(assignment_named(&file, "alpha").id.to_string(), "2");
    }

    #[test]
    fn test_non_table_override_is_rejected() {
        let source = r#"
[[project]]
name = "app"
[project.overrides]
prod = 3
"#;
        assert!(matches!(
            parse_inventory(source, "bad.toml", None),
            Err(LoaderError::InvalidOverride { environment, .. }) if environment == "prod"
        ));
    }

    #[test]
    fn test_loaded_inventory_resolves_scenario() {
        let file = parse_inventory(SAMPLE, "sample.toml", None).unwrap();
        let inventory = file.inventory();

        let staging = resolver::resolve_project_variables(&inventory, "app", "staging").unwrap();
        let prod = resolver::resolve_project_variables(&inventory, "app", "prod").unwrap();
        assert_eq!(staging.get("timeout"), Some(&Variable::value(10)));
        assert_eq!(prod.get("timeout"), Some(&Variable::value(30)));
    }

    #[test]
    fn test_invalid_variable_name_is_rejected() {
        let source = "[[project]]\nname = \"app\"\n[project.vars]\n\"9lives\" = 1\n";
        let err = parse_inventory(source, "bad.toml", None).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidVariableName { ref name, .. } if name == "9lives"));
        assert_eq!(err.to_string(), "Invalid variable name '9lives' in project 'app'.");
    }

    #[test]
    fn test_non_string_reference_is_rejected() {
        let source = "[vars]\nx = { ref = 5 }\n";
        assert!(matches!(
            parse_inventory(source, "bad.toml", None),
            Err(LoaderError::InvalidSpecialValue { ref key, .. }) if key == "ref"
        ));
    }

    #[test]
    fn test_malformed_toml_names_the_file() {
        let err = parse_inventory("[[project]\n", "broken.toml", None).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse 'broken.toml'"));
    }

    #[test]
    fn test_directory_load_prefixes_ids_per_file() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.toml"), "[vars]\nx = 1\ny = 2\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.toml"), "[vars]\nx = 3\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        // --- Execute ---
        let file = load_inventory(dir.path()).unwrap();

        // --- Assert ---
        let ids: Vec<String> = file
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Assignment(a) => Some(a.id.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["1.1", "1.2", "2.1"]);
        let inventory = file.inventory();
        let x = inventory.globals().iter().rev().find(|v| v.name == "x").unwrap();
        assert_eq!(x.variable, Variable::value(3));
    }

    #[test]
    fn test_single_file_and_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_inventory(dir.path()),
            Err(LoaderError::EmptyDirectory(_))
        ));

        let path = dir.path().join("strata.toml");
        fs::write(&path, "[vars]\nx = 1\n").unwrap();
        let file = load_inventory(&path).unwrap();
        assert_eq!(assignment_named(&file, "x").id.to_string(), "1");
    }
}
