// src/core/paths.rs

//! Locates the inventory to load.
//!
//! Precedence: an explicit path, then the `STRATA_INVENTORY` environment variable, then
//! `./strata.toml`, then `<config_dir>/strata/inventory.toml`.

use crate::constants::{APP_DIR, GLOBAL_INVENTORY_FILENAME, INVENTORY_ENV_VAR, INVENTORY_FILENAME};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref STRATA_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// Errors raised while locating the inventory.
#[derive(Error, Debug)]
pub enum PathError {
    /// The platform exposes no configuration directory.
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    /// `~` or a `$VAR` in the path could not be expanded.
    #[error("Failed to expand path '{template}': {message}")]
    Expansion {
        /// The path as given.
        template: String,
        /// What went wrong.
        message: String,
    },
    /// An explicitly requested path does not exist.
    #[error("Inventory '{0}' does not exist.")]
    Missing(String),
    /// None of the default locations holds an inventory.
    #[error("No inventory found. Searched: {}.", .searched.join(", "))]
    NotFound {
        /// Every location that was tried.
        searched: Vec<String>,
    },
    /// The path exists but could not be canonicalized.
    #[error("Could not resolve '{path}': {source}")]
    Canonicalize {
        /// The offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Returns the path to the strata configuration directory (`~/.config/strata`).
///
/// Memoized: the first call computes the path, later calls return the cached value.
pub fn get_strata_config_dir() -> Result<PathBuf, PathError> {
    let mut cached = STRATA_CONFIG_DIR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }
    let path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(APP_DIR);
    *cached = Some(path.clone());
    Ok(path)
}

/// Returns the path of the user-wide inventory file.
pub fn get_global_inventory_path() -> Result<PathBuf, PathError> {
    get_strata_config_dir().map(|dir| dir.join(GLOBAL_INVENTORY_FILENAME))
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in `template`.
pub fn expand_path(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

fn canonical(path: &Path) -> Result<PathBuf, PathError> {
    dunce::canonicalize(path).map_err(|e| PathError::Canonicalize {
        path: path.display().to_string(),
        source: e,
    })
}

/// Finds the inventory using the process environment and working directory.
///
/// # Errors
/// `Missing` when an explicit path (flag or environment variable) does not exist,
/// `NotFound` when no default location holds an inventory.
pub fn locate_inventory(explicit: Option<&str>) -> Result<PathBuf, PathError> {
    let from_env = std::env::var(INVENTORY_ENV_VAR).ok();
    let cwd = std::env::current_dir().map_err(|e| PathError::Canonicalize {
        path: ".".to_string(),
        source: e,
    })?;
    let global = get_global_inventory_path().ok();
    locate_inventory_in(explicit, from_env.as_deref(), &cwd, global.as_deref())
}

/// [`locate_inventory`] with every input spelled out.
pub fn locate_inventory_in(
    explicit: Option<&str>,
    from_env: Option<&str>,
    cwd: &Path,
    global: Option<&Path>,
) -> Result<PathBuf, PathError> {
    if let Some(template) = explicit.or(from_env).filter(|t| !t.trim().is_empty()) {
        let path = expand_path(template)?;
        let path = if path.is_relative() { cwd.join(path) } else { path };
        if !path.exists() {
            return Err(PathError::Missing(path.display().to_string()));
        }
        log::debug!("Using inventory '{}'.", path.display());
        return canonical(&path);
    }

    let mut searched = Vec::new();
    let local = cwd.join(INVENTORY_FILENAME);
    for candidate in std::iter::once(local).chain(global.map(Path::to_path_buf)) {
        if candidate.exists() {
            log::debug!("Found inventory at '{}'.", candidate.display());
            return canonical(&candidate);
        }
        searched.push(candidate.display().to_string());
    }
    Err(PathError::NotFound { searched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_path_wins() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(INVENTORY_FILENAME), "").unwrap();
        fs::write(dir.path().join("other.toml"), "").unwrap();

        // --- Execute ---
        let found = locate_inventory_in(Some("other.toml"), Some("ignored.toml"), dir.path(), None)
            .unwrap();

        // --- Assert ---
        assert_eq!(found.file_name().unwrap(), "other.toml");
    }

    #[test]
    fn test_environment_variable_before_local_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(INVENTORY_FILENAME), "").unwrap();
        fs::write(dir.path().join("env.toml"), "").unwrap();

        let found = locate_inventory_in(None, Some("env.toml"), dir.path(), None).unwrap();
        assert_eq!(found.file_name().unwrap(), "env.toml");
    }

    #[test]
    fn test_falls_back_to_local_then_global() {
        let dir = tempdir().unwrap();
        let global_dir = tempdir().unwrap();
        let global = global_dir.path().join(GLOBAL_INVENTORY_FILENAME);
        fs::write(&global, "").unwrap();

        let found = locate_inventory_in(None, None, dir.path(), Some(&global)).unwrap();
        assert_eq!(found.file_name().unwrap(), GLOBAL_INVENTORY_FILENAME);

        fs::write(dir.path().join(INVENTORY_FILENAME), "").unwrap();
        let found = locate_inventory_in(None, None, dir.path(), Some(&global)).unwrap();
        assert_eq!(found.file_name().unwrap(), INVENTORY_FILENAME);
    }

    #[test]
    fn test_missing_inventory_is_reported() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            locate_inventory_in(Some("nope.toml"), None, dir.path(), None),
            Err(PathError::Missing(_))
        ));
        match locate_inventory_in(None, None, dir.path(), None) {
            Err(PathError::NotFound { searched }) => assert_eq!(searched.len(), 1),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }
}
