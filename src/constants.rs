// src/constants.rs

/// The default inventory file looked up in the current directory.
pub const INVENTORY_FILENAME: &str = "strata.toml";

/// The inventory file name inside the user configuration directory (`~/.config/strata/`).
pub const GLOBAL_INVENTORY_FILENAME: &str = "inventory.toml";

/// The name of the application directory inside the system config directory.
pub const APP_DIR: &str = "strata";

/// Environment variable that points to an inventory file or directory.
pub const INVENTORY_ENV_VAR: &str = "STRATA_INVENTORY";

/// The extension of inventory fragments when loading a whole directory.
pub const INVENTORY_EXTENSION: &str = "toml";

/// Job order used for projects that never declare one anywhere in their lineage.
pub const DEFAULT_JOB_ORDER: i64 = 0;

/// Number of hash bytes kept for a commit id (16 bytes = 32 hex characters).
pub const COMMIT_ID_BYTES: usize = 16;

/// Branch created by the command-line front-end when folding an inventory.
pub const DEFAULT_BRANCH: &str = "main";
