// src/core/mod.rs

//! The resolution engine: inheritance linearization, variable layering, scheduling
//! and the inventory front-end.

pub mod assignments;
pub mod config_loader;
pub mod env_query;
pub mod history;
pub mod info;
pub mod inventory;
pub mod layers;
pub mod lineage;
pub mod paths;
pub mod resolver;
pub mod scheduler;
