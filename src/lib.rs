//! # strata
//!
//! Hierarchical configuration resolution for multi-environment deployment plans.
//!
//! Raw records (environments, projects, playbooks, host groups and ordered variable
//! assignments) fold into an immutable [`core::inventory::Inventory`]. The resolver
//! linearizes each inheritance hierarchy, stacks variable layers general to specific
//! and produces the view a deployment of one project to one environment sees. The
//! scheduler orders the items of a deploy plan by job order and dependencies.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
