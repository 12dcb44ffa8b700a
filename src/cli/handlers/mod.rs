// src/cli/handlers/mod.rs

//! One module per command. Every handler parses its own arguments and receives the
//! `--file` override.

pub mod check;
pub mod commons;
pub mod lineage;
pub mod order;
pub mod resolve;
