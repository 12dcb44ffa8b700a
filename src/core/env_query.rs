//! # Environment Queries
//!
//! A query names one environment, possibly an abstract one, and matches it together
//! with every environment that inherits from it.

use crate::core::lineage::{self, LineageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A predicate over environment names. Two queries are equal iff they wrap the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentQuery(String);

impl EnvironmentQuery {
    /// Creates a query for `environment` and its descendants.
    pub fn new(environment: impl Into<String>) -> Self {
        Self(environment.into())
    }

    /// The queried environment name.
    pub fn environment(&self) -> &str {
        &self.0
    }

    /// Whether `target` is the queried environment or one of its descendants.
    ///
    /// `parents_of` exposes the environment hierarchy. A target equal to the query
    /// matches without consulting it.
    ///
    /// # Errors
    /// Fails when the target (or one of its ancestors) is unknown, or when the
    /// environment hierarchy is cyclic.
    pub fn includes<'a, F>(&self, target: &str, parents_of: F) -> Result<bool, LineageError>
    where
        F: Fn(&str) -> Option<&'a [String]>,
    {
        if target == self.0 {
            return Ok(true);
        }
        lineage::is_ancestor(&self.0, target, parents_of)
    }
}

impl fmt::Display for EnvironmentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}
