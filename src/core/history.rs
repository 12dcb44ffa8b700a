//! # History
//!
//! A linear, content-addressed version history of the record stream.
//!
//! A commit id is the blake3 hash of the parent id followed by the JSON encoding of the
//! commit's records, truncated to 16 bytes and hex-encoded. Branches are named pointers
//! to a head commit; a snapshot folds every record reachable from a branch head.

use crate::constants::{COMMIT_ID_BYTES, DEFAULT_BRANCH};
use crate::core::inventory::Inventory;
use crate::models::{Branch, Commit, CommitId, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors raised by the version history.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// No branch has this name.
    #[error("Unknown branch '{0}'.")]
    UnknownBranch(String),
    /// A branch with this name already exists.
    #[error("Branch '{0}' already exists.")]
    BranchExists(String),
    /// A commit reachable from a branch head is not stored.
    #[error("Commit '{missing}' reachable from branch '{branch}' is missing from the history.")]
    BrokenChain {
        /// The branch being walked.
        branch: String,
        /// The id that could not be found.
        missing: CommitId,
    },
    /// The records could not be encoded for hashing.
    #[error("Failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias of this module.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Computes the content id of a commit.
pub fn commit_id(parent: Option<&CommitId>, records: &[Record]) -> HistoryResult<CommitId> {
    let mut hasher = blake3::Hasher::new();
    if let Some(parent) = parent {
        hasher.update(parent.0.as_bytes());
    }
    hasher.update(b"\n");
    hasher.update(&serde_json::to_vec(records)?);
    let hash = hasher.finalize();
    let truncated: Vec<u8> = hash.as_bytes().iter().take(COMMIT_ID_BYTES).copied().collect();
    Ok(CommitId(hex::encode(truncated)))
}

/// Commits and the branches pointing into them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    commits: HashMap<CommitId, Commit>,
    branches: BTreeMap<String, Branch>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    /// A history with a single empty default branch.
    pub fn new() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(
            DEFAULT_BRANCH.to_string(),
            Branch {
                name: DEFAULT_BRANCH.to_string(),
                head: None,
            },
        );
        Self {
            commits: HashMap::new(),
            branches,
        }
    }

    /// The branch named `name`.
    pub fn branch(&self, name: &str) -> HistoryResult<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| HistoryError::UnknownBranch(name.to_string()))
    }

    /// Every branch, sorted by name.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Appends a commit with `records` to `branch` and moves the branch head to it.
    pub fn commit(
        &mut self,
        branch: &str,
        message: impl Into<String>,
        records: Vec<Record>,
    ) -> HistoryResult<CommitId> {
        let parent = self.branch(branch)?.head.clone();
        let id = commit_id(parent.as_ref(), &records)?;
        log::debug!(
            "Committing {} records to '{}' as {}.",
            records.len(),
            branch,
            id
        );
        self.commits.insert(
            id.clone(),
            Commit {
                id: id.clone(),
                parent,
                message: message.into(),
                records,
            },
        );
        if let Some(target) = self.branches.get_mut(branch) {
            target.head = Some(id.clone());
        }
        Ok(id)
    }

    /// Commits reachable from the head of `branch`, head first.
    pub fn log(&self, branch: &str) -> HistoryResult<Vec<&Commit>> {
        let mut chain = Vec::new();
        let mut cursor = self.branch(branch)?.head.as_ref();
        while let Some(id) = cursor {
            let commit = self
                .commits
                .get(id)
                .ok_or_else(|| HistoryError::BrokenChain {
                    branch: branch.to_string(),
                    missing: id.clone(),
                })?;
            chain.push(commit);
            cursor = commit.parent.as_ref();
        }
        Ok(chain)
    }

    /// Every record of `branch`, oldest first.
    pub fn records(&self, branch: &str) -> HistoryResult<Vec<&Record>> {
        Ok(self
            .log(branch)?
            .into_iter()
            .rev()
            .flat_map(|commit| commit.records.iter())
            .collect())
    }

    /// The inventory obtained by folding every record of `branch`.
    pub fn snapshot(&self, branch: &str) -> HistoryResult<Inventory> {
        Ok(Inventory::fold(self.records(branch)?))
    }

    /// Creates branch `name` pointing at the head of `existing`.
    pub fn branch_from(&mut self, name: &str, existing: &str) -> HistoryResult<()> {
        if self.branches.contains_key(name) {
            return Err(HistoryError::BranchExists(name.to_string()));
        }
        let head = self.branch(existing)?.head.clone();
        self.branches.insert(
            name.to_string(),
            Branch {
                name: name.to_string(),
                head,
            },
        );
        Ok(())
    }
}
