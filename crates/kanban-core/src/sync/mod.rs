//! Publishing allocations through a shared repository.
//!
//! The coordination substrate is modelled by four capabilities, [`Substrate`],
//! whose `push` succeeds only while the remote is still at the head the caller
//! last observed. [`driver::Driver`] builds the allocate-stage-publish retry
//! loop on top of that compare-and-swap.

pub mod driver;
pub mod git;
#[cfg(any(test, feature = "test-harness"))]
pub mod memory;


use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use driver::{Allocation, AllocationRequest, Driver, PlannedRecord, RetryPolicy, SyncMode};

/// Position of the shared branch. The empty string is an unborn branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Head(String);

impl Head {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn unborn() -> Self {
        Self(String::new())
    }

    pub fn is_unborn(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unborn() {
            f.write_str("(unborn)")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Files written into the working tree that must land as one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub message: String,
    /// Repository-relative paths.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Published(Head),
    /// The remote moved past the expected head; carries where it is now.
    Rejected(Head),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    Rebased(Head),
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("{op} timed out after {secs}s", secs = .after.as_secs())]
    Timeout { op: &'static str, after: Duration },

    #[error("{op} failed: {detail}")]
    Failed { op: &'static str, detail: String },
}

pub type SubstrateResult<T> = std::result::Result<T, SubstrateError>;

/// A version-control backend with compare-and-swap publish semantics.
pub trait Substrate {
    /// Bring the local view up to the remote head and return that head.
    fn pull(&mut self) -> SubstrateResult<Head>;

    /// Record the change-set as one local commit.
    fn commit(&mut self, change: &ChangeSet) -> SubstrateResult<Head>;

    /// Publish local commits iff the remote is still at `expected`.
    fn push(&mut self, expected: &Head) -> SubstrateResult<PushOutcome>;

    /// Drop the unpublished allocation commit and move local work onto `head`.
    fn rebase_onto(&mut self, head: &Head) -> SubstrateResult<RebaseOutcome>;
}
