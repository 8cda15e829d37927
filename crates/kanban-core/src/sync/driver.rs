//! Synchronization Driver: the allocate, stage, publish, reconcile loop.
//!
//! One allocation request walks an explicit state machine:
//!
//! ```text
//! Start ──pull ok──────────────▶ Compute ─▶ Stage ─▶ Publish ──accepted──▶ Allocated
//!   │                              ▲                   │
//!   └─unreachable (Local-Only)─┐   └──── Reconcile ◀───┘ rejected (attempts left)
//!                              ▼
//!                   Compute ─▶ Stage ─▶ Allocated (local only, never published)
//! ```
//!
//! A local write is never treated as durable until the publish that carries
//! it has been accepted. A rejected publish discards its candidate number
//! and recomputes from the advanced remote state.

use super::{ChangeSet, Head, PushOutcome, RebaseOutcome, Substrate, SubstrateError};
use crate::allocator;
use crate::config::Config;
use crate::error::{KanbanError, Result};
use crate::ledger::{AllocationMeta, Ledger};
use crate::paths;
use crate::record::RecordDraft;
use crate::scanner::Scanner;
use crate::types::{Identifier, Prefix};
use serde::Serialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A record to write in the same change-set as the ledger update.
#[derive(Debug, Clone)]
pub struct PlannedRecord {
    pub draft: RecordDraft,
    /// Absolute directory the record file is created in.
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub prefix: Prefix,
    /// Recorded as `last_allocated_by` in the ledger.
    pub agent: String,
    pub record: Option<PlannedRecord>,
    /// `false` forces Local-Only mode without contacting the remote.
    pub sync: bool,
    /// `false` only reports the candidate; nothing is staged or published.
    pub commit: bool,
}

impl AllocationRequest {
    pub fn new(prefix: Prefix, agent: impl Into<String>) -> Self {
        Self {
            prefix,
            agent: agent.into(),
            record: None,
            sync: true,
            commit: true,
        }
    }

    pub fn with_record(mut self, record: PlannedRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn local_only(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn peek(mut self) -> Self {
        self.commit = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Published against the remote; unique across every participant.
    Synced,
    /// Remote skipped or unreachable; unique only within the local view.
    LocalOnly,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Synced => "synced",
            SyncMode::LocalOnly => "local_only",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: Identifier,
    pub mode: SyncMode,
    /// Publish attempts made (0 in Local-Only mode).
    pub attempts: u32,
    /// Whether the allocation was staged into the ledger.
    pub committed: bool,
    pub record_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum State {
    Start,
    Compute {
        observed: Option<Head>,
    },
    Stage {
        observed: Option<Head>,
        candidate: Identifier,
        ledger: Ledger,
    },
    Publish {
        observed: Head,
        candidate: Identifier,
        record_path: Option<PathBuf>,
    },
    Reconcile {
        new_head: Head,
        previous: Identifier,
    },
    Allocated(Allocation),
}

/// Bookkeeping for one request.
struct Run<'r> {
    request: &'r AllocationRequest,
    mode: SyncMode,
    attempts: u32,
    /// Candidate discarded by the last Reconcile.
    previous: Option<Identifier>,
}

pub struct Driver<S> {
    root: PathBuf,
    scanner: Scanner,
    substrate: S,
    policy: RetryPolicy,
}

impl<S: Substrate> Driver<S> {
    pub fn new(root: impl Into<PathBuf>, scanner: Scanner, substrate: S, policy: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            scanner,
            substrate,
            policy,
        }
    }

    pub fn from_config(root: &Path, config: &Config, substrate: S) -> Result<Self> {
        let policy = RetryPolicy {
            max_attempts: config.allocation.max_attempts,
        };
        Ok(Self::new(root, Scanner::for_allocation(root, config), substrate, policy))
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Allocate the next identifier for `request.prefix`.
    pub fn allocate(&mut self, request: &AllocationRequest) -> Result<Allocation> {
        let mut run = Run {
            request,
            mode: SyncMode::Synced,
            attempts: 0,
            previous: None,
        };
        let mut state = State::Start;
        loop {
            state = match self.step(state, &mut run)? {
                State::Allocated(done) => {
                    tracing::info!(
                        id = %done.id,
                        mode = done.mode.as_str(),
                        attempts = done.attempts,
                        committed = done.committed,
                        "allocated identifier"
                    );
                    return Ok(done);
                }
                next => next,
            };
        }
    }

    fn step(&mut self, state: State, run: &mut Run<'_>) -> Result<State> {
        match state {
            State::Start => self.start(run),
            State::Compute { observed } => self.compute(observed, run),
            State::Stage {
                observed,
                candidate,
                ledger,
            } => self.stage(observed, candidate, ledger, run),
            State::Publish {
                observed,
                candidate,
                record_path,
            } => self.publish(observed, candidate, record_path, run),
            State::Reconcile { new_head, previous } => self.reconcile(new_head, previous, run),
            State::Allocated(done) => Ok(State::Allocated(done)),
        }
    }

    fn start(&mut self, run: &mut Run<'_>) -> Result<State> {
        if !run.request.sync {
            tracing::debug!(prefix = %run.request.prefix, "sync disabled; allocating locally");
            run.mode = SyncMode::LocalOnly;
            return Ok(State::Compute { observed: None });
        }
        match self.substrate.pull() {
            Ok(head) => {
                tracing::debug!(head = %head, "pulled remote head");
                Ok(State::Compute {
                    observed: Some(head),
                })
            }
            Err(e @ (SubstrateError::Unavailable(_) | SubstrateError::Timeout { .. })) => {
                tracing::warn!(
                    error = %e,
                    "remote unreachable; falling back to local-only allocation (unique only within this checkout)"
                );
                run.mode = SyncMode::LocalOnly;
                Ok(State::Compute { observed: None })
            }
            Err(e) => Err(KanbanError::Substrate(e.to_string())),
        }
    }

    fn compute(&mut self, observed: Option<Head>, run: &mut Run<'_>) -> Result<State> {
        let prefix = &run.request.prefix;
        let scanned = self.scanner.scan().max_number(prefix);
        let ledger = Ledger::read(&self.root);
        let candidate = allocator::allocate(prefix, scanned, ledger.highest(prefix))?;
        tracing::debug!(
            %candidate,
            scanned_max = ?scanned,
            ledger_max = ?ledger.highest(prefix),
            "computed candidate"
        );

        if let Some(prev) = run.previous.take() {
            if prev == candidate {
                tracing::debug!(%candidate, "candidate unchanged after reconcile");
            }
        }

        if !run.request.commit {
            return Ok(State::Allocated(Allocation {
                id: candidate,
                mode: run.mode,
                attempts: run.attempts,
                committed: false,
                record_path: None,
            }));
        }
        Ok(State::Stage {
            observed,
            candidate,
            ledger,
        })
    }

    fn stage(
        &mut self,
        observed: Option<Head>,
        candidate: Identifier,
        ledger: Ledger,
        run: &mut Run<'_>,
    ) -> Result<State> {
        let request = run.request;
        let record_path = match &request.record {
            Some(planned) => {
                let path = planned.dir.join(planned.draft.file_name(&candidate));
                if path.exists() {
                    return Err(KanbanError::RecordExists(path.display().to_string()));
                }
                Some(path)
            }
            None => None,
        };

        let rollback = Rollback::capture(&self.root)?;
        if let Err(e) = self.write_and_commit(&candidate, ledger, record_path.as_deref(), run) {
            rollback.restore(record_path.as_deref());
            return Err(e);
        }

        match observed {
            Some(observed) => Ok(State::Publish {
                observed,
                candidate,
                record_path,
            }),
            None => Ok(State::Allocated(Allocation {
                id: candidate,
                mode: run.mode,
                attempts: run.attempts,
                committed: true,
                record_path,
            })),
        }
    }

    /// Write the ledger and the record, then commit them as one change-set.
    fn write_and_commit(
        &mut self,
        candidate: &Identifier,
        ledger: Ledger,
        record_path: Option<&Path>,
        run: &Run<'_>,
    ) -> Result<()> {
        let request = run.request;
        let meta = AllocationMeta {
            title: request.record.as_ref().map(|r| r.draft.title.clone()),
            ..AllocationMeta::now(request.agent.clone())
        };
        let ledger_path = ledger
            .propose(&request.prefix, candidate.number, meta)
            .write(&self.root)?;
        let mut change = ChangeSet {
            message: format!("Allocate ID: {candidate}"),
            paths: vec![paths::relative_to(&self.root, &ledger_path).to_path_buf()],
        };

        if let (Some(planned), Some(path)) = (&request.record, record_path) {
            crate::io::atomic_write(path, planned.draft.render(candidate)?.as_bytes())?;
            change.message = format!("Create {candidate}: {}", planned.draft.title);
            change
                .paths
                .push(paths::relative_to(&self.root, path).to_path_buf());
        }

        match self.substrate.commit(&change) {
            Ok(_) => Ok(()),
            Err(e) if run.mode == SyncMode::LocalOnly => {
                tracing::warn!(error = %e, "could not commit allocation locally; files are written but uncommitted");
                Ok(())
            }
            Err(e) => Err(KanbanError::Substrate(e.to_string())),
        }
    }

    fn publish(
        &mut self,
        observed: Head,
        candidate: Identifier,
        record_path: Option<PathBuf>,
        run: &mut Run<'_>,
    ) -> Result<State> {
        run.attempts += 1;
        match self.substrate.push(&observed) {
            Ok(PushOutcome::Published(head)) => {
                tracing::debug!(%candidate, head = %head, attempt = run.attempts, "publish accepted");
                Ok(State::Allocated(Allocation {
                    id: candidate,
                    mode: SyncMode::Synced,
                    attempts: run.attempts,
                    committed: true,
                    record_path,
                }))
            }
            Ok(PushOutcome::Rejected(new_head)) => {
                tracing::warn!(
                    %candidate,
                    expected = %observed,
                    remote = %new_head,
                    attempt = run.attempts,
                    "publish rejected; remote advanced"
                );
                if run.attempts >= self.policy.max_attempts.max(1) {
                    self.discard_candidate(&new_head);
                    return Err(KanbanError::RetryExhausted {
                        prefix: run.request.prefix.to_string(),
                        attempts: run.attempts,
                    });
                }
                Ok(State::Reconcile {
                    new_head,
                    previous: candidate,
                })
            }
            Err(e @ (SubstrateError::Timeout { .. } | SubstrateError::Unavailable(_))) => {
                Err(KanbanError::Inconclusive {
                    prefix: run.request.prefix.to_string(),
                    candidate: candidate.to_string(),
                    detail: e.to_string(),
                })
            }
            Err(e) => Err(KanbanError::Substrate(e.to_string())),
        }
    }

    fn reconcile(&mut self, new_head: Head, previous: Identifier, run: &mut Run<'_>) -> Result<State> {
        match self.substrate.rebase_onto(&new_head) {
            Ok(RebaseOutcome::Rebased(head)) => {
                tracing::debug!(discarded = %previous, head = %head, "reconciled with remote");
                run.previous = Some(previous);
                Ok(State::Compute {
                    observed: Some(head),
                })
            }
            Ok(RebaseOutcome::Conflict(detail)) => Err(KanbanError::ReconcileConflict {
                prefix: run.request.prefix.to_string(),
                detail,
            }),
            Err(e @ SubstrateError::Timeout { .. }) => Err(KanbanError::Inconclusive {
                prefix: run.request.prefix.to_string(),
                candidate: previous.to_string(),
                detail: e.to_string(),
            }),
            Err(e) => Err(KanbanError::Substrate(e.to_string())),
        }
    }

    /// Best effort: leave the checkout on the remote head instead of on a
    /// commit carrying a number that was never published.
    fn discard_candidate(&mut self, head: &Head) {
        match self.substrate.rebase_onto(head) {
            Ok(RebaseOutcome::Rebased(_)) => {}
            Ok(RebaseOutcome::Conflict(detail)) => {
                tracing::warn!(%detail, "could not drop unpublished allocation commit");
            }
            Err(e) => tracing::warn!(error = %e, "could not drop unpublished allocation commit"),
        }
    }
}

/// Working-tree state to put back when staging fails part way.
struct Rollback {
    ledger_path: PathBuf,
    /// Ledger bytes before staging; `None` when there was no ledger.
    ledger: Option<Vec<u8>>,
}

impl Rollback {
    fn capture(root: &Path) -> Result<Self> {
        let ledger_path = paths::ledger_path(root);
        let ledger = match std::fs::read(&ledger_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { ledger_path, ledger })
    }

    /// Best effort: a failure here is logged, the staging error is what gets reported.
    fn restore(self, record_path: Option<&Path>) {
        let ledger = match &self.ledger {
            Some(bytes) => crate::io::atomic_write(&self.ledger_path, bytes),
            None => remove_if_present(&self.ledger_path),
        };
        if let Err(e) = ledger {
            tracing::warn!(path = %self.ledger_path.display(), error = %e, "could not restore ledger after failed staging");
        }
        if let Some(path) = record_path {
            if let Err(e) = remove_if_present(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove record after failed staging");
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
