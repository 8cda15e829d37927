//! In-memory coordination substrate for tests.
//!
//! [`MemoryRemote`] is the shared branch: a head counter plus a snapshot of
//! tracked files. Each [`MemoryClone`] is one participant's checkout on disk
//! and can be told to misbehave (offline, rejected or timed-out pushes) so
//! the driver's retry and fallback paths run without a network.

use super::{ChangeSet, Head, PushOutcome, RebaseOutcome, Substrate, SubstrateError, SubstrateResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct RemoteState {
    head: u64,
    files: BTreeMap<PathBuf, Vec<u8>>,
    log: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `content` at `path` as its own commit.
    pub fn seed(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Head {
        let mut state = self.lock();
        let path = path.into();
        state.log.push(format!("seed {}", path.display()));
        state.files.insert(path, content.into());
        state.head += 1;
        head_at(state.head)
    }

    pub fn head(&self) -> Head {
        head_at(self.lock().head)
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock()
            .files
            .get(path.as_ref())
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Commit messages in publish order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Number of accepted publishes, seeds excluded.
    pub fn publish_count(&self) -> usize {
        self.lock().log.iter().filter(|m| !m.starts_with("seed ")).count()
    }

    /// A participant whose working tree lives at `root`.
    pub fn clone_into(&self, root: impl Into<PathBuf>) -> MemoryClone {
        MemoryClone {
            root: root.into(),
            remote: self.clone(),
            pending: BTreeMap::new(),
            pending_messages: Vec::new(),
            faults: Faults::default(),
            pushes: 0,
            before_push: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Failure injection for one clone.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Every operation touching the remote reports `Unavailable`.
    pub offline: bool,
    /// Every push is rejected as if another agent always wins.
    pub reject_every_push: bool,
    /// Reject this many pushes without the remote having moved.
    pub spurious_rejections: u32,
    /// Pushes time out.
    pub push_timeout: bool,
    /// Local commits fail, as with a broken hook or a locked index.
    pub fail_commit: bool,
}

type PushHook = Box<dyn FnMut(u32) + Send>;

pub struct MemoryClone {
    root: PathBuf,
    remote: MemoryRemote,
    /// Committed but unpublished file contents, repository-relative.
    pending: BTreeMap<PathBuf, Vec<u8>>,
    pending_messages: Vec<String>,
    pub faults: Faults,
    pushes: u32,
    before_push: Option<PushHook>,
}

impl MemoryClone {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }

    /// Push attempts made so far, rejected ones included.
    pub fn pushes(&self) -> u32 {
        self.pushes
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_messages.is_empty()
    }

    /// Run `hook` with the 1-based attempt number before each push reaches
    /// the remote. Lets a test move the remote between Stage and Publish.
    pub fn before_push(&mut self, hook: impl FnMut(u32) + Send + 'static) {
        self.before_push = Some(Box::new(hook));
    }

    fn checkout(&self, files: &BTreeMap<PathBuf, Vec<u8>>) -> SubstrateResult<()> {
        for (rel, content) in files {
            crate::io::atomic_write(&self.root.join(rel), content).map_err(|e| SubstrateError::Failed {
                op: "checkout",
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Substrate for MemoryClone {
    fn pull(&mut self) -> SubstrateResult<Head> {
        if self.faults.offline {
            return Err(SubstrateError::Unavailable("memory remote is offline".into()));
        }
        let (head, files) = {
            let state = self.remote.lock();
            (state.head, state.files.clone())
        };
        self.checkout(&files)?;
        Ok(head_at(head))
    }

    fn commit(&mut self, change: &ChangeSet) -> SubstrateResult<Head> {
        if self.faults.fail_commit {
            return Err(SubstrateError::Failed {
                op: "commit",
                detail: "commit refused".into(),
            });
        }
        for rel in &change.paths {
            let content = std::fs::read(self.root.join(rel)).map_err(|e| SubstrateError::Failed {
                op: "commit",
                detail: format!("{}: {e}", rel.display()),
            })?;
            self.pending.insert(rel.clone(), content);
        }
        self.pending_messages.push(change.message.clone());
        Ok(Head::new(format!("local-{}", self.pending_messages.len())))
    }

    fn push(&mut self, expected: &Head) -> SubstrateResult<PushOutcome> {
        if self.faults.offline {
            return Err(SubstrateError::Unavailable("memory remote is offline".into()));
        }
        self.pushes += 1;
        if let Some(hook) = self.before_push.as_mut() {
            hook(self.pushes);
        }
        if self.faults.push_timeout {
            return Err(SubstrateError::Timeout {
                op: "push",
                after: Duration::from_secs(30),
            });
        }

        let mut state = self.remote.lock();
        if self.faults.reject_every_push {
            return Ok(PushOutcome::Rejected(head_at(state.head)));
        }
        if self.faults.spurious_rejections > 0 {
            self.faults.spurious_rejections -= 1;
            return Ok(PushOutcome::Rejected(head_at(state.head)));
        }
        if head_number(expected) != state.head {
            return Ok(PushOutcome::Rejected(head_at(state.head)));
        }
        if self.pending_messages.is_empty() {
            return Ok(PushOutcome::Published(head_at(state.head)));
        }

        for (rel, content) in std::mem::take(&mut self.pending) {
            state.files.insert(rel, content);
        }
        for message in self.pending_messages.drain(..) {
            state.head += 1;
            state.log.push(message);
        }
        Ok(PushOutcome::Published(head_at(state.head)))
    }

    fn rebase_onto(&mut self, _head: &Head) -> SubstrateResult<RebaseOutcome> {
        if self.faults.offline {
            return Err(SubstrateError::Unavailable("memory remote is offline".into()));
        }
        let (head, files) = {
            let state = self.remote.lock();
            (state.head, state.files.clone())
        };
        // Files only the dropped commit introduced leave the working tree.
        for rel in std::mem::take(&mut self.pending).into_keys() {
            if !files.contains_key(&rel) {
                let _ = std::fs::remove_file(self.root.join(&rel));
            }
        }
        self.pending_messages.clear();
        self.checkout(&files)?;
        Ok(RebaseOutcome::Rebased(head_at(head)))
    }
}

fn head_at(n: u64) -> Head {
    if n == 0 {
        Head::unborn()
    } else {
        Head::new(n.to_string())
    }
}

fn head_number(head: &Head) -> u64 {
    head.as_str().parse().unwrap_or(0)
}
