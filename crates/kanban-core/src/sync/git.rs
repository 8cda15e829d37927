//! Git as the coordination substrate.
//!
//! Compare-and-swap publish is `git push --force-with-lease=<ref>:<expected>`:
//! the remote accepts the push only while the branch still points at the
//! commit we fetched. Every git invocation runs under the configured timeout
//! and is killed when it expires.

use super::{ChangeSet, Head, PushOutcome, RebaseOutcome, Substrate, SubstrateError, SubstrateResult};
use crate::config::Config;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output readers get to finish after a timed-out git is killed.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Fragments git prints when a push was refused without updating the remote.
const REJECTION_MARKERS: &[&str] = &[
    "stale info",
    "[rejected]",
    "[remote rejected]",
    "fetch first",
    "non-fast-forward",
    "cannot lock ref",
];

#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn detail(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

pub struct GitSubstrate {
    root: PathBuf,
    remote: String,
    branch: Option<String>,
    timeout: Duration,
    /// HEAD is an allocation commit that has not been published.
    candidate: bool,
}

impl GitSubstrate {
    pub fn new(root: impl Into<PathBuf>, remote: impl Into<String>, branch: Option<String>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            remote: remote.into(),
            branch,
            timeout,
            candidate: false,
        }
    }

    pub fn from_config(root: &Path, config: &Config) -> Self {
        Self::new(
            root,
            config.allocation.remote.clone(),
            config.allocation.branch.clone(),
            config.allocation.timeout(),
        )
    }

    fn git(&self, op: &'static str, args: &[&str]) -> SubstrateResult<GitOutput> {
        run_git(&self.root, op, args, self.timeout)
    }

    /// Run git and turn a non-zero exit into `Failed`.
    fn git_ok(&self, op: &'static str, args: &[&str]) -> SubstrateResult<String> {
        let out = self.git(op, args)?;
        if out.success {
            Ok(out.stdout.trim().to_string())
        } else {
            Err(SubstrateError::Failed {
                op,
                detail: out.detail(),
            })
        }
    }

    fn ensure_remote(&self) -> SubstrateResult<()> {
        if which::which("git").is_err() {
            return Err(SubstrateError::Unavailable("git is not installed".into()));
        }
        let inside = self.git("pull", &["rev-parse", "--is-inside-work-tree"])?;
        if !inside.success {
            return Err(SubstrateError::Unavailable(format!(
                "{} is not a git repository",
                self.root.display()
            )));
        }
        let url = self.git("pull", &["remote", "get-url", &self.remote])?;
        if !url.success {
            return Err(SubstrateError::Unavailable(format!(
                "no remote named '{}' is configured",
                self.remote
            )));
        }
        Ok(())
    }

    fn branch(&self) -> SubstrateResult<String> {
        if let Some(b) = &self.branch {
            return Ok(b.clone());
        }
        self.git_ok("pull", &["symbolic-ref", "--short", "HEAD"])
    }

    /// Fetch the branch and return the remote head; unborn when the branch does not exist yet.
    fn fetch(&self, op: &'static str, branch: &str) -> SubstrateResult<Head> {
        let out = self.git(op, &["fetch", "--quiet", &self.remote, branch])?;
        if !out.success {
            if out.stderr.contains("couldn't find remote ref") {
                return Ok(Head::unborn());
            }
            return Err(SubstrateError::Unavailable(out.detail()));
        }
        Ok(Head::new(self.git_ok(op, &["rev-parse", "FETCH_HEAD"])?))
    }

    /// Bring local HEAD onto `head`: fast-forward, else replay local commits.
    fn integrate(&self, op: &'static str, head: &Head) -> SubstrateResult<Result<(), String>> {
        if head.is_unborn() {
            return Ok(Ok(()));
        }
        if self.git(op, &["merge", "--ff-only", "--quiet", head.as_str()])?.success {
            return Ok(Ok(()));
        }
        let rebase = self.git(op, &["rebase", "--autostash", head.as_str()])?;
        if rebase.success {
            return Ok(Ok(()));
        }
        let _ = self.git(op, &["rebase", "--abort"]);
        Ok(Err(rebase.detail()))
    }

    fn has_parent(&self) -> SubstrateResult<bool> {
        Ok(self.git("rebase", &["rev-parse", "--verify", "--quiet", "HEAD~1"])?.success)
    }
}

impl Substrate for GitSubstrate {
    fn pull(&mut self) -> SubstrateResult<Head> {
        self.ensure_remote()?;
        let branch = self.branch()?;
        let head = self.fetch("pull", &branch)?;
        if let Err(detail) = self.integrate("pull", &head)? {
            return Err(SubstrateError::Failed { op: "pull", detail });
        }
        tracing::debug!(remote = %self.remote, %branch, head = %head, "pulled");
        Ok(head)
    }

    fn commit(&mut self, change: &ChangeSet) -> SubstrateResult<Head> {
        let paths: Vec<String> = change
            .paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git_ok("commit", &add)?;

        let mut commit = vec!["commit", "--quiet", "-m", change.message.as_str(), "--"];
        commit.extend(paths.iter().map(String::as_str));
        if let Err(e) = self.git_ok("commit", &commit) {
            let mut unstage = vec!["reset", "--quiet", "--"];
            unstage.extend(paths.iter().map(String::as_str));
            if let Err(undo) = self.git_ok("commit", &unstage) {
                tracing::warn!(error = %undo, "could not unstage allocation after a failed commit");
            }
            return Err(e);
        }
        self.candidate = true;
        Ok(Head::new(self.git_ok("commit", &["rev-parse", "HEAD"])?))
    }

    fn push(&mut self, expected: &Head) -> SubstrateResult<PushOutcome> {
        let branch = self.branch()?;
        let refname = format!("refs/heads/{branch}");
        let lease = format!("--force-with-lease={refname}:{}", expected.as_str());
        let target = format!("HEAD:{refname}");
        let out = self.git("push", &["push", "--porcelain", &lease, &self.remote, &target])?;

        if out.success {
            self.candidate = false;
            let head = Head::new(self.git_ok("push", &["rev-parse", "HEAD"])?);
            return Ok(PushOutcome::Published(head));
        }
        let text = format!("{}\n{}", out.stdout, out.stderr);
        if REJECTION_MARKERS.iter().any(|m| text.contains(m)) {
            let head = self.fetch("push", &branch)?;
            return Ok(PushOutcome::Rejected(head));
        }
        // Anything else may or may not have reached the remote.
        Err(SubstrateError::Unavailable(out.detail()))
    }

    fn rebase_onto(&mut self, head: &Head) -> SubstrateResult<RebaseOutcome> {
        if self.candidate {
            if self.has_parent()? {
                self.git_ok("rebase", &["reset", "--quiet", "--keep", "HEAD~1"])?;
            } else if head.is_unborn() {
                return Ok(RebaseOutcome::Conflict(
                    "allocation commit has no parent and the remote branch is empty".into(),
                ));
            } else {
                self.git_ok("rebase", &["reset", "--quiet", "--keep", head.as_str()])?;
            }
            self.candidate = false;
        }
        match self.integrate("rebase", head)? {
            Ok(()) => Ok(RebaseOutcome::Rebased(head.clone())),
            Err(detail) => Ok(RebaseOutcome::Conflict(detail)),
        }
    }
}

/// Run `git <args>` in `dir`, killing it once `timeout` elapses.
fn run_git(dir: &Path, op: &'static str, args: &[&str], timeout: Duration) -> SubstrateResult<GitOutput> {
    tracing::trace!(?args, "git");
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SubstrateError::Unavailable("git is not installed".into()),
            _ => SubstrateError::Failed {
                op,
                detail: e.to_string(),
            },
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                reap(stdout.into_iter().chain(stderr), READER_GRACE);
                return Err(SubstrateError::Timeout { op, after: timeout });
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(SubstrateError::Failed {
                    op,
                    detail: e.to_string(),
                })
            }
        }
    };

    let collect = |h: Option<JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(GitOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Join readers of a killed git, waiting at most `grace` in total.
///
/// A grandchild such as ssh can inherit the pipes and keep them open after
/// git itself is gone. Readers still blocked at the deadline are detached and
/// exit once that process closes its end. Returns how many were joined.
fn reap(readers: impl IntoIterator<Item = JoinHandle<String>>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    let mut joined = 0;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
        if reader.is_finished() {
            let _ = reader.join();
            joined += 1;
        } else {
            tracing::debug!("git output reader still blocked after kill; detaching it");
        }
    }
    joined
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// `git config user.name` in `root`, if set.
pub fn user_name(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["config", "user.name"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Who an allocation is recorded as: git user, then `$USER`, then "unknown".
pub fn agent_identity(root: &Path) -> String {
    user_name(root)
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.trim().is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn non_repository_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut git = GitSubstrate::new(dir.path(), "origin", None, Duration::from_secs(10));
        match git.pull() {
            Err(SubstrateError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn agent_identity_is_never_empty() {
        let dir = TempDir::new().unwrap();
        assert!(!agent_identity(dir.path()).is_empty());
    }

    #[test]
    fn reap_joins_finished_readers() {
        let done = drain(std::io::empty());
        assert_eq!(reap([done], Duration::from_secs(5)), 1);
    }

    #[test]
    fn reap_gives_up_on_a_blocked_reader() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let blocked = std::thread::spawn(move || {
            let _ = rx.recv();
            String::new()
        });
        let started = Instant::now();
        assert_eq!(reap([blocked], Duration::from_millis(100)), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }

    #[test]
    fn output_detail_prefers_stderr() {
        let out = GitOutput {
            success: false,
            stdout: "out\n".into(),
            stderr: " err \n".into(),
        };
        assert_eq!(out.detail(), "err");
        let out = GitOutput {
            success: false,
            stdout: "out\n".into(),
            stderr: String::new(),
        };
        assert_eq!(out.detail(), "out");
    }
}
