//! Allocation against real git repositories sharing a bare remote.
//! Skipped when `git` is not on PATH.

use kanban_core::config::Config;
use kanban_core::ledger::Ledger;
use kanban_core::record::RecordDraft;
use kanban_core::sync::git::GitSubstrate;
use kanban_core::sync::{AllocationRequest, Driver, PlannedRecord, SyncMode};
use kanban_core::types::Prefix;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn git_available() -> bool {
    if which::which("git").is_ok() {
        return true;
    }
    eprintln!("git not found; skipping");
    false
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

struct Fixture {
    tmp: TempDir,
    remote: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let remote = tmp.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--quiet", "--bare"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        Self { tmp, remote }
    }

    fn clone(&self, name: &str) -> PathBuf {
        let dir = self.tmp.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        git(&dir, &["init", "--quiet"]);
        git(&dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&dir, &["config", "user.name", name]);
        git(&dir, &["config", "user.email", &format!("{name}@example.com")]);
        git(&dir, &["config", "commit.gpgsign", "false"]);
        git(&dir, &["remote", "add", "origin", self.remote.to_str().unwrap()]);
        dir
    }

    fn remote_ledger(&self) -> Ledger {
        let doc = git(&self.remote, &["show", "main:.kanban/id-ledger.yaml"]);
        Ledger::from_yaml(&doc).unwrap()
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.allocation.branch = Some("main".into());
    config.allocation.max_attempts = 10;
    config
}

fn driver(root: &Path) -> Driver<GitSubstrate> {
    let config = config();
    Driver::from_config(root, &config, GitSubstrate::from_config(root, &config)).unwrap()
}

fn feat() -> Prefix {
    Prefix::parse("FEAT").unwrap()
}

#[cfg(unix)]
fn install_hook(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
fn remote_has_branch(remote: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", "refs/heads/main"])
        .current_dir(remote)
        .output()
        .unwrap()
        .status
        .success()
}

#[test]
fn sequential_clones_see_each_others_allocations() {
    if !git_available() {
        return;
    }
    let fx = Fixture::new();
    let a = fx.clone("alice");
    let b = fx.clone("bob");

    let first = driver(&a).allocate(&AllocationRequest::new(feat(), "alice")).unwrap();
    assert_eq!(first.id.to_string(), "FEAT-1");
    assert_eq!(first.mode, SyncMode::Synced);

    let second = driver(&b).allocate(&AllocationRequest::new(feat(), "bob")).unwrap();
    assert_eq!(second.id.to_string(), "FEAT-2");

    let ledger = fx.remote_ledger();
    assert_eq!(ledger.highest(&feat()), Some(2));
    assert_eq!(ledger.entry(&feat()).unwrap().last_allocated_by, "bob");
    assert_eq!(git(&fx.remote, &["log", "-1", "--format=%s", "main"]), "Allocate ID: FEAT-2");
}

#[test]
fn create_commits_the_record_with_the_ledger() {
    if !git_available() {
        return;
    }
    let fx = Fixture::new();
    let a = fx.clone("alice");
    let planned = PlannedRecord {
        draft: RecordDraft::new("feature", "Dark mode"),
        dir: a.join("work"),
    };

    let got = driver(&a)
        .allocate(&AllocationRequest::new(feat(), "alice").with_record(planned))
        .unwrap();
    assert_eq!(got.id.to_string(), "FEAT-1");

    let files = git(&fx.remote, &["ls-tree", "-r", "--name-only", "main"]);
    assert!(files.lines().any(|l| l == "work/FEAT-1-Dark-mode.md"));
    assert!(files.lines().any(|l| l == ".kanban/id-ledger.yaml"));
}

#[test]
fn concurrent_clones_never_collide() {
    if !git_available() {
        return;
    }
    let fx = Fixture::new();
    let roots: Vec<PathBuf> = ["a", "b", "c"].iter().map(|n| fx.clone(n)).collect();

    let handles: Vec<_> = roots
        .into_iter()
        .map(|root| {
            std::thread::spawn(move || {
                driver(&root)
                    .allocate(&AllocationRequest::new(feat(), "agent"))
                    .map(|a| a.id.number)
            })
        })
        .collect();

    let mut numbers: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(fx.remote_ledger().highest(&feat()), Some(3));
}

#[test]
fn missing_remote_falls_back_to_local_only() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    git(root, &["init", "--quiet"]);
    git(root, &["config", "user.name", "solo"]);
    git(root, &["config", "user.email", "solo@example.com"]);
    git(root, &["config", "commit.gpgsign", "false"]);

    let got = driver(root).allocate(&AllocationRequest::new(feat(), "solo")).unwrap();
    assert_eq!(got.mode, SyncMode::LocalOnly);
    assert_eq!(got.id.to_string(), "FEAT-1");
    assert_eq!(git(root, &["log", "-1", "--format=%s"]), "Allocate ID: FEAT-1");
}

#[cfg(unix)]
#[test]
fn hanging_push_is_inconclusive() {
    if !git_available() {
        return;
    }
    let fx = Fixture::new();
    install_hook(&fx.remote.join("hooks/pre-receive"), "sleep 5");
    let a = fx.clone("alice");
    let mut config = config();
    config.allocation.timeout_secs = 1;
    let mut d = Driver::from_config(&a, &config, GitSubstrate::from_config(&a, &config)).unwrap();

    let started = std::time::Instant::now();
    let err = d.allocate(&AllocationRequest::new(feat(), "alice")).unwrap_err();
    assert_eq!(err.kind(), "inconclusive");
    assert!(err.to_string().contains("FEAT-1"));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn unrecognised_push_failure_is_inconclusive() {
    if !git_available() {
        return;
    }
    let fx = Fixture::new();
    let a = fx.clone("alice");
    install_hook(&a.join(".git/hooks/pre-push"), "echo refusing >&2\nexit 1");

    let err = driver(&a)
        .allocate(&AllocationRequest::new(feat(), "alice"))
        .unwrap_err();
    assert_eq!(err.kind(), "inconclusive");
    assert!(!remote_has_branch(&fx.remote));
}
