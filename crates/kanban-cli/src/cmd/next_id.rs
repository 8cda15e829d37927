use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use kanban_core::config::Config;
use kanban_core::sync::git::{self, GitSubstrate};
use kanban_core::sync::{Allocation, AllocationRequest, Driver, SyncMode};
use kanban_core::types::Prefix;
use std::path::Path;

#[derive(Args)]
pub struct NextIdArgs {
    /// Identifier prefix, e.g. FEAT or EXP (case-insensitive)
    pub prefix: String,

    /// Skip the remote and allocate from the local view only
    #[arg(long)]
    pub no_sync: bool,

    /// Report the next number without reserving it
    #[arg(long)]
    pub no_commit: bool,

    /// Timeout in seconds for each network step
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Publish attempts before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Config with command-line allocation overrides applied.
pub fn load_config(root: &Path, timeout: Option<u64>, max_attempts: Option<u32>) -> anyhow::Result<Config> {
    let mut config = Config::load(root).context("failed to load .kanban/config.yaml")?;
    if let Some(secs) = timeout {
        config.allocation.timeout_secs = secs;
    }
    if let Some(n) = max_attempts {
        config.allocation.max_attempts = n.max(1);
    }
    Ok(config)
}

pub fn git_driver(root: &Path, config: &Config) -> anyhow::Result<Driver<GitSubstrate>> {
    let substrate = GitSubstrate::from_config(root, config);
    Ok(Driver::from_config(root, config, substrate)?)
}

pub fn run(root: &Path, args: NextIdArgs, json: bool) -> anyhow::Result<()> {
    let prefix = Prefix::parse(&args.prefix)?;
    let config = load_config(root, args.timeout, args.max_attempts)?;
    let mut driver = git_driver(root, &config)?;

    let mut request = AllocationRequest::new(prefix, git::agent_identity(root));
    if args.no_sync {
        request = request.local_only();
    }
    if args.no_commit {
        request = request.peek();
    }
    let allocation = driver.allocate(&request)?;

    if json {
        print_json(&allocation_json(&allocation))?;
    } else {
        println!("{}", allocation.id);
        warn_local_only(&allocation);
        if !allocation.committed {
            eprintln!("note: {} was not reserved; another agent may take it", allocation.id);
        }
    }
    Ok(())
}

pub fn allocation_json(allocation: &Allocation) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "id": allocation.id.to_string(),
        "prefix": allocation.id.prefix.as_str(),
        "number": allocation.id.number,
        "mode": allocation.mode,
        "committed": allocation.committed,
        "attempts": allocation.attempts,
    })
}

pub fn warn_local_only(allocation: &Allocation) {
    if allocation.mode == SyncMode::LocalOnly && allocation.committed {
        eprintln!(
            "warning: {} was allocated locally without syncing; it is only unique within this checkout",
            allocation.id
        );
    }
}
