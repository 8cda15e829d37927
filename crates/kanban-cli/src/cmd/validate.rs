use crate::output::{print_json, AlreadyReported};
use anyhow::Context;
use kanban_core::config::Config;
use kanban_core::paths;
use kanban_core::scanner::Scanner;
use kanban_core::validate::{self, Rename};
use std::path::Path;

pub fn run(root: &Path, fix: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load .kanban/config.yaml")?;
    let scan = Scanner::from_config(root, &config)?.scan();
    let issues = validate::check(&scan);

    let renamed: Vec<Rename> = if fix {
        validate::fix(&issues).context("failed to rename records")?
    } else {
        Vec::new()
    };
    let remaining = validate::remaining(issues, &renamed);

    if json {
        print_json(&serde_json::json!({
            "success": remaining.is_empty(),
            "scanned": scan.records.len(),
            "skipped": scan.skipped.len(),
            "issues": remaining,
            "fixed": renamed,
        }))?;
    } else {
        for r in &renamed {
            println!(
                "renamed {} -> {}",
                paths::relative_to(root, &r.from).display(),
                paths::relative_to(root, &r.to).display()
            );
        }
        for s in &scan.skipped {
            println!("skipped {}: {}", paths::relative_to(root, &s.path).display(), s.reason);
        }
        for issue in &remaining {
            println!("{}", issue.describe(root));
        }
        if remaining.is_empty() {
            println!("{} records checked, no issues", scan.records.len());
        } else {
            println!("{} issue(s) found", remaining.len());
        }
    }

    if remaining.is_empty() {
        Ok(())
    } else {
        Err(AlreadyReported.into())
    }
}
