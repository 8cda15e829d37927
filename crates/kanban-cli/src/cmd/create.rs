use super::next_id::{allocation_json, git_driver, load_config, warn_local_only};
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use kanban_core::paths;
use kanban_core::record::RecordDraft;
use kanban_core::sync::git;
use kanban_core::sync::{AllocationRequest, PlannedRecord};
use std::path::Path;

#[derive(Args)]
pub struct CreateArgs {
    /// Item type, e.g. feature, bug, expedition
    pub item_type: String,

    /// Record title
    #[arg(required = true)]
    pub title: Vec<String>,

    #[arg(long)]
    pub priority: Option<String>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,

    /// Skip the remote and allocate from the local view only
    #[arg(long)]
    pub no_sync: bool,
}

pub fn run(root: &Path, args: CreateArgs, json: bool) -> anyhow::Result<()> {
    let config = load_config(root, None, None)?;
    let item_type = config.item_type(&args.item_type)?;
    let title = args.title.join(" ");

    let draft = RecordDraft {
        priority: args.priority,
        assignee: args.assignee,
        description: args.description,
        tags: parse_tags(args.tags.as_deref()),
        ..RecordDraft::new(item_type.id.clone(), title.clone())
    };
    let planned = PlannedRecord {
        draft,
        dir: config.type_directory(root, &item_type),
    };

    let mut request = AllocationRequest::new(item_type.prefix.clone(), git::agent_identity(root))
        .with_record(planned);
    if args.no_sync {
        request = request.local_only();
    }
    let mut driver = git_driver(root, &config)?;
    let allocation = driver
        .allocate(&request)
        .with_context(|| format!("failed to create {} '{title}'", item_type.id))?;

    let rel = allocation
        .record_path
        .as_deref()
        .map(|p| paths::relative_to(root, p).display().to_string())
        .unwrap_or_default();

    if json {
        let mut value = allocation_json(&allocation);
        value["path"] = serde_json::Value::String(rel);
        value["title"] = serde_json::Value::String(title);
        value["type"] = serde_json::Value::String(item_type.id);
        print_json(&value)?;
    } else {
        println!("Created {}: {title}", allocation.id);
        println!("  {rel}");
        warn_local_only(&allocation);
    }
    Ok(())
}

fn parse_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
