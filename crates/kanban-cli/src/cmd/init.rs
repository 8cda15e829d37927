use crate::output::print_json;
use anyhow::{bail, Context};
use kanban_core::config::Config;
use kanban_core::{io, paths};
use std::path::Path;

const THEMES: &[&str] = &["software", "nautical"];

pub fn run(root: &Path, theme: &str, work_root: Option<&str>, json: bool) -> anyhow::Result<()> {
    let theme = theme.trim().to_ascii_lowercase();
    if !THEMES.contains(&theme.as_str()) {
        bail!("unknown theme '{theme}' (expected one of: {})", THEMES.join(", "));
    }

    let kanban_dir = paths::kanban_dir(root);
    io::ensure_dir(&kanban_dir).with_context(|| format!("failed to create {}", kanban_dir.display()))?;

    let config_path = paths::config_path(root);
    let created = if config_path.exists() {
        false
    } else {
        let cfg = Config::new(theme.as_str(), work_root.unwrap_or(paths::DEFAULT_WORK_ROOT));
        cfg.save(root).context("failed to write config.yaml")?;
        true
    };

    // An existing config decides where records live.
    let config = Config::load(root).context("failed to load .kanban/config.yaml")?;
    let mut dirs = Vec::new();
    for dir in config.work_roots(root) {
        io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        dirs.push(paths::relative_to(root, &dir).display().to_string());
    }

    if json {
        print_json(&serde_json::json!({
            "success": true,
            "root": root.display().to_string(),
            "config_created": created,
            "theme": config.theme,
            "work_roots": dirs,
        }))?;
    } else {
        println!("Initializing kanban in: {}", root.display());
        if created {
            println!("  created: {}", paths::CONFIG_FILE);
        } else {
            println!("  exists:  {}", paths::CONFIG_FILE);
        }
        for d in &dirs {
            println!("  dir:     {d}");
        }
    }
    Ok(())
}
