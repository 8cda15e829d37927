//! Consistency checks over record files.
//!
//! The allocator never inspects or repairs what it finds on disk; duplicate
//! identifiers and field/filename disagreements are surfaced here instead.

use crate::error::Result;
use crate::scanner::{RecordRef, Scan};
use crate::types::Identifier;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// More than one record claims the same identifier.
    DuplicateId { id: String, paths: Vec<PathBuf> },
    /// The filename does not start with the frontmatter id.
    FilenameMismatch { id: String, path: PathBuf },
}

impl Issue {
    pub fn describe(&self, root: &Path) -> String {
        match self {
            Issue::DuplicateId { id, paths } => {
                let list: Vec<String> = paths
                    .iter()
                    .map(|p| crate::paths::relative_to(root, p).display().to_string())
                    .collect();
                format!("duplicate id {id}: {}", list.join(", "))
            }
            Issue::FilenameMismatch { id, path } => format!(
                "{} does not match its id {id}",
                crate::paths::relative_to(root, path).display()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Find duplicate identifiers and filename mismatches.
pub fn check(scan: &Scan) -> Vec<Issue> {
    let mut by_id: BTreeMap<&Identifier, Vec<&RecordRef>> = BTreeMap::new();
    for r in &scan.records {
        if let Some(id) = r.primary_id() {
            by_id.entry(id).or_default().push(r);
        }
    }

    let mut issues: Vec<Issue> = by_id
        .into_iter()
        .filter(|(_, refs)| refs.len() > 1)
        .map(|(id, refs)| {
            let mut paths: Vec<PathBuf> = refs.iter().map(|r| r.path.clone()).collect();
            paths.sort();
            Issue::DuplicateId {
                id: id.to_string(),
                paths,
            }
        })
        .collect();

    for r in &scan.records {
        if let Some(field) = &r.field_id {
            if r.file_id.as_ref() != Some(field) {
                issues.push(Issue::FilenameMismatch {
                    id: field.to_string(),
                    path: r.path.clone(),
                });
            }
        }
    }
    issues
}

static LEADING_ID_RE: OnceLock<Regex> = OnceLock::new();

fn leading_id_re() -> &'static Regex {
    LEADING_ID_RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]*-\d+(-.*)?$").unwrap())
}

/// File name a mismatched record should have: the id plus the old descriptive suffix.
pub fn corrected_name(id: &str, path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or(crate::paths::RECORD_EXTENSION);
    let suffix = match leading_id_re().captures(stem) {
        Some(caps) => caps.get(1).map_or(String::new(), |m| m.as_str().to_string()),
        None if stem.is_empty() => String::new(),
        None => format!("-{stem}"),
    };
    Some(format!("{id}{suffix}.{ext}"))
}

/// Rename every mismatched record whose corrected name is free.
///
/// Duplicates are left alone. Returns the renames performed.
pub fn fix(issues: &[Issue]) -> Result<Vec<Rename>> {
    let mut done = Vec::new();
    for issue in issues {
        let Issue::FilenameMismatch { id, path } = issue else {
            continue;
        };
        let Some(name) = corrected_name(id, path) else {
            continue;
        };
        let target = path.with_file_name(name);
        if target.exists() {
            tracing::warn!(from = %path.display(), to = %target.display(), "rename target exists; leaving file as is");
            continue;
        }
        std::fs::rename(path, &target)?;
        tracing::info!(from = %path.display(), to = %target.display(), "renamed record");
        done.push(Rename {
            from: path.clone(),
            to: target,
        });
    }
    Ok(done)
}

/// Issues that a fix pass did not resolve.
pub fn remaining(issues: Vec<Issue>, renamed: &[Rename]) -> Vec<Issue> {
    issues
        .into_iter()
        .filter(|i| match i {
            Issue::FilenameMismatch { path, .. } => !renamed.iter().any(|r| &r.from == path),
            Issue::DuplicateId { .. } => true,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scanner::Scanner;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn scan(dir: &TempDir) -> Scan {
        Scanner::from_config(dir.path(), &Config::default()).unwrap().scan()
    }

    #[test]
    fn clean_tree_has_no_issues() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/FEAT-1-a.md", "---\nid: FEAT-1\n---\n");
        write(dir.path(), "work/FEAT-2.md", "---\nid: FEAT-2\n---\n");
        assert!(check(&scan(&dir)).is_empty());
    }

    #[test]
    fn duplicate_ids_are_reported_once() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/a/FEAT-3-x.md", "---\nid: FEAT-3\n---\n");
        write(dir.path(), "work/b/FEAT-3-y.md", "---\nid: FEAT-3\n---\n");
        let issues = check(&scan(&dir));
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            Issue::DuplicateId { id, paths } => {
                assert_eq!(id, "FEAT-3");
                assert_eq!(paths.len(), 2);
            }
            other => panic!("unexpected issue {other:?}"),
        }
    }

    #[test]
    fn mismatch_is_reported_and_fixed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/FEAT-11-dark-mode.md", "---\nid: FEAT-10\n---\n");
        let issues = check(&scan(&dir));
        assert_eq!(
            issues,
            vec![Issue::FilenameMismatch {
                id: "FEAT-10".into(),
                path: dir.path().join("work/FEAT-11-dark-mode.md"),
            }]
        );

        let renamed = fix(&issues).unwrap();
        assert_eq!(renamed.len(), 1);
        assert!(dir.path().join("work/FEAT-10-dark-mode.md").exists());
        assert!(remaining(issues, &renamed).is_empty());
        assert!(check(&scan(&dir)).is_empty());
    }

    #[test]
    fn fix_leaves_duplicates_and_occupied_targets() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "work/notes.md", "---\nid: BUG-4\n---\n");
        write(dir.path(), "work/BUG-4-notes.md", "---\nid: BUG-4\n---\n");
        let issues = check(&scan(&dir));
        let renamed = fix(&issues).unwrap();
        assert!(renamed.is_empty());
        assert!(dir.path().join("work/notes.md").exists());
        assert_eq!(remaining(issues, &renamed).len(), 2);
    }

    #[test]
    fn corrected_name_keeps_descriptive_suffix() {
        assert_eq!(
            corrected_name("EXP-9", Path::new("w/EXP-12-chart-course.md")).unwrap(),
            "EXP-9-chart-course.md"
        );
        assert_eq!(corrected_name("EXP-9", Path::new("w/EXP-12.md")).unwrap(), "EXP-9.md");
        assert_eq!(
            corrected_name("EXP-9", Path::new("w/chart-course.md")).unwrap(),
            "EXP-9-chart-course.md"
        );
    }
}
