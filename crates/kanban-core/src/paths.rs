use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const KANBAN_DIR: &str = ".kanban";
pub const CONFIG_FILE: &str = ".kanban/config.yaml";
pub const LEDGER_FILE: &str = ".kanban/id-ledger.yaml";
pub const LEGACY_ALLOCATIONS_FILE: &str = ".kanban/_ID_ALLOCATIONS.json";

pub const DEFAULT_WORK_ROOT: &str = "work/";
pub const RECORD_EXTENSION: &str = "md";

const MAX_SLUG_LEN: usize = 50;

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn kanban_dir(root: &Path) -> PathBuf {
    root.join(KANBAN_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_FILE)
}

pub fn legacy_allocations_path(root: &Path) -> PathBuf {
    root.join(LEGACY_ALLOCATIONS_FILE)
}

/// Express `path` relative to `root` when it lives underneath it.
pub fn relative_to<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Title slugs
// ---------------------------------------------------------------------------

/// Turn a record title into a filename fragment: "Fix The Bug" -> "Fix-The-Bug".
///
/// ASCII alphanumerics are kept with their case, runs of spaces, hyphens and
/// underscores collapse to a single `-`, anything else is dropped. The result
/// is capped at 50 characters and never starts or ends with `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c);
        } else if matches!(c, ' ' | '-' | '_') {
            pending_sep = true;
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
    }
    slug.trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.kanban/config.yaml")
        );
        assert_eq!(
            ledger_path(root),
            PathBuf::from("/tmp/proj/.kanban/id-ledger.yaml")
        );
    }

    #[test]
    fn relative_to_strips_root() {
        let root = Path::new("/tmp/proj");
        let file = Path::new("/tmp/proj/work/FEAT-1.md");
        assert_eq!(relative_to(root, file), Path::new("work/FEAT-1.md"));
        assert_eq!(relative_to(root, Path::new("/elsewhere")), Path::new("/elsewhere"));
    }

    #[test]
    fn slug_basic() {
        assert_eq!(slugify("Fix The Bug"), "Fix-The-Bug");
    }

    #[test]
    fn slug_drops_punctuation() {
        assert_eq!(slugify("Add feature: auth!"), "Add-feature-auth");
        assert_eq!(slugify("  spaced -- out__title  "), "spaced-out-title");
    }

    #[test]
    fn slug_truncates_long_titles() {
        let slug = slugify(&"A".repeat(100));
        assert_eq!(slug.len(), 50);
        let slug = slugify(&format!("{} tail", "b".repeat(49)));
        assert!(slug.len() <= 50);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slug_empty() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}
