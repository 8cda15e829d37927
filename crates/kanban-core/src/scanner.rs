//! Record Scanner: which identifiers are already referenced on disk.
//!
//! Every `.md` file under the work roots is examined twice, once for the
//! frontmatter `id` field and once for the identifier its filename starts
//! with. Both sources count, so a record whose field and filename disagree
//! contributes both numbers. The scan is read-only and never aborts on a
//! single bad file: unreadable or malformed files are reported as skipped
//! and the walk continues.
//!
//! Ignore globs only narrow what `validate` inspects. The allocation scan
//! walks every record file, archived ones included, since an archived
//! record still owns its number.

use crate::config::Config;
use crate::error::Result;
use crate::paths;
use crate::record;
use crate::types::{Identifier, Prefix};
use globset::GlobSet;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Identifiers found in one record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub path: PathBuf,
    /// From the frontmatter `id` field.
    pub field_id: Option<Identifier>,
    /// From the filename, e.g. `FEAT-11-x.md`.
    pub file_id: Option<Identifier>,
}

impl RecordRef {
    /// The identifier the record claims: its field, else its filename.
    pub fn primary_id(&self) -> Option<&Identifier> {
        self.field_id.as_ref().or(self.file_id.as_ref())
    }

    fn ids(&self) -> impl Iterator<Item = &Identifier> {
        self.field_id.iter().chain(self.file_id.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of walking the work roots.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub records: Vec<RecordRef>,
    pub skipped: Vec<SkippedFile>,
}

impl Scan {
    /// Every number referenced for `prefix` by either source.
    pub fn numbers(&self, prefix: &Prefix) -> BTreeSet<u64> {
        self.records
            .iter()
            .flat_map(RecordRef::ids)
            .filter(|id| &id.prefix == prefix)
            .map(|id| id.number)
            .collect()
    }

    pub fn max_number(&self, prefix: &Prefix) -> Option<u64> {
        self.numbers(prefix).last().copied()
    }
}

pub struct Scanner {
    base: PathBuf,
    roots: Vec<PathBuf>,
    ignore: GlobSet,
}

impl Scanner {
    /// `base` is the repository root that ignore globs are relative to.
    pub fn new(base: impl Into<PathBuf>, roots: Vec<PathBuf>, ignore: GlobSet) -> Self {
        Self {
            base: base.into(),
            roots,
            ignore,
        }
    }

    /// Scanner for `validate`: honours the configured ignore globs.
    pub fn from_config(root: &Path, config: &Config) -> Result<Self> {
        Ok(Self::new(root, config.work_roots(root), config.ignore_set()?))
    }

    /// Scanner for allocation: every record under the work roots counts.
    pub fn for_allocation(root: &Path, config: &Config) -> Self {
        Self::new(root, config.work_roots(root), GlobSet::empty())
    }

    pub fn scan(&self) -> Scan {
        let mut scan = Scan::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for root in &self.roots {
            if !root.is_dir() {
                tracing::debug!(root = %root.display(), "work root missing; nothing to scan");
                continue;
            }
            for entry in WalkDir::new(root).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        tracing::debug!(path = %path.display(), error = %e, "skipping unwalkable entry");
                        scan.skipped.push(SkippedFile {
                            path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_record_file(entry.path()) {
                    continue;
                }
                if self.is_ignored(entry.path()) || !seen.insert(entry.path().to_path_buf()) {
                    continue;
                }
                if let Some(r) = self.examine(entry.path(), &mut scan.skipped) {
                    scan.records.push(r);
                }
            }
        }

        if !scan.skipped.is_empty() {
            tracing::warn!(
                skipped = scan.skipped.len(),
                "some record files could not be read; scanned ids may undercount"
            );
        }
        scan
    }

    /// Numbers referenced on disk for one prefix.
    pub fn numbers(&self, prefix: &Prefix) -> BTreeSet<u64> {
        self.scan().numbers(prefix)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.is_match(paths::relative_to(&self.base, path))
    }

    fn examine(&self, path: &Path, skipped: &mut Vec<SkippedFile>) -> Option<RecordRef> {
        let file_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(Identifier::from_file_stem);

        let field_id = match std::fs::read_to_string(path) {
            Ok(content) => match record::field_identifier(&content) {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "malformed frontmatter");
                    skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: format!("malformed frontmatter: {e}"),
                    });
                    None
                }
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "unreadable record file");
                skipped.push(SkippedFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                None
            }
        };

        if field_id.is_none() && file_id.is_none() {
            return None;
        }
        Some(RecordRef {
            path: path.to_path_buf(),
            field_id,
            file_id,
        })
    }
}

fn is_record_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(paths::RECORD_EXTENSION))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
