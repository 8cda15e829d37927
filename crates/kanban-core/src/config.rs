use crate::error::{KanbanError, Result};
use crate::paths;
use crate::types::Prefix;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Themes
// ---------------------------------------------------------------------------

/// (type id, id prefix, directory name)
const SOFTWARE_TYPES: &[(&str, &str, &str)] = &[
    ("feature", "FEAT", "features"),
    ("bug", "BUG", "bugs"),
    ("epic", "EPIC", "epics"),
    ("issue", "ISSUE", "issues"),
    ("task", "TASK", "tasks"),
    ("idea", "IDEA", "ideas"),
];

const NAUTICAL_TYPES: &[(&str, &str, &str)] = &[
    ("expedition", "EXP", "expeditions"),
    ("voyage", "VOY", "voyages"),
    ("directive", "DIR", "directives"),
    ("hazard", "HAZ", "hazards"),
    ("signal", "SIG", "signals"),
    ("chore", "CHORE", "chores"),
];

fn theme_types(theme: &str) -> &'static [(&'static str, &'static str, &'static str)] {
    match theme {
        "software" => SOFTWARE_TYPES,
        "nautical" => NAUTICAL_TYPES,
        _ => &[],
    }
}

/// A record type resolved against the theme and any config overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemType {
    pub id: String,
    pub prefix: Prefix,
    /// Directory name used to recognise this type's scan path ("expeditions").
    pub dir_name: String,
    /// Explicit directory from `item_types.<id>.path`.
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// PathsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_paths: Vec<String>,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_root() -> String {
    paths::DEFAULT_WORK_ROOT.to_string()
}

fn default_ignore() -> Vec<String> {
    vec!["**/archive/**".to_string(), "**/templates/**".to_string()]
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            scan_paths: Vec::new(),
            ignore: default_ignore(),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemTypeOverride
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemTypeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// AllocationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Branch to publish to; the checked-out branch when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            remote: default_remote(),
            branch: None,
        }
    }
}

impl AllocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub item_types: BTreeMap<String, ItemTypeOverride>,
    #[serde(default)]
    pub allocation: AllocationConfig,
}

fn default_theme() -> String {
    "software".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            paths: PathsConfig::default(),
            item_types: BTreeMap::new(),
            allocation: AllocationConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct Wrapped<'a> {
    kanban: &'a Config,
}

impl Config {
    pub fn new(theme: impl Into<String>, work_root: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            paths: PathsConfig {
                root: work_root.into(),
                ..PathsConfig::default()
            },
            ..Config::default()
        }
    }

    /// Load `.kanban/config.yaml`; a missing file yields the defaults.
    ///
    /// Settings may sit at the top level or under a `kanban:` key.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(data)?;
        let value = match value {
            serde_yaml::Value::Null => return Ok(Config::default()),
            serde_yaml::Value::Mapping(mut map) => match map.remove("kanban") {
                Some(inner) => inner,
                None => serde_yaml::Value::Mapping(map),
            },
            other => other,
        };
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(&Wrapped { kanban: self })?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Work roots
    // -----------------------------------------------------------------------

    /// Repository-relative directories that may hold records.
    pub fn work_paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = if self.paths.scan_paths.is_empty() {
            vec![PathBuf::from(&self.paths.root)]
        } else {
            self.paths.scan_paths.iter().map(PathBuf::from).collect()
        };
        for ov in self.item_types.values() {
            if let Some(p) = &ov.path {
                let p = PathBuf::from(p);
                if !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        out
    }

    pub fn work_roots(&self, root: &Path) -> Vec<PathBuf> {
        self.work_paths().into_iter().map(|p| root.join(p)).collect()
    }

    pub fn ignore_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.paths.ignore {
            let glob = Glob::new(pattern).map_err(|e| KanbanError::InvalidIgnorePattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| KanbanError::InvalidIgnorePattern {
            pattern: self.paths.ignore.join(", "),
            reason: e.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Item types
    // -----------------------------------------------------------------------

    /// Resolve a record type by id ("feature", "expedition") for this theme.
    pub fn item_type(&self, type_id: &str) -> Result<ItemType> {
        let type_id = type_id.trim().to_ascii_lowercase();
        let builtin = theme_types(&self.theme)
            .iter()
            .find(|(id, _, _)| *id == type_id);
        let ov = self.item_types.get(&type_id);

        let prefix = match (ov.and_then(|o| o.id_prefix.as_deref()), builtin) {
            (Some(p), _) => Prefix::parse(p)?,
            (None, Some((_, p, _))) => Prefix::parse(p)?,
            (None, None) => match ov {
                // Custom types without an explicit prefix take the first four letters.
                Some(_) => Prefix::parse(&type_id.chars().take(4).collect::<String>())?,
                None => return Err(KanbanError::UnknownItemType(type_id)),
            },
        };
        let dir_name = builtin
            .map(|(_, _, d)| d.to_string())
            .unwrap_or_else(|| format!("{type_id}s"));

        Ok(ItemType {
            id: type_id,
            prefix,
            dir_name,
            path: ov.and_then(|o| o.path.as_ref()).map(PathBuf::from),
        })
    }

    /// Directory a new record of `item_type` is written to.
    ///
    /// Explicit path override, then the first scan path named after the
    /// type's directory, then the work root.
    pub fn type_directory(&self, root: &Path, item_type: &ItemType) -> PathBuf {
        if let Some(p) = &item_type.path {
            return root.join(p);
        }
        let by_name = self.paths.scan_paths.iter().find(|sp| {
            Path::new(sp)
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(&item_type.dir_name))
        });
        match by_name {
            Some(sp) => root.join(sp),
            None => root.join(&self.paths.root),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn nautical() -> Config {
        Config {
            theme: "nautical".to_string(),
            paths: PathsConfig {
                root: "kanban-work/".to_string(),
                scan_paths: vec![
                    "kanban-work/expeditions/".to_string(),
                    "kanban-work/voyages/".to_string(),
                    "kanban-work/signals/".to_string(),
                ],
                ..PathsConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.theme, "software");
        assert_eq!(cfg.paths.root, "work/");
        assert_eq!(cfg.allocation.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_is_wrapped() {
        let dir = TempDir::new().unwrap();
        nautical().save(dir.path()).unwrap();
        let raw = std::fs::read_to_string(paths::config_path(dir.path())).unwrap();
        assert!(raw.starts_with("kanban:"));
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.theme, "nautical");
        assert_eq!(loaded.paths.scan_paths.len(), 3);
    }

    #[test]
    fn unwrapped_config_is_accepted() {
        let cfg = Config::from_yaml("theme: nautical\nallocation:\n  max_attempts: 5\n").unwrap();
        assert_eq!(cfg.theme, "nautical");
        assert_eq!(cfg.allocation.max_attempts, 5);
        assert_eq!(cfg.allocation.remote, "origin");
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(Config::from_yaml("kanban: [unclosed").is_err());
    }

    #[test]
    fn work_paths_prefer_scan_paths() {
        assert_eq!(
            nautical().work_paths(),
            vec![
                PathBuf::from("kanban-work/expeditions/"),
                PathBuf::from("kanban-work/voyages/"),
                PathBuf::from("kanban-work/signals/"),
            ]
        );
        assert_eq!(Config::default().work_paths(), vec![PathBuf::from("work/")]);
    }

    #[test]
    fn item_type_prefixes() {
        let cfg = nautical();
        assert_eq!(cfg.item_type("expedition").unwrap().prefix.as_str(), "EXP");
        assert_eq!(cfg.item_type("Signal").unwrap().prefix.as_str(), "SIG");
        assert!(cfg.item_type("feature").is_err());
        assert_eq!(
            Config::default().item_type("feature").unwrap().prefix.as_str(),
            "FEAT"
        );
    }

    #[test]
    fn item_type_override_wins() {
        let mut cfg = Config::default();
        cfg.item_types.insert(
            "feature".to_string(),
            ItemTypeOverride {
                id_prefix: Some("FT".to_string()),
                path: Some("work/ft".to_string()),
            },
        );
        let ty = cfg.item_type("feature").unwrap();
        assert_eq!(ty.prefix.as_str(), "FT");
        assert!(cfg.work_paths().contains(&PathBuf::from("work/ft")));
        assert_eq!(
            cfg.type_directory(Path::new("/r"), &ty),
            PathBuf::from("/r/work/ft")
        );
    }

    #[test]
    fn type_directory_matches_scan_path_by_name() {
        let cfg = nautical();
        let ty = cfg.item_type("voyage").unwrap();
        assert_eq!(
            cfg.type_directory(Path::new("/r"), &ty),
            PathBuf::from("/r/kanban-work/voyages/")
        );
    }

    #[test]
    fn type_directory_falls_back_to_root() {
        let cfg = nautical();
        let ty = cfg.item_type("hazard").unwrap();
        assert_eq!(
            cfg.type_directory(Path::new("/r"), &ty),
            PathBuf::from("/r/kanban-work/")
        );
    }

    #[test]
    fn ignore_set_matches_archive() {
        let set = Config::default().ignore_set().unwrap();
        assert!(set.is_match("work/archive/FEAT-1.md"));
        assert!(!set.is_match("work/features/FEAT-1.md"));
    }
}
