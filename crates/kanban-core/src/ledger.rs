//! Ledger Store: the durable record of the highest number allocated per prefix.
//!
//! The ledger is a cache, not a requirement. A missing or unreadable ledger
//! reads as empty and the on-disk scan carries the allocation alone.
//! Entries are read one by one: an entry with malformed audit fields still
//! contributes its `highest`, and is written back untouched until an
//! allocation for its prefix replaces it.
//! `propose` only prepares a new document; nothing is durable until the
//! Synchronization Driver has published it.

use crate::error::Result;
use crate::paths;
use crate::types::Prefix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const HEADER: &str = "# Identifier ledger: highest number ever allocated per prefix.\n\
# Numbers are never reused. Edit only to raise a value.\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub highest: u64,
    pub last_allocated_at: DateTime<Utc>,
    pub last_allocated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_title: Option<String>,
}

/// Audit fields stamped onto the entry an allocation touches.
#[derive(Debug, Clone)]
pub struct AllocationMeta {
    pub by: String,
    pub at: DateTime<Utc>,
    pub title: Option<String>,
}

impl AllocationMeta {
    pub fn now(by: impl Into<String>) -> Self {
        Self {
            by: by.into(),
            at: Utc::now(),
            title: None,
        }
    }
}

/// One row of the legacy `_ID_ALLOCATIONS.json` log.
#[derive(Debug, Deserialize)]
struct LegacyAllocation {
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    number: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    /// Entries that did not parse, kept verbatim. Never shares a key with `entries`.
    unparsed: BTreeMap<String, Value>,
    /// Lower bounds folded in from the legacy allocation log; never written back.
    legacy: BTreeMap<String, u64>,
}

impl Ledger {
    /// Read the ledger under `root`. Never fails: absent or corrupt reads as empty.
    pub fn read(root: &Path) -> Self {
        Self {
            legacy: read_legacy(&paths::legacy_allocations_path(root)),
            ..read_document(&paths::ledger_path(root))
        }
    }

    /// Parse a ledger document. Fails only when the document as a whole is not
    /// a YAML mapping; a bad entry is kept aside instead.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let doc: Option<BTreeMap<String, Value>> = serde_yaml::from_str(data)?;
        let mut ledger = Self::default();
        for (prefix, value) in doc.unwrap_or_default() {
            match serde_yaml::from_value::<LedgerEntry>(value.clone()) {
                Ok(entry) => {
                    ledger.entries.insert(prefix, entry);
                }
                Err(e) => {
                    tracing::warn!(
                        %prefix,
                        error = %e,
                        highest = ?salvaged_highest(&value),
                        "malformed ledger entry; keeping it as written"
                    );
                    ledger.unparsed.insert(prefix, value);
                }
            }
        }
        Ok(ledger)
    }

    pub fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml::to_string(&self.document()?)?;
        Ok(format!("{HEADER}{body}"))
    }

    /// Every entry as it would be written, parsed and unparsed alike.
    pub fn document(&self) -> Result<BTreeMap<String, Value>> {
        let mut doc = self.unparsed.clone();
        for (prefix, entry) in &self.entries {
            doc.insert(prefix.clone(), serde_yaml::to_value(entry)?);
        }
        Ok(doc)
    }

    /// Highest number recorded for `prefix`, from the ledger or the legacy log.
    pub fn highest(&self, prefix: &Prefix) -> Option<u64> {
        let current = match self.entries.get(prefix.as_str()) {
            Some(e) => Some(e.highest),
            None => self.unparsed.get(prefix.as_str()).and_then(salvaged_highest),
        };
        let legacy = self.legacy.get(prefix.as_str()).copied();
        current.max(legacy)
    }

    pub fn entry(&self, prefix: &Prefix) -> Option<&LedgerEntry> {
        self.entries.get(prefix.as_str())
    }

    pub fn entries(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.entries
    }

    /// Entries kept verbatim because they did not parse.
    pub fn unparsed(&self) -> &BTreeMap<String, Value> {
        &self.unparsed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.unparsed.is_empty() && self.legacy.is_empty()
    }

    /// Prepare a ledger that records `number` for `prefix`.
    ///
    /// `highest` becomes `max(current, number)`; every other prefix is left
    /// exactly as read. Nothing is written.
    pub fn propose(&self, prefix: &Prefix, number: u64, meta: AllocationMeta) -> PendingLedger {
        let mut next = self.clone();
        let highest = self.highest(prefix).unwrap_or(0).max(number);
        next.unparsed.remove(prefix.as_str());
        next.entries.insert(
            prefix.to_string(),
            LedgerEntry {
                highest,
                last_allocated_at: meta.at,
                last_allocated_by: meta.by,
                last_title: meta.title,
            },
        );
        PendingLedger { ledger: next }
    }
}

/// A candidate ledger document awaiting staging.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    ledger: Ledger,
}

impl PendingLedger {
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Write the candidate into the working tree. Returns the ledger path.
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = paths::ledger_path(root);
        crate::io::atomic_write(&path, self.ledger.to_yaml()?.as_bytes())?;
        Ok(path)
    }
}

fn read_document(path: &Path) -> Ledger {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ledger::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ledger unreadable; treating as empty");
            return Ledger::default();
        }
    };
    Ledger::from_yaml(&data).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "ledger corrupt; treating as empty");
        Ledger::default()
    })
}

/// The `highest` of an entry that failed to parse, when it is still readable.
fn salvaged_highest(value: &Value) -> Option<u64> {
    match value.get("highest")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_legacy(path: &Path) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    let Ok(data) = std::fs::read_to_string(path) else {
        return out;
    };
    let rows: Vec<LegacyAllocation> = match serde_json::from_str(&data) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "legacy allocation log unreadable; ignoring");
            return out;
        }
    };
    for row in rows {
        let (Some(prefix), Some(number)) = (row.prefix, row.number) else {
            continue;
        };
        let Ok(prefix) = Prefix::parse(&prefix) else {
            continue;
        };
        let slot = out.entry(prefix.to_string()).or_insert(0);
        *slot = (*slot).max(number);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
