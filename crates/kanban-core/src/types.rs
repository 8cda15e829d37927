use crate::error::{KanbanError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Prefix
// ---------------------------------------------------------------------------

/// Short uppercase token classifying a record type, e.g. `FEAT` or `EXP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix(String);

static PREFIX_RE: OnceLock<Regex> = OnceLock::new();

fn prefix_re() -> &'static Regex {
    PREFIX_RE.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]*$").unwrap())
}

impl Prefix {
    /// Parse caller input, upper-casing it first ("feat" is accepted as FEAT).
    pub fn parse(raw: &str) -> Result<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.len() > 16 || !prefix_re().is_match(&upper) {
            return Err(KanbanError::InvalidPrefix(raw.to_string()));
        }
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Prefix {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self> {
        Prefix::parse(s)
    }
}

impl TryFrom<String> for Prefix {
    type Error = KanbanError;

    fn try_from(value: String) -> Result<Self> {
        Prefix::parse(&value)
    }
}

impl From<Prefix> for String {
    fn from(value: Prefix) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// `PREFIX-NUMBER`, rendered without zero padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub prefix: Prefix,
    pub number: u64,
}

static IDENT_RE: OnceLock<Regex> = OnceLock::new();

fn ident_re() -> &'static Regex {
    IDENT_RE.get_or_init(|| Regex::new(r"^([A-Z][A-Z0-9]*)-(\d+)$").unwrap())
}

impl Identifier {
    pub fn new(prefix: Prefix, number: u64) -> Self {
        Self { prefix, number }
    }

    /// Parse a canonical or zero-padded identifier (`EXP-7`, `EXP-007`).
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || KanbanError::InvalidIdentifier(raw.to_string());
        let caps = ident_re().captures(raw.trim()).ok_or_else(invalid)?;
        let number: u64 = caps[2].parse().map_err(|_| invalid())?;
        if number == 0 {
            return Err(invalid());
        }
        Ok(Self {
            prefix: Prefix::parse(&caps[1])?,
            number,
        })
    }

    /// Extract the identifier a filename stem starts with: `FEAT-11-dark-mode` -> FEAT-11.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (prefix, rest) = stem.split_once('-')?;
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let tail = &rest[digits_end..];
        if !(tail.is_empty() || tail.starts_with('-')) {
            return None;
        }
        Identifier::parse(&format!("{prefix}-{}", &rest[..digits_end])).ok()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.number)
    }
}

impl std::str::FromStr for Identifier {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self> {
        Identifier::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
