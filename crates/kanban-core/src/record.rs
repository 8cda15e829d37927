//! Record files: markdown documents with a YAML frontmatter block.

use crate::error::Result;
use crate::types::Identifier;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Frontmatter fields of a record file. Unknown keys are ignored on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Return the text between the opening `---` line and the closing `\n---`.
pub fn extract_frontmatter(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let rest = if let Some(r) = rest.strip_prefix('\n') {
        r
    } else if let Some(r) = rest.strip_prefix("\r\n") {
        r
    } else {
        return None;
    };
    if rest.starts_with("---") {
        return Some("");
    }
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

/// Parse the frontmatter block. `Ok(None)` when the file has none.
pub fn parse_frontmatter(content: &str) -> Result<Option<Frontmatter>> {
    let Some(block) = extract_frontmatter(content) else {
        return Ok(None);
    };
    if block.trim().is_empty() {
        return Ok(Some(Frontmatter::default()));
    }
    Ok(Some(serde_yaml::from_str(block)?))
}

/// Raw `id` field of the frontmatter, read without requiring the other
/// fields to be well formed. `Ok(None)` when there is no block or no id.
pub fn frontmatter_id(content: &str) -> Result<Option<String>> {
    let Some(block) = extract_frontmatter(content) else {
        return Ok(None);
    };
    let value: serde_yaml::Value = serde_yaml::from_str(block)?;
    Ok(value.get("id").and_then(|v| v.as_str()).map(str::to_string))
}

/// The identifier named in the frontmatter `id` field, if it parses.
pub fn field_identifier(content: &str) -> Result<Option<Identifier>> {
    Ok(frontmatter_id(content)?.and_then(|raw| Identifier::parse(&raw).ok()))
}

// ---------------------------------------------------------------------------
// New records
// ---------------------------------------------------------------------------

/// Everything needed to write a new record once its number is known.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub item_type: String,
    pub title: String,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created: NaiveDate,
}

impl RecordDraft {
    pub fn new(item_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            title: title.into(),
            priority: None,
            assignee: None,
            description: None,
            tags: Vec::new(),
            created: chrono::Local::now().date_naive(),
        }
    }

    /// File name for this record once allocated: `FEAT-12-Dark-Mode.md`.
    pub fn file_name(&self, id: &Identifier) -> String {
        let slug = crate::paths::slugify(&self.title);
        if slug.is_empty() {
            format!("{id}.{}", crate::paths::RECORD_EXTENSION)
        } else {
            format!("{id}-{slug}.{}", crate::paths::RECORD_EXTENSION)
        }
    }

    pub fn render(&self, id: &Identifier) -> Result<String> {
        let fm = Frontmatter {
            id: Some(id.to_string()),
            title: Some(self.title.clone()),
            item_type: Some(self.item_type.clone()),
            status: Some("backlog".to_string()),
            priority: self.priority.clone(),
            assignee: self.assignee.clone(),
            created: Some(self.created),
            tags: self.tags.clone(),
            depends_on: Vec::new(),
        };
        let yaml = serde_yaml::to_string(&fm)?;
        let mut out = format!("---\n{yaml}---\n\n# {}\n", self.title);
        if let Some(desc) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push('\n');
            out.push_str(desc.trim_end());
            out.push('\n');
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_id() {
        let content = "---\nid: EXP-005\ntitle: Existing\nstatus: backlog\n---\n# Existing\n";
        let fm = parse_frontmatter(content).unwrap().unwrap();
        assert_eq!(fm.id.as_deref(), Some("EXP-005"));
        assert_eq!(field_identifier(content).unwrap().unwrap().number, 5);
    }

    #[test]
    fn no_frontmatter_is_none() {
        assert!(parse_frontmatter("# Just a heading\n").unwrap().is_none());
        assert!(parse_frontmatter("---not a fence\n").unwrap().is_none());
    }

    #[test]
    fn malformed_frontmatter_is_an_error() {
        assert!(parse_frontmatter("---\nid: [FEAT-1\n---\n").is_err());
    }

    #[test]
    fn unparseable_id_is_ignored() {
        assert!(field_identifier("---\nid: not-an-id\n---\n").unwrap().is_none());
        assert!(field_identifier("---\nid: 42\n---\n").unwrap().is_none());
    }

    #[test]
    fn id_survives_odd_sibling_fields() {
        let content = "---\nid: FEAT-10\ncreated: sometime last week\ntags: oops\n---\n";
        assert!(parse_frontmatter(content).is_err());
        assert_eq!(field_identifier(content).unwrap().unwrap().to_string(), "FEAT-10");
    }

    #[test]
    fn render_roundtrips_through_parser() {
        let id = Identifier::parse("FEAT-12").unwrap();
        let mut draft = RecordDraft::new("feature", "Dark Mode: phase 1");
        draft.priority = Some("high".to_string());
        draft.description = Some("Ship it.".to_string());
        let text = draft.render(&id).unwrap();

        let fm = parse_frontmatter(&text).unwrap().unwrap();
        assert_eq!(fm.id.as_deref(), Some("FEAT-12"));
        assert_eq!(fm.title.as_deref(), Some("Dark Mode: phase 1"));
        assert_eq!(fm.status.as_deref(), Some("backlog"));
        assert!(text.contains("# Dark Mode: phase 1"));
        assert!(text.ends_with("Ship it.\n"));
    }

    #[test]
    fn file_name_includes_slug() {
        let id = Identifier::parse("EXP-3").unwrap();
        assert_eq!(
            RecordDraft::new("expedition", "Fix The Bug").file_name(&id),
            "EXP-3-Fix-The-Bug.md"
        );
        assert_eq!(RecordDraft::new("expedition", "").file_name(&id), "EXP-3.md");
    }
}
