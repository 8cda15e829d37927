use kanban_core::KanbanError;
use serde::Serialize;
use std::fmt;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  "));

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// Structured failure printed on stdout under `--json`.
#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

pub fn error_payload(err: &anyhow::Error, core: Option<&KanbanError>) -> ErrorPayload {
    let (prefix, attempts) = match core {
        Some(KanbanError::RetryExhausted { prefix, attempts }) => (Some(prefix.clone()), Some(*attempts)),
        Some(
            KanbanError::Inconclusive { prefix, .. }
            | KanbanError::ReconcileConflict { prefix, .. }
            | KanbanError::NumberSpaceExhausted { prefix },
        ) => {
            (Some(prefix.clone()), None)
        }
        _ => (None, None),
    };
    ErrorPayload {
        success: false,
        error: core.map_or("error", KanbanError::kind),
        message: core.map_or_else(|| format!("{err:#}"), ToString::to_string),
        prefix,
        attempts,
    }
}

/// A failure whose details were already printed; only the exit status is left.
#[derive(Debug)]
pub struct AlreadyReported;

impl fmt::Display for AlreadyReported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("already reported")
    }
}

impl std::error::Error for AlreadyReported {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_payload_carries_prefix_and_attempts() {
        let core = KanbanError::RetryExhausted {
            prefix: "FEAT".into(),
            attempts: 3,
        };
        let err = anyhow::Error::new(KanbanError::RetryExhausted {
            prefix: "FEAT".into(),
            attempts: 3,
        });
        let payload = error_payload(&err, Some(&core));
        assert!(!payload.success);
        assert_eq!(payload.error, "retry_exhausted");
        assert_eq!(payload.prefix.as_deref(), Some("FEAT"));
        assert_eq!(payload.attempts, Some(3));
    }

    #[test]
    fn foreign_error_payload_is_generic() {
        let err = anyhow::anyhow!("disk on fire");
        let payload = error_payload(&err, None);
        assert_eq!(payload.error, "error");
        assert_eq!(payload.message, "disk on fire");
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("prefix").is_none());
    }
}
