use thiserror::Error;

#[derive(Debug, Error)]
pub enum KanbanError {
    #[error("invalid prefix '{0}': must be an uppercase token like FEAT or EXP")]
    InvalidPrefix(String),

    #[error("invalid identifier '{0}': expected PREFIX-NUMBER")]
    InvalidIdentifier(String),

    #[error("unknown item type '{0}' for the configured theme")]
    UnknownItemType(String),

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },

    #[error("no {prefix} ids left: the highest number in use is already the largest representable")]
    NumberSpaceExhausted { prefix: String },

    #[error("record file already exists: {0}")]
    RecordExists(String),

    #[error("failed to allocate {prefix} id after {attempts} publish attempts; retry later")]
    RetryExhausted { prefix: String, attempts: u32 },

    #[error(
        "publish of {candidate} is inconclusive ({detail}); pull and inspect the remote before allocating another {prefix} id"
    )]
    Inconclusive {
        prefix: String,
        candidate: String,
        detail: String,
    },

    #[error("could not reconcile {prefix} allocation with the remote: {detail}")]
    ReconcileConflict { prefix: String, detail: String },

    #[error("coordination substrate error: {0}")]
    Substrate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KanbanError {
    /// Stable machine-readable code for structured error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            KanbanError::InvalidPrefix(_) => "invalid_prefix",
            KanbanError::InvalidIdentifier(_) => "invalid_identifier",
            KanbanError::UnknownItemType(_) => "unknown_item_type",
            KanbanError::InvalidIgnorePattern { .. } => "invalid_ignore_pattern",
            KanbanError::NumberSpaceExhausted { .. } => "number_exhausted",
            KanbanError::RecordExists(_) => "record_exists",
            KanbanError::RetryExhausted { .. } => "retry_exhausted",
            KanbanError::Inconclusive { .. } => "inconclusive",
            KanbanError::ReconcileConflict { .. } => "reconcile_conflict",
            KanbanError::Substrate(_) => "substrate",
            KanbanError::Io(_) => "io",
            KanbanError::Yaml(_) => "yaml",
            KanbanError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, KanbanError>;
