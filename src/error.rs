use rusqlite::ffi;
use serde_json::json;
use thiserror::Error;

/// Failure kinds surfaced by every domain operation.
///
/// Raw storage errors never leave a domain operation; they are folded into one
/// of these variants with the entity and key the caller needs to act on.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists ({constraint}): {key}")]
    Conflict {
        entity: &'static str,
        constraint: &'static str,
        key: String,
    },

    #[error("scoring failed: {0}")]
    ScoringFailure(String),

    #[error("deleting {entity} {key} failed at {table}: {message}")]
    CascadeFailure {
        entity: &'static str,
        key: String,
        table: &'static str,
        message: String,
    },

    #[error("storage failure during {context}: {message}")]
    Storage {
        context: &'static str,
        message: String,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn conflict(entity: &'static str, constraint: &'static str, key: impl Into<String>) -> Self {
        CoreError::Conflict {
            entity,
            constraint,
            key: key.into(),
        }
    }

    /// Wire code used by the request layer.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "validation_failed",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Conflict { .. } => "conflict",
            CoreError::ScoringFailure(_) => "scoring_failed",
            CoreError::CascadeFailure { .. } => "cascade_failed",
            CoreError::Storage { .. } => "db_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::Validation { field, .. } => Some(json!({ "field": field })),
            CoreError::NotFound { entity, key } => Some(json!({ "entity": entity, "key": key })),
            CoreError::Conflict {
                entity,
                constraint,
                key,
            } => Some(json!({ "entity": entity, "constraint": constraint, "key": key })),
            CoreError::ScoringFailure(_) => Some(json!({ "retryable": true })),
            CoreError::CascadeFailure {
                entity, key, table, ..
            } => Some(json!({ "entity": entity, "key": key, "table": table })),
            CoreError::Storage { context, .. } => Some(json!({ "context": context })),
        }
    }
}

/// Maps an engine error that has no domain meaning at the call site.
pub fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> CoreError {
    move |e| CoreError::Storage {
        context,
        message: e.to_string(),
    }
}

fn extended_code(e: &rusqlite::Error) -> Option<i32> {
    match e {
        rusqlite::Error::SqliteFailure(inner, _) => Some(inner.extended_code),
        _ => None,
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        extended_code(e),
        Some(ffi::SQLITE_CONSTRAINT_UNIQUE) | Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

pub fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    extended_code(e) == Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

/// Which unique constraint fired, as reported by SQLite ("UNIQUE constraint
/// failed: users.email").
pub fn violated_columns(e: &rusqlite::Error) -> Option<&str> {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.split("failed: ").nth(1),
        _ => None,
    }
}
