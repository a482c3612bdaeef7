use serde_json::json;

use crate::error::CoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Storage and cascade failures are logged here; the caller only sees the
/// taxonomy code and the entity involved.
pub fn core_err(id: &str, e: &CoreError) -> serde_json::Value {
    match e {
        CoreError::Storage { .. } | CoreError::CascadeFailure { .. } => {
            tracing::error!(request_id = id, error = %e, "operation failed");
        }
        _ => tracing::debug!(request_id = id, error = %e, "operation rejected"),
    }
    err(id, e.code(), e.to_string(), e.details())
}

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", "select a workspace first", None)
}
