use chrono::{DateTime, Utc};

use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Every extractor hands back a ready-made `bad_params` response on failure.
pub type ParamResult<T> = Result<T, serde_json::Value>;

pub fn required_str<'a>(req: &'a Request, key: &str) -> ParamResult<&'a str> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) => Ok(v),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

/// Absent and `null` both read as `None`; any other non-string is rejected.
pub fn optional_str<'a>(req: &'a Request, key: &str) -> ParamResult<Option<&'a str>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be string", key), None)),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> ParamResult<bool> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be boolean", key), None)),
    }
}

fn parse_time(req: &Request, key: &str, raw: &str) -> ParamResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an RFC 3339 timestamp: {}", key, e),
                None,
            )
        })
}

pub fn required_time(req: &Request, key: &str) -> ParamResult<DateTime<Utc>> {
    let raw = required_str(req, key)?;
    parse_time(req, key, raw)
}

/// Reads an explicit clock from the request, defaulting to the wall clock.
pub fn now_param(req: &Request) -> ParamResult<DateTime<Utc>> {
    match optional_str(req, "now")? {
        Some(raw) => parse_time(req, "now", raw),
        None => Ok(Utc::now()),
    }
}

pub type Handler = fn(&rusqlite::Connection, &Request) -> ParamResult<serde_json::Value>;

/// Runs a handler against the open workspace; param failures are already
/// responses, so both arms collapse into one value.
pub fn with_conn(
    state: &crate::ipc::types::AppState,
    req: &Request,
    handler: Handler,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return crate::ipc::error::no_workspace(&req.id);
    };
    handler(conn, req).unwrap_or_else(|resp| resp)
}

/// Wraps a domain result as `{ key: value }` or the mapped domain error.
pub fn respond<T: serde::Serialize>(
    req: &Request,
    key: &str,
    res: crate::error::CoreResult<T>,
) -> serde_json::Value {
    match res {
        Ok(v) => {
            let mut out = serde_json::Map::new();
            out.insert(
                key.to_string(),
                serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
            );
            crate::ipc::error::ok(&req.id, serde_json::Value::Object(out))
        }
        Err(e) => crate::ipc::error::core_err(&req.id, &e),
    }
}
