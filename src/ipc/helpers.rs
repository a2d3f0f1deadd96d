use serde_json::json;
use tokio::runtime::Runtime;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Session};
use crate::model::{BatchKey, DateKey, StatusValue};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn parsed<T: std::str::FromStr<Err = crate::error::ValidationError>>(
    req: &Request,
    key: &str,
    raw: &str,
) -> Result<T, serde_json::Value> {
    raw.parse::<T>().map_err(|e| {
        err(
            &req.id,
            "bad_params",
            e.message,
            Some(json!({ key: raw })),
        )
    })
}

pub fn required_date(req: &Request, key: &str) -> Result<DateKey, serde_json::Value> {
    let raw = required_str(req, key)?;
    parsed(req, key, &raw)
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<DateKey>, serde_json::Value> {
    optional_str(req, key)
        .map(|raw| parsed(req, key, &raw))
        .transpose()
}

pub fn required_batch(req: &Request, key: &str) -> Result<BatchKey, serde_json::Value> {
    let raw = required_str(req, key)?;
    parsed(req, key, &raw)
}

pub fn optional_batch(req: &Request, key: &str) -> Result<Option<BatchKey>, serde_json::Value> {
    optional_str(req, key)
        .map(|raw| parsed(req, key, &raw))
        .transpose()
}

pub fn required_status(req: &Request, key: &str) -> Result<StatusValue, serde_json::Value> {
    let raw = required_str(req, key)?;
    parsed(req, key, &raw)
}

pub fn session_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Session, serde_json::Value> {
    state
        .session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Session plus the runtime that drives its sync calls.
pub fn session_rt<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a mut Session, &'a Runtime), serde_json::Value> {
    let AppState {
        session, runtime, ..
    } = state;
    let session = session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))?;
    Ok((session, runtime))
}
