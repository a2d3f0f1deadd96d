use crate::ipc::error::ok;
use crate::ipc::helpers::{required_date, session_mut};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_reports_merge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let report = session.store.report(date);
    ok(&req.id, json!(report))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.merge" => Some(handle_reports_merge(state, req)),
        _ => None,
    }
}
