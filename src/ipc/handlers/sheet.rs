use crate::error::CoreError;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::session_mut;
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use serde_json::json;

fn handle_sheet_set_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(raw) = req.params.get("students") else {
        return err(&req.id, "bad_params", "missing students", None);
    };
    let students: Vec<Student> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid students: {e}"), None),
    };
    match session.sheet.replace_roster(&students) {
        Ok(count) => ok(&req.id, json!({ "count": count })),
        Err(e) => core_err(&req.id, &CoreError::from(e)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sheet.setRoster" => Some(handle_sheet_set_roster(state, req)),
        _ => None,
    }
}
