use crate::error::CoreError;
use crate::ipc::error::{core_err, ok};
use crate::ipc::helpers::{session_mut, session_rt};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_roster_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (session, runtime) = match session_rt(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match runtime.block_on(session.sync.refresh_roster(&mut session.store)) {
        Ok(count) => ok(&req.id, json!({ "rosterCount": count })),
        Err(e) => {
            let mut resp = core_err(&req.id, &CoreError::from(e));
            // The previous roster stays in place; tell the UI how big it is.
            resp["error"]["details"] = json!({ "rosterCount": session.store.roster().len() });
            resp
        }
    }
}

fn handle_roster_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({ "students": session.store.roster().all() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.refresh" => Some(handle_roster_refresh(state, req)),
        "roster.list" => Some(handle_roster_list(state, req)),
        _ => None,
    }
}
