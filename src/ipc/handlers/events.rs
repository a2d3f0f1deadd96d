use crate::events::drain;
use crate::ipc::error::ok;
use crate::ipc::helpers::session_mut;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_events_drain(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    ok(&req.id, json!({ "events": drain(&mut session.events) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.drain" => Some(handle_events_drain(state, req)),
        _ => None,
    }
}
