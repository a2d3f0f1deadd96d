use crate::error::CoreError;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::{
    optional_batch, optional_date, optional_str, required_batch, required_date, required_status,
    required_str, session_mut, session_rt,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::{BatchKey, DateKey};
use serde_json::json;
use std::path::PathBuf;

/// The current filtered view plus the lock/save state of its batch.
fn view_json(session: &mut Session) -> serde_json::Value {
    let filters = session.store.filters().clone();
    let view = session.store.views().clone();
    let counts = view.counts();
    let statuses: serde_json::Map<String, serde_json::Value> = view
        .visible
        .iter()
        .map(|s| {
            let status = session.store.get_status(filters.date, filters.batch, &s.id);
            (s.id.clone(), json!(status))
        })
        .collect();
    json!({
        "date": filters.date,
        "batch": filters.batch,
        "batchLabel": filters.batch.label(),
        "query": filters.query,
        "locked": session.store.is_locked(filters.date, filters.batch),
        "photoUrl": session.store.ledger().photo_url(filters.date, filters.batch),
        "saveState": session.sync.save_state(&session.store, filters.date, filters.batch),
        "students": view.visible,
        "statuses": statuses,
        "counts": counts,
    })
}

/// Explicit `date`/`batch` params win over the session filters.
fn target(req: &Request, session: &Session) -> Result<(DateKey, BatchKey), serde_json::Value> {
    let filters = session.store.filters();
    let date = optional_date(req, "date")?.unwrap_or(filters.date);
    let batch = optional_batch(req, "batch")?.unwrap_or(filters.batch);
    Ok((date, batch))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch = match required_batch(req, "batch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (session, runtime) = match session_rt(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    session.store.set_date(date);
    session.store.set_batch(batch);
    let refresh = runtime.block_on(session.sync.refresh_day(&mut session.store, date));
    session.store.ensure_initialized(date, batch);

    let mut result = view_json(session);
    result["refresh"] = json!(refresh);
    ok(&req.id, result)
}

/// Re-reads the remote rows for a date without touching the roster.
fn handle_pull(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (session, runtime) = match session_rt(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let applied = runtime.block_on(session.sync.pull(&mut session.store, date));
    ok(&req.id, json!({ "date": date, "applied": applied }))
}

fn handle_view(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if let Some(query) = optional_str(req, "query") {
        session.store.set_query(query);
    }
    ok(&req.id, view_json(session))
}

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match required_status(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let (date, batch) = match target(req, session) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.store.set_status(date, batch, &student_id, status) {
        Ok(change) => ok(
            &req.id,
            json!({
                "name": session.store.roster().get(&change.student_id).map(|s| s.name.as_str()),
                "studentId": change.student_id,
                "oldStatus": change.old_status,
                "newStatus": change.new_status,
            }),
        ),
        Err(e) => core_err(&req.id, &CoreError::from(e)),
    }
}

fn handle_bulk_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = match required_status(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_ids: Vec<String> = match req.params.get("studentIds").and_then(|v| v.as_array()) {
        Some(arr) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        None => return err(&req.id, "bad_params", "missing studentIds", None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let (date, batch) = match target(req, session) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.store.bulk_set_status(date, batch, &student_ids, status) {
        Ok(changes) => ok(&req.id, json!({ "changed": changes.len() })),
        Err(e) => core_err(&req.id, &CoreError::from(e)),
    }
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch = match required_batch(req, "batch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let photo = optional_str(req, "photoPath").map(PathBuf::from);
    let (session, runtime) = match session_rt(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Session { store, sync, .. } = session;
    match runtime.block_on(sync.save(store, date, batch, photo.as_deref())) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_save_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let (date, batch) = match target(req, session) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!(session.sync.save_state(&session.store, date, batch)),
    )
}

fn handle_is_locked(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let (date, batch) = match target(req, session) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({
            "locked": session.store.is_locked(date, batch),
            "photoUrl": session.store.ledger().photo_url(date, batch),
        }),
    )
}

fn handle_clear_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    session.store.clear(date);
    session.sync.forget_date(date);
    ok(&req.id, json!({ "cleared": date }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.open" => Some(handle_open(state, req)),
        "attendance.pull" => Some(handle_pull(state, req)),
        "attendance.view" => Some(handle_view(state, req)),
        "attendance.setStatus" => Some(handle_set_status(state, req)),
        "attendance.bulkSetStatus" => Some(handle_bulk_set_status(state, req)),
        "attendance.save" => Some(handle_save(state, req)),
        "attendance.saveState" => Some(handle_save_state(state, req)),
        "attendance.isLocked" => Some(handle_is_locked(state, req)),
        "attendance.clearDate" => Some(handle_clear_date(state, req)),
        _ => None,
    }
}
