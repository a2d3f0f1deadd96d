use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::BatchKey;
use crate::persist::SqlitePersistence;
use crate::sheet::SheetBackend;
use crate::store::{AttendanceStore, Filters};
use crate::sync::SyncCoordinator;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "batches": BatchKey::ALL
                .iter()
                .map(|b| json!({ "key": b, "label": b.label() }))
                .collect::<Vec<_>>(),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sheetPath": state.session.as_ref().map(|s| s.sheet_path.to_string_lossy().to_string()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let sheet_path = req
        .params
        .get("sheetPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| path.join(db::SHEET_DB_FILE));

    let conn = match db::open_local_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let sheet = match SheetBackend::open(&sheet_path) {
        Ok(sheet) => Arc::new(sheet),
        Err(e) => {
            return err(
                &req.id,
                "db_open_failed",
                format!("{e:?}"),
                Some(json!({ "sheetPath": sheet_path.to_string_lossy() })),
            )
        }
    };

    let mut store = AttendanceStore::open(Box::new(SqlitePersistence::new(conn)), Filters::today());
    let restore_failed = store.restore_failed();
    let events = store.bus().subscribe();
    let sync = SyncCoordinator::new(sheet.clone(), sheet.clone())
        .with_timeouts(state.config.pull_timeout, state.config.push_timeout);

    // Best-effort: a workspace still opens with an unreachable sheet.
    let roster_count = state
        .runtime
        .block_on(sync.refresh_roster(&mut store))
        .ok();

    tracing::info!(workspace = %path.display(), sheet = %sheet_path.display(), "workspace opened");
    state.workspace = Some(path.clone());
    state.session = Some(Session {
        store,
        sync,
        sheet,
        sheet_path: sheet_path.clone(),
        events,
    });
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "sheetPath": sheet_path.to_string_lossy(),
            "rosterCount": roster_count,
            "restoreFailed": restore_failed,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
