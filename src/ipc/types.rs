use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::events::LedgerEvent;
use crate::sheet::SheetBackend;
use crate::store::AttendanceStore;
use crate::sync::SyncCoordinator;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything bound to an open workspace.
pub struct Session {
    pub store: AttendanceStore,
    pub sync: SyncCoordinator,
    pub sheet: Arc<SheetBackend>,
    pub sheet_path: PathBuf,
    pub events: broadcast::Receiver<LedgerEvent>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub session: Option<Session>,
    pub config: AppConfig,
    pub runtime: Runtime,
}
