use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, LockedError, TransportError, ValidationError};
use crate::model::{
    BatchKey, DateKey, LockKey, RemoteStatus, Student, SubmitRecord, SubmitResponse,
};
use crate::store::AttendanceStore;

/// Remote rows for one date, grouped by batch.
pub type BatchRecords = BTreeMap<BatchKey, Vec<RemoteStatus>>;

#[async_trait]
pub trait RosterService: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<Student>, TransportError>;
}

#[async_trait]
pub trait AttendanceSyncService: Send + Sync {
    async fn fetch_attendance(&self, date: DateKey) -> Result<Option<BatchRecords>, TransportError>;

    /// The remote side skips `(date, batch, studentId)` keys it already has,
    /// so `saved_count` may be lower than the number of records.
    async fn submit_attendance(
        &self,
        date: DateKey,
        batch: BatchKey,
        records: &[SubmitRecord],
    ) -> Result<SubmitResponse, TransportError>;

    async fn attach_proof(
        &self,
        date: DateKey,
        batch: BatchKey,
        photo: &Path,
    ) -> Result<Option<String>, TransportError>;
}

pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);
pub const SAVE_INTERRUPTED: &str = "save was interrupted before the sheet answered";

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub applied: Vec<BatchKey>,
    /// Remote rows without a student id.
    pub dropped: usize,
}

impl PullSummary {
    pub fn applied_any(&self) -> bool {
        !self.applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub ok: bool,
    pub saved_count: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-batch save progress.
///
/// `Submitting` is only held while `save` runs, and `save` takes `&mut self`,
/// so [`SyncCoordinator::save_state`] never reports it: a leftover
/// `Submitting` means the save future was dropped mid-flight and reads as
/// `Retryable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SaveState {
    #[default]
    Idle,
    Submitting,
    Locked,
    Retryable { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub state: SaveState,
    pub push: PushResult,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRefresh {
    /// Roster size after the refresh, `None` when the fetch failed.
    pub roster_count: Option<usize>,
    pub pull: PullSummary,
}

/// Moves attendance between the store and the remote ledger.
pub struct SyncCoordinator {
    roster_service: Arc<dyn RosterService>,
    sync_service: Arc<dyn AttendanceSyncService>,
    pull_timeout: Duration,
    push_timeout: Duration,
    save_states: HashMap<LockKey, SaveState>,
}

impl SyncCoordinator {
    pub fn new(
        roster_service: Arc<dyn RosterService>,
        sync_service: Arc<dyn AttendanceSyncService>,
    ) -> Self {
        Self {
            roster_service,
            sync_service,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            save_states: HashMap::new(),
        }
    }

    pub fn with_timeouts(mut self, pull: Duration, push: Duration) -> Self {
        self.pull_timeout = pull;
        self.push_timeout = push;
        self
    }

    async fn fetch_roster(&self) -> Result<Vec<Student>, TransportError> {
        bounded(
            "roster fetch",
            self.pull_timeout,
            self.roster_service.fetch_roster(),
        )
        .await
    }

    /// Remote rows for `date`; any failure reads as "no remote data".
    async fn fetch_remote(&self, date: DateKey) -> Option<BatchRecords> {
        match bounded(
            "attendance pull",
            self.pull_timeout,
            self.sync_service.fetch_attendance(date),
        )
        .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(%date, error = %e, "attendance pull failed");
                None
            }
        }
    }

    /// Replaces the store's roster on success and keeps it on failure.
    pub async fn refresh_roster(&self, store: &mut AttendanceStore) -> Result<usize, TransportError> {
        let students = self.fetch_roster().await.inspect_err(|e| {
            tracing::warn!(error = %e, "roster fetch failed, keeping previous roster")
        })?;
        Ok(store.load_roster(students).count)
    }

    pub async fn pull(&self, store: &mut AttendanceStore, date: DateKey) -> bool {
        self.pull_summary(store, date).await.applied_any()
    }

    pub async fn pull_summary(&self, store: &mut AttendanceStore, date: DateKey) -> PullSummary {
        let records = self.fetch_remote(date).await;
        apply_pull(store, date, records)
    }

    /// Fetches the roster and the day's attendance together, then applies
    /// the roster first so pulled groups start from the fresh membership.
    pub async fn refresh_day(&self, store: &mut AttendanceStore, date: DateKey) -> DayRefresh {
        let (roster, records) = tokio::join!(self.fetch_roster(), self.fetch_remote(date));
        let roster_count = match roster {
            Ok(students) => Some(store.load_roster(students).count),
            Err(e) => {
                tracing::warn!(error = %e, "roster fetch failed, keeping previous roster");
                None
            }
        };
        let pull = apply_pull(store, date, records);
        DayRefresh { roster_count, pull }
    }

    pub async fn push(
        &self,
        date: DateKey,
        batch: BatchKey,
        records: &[SubmitRecord],
    ) -> PushResult {
        let total = records.len();
        let result = bounded(
            "attendance push",
            self.push_timeout,
            self.sync_service.submit_attendance(date, batch, records),
        )
        .await;
        match result {
            Ok(resp) if resp.success => {
                if resp.saved_count < total {
                    tracing::info!(
                        %date, %batch, saved = resp.saved_count, total,
                        "remote skipped rows it already had"
                    );
                }
                PushResult {
                    ok: true,
                    saved_count: resp.saved_count,
                    total,
                    error: resp.error,
                }
            }
            Ok(resp) => PushResult {
                ok: false,
                saved_count: resp.saved_count,
                total,
                error: Some(resp.error.unwrap_or_else(|| "remote rejected submission".into())),
            },
            Err(e) => PushResult {
                ok: false,
                saved_count: 0,
                total,
                error: Some(e.to_string()),
            },
        }
    }

    /// Submits one batch. Success locks it (with the photo proof when the
    /// upload works); failure or timeout leaves it open for a retry.
    pub async fn save(
        &mut self,
        store: &mut AttendanceStore,
        date: DateKey,
        batch: BatchKey,
        photo: Option<&Path>,
    ) -> Result<SaveOutcome, CoreError> {
        let key = LockKey::new(date, batch);
        if store.is_locked(date, batch) {
            return Err(LockedError { key }.into());
        }
        if store.roster().is_empty() {
            return Err(ValidationError::new("roster is empty, nothing to submit").into());
        }
        let records = build_records(store, date, batch);
        if records.is_empty() {
            return Err(ValidationError::new(format!("no students to submit for {key}")).into());
        }

        self.save_states.insert(key, SaveState::Submitting);
        store.ensure_initialized(date, batch);
        store.persist();

        let push = self.push(date, batch, &records).await;
        if !push.ok {
            let error = push.error.clone().unwrap_or_default();
            tracing::warn!(%date, %batch, %error, "save failed, batch left open");
            let state = SaveState::Retryable { error };
            self.save_states.insert(key, state.clone());
            return Ok(SaveOutcome {
                state,
                push,
                photo_url: None,
            });
        }

        let photo_url = match photo {
            Some(path) => self.attach_proof(date, batch, path).await,
            None => None,
        };
        store.lock(date, batch, photo_url.clone());
        self.save_states.insert(key, SaveState::Locked);
        tracing::info!(%date, %batch, saved = push.saved_count, total = push.total, "batch saved");
        Ok(SaveOutcome {
            state: SaveState::Locked,
            push,
            photo_url,
        })
    }

    async fn attach_proof(&self, date: DateKey, batch: BatchKey, photo: &Path) -> Option<String> {
        match bounded(
            "proof upload",
            self.push_timeout,
            self.sync_service.attach_proof(date, batch, photo),
        )
        .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(%date, %batch, error = %e, "proof upload failed");
                None
            }
        }
    }

    pub fn save_state(&self, store: &AttendanceStore, date: DateKey, batch: BatchKey) -> SaveState {
        if store.is_locked(date, batch) {
            return SaveState::Locked;
        }
        match self.save_states.get(&LockKey::new(date, batch)) {
            Some(SaveState::Submitting) => SaveState::Retryable {
                error: SAVE_INTERRUPTED.into(),
            },
            Some(state) => state.clone(),
            None => SaveState::Idle,
        }
    }

    pub fn forget_date(&mut self, date: DateKey) {
        self.save_states.retain(|key, _| key.date != date);
    }
}

/// Writes pulled rows into `date`'s slot. The slot comes from the request,
/// not the current filters, so a late response can't land on another day.
fn apply_pull(
    store: &mut AttendanceStore,
    date: DateKey,
    records: Option<BatchRecords>,
) -> PullSummary {
    let mut summary = PullSummary::default();
    let Some(records) = records else {
        return summary;
    };
    for (batch, rows) in records {
        let total = rows.len();
        let statuses: Vec<_> = rows
            .into_iter()
            .filter_map(|r| {
                let id = r.student_id.trim();
                (!id.is_empty()).then(|| (id.to_string(), r.status))
            })
            .collect();
        let dropped = total - statuses.len();
        if dropped > 0 {
            tracing::warn!(%date, %batch, dropped, "dropped remote rows without a student id");
            summary.dropped += dropped;
        }
        if statuses.is_empty() {
            continue;
        }
        store.apply_remote(date, batch, statuses);
        summary.applied.push(batch);
    }
    if summary.applied_any() {
        tracing::info!(%date, batches = summary.applied.len(), "applied remote attendance");
    }
    summary
}

/// One row per visible student of the batch, stamped with the local time.
pub fn build_records(store: &AttendanceStore, date: DateKey, batch: BatchKey) -> Vec<SubmitRecord> {
    let time = Local::now().format("%H:%M:%S").to_string();
    store
        .batch_view(date, batch)
        .visible
        .into_iter()
        .map(|s| SubmitRecord {
            status: store.get_status(date, batch, &s.id),
            student_id: s.id,
            student_name: s.name,
            app_number: s.app_number,
            time: time.clone(),
        })
        .collect()
}
