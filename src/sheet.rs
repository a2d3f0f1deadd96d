use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db;
use crate::error::TransportError;
use crate::model::{
    BatchKey, DateKey, RemoteStatus, StatusValue, Student, SubmitRecord, SubmitResponse,
};
use crate::sync::{AttendanceSyncService, BatchRecords, RosterService};

const PROOFS_DIR: &str = "proofs";

fn remote_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Remote(e.to_string())
}

/// The attendance spreadsheet, kept as a SQLite file that several
/// workspaces can point at.
pub struct SheetBackend {
    conn: Mutex<Connection>,
    proofs_dir: PathBuf,
}

impl SheetBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = db::open_sheet_db(path)?;
        let proofs_dir = path
            .parent()
            .map(|p| p.join(PROOFS_DIR))
            .unwrap_or_else(|| PathBuf::from(PROOFS_DIR));
        Ok(Self {
            conn: Mutex::new(conn),
            proofs_dir,
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, TransportError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| TransportError::Remote("sheet connection poisoned".into()))?;
        f(&mut conn).map_err(remote_err)
    }

    /// Replaces every roster row, keeping the given order.
    pub fn replace_roster(&self, students: &[Student]) -> Result<usize, TransportError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM roster", [])?;
            for (idx, s) in students.iter().enumerate() {
                tx.execute(
                    "INSERT INTO roster(student_id, name, app_number, active, sort_order)
                     VALUES(?, ?, ?, ?, ?)
                     ON CONFLICT(student_id) DO NOTHING",
                    (&s.id, &s.name, &s.app_number, s.active as i64, idx as i64),
                )?;
            }
            tx.commit()?;
            Ok(students.len())
        })
    }
}

fn parse_row_status(raw: &str) -> StatusValue {
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(status = raw, "unknown status in sheet, reading as leave");
        StatusValue::Leave
    })
}

#[async_trait]
impl RosterService for SheetBackend {
    async fn fetch_roster(&self) -> Result<Vec<Student>, TransportError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT student_id, name, app_number, active
                 FROM roster
                 ORDER BY sort_order",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(Student {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        app_number: r.get(2)?,
                        active: r.get::<_, i64>(3)? != 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl AttendanceSyncService for SheetBackend {
    async fn fetch_attendance(&self, date: DateKey) -> Result<Option<BatchRecords>, TransportError> {
        let rows: Vec<(String, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT batch_key, student_id, status
                 FROM attendance_rows
                 WHERE date_key = ?
                 ORDER BY batch_key, rowid",
            )?;
            let rows = stmt
                .query_map([date.to_string()], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut out = BatchRecords::new();
        for (batch, student_id, status) in rows {
            let Ok(batch) = batch.parse::<BatchKey>() else {
                tracing::warn!(%date, batch = %batch, "skipping sheet row with unknown batch");
                continue;
            };
            out.entry(batch).or_default().push(RemoteStatus {
                student_id,
                status: parse_row_status(&status),
            });
        }
        Ok(Some(out))
    }

    async fn submit_attendance(
        &self,
        date: DateKey,
        batch: BatchKey,
        records: &[SubmitRecord],
    ) -> Result<SubmitResponse, TransportError> {
        let saved_count = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut saved = 0;
            for r in records {
                saved += tx.execute(
                    "INSERT INTO attendance_rows(
                        id, date_key, batch_key, student_id, student_name, app_number, status, time
                     )
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(date_key, batch_key, student_id) DO NOTHING",
                    (
                        uuid::Uuid::new_v4().to_string(),
                        date.to_string(),
                        batch.as_str(),
                        &r.student_id,
                        &r.student_name,
                        &r.app_number,
                        r.status.as_str(),
                        &r.time,
                    ),
                )?;
            }
            tx.commit()?;
            Ok(saved)
        })?;
        Ok(SubmitResponse {
            success: true,
            saved_count,
            error: None,
        })
    }

    async fn attach_proof(
        &self,
        date: DateKey,
        batch: BatchKey,
        photo: &Path,
    ) -> Result<Option<String>, TransportError> {
        let ext = photo
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        let dest = self.proofs_dir.join(format!("{date}_{batch}.{ext}"));
        std::fs::create_dir_all(&self.proofs_dir).map_err(remote_err)?;
        tokio::fs::copy(photo, &dest).await.map_err(remote_err)?;
        let url = format!("file://{}", dest.to_string_lossy());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO proofs(date_key, batch_key, url)
                 VALUES(?, ?, ?)
                 ON CONFLICT(date_key, batch_key) DO UPDATE SET url = excluded.url",
                (date.to_string(), batch.as_str(), &url),
            )
        })?;
        Ok(Some(url))
    }
}
