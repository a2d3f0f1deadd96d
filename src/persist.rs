use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::db;
use crate::error::PersistenceError;
use crate::model::{BatchKey, DateKey, LockKey, StatusValue};

pub const STATE_VERSION: u32 = 1;
const LEDGER_SETTINGS_KEY: &str = "ledger.state";

pub type PersistedCells = BTreeMap<DateKey, BTreeMap<BatchKey, BTreeMap<String, StatusValue>>>;

/// Serialized ledger: cell groups, locks and photo proofs.
///
/// Loading is per entry: a bad date, batch, status or photo key drops that
/// entry with a warning and the rest of the state still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub version: u32,
    #[serde(default, deserialize_with = "lenient_cells")]
    pub cells: PersistedCells,
    #[serde(default)]
    pub locks: LockSet,
    #[serde(default, deserialize_with = "lenient_photos")]
    pub photos: BTreeMap<LockKey, String>,
}

fn lenient_cells<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PersistedCells, D::Error> {
    let mut cells = PersistedCells::new();
    let raw = serde_json::Value::deserialize(deserializer)?;
    let Some(by_date) = raw.as_object() else {
        tracing::warn!("stored cells are not an object, ignoring them");
        return Ok(cells);
    };
    for (date_raw, batches) in by_date {
        let Ok(date) = date_raw.parse::<DateKey>() else {
            tracing::warn!(date = %date_raw, "skipping stored cells with a bad date");
            continue;
        };
        let Some(batches) = batches.as_object() else {
            tracing::warn!(%date, "skipping stored cells that are not an object");
            continue;
        };
        for (batch_raw, group) in batches {
            let (Ok(batch), Some(group)) = (batch_raw.parse::<BatchKey>(), group.as_object())
            else {
                tracing::warn!(%date, batch = %batch_raw, "skipping stored cell group");
                continue;
            };
            let slot = cells.entry(date).or_default().entry(batch).or_default();
            for (student_id, status) in group {
                match status.as_str().map(str::parse::<StatusValue>) {
                    Some(Ok(status)) => {
                        slot.insert(student_id.clone(), status);
                    }
                    _ => tracing::warn!(
                        %date, %batch, student_id = %student_id, status = %status,
                        "skipping stored status"
                    ),
                }
            }
        }
    }
    Ok(cells)
}

fn lenient_photos<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<LockKey, String>, D::Error> {
    let mut photos = BTreeMap::new();
    let raw = serde_json::Value::deserialize(deserializer)?;
    let Some(by_key) = raw.as_object() else {
        tracing::warn!("stored photos are not an object, ignoring them");
        return Ok(photos);
    };
    for (key_raw, url) in by_key {
        match (key_raw.parse::<LockKey>(), url.as_str()) {
            (Ok(key), Some(url)) => {
                photos.insert(key, url.to_string());
            }
            _ => tracing::warn!(key = %key_raw, "skipping stored photo proof"),
        }
    }
    Ok(photos)
}

impl PersistedState {
    pub fn new(
        cells: PersistedCells,
        locks: BTreeSet<LockKey>,
        photos: BTreeMap<LockKey, String>,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            cells,
            locks: LockSet(locks),
            photos,
        }
    }
}

/// Lock set as stored on disk.
///
/// Written as a list of `DATE_BATCH` keys. Older saves used a nested
/// `{date: {batch: bool}}` object; both load into the same set and entries
/// that don't parse are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet(BTreeSet<LockKey>);

impl LockSet {
    pub fn into_keys(self) -> BTreeSet<LockKey> {
        self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LockShape {
    Keys(Vec<String>),
    Nested(BTreeMap<String, BTreeMap<String, bool>>),
}

impl Serialize for LockSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|k| k.to_string()))
    }
}

impl<'de> Deserialize<'de> for LockSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut keys = BTreeSet::new();
        match LockShape::deserialize(deserializer)? {
            LockShape::Keys(raw) => {
                for k in raw {
                    match k.parse::<LockKey>() {
                        Ok(key) => {
                            keys.insert(key);
                        }
                        Err(e) => tracing::warn!(key = %k, error = %e, "skipping stored lock"),
                    }
                }
            }
            LockShape::Nested(by_date) => {
                for (date, batches) in by_date {
                    for (batch, locked) in batches {
                        if !locked {
                            continue;
                        }
                        match format!("{date}_{batch}").parse::<LockKey>() {
                            Ok(key) => {
                                keys.insert(key);
                            }
                            Err(e) => {
                                tracing::warn!(%date, %batch, error = %e, "skipping stored lock")
                            }
                        }
                    }
                }
            }
        }
        Ok(LockSet(keys))
    }
}

pub trait PersistenceAdapter: Send {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;
    fn load(&self) -> Result<Option<PersistedState>, PersistenceError>;
}

/// Ledger state kept in the local workspace database.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| PersistenceError::Unavailable("local database lock poisoned".into()))?;
        f(&conn)
    }
}

impl PersistenceAdapter for SqlitePersistence {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(state)?;
        self.with_conn(|conn| Ok(db::settings_set_json(conn, LEDGER_SETTINGS_KEY, &value)?))
    }

    /// A blob that isn't valid JSON is an error, never "no state".
    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let raw = self.with_conn(|conn| Ok(db::settings_get_raw(conn, LEDGER_SETTINGS_KEY)?))?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

/// Keeps the encoded state in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryPersistence {
    blob: Mutex<Option<String>>,
}

#[cfg(test)]
impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }
}

#[cfg(test)]
impl PersistenceAdapter for MemoryPersistence {
    fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(state)?;
        let mut blob = self
            .blob
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".into()))?;
        *blob = Some(encoded);
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let blob = self
            .blob
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".into()))?;
        match blob.as_deref() {
            Some(s) => Ok(Some(serde_json::from_str(s)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AttendanceLedger;
    use crate::roster::{student, Roster};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn sample_ledger() -> AttendanceLedger {
        let mut roster = Roster::new();
        roster.load(vec![student("A", "Asha", "1"), student("B", "Bela", "2")]);
        let d: DateKey = "2025-02-10".parse().expect("date");
        let mut ledger = AttendanceLedger::new();
        ledger
            .set_status(d, BatchKey::Batch01, "A", StatusValue::Present, &roster)
            .expect("set");
        ledger
            .set_status(d, BatchKey::Batch02, "B", StatusValue::Absent, &roster)
            .expect("set");
        ledger.lock(d, BatchKey::Batch01, Some("file:///proof.jpg".into()));
        ledger
    }

    #[test]
    fn memory_adapter_round_trips_ledger() {
        let ledger = sample_ledger();
        let adapter = MemoryPersistence::new();
        assert_eq!(adapter.load().expect("load"), None);
        adapter.save(&ledger.snapshot()).expect("save");
        let restored = AttendanceLedger::restore(adapter.load().expect("load").expect("state"));
        assert_eq!(restored.snapshot(), ledger.snapshot());
    }

    #[test]
    fn sqlite_adapter_round_trips_ledger() {
        let workspace = temp_dir("attendbook-persist");
        let ledger = sample_ledger();
        {
            let conn = db::open_local_db(&workspace).expect("open db");
            SqlitePersistence::new(conn)
                .save(&ledger.snapshot())
                .expect("save");
        }
        let conn = db::open_local_db(&workspace).expect("reopen db");
        let loaded = SqlitePersistence::new(conn)
            .load()
            .expect("load")
            .expect("state");
        let d: DateKey = "2025-02-10".parse().expect("date");
        let restored = AttendanceLedger::restore(loaded);
        assert!(restored.is_locked(d, BatchKey::Batch01));
        assert_eq!(restored.photo_url(d, BatchKey::Batch01), Some("file:///proof.jpg"));
        assert_eq!(restored.get_status(d, BatchKey::Batch02, "B"), StatusValue::Absent);
    }

    #[test]
    fn locks_are_written_as_key_list() {
        let v = serde_json::to_value(sample_ledger().snapshot()).expect("encode");
        assert_eq!(v["locks"], serde_json::json!(["2025-02-10_batch_01"]));
        assert_eq!(v["cells"]["2025-02-10"]["batch_01"]["A"], "present");
        assert_eq!(v["photos"]["2025-02-10_batch_01"], "file:///proof.jpg");
    }

    #[test]
    fn nested_lock_shape_is_normalized() {
        let blob = serde_json::json!({
            "cells": {},
            "locks": {
                "2025-02-10": { "batch_01": true, "batch_02": false },
                "2025-02-11": { "batch_02": true },
                "bad-date": { "batch_01": true }
            }
        });
        let state: PersistedState = serde_json::from_value(blob).expect("decode");
        let keys: Vec<String> = state.locks.into_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2025-02-10_batch_01", "2025-02-11_batch_02"]);
    }

    #[test]
    fn key_list_shape_skips_unparseable_entries() {
        let adapter = MemoryPersistence::with_blob(
            r#"{"locks":["2025-02-10_batch_02","nonsense"],"photos":{}}"#,
        );
        let state = adapter.load().expect("load").expect("state");
        assert_eq!(state.version, 0);
        let ledger = AttendanceLedger::restore(state);
        let d: DateKey = "2025-02-10".parse().expect("date");
        assert!(ledger.is_locked(d, BatchKey::Batch02));
        assert!(!ledger.is_locked(d, BatchKey::Batch01));
    }

    #[test]
    fn bad_cells_and_photos_are_skipped_one_by_one() {
        let blob = serde_json::json!({
            "cells": {
                "2025-01-06": {
                    "batch_01": { "A": "present", "B": "Late", "C": 7 },
                    "batch_09": { "A": "absent" }
                },
                "06/01/2025": { "batch_01": { "A": "absent" } }
            },
            "locks": ["2025-01-06_batch_01"],
            "photos": {
                "2025-01-06_batch_01": "file:///ok.jpg",
                "2025-01-06_batch_01x": "file:///bad-key.jpg",
                "2025-01-06_batch_02": 42
            }
        });
        let state: PersistedState = serde_json::from_value(blob).expect("decode");
        let d: DateKey = "2025-01-06".parse().expect("date");
        assert_eq!(state.cells.len(), 1);
        let group = &state.cells[&d][&BatchKey::Batch01];
        assert_eq!(group.len(), 1);
        assert_eq!(group["A"], StatusValue::Present);
        assert!(!state.cells[&d].contains_key(&BatchKey::Batch02));
        assert_eq!(state.photos.len(), 1);

        let ledger = AttendanceLedger::restore(state);
        assert!(ledger.is_locked(d, BatchKey::Batch01));
        assert_eq!(ledger.photo_url(d, BatchKey::Batch01), Some("file:///ok.jpg"));
    }

    #[test]
    fn garbled_sqlite_blob_is_an_error() {
        let workspace = temp_dir("attendbook-persist-garbled");
        let conn = db::open_local_db(&workspace).expect("open db");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES(?, ?)",
            (LEDGER_SETTINGS_KEY, r#"{"locks": ["2025-01-06_batch_01""#),
        )
        .expect("seed blob");
        let adapter = SqlitePersistence::new(conn);
        assert!(matches!(adapter.load(), Err(PersistenceError::Encoding(_))));
    }
}
