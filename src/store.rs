use chrono::Local;

use crate::error::LockedError;
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{AttendanceLedger, StatusChange};
use crate::model::{BatchKey, DateKey, StatusValue, Student};
use crate::persist::PersistenceAdapter;
use crate::report::{build_report, MergeReport};
use crate::roster::{Roster, RosterLoad};
use crate::view::{AttendanceView, ViewCache};

/// What the UI is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub date: DateKey,
    pub batch: BatchKey,
    pub query: String,
}

impl Filters {
    pub fn today() -> Self {
        Self {
            date: DateKey::new(Local::now().date_naive()),
            batch: BatchKey::Batch01,
            query: String::new(),
        }
    }
}

/// Owns roster, ledger, view cache and filters for one session.
///
/// Every mutation runs the same sequence: change the data, invalidate the
/// view cache, persist, publish an event. Persistence failures are logged
/// and the in-memory state stays authoritative.
///
/// When the stored state could not be read at open, nothing is written back
/// for the rest of the session so the unreadable blob (and its locks) stays
/// on disk for recovery.
pub struct AttendanceStore {
    roster: Roster,
    ledger: AttendanceLedger,
    views: ViewCache,
    filters: Filters,
    bus: EventBus,
    persistence: Box<dyn PersistenceAdapter>,
    restore_failed: bool,
}

impl AttendanceStore {
    /// Restores whatever the adapter holds; unreadable state starts empty
    /// and read-only on disk.
    pub fn open(persistence: Box<dyn PersistenceAdapter>, filters: Filters) -> Self {
        let (ledger, restore_failed) = match persistence.load() {
            Ok(Some(state)) => (AttendanceLedger::restore(state), false),
            Ok(None) => (AttendanceLedger::new(), false),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "could not restore ledger, starting empty and leaving stored state untouched"
                );
                (AttendanceLedger::new(), true)
            }
        };
        Self {
            roster: Roster::new(),
            ledger,
            views: ViewCache::new(),
            filters,
            bus: EventBus::default(),
            persistence,
            restore_failed,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn restore_failed(&self) -> bool {
        self.restore_failed
    }

    pub fn persist(&self) {
        if self.restore_failed {
            tracing::debug!("stored ledger was unreadable at open, not overwriting it");
            return;
        }
        if let Err(e) = self.persistence.save(&self.ledger.snapshot()) {
            tracing::warn!(error = %e, "failed to persist ledger");
        }
    }

    pub fn load_roster(&mut self, students: Vec<Student>) -> RosterLoad {
        let load = self.roster.load(students);
        if load.dropped > 0 {
            tracing::warn!(dropped = load.dropped, "dropped roster rows without a usable id");
        }
        tracing::info!(count = load.count, "roster loaded");
        self.views.invalidate();
        self.bus.publish(LedgerEvent::RosterLoaded { count: load.count });
        load
    }

    pub fn get_status(&self, date: DateKey, batch: BatchKey, student_id: &str) -> StatusValue {
        self.ledger.get_status(date, batch, student_id)
    }

    pub fn is_locked(&self, date: DateKey, batch: BatchKey) -> bool {
        self.ledger.is_locked(date, batch)
    }

    pub fn ensure_initialized(&mut self, date: DateKey, batch: BatchKey) {
        if self.ledger.ensure_initialized(date, batch, &self.roster) {
            self.views.invalidate();
        }
    }

    pub fn set_status(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        student_id: &str,
        status: StatusValue,
    ) -> Result<StatusChange, LockedError> {
        let change = self
            .ledger
            .set_status(date, batch, student_id, status, &self.roster)
            .inspect_err(|e| tracing::debug!(key = %e.key, student_id, "write to locked batch"))?;
        self.after_changes(date, batch, std::slice::from_ref(&change));
        Ok(change)
    }

    pub fn bulk_set_status(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        student_ids: &[String],
        status: StatusValue,
    ) -> Result<Vec<StatusChange>, LockedError> {
        let changes = self.ledger.bulk_set_status(
            date,
            batch,
            student_ids.iter().map(|s| s.as_str()),
            status,
            &self.roster,
        )?;
        self.after_changes(date, batch, &changes);
        Ok(changes)
    }

    fn after_changes(&mut self, date: DateKey, batch: BatchKey, changes: &[StatusChange]) {
        self.views.invalidate();
        self.persist();
        for c in changes {
            self.bus.publish(LedgerEvent::StatusChanged {
                date,
                batch,
                student_id: c.student_id.clone(),
                old_status: c.old_status,
                new_status: c.new_status,
            });
        }
    }

    pub fn lock(&mut self, date: DateKey, batch: BatchKey, photo_url: Option<String>) {
        let newly = self.ledger.lock(date, batch, photo_url);
        self.views.invalidate();
        self.persist();
        if newly {
            tracing::info!(%date, %batch, "batch locked");
        }
        self.bus.publish(LedgerEvent::BatchLocked {
            date,
            batch,
            photo_url: self.ledger.photo_url(date, batch).map(|s| s.to_string()),
        });
    }

    /// Installs remote statuses for one batch and locks it.
    pub fn apply_remote(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        statuses: Vec<(String, StatusValue)>,
    ) {
        let rows = statuses.len();
        self.ledger.replace_group(date, batch, statuses, &self.roster);
        self.bus.publish(LedgerEvent::RemoteApplied { date, batch, rows });
        self.lock(date, batch, None);
    }

    pub fn clear(&mut self, date: DateKey) {
        self.ledger.clear(date);
        self.views.invalidate();
        self.persist();
        tracing::info!(%date, "cleared date");
        self.bus.publish(LedgerEvent::DateCleared { date });
    }

    pub fn set_date(&mut self, date: DateKey) {
        self.filters.date = date;
    }

    pub fn set_batch(&mut self, batch: BatchKey) {
        self.filters.batch = batch;
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.filters.query = query.into();
    }

    /// View for the current filters; recomputed only when something changed.
    pub fn views(&mut self) -> &AttendanceView {
        let Filters { date, batch, query } = &self.filters;
        self.views
            .get(&self.roster, &self.ledger, *date, *batch, query)
    }

    /// View for an explicit (date, batch) with no search applied.
    pub fn batch_view(&self, date: DateKey, batch: BatchKey) -> AttendanceView {
        crate::view::compute(&self.roster, &self.ledger, date, batch, "")
    }

    pub fn report(&self, date: DateKey) -> MergeReport {
        build_report(&self.roster, &self.ledger, date)
    }
}

#[cfg(test)]
pub(crate) fn memory_store(students: Vec<Student>) -> AttendanceStore {
    let mut store = AttendanceStore::open(
        Box::new(crate::persist::MemoryPersistence::new()),
        Filters::today(),
    );
    store.load_roster(students);
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::events::drain;
    use crate::persist::{MemoryPersistence, PersistedState};
    use crate::roster::student;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn abc() -> Vec<Student> {
        vec![
            student("A", "Asha", "101"),
            student("B", "Bela", "102"),
            student("C", "Chitra", "103"),
        ]
    }

    fn ids(v: &[Student]) -> Vec<&str> {
        v.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn lock_scenario_end_to_end() {
        let mut store = memory_store(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        store.set_date(d);
        store.set_batch(BatchKey::Batch01);
        store
            .set_status(d, BatchKey::Batch01, "A", StatusValue::Present)
            .expect("set A");
        store
            .set_status(d, BatchKey::Batch01, "B", StatusValue::Absent)
            .expect("set B");

        let view = store.views().clone();
        assert_eq!(ids(&view.present), vec!["A"]);
        assert_eq!(ids(&view.absent), vec!["B"]);
        assert_eq!(ids(&view.leave), vec!["C"]);

        store.lock(d, BatchKey::Batch01, None);
        let err = store
            .set_status(d, BatchKey::Batch01, "C", StatusValue::Present)
            .expect_err("locked");
        assert_eq!(err.key.batch, BatchKey::Batch01);
        assert_eq!(store.get_status(d, BatchKey::Batch01, "C"), StatusValue::Leave);
        assert_eq!(ids(&store.views().leave), vec!["C"]);
    }

    #[test]
    fn reads_after_mutation_are_fresh() {
        let mut store = memory_store(abc());
        let d = store.filters().date;
        assert_eq!(store.views().present.len(), 0);
        store
            .set_status(d, BatchKey::Batch01, "B", StatusValue::Present)
            .expect("set");
        assert_eq!(ids(&store.views().present), vec!["B"]);

        store.set_batch(BatchKey::Batch02);
        assert_eq!(ids(&store.views().visible), vec!["A", "C"]);

        store.set_query("chi");
        assert_eq!(ids(&store.views().visible), vec!["C"]);

        store.load_roster(vec![student("Z", "Zoya", "900")]);
        store.set_query("");
        assert_eq!(ids(&store.views().visible), vec!["Z"]);
    }

    #[test]
    fn mutations_publish_events() {
        let mut store = memory_store(abc());
        let mut rx = store.bus().subscribe();
        let d: DateKey = "2025-01-06".parse().expect("date");
        store
            .set_status(d, BatchKey::Batch02, "A", StatusValue::Absent)
            .expect("set");
        store.lock(d, BatchKey::Batch02, Some("file:///p.jpg".into()));
        store.clear(d);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                LedgerEvent::StatusChanged {
                    date: d,
                    batch: BatchKey::Batch02,
                    student_id: "A".into(),
                    old_status: StatusValue::Leave,
                    new_status: StatusValue::Absent,
                },
                LedgerEvent::BatchLocked {
                    date: d,
                    batch: BatchKey::Batch02,
                    photo_url: Some("file:///p.jpg".into()),
                },
                LedgerEvent::DateCleared { date: d },
            ]
        );
    }

    #[test]
    fn rejected_writes_publish_nothing() {
        let mut store = memory_store(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        store.lock(d, BatchKey::Batch01, None);
        let mut rx = store.bus().subscribe();
        assert!(store
            .bulk_set_status(d, BatchKey::Batch01, &["A".into(), "B".into()], StatusValue::Present)
            .is_err());
        assert!(drain(&mut rx).is_empty());
    }

    struct SharedMemory(Arc<MemoryPersistence>);

    impl PersistenceAdapter for SharedMemory {
        fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
            self.0.save(state)
        }
        fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
            self.0.load()
        }
    }

    #[test]
    fn state_survives_reopen() {
        let shared = Arc::new(MemoryPersistence::new());
        let d: DateKey = "2025-01-06".parse().expect("date");
        {
            let mut store =
                AttendanceStore::open(Box::new(SharedMemory(shared.clone())), Filters::today());
            store.load_roster(abc());
            store
                .bulk_set_status(d, BatchKey::Batch01, &["A".into(), "C".into()], StatusValue::Present)
                .expect("bulk");
            store.lock(d, BatchKey::Batch01, None);
        }
        let mut store = AttendanceStore::open(Box::new(SharedMemory(shared)), Filters::today());
        store.load_roster(abc());
        assert!(store.is_locked(d, BatchKey::Batch01));
        assert_eq!(store.get_status(d, BatchKey::Batch01, "C"), StatusValue::Present);
    }

    struct BrokenDisk;

    impl PersistenceAdapter for BrokenDisk {
        fn save(&self, _: &PersistedState) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("disk full".into()))
        }
        fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
            Err(PersistenceError::Unavailable("disk gone".into()))
        }
    }

    #[test]
    fn persistence_failures_do_not_block_mutations() {
        let mut store = AttendanceStore::open(Box::new(BrokenDisk), Filters::today());
        store.load_roster(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        store
            .set_status(d, BatchKey::Batch01, "A", StatusValue::Present)
            .expect("set");
        store.lock(d, BatchKey::Batch01, None);
        assert!(store.is_locked(d, BatchKey::Batch01));
        assert_eq!(store.get_status(d, BatchKey::Batch01, "A"), StatusValue::Present);
    }

    #[test]
    fn unknown_stored_status_keeps_locks() {
        let blob = r#"{"cells":{"2025-01-06":{"batch_01":{"A":"present","B":"Late"}}},"locks":["2025-01-06_batch_01"]}"#;
        let mut store = AttendanceStore::open(
            Box::new(MemoryPersistence::with_blob(blob)),
            Filters::today(),
        );
        store.load_roster(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        assert!(!store.restore_failed());
        assert!(store.is_locked(d, BatchKey::Batch01));
        assert_eq!(store.get_status(d, BatchKey::Batch01, "A"), StatusValue::Present);
        assert_eq!(store.get_status(d, BatchKey::Batch01, "B"), StatusValue::Leave);
        assert!(store
            .set_status(d, BatchKey::Batch01, "B", StatusValue::Absent)
            .is_err());
    }

    /// Load always fails; counts save attempts.
    struct UnreadableDisk(Arc<AtomicUsize>);

    impl PersistenceAdapter for UnreadableDisk {
        fn save(&self, _: &PersistedState) -> Result<(), PersistenceError> {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
        fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
            Err(PersistenceError::Unavailable("garbled".into()))
        }
    }

    #[test]
    fn unreadable_state_is_never_overwritten() {
        let saves = Arc::new(AtomicUsize::new(0));
        let mut store =
            AttendanceStore::open(Box::new(UnreadableDisk(saves.clone())), Filters::today());
        assert!(store.restore_failed());
        store.load_roster(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        store
            .set_status(d, BatchKey::Batch01, "A", StatusValue::Present)
            .expect("set");
        store.lock(d, BatchKey::Batch01, None);
        store.clear(d);
        assert_eq!(saves.load(AtomicOrdering::SeqCst), 0);
        // The session itself keeps working in memory.
        assert!(!store.is_locked(d, BatchKey::Batch01));
    }

    #[test]
    fn apply_remote_replaces_and_locks() {
        let mut store = memory_store(abc());
        let d: DateKey = "2025-01-06".parse().expect("date");
        store
            .set_status(d, BatchKey::Batch02, "C", StatusValue::Absent)
            .expect("set");
        store.apply_remote(d, BatchKey::Batch02, vec![("B".into(), StatusValue::Present)]);
        assert!(store.is_locked(d, BatchKey::Batch02));
        assert_eq!(store.get_status(d, BatchKey::Batch02, "C"), StatusValue::Leave);
        assert_eq!(store.get_status(d, BatchKey::Batch02, "B"), StatusValue::Present);
    }
}
