use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::LockedError;
use crate::model::{BatchKey, DateKey, LockKey, StatusValue};
use crate::persist::PersistedState;
use crate::roster::Roster;

pub type CellGroup = HashMap<String, StatusValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub student_id: String,
    pub old_status: StatusValue,
    pub new_status: StatusValue,
}

/// Per (date, batch) statuses plus the lock set and photo proofs.
///
/// Reads never fail: a missing group or a missing student reads as `leave`.
/// Writes to a locked key are rejected here, not by callers.
#[derive(Debug, Clone, Default)]
pub struct AttendanceLedger {
    groups: HashMap<LockKey, CellGroup>,
    locks: BTreeSet<LockKey>,
    photos: BTreeMap<LockKey, String>,
}

impl AttendanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the group with every known student on `leave`. Existing
    /// groups are left alone. Returns whether a group was created.
    pub fn ensure_initialized(&mut self, date: DateKey, batch: BatchKey, roster: &Roster) -> bool {
        let key = LockKey::new(date, batch);
        if self.groups.contains_key(&key) {
            return false;
        }
        let group: CellGroup = roster
            .ids()
            .map(|id| (id.to_string(), StatusValue::Leave))
            .collect();
        self.groups.insert(key, group);
        true
    }

    pub fn has_group(&self, date: DateKey, batch: BatchKey) -> bool {
        self.groups.contains_key(&LockKey::new(date, batch))
    }

    pub fn get_status(&self, date: DateKey, batch: BatchKey, student_id: &str) -> StatusValue {
        self.groups
            .get(&LockKey::new(date, batch))
            .and_then(|g| g.get(student_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_status(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        student_id: &str,
        status: StatusValue,
        roster: &Roster,
    ) -> Result<StatusChange, LockedError> {
        let key = LockKey::new(date, batch);
        if self.locks.contains(&key) {
            return Err(LockedError { key });
        }
        self.ensure_initialized(date, batch, roster);
        let group = self.groups.entry(key).or_default();
        let old_status = group
            .insert(student_id.to_string(), status)
            .unwrap_or_default();
        Ok(StatusChange {
            student_id: student_id.to_string(),
            old_status,
            new_status: status,
        })
    }

    /// Stamps one status onto several students. The lock is checked once up
    /// front so either every id is written or none is.
    pub fn bulk_set_status<'a>(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        student_ids: impl IntoIterator<Item = &'a str>,
        status: StatusValue,
        roster: &Roster,
    ) -> Result<Vec<StatusChange>, LockedError> {
        if self.is_locked(date, batch) {
            return Err(LockedError {
                key: LockKey::new(date, batch),
            });
        }
        let mut changes = Vec::new();
        for id in student_ids {
            changes.push(self.set_status(date, batch, id, status, roster)?);
        }
        Ok(changes)
    }

    /// Replaces a whole group with remote data: every known student starts on
    /// `leave`, then the remote statuses are overlaid.
    pub fn replace_group(
        &mut self,
        date: DateKey,
        batch: BatchKey,
        statuses: impl IntoIterator<Item = (String, StatusValue)>,
        roster: &Roster,
    ) {
        let mut group: CellGroup = roster
            .ids()
            .map(|id| (id.to_string(), StatusValue::Leave))
            .collect();
        group.extend(statuses);
        self.groups.insert(LockKey::new(date, batch), group);
    }

    /// Returns true when the key was not locked before.
    pub fn lock(&mut self, date: DateKey, batch: BatchKey, photo_url: Option<String>) -> bool {
        let key = LockKey::new(date, batch);
        if let Some(url) = photo_url.filter(|u| !u.trim().is_empty()) {
            self.photos.insert(key, url);
        }
        self.locks.insert(key)
    }

    pub fn is_locked(&self, date: DateKey, batch: BatchKey) -> bool {
        self.locks.contains(&LockKey::new(date, batch))
    }

    pub fn photo_url(&self, date: DateKey, batch: BatchKey) -> Option<&str> {
        self.photos
            .get(&LockKey::new(date, batch))
            .map(|s| s.as_str())
    }

    pub fn batch1_present_set(&self, date: DateKey) -> HashSet<&str> {
        self.groups
            .get(&LockKey::new(date, BatchKey::Batch01))
            .map(|g| {
                g.iter()
                    .filter(|(_, status)| **status == StatusValue::Present)
                    .map(|(id, _)| id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every group, lock and photo for `date`.
    pub fn clear(&mut self, date: DateKey) {
        self.groups.retain(|key, _| key.date != date);
        self.locks.retain(|key| key.date != date);
        self.photos.retain(|key, _| key.date != date);
    }

    pub fn snapshot(&self) -> PersistedState {
        let mut cells: BTreeMap<DateKey, BTreeMap<BatchKey, BTreeMap<String, StatusValue>>> =
            BTreeMap::new();
        for (key, group) in &self.groups {
            cells
                .entry(key.date)
                .or_default()
                .insert(key.batch, group.iter().map(|(k, v)| (k.clone(), *v)).collect());
        }
        PersistedState::new(cells, self.locks.clone(), self.photos.clone())
    }

    pub fn restore(state: PersistedState) -> Self {
        let mut groups: HashMap<LockKey, CellGroup> = HashMap::new();
        for (date, batches) in state.cells {
            for (batch, group) in batches {
                groups.insert(LockKey::new(date, batch), group.into_iter().collect());
            }
        }
        Self {
            groups,
            locks: state.locks.into_keys(),
            photos: state.photos,
        }
    }
}
