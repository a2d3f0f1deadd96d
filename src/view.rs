use serde::Serialize;

use crate::ledger::AttendanceLedger;
use crate::model::{BatchKey, DateKey, StatusValue, Student};
use crate::roster::Roster;

/// Students shown for one (date, batch) plus the three status piles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceView {
    pub visible: Vec<Student>,
    pub present: Vec<Student>,
    pub absent: Vec<Student>,
    pub leave: Vec<Student>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounts {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub leave: usize,
}

impl AttendanceView {
    pub fn counts(&self) -> ViewCounts {
        ViewCounts {
            total: self.visible.len(),
            present: self.present.len(),
            absent: self.absent.len(),
            leave: self.leave.len(),
        }
    }
}

fn matches_query(s: &Student, needle: &str) -> bool {
    s.name.to_lowercase().contains(needle)
        || s.app_number.to_lowercase().contains(needle)
        || s.id.to_lowercase().contains(needle)
}

/// Builds the view from scratch.
///
/// Inactive students are skipped. On `batch_02` anyone already present in
/// `batch_01` that day is hidden so nobody is counted twice. A non-empty
/// query, whitespace included, keeps case-insensitive substring matches on
/// name, app number or id.
/// Each pile keeps roster order.
pub fn compute(
    roster: &Roster,
    ledger: &AttendanceLedger,
    date: DateKey,
    batch: BatchKey,
    query: &str,
) -> AttendanceView {
    let needle = query.to_lowercase();
    let excluded = match batch {
        BatchKey::Batch02 => ledger.batch1_present_set(date),
        BatchKey::Batch01 => Default::default(),
    };

    let mut view = AttendanceView::default();
    for s in roster.all() {
        if !s.active {
            continue;
        }
        if excluded.contains(s.id.as_str()) {
            continue;
        }
        if !needle.is_empty() && !matches_query(s, &needle) {
            continue;
        }
        view.visible.push(s.clone());
        match ledger.get_status(date, batch, &s.id) {
            StatusValue::Present => view.present.push(s.clone()),
            StatusValue::Absent => view.absent.push(s.clone()),
            StatusValue::Leave => view.leave.push(s.clone()),
        }
    }
    view
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewKey {
    date: DateKey,
    batch: BatchKey,
    query: String,
}

/// Memoizes the last computed view. Callers invalidate on every ledger or
/// roster mutation; filter changes miss the cache through the key.
#[derive(Debug, Default)]
pub struct ViewCache {
    cached: Option<(ViewKey, AttendanceView)>,
    recomputes: u64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn get(
        &mut self,
        roster: &Roster,
        ledger: &AttendanceLedger,
        date: DateKey,
        batch: BatchKey,
        query: &str,
    ) -> &AttendanceView {
        let key = ViewKey {
            date,
            batch,
            query: query.to_lowercase(),
        };
        if self.cached.as_ref().is_some_and(|(k, _)| *k != key) {
            self.cached = None;
        }
        let recomputes = &mut self.recomputes;
        let (_, view) = self.cached.get_or_insert_with(|| {
            *recomputes += 1;
            tracing::trace!(%date, %batch, recomputes = *recomputes, "view recomputed");
            let view = compute(roster, ledger, date, batch, &key.query);
            (key, view)
        });
        view
    }

    #[cfg(test)]
    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }
}
