use feruca::Collator;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;

use crate::ledger::AttendanceLedger;
use crate::model::{BatchKey, DateKey, StatusValue};
use crate::roster::Roster;

pub const MISSING_MARK: &str = "—";

/// A student's mark in one batch, or `Missing` when the batch has no data
/// for the date at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMark {
    Recorded(StatusValue),
    Missing,
}

impl BatchMark {
    fn normalized(self) -> StatusValue {
        match self {
            BatchMark::Recorded(s) => s,
            BatchMark::Missing => StatusValue::Leave,
        }
    }
}

impl Serialize for BatchMark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BatchMark::Recorded(s) => serializer.serialize_str(s.as_str()),
            BatchMark::Missing => serializer.serialize_str(MISSING_MARK),
        }
    }
}

/// Present in either batch wins, then absent in either, else leave.
pub fn final_status(b1: BatchMark, b2: BatchMark) -> StatusValue {
    let (b1, b2) = (b1.normalized(), b2.normalized());
    if b1 == StatusValue::Present || b2 == StatusValue::Present {
        StatusValue::Present
    } else if b1 == StatusValue::Absent || b2 == StatusValue::Absent {
        StatusValue::Absent
    } else {
        StatusValue::Leave
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    pub app_number: String,
    pub active: bool,
    pub batch1: BatchMark,
    pub batch2: BatchMark,
    pub final_status: StatusValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCounts {
    pub b1_present: usize,
    pub b1_absent: usize,
    pub b2_present: usize,
    pub b2_absent: usize,
    pub final_present: usize,
    pub final_absent: usize,
    pub final_leave: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub date: DateKey,
    pub rows: Vec<ReportRow>,
    pub counts: ReportCounts,
}

fn batch_mark(ledger: &AttendanceLedger, date: DateKey, batch: BatchKey, id: &str) -> BatchMark {
    if ledger.has_group(date, batch) {
        BatchMark::Recorded(ledger.get_status(date, batch, id))
    } else {
        BatchMark::Missing
    }
}

/// Unicode collation (CLDR root order) on the display name, then the exact
/// name, then the id.
fn compare_names(collator: &mut Collator, a: &ReportRow, b: &ReportRow) -> Ordering {
    collator
        .collate(a.name.as_str(), b.name.as_str())
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.student_id.cmp(&b.student_id))
}

/// Merges both batches for every roster student, active or not.
pub fn build_report(roster: &Roster, ledger: &AttendanceLedger, date: DateKey) -> MergeReport {
    let mut counts = ReportCounts::default();
    let mut rows: Vec<ReportRow> = Vec::with_capacity(roster.len());

    for s in roster.all() {
        let batch1 = batch_mark(ledger, date, BatchKey::Batch01, &s.id);
        let batch2 = batch_mark(ledger, date, BatchKey::Batch02, &s.id);
        let status = final_status(batch1, batch2);

        match batch1 {
            BatchMark::Recorded(StatusValue::Present) => counts.b1_present += 1,
            BatchMark::Recorded(StatusValue::Absent) => counts.b1_absent += 1,
            _ => {}
        }
        match batch2 {
            BatchMark::Recorded(StatusValue::Present) => counts.b2_present += 1,
            BatchMark::Recorded(StatusValue::Absent) => counts.b2_absent += 1,
            _ => {}
        }
        match status {
            StatusValue::Present => counts.final_present += 1,
            StatusValue::Absent => counts.final_absent += 1,
            StatusValue::Leave => counts.final_leave += 1,
        }

        rows.push(ReportRow {
            student_id: s.id.clone(),
            name: s.name.clone(),
            app_number: s.app_number.clone(),
            active: s.active,
            batch1,
            batch2,
            final_status: status,
        });
    }

    let mut collator = Collator::default();
    rows.sort_by(|a, b| compare_names(&mut collator, a, b));
    MergeReport { date, rows, counts }
}
