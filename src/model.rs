use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub app_number: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Present,
    Absent,
    #[default]
    Leave,
}

impl StatusValue {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusValue::Present => "present",
            StatusValue::Absent => "absent",
            StatusValue::Leave => "leave",
        }
    }
}

impl FromStr for StatusValue {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(StatusValue::Present),
            "absent" => Ok(StatusValue::Absent),
            "leave" => Ok(StatusValue::Leave),
            other => Err(ValidationError::new(format!(
                "status must be one of: present, absent, leave (got {other:?})"
            ))),
        }
    }
}

/// One of the two fixed daily sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatchKey {
    /// 5:30 AM
    #[serde(rename = "batch_01")]
    Batch01,
    /// 6:00 AM
    #[serde(rename = "batch_02")]
    Batch02,
}

impl BatchKey {
    pub const ALL: [BatchKey; 2] = [BatchKey::Batch01, BatchKey::Batch02];

    pub fn as_str(self) -> &'static str {
        match self {
            BatchKey::Batch01 => "batch_01",
            BatchKey::Batch02 => "batch_02",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BatchKey::Batch01 => "5:30 AM",
            BatchKey::Batch02 => "6:00 AM",
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "batch_01" => Ok(BatchKey::Batch01),
            "batch_02" => Ok(BatchKey::Batch02),
            other => Err(ValidationError::new(format!(
                "batch must be batch_01 or batch_02 (got {other:?})"
            ))),
        }
    }
}

/// Calendar date in `YYYY-MM-DD` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DateKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(DateKey)
            .map_err(|_| ValidationError::new(format!("date must be YYYY-MM-DD (got {s:?})")))
    }
}

impl TryFrom<String> for DateKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DateKey> for String {
    fn from(value: DateKey) -> Self {
        value.to_string()
    }
}

/// Composite (date, batch) key for cell groups, locks and photo proofs.
///
/// The string form is `YYYY-MM-DD_batch_0N`; the date never contains `_`, so
/// the first underscore separates the two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LockKey {
    pub date: DateKey,
    pub batch: BatchKey,
}

impl LockKey {
    pub fn new(date: DateKey, batch: BatchKey) -> Self {
        Self { date, batch }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.date, self.batch)
    }
}

impl FromStr for LockKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((date, batch)) = s.split_once('_') else {
            return Err(ValidationError::new(format!(
                "lock key must be DATE_BATCH (got {s:?})"
            )));
        };
        Ok(Self {
            date: date.parse()?,
            batch: batch.parse()?,
        })
    }
}

impl TryFrom<String> for LockKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LockKey> for String {
    fn from(value: LockKey) -> Self {
        value.to_string()
    }
}

/// A status row as the remote ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub student_id: String,
    pub status: StatusValue,
}

/// A finalized row submitted to the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecord {
    pub student_id: String,
    pub student_name: String,
    pub app_number: String,
    pub status: StatusValue,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub saved_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_parses_composite_form() {
        let key: LockKey = "2025-03-04_batch_02".parse().expect("parse lock key");
        assert_eq!(key.batch, BatchKey::Batch02);
        assert_eq!(key.date.to_string(), "2025-03-04");
        assert_eq!(key.to_string(), "2025-03-04_batch_02");
    }

    #[test]
    fn lock_key_rejects_garbage() {
        assert!("2025-03-04".parse::<LockKey>().is_err());
        assert!("2025-03-04_batch_03".parse::<LockKey>().is_err());
        assert!("03/04/2025_batch_01".parse::<LockKey>().is_err());
    }

    #[test]
    fn status_and_batch_use_wire_names() {
        assert_eq!(
            serde_json::to_value(StatusValue::Present).expect("ser"),
            serde_json::json!("present")
        );
        assert_eq!(
            serde_json::to_value(BatchKey::Batch01).expect("ser"),
            serde_json::json!("batch_01")
        );
        assert_eq!("ABSENT".parse::<StatusValue>().expect("parse"), StatusValue::Absent);
        assert_eq!(StatusValue::default(), StatusValue::Leave);
    }

    #[test]
    fn student_defaults_to_active() {
        let s: Student =
            serde_json::from_value(serde_json::json!({ "id": "S1", "name": "Asha" }))
                .expect("parse student");
        assert!(s.active);
        assert_eq!(s.app_number, "");
    }
}
