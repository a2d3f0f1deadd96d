//! Typed change notifications for the UI layer.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel; the store publishes
//! after every mutation and the host drains a receiver on request.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{BatchKey, DateKey, StatusValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    RosterLoaded { count: usize },

    #[serde(rename_all = "camelCase")]
    StatusChanged {
        date: DateKey,
        batch: BatchKey,
        student_id: String,
        old_status: StatusValue,
        new_status: StatusValue,
    },

    #[serde(rename_all = "camelCase")]
    BatchLocked {
        date: DateKey,
        batch: BatchKey,
        photo_url: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    DateCleared { date: DateKey },

    /// Remote rows replaced a local cell group during a pull.
    #[serde(rename_all = "camelCase")]
    RemoteApplied {
        date: DateKey,
        batch: BatchKey,
        rows: usize,
    },
}

const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishing with no subscribers is fine; the event is dropped.
    pub fn publish(&self, event: LedgerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Takes everything currently queued on `rx` without waiting. Lagged
/// receivers skip what they missed.
pub fn drain(rx: &mut broadcast::Receiver<LedgerEvent>) -> Vec<LedgerEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event receiver lagged");
            }
            Err(_) => break,
        }
    }
    out
}
