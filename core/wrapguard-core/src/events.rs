use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::MachineId;

/// The closed set of lifecycle/safety event kinds `LogicStage` may emit.
/// Matches the `event_type` column of the externally-owned event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AutoStop,
    AutoReset,
    AutoStart,
    PersonExitRoi,
    RollStarted,
    RollFinished,
    ErrorDetected,
    FrameCaptured,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::AutoStop => "AUTO_STOP",
            EventKind::AutoReset => "AUTO_RESET",
            EventKind::AutoStart => "AUTO_START",
            EventKind::PersonExitRoi => "PERSON_EXIT_ROI",
            EventKind::RollStarted => "ROLL_STARTED",
            EventKind::RollFinished => "ROLL_FINISHED",
            EventKind::ErrorDetected => "ERROR_DETECTED",
            EventKind::FrameCaptured => "FRAME_CAPTURED",
        };
        write!(f, "{s}")
    }
}

/// An append-only lifecycle/safety record, handed to the `EventSink`
/// channel by `LogicStage`. Never mutated once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub machine_id: MachineId,
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(machine_id: MachineId, kind: EventKind, ts: DateTime<Utc>) -> Self {
        Event {
            machine_id,
            kind,
            ts,
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// A production roll in progress, opened on `ROLL_STARTED` and closed on
/// `ROLL_FINISHED`. Recoverable from the `EventSink` after a restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollSession {
    pub log_id: i64,
    pub start_ts: DateTime<Utc>,
}
