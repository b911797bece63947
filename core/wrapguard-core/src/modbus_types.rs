use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which physical device a `ModbusWorker` owns. `Di` is the combined
/// discrete-input device serving both machines; `Do(machine)` is the
/// per-machine coil device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoType {
    Di,
    Do(crate::MachineId),
}

impl std::fmt::Display for IoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoType::Di => write!(f, "DI"),
            IoType::Do(m) => write!(f, "DO-{m}"),
        }
    }
}

/// A whole-range atomic snapshot from one Modbus read cycle, published by a
/// `ModbusWorker` once per cycle regardless of `io_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSnapshot {
    pub io_type: IoType,
    pub connected: bool,
    pub values: BTreeMap<u16, bool>,
    pub ts: DateTime<Utc>,
    pub err_text: Option<String>,
}

impl IoSnapshot {
    pub fn disconnected(io_type: IoType, ts: DateTime<Utc>, err_text: impl Into<String>) -> Self {
        IoSnapshot {
            io_type,
            connected: false,
            values: BTreeMap::new(),
            ts,
            err_text: Some(err_text.into()),
        }
    }

    pub fn get(&self, addr: u16) -> bool {
        self.values.get(&addr).copied().unwrap_or(false)
    }
}

/// `DiSnapshot`/`DoSnapshot` in spec.md are both instances of `IoSnapshot`,
/// distinguished by `io_type`; these aliases keep call sites readable.
pub type DiSnapshot = IoSnapshot;
pub type DoSnapshot = IoSnapshot;

/// A fire-and-forget write, queued by `LogicStage` and retried up to 3×
/// inside the owning `ModbusWorker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoCommand {
    pub addr: u16,
    pub value: bool,
}

/// Running counters published alongside each `IoSnapshot`, purely for
/// observability (not used in any control decision).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModbusStats {
    pub read_success: u64,
    pub read_fail: u64,
    pub write_success: u64,
    pub write_fail: u64,
}
