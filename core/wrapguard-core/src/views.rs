use chrono::{DateTime, Utc};

/// Collaborator-facing status snapshot for one machine (§6.4), sampled from
/// `LogicStage` once per tick. Carries enough to render a dashboard without
/// granting read access to the stage's internal state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineStatusSnapshot {
    pub alarm_active: bool,
    pub last_stop_ts: Option<DateTime<Utc>>,
    pub auto_mode: bool,
    pub auto_mode_since: Option<DateTime<Utc>>,
}
