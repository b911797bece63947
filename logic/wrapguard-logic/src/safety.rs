use chrono::{DateTime, Utc};

use wrapguard_core::config::SafetyConfig;

/// Auto-stop/auto-reset state for one machine (§4.4.2). Holds just enough
/// to enforce the stop cooldown and know whether a manual reset is owed.
#[derive(Debug, Default, Clone)]
pub struct SafetyState {
    pub auto_stop_active: bool,
    pub last_auto_stop_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyAction {
    None,
    AutoStop { person_count: u32 },
    AutoReset,
    PersonExitRoi,
}

pub fn evaluate(
    cfg: &SafetyConfig,
    state: &mut SafetyState,
    person_in_roi: bool,
    person_count: u32,
    now: DateTime<Utc>,
) -> SafetyAction {
    if cfg.auto_stop_on_person && person_in_roi {
        if state.auto_stop_active {
            return SafetyAction::None;
        }
        let cooldown_elapsed = state
            .last_auto_stop_ts
            .map(|ts| seconds_between(ts, now) > cfg.stop_cooldown_sec)
            .unwrap_or(true);
        if !cooldown_elapsed {
            return SafetyAction::None;
        }
        state.auto_stop_active = true;
        state.last_auto_stop_ts = Some(now);
        SafetyAction::AutoStop { person_count }
    } else if state.auto_stop_active && !person_in_roi {
        state.auto_stop_active = false;
        if cfg.auto_reset_on_clear {
            SafetyAction::AutoReset
        } else {
            SafetyAction::PersonExitRoi
        }
    } else {
        SafetyAction::None
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
