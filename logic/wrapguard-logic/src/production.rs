use chrono::{DateTime, Duration as ChronoDuration, Utc};

const AWAITING_REMOVAL_TIMEOUT_SEC: i64 = 300;
const ROLL_CAPTURE_DELAY_SEC: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollPhase {
    Idle,
    Wrapping,
    AwaitingRemoval,
}

/// Production roll lifecycle for one machine (§4.4.4). Edges are tracked as
/// "previous shadow" values, reset (not diffed) whenever the machine drops
/// out of ready so that regaining readiness never manufactures a spurious
/// edge.
#[derive(Debug, Clone)]
pub struct ProductionState {
    pub phase: RollPhase,
    pub wrapping_start_ts: Option<DateTime<Utc>>,
    pub removal_wait_start_ts: Option<DateTime<Utc>>,
    pending_capture_due_ts: Option<DateTime<Utc>>,
    prev_run: Option<bool>,
    prev_check_roll: Option<bool>,
}

impl Default for ProductionState {
    fn default() -> Self {
        ProductionState {
            phase: RollPhase::Idle,
            wrapping_start_ts: None,
            removal_wait_start_ts: None,
            pending_capture_due_ts: None,
            prev_run: None,
            prev_check_roll: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProductionEvent {
    RollStarted,
    RollFinished { duration_seconds: i64, duration_minutes: f64 },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProductionOutcome {
    pub events: Vec<ProductionEvent>,
    pub blue_run: Option<bool>,
    pub green_finish: Option<bool>,
    pub anomaly: bool,
}

fn edge(prev: &mut Option<bool>, current: bool) -> Option<bool> {
    match prev.replace(current) {
        None => None,
        Some(old) if old != current => Some(current),
        _ => None,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl ProductionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.wrapping_start_ts.is_some()
    }

    /// Adopts a recovered session from the event store (§4.4.5).
    pub fn recover(&mut self, start_ts: DateTime<Utc>, run_now: bool, now: DateTime<Utc>) {
        self.wrapping_start_ts = Some(start_ts);
        if run_now {
            self.phase = RollPhase::Wrapping;
            self.removal_wait_start_ts = None;
        } else {
            self.phase = RollPhase::AwaitingRemoval;
            self.removal_wait_start_ts = Some(now);
        }
    }

    pub fn needs_recovery(&self, run: bool, check_roll: bool) -> bool {
        self.wrapping_start_ts.is_none() && (run || (!run && check_roll))
    }

    /// Advances the state machine one tick. `ready` gates everything else:
    /// while not ready, tracking is suspended and shadows reset to the
    /// current DI values.
    pub fn tick(&mut self, ready: bool, run: bool, check_roll: bool, now: DateTime<Utc>) -> ProductionOutcome {
        let mut out = ProductionOutcome::default();

        if !ready {
            self.prev_run = Some(run);
            self.prev_check_roll = Some(check_roll);
            return out;
        }

        if self.phase == RollPhase::AwaitingRemoval {
            if let Some(start) = self.removal_wait_start_ts {
                if (now - start).num_seconds() > AWAITING_REMOVAL_TIMEOUT_SEC {
                    self.finish_roll(now, &mut out);
                }
            }
        }

        let run_edge = edge(&mut self.prev_run, run);
        let roll_edge = edge(&mut self.prev_check_roll, check_roll);

        match run_edge {
            Some(true) if self.phase == RollPhase::Idle && check_roll => {
                self.phase = RollPhase::Wrapping;
                self.wrapping_start_ts = Some(now);
                out.blue_run = Some(true);
                out.green_finish = Some(false);
                out.events.push(ProductionEvent::RollStarted);
            }
            Some(false) if self.phase == RollPhase::Wrapping && self.wrapping_start_ts.is_some() => {
                self.phase = RollPhase::AwaitingRemoval;
                self.removal_wait_start_ts = Some(now);
                out.blue_run = Some(false);
                out.green_finish = Some(true);
            }
            _ => {}
        }

        match roll_edge {
            Some(false) => {
                if self.phase == RollPhase::AwaitingRemoval {
                    self.finish_roll(now, &mut out);
                } else if run {
                    // Anomaly: Run still on when CheckRoll falls mid-wrap.
                    if self.phase == RollPhase::Wrapping {
                        self.phase = RollPhase::Idle;
                        self.wrapping_start_ts = None;
                        out.blue_run = Some(false);
                    }
                    out.anomaly = true;
                }
            }
            Some(true) => {
                self.pending_capture_due_ts = Some(now + ChronoDuration::seconds(ROLL_CAPTURE_DELAY_SEC));
                if self.phase == RollPhase::AwaitingRemoval {
                    out.anomaly = true;
                }
            }
            None => {}
        }

        out
    }

    fn finish_roll(&mut self, now: DateTime<Utc>, out: &mut ProductionOutcome) {
        if let Some(start) = self.wrapping_start_ts {
            let duration_seconds = (now - start).num_seconds().max(0);
            out.events.push(ProductionEvent::RollFinished {
                duration_seconds,
                duration_minutes: round2(duration_seconds as f64 / 60.0),
            });
        }
        out.green_finish = Some(false);
        self.phase = RollPhase::Idle;
        self.wrapping_start_ts = None;
        self.removal_wait_start_ts = None;
    }

    /// Returns `true` once per scheduled delayed capture (§4.4.4, the
    /// `CheckRoll: false→true` rising edge capture).
    pub fn take_due_capture(&mut self, now: DateTime<Utc>) -> bool {
        match self.pending_capture_due_ts {
            Some(due) if now >= due => {
                self.pending_capture_due_ts = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn idle_to_wrapping_on_run_rising_edge_with_roll_present() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, true, t0); // seed shadows
        let out = state.tick(true, true, true, t0 + Duration::seconds(1));
        assert_eq!(out.events, vec![ProductionEvent::RollStarted]);
        assert_eq!(out.blue_run, Some(true));
        assert_eq!(state.phase, RollPhase::Wrapping);
    }

    #[test]
    fn full_cycle_matches_scenario_s1() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, false, t0);
        state.tick(true, false, true, t0 + Duration::seconds(1));
        let started = state.tick(true, true, true, t0 + Duration::seconds(2));
        assert_eq!(started.events, vec![ProductionEvent::RollStarted]);

        let wrap_end = state.tick(true, false, true, t0 + Duration::seconds(62));
        assert_eq!(wrap_end.green_finish, Some(true));
        assert_eq!(state.phase, RollPhase::AwaitingRemoval);

        let finished = state.tick(true, false, false, t0 + Duration::seconds(65));
        assert_eq!(
            finished.events,
            vec![ProductionEvent::RollFinished { duration_seconds: 63, duration_minutes: 1.05 }]
        );
        assert_eq!(state.phase, RollPhase::Idle);
    }

    #[test]
    fn awaiting_removal_timeout_force_finishes() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, true, t0);
        state.tick(true, true, true, t0 + Duration::seconds(1));
        state.tick(true, false, true, t0 + Duration::seconds(10));
        assert_eq!(state.phase, RollPhase::AwaitingRemoval);

        let out = state.tick(true, false, true, t0 + Duration::seconds(10 + 301));
        assert!(matches!(out.events.as_slice(), [ProductionEvent::RollFinished { .. }]));
        assert_eq!(state.phase, RollPhase::Idle);
    }

    #[test]
    fn anomaly_check_roll_falls_while_still_wrapping() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, true, t0);
        state.tick(true, true, true, t0 + Duration::seconds(1));
        let out = state.tick(true, true, false, t0 + Duration::seconds(5));
        assert!(out.anomaly);
        assert!(out.events.is_empty(), "no ROLL_FINISHED on an aborted session");
        assert_eq!(state.phase, RollPhase::Idle);
    }

    #[test]
    fn not_ready_suspends_tracking_without_spurious_edges() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, true, t0);
        state.tick(true, true, true, t0 + Duration::seconds(1)); // Wrapping starts

        // Drops out of ready with Run unchanged, comes back ready with Run
        // still unchanged: re-entering ready must not manufacture an edge.
        state.tick(false, true, true, t0 + Duration::seconds(2));
        let out = state.tick(true, true, true, t0 + Duration::seconds(3));
        assert!(out.blue_run.is_none() && out.green_finish.is_none());
        assert_eq!(state.phase, RollPhase::Wrapping);
    }

    #[test]
    fn rising_check_roll_schedules_a_delayed_capture() {
        let mut state = ProductionState::new();
        let t0 = Utc::now();
        state.tick(true, false, false, t0);
        state.tick(true, false, true, t0 + Duration::seconds(1));
        assert!(!state.take_due_capture(t0 + Duration::seconds(2)));
        assert!(state.take_due_capture(t0 + Duration::seconds(7)));
        assert!(!state.take_due_capture(t0 + Duration::seconds(8)), "fires only once");
    }

    #[test]
    fn needs_recovery_when_session_looks_open_on_startup() {
        let state = ProductionState::new();
        assert!(state.needs_recovery(true, true));
        assert!(state.needs_recovery(false, true));
        assert!(!state.needs_recovery(false, false));
    }

    #[test]
    fn recover_adopts_start_ts_and_resumes_the_right_phase() {
        let mut state = ProductionState::new();
        let start = Utc::now() - Duration::seconds(30);
        state.recover(start, true, Utc::now());
        assert_eq!(state.phase, RollPhase::Wrapping);
        assert_eq!(state.wrapping_start_ts, Some(start));
    }
}
