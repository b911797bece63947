use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wrapguard_core::addresses::{coil, DiAddresses};
use wrapguard_core::config::{CaptureConfig, SafetyConfig};
use wrapguard_core::{DetectionResult, DoCommand, Event, EventKind, IoSnapshot, MachineId, MachineStatusSnapshot};
use wrapguard_store::EventSink;

use crate::capture;
use crate::production::{ProductionEvent, ProductionState};
use crate::pulse;
use crate::safety::{self, SafetyAction, SafetyState};

const TICK_PERIOD_MS: u64 = 50; // 20 Hz, per §4.4's "tick rate >= 20 Hz"
const DETECTION_DRAIN_BUDGET: usize = 10;

/// Drives one machine's safety policy, signal lamps, and production roll
/// lifecycle from DetectionResult/DI input, per §4.4.
pub struct LogicStage<S: EventSink> {
    machine_id: MachineId,
    di: DiAddresses,
    safety_cfg: SafetyConfig,
    capture_cfg: CaptureConfig,
    event_sink: S,

    safety_state: SafetyState,
    production: ProductionState,
    last_detection: Option<DetectionResult>,
    recovery_attempted: bool,

    last_ready_lamp: Option<bool>,
    last_film_alarm_lamp: Option<bool>,

    prev_auto_mode: Option<bool>,
    auto_mode_since: Option<DateTime<Utc>>,
}

impl<S: EventSink> LogicStage<S> {
    pub fn new(machine_id: MachineId, safety_cfg: SafetyConfig, capture_cfg: CaptureConfig, event_sink: S) -> Self {
        LogicStage {
            machine_id,
            di: DiAddresses::for_machine(machine_id),
            safety_cfg,
            capture_cfg,
            event_sink,
            safety_state: SafetyState::default(),
            production: ProductionState::new(),
            last_detection: None,
            recovery_attempted: false,
            last_ready_lamp: None,
            last_film_alarm_lamp: None,
            prev_auto_mode: None,
            auto_mode_since: None,
        }
    }

    /// Consumes DI snapshots (latest-wins) and DetectionResults (FIFO,
    /// bounded per tick) at ≥ 20 Hz, driving DO coils and the EventSink.
    /// `di_gate_tx` mirrors CheckRoll to the DetectorStage's DI gate;
    /// `status_tx` publishes a collaborator-facing snapshot (§6.4) once per
    /// tick for dashboards/UI, without exposing internal state.
    pub async fn run(
        mut self,
        mut detection_rx: mpsc::Receiver<DetectionResult>,
        di_rx: watch::Receiver<IoSnapshot>,
        do_tx: mpsc::Sender<DoCommand>,
        di_gate_tx: watch::Sender<bool>,
        status_tx: watch::Sender<MachineStatusSnapshot>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(TICK_PERIOD_MS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let di = di_rx.borrow().clone();
                    if !di.connected {
                        continue;
                    }
                    let now = Utc::now();
                    self.tick(&mut detection_rx, &di, &do_tx, now).await;
                    let _ = di_gate_tx.send(di.get(self.di.detection_gate()));
                    let _ = status_tx.send(self.status_snapshot());
                }
                _ = cancel.cancelled() => break,
            }
        }
        info!(machine = %self.machine_id, "logic stage stopped");
    }

    /// The single-tick state transition `run` drives at 20 Hz. Exposed so
    /// integration tests (`tests/scenarios.rs`) can replay a scenario's
    /// timeline deterministically via synthetic `now` values, the same way
    /// the colocated unit tests below do.
    pub async fn tick(
        &mut self,
        detection_rx: &mut mpsc::Receiver<DetectionResult>,
        di: &IoSnapshot,
        do_tx: &mpsc::Sender<DoCommand>,
        now: DateTime<Utc>,
    ) {
        self.mirror_status(di, do_tx);
        self.update_auto_mode(di, now);

        let mut budget = DETECTION_DRAIN_BUDGET;
        while budget > 0 {
            let Ok(det) = detection_rx.try_recv() else { break };
            budget -= 1;
            self.process_detection(&det, di, do_tx, now).await;
            self.last_detection = Some(det);
        }

        if self.production.take_due_capture(now) && self.capture_cfg.capture_on_roll_detected {
            self.save_last_frame(now, "ROLL_DETECTED", false).await;
        }

        self.check_production(di, do_tx, now).await;
    }

    /// §4.4.1: ReadyLamp mirrors MachineReady; FilmAlarmLamp raises only
    /// while the machine is not running.
    fn mirror_status(&mut self, di: &IoSnapshot, do_tx: &mpsc::Sender<DoCommand>) {
        let ready = di.get(self.di.machine_ready);
        if self.last_ready_lamp != Some(ready) {
            self.last_ready_lamp = Some(ready);
            write_coil(do_tx, coil::READY_LAMP, ready);
        }

        let run = di.get(self.di.run);
        if !run {
            let film_alarm = !di.get(self.di.check_film);
            if self.last_film_alarm_lamp != Some(film_alarm) {
                self.last_film_alarm_lamp = Some(film_alarm);
                write_coil(do_tx, coil::FILM_ALARM_LAMP, film_alarm);
            }
        }
    }

    async fn process_detection(
        &mut self,
        det: &DetectionResult,
        di: &IoSnapshot,
        do_tx: &mpsc::Sender<DoCommand>,
        now: DateTime<Utc>,
    ) {
        match safety::evaluate(&self.safety_cfg, &mut self.safety_state, det.person_in_roi, det.person_count, now) {
            SafetyAction::AutoStop { person_count } => {
                pulse::fire(do_tx, coil::STOP);
                let mut event = Event::new(self.machine_id, EventKind::AutoStop, now)
                    .with("reason", "person_in_roi")
                    .with("personCount", person_count);
                if self.capture_cfg.capture_on_auto_stop {
                    if let Some(path) = self.save_jpeg(det.annotated_jpeg.as_deref(), now, "AUTOSTOP").await {
                        event = event.with("capturedFramePath", path);
                    }
                }
                self.record(event).await;
            }
            SafetyAction::AutoReset => {
                pulse::fire(do_tx, coil::RESET);
                self.record(Event::new(self.machine_id, EventKind::AutoReset, now)).await;
            }
            SafetyAction::PersonExitRoi => {
                self.record(Event::new(self.machine_id, EventKind::PersonExitRoi, now)).await;
            }
            SafetyAction::None => {}
        }

        if det.auto_start_signal {
            self.try_auto_start(di, do_tx, now).await;
        }
    }

    /// §4.4.3: re-verify readiness/state before acting on the detector's
    /// clamp-release signal; a stale signal is logged and discarded.
    async fn try_auto_start(&mut self, di: &IoSnapshot, do_tx: &mpsc::Sender<DoCommand>, now: DateTime<Utc>) {
        let ready = di.get(self.di.machine_ready);
        let run = di.get(self.di.run);
        let check_roll = di.get(self.di.check_roll);

        if ready && !run && check_roll {
            pulse::fire(do_tx, coil::START);
            self.record(Event::new(self.machine_id, EventKind::AutoStart, now)).await;
        } else {
            warn!(
                machine = %self.machine_id, ready, run, check_roll,
                "discarding stale auto-start signal, DI state no longer matches"
            );
        }
    }

    async fn check_production(&mut self, di: &IoSnapshot, do_tx: &mpsc::Sender<DoCommand>, now: DateTime<Utc>) {
        let ready = di.get(self.di.machine_ready);
        let run = di.get(self.di.run);
        let check_roll = di.get(self.di.check_roll);

        if !self.recovery_attempted {
            self.recovery_attempted = true;
            if self.production.needs_recovery(run, check_roll) {
                match self.event_sink.find_open_roll(self.machine_id).await {
                    Ok(Some(session)) => {
                        info!(machine = %self.machine_id, log_id = session.log_id, "recovered an open roll session");
                        self.production.recover(session.start_ts, run, now);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(machine = %self.machine_id, error = %e, "open-roll recovery query failed"),
                }
            }
        }

        let outcome = self.production.tick(ready, run, check_roll, now);

        if outcome.anomaly {
            warn!(machine = %self.machine_id, "abnormal production DI transition observed");
        }
        if let Some(v) = outcome.blue_run {
            write_coil(do_tx, coil::BLUE_RUN, v);
        }
        if let Some(v) = outcome.green_finish {
            write_coil(do_tx, coil::GREEN_FINISH, v);
        }

        for event in outcome.events {
            match event {
                ProductionEvent::RollStarted => {
                    let mut ev = Event::new(self.machine_id, EventKind::RollStarted, now);
                    if self.capture_cfg.capture_on_roll_start {
                        if let Some(path) = self.save_last_frame(now, "START", false).await {
                            ev = ev.with("capturedFramePath", path);
                        }
                    }
                    self.record(ev).await;
                }
                ProductionEvent::RollFinished { duration_seconds, duration_minutes } => {
                    let mut ev = Event::new(self.machine_id, EventKind::RollFinished, now)
                        .with("durationSeconds", duration_seconds)
                        .with("durationMinutes", duration_minutes);
                    if self.capture_cfg.capture_on_roll_finish {
                        if let Some(path) = self.save_last_frame(now, "FINISH", false).await {
                            ev = ev.with("capturedFramePath", path);
                        }
                    }
                    self.record(ev).await;
                }
            }
        }
    }

    /// Saves the most recently observed detection's clean (or annotated)
    /// JPEG to a dated capture path and returns the path, if both the frame
    /// and the write succeeded.
    async fn save_last_frame(&self, now: DateTime<Utc>, kind: &str, annotated: bool) -> Option<String> {
        let jpeg = self.last_detection.as_ref().and_then(|det| {
            if annotated {
                det.annotated_jpeg.as_deref()
            } else {
                det.clean_jpeg.as_deref()
            }
        });
        self.save_jpeg(jpeg, now, kind).await
    }

    async fn save_jpeg(&self, jpeg: Option<&[u8]>, now: DateTime<Utc>, kind: &str) -> Option<String> {
        let jpeg = jpeg?;
        let base = if kind == "AUTOSTOP" { &self.capture_cfg.capture_dir } else { &self.capture_cfg.production_capture_dir };
        let path = capture::path_for(base, self.machine_id, now, kind);
        match capture::save(&path, jpeg).await {
            Ok(()) => Some(path.display().to_string()),
            Err(_) => None,
        }
    }

    /// Tracks when the machine last flipped between auto and manual mode,
    /// so `status_snapshot` can report how long it has held its current mode.
    fn update_auto_mode(&mut self, di: &IoSnapshot, now: DateTime<Utc>) {
        let auto = di.get(self.di.auto_manual);
        if self.prev_auto_mode != Some(auto) {
            self.prev_auto_mode = Some(auto);
            self.auto_mode_since = Some(now);
        }
    }

    fn status_snapshot(&self) -> MachineStatusSnapshot {
        MachineStatusSnapshot {
            alarm_active: self.safety_state.auto_stop_active,
            last_stop_ts: self.safety_state.last_auto_stop_ts,
            auto_mode: self.prev_auto_mode.unwrap_or(false),
            auto_mode_since: self.auto_mode_since,
        }
    }

    async fn record(&self, event: Event) {
        debug!(machine = %self.machine_id, kind = %event.kind, "emitting event");
        if let Err(e) = self.event_sink.record(event).await {
            warn!(machine = %self.machine_id, error = %e, "failed to record event, continuing");
        }
    }
}

fn write_coil(do_tx: &mpsc::Sender<DoCommand>, addr: u16, value: bool) {
    if do_tx.try_send(DoCommand { addr, value }).is_err() {
        warn!(addr, "dropped coil write, DO command queue is full");
    }
}
