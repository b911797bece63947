//! End-to-end replays of spec §9's scenario catalog, driving `LogicStage`
//! through its public `tick` exactly the way `run` would, just with
//! synthetic timestamps instead of real wall-clock waits. Covers the
//! scenarios that are observable at the `LogicStage` level: S1, S2, the
//! logic-facing slice of S3, and S6. S4 (timer restart) and S5 (Modbus
//! reconnection/backoff) live below this layer — S4 in `auto_start.rs`'s own
//! unit tests, S5 in `wrapguard-modbus`'s worker tests — and aren't
//! replayed here.

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use wrapguard_core::addresses::{coil, DiAddresses};
use wrapguard_core::config::{CaptureConfig, SafetyConfig};
use wrapguard_core::modbus_types::IoType;
use wrapguard_core::{DetectionResult, DoCommand, Event, EventKind, IoSnapshot, MachineId};
use wrapguard_logic::LogicStage;
use wrapguard_store::{EventSink, FakeEventSink};

fn safety_cfg() -> SafetyConfig {
    SafetyConfig { auto_stop_on_person: true, stop_cooldown_sec: 3.0, auto_reset_on_clear: false }
}

fn capture_cfg() -> CaptureConfig {
    let dir = std::env::temp_dir().join(format!("wrapguard-logic-scenarios-{:?}", std::thread::current().id()));
    let _ = std::fs::remove_dir_all(&dir);
    CaptureConfig {
        capture_dir: dir.join("captures"),
        production_capture_dir: dir.join("production"),
        capture_on_auto_stop: true,
        capture_on_roll_detected: true,
        capture_on_roll_start: true,
        capture_on_roll_finish: true,
    }
}

fn di_snapshot(machine: MachineId, ready: bool, run: bool, check_roll: bool, check_film: bool) -> IoSnapshot {
    let addrs = DiAddresses::for_machine(machine);
    let mut values = std::collections::BTreeMap::new();
    values.insert(addrs.machine_ready, ready);
    values.insert(addrs.run, run);
    values.insert(addrs.check_roll, check_roll);
    values.insert(addrs.check_film, check_film);
    IoSnapshot { io_type: IoType::Di, connected: true, values, ts: Utc::now(), err_text: None }
}

fn drain(rx: &mut mpsc::Receiver<DoCommand>) -> Vec<DoCommand> {
    let mut out = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        out.push(cmd);
    }
    out
}

fn idle_detections() -> mpsc::Receiver<DetectionResult> {
    mpsc::channel(4).1
}

fn detection(person_in_roi: bool) -> DetectionResult {
    DetectionResult {
        ts: Utc::now(),
        person_in_roi,
        person_count: if person_in_roi { 1 } else { 0 },
        raw_detected: person_in_roi,
        clamp_detected: false,
        clamp_conf: 0.0,
        clamp_polygon: None,
        clamp_angle_deg: None,
        paper_roll_detected: false,
        auto_start_countdown_sec: None,
        auto_start_signal: false,
        person_boxes: Vec::new(),
        annotated_jpeg: Some(vec![0xFF, 0xD8, 0xFF, 0xD9]),
        clean_jpeg: Some(vec![0xFF, 0xD8, 0xFF, 0xD9]),
    }
}

/// S1: starting Idle+Ready, the DI stream t=0/1/2/62/65 produces
/// `ROLL_STARTED`(ts≈2) then `ROLL_FINISHED`(ts≈65, 63s/1.05min), with
/// `BlueRun` on at t≈2 and `GreenFinish` on at t≈62, off at t≈65.
#[tokio::test]
async fn s1_safe_wrap_cycle_emits_started_then_finished_with_coil_writes() {
    let sink = FakeEventSink::new();
    let mut stage = LogicStage::new(MachineId::A, safety_cfg(), capture_cfg(), sink.clone());
    let (do_tx, mut do_rx) = mpsc::channel(16);
    let t0 = Utc::now();

    let mut rx = idle_detections();
    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, false, true), &do_tx, t0).await;
    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, true, true), &do_tx, t0 + Duration::seconds(1)).await;
    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, true, true, true), &do_tx, t0 + Duration::seconds(2)).await;
    let writes_at_start = drain(&mut do_rx);
    assert!(writes_at_start.contains(&DoCommand { addr: coil::BLUE_RUN, value: true }));

    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, true, true), &do_tx, t0 + Duration::seconds(62)).await;
    let writes_at_62 = drain(&mut do_rx);
    assert!(writes_at_62.contains(&DoCommand { addr: coil::GREEN_FINISH, value: true }));

    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, false, true), &do_tx, t0 + Duration::seconds(65)).await;
    let writes_at_65 = drain(&mut do_rx);
    assert!(writes_at_65.contains(&DoCommand { addr: coil::GREEN_FINISH, value: false }));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::RollStarted);
    assert_eq!(events[1].kind, EventKind::RollFinished);
    assert_eq!(events[1].payload.get("durationSeconds").and_then(|v| v.as_i64()), Some(63));
    assert_eq!(events[1].payload.get("durationMinutes").and_then(|v| v.as_f64()), Some(1.05));
}

/// S2: during S1's wrap, a person incursion at t≈30 pulses STOP and records
/// `AUTO_STOP` with a captured frame path; clearing at t≈35 with
/// `AUTO_RESET_ON_CLEAR=false` records only `PERSON_EXIT_ROI`. The roll
/// still finishes normally at t≈65.
#[tokio::test]
async fn s2_person_incursion_during_wrap_pulses_stop_and_still_finishes_the_roll() {
    let sink = FakeEventSink::new();
    let mut stage = LogicStage::new(MachineId::A, safety_cfg(), capture_cfg(), sink.clone());
    let (do_tx, mut do_rx) = mpsc::channel(16);
    let t0 = Utc::now();
    let di_running = di_snapshot(MachineId::A, true, true, true, true);

    let mut rx = idle_detections();
    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, false, true), &do_tx, t0).await;
    stage.tick(&mut rx, &di_snapshot(MachineId::A, true, false, true, true), &do_tx, t0 + Duration::seconds(1)).await;
    stage.tick(&mut rx, &di_running, &do_tx, t0 + Duration::seconds(2)).await;
    drain(&mut do_rx);

    let (tx, mut rx30) = mpsc::channel(4);
    tx.send(detection(true)).await.unwrap();
    stage.tick(&mut rx30, &di_running, &do_tx, t0 + Duration::seconds(30)).await;
    let writes_at_30 = drain(&mut do_rx);
    assert!(writes_at_30.contains(&DoCommand { addr: coil::STOP, value: true }));

    let (tx2, mut rx35) = mpsc::channel(4);
    tx2.send(detection(false)).await.unwrap();
    stage.tick(&mut rx35, &di_running, &do_tx, t0 + Duration::seconds(35)).await;

    stage.tick(&mut idle_detections(), &di_snapshot(MachineId::A, true, false, true, true), &do_tx, t0 + Duration::seconds(62)).await;
    stage.tick(&mut idle_detections(), &di_snapshot(MachineId::A, true, false, false, true), &do_tx, t0 + Duration::seconds(65)).await;

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].kind, EventKind::RollStarted);
    assert_eq!(events[1].kind, EventKind::AutoStop);
    assert!(events[1].payload.contains_key("capturedFramePath"));
    assert_eq!(events[2].kind, EventKind::PersonExitRoi);
    assert_eq!(events[3].kind, EventKind::RollFinished);
    assert_eq!(events[3].payload.get("durationSeconds").and_then(|v| v.as_i64()), Some(63));
}

/// S3 (logic-facing slice): once the detector's clamp-release timer decides
/// to signal auto-start, `LogicStage` re-verifies DI state and, finding it
/// unchanged (Ready, not Run, CheckRoll present), pulses START and records
/// `AUTO_START`. The detector-side countdown itself is `auto_start.rs`'s
/// concern and is covered there.
#[tokio::test]
async fn s3_clamp_release_auto_start_fires_when_di_state_still_matches() {
    let sink = FakeEventSink::new();
    let mut stage = LogicStage::new(MachineId::A, safety_cfg(), capture_cfg(), sink.clone());
    let (do_tx, mut do_rx) = mpsc::channel(16);

    let mut signal = detection(false);
    signal.auto_start_signal = true;
    let (tx, mut rx) = mpsc::channel(4);
    tx.send(signal).await.unwrap();

    let di = di_snapshot(MachineId::A, true, false, true, true);
    stage.tick(&mut rx, &di, &do_tx, Utc::now()).await;

    let writes = drain(&mut do_rx);
    assert!(writes.contains(&DoCommand { addr: coil::START, value: true }));
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.events()[0].kind, EventKind::AutoStart);
}

/// S6: a crash mid-wrap (S1's t=30) leaves an unfinished `ROLL_STARTED` in
/// the event store. On restart, `LogicStage` observes `Run=true,
/// CheckRoll=true`, recovers the open session from ts=2, and the remaining
/// t=62/65 DI transitions still produce `ROLL_FINISHED` with
/// `durationSeconds = 65 - 2 = 63`.
#[tokio::test]
async fn s6_recovery_after_crash_finishes_the_roll_with_the_recovered_start_ts() {
    let sink = FakeEventSink::new();
    let t0 = Utc::now();
    sink.record(Event::new(MachineId::A, EventKind::RollStarted, t0 + Duration::seconds(2)))
        .await
        .unwrap();

    let mut stage = LogicStage::new(MachineId::A, safety_cfg(), capture_cfg(), sink.clone());
    let (do_tx, mut do_rx) = mpsc::channel(16);
    let di_running = di_snapshot(MachineId::A, true, true, true, true);

    // First tick after "restart": Run and CheckRoll already true, no matching
    // ROLL_FINISHED on record — this is exactly `needs_recovery`'s trigger.
    stage.tick(&mut idle_detections(), &di_running, &do_tx, t0 + Duration::seconds(30)).await;

    stage
        .tick(&mut idle_detections(), &di_snapshot(MachineId::A, true, false, true, true), &do_tx, t0 + Duration::seconds(62))
        .await;
    let writes_at_62 = drain(&mut do_rx);
    assert!(writes_at_62.contains(&DoCommand { addr: coil::GREEN_FINISH, value: true }));

    stage
        .tick(&mut idle_detections(), &di_snapshot(MachineId::A, true, false, false, true), &do_tx, t0 + Duration::seconds(65))
        .await;

    let events = sink.events();
    assert_eq!(events.len(), 2, "the seeded ROLL_STARTED plus the recovered roll's ROLL_FINISHED");
    assert_eq!(events[0].kind, EventKind::RollStarted);
    assert_eq!(events[1].kind, EventKind::RollFinished);
    assert_eq!(events[1].payload.get("durationSeconds").and_then(|v| v.as_i64()), Some(63));
}
