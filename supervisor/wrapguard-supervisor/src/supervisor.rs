use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wrapguard_camera::{CameraStage, FrameSlot, FrameSlotReader, RtspSource};
use wrapguard_core::config::{ModbusDeviceConfig, WrapguardConfig};
use wrapguard_core::{DetectionResult, DoCommand, Frame, IoSnapshot, IoType, MachineId, MachineStatusSnapshot, PulseCoil};
use wrapguard_detector::{DetectorStage, OrtObbModel, OrtPoseModel};
use wrapguard_logic::{pulse, LogicStage};
use wrapguard_modbus::{ModbusWorker, TcpConnector};
use wrapguard_store::SqliteEventSink;

/// §5: "the Supervisor waits up to 5 s per stage, then forcibly terminates".
const STAGE_SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);
const DETECTION_QUEUE_CAPACITY: usize = 5;
const FRAME_QUEUE_CAPACITY: usize = 2;
const DO_QUEUE_CAPACITY: usize = 16;
const DI_SNAPSHOT_QUEUE_CAPACITY: usize = 10;

/// The read-only handles the outer process (an HTTP/UI layer, or the
/// integration tests) can use to observe one machine from the outside,
/// without touching anything `LogicStage` or `DetectorStage` own (§6.4).
pub struct MachineViews {
    pub latest_annotated_frame: watch::Receiver<Option<Arc<Vec<u8>>>>,
    pub status: watch::Receiver<MachineStatusSnapshot>,
    do_tx: mpsc::Sender<DoCommand>,
}

/// Owns every spawned stage task for the process's lifetime and the
/// collaborator-facing views for both machines.
pub struct Supervisor {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    pub views: HashMap<MachineId, MachineViews>,
}

impl Supervisor {
    /// Starts every stage leaf-first (§5): the DI worker and each machine's
    /// camera/detector pair come up before the `LogicStage` that depends on
    /// them, so nothing is ever polling a channel nobody will ever write to.
    pub async fn start(
        config: &WrapguardConfig,
        event_db_path: &Path,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let event_sink = SqliteEventSink::open(event_db_path)?;
        let mut handles = Vec::new();
        let mut views = HashMap::new();

        let di_watch_rx = spawn_di_worker(config, &mut handles, cancel.clone());

        for machine in MachineId::ALL {
            let do_cfg = match machine {
                MachineId::A => &config.modbus.do_a,
                MachineId::B => &config.modbus.do_b,
            };
            let view = spawn_machine(machine, config, do_cfg, event_sink.clone(), di_watch_rx.clone(), &mut handles, cancel.clone()).await?;
            views.insert(machine, view);
        }

        Ok(Supervisor { handles, views })
    }

    /// §4.1's `PulseCoil(machineId, which)`: writes the coil on, then its
    /// independently-scheduled OFF 300ms later. Each call is queued on the
    /// machine's DO command channel rather than coalesced with any pulse
    /// already in flight for a different coil.
    pub fn pulse_coil(&self, machine: MachineId, which: PulseCoil) -> anyhow::Result<()> {
        let view = self
            .views
            .get(&machine)
            .ok_or_else(|| anyhow::anyhow!("no such machine: {machine}"))?;
        pulse::fire(&view.do_tx, which.addr());
        Ok(())
    }

    /// Cancels every stage and waits up to 5s per stage for it to exit
    /// cooperatively before giving up on it and moving to the next.
    pub async fn shutdown(self) {
        self.cancel_and_wait().await;
    }

    async fn cancel_and_wait(self) {
        for (name, handle) in self.handles {
            if tokio::time::timeout(STAGE_SHUTDOWN_BUDGET, handle).await.is_err() {
                warn!(stage = name, "stage did not stop within its shutdown budget, abandoning it");
            }
        }
    }
}

fn spawn_di_worker(
    config: &WrapguardConfig,
    handles: &mut Vec<(&'static str, JoinHandle<()>)>,
    cancel: CancellationToken,
) -> watch::Receiver<IoSnapshot> {
    let (di_tx, di_rx_raw) = mpsc::channel::<IoSnapshot>(DI_SNAPSHOT_QUEUE_CAPACITY);
    let (di_watch_tx, di_watch_rx) =
        watch::channel(IoSnapshot::disconnected(IoType::Di, Utc::now(), "starting up"));
    handles.push(("di-bridge", tokio::spawn(bridge_di_snapshots(di_rx_raw, di_watch_tx))));

    let connector = tcp_connector(&config.modbus.di);
    // DI is read-only from LogicStage's perspective; no commands are ever sent.
    let (_unused_tx, unused_rx) = mpsc::channel::<DoCommand>(1);
    let worker = ModbusWorker::new(IoType::Di, config.modbus.di.addr_start, config.modbus.di.addr_end, connector, unused_rx, di_tx);
    handles.push(("modbus-di", tokio::spawn(worker.run(cancel))));

    di_watch_rx
}

/// Republishes each DI read cycle (latest-wins) to both machines' `LogicStage`s.
async fn bridge_di_snapshots(mut rx: mpsc::Receiver<IoSnapshot>, tx: watch::Sender<IoSnapshot>) {
    while let Some(snapshot) = rx.recv().await {
        let _ = tx.send(snapshot);
    }
}

fn tcp_connector(cfg: &ModbusDeviceConfig) -> TcpConnector {
    TcpConnector {
        host: cfg.ip.clone(),
        port: cfg.port,
        unit_id: cfg.unit_id,
        timeout: Duration::from_secs(cfg.timeout_secs),
    }
}

async fn spawn_machine(
    machine: MachineId,
    config: &WrapguardConfig,
    do_cfg: &ModbusDeviceConfig,
    event_sink: SqliteEventSink,
    di_watch_rx: watch::Receiver<IoSnapshot>,
    handles: &mut Vec<(&'static str, JoinHandle<()>)>,
    cancel: CancellationToken,
) -> anyhow::Result<MachineViews> {
    let machine_cfg = config.machine(machine)?;

    let (frame_slot, mut frame_reader) = FrameSlot::new();
    let source = RtspSource::new(machine_cfg.camera.rtsp_url.clone())?;
    let camera = CameraStage::new(machine, machine_cfg.roi);
    handles.push(("camera", tokio::spawn(camera.run(source, frame_slot, cancel.clone()))));

    info!(%machine, "waiting for the first camera frame to establish the pixel ROI");
    let first_frame = wait_for_first_frame(&mut frame_reader, &cancel)
        .await
        .ok_or_else(|| anyhow::anyhow!("machine {machine} stopped before a frame arrived"))?;
    let roi_pixels = machine_cfg.roi.to_pixels(first_frame.width(), first_frame.height());

    let pose_model = load_pose_model(&config.pose).await?;
    let obb_model = load_obb_model(&config.obb, config.pose.img_size).await?;

    let (frame_tx, frame_rx) = mpsc::channel::<Arc<Frame>>(FRAME_QUEUE_CAPACITY);
    let _ = frame_tx.try_send(first_frame);
    handles.push(("frame-bridge", tokio::spawn(bridge_frames(frame_reader, frame_tx, cancel.clone()))));

    let (di_gate_tx, di_gate_rx) = watch::channel(false);
    let (detection_tx, detection_rx) = mpsc::channel::<DetectionResult>(DETECTION_QUEUE_CAPACITY);

    let detector = DetectorStage::new(
        machine,
        pose_model,
        obb_model,
        roi_pixels,
        config.pose.clone(),
        config.obb.clone(),
        config.detection_gate.clone(),
        machine_cfg.camera.clone(),
        config.roi_draw.clone(),
    );
    handles.push(("detector", tokio::spawn(detector.run(frame_rx, detection_tx, di_gate_rx, cancel.clone()))));

    let (annotated_tx, annotated_rx) = watch::channel(None);
    let (logic_detection_tx, logic_detection_rx) = mpsc::channel::<DetectionResult>(DETECTION_QUEUE_CAPACITY);
    handles.push((
        "detection-bridge",
        tokio::spawn(bridge_detections(detection_rx, annotated_tx, logic_detection_tx)),
    ));

    let (do_tx_raw, do_rx) = mpsc::channel::<DoCommand>(DO_QUEUE_CAPACITY);
    let do_connector = tcp_connector(do_cfg);
    let do_worker = ModbusWorker::new(IoType::Do(machine), do_cfg.addr_start, do_cfg.addr_end, do_connector, do_rx, mpsc_drop_sink());
    handles.push(("modbus-do", tokio::spawn(do_worker.run(cancel.clone()))));

    let pulse_do_tx = do_tx_raw.clone();

    let (status_tx, status_rx) = watch::channel(MachineStatusSnapshot::default());
    let logic = LogicStage::new(machine, config.safety.clone(), config.capture.clone(), event_sink);
    handles.push((
        "logic",
        tokio::spawn(logic.run(logic_detection_rx, di_watch_rx, do_tx_raw, di_gate_tx, status_tx, cancel)),
    ));

    Ok(MachineViews { latest_annotated_frame: annotated_rx, status: status_rx, do_tx: pulse_do_tx })
}

/// `ModbusWorker` always needs somewhere to publish its read snapshots; the
/// DO workers' snapshots carry nothing `LogicStage` needs (it drives coils
/// open-loop), so this sink is sized for one in-flight value and dropped.
fn mpsc_drop_sink() -> mpsc::Sender<IoSnapshot> {
    let (tx, _rx) = mpsc::channel(1);
    tx
}

async fn wait_for_first_frame(reader: &mut FrameSlotReader, cancel: &CancellationToken) -> Option<Arc<Frame>> {
    if let Some(frame) = reader.current() {
        return Some(frame);
    }
    tokio::select! {
        frame = reader.changed() => frame,
        _ = cancel.cancelled() => None,
    }
}

/// Forwards every newly published frame into the detector's input queue.
/// When the detector is still busy with the previous frame the queue stays
/// full and this frame is skipped — §4.3 only promises "a" `DetectionResult`
/// per consumed frame, not every camera frame gets inferred on.
async fn bridge_frames(mut reader: FrameSlotReader, tx: mpsc::Sender<Arc<Frame>>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            f = reader.changed() => f,
            _ = cancel.cancelled() => break,
        };
        let Some(frame) = frame else { break };
        if tx.try_send(frame).is_err() {
            tracing::trace!("detector still busy, dropping a frame");
        }
    }
}

/// Taps the annotated JPEG for the `LatestAnnotatedFrame` view (§6.4) and
/// forwards every `DetectionResult` on to `LogicStage`'s bounded queue.
async fn bridge_detections(
    mut rx: mpsc::Receiver<DetectionResult>,
    annotated_tx: watch::Sender<Option<Arc<Vec<u8>>>>,
    logic_tx: mpsc::Sender<DetectionResult>,
) {
    while let Some(result) = rx.recv().await {
        if let Some(jpeg) = &result.annotated_jpeg {
            let _ = annotated_tx.send(Some(Arc::new(jpeg.clone())));
        }
        if logic_tx.try_send(result).is_err() {
            warn!("logic stage still busy, dropping a detection result");
        }
    }
}

/// `Session::builder().commit_from_file()` is a synchronous, CPU-bound call;
/// it runs on a blocking thread so it doesn't stall the runtime at startup.
async fn load_pose_model(cfg: &wrapguard_core::config::PoseConfig) -> anyhow::Result<OrtPoseModel> {
    let path = cfg.model_path.clone();
    let (img_size, confidence) = (cfg.img_size, cfg.confidence);
    Ok(tokio::task::spawn_blocking(move || OrtPoseModel::load(&path, img_size, confidence)).await??)
}

/// The OBB model shares the pose model's letterbox input size; `ObbConfig`
/// has no size of its own because the two models are trained as a pair.
async fn load_obb_model(cfg: &wrapguard_core::config::ObbConfig, img_size: u32) -> anyhow::Result<OrtObbModel> {
    let path = cfg.model_path.clone();
    let confidence = cfg.confidence;
    Ok(tokio::task::spawn_blocking(move || OrtObbModel::load(&path, img_size, confidence)).await??)
}
