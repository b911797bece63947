use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wrapguard_core::config::{CameraConfig, DetectionGateConfig, ObbConfig, PoseConfig, RoiDrawConfig};
use wrapguard_core::{DetectionResult, Frame, MachineId, ObbStickyState, RoiPixels};

use crate::auto_start::AutoStartTimer;
use crate::models::{ObbModel, PoseModel};
use crate::obb_tracker;
use crate::overlay;
use crate::roi_rule;
use crate::smoothing::TemporalSmoother;

/// Runs the pose + OBB models over a machine's frame stream and emits one
/// `DetectionResult` per input frame (§4.3).
pub struct DetectorStage<P: PoseModel, O: ObbModel> {
    pub machine_id: MachineId,
    pose_model: P,
    obb_model: O,
    roi: RoiPixels,
    pose_cfg: PoseConfig,
    obb_cfg: ObbConfig,
    gate_cfg: DetectionGateConfig,
    camera_cfg: CameraConfig,
    draw_cfg: RoiDrawConfig,
    font: Option<ab_glyph::FontVec>,

    frame_count: u64,
    obb_frame_count: u64,
    last_person_detected: bool,
    last_pose_result: roi_rule::RoiRuleResult,
    smoother: TemporalSmoother,
    sticky_obb: ObbStickyState,
    auto_start: AutoStartTimer,
}

impl<P: PoseModel, O: ObbModel> DetectorStage<P, O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine_id: MachineId,
        pose_model: P,
        obb_model: O,
        roi: RoiPixels,
        pose_cfg: PoseConfig,
        obb_cfg: ObbConfig,
        gate_cfg: DetectionGateConfig,
        camera_cfg: CameraConfig,
        draw_cfg: RoiDrawConfig,
    ) -> Self {
        let smoother = TemporalSmoother::new(
            pose_cfg.detection_memory_frames,
            pose_cfg.min_detections_for_alarm,
            pose_cfg.use_temporal_smoothing,
        );
        let font = overlay::load_font(draw_cfg.font_path.as_deref());
        DetectorStage {
            machine_id,
            pose_model,
            obb_model,
            roi,
            pose_cfg,
            obb_cfg,
            gate_cfg,
            camera_cfg,
            draw_cfg,
            font,
            frame_count: 0,
            obb_frame_count: 0,
            last_person_detected: false,
            last_pose_result: roi_rule::RoiRuleResult::default(),
            smoother,
            sticky_obb: ObbStickyState::default(),
            auto_start: AutoStartTimer::new(),
        }
    }

    /// Consumes frames from `frame_rx`, runs inference per §4.3.1–§4.3.6, and
    /// sends a `DetectionResult` on `result_tx` for every frame received.
    /// `di_gate_rx` mirrors the DI-gate boolean the LogicStage observes.
    pub async fn run(
        mut self,
        mut frame_rx: mpsc::Receiver<std::sync::Arc<Frame>>,
        result_tx: mpsc::Sender<DetectionResult>,
        mut di_gate_rx: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                f = frame_rx.recv() => match f {
                    Some(f) => f,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };

            let di_enabled = !self.gate_cfg.enable_detection_on_di || *di_gate_rx.borrow();
            let result = self.process_frame(&frame, di_enabled);

            if result_tx.send(result).await.is_err() {
                warn!(machine = %self.machine_id, "detection result receiver dropped, stopping");
                break;
            }
        }
    }

    fn process_frame(&mut self, frame: &Frame, di_enabled: bool) -> DetectionResult {
        let now = Utc::now();

        if self.gate_cfg.enable_detection_on_di && !di_enabled {
            return DetectionResult::gated(now, &self.sticky_obb);
        }

        self.frame_count += 1;
        let adaptive_skip = if self.last_person_detected {
            self.pose_cfg.frame_skip.max(1)
        } else {
            (self.pose_cfg.frame_skip * 3).max(1)
        };

        let run_pose = self.frame_count % adaptive_skip as u64 == 0;
        let pose_result = if run_pose {
            match self.pose_model.infer(&frame.pixels) {
                Ok(poses) => {
                    let evaluated = roi_rule::evaluate(&poses, &self.roi, &self.pose_cfg);
                    self.last_pose_result = evaluated;
                    debug!(machine = %self.machine_id, count = self.last_pose_result.person_count, "pose inference ran");
                    &self.last_pose_result
                }
                Err(e) => {
                    warn!(machine = %self.machine_id, error = %e, "pose inference failed, reusing last result");
                    &self.last_pose_result
                }
            }
        } else {
            &self.last_pose_result
        };

        let raw_detected = pose_result.raw_in_roi;
        let person_count = pose_result.person_count;
        let person_boxes = pose_result.person_boxes.clone();
        self.last_person_detected = raw_detected;
        let person_in_roi = self.smoother.push(raw_detected);

        self.obb_frame_count += 1;
        if self.obb_frame_count % self.obb_cfg.frame_skip.max(1) as u64 == 0 {
            match self.obb_model.infer(&frame.pixels) {
                Ok(instances) => obb_tracker::reduce(&instances, self.obb_cfg.clamp_present_threshold, &mut self.sticky_obb),
                Err(e) => warn!(machine = %self.machine_id, error = %e, "obb inference failed, keeping sticky state"),
            }
        }

        let outcome = self.auto_start.evaluate(
            self.sticky_obb.clamp_detected,
            person_in_roi,
            self.obb_cfg.auto_start_delay_sec,
            now,
        );

        let mut result = DetectionResult {
            ts: now,
            person_in_roi,
            person_count,
            raw_detected,
            clamp_detected: self.sticky_obb.clamp_detected,
            clamp_conf: self.sticky_obb.clamp_conf,
            clamp_polygon: self.sticky_obb.clamp_polygon,
            clamp_angle_deg: self.sticky_obb.clamp_angle_deg,
            paper_roll_detected: self.sticky_obb.paper_roll_detected,
            auto_start_countdown_sec: outcome.countdown_sec,
            auto_start_signal: outcome.signal,
            person_boxes,
            annotated_jpeg: None,
            clean_jpeg: None,
        };

        let annotated = overlay::render_annotated(
            &frame.pixels,
            &self.roi,
            &result,
            &self.draw_cfg,
            di_enabled,
            self.font.as_ref(),
        );
        match overlay::encode_jpeg(
            &annotated,
            self.camera_cfg.display_width,
            self.camera_cfg.display_height,
            self.camera_cfg.jpeg_quality,
        ) {
            Ok(bytes) => result.annotated_jpeg = Some(bytes),
            Err(e) => warn!(machine = %self.machine_id, error = %e, "failed to encode annotated jpeg"),
        }
        match overlay::encode_jpeg(
            &frame.pixels,
            self.camera_cfg.display_width,
            self.camera_cfg.display_height,
            self.camera_cfg.jpeg_quality,
        ) {
            Ok(bytes) => result.clean_jpeg = Some(bytes),
            Err(e) => warn!(machine = %self.machine_id, error = %e, "failed to encode clean jpeg"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FixedModel, ObbInstance, PersonPose};
    use image::RgbImage;
    use wrapguard_core::{Keypoint, RoiNorm};

    fn pose_cfg() -> PoseConfig {
        PoseConfig {
            model_path: "pose.onnx".into(),
            confidence: 0.5,
            img_size: 640,
            frame_skip: 1,
            half_precision: false,
            keypoints_to_check: (0..17).collect(),
            keypoint_conf_thres: 0.25,
            keypoints_min_in_roi: 1,
            fallback_to_bbox: true,
            intersect_threshold: 0.3,
            use_temporal_smoothing: false,
            detection_memory_frames: 5,
            min_detections_for_alarm: 1,
        }
    }

    fn obb_cfg() -> ObbConfig {
        ObbConfig {
            model_path: "obb.onnx".into(),
            confidence: 0.5,
            frame_skip: 1,
            clamp_present_threshold: 0.5,
            clamp_class_id: 0,
            auto_start_delay_sec: 1.0,
        }
    }

    fn camera_cfg() -> CameraConfig {
        CameraConfig {
            rtsp_url: "rtsp://example".into(),
            display_width: 64,
            display_height: 64,
            jpeg_quality: 80,
        }
    }

    fn stage(
        pose_script: Vec<Vec<PersonPose>>,
        obb_script: Vec<Vec<ObbInstance>>,
    ) -> DetectorStage<FixedModel<Vec<PersonPose>>, FixedModel<Vec<ObbInstance>>> {
        let roi = RoiNorm::new(0.0, 0.0, 1.0, 1.0).unwrap().to_pixels(64, 64);
        DetectorStage::new(
            MachineId::A,
            FixedModel::new(pose_script),
            FixedModel::new(obb_script),
            roi,
            pose_cfg(),
            obb_cfg(),
            DetectionGateConfig { enable_detection_on_di: false },
            camera_cfg(),
            RoiDrawConfig::default(),
        )
    }

    fn blank_frame() -> Frame {
        Frame::new(RgbImage::new(64, 64), Utc::now())
    }

    #[test]
    fn person_in_roi_emits_true_and_jpegs() {
        let pose = PersonPose {
            keypoints: vec![Keypoint { x: 32.0, y: 32.0, confidence: 0.9 }],
            bbox_xyxy: (20.0, 20.0, 40.0, 40.0),
            confidence: 0.9,
        };
        let mut stage = stage(vec![vec![pose]], vec![vec![]]);
        let result = stage.process_frame(&blank_frame(), true);
        assert!(result.person_in_roi);
        assert_eq!(result.person_count, 1);
        assert_eq!(result.person_boxes, vec![(20.0, 20.0, 40.0, 40.0)]);
        assert!(result.annotated_jpeg.is_some());
        assert!(result.clean_jpeg.is_some());
    }

    #[test]
    fn gate_disabled_skips_inference_and_labels_disabled() {
        let mut stage = stage(vec![vec![]], vec![vec![]]);
        stage.gate_cfg = DetectionGateConfig { enable_detection_on_di: true };
        let result = stage.process_frame(&blank_frame(), false);
        assert!(!result.person_in_roi);
        assert!(result.annotated_jpeg.is_none());
    }

    #[test]
    fn clamp_detection_feeds_auto_start_timer() {
        let clamp = ObbInstance {
            class_id: 0,
            confidence: 0.9,
            polygon: [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
            angle_deg: 0.0,
        };
        let mut stage = stage(vec![vec![]], vec![vec![clamp], vec![]]);
        let first = stage.process_frame(&blank_frame(), true);
        assert!(first.clamp_detected);
        let second = stage.process_frame(&blank_frame(), true);
        assert!(!second.clamp_detected);
        assert!(second.auto_start_countdown_sec.is_some());
    }
}
