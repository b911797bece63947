use chrono::{DateTime, Utc};

/// One person's detected keypoints and derived in-ROI state, retained only
/// long enough to feed the ROI rule and the overlay renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// Oriented bounding box polygon, four corners in image pixel space,
/// ordered consistently with the originating model's convention.
pub type ObbPolygon = [(f32, f32); 4];

/// Output of `DetectorStage`, emitted once per input frame (whether or not
/// inference actually ran on that frame).
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub ts: DateTime<Utc>,
    pub person_in_roi: bool,
    pub person_count: u32,
    pub raw_detected: bool,
    pub clamp_detected: bool,
    pub clamp_conf: f32,
    pub clamp_polygon: Option<ObbPolygon>,
    pub clamp_angle_deg: Option<f32>,
    pub paper_roll_detected: bool,
    pub auto_start_countdown_sec: Option<f32>,
    pub auto_start_signal: bool,
    /// Pixel-space bounding boxes of every detected person, drawn on the
    /// annotated overlay alongside the ROI rectangle (§4.3.7).
    pub person_boxes: Vec<(f32, f32, f32, f32)>,
    pub annotated_jpeg: Option<Vec<u8>>,
    pub clean_jpeg: Option<Vec<u8>>,
}

impl DetectionResult {
    /// The "DETECTION DISABLED" result emitted while the DI gate is off.
    pub fn gated(ts: DateTime<Utc>, sticky_obb: &ObbStickyState) -> Self {
        DetectionResult {
            ts,
            person_in_roi: false,
            person_count: 0,
            raw_detected: false,
            clamp_detected: sticky_obb.clamp_detected,
            clamp_conf: sticky_obb.clamp_conf,
            clamp_polygon: sticky_obb.clamp_polygon,
            clamp_angle_deg: sticky_obb.clamp_angle_deg,
            paper_roll_detected: sticky_obb.paper_roll_detected,
            auto_start_countdown_sec: None,
            auto_start_signal: false,
            person_boxes: Vec::new(),
            annotated_jpeg: None,
            clean_jpeg: None,
        }
    }
}

/// OBB state persisted across frames where OBB inference is skipped
/// (§4.3.5 "sticky" behavior) or where the pose gate is closed.
#[derive(Debug, Clone, Default)]
pub struct ObbStickyState {
    pub clamp_detected: bool,
    pub clamp_conf: f32,
    pub clamp_polygon: Option<ObbPolygon>,
    pub clamp_angle_deg: Option<f32>,
    pub paper_roll_detected: bool,
}
