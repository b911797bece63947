use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roi::RoiNorm;
use crate::MachineId;

fn default_true() -> bool {
    true
}

/// RTSP source + display settings for one machine's camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub rtsp_url: String,
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_display_width() -> u32 {
    960
}
fn default_display_height() -> u32 {
    540
}
fn default_jpeg_quality() -> u8 {
    85
}

/// TCP connection settings for one Modbus device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusDeviceConfig {
    pub ip: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub addr_start: u16,
    pub addr_end: u16,
}

fn default_modbus_port() -> u16 {
    502
}
fn default_unit_id() -> u8 {
    1
}
fn default_timeout_secs() -> u64 {
    5
}

/// All three Modbus devices described in §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    pub do_a: ModbusDeviceConfig,
    pub do_b: ModbusDeviceConfig,
    pub di: ModbusDeviceConfig,
}

/// ROI drawing style, shared across both machines' overlays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiDrawConfig {
    #[serde(default = "default_roi_color")]
    pub normal_color_rgb: (u8, u8, u8),
    #[serde(default = "default_alarm_color")]
    pub alarm_color_rgb: (u8, u8, u8),
    #[serde(default = "default_box_color")]
    pub box_color_rgb: (u8, u8, u8),
    #[serde(default = "default_thickness")]
    pub thickness: u32,
    /// TrueType/OpenType font for status text. When unset, the overlay
    /// still draws the ROI rectangle and clamp polygon but skips text.
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

fn default_roi_color() -> (u8, u8, u8) {
    (0, 200, 0)
}
fn default_alarm_color() -> (u8, u8, u8) {
    (0, 0, 220)
}
fn default_box_color() -> (u8, u8, u8) {
    (220, 160, 0)
}
fn default_thickness() -> u32 {
    2
}

impl Default for RoiDrawConfig {
    fn default() -> Self {
        RoiDrawConfig {
            normal_color_rgb: default_roi_color(),
            alarm_color_rgb: default_alarm_color(),
            box_color_rgb: default_box_color(),
            thickness: default_thickness(),
            font_path: None,
        }
    }
}

/// Safety auto-stop/auto-reset tunables (§4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_true")]
    pub auto_stop_on_person: bool,
    #[serde(default = "default_stop_cooldown")]
    pub stop_cooldown_sec: f64,
    #[serde(default)]
    pub auto_reset_on_clear: bool,
}

fn default_stop_cooldown() -> f64 {
    3.0
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            auto_stop_on_person: true,
            stop_cooldown_sec: default_stop_cooldown(),
            auto_reset_on_clear: false,
        }
    }
}

/// Pose-detector tunables (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_img_size")]
    pub img_size: u32,
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
    #[serde(default)]
    pub half_precision: bool,
    #[serde(default = "default_keypoints_to_check")]
    pub keypoints_to_check: Vec<u8>,
    #[serde(default = "default_keypoint_conf_thres")]
    pub keypoint_conf_thres: f32,
    #[serde(default = "default_keypoints_min_in_roi")]
    pub keypoints_min_in_roi: u32,
    #[serde(default = "default_true")]
    pub fallback_to_bbox: bool,
    #[serde(default = "default_intersect_threshold")]
    pub intersect_threshold: f32,
    #[serde(default = "default_true")]
    pub use_temporal_smoothing: bool,
    #[serde(default = "default_memory_frames")]
    pub detection_memory_frames: usize,
    #[serde(default = "default_min_detections")]
    pub min_detections_for_alarm: usize,
}

fn default_confidence() -> f32 {
    0.5
}
fn default_img_size() -> u32 {
    640
}
fn default_frame_skip() -> u32 {
    2
}
fn default_keypoints_to_check() -> Vec<u8> {
    (0..17).collect()
}
fn default_keypoint_conf_thres() -> f32 {
    0.25
}
fn default_keypoints_min_in_roi() -> u32 {
    1
}
fn default_intersect_threshold() -> f32 {
    0.3
}
fn default_memory_frames() -> usize {
    10
}
fn default_min_detections() -> usize {
    3
}

/// OBB-detector tunables (§6.2), covering clamp + paper-roll classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObbConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_obb_confidence")]
    pub confidence: f32,
    #[serde(default = "default_obb_frame_skip")]
    pub frame_skip: u32,
    #[serde(default = "default_clamp_present_threshold")]
    pub clamp_present_threshold: f32,
    #[serde(default = "default_clamp_class_id")]
    pub clamp_class_id: u32,
    #[serde(default = "default_auto_start_delay")]
    pub auto_start_delay_sec: f64,
}

fn default_obb_confidence() -> f32 {
    0.5
}
fn default_obb_frame_skip() -> u32 {
    3
}
fn default_clamp_present_threshold() -> f32 {
    0.5
}
fn default_clamp_class_id() -> u32 {
    0
}
fn default_auto_start_delay() -> f64 {
    180.0
}

/// DI-gated inference tunables (§4.3.1).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DetectionGateConfig {
    #[serde(default)]
    pub enable_detection_on_di: bool,
}

/// Capture directory/toggle settings (§6.2, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    #[serde(default = "default_production_capture_dir")]
    pub production_capture_dir: PathBuf,
    #[serde(default = "default_true")]
    pub capture_on_auto_stop: bool,
    #[serde(default = "default_true")]
    pub capture_on_roll_detected: bool,
    #[serde(default = "default_true")]
    pub capture_on_roll_start: bool,
    #[serde(default = "default_true")]
    pub capture_on_roll_finish: bool,
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}
fn default_production_capture_dir() -> PathBuf {
    PathBuf::from("production_captures")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            capture_dir: default_capture_dir(),
            production_capture_dir: default_production_capture_dir(),
            capture_on_auto_stop: true,
            capture_on_roll_detected: true,
            capture_on_roll_start: true,
            capture_on_roll_finish: true,
        }
    }
}

/// Everything scoped to a single machine: camera, ROI, pose/OBB thresholds
/// override slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub camera: CameraConfig,
    pub roi: RoiNorm,
}

/// Process-scoped configuration, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapguardConfig {
    pub machines: BTreeMap<String, MachineConfig>,
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub roi_draw: RoiDrawConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    pub pose: PoseConfig,
    pub obb: ObbConfig,
    #[serde(default)]
    pub detection_gate: DetectionGateConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl WrapguardConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: WrapguardConfig =
            toml::from_str(&text).map_err(|source| CoreError::ConfigParse {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn machine(&self, id: MachineId) -> Result<&MachineConfig, CoreError> {
        self.machines
            .get(&id.to_string())
            .ok_or_else(|| CoreError::Config(format!("no config section for machine {id}")))
    }

    /// Enforces the invariants spec.md §8 (property 8) and §9 demand be
    /// validated at load time rather than discovered at runtime.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.obb.clamp_present_threshold > self.obb.confidence {
            return Err(CoreError::Config(format!(
                "CLAMP_PRESENT_THRESHOLD ({}) must be <= YOLO_OBB_CONFIDENCE ({})",
                self.obb.clamp_present_threshold, self.obb.confidence
            )));
        }
        for id in MachineId::ALL {
            if self.machines.get(&id.to_string()).is_none() {
                return Err(CoreError::Config(format!("missing config for machine {id}")));
            }
        }
        if self.modbus.do_a.ip.trim().is_empty()
            || self.modbus.do_b.ip.trim().is_empty()
            || self.modbus.di.ip.trim().is_empty()
        {
            return Err(CoreError::Config("modbus device ip must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[machines.A.camera]
rtsp_url = "rtsp://10.0.0.1/stream"
[machines.A.roi]
x0 = 0.1
y0 = 0.1
x1 = 0.9
y1 = 0.9

[machines.B.camera]
rtsp_url = "rtsp://10.0.0.2/stream"
[machines.B.roi]
x0 = 0.1
y0 = 0.1
x1 = 0.9
y1 = 0.9

[modbus.do_a]
ip = "10.0.1.1"
addr_start = 0
addr_end = 9

[modbus.do_b]
ip = "10.0.1.2"
addr_start = 0
addr_end = 9

[modbus.di]
ip = "10.0.1.3"
addr_start = 0
addr_end = 15

[pose]
model_path = "models/pose.onnx"

[obb]
model_path = "models/obb.onnx"
confidence = 0.6
clamp_present_threshold = 0.5
"#
    }

    #[test]
    fn parses_a_complete_config() {
        let cfg: WrapguardConfig = toml::from_str(sample_toml()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.machine(MachineId::A).unwrap().camera.display_width, 960);
    }

    #[test]
    fn rejects_clamp_threshold_above_obb_confidence() {
        let mut cfg: WrapguardConfig = toml::from_str(sample_toml()).unwrap();
        cfg.obb.clamp_present_threshold = 0.9;
        cfg.obb.confidence = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_missing_machine_section() {
        let mut cfg: WrapguardConfig = toml::from_str(sample_toml()).unwrap();
        cfg.machines.remove("B");
        assert!(cfg.validate().is_err());
    }
}
