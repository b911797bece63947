//! Pose + OBB inference pipeline: DI-gated, frame-skip-adaptive, with
//! temporal smoothing and sticky OBB/clamp state (§4.3).

pub mod auto_start;
pub mod error;
pub mod models;
pub mod obb_tracker;
pub mod ort_models;
pub mod overlay;
pub mod roi_rule;
pub mod smoothing;
pub mod stage;

pub use auto_start::AutoStartTimer;
pub use error::DetectorError;
pub use models::{FixedModel, ObbInstance, ObbModel, PersonPose, PoseModel};
pub use ort_models::{OrtObbModel, OrtPoseModel};
pub use stage::DetectorStage;
