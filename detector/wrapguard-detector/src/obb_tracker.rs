use wrapguard_core::ObbStickyState;

use crate::models::{ObbInstance, CLASS_FORKLIFT_CLAMP, CLASS_PAPER_ROLL_BIG, CLASS_PAPER_ROLL_SMALL};

/// Reduces one OBB inference's raw instances into the sticky clamp/paper-roll
/// state described in §4.3.5, merging with whatever was true on the last
/// inference when nothing new overrides it.
pub fn reduce(instances: &[ObbInstance], clamp_present_threshold: f32, sticky: &mut ObbStickyState) {
    let best_clamp = instances
        .iter()
        .filter(|o| o.class_id == CLASS_FORKLIFT_CLAMP && o.confidence >= clamp_present_threshold)
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap());

    match best_clamp {
        Some(clamp) => {
            sticky.clamp_detected = true;
            sticky.clamp_conf = clamp.confidence;
            sticky.clamp_polygon = Some(clamp.polygon);
            sticky.clamp_angle_deg = Some(clamp.angle_deg);
        }
        None => {
            sticky.clamp_detected = false;
            sticky.clamp_conf = 0.0;
            sticky.clamp_polygon = None;
            sticky.clamp_angle_deg = None;
        }
    }

    sticky.paper_roll_detected = instances
        .iter()
        .any(|o| o.class_id == CLASS_PAPER_ROLL_SMALL || o.class_id == CLASS_PAPER_ROLL_BIG);
}
