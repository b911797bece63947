use wrapguard_core::{config::PoseConfig, RoiPixels};

use crate::models::PersonPose;

/// Result of §4.3.3's pose-first, bbox-fallback person-in-ROI rule.
#[derive(Debug, Clone, Default)]
pub struct RoiRuleResult {
    pub raw_in_roi: bool,
    pub person_count: u32,
    /// Every detected person's bbox, carried through for the overlay's
    /// person-box drawing regardless of which in-roi test passed.
    pub person_boxes: Vec<(f32, f32, f32, f32)>,
}

/// Evaluates whether any detected person is "in ROI", preferring the pose
/// keypoint rule and falling back to bbox/ROI intersection only when the
/// pose path found nothing and `fallback_to_bbox` is enabled.
pub fn evaluate(poses: &[PersonPose], roi: &RoiPixels, cfg: &PoseConfig) -> RoiRuleResult {
    let person_count = poses.len() as u32;
    let person_boxes = poses.iter().map(|p| p.bbox_xyxy).collect();

    let pose_in_roi = poses.iter().any(|p| person_in_roi_by_pose(p, roi, cfg));

    let raw_in_roi = if pose_in_roi {
        true
    } else if cfg.fallback_to_bbox {
        poses.iter().any(|p| person_in_roi_by_bbox(p, roi, cfg))
    } else {
        false
    };

    RoiRuleResult { raw_in_roi, person_count, person_boxes }
}

fn person_in_roi_by_pose(person: &PersonPose, roi: &RoiPixels, cfg: &PoseConfig) -> bool {
    let hits = cfg
        .keypoints_to_check
        .iter()
        .filter_map(|&idx| person.keypoints.get(idx as usize))
        .filter(|kp| kp.confidence >= cfg.keypoint_conf_thres && roi.contains(kp.x, kp.y))
        .count();
    hits as u32 >= cfg.keypoints_min_in_roi
}

fn person_in_roi_by_bbox(person: &PersonPose, roi: &RoiPixels, cfg: &PoseConfig) -> bool {
    let (x0, y0, x1, y1) = person.bbox_xyxy;
    let box_area = ((x1 - x0).max(0.0) * (y1 - y0).max(0.0)).max(1.0);
    let ratio = roi.intersection_area(person.bbox_xyxy) / box_area;
    ratio >= cfg.intersect_threshold
}
