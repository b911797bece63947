use image::RgbImage;
use wrapguard_core::{Keypoint, ObbPolygon};

use crate::error::DetectorError;

/// One detected person: 17 COCO keypoints plus the model's own bounding box
/// (used by the bbox fallback rule, §4.3.3).
#[derive(Debug, Clone)]
pub struct PersonPose {
    pub keypoints: Vec<Keypoint>,
    pub bbox_xyxy: (f32, f32, f32, f32),
    pub confidence: f32,
}

/// One OBB instance: class id (0=forklift_clamp, 1=paper_roll_small,
/// 2=paper_roll_big), confidence, the four-corner polygon, and its angle.
#[derive(Debug, Clone)]
pub struct ObbInstance {
    pub class_id: u32,
    pub confidence: f32,
    pub polygon: ObbPolygon,
    pub angle_deg: f32,
}

pub const CLASS_FORKLIFT_CLAMP: u32 = 0;
pub const CLASS_PAPER_ROLL_SMALL: u32 = 1;
pub const CLASS_PAPER_ROLL_BIG: u32 = 2;

/// A loaded pose model. The `ort`-backed implementation and `FixedModel`
/// (tests) both implement this.
pub trait PoseModel: Send {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<PersonPose>, DetectorError>;
}

/// A loaded OBB model.
pub trait ObbModel: Send {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<ObbInstance>, DetectorError>;
}

/// Scripted model used by detector tests: returns the next entry in a fixed
/// sequence of results, repeating the last one once exhausted.
pub struct FixedModel<T> {
    script: Vec<T>,
    pos: usize,
}

impl<T: Clone> FixedModel<T> {
    pub fn new(script: Vec<T>) -> Self {
        assert!(!script.is_empty(), "FixedModel needs at least one scripted result");
        FixedModel { script, pos: 0 }
    }

    fn next(&mut self) -> T {
        let idx = self.pos.min(self.script.len() - 1);
        self.pos += 1;
        self.script[idx].clone()
    }
}

impl PoseModel for FixedModel<Vec<PersonPose>> {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<PersonPose>, DetectorError> {
        Ok(self.next())
    }
}

impl ObbModel for FixedModel<Vec<ObbInstance>> {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<ObbInstance>, DetectorError> {
        Ok(self.next())
    }
}
