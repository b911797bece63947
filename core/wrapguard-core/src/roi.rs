use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A region of interest expressed normalized to frame dimensions, with
/// `x0 < x1` and `y0 < y1`, all coordinates in `[0, 1]`. Constant for the
/// lifetime of a machine's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiNorm {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl RoiNorm {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Result<Self, CoreError> {
        let roi = RoiNorm { x0, y0, x1, y1 };
        roi.validate()?;
        Ok(roi)
    }

    fn validate(&self) -> Result<(), CoreError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x0) && in_unit(self.y0) && in_unit(self.x1) && in_unit(self.y1)) {
            return Err(CoreError::InvalidRoi(format!("{self:?} out of [0,1]")));
        }
        if self.x0 >= self.x1 || self.y0 >= self.y1 {
            return Err(CoreError::InvalidRoi(format!("{self:?} not x0<x1, y0<y1")));
        }
        Ok(())
    }

    /// A rectangle in pixel coordinates for a frame of the given dimensions.
    /// `CameraStage` computes this once, from the first frame's dimensions,
    /// and caches it for the lifetime of the stream.
    pub fn to_pixels(self, width: u32, height: u32) -> RoiPixels {
        RoiPixels {
            x0: self.x0 * width as f32,
            y0: self.y0 * height as f32,
            x1: self.x1 * width as f32,
            y1: self.y1 * height as f32,
        }
    }
}

/// `RoiNorm` scaled to a concrete frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiPixels {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl RoiPixels {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn area(&self) -> f32 {
        (self.x1 - self.x0).max(0.0) * (self.y1 - self.y0).max(0.0)
    }

    /// Area of the intersection between this ROI and an axis-aligned box
    /// given as `(x0, y0, x1, y1)`.
    pub fn intersection_area(&self, box_xyxy: (f32, f32, f32, f32)) -> f32 {
        let (bx0, by0, bx1, by1) = box_xyxy;
        let ix0 = self.x0.max(bx0);
        let iy0 = self.y0.max(by0);
        let ix1 = self.x1.min(bx1);
        let iy1 = self.y1.min(by1);
        (ix1 - ix0).max(0.0) * (iy1 - iy0).max(0.0)
    }

    pub fn as_int_rect(&self) -> (i32, i32, i32, i32) {
        (
            self.x0 as i32,
            self.y0 as i32,
            self.x1 as i32,
            self.y1 as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_roi() {
        assert!(RoiNorm::new(0.5, 0.0, 0.5, 1.0).is_err());
        assert!(RoiNorm::new(0.0, 0.9, 1.0, 0.1).is_err());
        assert!(RoiNorm::new(-0.1, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn scales_to_pixels() {
        let roi = RoiNorm::new(0.25, 0.25, 0.75, 0.75).unwrap();
        let px = roi.to_pixels(800, 600);
        assert_eq!(px.x0, 200.0);
        assert_eq!(px.y0, 150.0);
        assert_eq!(px.x1, 600.0);
        assert_eq!(px.y1, 450.0);
    }

    #[test]
    fn intersection_area_of_disjoint_boxes_is_zero() {
        let roi = RoiNorm::new(0.0, 0.0, 0.5, 0.5).unwrap().to_pixels(100, 100);
        assert_eq!(roi.intersection_area((60.0, 60.0, 90.0, 90.0)), 0.0);
    }

    #[test]
    fn intersection_area_of_fully_contained_box() {
        let roi = RoiNorm::new(0.0, 0.0, 1.0, 1.0).unwrap().to_pixels(100, 100);
        assert_eq!(roi.intersection_area((10.0, 10.0, 20.0, 20.0)), 100.0);
    }
}
