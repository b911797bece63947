use chrono::{DateTime, Utc};
use image::RgbImage;

/// A single decoded camera frame plus its capture timestamp.
///
/// `CameraStage` produces these; `DetectorStage` consumes them. Once a
/// newer `Frame` has been published to the `FrameSlot`, the previous one
/// is dropped — there is never more than one live "current" frame plus
/// whatever a reader is still holding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(pixels: RgbImage, captured_at: DateTime<Utc>) -> Self {
        Frame { pixels, captured_at }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}
