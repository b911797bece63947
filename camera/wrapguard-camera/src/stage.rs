use std::time::Duration;

use chrono::Utc;
use image::{imageops, RgbImage};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wrapguard_core::{Frame, MachineId, RoiNorm, RoiPixels};

use crate::frame_slot::FrameSlot;
use crate::source::FrameSource;

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Per-machine RTSP ingestion pipeline (§4.2): owns the connection to one
/// camera, caches the pixel ROI from the first frame, and republishes a
/// decoded `Frame` into the machine's `FrameSlot` on every successful read.
/// Overlay drawing is the detector's job (§4.3.7); this stage only decodes
/// and hands off.
pub struct CameraStage {
    pub machine_id: MachineId,
    roi_norm: RoiNorm,
    roi_pixels: Option<RoiPixels>,
    cached_dims: Option<(u32, u32)>,
}

impl CameraStage {
    pub fn new(machine_id: MachineId, roi_norm: RoiNorm) -> Self {
        CameraStage {
            machine_id,
            roi_norm,
            roi_pixels: None,
            cached_dims: None,
        }
    }

    /// The ROI in pixel coordinates for the dimensions seen so far, if any
    /// frame has arrived yet.
    pub fn roi_pixels(&self) -> Option<RoiPixels> {
        self.roi_pixels
    }

    /// Runs until `cancel` fires, publishing frames into `slot`. Never
    /// returns on a read/decode failure — those are logged and retried
    /// after a 1s delay per §4.2.
    pub async fn run<S: FrameSource>(
        mut self,
        mut source: S,
        slot: FrameSlot,
        cancel: CancellationToken,
    ) {
        info!(machine = %self.machine_id, "camera stage starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let frame_result = tokio::select! {
                r = source.next_frame() => r,
                _ = cancel.cancelled() => break,
            };

            match frame_result {
                Ok(pixels) => {
                    self.establish_roi(pixels.width(), pixels.height());
                    slot.publish(Frame::new(pixels, Utc::now()));
                }
                Err(e) => {
                    warn!(machine = %self.machine_id, error = %e, "camera read failed, reopening in 1s");
                    tokio::select! {
                        _ = sleep(REOPEN_DELAY) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!(machine = %self.machine_id, "camera stage stopped");
    }

    fn establish_roi(&mut self, w: u32, h: u32) {
        if self.cached_dims == Some((w, h)) {
            return;
        }
        match self.cached_dims {
            None => info!(machine = %self.machine_id, width = w, height = h, "first frame, caching ROI"),
            Some(prev) => warn!(machine = %self.machine_id, from_width = prev.0, from_height = prev.1, to_width = w, to_height = h, "frame dimensions changed, recomputing ROI"),
        }
        self.cached_dims = Some((w, h));
        self.roi_pixels = Some(self.roi_norm.to_pixels(w, h));
    }
}

/// Resizes `pixels` to `(width, height)` when they differ; otherwise returns
/// a cheap clone. Shared with the detector's display-size resize.
pub fn resize_to(pixels: &RgbImage, width: u32, height: u32) -> RgbImage {
    if pixels.width() == width && pixels.height() == height {
        pixels.clone()
    } else {
        imageops::resize(pixels, width, height, imageops::FilterType::Triangle)
    }
}
