use image::RgbImage;

use crate::error::CameraError;

/// Everything `CameraStage` needs from a video source, factored out so
/// tests can drive the stage's ROI-caching/resize/publish logic against a
/// scripted sequence of frames instead of a real RTSP camera.
pub trait FrameSource: Send {
    fn next_frame(
        &mut self,
    ) -> impl std::future::Future<Output = Result<RgbImage, CameraError>> + Send;
}

/// Produces a fixed, possibly-erroring sequence of frames, then repeats the
/// last item forever. Used by camera stage tests.
#[cfg(any(test, feature = "test-util"))]
pub struct ScriptedSource {
    script: Vec<Result<RgbImage, String>>,
    pos: usize,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedSource {
    pub fn new(script: Vec<Result<RgbImage, String>>) -> Self {
        ScriptedSource { script, pos: 0 }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
        let idx = self.pos.min(self.script.len() - 1);
        self.pos += 1;
        self.script[idx]
            .clone()
            .map_err(CameraError::Stream)
    }
}
