/// Errors a `DetectorStage` can encounter. Per §7's taxonomy, inference
/// failures are logged and the frame is skipped (the previous result's
/// booleans are reused) — they never tear down the stage.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load model from {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("pose inference failed: {0}")]
    PoseInference(String),

    #[error("obb inference failed: {0}")]
    ObbInference(String),

    #[error("jpeg encode failed: {0}")]
    Encode(String),
}
