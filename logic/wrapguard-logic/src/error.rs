/// Errors `LogicStage` can encounter. None of these cross a stage boundary
/// as a propagated failure (§7): a capture-write failure is logged and the
/// triggering event still fires, just without `capturedFramePath`.
#[derive(Debug, thiserror::Error)]
pub enum LogicError {
    #[error("failed to write capture file {path:?}: {source}")]
    CaptureWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
