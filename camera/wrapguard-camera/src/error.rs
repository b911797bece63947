/// Errors a `CameraStage` can encounter. All of these are transient by
/// construction — `run` never returns on them, it logs and retries per
/// §4.2's "release, wait 1s, reopen; repeat indefinitely".
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("rtsp session setup failed for {url}: {source}")]
    Describe {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no video stream advertised by {url}")]
    NoVideoStream { url: String },

    #[error("rtsp stream error: {0}")]
    Stream(String),

    #[error("h264 decode error: {0}")]
    Decode(String),
}
