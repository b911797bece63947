/// Errors shared by every crate that deals directly with [`crate::MachineId`]
/// or [`crate::config`] data. Stage-specific errors live in their own
/// crates and typically wrap one of these as a source.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid machine id {0:?}, expected \"A\" or \"B\"")]
    InvalidMachineId(String),

    #[error("invalid ROI {0:?}: expected x0<x1, y0<y1, all in [0,1]")]
    InvalidRoi(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path:?}: {source}")]
    ConfigRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    ConfigParse {
        path: std::path::PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
}
