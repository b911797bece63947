use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::error;
use wrapguard_core::MachineId;

use crate::error::LogicError;

/// Builds a dated capture path: `{base}/Machine{M}/{yyyy-mm-dd}/Machine{M}_{yyyymmdd}_{hhmmss}_{kind}.jpg`.
pub fn path_for(base_dir: &Path, machine: MachineId, now: DateTime<Utc>, kind: &str) -> PathBuf {
    base_dir
        .join(machine.folder_label())
        .join(now.format("%Y-%m-%d").to_string())
        .join(format!(
            "{}_{}_{kind}.jpg",
            machine.folder_label(),
            now.format("%Y%m%d_%H%M%S")
        ))
}

/// Writes `jpeg` to `path`, creating parent directories as needed. A write
/// failure is logged at ERROR and returned so the caller can still emit its
/// event without `capturedFramePath` (§7).
pub async fn save(path: &Path, jpeg: &[u8]) -> Result<(), LogicError> {
    if let Some(parent) = path.parent() {
        if let Err(source) = tokio::fs::create_dir_all(parent).await {
            error!(path = %path.display(), error = %source, "failed to create capture directory");
            return Err(LogicError::CaptureWrite { path: path.to_path_buf(), source });
        }
    }
    tokio::fs::write(path, jpeg).await.map_err(|source| {
        error!(path = %path.display(), error = %source, "failed to write capture file");
        LogicError::CaptureWrite { path: path.to_path_buf(), source }
    })
}
