use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::MediaError;
use crate::models::recording_result::RecordingSummary;

/// Sidecar path for a recording: `{stem}.metadata.json` next to it.
pub fn metadata_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write a recording summary as a JSON sidecar file.
pub fn write_summary(summary: &RecordingSummary, recording_path: &Path) -> Result<PathBuf, MediaError> {
    let path = metadata_path(recording_path);
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| MediaError::Io(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json).map_err(|e| MediaError::Io(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

/// Read the JSON sidecar written for `recording_path`.
pub fn read_summary(recording_path: &Path) -> Result<RecordingSummary, MediaError> {
    let json = fs::read_to_string(metadata_path(recording_path))
        .map_err(|e| MediaError::Io(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| MediaError::MalformedContainer(format!("failed to parse metadata: {}", e)))
}
