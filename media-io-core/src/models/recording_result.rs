use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::CaptureMode;
use super::error::MediaError;
use super::stream_spec::StreamSpec;

/// Result returned when a capture worker finishes.
///
/// A device or write failure mid-recording still finalizes the file; the
/// failure is reported in `device_error` rather than discarding what was
/// captured.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub id: String,
    /// The file the worker streamed packets into.
    pub file_path: PathBuf,
    /// The playable WAV file (same as `file_path` in WAV-framed mode).
    pub wav_path: PathBuf,
    pub mode: CaptureMode,
    pub spec: StreamSpec,
    /// Payload bytes captured (excludes the WAV header).
    pub data_size: u64,
    pub duration_secs: f64,
    /// SHA-256 hex digest of the finished WAV file.
    pub checksum: String,
    pub created_at: String,
    pub device_error: Option<MediaError>,
}

impl RecordingResult {
    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            id: self.id.clone(),
            wav_path: self.wav_path.to_string_lossy().into_owned(),
            duration_secs: self.duration_secs,
            data_size: self.data_size,
            checksum: self.checksum.clone(),
            created_at: self.created_at.clone(),
            spec: self.spec,
        }
    }
}

/// Serializable view of a recording for callers exporting it elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub id: String,
    pub wav_path: String,
    pub duration_secs: f64,
    pub data_size: u64,
    pub checksum: String,
    pub created_at: String,
    pub spec: StreamSpec,
}

/// Result returned when a playback worker finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackResult {
    pub file_path: PathBuf,
    pub spec: StreamSpec,
    /// Payload bytes handed to the output device.
    pub bytes_played: u64,
    /// Whether the worker reached end of file (false when stopped early).
    pub reached_end: bool,
}
