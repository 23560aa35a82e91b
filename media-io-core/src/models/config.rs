use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::error::MediaError;
use super::stream_spec::{SampleFormat, StreamSpec};

/// How a capture session frames the bytes it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Dump device packets verbatim, then materialize a sibling `.wav` copy.
    RawPacketDump,
    /// Write a placeholder WAV header up front and patch its sizes on stop.
    WavFramed,
}

/// What the capture loop does when the device reports it has no data yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry immediately (busy spin).
    #[default]
    Spin,
    /// Yield the worker's time slice before retrying.
    Yield,
    /// Sleep for a fixed interval before retrying.
    Sleep(Duration),
}

impl RetryPolicy {
    pub fn backoff(&self) {
        match self {
            Self::Spin => std::hint::spin_loop(),
            Self::Yield => thread::yield_now(),
            Self::Sleep(interval) => thread::sleep(*interval),
        }
    }
}

/// Options handed to a capture backend when opening a device.
///
/// Unset fields fall back to the device's native parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Upper bound on frames returned by a single packet read.
    pub packet_frames: Option<usize>,
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfiguration {
    /// Destination file. In `RawPacketDump` mode the `.wav` copy is written
    /// next to it.
    pub output_path: PathBuf,

    /// Behaviour on `WouldBlock` / `DeviceBusy` (default: spin).
    pub retry_policy: RetryPolicy,
}

impl CaptureConfiguration {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        if self.output_path.as_os_str().is_empty() {
            return Err(MediaError::ConfigurationFailed("output path is empty".into()));
        }
        Ok(())
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            output_path: PathBuf::new(),
            retry_policy: RetryPolicy::Spin,
        }
    }
}

/// How a playback session interprets its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFraming {
    /// Headerless PCM described by the configured spec.
    Raw,
    /// RIFF/WAVE file; device parameters come from its header.
    Wav,
}

/// Configuration for a playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfiguration {
    pub filename: PathBuf,

    pub framing: PlaybackFraming,

    /// Stream parameters for raw files; for WAV files only `samples` is used.
    pub spec: StreamSpec,

    /// Device sample format for raw files.
    pub format: SampleFormat,
}

impl PlaybackConfiguration {
    pub fn raw(filename: impl Into<PathBuf>, spec: StreamSpec, format: SampleFormat) -> Self {
        Self {
            filename: filename.into(),
            framing: PlaybackFraming::Raw,
            spec,
            format,
        }
    }

    pub fn wav(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            framing: PlaybackFraming::Wav,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        if self.filename.as_os_str().is_empty() {
            return Err(MediaError::ConfigurationFailed("no file to play".into()));
        }
        let raw = self.framing == PlaybackFraming::Raw;
        if raw && (self.spec.sample_rate == 0 || self.spec.channels == 0) {
            return Err(MediaError::ConfigurationFailed(
                "raw playback needs a positive rate and channel count".into(),
            ));
        }
        if self.spec.samples == 0 {
            return Err(MediaError::ConfigurationFailed("buffer sample count must be positive".into()));
        }
        Ok(())
    }
}

impl Default for PlaybackConfiguration {
    fn default() -> Self {
        let spec = StreamSpec::default();
        Self {
            filename: PathBuf::new(),
            framing: PlaybackFraming::Raw,
            spec,
            format: SampleFormat::F32,
        }
    }
}
