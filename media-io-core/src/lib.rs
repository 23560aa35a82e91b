//! # media-io-core
//!
//! Platform-agnostic audio I/O core library.
//!
//! Provides WAV container I/O, sample-rate and format conversion, Opus-in-Ogg
//! transcoding, and the capture and playback session state machines.
//! Platform backends (cpal) implement the `CaptureBackend` and `AudioOutput`
//! traits and plug into the generic sessions.
//!
//! ## Architecture
//!
//! ```text
//! media-io-core (this crate)
//! ├── traits/       ← CaptureBackend, CaptureDevice, AudioOutput, AudioSink, SessionDelegate
//! ├── models/       ← MediaError, StreamSpec, AudioParams, configurations, states, results
//! ├── processing/   ← WavHeader, ConversionContext, Resampler, RingBuffer, pull slot
//! ├── codec/        ← encoder/decoder registry, Opus, Ogg framing, Transcoder
//! ├── session/      ← CaptureSession, PlaybackSession
//! └── storage/      ← CaptureFileWriter, SHA-256 checksums, JSON metadata sidecar
//! ```

pub mod codec;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use codec::transcoder::{DecodeReport, EncodeReport, EncodeSpec, Transcoder};
pub use codec::{find_decoder, find_encoder, AudioDecoder, AudioEncoder, Frame, Packet, Receive};
pub use models::config::{
    CaptureConfiguration, CaptureMode, DeviceOptions, PlaybackConfiguration, PlaybackFraming, RetryPolicy,
};
pub use models::device::{DeviceDirection, DeviceInfo};
pub use models::error::MediaError;
pub use models::recording_result::{PlaybackResult, RecordingResult, RecordingSummary};
pub use models::state::{CaptureState, PlaybackState, SessionState};
pub use models::stream_spec::{AudioParams, ChannelLayout, CodecId, SampleFormat, StreamSpec};
pub use processing::pull_slot::{pull_slot, SlotConsumer, SlotProducer};
pub use processing::resampler::{ConversionContext, ConversionReport, ResampleSpec, Resampler};
pub use processing::ring_buffer::RingBuffer;
pub use processing::wav_format::{WavHeader, WAV_HEADER_SIZE};
pub use session::capture::CaptureSession;
pub use session::playback::PlaybackSession;
pub use storage::wav_writer::CaptureFileWriter;
pub use traits::audio_output::{AudioOutput, AudioSink, OutputSpec};
pub use traits::capture_device::{CaptureBackend, CaptureDevice};
pub use traits::session_delegate::SessionDelegate;
