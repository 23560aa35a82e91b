//! # media-io-cpal
//!
//! cpal backend for media-io.
//!
//! Provides:
//! - `CpalCaptureBackend`: input devices feeding a byte ring buffer, read
//!   by `CaptureSession`
//! - `CpalOutput`: output streams pulling from a `PlaybackSession` slot
//! - `DeviceEnumerator`: capture and playback device listing
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use media_io_core::{CaptureConfiguration, CaptureMode, CaptureSession};
//! use media_io_cpal::CpalCaptureBackend;
//!
//! let mut session = CaptureSession::new(
//!     Arc::new(CpalCaptureBackend::new()),
//!     CaptureConfiguration::new("take.wav"),
//! );
//! session.open("default", &Default::default())?;
//! session.start(CaptureMode::WavFramed)?;
//! ```

pub mod capture;
pub mod device_enumerator;
pub mod output;
mod samples;

pub use capture::{CpalCaptureBackend, CpalCaptureDevice, DEFAULT_DEVICE};
pub use device_enumerator::DeviceEnumerator;
pub use output::{CpalOutput, CpalSink};
