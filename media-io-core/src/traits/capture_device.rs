use crate::models::config::DeviceOptions;
use crate::models::error::MediaError;
use crate::models::stream_spec::StreamSpec;

/// An opened input device delivering interleaved sample packets.
///
/// Implemented by:
/// - `CpalCaptureDevice` (media-io-cpal)
/// - scripted devices in tests
///
/// Dropping the device closes it.
pub trait CaptureDevice: Send {
    /// Next packet of interleaved bytes in the format of `stream_spec()`.
    ///
    /// Returns `MediaError::WouldBlock` when nothing is ready yet. Other
    /// errors are fatal to the current recording.
    fn read_packet(&mut self) -> Result<Vec<u8>, MediaError>;

    /// Format of the packets this device delivers.
    fn stream_spec(&self) -> StreamSpec;
}

/// Opens capture devices by name.
pub trait CaptureBackend: Send + Sync {
    /// Open the device called `name` with format hints from `options`.
    ///
    /// Fails with `DeviceNotAvailable` when the name does not resolve and
    /// `ConfigurationFailed` when the device rejects the requested format.
    fn open(&self, name: &str, options: &DeviceOptions) -> Result<Box<dyn CaptureDevice>, MediaError>;
}
