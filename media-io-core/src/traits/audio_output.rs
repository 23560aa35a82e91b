use crate::models::error::MediaError;
use crate::models::stream_spec::SampleFormat;
use crate::processing::pull_slot::SlotConsumer;

/// Format requested from an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Preferred callback block size, in frames.
    pub samples: u32,
}

/// An opened output stream pulling bytes from a `SlotConsumer`.
///
/// Need not be `Send`: the playback worker creates, drives and drops it on
/// its own thread.
pub trait AudioSink {
    /// Begin invoking the pull callback.
    fn start(&mut self) -> Result<(), MediaError>;

    /// Pause the stream. Dropping the sink closes the device.
    fn stop(&mut self) -> Result<(), MediaError>;
}

/// Opens output devices.
pub trait AudioOutput: Send + Sync {
    /// Open the default output with `spec`; the device callback fills its
    /// buffers from `consumer` and pads with silence when it runs dry.
    fn open(&self, spec: &OutputSpec, consumer: SlotConsumer) -> Result<Box<dyn AudioSink>, MediaError>;
}
