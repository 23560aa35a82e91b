//! cpal output streams fed from a playback pull slot.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SizedSample, StreamConfig};

use media_io_core::models::error::MediaError;
use media_io_core::models::stream_spec::SampleFormat;
use media_io_core::processing::pull_slot::SlotConsumer;
use media_io_core::traits::audio_output::{AudioOutput, AudioSink, OutputSpec};

use crate::samples::{silence_byte, LeSample};

/// Frames the callback scratch buffer holds at minimum. Larger device
/// blocks are served in several passes.
const MIN_SCRATCH_FRAMES: usize = 4096;

/// Opens the host's default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }
}

impl AudioOutput for CpalOutput {
    fn open(&self, spec: &OutputSpec, consumer: SlotConsumer) -> Result<Box<dyn AudioSink>, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MediaError::DeviceNotAvailable("no default output device".into()))?;

        // The device picks its own block size; the worker's chunk size is
        // independent of it.
        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let scratch_samples = (spec.samples as usize).max(MIN_SCRATCH_FRAMES) * spec.channels.max(1) as usize;
        let stream = match spec.format {
            SampleFormat::U8 => build_output::<u8>(&device, &config, consumer, spec.format, scratch_samples),
            SampleFormat::S16 => build_output::<i16>(&device, &config, consumer, spec.format, scratch_samples),
            SampleFormat::S32 => build_output::<i32>(&device, &config, consumer, spec.format, scratch_samples),
            SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, spec.format, scratch_samples),
            SampleFormat::F64 => build_output::<f64>(&device, &config, consumer, spec.format, scratch_samples),
        }
        .inspect_err(|e| log::error!("failed to open output device: {}", e))?;

        log::info!(
            "output device open: {} Hz, {} ch, {:?}",
            spec.sample_rate,
            spec.channels,
            spec.format
        );
        Ok(Box::new(CpalSink { stream }))
    }
}

/// Output stream handle; dropping it closes the device.
pub struct CpalSink {
    stream: cpal::Stream,
}

impl AudioSink for CpalSink {
    fn start(&mut self) -> Result<(), MediaError> {
        self.stream
            .play()
            .map_err(|e| MediaError::ConfigurationFailed(format!("failed to start output stream: {}", e)))
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.stream
            .pause()
            .map_err(|e| MediaError::ConfigurationFailed(format!("failed to pause output stream: {}", e)))
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: SlotConsumer,
    format: SampleFormat,
    scratch_samples: usize,
) -> Result<cpal::Stream, MediaError>
where
    T: SizedSample + LeSample,
{
    let silence = silence_byte(format);
    // Sized here; the callback never allocates.
    let mut scratch = vec![silence; scratch_samples.max(1) * T::WIDTH];
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_block(&mut consumer, &mut scratch, data, silence);
            },
            |err| log::error!("output stream error: {}", err),
            None,
        )
        .map_err(|e| MediaError::ConfigurationFailed(format!("failed to build output stream: {}", e)))
}

/// Fill a device block from the slot through a fixed scratch buffer,
/// in as many passes as the block needs.
fn fill_block<T: LeSample>(consumer: &mut SlotConsumer, scratch: &mut [u8], data: &mut [T], silence: u8) {
    let per_pass = (scratch.len() / T::WIDTH).max(1);
    for block in data.chunks_mut(per_pass) {
        let bytes = &mut scratch[..block.len() * T::WIDTH];
        consumer.fill_with(bytes, silence);
        T::decode_into(bytes, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_io_core::processing::pull_slot::pull_slot;

    #[test]
    fn blocks_larger_than_scratch_are_filled_in_passes() {
        let samples: Vec<i16> = (1..=10).collect();
        let mut bytes = Vec::new();
        i16::extend_bytes(&samples, &mut bytes);

        let (mut producer, mut consumer) = pull_slot(bytes.len());
        assert_eq!(producer.try_publish(&bytes), Some(bytes.len()));

        // Room for three samples per pass; the block takes twelve.
        let mut scratch = vec![0u8; 3 * i16::WIDTH];
        let mut block = [i16::MAX; 12];
        fill_block(&mut consumer, &mut scratch, &mut block, 0);

        assert_eq!(&block[..10], &samples[..]);
        assert_eq!(&block[10..], &[0, 0]);
        assert_eq!(scratch.len(), 3 * i16::WIDTH);
        assert!(!producer.is_pending());
    }

    #[test]
    fn empty_slot_plays_format_silence() {
        let (_producer, mut consumer) = pull_slot(16);
        let mut scratch = vec![0u8; 8];
        let mut block = [0u8; 5];
        fill_block(&mut consumer, &mut scratch, &mut block, silence_byte(SampleFormat::U8));
        assert_eq!(block, [0x80; 5]);
    }
}
