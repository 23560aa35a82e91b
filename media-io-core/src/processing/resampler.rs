//! Streaming sample-rate / sample-format / channel-layout conversion.
//!
//! `ConversionContext` is the stateful converter: bytes in one
//! (rate, format, layout) triple go in, bytes in another come out. Rate
//! changes run through a band-limited sinc interpolator (`rubato`); equal
//! rates skip interpolation entirely so a same-parameter conversion is an
//! exact copy.
//!
//! ```text
//! [input bytes] → decode → planar f64 → [sinc] → pending → remap → encode → [output bytes]
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::models::error::MediaError;
use crate::models::stream_spec::{AudioParams, ChannelLayout, SampleFormat};
use crate::processing::sample_convert;

/// Input frames read and converted per iteration.
pub const INPUT_FRAMES: usize = 1024;

/// `ceil(frames * to_rate / from_rate)`.
///
/// Sizes the output scratch buffer: for any input chunk of at most
/// `frames` frames the converter never emits more than this many frames
/// in one call.
pub fn rescale_rnd_up(frames: u64, to_rate: u32, from_rate: u32) -> u64 {
    if from_rate == 0 {
        return 0;
    }
    let numerator = frames as u128 * to_rate as u128;
    numerator.div_ceil(from_rate as u128) as u64
}

enum Engine {
    Passthrough,
    Sinc(Box<SincFixedIn<f64>>),
}

/// Stateful converter between two `AudioParams`.
///
/// Input is staged until the interpolator has a full chunk; resampled
/// frames wait in `pending` until the caller's output buffer has room. The
/// interpolator's group delay is trimmed from the head and `flush` trims
/// the zero-padded tail, so the total output is exactly
/// `ceil(input_frames * output_rate / input_rate)` frames.
pub struct ConversionContext {
    input: AudioParams,
    output: AudioParams,
    engine: Engine,
    staged: Vec<Vec<f64>>,
    pending: Vec<Vec<f64>>,
    delay_remaining: usize,
    input_frames: u64,
    emitted_frames: u64,
    input_finished: bool,
}

impl ConversionContext {
    pub fn new(input: AudioParams, output: AudioParams) -> Result<Self, MediaError> {
        if input.sample_rate == 0 || output.sample_rate == 0 {
            return Err(MediaError::CodecInitError("sample rates must be positive".into()));
        }
        if input.channels() == 0 || output.channels() == 0 {
            return Err(MediaError::CodecInitError("channel layouts must not be empty".into()));
        }

        let in_channels = input.channels() as usize;
        let (engine, delay) = if input.sample_rate == output.sample_rate {
            (Engine::Passthrough, 0)
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = output.sample_rate as f64 / input.sample_rate as f64;
            let sinc = SincFixedIn::<f64>::new(ratio, 1.1, params, INPUT_FRAMES, in_channels)
                .map_err(|e| MediaError::CodecInitError(format!("resampler setup failed: {}", e)))?;
            let delay = sinc.output_delay();
            (Engine::Sinc(Box::new(sinc)), delay)
        };

        log::debug!(
            "conversion context {} Hz {:?} {:?} -> {} Hz {:?} {:?} (delay {} frames)",
            input.sample_rate,
            input.format,
            input.layout,
            output.sample_rate,
            output.format,
            output.layout,
            delay
        );

        Ok(Self {
            input,
            output,
            engine,
            staged: vec![Vec::with_capacity(INPUT_FRAMES); in_channels],
            pending: vec![Vec::new(); in_channels],
            delay_remaining: delay,
            input_frames: 0,
            emitted_frames: 0,
            input_finished: false,
        })
    }

    pub fn input(&self) -> &AudioParams {
        &self.input
    }

    pub fn output(&self) -> &AudioParams {
        &self.output
    }

    /// Output frames guaranteed to hold one call's worth for `input_frames`.
    pub fn output_frames_for(&self, input_frames: usize) -> usize {
        rescale_rnd_up(input_frames as u64, self.output.sample_rate, self.input.sample_rate) as usize
    }

    /// Total output frames the stream will have once flushed.
    pub fn expected_output_frames(&self) -> u64 {
        rescale_rnd_up(self.input_frames, self.output.sample_rate, self.input.sample_rate)
    }

    /// Convert the whole frames in `input`, writing at most `max_frames`
    /// output frames to `output` (which is cleared first).
    ///
    /// Returns the number of frames written. Frames that did not fit stay
    /// buffered and come out of later calls or `flush`.
    pub fn convert(&mut self, input: &[u8], output: &mut Vec<u8>, max_frames: usize) -> Result<usize, MediaError> {
        if self.input_finished {
            return Err(MediaError::InvalidState("conversion context already flushed".into()));
        }
        let frames = sample_convert::decode_interleaved(input, self.input.format, &mut self.staged);
        self.input_frames += frames as u64;

        match &mut self.engine {
            Engine::Passthrough => {
                for (pending, staged) in self.pending.iter_mut().zip(self.staged.iter_mut()) {
                    pending.append(staged);
                }
            }
            Engine::Sinc(sinc) => {
                while self.staged[0].len() >= INPUT_FRAMES {
                    let chunk: Vec<&[f64]> = self.staged.iter().map(|c| &c[..INPUT_FRAMES]).collect();
                    let resampled = sinc
                        .process(&chunk, None)
                        .map_err(|e| MediaError::Codec(format!("resampling failed: {}", e)))?;
                    for channel in self.staged.iter_mut() {
                        channel.drain(..INPUT_FRAMES);
                    }
                    Self::queue(&mut self.pending, &mut self.delay_remaining, resampled);
                }
            }
        }

        Ok(self.emit(output, max_frames, None))
    }

    /// Drain buffered frames after the last input, at most `max_frames` per
    /// call. Returns 0 once the stream is complete.
    pub fn flush(&mut self, output: &mut Vec<u8>, max_frames: usize) -> Result<usize, MediaError> {
        if !self.input_finished {
            self.input_finished = true;
            if let Engine::Sinc(sinc) = &mut self.engine {
                if !self.staged[0].is_empty() {
                    let resampled = sinc
                        .process_partial(Some(self.staged.as_slice()), None)
                        .map_err(|e| MediaError::Codec(format!("resampling failed: {}", e)))?;
                    for channel in self.staged.iter_mut() {
                        channel.clear();
                    }
                    Self::queue(&mut self.pending, &mut self.delay_remaining, resampled);
                }
            }
        }

        let expected = self.expected_output_frames();
        if let Engine::Sinc(sinc) = &mut self.engine {
            // Feed silence until the reservoir holds the rest of the stream.
            while self.pending[0].len() < max_frames
                && self.emitted_frames + (self.pending[0].len() as u64) < expected
            {
                let resampled = sinc
                    .process_partial::<Vec<f64>>(None, None)
                    .map_err(|e| MediaError::Codec(format!("resampling failed: {}", e)))?;
                if resampled[0].is_empty() {
                    break;
                }
                Self::queue(&mut self.pending, &mut self.delay_remaining, resampled);
            }
        }

        Ok(self.emit(output, max_frames, Some(expected)))
    }

    fn pending_frames(&self) -> usize {
        self.pending[0].len()
    }

    fn queue(pending: &mut [Vec<f64>], delay_remaining: &mut usize, resampled: Vec<Vec<f64>>) {
        let skip = (*delay_remaining).min(resampled[0].len());
        *delay_remaining -= skip;
        for (queue, channel) in pending.iter_mut().zip(resampled.iter()) {
            queue.extend_from_slice(&channel[skip..]);
        }
    }

    fn emit(&mut self, output: &mut Vec<u8>, max_frames: usize, limit: Option<u64>) -> usize {
        output.clear();
        let mut frames = self.pending_frames().min(max_frames);
        if let Some(limit) = limit {
            let remaining = limit.saturating_sub(self.emitted_frames) as usize;
            frames = frames.min(remaining);
            if remaining == 0 {
                for channel in self.pending.iter_mut() {
                    channel.clear();
                }
            }
        }
        if frames == 0 {
            return 0;
        }

        let taken: Vec<Vec<f64>> = self
            .pending
            .iter_mut()
            .map(|channel| channel.drain(..frames).collect())
            .collect();
        let mapped = sample_convert::remap_channels(taken, self.output.channels() as usize);
        sample_convert::encode_interleaved(&mapped, 0, frames, self.output.format, output);
        self.emitted_frames += frames as u64;
        frames
    }
}

/// One side of a file conversion: path plus stream parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleSpec {
    pub filename: PathBuf,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub layout: ChannelLayout,
}

impl ResampleSpec {
    pub fn new(filename: impl Into<PathBuf>, sample_rate: u32, format: SampleFormat, layout: ChannelLayout) -> Self {
        Self {
            filename: filename.into(),
            sample_rate,
            format,
            layout,
        }
    }

    pub fn params(&self) -> AudioParams {
        AudioParams::new(self.sample_rate, self.format, self.layout)
    }
}

/// Totals from a finished file conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionReport {
    pub input_frames: u64,
    pub output_frames: u64,
    pub output_bytes: u64,
}

/// File-to-file conversion driver over a `ConversionContext`.
pub struct Resampler;

impl Resampler {
    /// Convert the raw PCM file at `input_path` into `output_path`.
    ///
    /// Reads 1024-frame chunks, converts each, writes whatever the converter
    /// emits, then drains the converter until it reports nothing left.
    #[allow(clippy::too_many_arguments)]
    pub fn convert(
        input_path: &Path,
        input_rate: u32,
        input_format: SampleFormat,
        input_layout: ChannelLayout,
        output_path: &Path,
        output_rate: u32,
        output_format: SampleFormat,
        output_layout: ChannelLayout,
    ) -> Result<ConversionReport, MediaError> {
        let input_params = AudioParams::new(input_rate, input_format, input_layout);
        let output_params = AudioParams::new(output_rate, output_format, output_layout);

        let mut input = File::open(input_path)
            .map_err(|e| MediaError::Io(format!("failed to open {}: {}", input_path.display(), e)))?;
        let mut context = ConversionContext::new(input_params, output_params).inspect_err(|e| {
            log::error!("failed to configure resampler: {}", e);
        })?;

        let output = File::create(output_path)
            .map_err(|e| MediaError::Io(format!("failed to create {}: {}", output_path.display(), e)))?;
        let mut output = BufWriter::new(output);

        let input_frame_bytes = input_params.bytes_per_frame();
        let output_frame_bytes = output_params.bytes_per_frame();
        let max_output_frames = context.output_frames_for(INPUT_FRAMES);

        let mut input_buffer = vec![0u8; INPUT_FRAMES * input_frame_bytes];
        let mut output_buffer = Vec::with_capacity(max_output_frames * output_frame_bytes);
        let mut report = ConversionReport {
            input_frames: 0,
            output_frames: 0,
            output_bytes: 0,
        };

        loop {
            let len = read_full(&mut input, &mut input_buffer)?;
            if len == 0 {
                break;
            }
            if len % input_frame_bytes != 0 {
                log::warn!(
                    "dropping {} trailing bytes that do not form a whole frame",
                    len % input_frame_bytes
                );
            }
            report.input_frames += (len / input_frame_bytes) as u64;

            let frames = context
                .convert(&input_buffer[..len], &mut output_buffer, max_output_frames)
                .inspect_err(|e| log::error!("conversion aborted: {}", e))?;
            write_frames(&mut output, &output_buffer, frames, output_frame_bytes, &mut report)?;
        }

        loop {
            let frames = context
                .flush(&mut output_buffer, max_output_frames)
                .inspect_err(|e| log::error!("conversion drain aborted: {}", e))?;
            if frames == 0 {
                break;
            }
            write_frames(&mut output, &output_buffer, frames, output_frame_bytes, &mut report)?;
        }
        output.flush()?;

        log::info!(
            "resampled {} -> {} ({} -> {} frames)",
            input_path.display(),
            output_path.display(),
            report.input_frames,
            report.output_frames
        );
        Ok(report)
    }

    /// Parameter-unpacking wrapper over [`Resampler::convert`].
    pub fn convert_specs(input: &ResampleSpec, output: &ResampleSpec) -> Result<ConversionReport, MediaError> {
        Self::convert(
            &input.filename,
            input.sample_rate,
            input.format,
            input.layout,
            &output.filename,
            output.sample_rate,
            output.format,
            output.layout,
        )
    }
}

fn write_frames<W: Write>(
    output: &mut W,
    buffer: &[u8],
    frames: usize,
    frame_bytes: usize,
    report: &mut ConversionReport,
) -> Result<(), MediaError> {
    let size = frames * frame_bytes;
    output.write_all(&buffer[..size])?;
    report.output_frames += frames as u64;
    report.output_bytes += size as u64;
    Ok(())
}

/// Fill `buffer` from `reader`, short only at end of input.
pub(crate) fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize, MediaError> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::sample_convert::{bytes_to_i16, i16_to_bytes};
    use std::fs;

    fn sine_s16(frames: usize, rate: u32, freq: f64) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f64 / rate as f64;
                ((t * freq * std::f64::consts::TAU).sin() * 12000.0) as i16
            })
            .collect()
    }

    #[test]
    fn rescale_rounds_up() {
        assert_eq!(rescale_rnd_up(1024, 44100, 48000), 941);
        assert_eq!(rescale_rnd_up(1024, 48000, 48000), 1024);
        assert_eq!(rescale_rnd_up(48000, 44100, 48000), 44100);
        assert_eq!(rescale_rnd_up(1, 44100, 48000), 1);
        assert_eq!(rescale_rnd_up(5, 1, 0), 0);
    }

    #[test]
    fn context_rejects_bad_params() {
        let good = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono);
        let zero_rate = AudioParams::new(0, SampleFormat::S16, ChannelLayout::Mono);
        let no_channels = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Discrete(0));
        assert!(matches!(
            ConversionContext::new(good, zero_rate),
            Err(MediaError::CodecInitError(_))
        ));
        assert!(matches!(
            ConversionContext::new(no_channels, good),
            Err(MediaError::CodecInitError(_))
        ));
    }

    #[test]
    fn same_params_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcm");
        let output = dir.path().join("out.pcm");
        let bytes = i16_to_bytes(&sine_s16(5000, 44100, 440.0));
        fs::write(&input, &bytes).unwrap();

        let spec_in = ResampleSpec::new(&input, 44100, SampleFormat::S16, ChannelLayout::Stereo);
        let spec_out = ResampleSpec::new(&output, 44100, SampleFormat::S16, ChannelLayout::Stereo);
        let report = Resampler::convert_specs(&spec_in, &spec_out).unwrap();

        assert_eq!(report.input_frames, 2500);
        assert_eq!(report.output_frames, 2500);
        assert_eq!(fs::read(&output).unwrap(), bytes);
    }

    #[test]
    fn one_second_mono_48k_to_stereo_44k() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcm");
        let output = dir.path().join("out.pcm");
        fs::write(&input, i16_to_bytes(&sine_s16(48000, 48000, 1000.0))).unwrap();

        let report = Resampler::convert(
            &input,
            48000,
            SampleFormat::S16,
            ChannelLayout::Mono,
            &output,
            44100,
            SampleFormat::S16,
            ChannelLayout::Stereo,
        )
        .unwrap();

        let expected = 44100u64 * 2 * 2;
        let written = fs::metadata(&output).unwrap().len();
        assert_eq!(report.output_bytes, written);
        assert!(written.abs_diff(expected) <= 4, "wrote {} bytes", written);

        // Both channels carry the same signal.
        let samples = bytes_to_i16(&fs::read(&output).unwrap());
        assert!(samples.chunks_exact(2).all(|frame| frame[0] == frame[1]));
    }

    #[test]
    fn resampled_signal_keeps_its_level() {
        let mut context = ConversionContext::new(
            AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono),
            AudioParams::new(16000, SampleFormat::F32, ChannelLayout::Mono),
        )
        .unwrap();
        let input = i16_to_bytes(&sine_s16(4800, 48000, 440.0));
        let mut collected = Vec::new();
        let mut scratch = Vec::new();

        for chunk in input.chunks(INPUT_FRAMES * 2) {
            context.convert(chunk, &mut scratch, 512).unwrap();
            collected.extend_from_slice(&scratch);
        }
        while context.flush(&mut scratch, 512).unwrap() > 0 {
            collected.extend_from_slice(&scratch);
        }

        let floats = sample_convert::bytes_to_f32(&collected);
        assert_eq!(floats.len(), 1600);
        let peak = floats[200..1400].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 12000.0 / 32768.0).abs() < 0.02, "peak {}", peak);
    }

    #[test]
    fn small_output_budget_is_drained_by_flush() {
        let mut context = ConversionContext::new(
            AudioParams::new(8000, SampleFormat::S16, ChannelLayout::Mono),
            AudioParams::new(8000, SampleFormat::S16, ChannelLayout::Mono),
        )
        .unwrap();
        let input = i16_to_bytes(&[1, 2, 3, 4, 5, 6]);
        let mut scratch = Vec::new();

        assert_eq!(context.convert(&input, &mut scratch, 4).unwrap(), 4);
        assert_eq!(bytes_to_i16(&scratch), vec![1, 2, 3, 4]);
        assert_eq!(context.flush(&mut scratch, 4).unwrap(), 2);
        assert_eq!(bytes_to_i16(&scratch), vec![5, 6]);
        assert_eq!(context.flush(&mut scratch, 4).unwrap(), 0);
        assert!(context.convert(&input, &mut scratch, 4).is_err());
    }

    #[test]
    fn missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Resampler::convert(
            &dir.path().join("missing.pcm"),
            48000,
            SampleFormat::S16,
            ChannelLayout::Mono,
            &dir.path().join("out.pcm"),
            44100,
            SampleFormat::S16,
            ChannelLayout::Mono,
        );
        assert!(matches!(result, Err(MediaError::Io(_))));
    }

    #[test]
    fn rejected_rate_leaves_no_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcm");
        let output = dir.path().join("out.pcm");
        std::fs::write(&input, vec![0u8; 64]).unwrap();

        let result = Resampler::convert(
            &input,
            48000,
            SampleFormat::S16,
            ChannelLayout::Mono,
            &output,
            0,
            SampleFormat::S16,
            ChannelLayout::Mono,
        );
        assert!(matches!(result, Err(MediaError::CodecInitError(_))));
        assert!(!output.exists());
    }
}
