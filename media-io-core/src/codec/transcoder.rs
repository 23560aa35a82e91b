use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::ogg::OggWriter;
use crate::codec::{find_decoder, find_encoder, find_parser, AudioDecoder, AudioEncoder, Frame, Receive};
use crate::models::error::MediaError;
use crate::models::stream_spec::{AudioParams, CodecId};
use crate::processing::resampler::read_full;

/// Compressed bytes read per decode iteration.
pub const DECODE_CHUNK_SIZE: usize = 20 * 1024;
/// Extension given to decoded raw PCM when no output path is supplied.
pub const RAW_EXTENSION: &str = "pcm";

/// What to encode raw PCM into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSpec {
    pub codec: CodecId,
    /// Rate, sample format and layout of the raw input.
    pub params: AudioParams,
    /// 1 (smallest) to 5 (best).
    pub vbr_quality: u8,
}

impl EncodeSpec {
    pub fn new(codec: CodecId, params: AudioParams) -> Self {
        Self {
            codec,
            params,
            vbr_quality: 3,
        }
    }

    pub fn with_quality(mut self, vbr_quality: u8) -> Self {
        self.vbr_quality = vbr_quality;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeReport {
    pub output_path: PathBuf,
    /// Samples per channel read from the input.
    pub samples: u64,
    pub packets: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub output_path: PathBuf,
    /// Effective output parameters, ready to feed the resampler.
    pub params: AudioParams,
    /// Samples per channel written.
    pub samples: u64,
    pub bytes_written: u64,
}

/// Streaming file transcoding between raw PCM and a compressed codec.
pub struct Transcoder;

impl Transcoder {
    /// Encode the raw PCM file at `pcm_path`.
    ///
    /// `out_path` defaults to `pcm_path` with its extension replaced by the
    /// codec's. The input format must be one the encoder takes directly.
    pub fn encode(spec: &EncodeSpec, pcm_path: &Path, out_path: Option<&Path>) -> Result<EncodeReport, MediaError> {
        let descriptor = find_encoder(spec.codec)
            .ok_or_else(|| MediaError::CodecNotFound(format!("no encoder for {}", spec.codec.name())))?;
        if !descriptor.supports_format(spec.params.format) {
            return Err(MediaError::UnsupportedSampleFormat(format!(
                "{} cannot take {:?} samples",
                descriptor.name, spec.params.format
            )));
        }
        if !descriptor.supports_rate(spec.params.sample_rate) {
            return Err(MediaError::CodecInitError(format!(
                "{} does not support {} Hz",
                descriptor.name, spec.params.sample_rate
            )));
        }

        let output_path = match out_path {
            Some(path) => path.to_path_buf(),
            None => pcm_path.with_extension(descriptor.extension),
        };
        ensure_distinct(pcm_path, &output_path)?;

        let mut encoder = (descriptor.create)(&spec.params, spec.vbr_quality)
            .inspect_err(|e| log::error!("failed to open {} encoder: {}", descriptor.name, e))?;

        let mut input = File::open(pcm_path)
            .map_err(|e| MediaError::Io(format!("failed to open {}: {}", pcm_path.display(), e)))?;
        let output = File::create(&output_path)
            .map_err(|e| MediaError::Io(format!("failed to create {}: {}", output_path.display(), e)))?;
        let mut writer = OggWriter::new(BufWriter::new(output), stream_serial());
        for header in encoder.header_packets() {
            writer.write_header(&header)?;
        }

        let bytes_per_frame = spec.params.bytes_per_frame();
        let mut frame = Frame::new(spec.params, encoder.frame_samples());
        let mut samples = 0u64;
        let mut packets = 0u64;

        loop {
            let len = read_full(&mut input, frame.buffer_mut())?;
            let frame_samples = len / bytes_per_frame;
            if frame_samples == 0 {
                if len > 0 {
                    log::warn!("dropping {} trailing bytes that do not form a whole sample", len);
                }
                break;
            }
            frame.set_samples(frame_samples);
            samples += frame_samples as u64;

            encoder
                .send_frame(Some(&frame))
                .inspect_err(|e| log::error!("encoding aborted: {}", e))?;
            packets += drain_packets(encoder.as_mut(), &mut writer)?;

            if frame_samples < frame.capacity() {
                break;
            }
        }

        encoder
            .send_frame(None)
            .inspect_err(|e| log::error!("encoder flush failed: {}", e))?;
        packets += drain_packets(encoder.as_mut(), &mut writer)?;
        let (_, bytes_written) = writer.finish()?;

        log::info!(
            "encoded {} -> {} ({} samples, {} packets, {} bytes)",
            pcm_path.display(),
            output_path.display(),
            samples,
            packets,
            bytes_written
        );
        Ok(EncodeReport {
            output_path,
            samples,
            packets,
            bytes_written,
        })
    }

    /// Decode a compressed file to raw PCM.
    ///
    /// `requested` picks the output rate and sample format where the
    /// decoder supports them; the report carries what was actually written.
    pub fn decode(input_path: &Path, out_path: Option<&Path>, requested: &AudioParams) -> Result<DecodeReport, MediaError> {
        Self::decode_codec(CodecId::Opus, input_path, out_path, requested)
    }

    /// As [`Transcoder::decode`] for an explicit codec.
    pub fn decode_codec(
        codec: CodecId,
        input_path: &Path,
        out_path: Option<&Path>,
        requested: &AudioParams,
    ) -> Result<DecodeReport, MediaError> {
        let descriptor = find_decoder(codec)
            .ok_or_else(|| MediaError::CodecNotFound(format!("no decoder for {}", codec.name())))?;
        let parser_descriptor = find_parser(codec)
            .ok_or_else(|| MediaError::CodecInitError(format!("no parser for {}", codec.name())))?;

        let output_path = match out_path {
            Some(path) => path.to_path_buf(),
            None => input_path.with_extension(RAW_EXTENSION),
        };
        ensure_distinct(input_path, &output_path)?;

        let mut decoder = (descriptor.create)(requested)
            .inspect_err(|e| log::error!("failed to open {} decoder: {}", descriptor.name, e))?;
        let mut parser = (parser_descriptor.create)();

        let mut input = File::open(input_path)
            .map_err(|e| MediaError::Io(format!("failed to open {}: {}", input_path.display(), e)))?;
        let output = File::create(&output_path)
            .map_err(|e| MediaError::Io(format!("failed to create {}: {}", output_path.display(), e)))?;
        let mut output = BufWriter::new(output);

        let mut chunk = vec![0u8; DECODE_CHUNK_SIZE];
        let mut bytes_written = 0u64;

        loop {
            let len = read_full(&mut input, &mut chunk)?;
            if len == 0 {
                break;
            }
            let mut offset = 0;
            while offset < len {
                let (used, packet) = parser
                    .parse(&chunk[offset..len])
                    .inspect_err(|e| log::error!("failed to parse {}: {}", input_path.display(), e))?;
                offset += used;
                if let Some(packet) = packet {
                    decoder
                        .send_packet(Some(&packet))
                        .inspect_err(|e| log::error!("decoding aborted: {}", e))?;
                    bytes_written += drain_frames(decoder.as_mut(), &mut output)?;
                }
            }
        }

        // Drain packets still queued in the parser.
        while let (_, Some(packet)) = parser.parse(&[])? {
            decoder
                .send_packet(Some(&packet))
                .inspect_err(|e| log::error!("decoding aborted: {}", e))?;
            bytes_written += drain_frames(decoder.as_mut(), &mut output)?;
        }
        decoder.send_packet(None)?;
        bytes_written += drain_frames(decoder.as_mut(), &mut output)?;
        output.flush()?;

        let params = decoder
            .params()
            .ok_or_else(|| MediaError::MalformedContainer(format!("{} has no stream header", input_path.display())))?;
        let samples = bytes_written / params.bytes_per_frame() as u64;

        log::info!(
            "decoded {} -> {} ({} samples at {} Hz)",
            input_path.display(),
            output_path.display(),
            samples,
            params.sample_rate
        );
        Ok(DecodeReport {
            output_path,
            params,
            samples,
            bytes_written,
        })
    }
}

fn drain_packets<W: Write>(encoder: &mut dyn AudioEncoder, writer: &mut OggWriter<W>) -> Result<u64, MediaError> {
    let mut count = 0;
    while let Receive::Ready(packet) = encoder.receive_packet()? {
        writer.write_packet(packet)?;
        count += 1;
    }
    Ok(count)
}

fn drain_frames<W: Write>(decoder: &mut dyn AudioDecoder, output: &mut W) -> Result<u64, MediaError> {
    let mut written = 0;
    while let Receive::Ready(frame) = decoder.receive_frame()? {
        output.write_all(frame.data())?;
        written += frame.data().len() as u64;
    }
    Ok(written)
}

/// Refuse an output that would truncate the input before it is read.
fn ensure_distinct(input: &Path, output: &Path) -> Result<(), MediaError> {
    let same = input == output
        || matches!(
            (input.canonicalize(), output.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        );
    if same {
        return Err(MediaError::ConfigurationFailed(format!(
            "output {} is the input file",
            output.display()
        )));
    }
    Ok(())
}

/// Random serial number for a new logical stream.
fn stream_serial() -> u32 {
    uuid::Uuid::new_v4().as_u128() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream_spec::{ChannelLayout, SampleFormat};
    use crate::processing::sample_convert::i16_to_bytes;
    use std::fs;

    fn write_sine(path: &Path, samples: usize, rate: u32, channels: usize) {
        let values: Vec<i16> = (0..samples)
            .flat_map(|i| {
                let v = ((i as f64 / rate as f64 * 330.0 * std::f64::consts::TAU).sin() * 9000.0) as i16;
                std::iter::repeat(v).take(channels)
            })
            .collect();
        fs::write(path, i16_to_bytes(&values)).unwrap();
    }

    #[test]
    fn round_trip_preserves_frames_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pcm = dir.path().join("tone.raw");
        let params = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Stereo);
        write_sine(&pcm, 48000 + 123, 48000, 2);

        let encoded = Transcoder::encode(&EncodeSpec::new(CodecId::Opus, params), &pcm, None).unwrap();
        assert_eq!(encoded.output_path, dir.path().join("tone.opus"));
        assert_eq!(encoded.samples, 48123);
        assert!(encoded.packets >= 51);
        assert_eq!(fs::metadata(&encoded.output_path).unwrap().len(), encoded.bytes_written);
        assert_eq!(&fs::read(&encoded.output_path).unwrap()[28..36], b"OpusHead");

        let decoded = Transcoder::decode(&encoded.output_path, None, &params).unwrap();
        assert_eq!(decoded.output_path, dir.path().join("tone.pcm"));
        assert_eq!(decoded.params, params);
        assert_eq!(decoded.samples, 48123);
        assert_eq!(fs::metadata(&decoded.output_path).unwrap().len(), 48123 * 4);
    }

    #[test]
    fn decode_reports_effective_params() {
        let dir = tempfile::tempdir().unwrap();
        let pcm = dir.path().join("mono.raw");
        let params = AudioParams::new(16000, SampleFormat::S16, ChannelLayout::Mono);
        write_sine(&pcm, 8000, 16000, 1);

        let out = dir.path().join("mono.opus");
        Transcoder::encode(&EncodeSpec::new(CodecId::Opus, params).with_quality(1), &pcm, Some(&out)).unwrap();

        let requested = AudioParams::new(44100, SampleFormat::F32, ChannelLayout::Stereo);
        let decoded = Transcoder::decode(&out, Some(&dir.path().join("mono.f32")), &requested).unwrap();
        assert_eq!(decoded.params, AudioParams::new(48000, SampleFormat::F32, ChannelLayout::Mono));
        assert_eq!(decoded.samples, 24000);
    }

    #[test]
    fn encode_validates_before_touching_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.raw");
        let params = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono);

        let result = Transcoder::encode(&EncodeSpec::new(CodecId::PcmS16Le, params), &missing, None);
        assert!(matches!(result, Err(MediaError::CodecNotFound(_))));

        let u8_params = AudioParams::new(48000, SampleFormat::U8, ChannelLayout::Mono);
        let result = Transcoder::encode(&EncodeSpec::new(CodecId::Opus, u8_params), &missing, None);
        assert!(matches!(result, Err(MediaError::UnsupportedSampleFormat(_))));

        let cd_params = AudioParams::new(44100, SampleFormat::S16, ChannelLayout::Mono);
        let result = Transcoder::encode(&EncodeSpec::new(CodecId::Opus, cd_params), &missing, None);
        assert!(matches!(result, Err(MediaError::CodecInitError(_))));

        let result = Transcoder::encode(&EncodeSpec::new(CodecId::Opus, params), &missing, None);
        assert!(matches!(result, Err(MediaError::Io(_))));
    }

    #[test]
    fn output_never_overwrites_input() {
        let dir = tempfile::tempdir().unwrap();
        let params = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono);

        let encoded = dir.path().join("take.opus");
        fs::write(&encoded, vec![7u8; 64]).unwrap();
        let result = Transcoder::encode(&EncodeSpec::new(CodecId::Opus, params), &encoded, None);
        assert!(matches!(result, Err(MediaError::ConfigurationFailed(_))));
        assert_eq!(fs::read(&encoded).unwrap(), vec![7u8; 64]);

        let raw = dir.path().join("take.pcm");
        fs::write(&raw, vec![9u8; 64]).unwrap();
        let result = Transcoder::decode(&raw, None, &params);
        assert!(matches!(result, Err(MediaError::ConfigurationFailed(_))));

        let aliased = dir.path().join(".").join("take.pcm");
        let result = Transcoder::decode(&raw, Some(&aliased), &params);
        assert!(matches!(result, Err(MediaError::ConfigurationFailed(_))));
        assert_eq!(fs::read(&raw).unwrap(), vec![9u8; 64]);
    }

    #[test]
    fn decode_rejects_non_ogg_input() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.opus");
        fs::write(&bogus, vec![0x55u8; 300]).unwrap();
        let params = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono);
        let result = Transcoder::decode(&bogus, None, &params);
        assert!(matches!(result, Err(MediaError::MalformedContainer(_))));

        let result = Transcoder::decode_codec(CodecId::PcmAlaw, &bogus, None, &params);
        assert!(matches!(result, Err(MediaError::CodecNotFound(_))));
    }
}
