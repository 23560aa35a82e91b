//! RIFF/WAVE container codec.
//!
//! Builds the canonical 44-byte header from a `StreamSpec`, parses it back,
//! and provides the in-place size patch used when a recording is finalized.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::models::error::MediaError;
use crate::models::stream_spec::{CodecId, SampleFormat, StreamSpec, MAX_CHANNELS};

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Bytes of header that follow the RIFF chunk-size field.
const RIFF_OVERHEAD: u32 = WAV_HEADER_SIZE as u32 - 8;

/// Copy granularity for `pcm_to_wav`.
const COPY_CHUNK_SIZE: usize = 1024;

pub const FORMAT_PCM: u16 = 0x0001;
pub const FORMAT_ADPCM_MS: u16 = 0x0002;
pub const FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const FORMAT_ALAW: u16 = 0x0006;
pub const FORMAT_MULAW: u16 = 0x0007;
pub const FORMAT_ADPCM_IMA: u16 = 0x0011;

/// In-memory mirror of the 44-byte header.
///
/// `byte_rate` and `block_align` are derived from channels, bit depth and
/// rate at construction and have no setters. `chunk_size` tracks
/// `data_size + 36` through `set_data_size`.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    chunk size = 36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (format chunk size)
/// [20-21]  audio format (1 = PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bits_per_sample / 8
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    chunk_size: u32,
    audio_format: u16,
    num_channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    data_size: u32,
    has_data_tag: bool,
}

impl WavHeader {
    /// Build a header for `spec` with a zero data size.
    pub fn new(spec: &StreamSpec) -> Self {
        let block_align = spec.block_align();
        let audio_format = if spec.codec_id.is_float() {
            FORMAT_IEEE_FLOAT
        } else {
            FORMAT_PCM
        };
        Self {
            chunk_size: RIFF_OVERHEAD,
            audio_format,
            num_channels: spec.channels,
            sample_rate: spec.sample_rate,
            byte_rate: spec.byte_rate(),
            block_align,
            bits_per_sample: spec.bits_per_sample,
            data_size: 0,
            has_data_tag: true,
        }
    }

    /// Set the payload length; the RIFF chunk size follows it.
    pub fn set_data_size(&mut self, data_size: u32) {
        self.data_size = data_size;
        self.chunk_size = data_size.saturating_add(RIFF_OVERHEAD);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn audio_format(&self) -> u16 {
        self.audio_format
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn byte_rate(&self) -> u32 {
        self.byte_rate
    }

    pub fn block_align(&self) -> u16 {
        self.block_align
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    /// Whether the `data` tag sits at offset 36. Files with extra chunks
    /// between `fmt ` and `data` parse fine but report false here.
    pub fn has_canonical_layout(&self) -> bool {
        self.has_data_tag
    }

    pub fn to_bytes(&self) -> [u8; WAV_HEADER_SIZE] {
        let mut header = [0u8; WAV_HEADER_SIZE];

        // RIFF chunk descriptor
        header[0..4].copy_from_slice(b"RIFF");
        header[4..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        header[8..12].copy_from_slice(b"WAVE");

        // fmt sub-chunk
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        header[22..24].copy_from_slice(&self.num_channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        header[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        header[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        header[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());

        // data sub-chunk
        header[36..40].copy_from_slice(b"data");
        header[40..44].copy_from_slice(&self.data_size.to_le_bytes());

        header
    }

    /// Decode the fixed header fields, checking the magic tags.
    ///
    /// `RIFF`, `WAVE` and `fmt ` are mandatory; `data` at offset 36 is not.
    pub fn decode(bytes: &[u8]) -> Result<Self, MediaError> {
        if bytes.len() < WAV_HEADER_SIZE {
            return Err(MediaError::MalformedContainer(format!(
                "header needs {} bytes, got {}",
                WAV_HEADER_SIZE,
                bytes.len()
            )));
        }
        check_tag(bytes, 0, b"RIFF")?;
        check_tag(bytes, 8, b"WAVE")?;
        check_tag(bytes, 12, b"fmt ")?;
        let has_data_tag = &bytes[36..40] == b"data";

        Ok(Self {
            chunk_size: read_u32(bytes, 4),
            audio_format: read_u16(bytes, 20),
            num_channels: read_u16(bytes, 22),
            sample_rate: read_u32(bytes, 24),
            byte_rate: read_u32(bytes, 28),
            block_align: read_u16(bytes, 32),
            bits_per_sample: read_u16(bytes, 34),
            data_size: if has_data_tag { read_u32(bytes, 40) } else { 0 },
            has_data_tag,
        })
    }

    /// Parse a header into the stream parameters it describes.
    pub fn parse(bytes: &[u8]) -> Result<StreamSpec, MediaError> {
        Self::decode(bytes)?.stream_spec()
    }

    /// Stream parameters described by this header.
    ///
    /// Fails with `UnsupportedSampleFormat` when the (format, bits) pair has
    /// no sample encoding in the fixed table, and with `MalformedContainer`
    /// for zero or more than `MAX_CHANNELS` channels or a zero rate.
    pub fn stream_spec(&self) -> Result<StreamSpec, MediaError> {
        sample_format_for(self.audio_format, self.bits_per_sample)?;
        if self.num_channels == 0 || self.sample_rate == 0 {
            return Err(MediaError::MalformedContainer(
                "header declares zero channels or zero sample rate".into(),
            ));
        }
        if self.num_channels > MAX_CHANNELS {
            return Err(MediaError::MalformedContainer(format!(
                "header declares {} channels",
                self.num_channels
            )));
        }
        let codec_id = codec_for(self.audio_format, self.bits_per_sample)?;
        Ok(StreamSpec::new(
            self.sample_rate,
            self.bits_per_sample,
            self.num_channels,
            codec_id,
        ))
    }

    /// Output sample encoding for this header's payload.
    pub fn sample_format(&self) -> Result<SampleFormat, MediaError> {
        sample_format_for(self.audio_format, self.bits_per_sample)
    }
}

/// Map a WAVE (format code, bit depth) pair to the decoded sample encoding.
///
/// Compressed PCM codes decode to signed 16-bit; IEEE float is 32-bit
/// float; linear PCM is U8/S16/S32 by width.
pub fn sample_format_for(audio_format: u16, bits_per_sample: u16) -> Result<SampleFormat, MediaError> {
    match (audio_format, bits_per_sample) {
        (FORMAT_ADPCM_MS | FORMAT_ADPCM_IMA | FORMAT_ALAW | FORMAT_MULAW, _) => Ok(SampleFormat::S16),
        (FORMAT_IEEE_FLOAT, 32) => Ok(SampleFormat::F32),
        (FORMAT_PCM, 8) => Ok(SampleFormat::U8),
        (FORMAT_PCM, 16) => Ok(SampleFormat::S16),
        (FORMAT_PCM, 32) => Ok(SampleFormat::S32),
        (format, bits) => Err(MediaError::UnsupportedSampleFormat(format!(
            "wave format 0x{:04x} with {} bits per sample",
            format, bits
        ))),
    }
}

fn codec_for(audio_format: u16, bits_per_sample: u16) -> Result<CodecId, MediaError> {
    Ok(match audio_format {
        FORMAT_ADPCM_MS => CodecId::AdpcmMs,
        FORMAT_ADPCM_IMA => CodecId::AdpcmImaWav,
        FORMAT_ALAW => CodecId::PcmAlaw,
        FORMAT_MULAW => CodecId::PcmMulaw,
        FORMAT_IEEE_FLOAT => CodecId::PcmF32Le,
        _ => CodecId::pcm_for(sample_format_for(audio_format, bits_per_sample)?),
    })
}

/// Write `spec`'s header followed by the whole PCM file at `pcm_path`.
///
/// The payload is copied verbatim in 1 KiB chunks. Returns the number of
/// payload bytes written.
pub fn pcm_to_wav(spec: &StreamSpec, pcm_path: &Path, wav_path: &Path) -> Result<u64, MediaError> {
    let pcm = File::open(pcm_path)
        .map_err(|e| MediaError::Io(format!("failed to open {}: {}", pcm_path.display(), e)))?;
    let data_size = pcm.metadata()?.len();
    let wav = File::create(wav_path)
        .map_err(|e| MediaError::Io(format!("failed to create {}: {}", wav_path.display(), e)))?;

    let mut header = WavHeader::new(spec);
    header.set_data_size(clamp_u32(data_size));

    let mut reader = BufReader::new(pcm);
    let mut writer = BufWriter::new(wav);
    writer.write_all(&header.to_bytes())?;

    let mut buffer = [0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        copied += n as u64;
    }
    writer.flush()?;

    log::debug!(
        "wrote {} ({} payload bytes, {} Hz, {} ch)",
        wav_path.display(),
        copied,
        spec.sample_rate,
        spec.channels
    );
    Ok(copied)
}

/// Rewrite the chunk-size (offset 4) and data-size (offset 40) fields of an
/// already-written header in place.
pub fn patch_sizes<W: Write + Seek>(file: &mut W, data_size: u64) -> Result<(), MediaError> {
    let data_size = clamp_u32(data_size);
    file.seek(SeekFrom::Start(40))?;
    file.write_all(&data_size.to_le_bytes())?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&data_size.saturating_add(RIFF_OVERHEAD).to_le_bytes())?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Position `reader` at the start of the `data` chunk payload.
///
/// Walks the chunk list after the RIFF/WAVE preamble, skipping anything
/// that is not `data` (LIST, fact, an extended `fmt `...). Returns the
/// declared payload length.
pub fn seek_to_data<R: Read + Seek>(reader: &mut R) -> Result<u32, MediaError> {
    reader.seek(SeekFrom::Start(12))?;
    let mut chunk = [0u8; 8];
    loop {
        reader.read_exact(&mut chunk).map_err(|_| {
            MediaError::MalformedContainer("no data chunk before end of file".into())
        })?;
        let size = read_u32(&chunk, 4);
        if &chunk[0..4] == b"data" {
            return Ok(size);
        }
        log::debug!(
            "skipping '{}' chunk ({} bytes)",
            String::from_utf8_lossy(&chunk[0..4]),
            size
        );
        // Chunks are word aligned.
        let skip = size as i64 + (size & 1) as i64;
        reader.seek(SeekFrom::Current(skip))?;
    }
}

fn check_tag(bytes: &[u8], offset: usize, tag: &[u8; 4]) -> Result<(), MediaError> {
    if &bytes[offset..offset + 4] != tag {
        return Err(MediaError::MalformedContainer(format!(
            "expected '{}' at offset {}",
            String::from_utf8_lossy(tag),
            offset
        )));
    }
    Ok(())
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn clamp_u32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        log::warn!("payload of {} bytes overflows the WAV size fields", value);
    }
    value.min(u32::MAX as u64) as u32
}
