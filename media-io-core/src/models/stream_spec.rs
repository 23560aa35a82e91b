use serde::{Deserialize, Serialize};

use super::error::MediaError;

/// Codec identifier carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    PcmU8,
    PcmS16Le,
    PcmS24Le,
    PcmS32Le,
    PcmF32Le,
    PcmF64Le,
    PcmAlaw,
    PcmMulaw,
    AdpcmImaWav,
    AdpcmMs,
    Opus,
}

impl CodecId {
    /// Whether this is one of the IEEE float PCM variants.
    pub fn is_float(self) -> bool {
        matches!(self, Self::PcmF32Le | Self::PcmF64Le)
    }

    /// Whether the codec produces a compressed bitstream rather than PCM.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Opus)
    }

    /// Natural bits per sample of the codec's stored representation.
    ///
    /// Compressed codecs report 0, matching the convention that their bit
    /// depth is not meaningful at the container level.
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::PcmU8 | Self::PcmAlaw | Self::PcmMulaw => 8,
            Self::PcmS16Le => 16,
            Self::PcmS24Le => 24,
            Self::PcmS32Le | Self::PcmF32Le => 32,
            Self::PcmF64Le => 64,
            Self::AdpcmImaWav | Self::AdpcmMs => 4,
            Self::Opus => 0,
        }
    }

    /// The raw PCM codec that stores samples of `format`.
    pub fn pcm_for(format: SampleFormat) -> Self {
        match format {
            SampleFormat::U8 => Self::PcmU8,
            SampleFormat::S16 => Self::PcmS16Le,
            SampleFormat::S32 => Self::PcmS32Le,
            SampleFormat::F32 => Self::PcmF32Le,
            SampleFormat::F64 => Self::PcmF64Le,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PcmU8 => "pcm_u8",
            Self::PcmS16Le => "pcm_s16le",
            Self::PcmS24Le => "pcm_s24le",
            Self::PcmS32Le => "pcm_s32le",
            Self::PcmF32Le => "pcm_f32le",
            Self::PcmF64Le => "pcm_f64le",
            Self::PcmAlaw => "pcm_alaw",
            Self::PcmMulaw => "pcm_mulaw",
            Self::AdpcmImaWav => "adpcm_ima_wav",
            Self::AdpcmMs => "adpcm_ms",
            Self::Opus => "opus",
        }
    }
}

/// Interleaved little-endian sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// Count and spatial role of the channels in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    /// `n` channels with no particular spatial assignment.
    Discrete(u16),
}

impl ChannelLayout {
    pub fn from_channels(channels: u16) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            n => Self::Discrete(n),
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Discrete(n) => n,
        }
    }
}

/// The (rate, sample format, channel layout) triple spoken by the resampler
/// and the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub layout: ChannelLayout,
}

impl AudioParams {
    pub fn new(sample_rate: u32, format: SampleFormat, layout: ChannelLayout) -> Self {
        Self {
            sample_rate,
            format,
            layout,
        }
    }

    pub fn channels(&self) -> u16 {
        self.layout.channels()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels() as usize
    }

    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// The raw PCM stream spec describing these parameters.
    pub fn to_stream_spec(&self) -> StreamSpec {
        StreamSpec {
            sample_rate: self.sample_rate,
            bits_per_sample: self.format.bits_per_sample(),
            channels: self.channels(),
            codec_id: CodecId::pcm_for(self.format),
            ..StreamSpec::default()
        }
    }
}

/// Stream parameters derived from a live source or constructed literally.
///
/// Copied by value into every codec operation; never mutated by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Sample rate in Hz (must be > 0).
    pub sample_rate: u32,

    /// Bits per stored sample: 8, 16, 24 or 32.
    pub bits_per_sample: u16,

    /// Number of interleaved channels (>= 1).
    pub channels: u16,

    pub codec_id: CodecId,

    /// Audio buffer size in frames, used to size playback chunks.
    pub samples: u16,
}

/// Upper bound on interleaved channels accepted by `validate` and WAV parsing.
pub const MAX_CHANNELS: u16 = 256;

impl StreamSpec {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16, codec_id: CodecId) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            codec_id,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), MediaError> {
        if self.sample_rate == 0 {
            return Err(MediaError::ConfigurationFailed("sample rate must be positive".into()));
        }
        if ![8, 16, 24, 32].contains(&self.bits_per_sample) {
            return Err(MediaError::ConfigurationFailed(format!(
                "unsupported bit depth: {}",
                self.bits_per_sample
            )));
        }
        if self.channels == 0 {
            return Err(MediaError::ConfigurationFailed("channel count must be at least 1".into()));
        }
        if self.channels > MAX_CHANNELS {
            return Err(MediaError::UnsupportedSampleFormat(format!(
                "{} channels exceeds the limit of {}",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.samples == 0 {
            return Err(MediaError::ConfigurationFailed("buffer sample count must be positive".into()));
        }
        Ok(())
    }

    /// Bytes in one interleaved frame (`bits_per_sample * channels / 8`).
    /// Saturates at `u16::MAX` for specs that `validate` would reject.
    pub fn block_align(&self) -> u16 {
        let align = u32::from(self.bits_per_sample) * u32::from(self.channels) / 8;
        u16::try_from(align).unwrap_or(u16::MAX)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }

    /// Sample encoding of the stored PCM payload.
    pub fn sample_format(&self) -> Result<SampleFormat, MediaError> {
        match (self.codec_id, self.bits_per_sample) {
            (CodecId::PcmF32Le, 32) => Ok(SampleFormat::F32),
            (CodecId::PcmF64Le, 64) => Ok(SampleFormat::F64),
            (CodecId::PcmU8, 8) => Ok(SampleFormat::U8),
            (CodecId::PcmS16Le, 16) => Ok(SampleFormat::S16),
            (CodecId::PcmS32Le, 32) => Ok(SampleFormat::S32),
            (codec, bits) => Err(MediaError::UnsupportedSampleFormat(format!(
                "{} with {} bits per sample has no raw sample format",
                codec.name(),
                bits
            ))),
        }
    }

    pub fn layout(&self) -> ChannelLayout {
        ChannelLayout::from_channels(self.channels)
    }

    pub fn audio_params(&self) -> Result<AudioParams, MediaError> {
        Ok(AudioParams::new(self.sample_rate, self.sample_format()?, self.layout()))
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 32,
            channels: 2,
            codec_id: CodecId::PcmF32Le,
            samples: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_float_stereo() {
        let spec = StreamSpec::default();
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.sample_format().unwrap(), SampleFormat::F32);
        assert_eq!(spec.block_align(), 8);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let zero_rate = StreamSpec {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(zero_rate.validate(), Err(MediaError::ConfigurationFailed(_))));

        let odd_bits = StreamSpec {
            bits_per_sample: 12,
            ..Default::default()
        };
        assert!(odd_bits.validate().is_err());

        let no_channels = StreamSpec {
            channels: 0,
            ..Default::default()
        };
        assert!(no_channels.validate().is_err());
    }

    #[test]
    fn wide_channel_counts_do_not_overflow() {
        let spec = StreamSpec::new(48000, 32, 2048, CodecId::PcmS32Le);
        assert!(matches!(spec.validate(), Err(MediaError::UnsupportedSampleFormat(_))));
        assert_eq!(spec.block_align(), 8192);
        assert_eq!(spec.byte_rate(), 48000 * 8192);

        let extreme = StreamSpec::new(u32::MAX, 32, u16::MAX, CodecId::PcmS32Le);
        assert_eq!(extreme.block_align(), u16::MAX);
        assert_eq!(extreme.byte_rate(), u32::MAX);

        let widest = StreamSpec::new(48000, 32, MAX_CHANNELS, CodecId::PcmS32Le);
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn derived_sizes() {
        let spec = StreamSpec::new(44100, 16, 2, CodecId::PcmS16Le);
        assert_eq!(spec.block_align(), 4);
        assert_eq!(spec.byte_rate(), 176400);
    }

    #[test]
    fn s24_has_no_raw_format() {
        let spec = StreamSpec::new(48000, 24, 2, CodecId::PcmS24Le);
        assert!(matches!(spec.sample_format(), Err(MediaError::UnsupportedSampleFormat(_))));
    }

    #[test]
    fn params_round_trip_through_spec() {
        let params = AudioParams::new(48000, SampleFormat::S16, ChannelLayout::Mono);
        let spec = params.to_stream_spec();
        assert_eq!(spec.codec_id, CodecId::PcmS16Le);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.audio_params().unwrap(), params);
        assert_eq!(params.byte_rate(), 96000);
    }

    #[test]
    fn layout_from_channels() {
        assert_eq!(ChannelLayout::from_channels(1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::from_channels(2), ChannelLayout::Stereo);
        assert_eq!(ChannelLayout::from_channels(6), ChannelLayout::Discrete(6));
        assert_eq!(ChannelLayout::Discrete(6).channels(), 6);
    }
}
