//! Codec protocol and registry.
//!
//! Encoders and decoders follow a send/receive protocol: push one unit of
//! input, then pull outputs until the codec asks for more.
//!
//! ```text
//! encoder: send_frame(Some(frame)) → receive_packet()* → ... → send_frame(None) → receive_packet()* → EndOfStream
//! decoder: send_packet(Some(pkt))  → receive_frame()*  → ... → send_packet(None) → receive_frame()*  → EndOfStream
//! ```
//!
//! Containers are split from codecs: a `PacketParser` turns a byte stream
//! into packets, the encoder's `header_packets` plus its data packets are
//! what a container writer frames.

pub mod ogg;
pub mod opus;
pub mod transcoder;

use crate::models::error::MediaError;
use crate::models::stream_spec::{AudioParams, CodecId, SampleFormat};

/// A block of interleaved raw samples.
///
/// The buffer is allocated once at `capacity` samples per channel and
/// reused; `samples` marks how much of it is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    params: AudioParams,
    samples: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Zeroed frame holding `capacity` samples per channel.
    pub fn new(params: AudioParams, capacity: usize) -> Self {
        Self {
            params,
            samples: capacity,
            data: vec![0u8; capacity * params.bytes_per_frame()],
        }
    }

    /// Frame over existing interleaved bytes; a trailing partial sample is
    /// dropped.
    pub fn from_bytes(params: AudioParams, mut data: Vec<u8>) -> Self {
        let bytes_per_frame = params.bytes_per_frame().max(1);
        let samples = data.len() / bytes_per_frame;
        data.truncate(samples * bytes_per_frame);
        Self { params, samples, data }
    }

    pub fn params(&self) -> &AudioParams {
        &self.params
    }

    /// Valid samples per channel.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn capacity(&self) -> usize {
        self.data.len() / self.params.bytes_per_frame().max(1)
    }

    /// Shrink or regrow the valid region, up to `capacity`.
    pub fn set_samples(&mut self, samples: usize) {
        self.samples = samples.min(self.capacity());
    }

    /// The valid interleaved bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.samples * self.params.bytes_per_frame()]
    }

    /// The whole buffer, for reading input straight into the frame.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(mut self) -> Vec<u8> {
        let len = self.samples * self.params.bytes_per_frame();
        self.data.truncate(len);
        self.data
    }
}

/// A unit of compressed bitstream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Container timestamp of the last sample this packet completes, when
    /// known.
    pub granule: Option<u64>,
    /// Last packet of its logical stream.
    pub end_of_stream: bool,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            granule: None,
            end_of_stream: false,
        }
    }
}

/// Outcome of a receive call.
#[derive(Debug, Clone, PartialEq)]
pub enum Receive<T> {
    Ready(T),
    /// Nothing buffered; send more input.
    NeedMoreInput,
    /// Flushed and fully drained.
    EndOfStream,
}

pub trait AudioEncoder: Send {
    /// Stream parameters the encoder was opened with.
    fn params(&self) -> AudioParams;

    /// Samples per channel the encoder expects in each frame. Only the
    /// final frame may be shorter.
    fn frame_samples(&self) -> usize;

    /// Codec setup packets a container must write before any data packet.
    fn header_packets(&self) -> Vec<Packet>;

    /// Submit one frame, or `None` to flush.
    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<(), MediaError>;

    fn receive_packet(&mut self) -> Result<Receive<Packet>, MediaError>;
}

pub trait AudioDecoder: Send {
    /// Output parameters, known once the stream headers have been seen.
    fn params(&self) -> Option<AudioParams>;

    /// Submit one packet, or `None` to flush.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), MediaError>;

    fn receive_frame(&mut self) -> Result<Receive<Frame>, MediaError>;
}

/// Incremental container demuxer.
pub trait PacketParser: Send {
    /// Feed `data` and try to produce one packet.
    ///
    /// Returns how many bytes of `data` were consumed. While completed
    /// packets are queued the parser consumes nothing and returns one
    /// packet per call; call with an empty slice at end of input to drain.
    fn parse(&mut self, data: &[u8]) -> Result<(usize, Option<Packet>), MediaError>;
}

pub type EncoderFactory = fn(&AudioParams, u8) -> Result<Box<dyn AudioEncoder>, MediaError>;
pub type DecoderFactory = fn(&AudioParams) -> Result<Box<dyn AudioDecoder>, MediaError>;
pub type ParserFactory = fn() -> Box<dyn PacketParser>;

pub struct EncoderDescriptor {
    pub codec: CodecId,
    pub name: &'static str,
    /// File extension for the container this encoder's packets go into.
    pub extension: &'static str,
    pub sample_formats: &'static [SampleFormat],
    pub sample_rates: &'static [u32],
    pub create: EncoderFactory,
}

impl EncoderDescriptor {
    pub fn supports_format(&self, format: SampleFormat) -> bool {
        self.sample_formats.contains(&format)
    }

    pub fn supports_rate(&self, sample_rate: u32) -> bool {
        self.sample_rates.contains(&sample_rate)
    }
}

pub struct DecoderDescriptor {
    pub codec: CodecId,
    pub name: &'static str,
    pub sample_formats: &'static [SampleFormat],
    pub sample_rates: &'static [u32],
    pub create: DecoderFactory,
}

pub struct ParserDescriptor {
    pub codec: CodecId,
    pub name: &'static str,
    pub create: ParserFactory,
}

static ENCODERS: &[EncoderDescriptor] = &[EncoderDescriptor {
    codec: CodecId::Opus,
    name: "libopus",
    extension: "opus",
    sample_formats: opus::SAMPLE_FORMATS,
    sample_rates: opus::SAMPLE_RATES,
    create: opus::create_encoder,
}];

static DECODERS: &[DecoderDescriptor] = &[DecoderDescriptor {
    codec: CodecId::Opus,
    name: "libopus",
    sample_formats: opus::SAMPLE_FORMATS,
    sample_rates: opus::SAMPLE_RATES,
    create: opus::create_decoder,
}];

static PARSERS: &[ParserDescriptor] = &[ParserDescriptor {
    codec: CodecId::Opus,
    name: "ogg",
    create: ogg::create_parser,
}];

pub fn find_encoder(codec: CodecId) -> Option<&'static EncoderDescriptor> {
    ENCODERS.iter().find(|d| d.codec == codec)
}

pub fn find_decoder(codec: CodecId) -> Option<&'static DecoderDescriptor> {
    DECODERS.iter().find(|d| d.codec == codec)
}

pub fn find_parser(codec: CodecId) -> Option<&'static ParserDescriptor> {
    PARSERS.iter().find(|d| d.codec == codec)
}
