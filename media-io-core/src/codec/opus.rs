//! Opus codec over libopus, packetized for Ogg encapsulation (RFC 7845).
//!
//! Granule positions count 48 kHz samples including the encoder's
//! pre-skip, whatever the input rate. The final packet's granule marks
//! where real audio ends so decoders can trim the zero padding that fills
//! out the last frame and covers the encoder lookahead.

use std::collections::VecDeque;
use std::ffi::CStr;

use crate::codec::{AudioDecoder, AudioEncoder, Frame, Packet, Receive};
use crate::models::error::MediaError;
use crate::models::stream_spec::{AudioParams, ChannelLayout, SampleFormat};
use crate::processing::sample_convert::{bytes_to_f32, bytes_to_i16, f32_to_bytes, i16_to_bytes};

pub const SAMPLE_FORMATS: &[SampleFormat] = &[SampleFormat::S16, SampleFormat::F32];
pub const SAMPLE_RATES: &[u32] = &[8000, 12000, 16000, 24000, 48000];

/// Value 2049 = OPUS_APPLICATION_AUDIO (music / mixed content).
const OPUS_APPLICATION_AUDIO: i32 = 2049;
const GRANULE_RATE: u64 = 48000;
/// Upper bound for one Opus packet (RFC 6716 recommends 4000 bytes).
const MAX_PACKET_BYTES: usize = 4000;
/// Longest frame a packet can carry.
const MAX_FRAME_MS: u32 = 120;
/// Bits per second per channel for VBR quality 1..=5.
const QUALITY_BITRATES: [i32; 5] = [32_000, 48_000, 64_000, 96_000, 128_000];

const OPUS_HEAD: &[u8; 8] = b"OpusHead";
const OPUS_TAGS: &[u8; 8] = b"OpusTags";
const VENDOR: &str = concat!("media-io ", env!("CARGO_PKG_VERSION"));

fn error_string(code: i32) -> String {
    // SAFETY: opus_strerror returns a static NUL-terminated string for any code.
    let message = unsafe { CStr::from_ptr(libopus_sys::opus_strerror(code)) };
    format!("{} ({})", message.to_string_lossy(), code)
}

fn check_params(params: &AudioParams) -> Result<(), MediaError> {
    if !SAMPLE_RATES.contains(&params.sample_rate) {
        return Err(MediaError::CodecInitError(format!(
            "opus does not support {} Hz",
            params.sample_rate
        )));
    }
    if !matches!(params.channels(), 1 | 2) {
        return Err(MediaError::CodecInitError(format!(
            "opus supports mono or stereo, got {} channels",
            params.channels()
        )));
    }
    if !SAMPLE_FORMATS.contains(&params.format) {
        return Err(MediaError::UnsupportedSampleFormat(format!(
            "opus cannot take {:?} samples",
            params.format
        )));
    }
    Ok(())
}

pub fn create_encoder(params: &AudioParams, vbr_quality: u8) -> Result<Box<dyn AudioEncoder>, MediaError> {
    Ok(Box::new(OpusEncoder::new(*params, vbr_quality)?))
}

pub fn create_decoder(requested: &AudioParams) -> Result<Box<dyn AudioDecoder>, MediaError> {
    Ok(Box::new(OpusDecoder::new(requested)))
}

/// Opus encoder producing 20 ms packets.
///
/// Owns its libopus handle; the handle is destroyed on drop. Moved into a
/// single worker thread, never shared.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    params: AudioParams,
    frame_samples: usize,
    /// Encoder lookahead at the input rate.
    lookahead: u64,
    /// Lookahead at 48 kHz, as written to OpusHead.
    preskip: u64,
    real_samples: u64,
    fed_samples: u64,
    pending: VecDeque<Packet>,
    flushed: bool,
    pcm_i16: Vec<i16>,
    pcm_f32: Vec<f32>,
    output: Vec<u8>,
}

// SAFETY: the libopus encoder is usable from any single thread. The handle
// is owned exclusively by this value and OpusEncoder is not Sync.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// Open an encoder for `params` at VBR quality 1 (smallest) to 5.
    pub fn new(params: AudioParams, vbr_quality: u8) -> Result<Self, MediaError> {
        check_params(&params)?;
        let bitrate_per_channel = match vbr_quality {
            1..=5 => QUALITY_BITRATES[vbr_quality as usize - 1],
            _ => {
                return Err(MediaError::CodecInitError(format!(
                    "VBR quality must be 1-5, got {}",
                    vbr_quality
                )))
            }
        };
        let channels = params.channels() as i32;

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(params.sample_rate as i32, channels, OPUS_APPLICATION_AUDIO, &mut error)
        };
        if encoder.is_null() || error != 0 {
            return Err(MediaError::CodecInitError(format!(
                "failed to create opus encoder: {}",
                error_string(error)
            )));
        }

        // From here on `this` owns the handle and destroys it on any error.
        let mut this = Self {
            encoder,
            params,
            frame_samples: params.sample_rate as usize / 50,
            lookahead: 0,
            preskip: 0,
            real_samples: 0,
            fed_samples: 0,
            pending: VecDeque::new(),
            flushed: false,
            pcm_i16: Vec::new(),
            pcm_f32: Vec::new(),
            output: vec![0u8; MAX_PACKET_BYTES],
        };

        this.ctl(libopus_sys::OPUS_SET_BITRATE_REQUEST as i32, bitrate_per_channel * channels)?;
        this.ctl(libopus_sys::OPUS_SET_VBR_REQUEST as i32, 1)?;

        let mut lookahead: i32 = 0;
        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                this.encoder,
                libopus_sys::OPUS_GET_LOOKAHEAD_REQUEST as i32,
                &mut lookahead as *mut i32,
            )
        };
        if result != 0 {
            return Err(MediaError::CodecInitError(format!(
                "failed to query lookahead: {}",
                error_string(result)
            )));
        }
        this.lookahead = lookahead.max(0) as u64;
        this.preskip = this.to_granule(this.lookahead);

        log::debug!(
            "opus encoder {} Hz x{} at {} bps, preskip {}",
            params.sample_rate,
            channels,
            bitrate_per_channel * channels,
            this.preskip
        );
        Ok(this)
    }

    fn ctl(&mut self, request: i32, value: i32) -> Result<(), MediaError> {
        let result = unsafe { libopus_sys::opus_encoder_ctl(self.encoder, request, value) };
        if result != 0 {
            return Err(MediaError::CodecInitError(format!(
                "opus ctl {} failed: {}",
                request,
                error_string(result)
            )));
        }
        Ok(())
    }

    pub fn preskip(&self) -> u64 {
        self.preskip
    }

    fn to_granule(&self, samples: u64) -> u64 {
        samples * GRANULE_RATE / self.params.sample_rate as u64
    }

    fn final_granule(&self) -> u64 {
        self.preskip + self.to_granule(self.real_samples)
    }

    /// Encode one frame; `data` may hold fewer samples than a full frame,
    /// the rest is silence.
    fn encode_frame(&mut self, data: &[u8]) -> Result<(), MediaError> {
        let values = self.frame_samples * self.params.channels() as usize;
        let len = match self.params.format {
            SampleFormat::F32 => {
                let samples = bytes_to_f32(data);
                self.pcm_f32.clear();
                self.pcm_f32.extend_from_slice(&samples[..samples.len().min(values)]);
                self.pcm_f32.resize(values, 0.0);
                unsafe {
                    libopus_sys::opus_encode_float(
                        self.encoder,
                        self.pcm_f32.as_ptr(),
                        self.frame_samples as i32,
                        self.output.as_mut_ptr(),
                        self.output.len() as i32,
                    )
                }
            }
            _ => {
                let samples = bytes_to_i16(data);
                self.pcm_i16.clear();
                self.pcm_i16.extend_from_slice(&samples[..samples.len().min(values)]);
                self.pcm_i16.resize(values, 0);
                unsafe {
                    libopus_sys::opus_encode(
                        self.encoder,
                        self.pcm_i16.as_ptr(),
                        self.frame_samples as i32,
                        self.output.as_mut_ptr(),
                        self.output.len() as i32,
                    )
                }
            }
        };

        if len < 0 {
            return Err(MediaError::Codec(format!("opus encode failed: {}", error_string(len))));
        }

        self.fed_samples += self.frame_samples as u64;
        let granule = self.to_granule(self.fed_samples).min(self.final_granule());
        self.pending.push_back(Packet {
            data: self.output[..len as usize].to_vec(),
            granule: Some(granule),
            end_of_stream: false,
        });
        Ok(())
    }
}

impl AudioEncoder for OpusEncoder {
    fn params(&self) -> AudioParams {
        self.params
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn header_packets(&self) -> Vec<Packet> {
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(OPUS_HEAD);
        head.push(1);
        head.push(self.params.channels() as u8);
        head.extend_from_slice(&(self.preskip.min(u16::MAX as u64) as u16).to_le_bytes());
        head.extend_from_slice(&self.params.sample_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0);

        let mut tags = Vec::with_capacity(16 + VENDOR.len());
        tags.extend_from_slice(OPUS_TAGS);
        tags.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
        tags.extend_from_slice(VENDOR.as_bytes());
        tags.extend_from_slice(&0u32.to_le_bytes());

        vec![Packet::new(head), Packet::new(tags)]
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<(), MediaError> {
        let Some(frame) = frame else {
            if self.flushed {
                return Ok(());
            }
            self.flushed = true;
            // Pad until the decoder can emit every real sample past the preskip.
            while self.fed_samples < self.real_samples + self.lookahead {
                self.encode_frame(&[])?;
            }
            return Ok(());
        };

        if self.flushed {
            return Err(MediaError::InvalidState("encoder already flushed".into()));
        }
        if frame.params() != &self.params {
            return Err(MediaError::Codec("frame parameters do not match the encoder".into()));
        }
        if frame.samples() > self.frame_samples {
            return Err(MediaError::Codec(format!(
                "frame of {} samples exceeds the {} sample frame size",
                frame.samples(),
                self.frame_samples
            )));
        }
        if frame.samples() == 0 {
            return Ok(());
        }
        if self.real_samples < self.fed_samples {
            return Err(MediaError::Codec("only the final frame may be short".into()));
        }

        self.real_samples += frame.samples() as u64;
        self.encode_frame(frame.data())
    }

    fn receive_packet(&mut self) -> Result<Receive<Packet>, MediaError> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Receive::Ready(packet));
        }
        Ok(if self.flushed {
            Receive::EndOfStream
        } else {
            Receive::NeedMoreInput
        })
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Head,
    Tags,
    Audio,
}

/// Opus decoder reading the packets of one Ogg Opus stream, header
/// packets included.
///
/// Output is interleaved S16 or F32 at any libopus rate. The libopus
/// handle is created once OpusHead has been read.
pub struct OpusDecoder {
    decoder: *mut libopus_sys::OpusDecoder,
    output_rate: u32,
    format: SampleFormat,
    channels: u16,
    stage: Stage,
    preskip: u64,
    skip_remaining: u64,
    emitted: u64,
    frames: VecDeque<Frame>,
    flushed: bool,
    pcm_i16: Vec<i16>,
    pcm_f32: Vec<f32>,
}

// SAFETY: as for OpusEncoder, the handle is exclusively owned and only
// used from the thread currently holding the decoder.
unsafe impl Send for OpusDecoder {}

impl OpusDecoder {
    /// Decoder producing `requested`'s rate and format where libopus
    /// supports them, else 48 kHz / S16. The channel count comes from the
    /// stream.
    pub fn new(requested: &AudioParams) -> Self {
        let output_rate = if SAMPLE_RATES.contains(&requested.sample_rate) {
            requested.sample_rate
        } else {
            48000
        };
        let format = if SAMPLE_FORMATS.contains(&requested.format) {
            requested.format
        } else {
            SampleFormat::S16
        };
        Self {
            decoder: std::ptr::null_mut(),
            output_rate,
            format,
            channels: 0,
            stage: Stage::Head,
            preskip: 0,
            skip_remaining: 0,
            emitted: 0,
            frames: VecDeque::new(),
            flushed: false,
            pcm_i16: Vec::new(),
            pcm_f32: Vec::new(),
        }
    }

    fn output_params(&self) -> AudioParams {
        AudioParams::new(self.output_rate, self.format, ChannelLayout::from_channels(self.channels))
    }

    fn to_output_rate(&self, granule: u64) -> u64 {
        granule * self.output_rate as u64 / GRANULE_RATE
    }

    fn read_head(&mut self, data: &[u8]) -> Result<(), MediaError> {
        if data.len() < 19 || &data[0..8] != OPUS_HEAD {
            return Err(MediaError::MalformedContainer("stream does not start with OpusHead".into()));
        }
        if data[8] >> 4 != 0 {
            return Err(MediaError::MalformedContainer(format!(
                "unsupported OpusHead version {}",
                data[8]
            )));
        }
        let channels = data[9];
        let mapping_family = data[18];
        if !matches!(channels, 1 | 2) || mapping_family != 0 {
            return Err(MediaError::CodecInitError(format!(
                "unsupported channel mapping (family {}, {} channels)",
                mapping_family, channels
            )));
        }
        self.preskip = u16::from_le_bytes([data[10], data[11]]) as u64;
        let input_rate = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

        let mut error: i32 = 0;
        let decoder =
            unsafe { libopus_sys::opus_decoder_create(self.output_rate as i32, channels as i32, &mut error) };
        if decoder.is_null() || error != 0 {
            return Err(MediaError::CodecInitError(format!(
                "failed to create opus decoder: {}",
                error_string(error)
            )));
        }
        self.decoder = decoder;
        self.channels = channels as u16;
        self.skip_remaining = self.to_output_rate(self.preskip);

        log::debug!(
            "opus stream: {} ch, preskip {}, source rate {} Hz, decoding at {} Hz",
            channels,
            self.preskip,
            input_rate,
            self.output_rate
        );
        Ok(())
    }

    fn decode_packet(&mut self, packet: &Packet) -> Result<(), MediaError> {
        if packet.data.is_empty() {
            return Ok(());
        }
        let channels = self.channels as usize;
        let max_samples = (self.output_rate * MAX_FRAME_MS / 1000) as usize;

        let decoded = match self.format {
            SampleFormat::F32 => {
                self.pcm_f32.resize(max_samples * channels, 0.0);
                unsafe {
                    libopus_sys::opus_decode_float(
                        self.decoder,
                        packet.data.as_ptr(),
                        packet.data.len() as i32,
                        self.pcm_f32.as_mut_ptr(),
                        max_samples as i32,
                        0,
                    )
                }
            }
            _ => {
                self.pcm_i16.resize(max_samples * channels, 0);
                unsafe {
                    libopus_sys::opus_decode(
                        self.decoder,
                        packet.data.as_ptr(),
                        packet.data.len() as i32,
                        self.pcm_i16.as_mut_ptr(),
                        max_samples as i32,
                        0,
                    )
                }
            }
        };
        if decoded < 0 {
            return Err(MediaError::Codec(format!("opus decode failed: {}", error_string(decoded))));
        }

        let decoded = decoded as u64;
        let start = self.skip_remaining.min(decoded);
        self.skip_remaining -= start;
        let mut end = decoded;
        if packet.end_of_stream {
            if let Some(granule) = packet.granule {
                let total = self.to_output_rate(granule.saturating_sub(self.preskip));
                end = end.min(start + total.saturating_sub(self.emitted));
            }
        }
        if end <= start {
            return Ok(());
        }

        let range = start as usize * channels..end as usize * channels;
        let bytes = match self.format {
            SampleFormat::F32 => f32_to_bytes(&self.pcm_f32[range]),
            _ => i16_to_bytes(&self.pcm_i16[range]),
        };
        self.emitted += end - start;
        self.frames.push_back(Frame::from_bytes(self.output_params(), bytes));
        Ok(())
    }
}

impl AudioDecoder for OpusDecoder {
    fn params(&self) -> Option<AudioParams> {
        (self.channels > 0).then(|| self.output_params())
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), MediaError> {
        let Some(packet) = packet else {
            self.flushed = true;
            return Ok(());
        };
        if self.flushed {
            return Err(MediaError::InvalidState("decoder already flushed".into()));
        }

        match self.stage {
            Stage::Head => {
                self.read_head(&packet.data)?;
                self.stage = Stage::Tags;
                Ok(())
            }
            Stage::Tags => {
                if !packet.data.starts_with(OPUS_TAGS) {
                    return Err(MediaError::MalformedContainer("missing OpusTags packet".into()));
                }
                self.stage = Stage::Audio;
                Ok(())
            }
            Stage::Audio => self.decode_packet(packet),
        }
    }

    fn receive_frame(&mut self) -> Result<Receive<Frame>, MediaError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Receive::Ready(frame));
        }
        Ok(if self.flushed {
            Receive::EndOfStream
        } else {
            Receive::NeedMoreInput
        })
    }
}

impl Drop for OpusDecoder {
    fn drop(&mut self) {
        if !self.decoder.is_null() {
            unsafe { libopus_sys::opus_decoder_destroy(self.decoder) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rate: u32, format: SampleFormat, layout: ChannelLayout) -> AudioParams {
        AudioParams::new(rate, format, layout)
    }

    fn sine(samples: usize, rate: u32, channels: usize) -> Vec<u8> {
        let values: Vec<i16> = (0..samples)
            .flat_map(|i| {
                let v = ((i as f64 / rate as f64 * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
                std::iter::repeat(v).take(channels)
            })
            .collect();
        i16_to_bytes(&values)
    }

    /// Encode `pcm` and return header packets followed by data packets,
    /// the last one flagged as end of stream.
    fn encode_all(encoder: &mut OpusEncoder, pcm: &[u8]) -> Vec<Packet> {
        let mut packets = encoder.header_packets();
        let chunk = encoder.frame_samples() * encoder.params().bytes_per_frame();
        for piece in pcm.chunks(chunk) {
            let frame = Frame::from_bytes(encoder.params(), piece.to_vec());
            encoder.send_frame(Some(&frame)).unwrap();
            while let Receive::Ready(packet) = encoder.receive_packet().unwrap() {
                packets.push(packet);
            }
        }
        encoder.send_frame(None).unwrap();
        loop {
            match encoder.receive_packet().unwrap() {
                Receive::Ready(packet) => packets.push(packet),
                Receive::EndOfStream => break,
                Receive::NeedMoreInput => panic!("flushed encoder asked for input"),
            }
        }
        if let Some(last) = packets.last_mut() {
            last.end_of_stream = true;
        }
        packets
    }

    fn decode_all(decoder: &mut OpusDecoder, packets: &[Packet]) -> Vec<u8> {
        let mut out = Vec::new();
        for packet in packets {
            decoder.send_packet(Some(packet)).unwrap();
            while let Receive::Ready(frame) = decoder.receive_frame().unwrap() {
                out.extend_from_slice(frame.data());
            }
        }
        decoder.send_packet(None).unwrap();
        assert_eq!(decoder.receive_frame().unwrap(), Receive::EndOfStream);
        out
    }

    #[test]
    fn encoder_rejects_unsupported_params() {
        let stereo = ChannelLayout::Stereo;
        assert!(matches!(
            OpusEncoder::new(params(44100, SampleFormat::S16, stereo), 3),
            Err(MediaError::CodecInitError(_))
        ));
        assert!(matches!(
            OpusEncoder::new(params(48000, SampleFormat::S16, ChannelLayout::Discrete(3)), 3),
            Err(MediaError::CodecInitError(_))
        ));
        assert!(matches!(
            OpusEncoder::new(params(48000, SampleFormat::U8, stereo), 3),
            Err(MediaError::UnsupportedSampleFormat(_))
        ));
        assert!(matches!(
            OpusEncoder::new(params(48000, SampleFormat::S16, stereo), 0),
            Err(MediaError::CodecInitError(_))
        ));
    }

    #[test]
    fn header_packets_describe_stream() {
        let encoder = OpusEncoder::new(params(16000, SampleFormat::S16, ChannelLayout::Stereo), 2).unwrap();
        assert_eq!(encoder.frame_samples(), 320);

        let headers = encoder.header_packets();
        let head = &headers[0].data;
        assert_eq!(&head[0..8], b"OpusHead");
        assert_eq!(head[8], 1);
        assert_eq!(head[9], 2);
        assert_eq!(u16::from_le_bytes([head[10], head[11]]) as u64, encoder.preskip());
        assert_eq!(u32::from_le_bytes([head[12], head[13], head[14], head[15]]), 16000);
        assert!(headers[1].data.starts_with(b"OpusTags"));
    }

    #[test]
    fn final_granule_marks_real_length() {
        let p = params(48000, SampleFormat::S16, ChannelLayout::Mono);
        let mut encoder = OpusEncoder::new(p, 3).unwrap();
        let packets = encode_all(&mut encoder, &sine(1000, 48000, 1));

        let data = &packets[2..];
        let granules: Vec<u64> = data.iter().map(|p| p.granule.unwrap()).collect();
        assert!(granules.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*granules.last().unwrap(), encoder.preskip() + 1000);
    }

    #[test]
    fn decode_recovers_sample_count_and_channels() {
        let p = params(48000, SampleFormat::S16, ChannelLayout::Stereo);
        let mut encoder = OpusEncoder::new(p, 4).unwrap();
        let packets = encode_all(&mut encoder, &sine(2400, 48000, 2));

        let mut decoder = OpusDecoder::new(&p);
        let pcm = decode_all(&mut decoder, &packets);
        assert_eq!(decoder.params(), Some(p));
        assert_eq!(pcm.len(), 2400 * 4);
    }

    #[test]
    fn decode_to_other_rate_and_float() {
        let p = params(24000, SampleFormat::S16, ChannelLayout::Mono);
        let mut encoder = OpusEncoder::new(p, 3).unwrap();
        let packets = encode_all(&mut encoder, &sine(4800, 24000, 1));

        let requested = params(16000, SampleFormat::F32, ChannelLayout::Mono);
        let mut decoder = OpusDecoder::new(&requested);
        let pcm = decode_all(&mut decoder, &packets);
        assert_eq!(decoder.params(), Some(requested));
        assert_eq!(pcm.len(), 3200 * 4);
    }

    #[test]
    fn unsupported_request_falls_back() {
        let decoder = OpusDecoder::new(&params(44100, SampleFormat::U8, ChannelLayout::Stereo));
        assert_eq!(decoder.output_rate, 48000);
        assert_eq!(decoder.format, SampleFormat::S16);
        assert_eq!(decoder.params(), None);
    }

    #[test]
    fn audio_before_header_is_malformed() {
        let mut decoder = OpusDecoder::new(&params(48000, SampleFormat::S16, ChannelLayout::Mono));
        let result = decoder.send_packet(Some(&Packet::new(vec![0xfc, 0xff, 0xfe])));
        assert!(matches!(result, Err(MediaError::MalformedContainer(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let p = params(8000, SampleFormat::S16, ChannelLayout::Mono);
        let mut encoder = OpusEncoder::new(p, 1).unwrap();
        let frame = Frame::new(p, 161);
        assert!(matches!(encoder.send_frame(Some(&frame)), Err(MediaError::Codec(_))));
    }
}
