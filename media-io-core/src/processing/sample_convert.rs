//! Pure-math sample format and channel layout conversion.
//!
//! Everything passes through planar `f64` with symmetric power-of-two
//! scaling, so integer formats up to 32 bits survive a decode/encode cycle
//! bit-exactly. Interleaved bytes are always little-endian.

use crate::models::stream_spec::SampleFormat;

const S16_SCALE: f64 = 32768.0;
const S32_SCALE: f64 = 2147483648.0;
const U8_SCALE: f64 = 128.0;

/// Append the whole frames in `bytes` to `planar` (one `Vec` per channel).
///
/// Trailing bytes that do not form a whole frame are ignored. Returns the
/// number of frames decoded.
pub fn decode_interleaved(bytes: &[u8], format: SampleFormat, planar: &mut [Vec<f64>]) -> usize {
    let channels = planar.len();
    if channels == 0 {
        return 0;
    }
    let width = format.bytes_per_sample();
    let frames = bytes.len() / (width * channels);

    for frame in bytes.chunks_exact(width * channels) {
        for (ch, sample) in frame.chunks_exact(width).enumerate() {
            planar[ch].push(decode_sample(sample, format));
        }
    }
    frames
}

/// Interleave `frames` frames of `planar`, starting at `offset`, into `out`.
pub fn encode_interleaved(
    planar: &[Vec<f64>],
    offset: usize,
    frames: usize,
    format: SampleFormat,
    out: &mut Vec<u8>,
) {
    out.reserve(frames * planar.len() * format.bytes_per_sample());
    for i in offset..offset + frames {
        for channel in planar {
            encode_sample(channel[i], format, out);
        }
    }
}

fn decode_sample(bytes: &[u8], format: SampleFormat) -> f64 {
    match format {
        SampleFormat::U8 => (bytes[0] as f64 - U8_SCALE) / U8_SCALE,
        SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64 / S16_SCALE,
        SampleFormat::S32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / S32_SCALE
        }
        SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleFormat::F64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            f64::from_le_bytes(raw)
        }
    }
}

fn encode_sample(sample: f64, format: SampleFormat, out: &mut Vec<u8>) {
    match format {
        SampleFormat::U8 => {
            let value = (sample * U8_SCALE + U8_SCALE).round().clamp(0.0, 255.0) as u8;
            out.push(value);
        }
        SampleFormat::S16 => {
            let value = (sample * S16_SCALE).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
        SampleFormat::S32 => {
            let value = (sample * S32_SCALE).round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            out.extend_from_slice(&value.to_le_bytes());
        }
        SampleFormat::F32 => out.extend_from_slice(&(sample as f32).to_le_bytes()),
        SampleFormat::F64 => out.extend_from_slice(&sample.to_le_bytes()),
    }
}

/// Map planar audio onto `out_channels` channels.
///
/// - same count: unchanged
/// - mono → N: the mono channel is duplicated into every output channel
/// - N → mono: channels are averaged per frame
/// - otherwise: channels are copied by index, extra outputs are silent
pub fn remap_channels(planar: Vec<Vec<f64>>, out_channels: usize) -> Vec<Vec<f64>> {
    let in_channels = planar.len();
    if in_channels == out_channels || in_channels == 0 {
        return planar;
    }
    let frames = planar[0].len();

    if in_channels == 1 {
        let mono = &planar[0];
        return (0..out_channels).map(|_| mono.clone()).collect();
    }

    if out_channels == 1 {
        return vec![downmix_to_mono(&planar)];
    }

    (0..out_channels)
        .map(|ch| match planar.get(ch) {
            Some(channel) => channel.clone(),
            None => vec![0.0; frames],
        })
        .collect()
}

/// Average all channels of planar audio into one.
pub fn downmix_to_mono(planar: &[Vec<f64>]) -> Vec<f64> {
    let channels = planar.len();
    if channels == 0 {
        return Vec::new();
    }
    let frames = planar[0].len();
    let scale = 1.0 / channels as f64;
    (0..frames)
        .map(|i| planar.iter().map(|channel| channel[i]).sum::<f64>() * scale)
        .collect()
}

/// Little-endian bytes of interleaved 16-bit samples.
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Interleaved 16-bit samples from little-endian bytes.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Little-endian bytes of interleaved 32-bit float samples.
pub fn f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Interleaved 32-bit float samples from little-endian bytes.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn decode(bytes: &[u8], format: SampleFormat, channels: usize) -> Vec<Vec<f64>> {
        let mut planar = vec![Vec::new(); channels];
        decode_interleaved(bytes, format, &mut planar);
        planar
    }

    fn encode(planar: &[Vec<f64>], format: SampleFormat) -> Vec<u8> {
        let mut out = Vec::new();
        encode_interleaved(planar, 0, planar[0].len(), format, &mut out);
        out
    }

    #[test]
    fn s16_survives_round_trip() {
        let samples: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX, 7];
        let bytes = i16_to_bytes(&samples);
        let planar = decode(&bytes, SampleFormat::S16, 2);
        assert_eq!(planar[0].len(), 4);
        assert_eq!(encode(&planar, SampleFormat::S16), bytes);
    }

    #[test]
    fn s32_and_u8_survive_round_trip() {
        let mut bytes = Vec::new();
        for v in [i32::MIN, -1, 0, 1, i32::MAX, 123_456_789] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let planar = decode(&bytes, SampleFormat::S32, 1);
        assert_eq!(encode(&planar, SampleFormat::S32), bytes);

        let bytes: Vec<u8> = (0..=255).collect();
        let planar = decode(&bytes, SampleFormat::U8, 1);
        assert_eq!(encode(&planar, SampleFormat::U8), bytes);
    }

    #[test]
    fn format_conversion_scales() {
        let planar = decode(&i16_to_bytes(&[16384, -16384]), SampleFormat::S16, 1);
        assert_relative_eq!(planar[0][0], 0.5);
        assert_relative_eq!(planar[0][1], -0.5);

        let floats = bytes_to_f32(&encode(&planar, SampleFormat::F32));
        assert_relative_eq!(floats[0], 0.5);
        assert_relative_eq!(floats[1], -0.5);
    }

    #[test]
    fn encode_clamps_out_of_range() {
        let planar = vec![vec![1.5, -1.5]];
        let samples = bytes_to_i16(&encode(&planar, SampleFormat::S16));
        assert_eq!(samples, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn partial_frames_are_ignored() {
        let mut planar = vec![Vec::new(), Vec::new()];
        let frames = decode_interleaved(&[0, 0, 0, 0, 0, 0, 0], SampleFormat::S16, &mut planar);
        assert_eq!(frames, 1);
        assert_eq!(planar[1].len(), 1);
    }

    #[test]
    fn mono_duplicates_to_stereo() {
        let stereo = remap_channels(vec![vec![0.1, 0.2]], 2);
        assert_eq!(stereo, vec![vec![0.1, 0.2], vec![0.1, 0.2]]);
    }

    #[test]
    fn stereo_downmixes_to_mono() {
        let mono = remap_channels(vec![vec![0.2, 0.4], vec![0.8, 0.6]], 1);
        assert_eq!(mono.len(), 1);
        assert_relative_eq!(mono[0][0], 0.5);
        assert_relative_eq!(mono[0][1], 0.5);
    }

    #[test]
    fn stereo_to_four_pads_silence() {
        let quad = remap_channels(vec![vec![0.1], vec![0.2]], 4);
        assert_eq!(quad, vec![vec![0.1], vec![0.2], vec![0.0], vec![0.0]]);
    }
}
