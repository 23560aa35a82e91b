//! Bridges between cpal sample types and the core's little-endian bytes.

use media_io_core::models::stream_spec::SampleFormat;

/// Core sample encoding for a cpal device format, if there is one.
pub fn core_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I16 => Some(SampleFormat::S16),
        cpal::SampleFormat::I32 => Some(SampleFormat::S32),
        cpal::SampleFormat::F32 => Some(SampleFormat::F32),
        cpal::SampleFormat::F64 => Some(SampleFormat::F64),
        _ => None,
    }
}

/// Byte value of silence for `format`.
pub fn silence_byte(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::U8 => 0x80,
        _ => 0,
    }
}

/// A sample with a fixed little-endian byte encoding.
pub trait LeSample: Copy + Sized {
    const WIDTH: usize;

    fn extend_bytes(samples: &[Self], out: &mut Vec<u8>);

    /// Decode whole samples from `bytes` into `out`. Slots past the end of
    /// `bytes` are left untouched.
    fn decode_into(bytes: &[u8], out: &mut [Self]);
}

macro_rules! le_sample {
    ($($ty:ty => $width:expr),* $(,)?) => {
        $(
            impl LeSample for $ty {
                const WIDTH: usize = $width;

                fn extend_bytes(samples: &[Self], out: &mut Vec<u8>) {
                    out.reserve(samples.len() * $width);
                    for sample in samples {
                        out.extend_from_slice(&sample.to_le_bytes());
                    }
                }

                fn decode_into(bytes: &[u8], out: &mut [Self]) {
                    for (slot, raw) in out.iter_mut().zip(bytes.chunks_exact($width)) {
                        let mut buf = [0u8; $width];
                        buf.copy_from_slice(raw);
                        *slot = <$ty>::from_le_bytes(buf);
                    }
                }
            }
        )*
    };
}

le_sample!(u8 => 1, i16 => 2, i32 => 4, f32 => 4, f64 => 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_map_to_core() {
        assert_eq!(core_format(cpal::SampleFormat::I16), Some(SampleFormat::S16));
        assert_eq!(core_format(cpal::SampleFormat::F32), Some(SampleFormat::F32));
        assert_eq!(core_format(cpal::SampleFormat::U16), None);
    }

    #[test]
    fn i16_bytes_are_little_endian() {
        let mut bytes = Vec::new();
        i16::extend_bytes(&[1, -2], &mut bytes);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff]);

        let mut decoded = [0i16; 3];
        i16::decode_into(&bytes, &mut decoded);
        assert_eq!(decoded, [1, -2, 0]);
    }

    #[test]
    fn f32_decode_ignores_partial_samples() {
        let mut bytes = Vec::new();
        f32::extend_bytes(&[0.5], &mut bytes);
        bytes.push(0xff);

        let mut decoded = [9.0f32; 2];
        f32::decode_into(&bytes, &mut decoded);
        assert_eq!(decoded, [0.5, 9.0]);
    }

    #[test]
    fn u8_silence_is_midpoint() {
        assert_eq!(silence_byte(SampleFormat::U8), 0x80);
        assert_eq!(silence_byte(SampleFormat::S16), 0);
    }
}
