pub mod pull_slot;
pub mod resampler;
pub mod ring_buffer;
pub mod sample_convert;
pub mod wav_format;
