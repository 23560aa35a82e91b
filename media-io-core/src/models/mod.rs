pub mod config;
pub mod device;
pub mod error;
pub mod recording_result;
pub mod state;
pub mod stream_spec;
