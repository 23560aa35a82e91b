pub mod audio_output;
pub mod capture_device;
pub mod session_delegate;
