use thiserror::Error;

/// Errors that can occur across the media I/O pipeline.
///
/// Every public operation in this crate returns `Result<_, MediaError>`.
/// `WouldBlock` is the only transient kind; capture loops retry it instead
/// of surfacing it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("io error: {0}")]
    Io(String),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("codec not found: {0}")]
    CodecNotFound(String),

    #[error("codec initialization failed: {0}")]
    CodecInitError(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("resource temporarily unavailable")]
    WouldBlock,

    #[error("device busy")]
    DeviceBusy,

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl MediaError {
    /// Whether the operation may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::DeviceBusy)
    }
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
