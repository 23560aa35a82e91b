/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → opening → capturing → stopping → idle
///          ↓
///         idle (destination could not be opened)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Opening,
    Capturing,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// Whether a worker thread currently owns the session's resources.
    pub fn is_busy(&self) -> bool {
        !self.is_idle()
    }
}

/// Playback session state machine.
///
/// State transitions:
/// ```text
/// idle → loading → playing → idle
///           ↓
///          idle (device or file could not be opened)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
}

impl PlaybackState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Either session's state, as reported to a `SessionDelegate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Capture(CaptureState),
    Playback(PlaybackState),
}
