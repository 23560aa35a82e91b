use crate::models::error::MediaError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionState;

/// Event delegate for session notifications.
///
/// All methods are called from the session's worker thread. Implementations
/// should marshal to a UI thread if needed.
pub trait SessionDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: SessionState);

    /// Called after every captured packet with the recording length so far.
    fn on_progress(&self, elapsed_ms: u64) {
        let _ = elapsed_ms;
    }

    /// Called when an error occurs on the worker.
    fn on_error(&self, error: &MediaError);

    /// Called when capture completes and the file is finalized.
    fn on_capture_finished(&self, result: &RecordingResult) {
        let _ = result;
    }
}
