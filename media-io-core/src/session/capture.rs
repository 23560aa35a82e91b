use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::models::config::{CaptureConfiguration, CaptureMode, DeviceOptions};
use crate::models::error::MediaError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::{CaptureState, SessionState};
use crate::models::stream_spec::StreamSpec;
use crate::processing::wav_format;
use crate::storage::metadata;
use crate::storage::wav_writer::{sha256_file, CaptureFileWriter};
use crate::traits::capture_device::{CaptureBackend, CaptureDevice};
use crate::traits::session_delegate::SessionDelegate;

type SharedDevice = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

/// Records packets from an opened capture device into a file.
///
/// ```text
/// [CaptureDevice] → read_packet → [worker thread] → [CaptureFileWriter] → finalize → RecordingResult
/// ```
///
/// The controller never blocks: `start` spawns the worker and `stop` only
/// clears the active flag. The worker borrows the device for the length of
/// the recording and hands it back when it exits, so one `open` serves any
/// number of recordings.
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfiguration,
    device: SharedDevice,
    device_name: Option<String>,
    active: Arc<AtomicBool>,
    state: Arc<Mutex<CaptureState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    worker: Option<JoinHandle<Result<RecordingResult, MediaError>>>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: CaptureConfiguration) -> Self {
        Self {
            backend,
            config,
            device: Arc::new(Mutex::new(None)),
            device_name: None,
            active: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            delegate: None,
            worker: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn configuration(&self) -> &CaptureConfiguration {
        &self.config
    }

    /// Replace the configuration used by the next recording.
    pub fn set_configuration(&mut self, config: CaptureConfiguration) -> Result<(), MediaError> {
        self.ensure_idle()?;
        self.config = config;
        Ok(())
    }

    /// Open the device called `name`, closing any device already open.
    pub fn open(&mut self, name: &str, options: &DeviceOptions) -> Result<(), MediaError> {
        self.ensure_idle()?;
        let device = self.backend.open(name, options).inspect_err(|e| {
            log::error!("failed to open capture device '{}': {}", name, e);
        })?;
        let spec = device.stream_spec();
        log::info!(
            "opened capture device '{}' ({} Hz, {} ch, {} bits)",
            name,
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );
        *self.device.lock() = Some(device);
        self.device_name = Some(name.to_string());
        Ok(())
    }

    pub fn close_device(&mut self) -> Result<(), MediaError> {
        self.ensure_idle()?;
        if self.device.lock().take().is_some() {
            log::info!("closed capture device '{}'", self.device_name.take().unwrap_or_default());
        }
        Ok(())
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Stream parameters of the open device.
    ///
    /// `None` when no device is open, or while a recording has it.
    pub fn device_spec(&self) -> Option<StreamSpec> {
        self.device.lock().as_ref().map(|d| d.stream_spec())
    }

    /// Open `name`, read its stream parameters and close it again.
    pub fn probe(&self, name: &str, options: &DeviceOptions) -> Result<StreamSpec, MediaError> {
        let device = self.backend.open(name, options)?;
        Ok(device.stream_spec())
    }

    /// Begin recording on a worker thread.
    ///
    /// Fails with `InvalidState` unless the session is idle with a device
    /// open. The destination file is created before the active flag is
    /// raised, so an unwritable path leaves the session idle.
    pub fn start(&mut self, mode: CaptureMode) -> Result<(), MediaError> {
        self.ensure_idle()?;
        self.reap_worker();

        let spec = self
            .device_spec()
            .ok_or_else(|| MediaError::InvalidState("no capture device open".into()))?;
        self.config.validate()?;
        if mode == CaptureMode::WavFramed {
            spec.validate()?;
        }

        let path = self.config.output_path.clone();
        let mut writer = match mode {
            CaptureMode::WavFramed => CaptureFileWriter::wav(path, spec),
            CaptureMode::RawPacketDump => CaptureFileWriter::raw(path),
        };
        writer
            .open()
            .inspect_err(|e| log::error!("cannot record to {}: {}", self.config.output_path.display(), e))?;

        let worker = CaptureWorker {
            device: self.device.clone(),
            active: self.active.clone(),
            state: self.state.clone(),
            delegate: self.delegate.clone(),
            config: self.config.clone(),
            mode,
            spec,
        };

        worker.transition(CaptureState::Opening);
        self.active.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("media-capture".into())
            .spawn(move || worker.run(writer));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                *self.state.lock() = CaptureState::Idle;
                log::error!("failed to spawn capture thread: {}", e);
                Err(MediaError::Io(format!("failed to spawn capture thread: {}", e)))
            }
        }
    }

    /// Ask the worker to finish. Returns immediately.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::info!("capture stop requested");
        }
    }

    /// Start when idle, stop when recording.
    pub fn record(&mut self, mode: CaptureMode) -> Result<(), MediaError> {
        if self.is_active() {
            self.stop();
            Ok(())
        } else {
            self.start(mode)
        }
    }

    /// Block until the current worker exits and return its result.
    pub fn wait(&mut self) -> Result<RecordingResult, MediaError> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| MediaError::InvalidState("no recording to wait for".into()))?;
        handle
            .join()
            .map_err(|_| MediaError::InvalidState("capture worker panicked".into()))?
    }

    fn ensure_idle(&self) -> Result<(), MediaError> {
        let busy = self.state.lock().is_busy() || self.worker.as_ref().is_some_and(|h| !h.is_finished());
        if busy {
            return Err(MediaError::InvalidState("a recording is in progress".into()));
        }
        Ok(())
    }

    /// Join a finished worker nobody waited for.
    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if let Ok(Err(e)) = handle.join() {
                log::debug!("previous recording had failed: {}", e);
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct CaptureWorker {
    device: SharedDevice,
    active: Arc<AtomicBool>,
    state: Arc<Mutex<CaptureState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    config: CaptureConfiguration,
    mode: CaptureMode,
    spec: StreamSpec,
}

impl CaptureWorker {
    fn run(self, writer: CaptureFileWriter) -> Result<RecordingResult, MediaError> {
        let outcome = self.record(writer);

        self.active.store(false, Ordering::SeqCst);
        self.transition(CaptureState::Idle);

        match &outcome {
            Ok(result) => {
                log::info!(
                    "recording {} finished: {} bytes, {:.2}s -> {}",
                    result.id,
                    result.data_size,
                    result.duration_secs,
                    result.wav_path.display()
                );
                if let Some(ref d) = self.delegate {
                    d.on_capture_finished(result);
                }
            }
            Err(e) => {
                log::error!("recording failed: {}", e);
                if let Some(ref d) = self.delegate {
                    d.on_error(e);
                }
            }
        }
        outcome
    }

    fn record(&self, writer: CaptureFileWriter) -> Result<RecordingResult, MediaError> {
        let mut device = self
            .device
            .lock()
            .take()
            .ok_or_else(|| MediaError::InvalidState("capture device was closed".into()))?;
        let outcome = self.capture(device.as_mut(), writer);
        *self.device.lock() = Some(device);
        outcome
    }

    fn capture(
        &self,
        device: &mut dyn CaptureDevice,
        mut writer: CaptureFileWriter,
    ) -> Result<RecordingResult, MediaError> {
        let path = writer.file_path().to_path_buf();
        self.transition(CaptureState::Capturing);

        let byte_rate = self.spec.byte_rate() as u64;
        let mut device_error = None;

        while self.active.load(Ordering::SeqCst) {
            match device.read_packet() {
                Ok(packet) => {
                    if packet.is_empty() {
                        continue;
                    }
                    if let Err(e) = writer.write(&packet) {
                        log::error!("write to {} failed, finalizing what was recorded: {}", path.display(), e);
                        if let Some(ref d) = self.delegate {
                            d.on_error(&e);
                        }
                        device_error = Some(e);
                        break;
                    }
                    if self.mode == CaptureMode::WavFramed && byte_rate > 0 {
                        if let Some(ref d) = self.delegate {
                            d.on_progress(1000 * writer.data_size() / byte_rate);
                        }
                    }
                }
                Err(e) if e.is_transient() => self.config.retry_policy.backoff(),
                Err(e) => {
                    log::error!("capture device failed, finalizing what was recorded: {}", e);
                    if let Some(ref d) = self.delegate {
                        d.on_error(&e);
                    }
                    device_error = Some(e);
                    break;
                }
            }
        }

        self.transition(CaptureState::Stopping);
        let data_size = writer.finalize()?;

        let wav_path = match self.mode {
            CaptureMode::WavFramed => path.clone(),
            CaptureMode::RawPacketDump => {
                let wav_path = sibling_wav_path(&path);
                wav_format::pcm_to_wav(&device.stream_spec(), &path, &wav_path)?;
                wav_path
            }
        };

        let checksum = sha256_file(&wav_path)?;
        let duration_secs = if byte_rate > 0 {
            data_size as f64 / byte_rate as f64
        } else {
            0.0
        };

        let result = RecordingResult {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: path,
            wav_path,
            mode: self.mode,
            spec: self.spec,
            data_size,
            duration_secs,
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
            device_error,
        };
        metadata::write_summary(&result.summary(), &result.wav_path)?;
        Ok(result)
    }

    fn transition(&self, next: CaptureState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous == next {
            return;
        }
        log::debug!("capture state {:?} -> {:?}", previous, next);
        if let Some(ref d) = self.delegate {
            d.on_state_changed(SessionState::Capture(next));
        }
    }
}

/// Where a raw dump's WAV copy goes: same stem, `.wav` extension.
fn sibling_wav_path(raw_path: &Path) -> PathBuf {
    let wav_path = raw_path.with_extension("wav");
    if wav_path == raw_path {
        raw_path.with_extension("raw.wav")
    } else {
        wav_path
    }
}
