//! In-memory collaborators for session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::DeviceOptions;
use crate::models::error::MediaError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionState;
use crate::models::stream_spec::StreamSpec;
use crate::processing::pull_slot::SlotConsumer;
use crate::traits::audio_output::{AudioOutput, AudioSink, OutputSpec};
use crate::traits::capture_device::{CaptureBackend, CaptureDevice};
use crate::traits::session_delegate::SessionDelegate;

pub const SCRIPTED_DEVICE: &str = "scripted";

/// Device replaying a fixed list of read results, then `WouldBlock`
/// forever.
pub struct ScriptedDevice {
    spec: StreamSpec,
    script: VecDeque<Result<Vec<u8>, MediaError>>,
    delivered: Arc<AtomicUsize>,
}

impl CaptureDevice for ScriptedDevice {
    fn read_packet(&mut self) -> Result<Vec<u8>, MediaError> {
        match self.script.pop_front() {
            Some(step) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                step
            }
            None => Err(MediaError::WouldBlock),
        }
    }

    fn stream_spec(&self) -> StreamSpec {
        self.spec
    }
}

/// Backend opening `ScriptedDevice`s under the name `"scripted"`.
pub struct ScriptedBackend {
    spec: StreamSpec,
    script: Vec<Result<Vec<u8>, MediaError>>,
    /// Script steps consumed across every device opened.
    pub delivered: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(spec: StreamSpec, script: Vec<Result<Vec<u8>, MediaError>>) -> Self {
        Self {
            spec,
            script,
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Steps in one device's script.
    pub fn script_len(&self) -> usize {
        self.script.len()
    }

    /// Spin until `count` script steps have been consumed.
    pub fn wait_for(&self, count: usize) {
        while self.delivered.load(Ordering::SeqCst) < count {
            thread::yield_now();
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self, name: &str, options: &DeviceOptions) -> Result<Box<dyn CaptureDevice>, MediaError> {
        if name != SCRIPTED_DEVICE {
            return Err(MediaError::DeviceNotAvailable(name.to_string()));
        }
        let mut spec = self.spec;
        if let Some(rate) = options.sample_rate {
            spec.sample_rate = rate;
        }
        if let Some(channels) = options.channels {
            spec.channels = channels;
        }
        Ok(Box::new(ScriptedDevice {
            spec,
            script: self.script.iter().cloned().collect(),
            delivered: self.delivered.clone(),
        }))
    }
}

/// Output whose sinks drain the pull slot on a thread and keep every real
/// byte they pulled.
#[derive(Default)]
pub struct CollectingOutput {
    pub collected: Arc<Mutex<Vec<u8>>>,
    pub opened: Mutex<Option<OutputSpec>>,
    pub fail_open: bool,
    /// Pause between pulls, standing in for the device's block period.
    pub pace: Option<Duration>,
}

impl CollectingOutput {
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn paced(period: Duration) -> Self {
        Self {
            pace: Some(period),
            ..Default::default()
        }
    }
}

impl AudioOutput for CollectingOutput {
    fn open(&self, spec: &OutputSpec, consumer: SlotConsumer) -> Result<Box<dyn AudioSink>, MediaError> {
        if self.fail_open {
            return Err(MediaError::DeviceNotAvailable("no output device".into()));
        }
        *self.opened.lock() = Some(*spec);
        let block = spec.samples as usize * spec.channels as usize * spec.format.bytes_per_sample();
        Ok(Box::new(CollectingSink {
            consumer: Some(consumer),
            block,
            collected: self.collected.clone(),
            pace: self.pace,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }))
    }
}

struct CollectingSink {
    consumer: Option<SlotConsumer>,
    block: usize,
    collected: Arc<Mutex<Vec<u8>>>,
    pace: Option<Duration>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioSink for CollectingSink {
    fn start(&mut self) -> Result<(), MediaError> {
        let Some(mut consumer) = self.consumer.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let collected = self.collected.clone();
        let pace = self.pace;
        let mut block = vec![0u8; self.block.max(1)];
        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let n = consumer.fill(&mut block);
                if n > 0 {
                    collected.lock().extend_from_slice(&block[..n]);
                }
                match pace {
                    Some(period) => thread::sleep(period),
                    None if n == 0 => thread::yield_now(),
                    None => {}
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Delegate recording every callback.
#[derive(Default)]
pub struct RecordingDelegate {
    pub states: Mutex<Vec<SessionState>>,
    pub progress: Mutex<Vec<u64>>,
    pub errors: Mutex<Vec<MediaError>>,
    pub finished: Mutex<Vec<RecordingResult>>,
}

impl SessionDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: SessionState) {
        self.states.lock().push(state);
    }

    fn on_progress(&self, elapsed_ms: u64) {
        self.progress.lock().push(elapsed_ms);
    }

    fn on_error(&self, error: &MediaError) {
        self.errors.lock().push(error.clone());
    }

    fn on_capture_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}
