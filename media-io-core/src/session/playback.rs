use std::fs::File;
use std::io::{Read, Take};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::{PlaybackConfiguration, PlaybackFraming};
use crate::models::error::MediaError;
use crate::models::recording_result::PlaybackResult;
use crate::models::state::{PlaybackState, SessionState};
use crate::models::stream_spec::{SampleFormat, StreamSpec};
use crate::processing::pull_slot::{pull_slot, SlotProducer};
use crate::processing::resampler::read_full;
use crate::processing::wav_format::{self, WavHeader, WAV_HEADER_SIZE};
use crate::traits::audio_output::{AudioOutput, OutputSpec};
use crate::traits::session_delegate::SessionDelegate;

/// Streams a raw or WAV file to an audio output.
///
/// ```text
/// [file] → read chunk → [worker] → SlotProducer ⇢ SlotConsumer → [device callback]
/// ```
///
/// The worker publishes one chunk of `spec.samples` frames at a time and
/// waits for the device to pull all of it before reading the next, so at
/// most one chunk is ever in flight.
pub struct PlaybackSession {
    output: Arc<dyn AudioOutput>,
    config: PlaybackConfiguration,
    active: Arc<AtomicBool>,
    state: Arc<Mutex<PlaybackState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    worker: Option<JoinHandle<Result<PlaybackResult, MediaError>>>,
}

impl PlaybackSession {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfiguration) -> Self {
        Self {
            output,
            config,
            active: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(PlaybackState::Idle)),
            delegate: None,
            worker: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn configuration(&self) -> &PlaybackConfiguration {
        &self.config
    }

    pub fn set_configuration(&mut self, config: PlaybackConfiguration) -> Result<(), MediaError> {
        self.ensure_idle()?;
        self.config = config;
        Ok(())
    }

    /// Begin playback on a worker thread.
    ///
    /// The file is opened and its header parsed before the active flag is
    /// raised, so a missing or malformed file leaves the session idle.
    pub fn start(&mut self) -> Result<(), MediaError> {
        self.ensure_idle()?;
        if self.config.filename.as_os_str().is_empty() {
            return Err(MediaError::InvalidState("no file to play".into()));
        }
        self.config.validate()?;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        let source = PlaybackSource::open(&self.config)
            .inspect_err(|e| log::error!("cannot play {}: {}", self.config.filename.display(), e))?;

        let worker = PlaybackWorker {
            output: self.output.clone(),
            config: self.config.clone(),
            active: self.active.clone(),
            state: self.state.clone(),
            delegate: self.delegate.clone(),
        };

        worker.transition(PlaybackState::Loading);
        self.active.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("media-playback".into())
            .spawn(move || worker.run(source));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                *self.state.lock() = PlaybackState::Idle;
                log::error!("failed to spawn playback thread: {}", e);
                Err(MediaError::Io(format!("failed to spawn playback thread: {}", e)))
            }
        }
    }

    /// Ask the worker to finish. Returns immediately.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::info!("playback stop requested");
        }
    }

    /// Start when idle, stop when playing.
    pub fn play(&mut self) -> Result<(), MediaError> {
        if self.is_active() {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    /// Block until the current worker exits and return its result.
    pub fn wait(&mut self) -> Result<PlaybackResult, MediaError> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| MediaError::InvalidState("nothing is playing".into()))?;
        handle
            .join()
            .map_err(|_| MediaError::InvalidState("playback worker panicked".into()))?
    }

    fn ensure_idle(&self) -> Result<(), MediaError> {
        let busy = !self.state.lock().is_idle() || self.worker.as_ref().is_some_and(|h| !h.is_finished());
        if busy {
            return Err(MediaError::InvalidState("playback is in progress".into()));
        }
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// An opened file positioned at its payload, bounded to the payload length.
struct PlaybackSource {
    reader: Take<File>,
    spec: StreamSpec,
    format: SampleFormat,
}

impl PlaybackSource {
    fn open(config: &PlaybackConfiguration) -> Result<Self, MediaError> {
        let path = &config.filename;
        let mut file =
            File::open(path).map_err(|e| MediaError::Io(format!("failed to open {}: {}", path.display(), e)))?;
        match config.framing {
            PlaybackFraming::Raw => Ok(Self {
                reader: file.take(u64::MAX),
                spec: config.spec,
                format: config.format,
            }),
            PlaybackFraming::Wav => {
                let (spec, format, data_len) = Self::read_wav_header(&mut file, config.spec.samples)?;
                Ok(Self {
                    reader: file.take(data_len),
                    spec,
                    format,
                })
            }
        }
    }

    /// Parse the header, leave `file` at the payload and return the device
    /// parameters it describes along with the payload length.
    ///
    /// A data size of `u32::MAX` marks a stream whose length was never
    /// patched; it is read to end of file.
    fn read_wav_header(file: &mut File, samples: u16) -> Result<(StreamSpec, SampleFormat, u64), MediaError> {
        let mut bytes = [0u8; WAV_HEADER_SIZE];
        file.read_exact(&mut bytes)
            .map_err(|_| MediaError::MalformedContainer("file is shorter than a WAV header".into()))?;
        let header = WavHeader::decode(&bytes)?;
        let mut spec = header.stream_spec()?;
        spec.samples = samples;
        let format = header.sample_format()?;
        let data_len = match wav_format::seek_to_data(file)? {
            u32::MAX => u64::MAX,
            size => u64::from(size),
        };
        Ok((spec, format, data_len))
    }
}

struct PlaybackWorker {
    output: Arc<dyn AudioOutput>,
    config: PlaybackConfiguration,
    active: Arc<AtomicBool>,
    state: Arc<Mutex<PlaybackState>>,
    delegate: Option<Arc<dyn SessionDelegate>>,
}

impl PlaybackWorker {
    fn run(self, source: PlaybackSource) -> Result<PlaybackResult, MediaError> {
        let outcome = self.play(source);

        self.active.store(false, Ordering::SeqCst);
        self.transition(PlaybackState::Idle);

        match &outcome {
            Ok(result) => log::info!(
                "played {} bytes of {}{}",
                result.bytes_played,
                result.file_path.display(),
                if result.reached_end { "" } else { " (stopped early)" }
            ),
            Err(e) => {
                log::error!("playback of {} failed: {}", self.config.filename.display(), e);
                if let Some(ref d) = self.delegate {
                    d.on_error(e);
                }
            }
        }
        outcome
    }

    fn play(&self, source: PlaybackSource) -> Result<PlaybackResult, MediaError> {
        let PlaybackSource {
            mut reader,
            spec,
            format,
        } = source;

        let bytes_per_frame = spec.channels as usize * format.bytes_per_sample();
        let chunk_len = spec.samples as usize * bytes_per_frame;
        let byte_rate = spec.sample_rate as u64 * bytes_per_frame as u64;

        let (producer, consumer) = pull_slot(chunk_len);
        let output_spec = OutputSpec {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            format,
            samples: spec.samples as u32,
        };
        let mut sink = self.output.open(&output_spec, consumer)?;

        self.transition(PlaybackState::Playing);
        sink.start()?;
        let streamed = self.stream(&mut reader, producer, chunk_len, byte_rate);

        // The sink closes when dropped; stop it first so the callback has
        // finished with the slot.
        if let Err(e) = sink.stop() {
            log::warn!("failed to stop output: {}", e);
        }
        drop(sink);

        let (bytes_played, reached_end) = streamed?;
        Ok(PlaybackResult {
            file_path: self.config.filename.clone(),
            spec,
            bytes_played,
            reached_end,
        })
    }

    fn stream<R: Read>(
        &self,
        reader: &mut R,
        mut producer: SlotProducer,
        chunk_len: usize,
        byte_rate: u64,
    ) -> Result<(u64, bool), MediaError> {
        let mut chunk = vec![0u8; chunk_len];
        let mut bytes_played = 0u64;
        let mut last_len = 0usize;

        'stream: while self.active.load(Ordering::SeqCst) {
            while producer.is_pending() {
                if !self.active.load(Ordering::SeqCst) {
                    break 'stream;
                }
                std::hint::spin_loop();
            }

            let len = read_full(reader, &mut chunk)?;
            if len == 0 {
                // Let the device play out the final chunk.
                if byte_rate > 0 {
                    thread::sleep(Duration::from_micros(last_len as u64 * 1_000_000 / byte_rate));
                }
                return Ok((bytes_played, true));
            }
            producer.try_publish(&chunk[..len]);
            bytes_played += len as u64;
            last_len = len;
        }
        Ok((bytes_played, false))
    }

    fn transition(&self, next: PlaybackState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous == next {
            return;
        }
        log::debug!("playback state {:?} -> {:?}", previous, next);
        if let Some(ref d) = self.delegate {
            d.on_state_changed(SessionState::Playback(next));
        }
    }
}
