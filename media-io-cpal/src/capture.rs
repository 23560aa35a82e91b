//! cpal input capture.
//!
//! Opens an input endpoint on a dedicated thread that owns the cpal stream
//! and feeds interleaved little-endian bytes into a shared ring buffer.
//! `read_packet` drains that ring from the capture session's worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SizedSample, StreamConfig};
use parking_lot::Mutex;

use media_io_core::models::config::DeviceOptions;
use media_io_core::models::error::MediaError;
use media_io_core::models::stream_spec::{CodecId, SampleFormat, StreamSpec};
use media_io_core::processing::ring_buffer::RingBuffer;
use media_io_core::traits::capture_device::{CaptureBackend, CaptureDevice};

use crate::samples::{core_format, LeSample};

/// Name that selects the host's default input device.
pub const DEFAULT_DEVICE: &str = "default";

/// Frames returned by one `read_packet` when the options set no bound.
const DEFAULT_PACKET_FRAMES: usize = 1024;

/// Seconds of audio the ring holds before the oldest bytes are dropped.
const DEFAULT_RING_SECONDS: u32 = 2;

/// Opens cpal input devices by name.
pub struct CpalCaptureBackend {
    ring_seconds: u32,
}

impl CpalCaptureBackend {
    pub fn new() -> Self {
        Self {
            ring_seconds: DEFAULT_RING_SECONDS,
        }
    }

    /// Size the per-device ring buffer to hold `seconds` of audio.
    pub fn with_ring_seconds(seconds: u32) -> Self {
        Self {
            ring_seconds: seconds.max(1),
        }
    }
}

impl Default for CpalCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn open(&self, name: &str, options: &DeviceOptions) -> Result<Box<dyn CaptureDevice>, MediaError> {
        let device = CpalCaptureDevice::open(name, options, self.ring_seconds)?;
        Ok(Box::new(device))
    }
}

/// An open cpal input stream and the ring it fills.
pub struct CpalCaptureDevice {
    spec: StreamSpec,
    ring: Arc<Mutex<RingBuffer<u8>>>,
    stream_error: Arc<Mutex<Option<String>>>,
    packet_bytes: usize,
    running: Arc<AtomicBool>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalCaptureDevice {
    /// Open `name` and start streaming into a fresh ring buffer.
    ///
    /// The stream lives on its own thread because cpal streams are not
    /// `Send` on every host. Open errors come back over a channel before
    /// this returns.
    pub fn open(name: &str, options: &DeviceOptions, ring_seconds: u32) -> Result<Self, MediaError> {
        let running = Arc::new(AtomicBool::new(true));
        let stream_error = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_running = running.clone();
        let thread_error = stream_error.clone();
        let device_name = name.to_string();
        let thread_options = options.clone();

        let handle = thread::Builder::new()
            .name("cpal-capture".into())
            .spawn(move || {
                stream_thread(&device_name, &thread_options, ring_seconds, thread_running, thread_error, ready_tx)
            })
            .map_err(|e| MediaError::Io(format!("failed to spawn capture thread: {}", e)))?;

        let opened = ready_rx
            .recv()
            .map_err(|_| MediaError::DeviceNotAvailable(format!("capture thread for '{}' exited", name)));
        let (spec, ring) = match opened.and_then(|result| result) {
            Ok(opened) => opened,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                log::error!("failed to open capture device '{}': {}", name, e);
                return Err(e);
            }
        };

        let packet_frames = options.packet_frames.unwrap_or(DEFAULT_PACKET_FRAMES).max(1);
        log::info!(
            "capture device '{}' open: {} Hz, {} ch, {:?}",
            name,
            spec.sample_rate,
            spec.channels,
            spec.codec_id
        );

        Ok(Self {
            spec,
            ring,
            stream_error,
            packet_bytes: packet_frames * spec.block_align() as usize,
            running,
            stream_thread: Some(handle),
        })
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn read_packet(&mut self) -> Result<Vec<u8>, MediaError> {
        if let Some(message) = self.stream_error.lock().take() {
            return Err(MediaError::DeviceNotAvailable(message));
        }
        let mut ring = self.ring.lock();
        let len = packet_len(ring.count(), self.spec.block_align() as usize, self.packet_bytes);
        if len == 0 {
            return Err(MediaError::WouldBlock);
        }
        Ok(ring.read(len))
    }

    fn stream_spec(&self) -> StreamSpec {
        self.spec
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

type Opened = (StreamSpec, Arc<Mutex<RingBuffer<u8>>>);

/// Body of the thread that owns the cpal stream.
///
/// Sequence:
/// 1. Resolve the device (default or by name)
/// 2. Pick the stream config from its default plus the option overrides
/// 3. Build and play an input stream of the device's native sample type
/// 4. Report the outcome on `ready`, then idle until `running` clears
fn stream_thread(
    name: &str,
    options: &DeviceOptions,
    ring_seconds: u32,
    running: Arc<AtomicBool>,
    stream_error: Arc<Mutex<Option<String>>>,
    ready: mpsc::Sender<Result<Opened, MediaError>>,
) {
    let stream = match build_stream(name, options, ring_seconds, stream_error) {
        Ok((stream, opened)) => {
            if ready.send(Ok(opened)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(10));
    }

    if let Err(e) = stream.pause() {
        log::warn!("failed to pause capture stream: {}", e);
    }
    drop(stream);
    log::debug!("capture stream for '{}' closed", name);
}

fn build_stream(
    name: &str,
    options: &DeviceOptions,
    ring_seconds: u32,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<(cpal::Stream, Opened), MediaError> {
    let host = cpal::default_host();
    let device = find_input_device(&host, name)?;

    let supported = device
        .default_input_config()
        .map_err(|e| MediaError::ConfigurationFailed(format!("no supported input config: {}", e)))?;
    let format = core_format(supported.sample_format()).ok_or_else(|| {
        MediaError::UnsupportedSampleFormat(format!("device sample format {:?}", supported.sample_format()))
    })?;

    let config = StreamConfig {
        channels: options.channels.unwrap_or_else(|| supported.channels()),
        sample_rate: cpal::SampleRate(options.sample_rate.unwrap_or_else(|| supported.sample_rate().0)),
        buffer_size: cpal::BufferSize::Default,
    };

    let spec = StreamSpec::new(
        config.sample_rate.0,
        format.bits_per_sample(),
        config.channels,
        CodecId::pcm_for(format),
    );
    spec.validate()?;

    let ring_bytes = spec.sample_rate as usize * spec.block_align() as usize * ring_seconds as usize;
    let ring = Arc::new(Mutex::new(RingBuffer::new(ring_bytes)));

    let stream = match format {
        SampleFormat::U8 => build_input::<u8>(&device, &config, ring.clone(), stream_error),
        SampleFormat::S16 => build_input::<i16>(&device, &config, ring.clone(), stream_error),
        SampleFormat::S32 => build_input::<i32>(&device, &config, ring.clone(), stream_error),
        SampleFormat::F32 => build_input::<f32>(&device, &config, ring.clone(), stream_error),
        SampleFormat::F64 => build_input::<f64>(&device, &config, ring.clone(), stream_error),
    }?;

    stream
        .play()
        .map_err(|e| MediaError::ConfigurationFailed(format!("failed to start input stream: {}", e)))?;

    Ok((stream, (spec, ring)))
}

fn find_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, MediaError> {
    if name.is_empty() || name == DEFAULT_DEVICE {
        return host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceNotAvailable("no default input device".into()));
    }
    host.input_devices()
        .map_err(|e| MediaError::DeviceNotAvailable(format!("failed to enumerate input devices: {}", e)))?
        .find(|d| d.name().ok().as_deref() == Some(name))
        .ok_or_else(|| MediaError::DeviceNotAvailable(name.to_string()))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: Arc<Mutex<RingBuffer<u8>>>,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, MediaError>
where
    T: SizedSample + LeSample,
{
    let mut scratch = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                T::extend_bytes(data, &mut scratch);
                let dropped = ring.lock().write(&scratch);
                if dropped > 0 {
                    log::warn!("capture ring full, dropped {} bytes", dropped);
                }
            },
            move |err| {
                log::error!("capture stream error: {}", err);
                *stream_error.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| MediaError::ConfigurationFailed(format!("failed to build input stream: {}", e)))
}

/// Bytes to hand out from a ring holding `available`: whole frames only,
/// at most `max_bytes`.
fn packet_len(available: usize, frame_bytes: usize, max_bytes: usize) -> usize {
    if frame_bytes == 0 {
        return 0;
    }
    let len = available.min(max_bytes);
    len - len % frame_bytes
}
