//! Block-oriented audio capture
//!
//! The live pipeline consumes fixed-size mono blocks through the
//! [`AudioSource`] / [`BlockStream`] pair:
//! - [`CpalSource`] captures from an input device. The cpal callback only
//!   pushes channel 0 into a lock-free ring buffer; blocks are assembled on
//!   the capture thread.
//! - [`BufferSource`] replays an [`AudioBuffer`], optionally paced in real
//!   time, and ends the stream when the buffer runs out.

use crate::audio::buffer::AudioBuffer;
use crate::error::{DetectorError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum ring buffer size in samples (~0.34s at 192kHz)
const MIN_RING_SIZE: usize = 65536;

/// Sleep between ring buffer polls while a block is incomplete
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Result of waiting for one block
#[derive(Debug, PartialEq)]
pub enum BlockRead<'a> {
    /// A complete block of `block_size` mono samples
    Block(&'a [f32]),
    /// No complete block arrived before the timeout
    Pending,
    /// The stream ended; no further blocks will arrive
    Closed,
}

/// An opened capture stream delivering fixed-size blocks
///
/// Streams are created and consumed on the capture thread and need not be
/// `Send`.
pub trait BlockStream {
    /// Rate the stream was opened at
    fn sample_rate(&self) -> u32;

    /// Wait up to `timeout` for the next complete block
    fn next_block(&mut self, timeout: Duration) -> Result<BlockRead<'_>>;
}

/// Something that can be probed for sample rate support and opened
pub trait AudioSource: Send + Sync {
    /// Human-readable device name for logs
    fn name(&self) -> String;

    /// Whether the source can deliver audio at `sample_rate`
    ///
    /// May block while the device is queried.
    fn supports_rate(&self, sample_rate: u32) -> Result<bool>;

    /// Open a stream delivering blocks of `block_size` samples
    fn open(&self, sample_rate: u32, block_size: usize) -> Result<Box<dyn BlockStream>>;
}

/// Input device capture through cpal
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    device_name: Option<String>,
}

impl CpalSource {
    /// Use the host's default input device
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device with this exact name
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Names of all input devices on the default host
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DetectorError::DeviceUnavailable(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }

    fn device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| DetectorError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    DetectorError::DeviceUnavailable(format!("input device not found: {}", name))
                }),
            None => host.default_input_device().ok_or_else(|| {
                DetectorError::DeviceUnavailable("no default input device".to_string())
            }),
        }
    }
}

impl AudioSource for CpalSource {
    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }

    fn supports_rate(&self, sample_rate: u32) -> Result<bool> {
        let device = self.device()?;
        let mut ranges = device
            .supported_input_configs()
            .map_err(|e| DetectorError::DeviceUnavailable(e.to_string()))?;
        Ok(ranges.any(|r| {
            r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0
        }))
    }

    fn open(&self, sample_rate: u32, block_size: usize) -> Result<Box<dyn BlockStream>> {
        let device = self.device()?;
        let mut ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| DetectorError::DeviceUnavailable(e.to_string()))?
            .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
            .collect();
        // Native float first, then fewest channels
        ranges.sort_by_key(|r| (r.sample_format() != SampleFormat::F32, r.channels()));
        let range = ranges.into_iter().next().ok_or_else(|| {
            DetectorError::DeviceUnavailable(format!("{} Hz not supported", sample_rate))
        })?;

        let supported = range.with_sample_rate(SampleRate(sample_rate));
        let sample_format = supported.sample_format();
        let config = supported.config();

        let ring = HeapRb::<f32>::new(MIN_RING_SIZE.max(block_size * 4));
        let (producer, consumer) = ring.split();
        let shared = Arc::new(CaptureShared::default());

        let stream = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, producer, &shared)?,
            SampleFormat::I16 => build_input::<i16>(&device, &config, producer, &shared)?,
            SampleFormat::I32 => build_input::<i32>(&device, &config, producer, &shared)?,
            SampleFormat::U16 => build_input::<u16>(&device, &config, producer, &shared)?,
            other => {
                return Err(DetectorError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream
            .play()
            .map_err(|e| DetectorError::DeviceUnavailable(format!("failed to start stream: {}", e)))?;

        tracing::info!(
            device = %self.name(),
            sample_rate,
            channels = config.channels,
            format = ?sample_format,
            block_size,
            "Capture stream started"
        );

        Ok(Box::new(CpalBlockStream {
            _stream: stream,
            consumer,
            shared,
            block: vec![0.0; block_size],
            filled: 0,
            sample_rate,
        }))
    }
}

/// State shared with the cpal callbacks
#[derive(Debug)]
struct CaptureShared {
    running: AtomicBool,
    failed: AtomicBool,
    overruns: AtomicU64,
}

impl Default for CaptureShared {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            failed: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
        }
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    shared: &Arc<CaptureShared>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let data_shared = Arc::clone(shared);
    let error_shared = Arc::clone(shared);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !data_shared.running.load(Ordering::Relaxed) {
                    return;
                }
                for frame in data.chunks(channels) {
                    if producer.try_push(f32::from_sample(frame[0])).is_err() {
                        data_shared.overruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                tracing::error!("Input stream error: {}", err);
                error_shared.failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| DetectorError::DeviceUnavailable(format!("failed to build input stream: {}", e)))
}

/// Assembles fixed-size blocks from the callback's ring buffer
struct CpalBlockStream {
    _stream: Stream,
    consumer: HeapCons<f32>,
    shared: Arc<CaptureShared>,
    block: Vec<f32>,
    filled: usize,
    sample_rate: u32,
}

impl BlockStream for CpalBlockStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self, timeout: Duration) -> Result<BlockRead<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.failed.load(Ordering::Acquire) {
                return Err(DetectorError::DeviceUnavailable(
                    "input stream reported an error".to_string(),
                ));
            }
            let read = self.consumer.pop_slice(&mut self.block[self.filled..]);
            self.filled += read;
            if self.filled == self.block.len() {
                self.filled = 0;
                return Ok(BlockRead::Block(&self.block));
            }
            if Instant::now() >= deadline {
                return Ok(BlockRead::Pending);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for CpalBlockStream {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        let overruns = self.shared.overruns.load(Ordering::Relaxed);
        if overruns > 0 {
            tracing::warn!(overruns, "Samples dropped by full capture ring");
        }
        tracing::info!("Capture stream stopped");
    }
}

/// Replays a recorded buffer as a block stream
#[derive(Debug, Clone)]
pub struct BufferSource {
    buffer: AudioBuffer,
    realtime: bool,
}

impl BufferSource {
    /// Deliver blocks as fast as they are requested
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            realtime: false,
        }
    }

    /// Deliver each block no earlier than its capture time would allow
    pub fn paced(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            realtime: true,
        }
    }
}

impl AudioSource for BufferSource {
    fn name(&self) -> String {
        format!("buffer ({} samples)", self.buffer.len())
    }

    fn supports_rate(&self, sample_rate: u32) -> Result<bool> {
        Ok(sample_rate == self.buffer.sample_rate())
    }

    fn open(&self, sample_rate: u32, block_size: usize) -> Result<Box<dyn BlockStream>> {
        if sample_rate != self.buffer.sample_rate() {
            return Err(DetectorError::DeviceUnavailable(format!(
                "buffer is {} Hz, requested {} Hz",
                self.buffer.sample_rate(),
                sample_rate
            )));
        }
        if block_size == 0 {
            return Err(DetectorError::InvalidConfig(
                "block_size must be positive".to_string(),
            ));
        }
        Ok(Box::new(BufferStream {
            buffer: self.buffer.clone(),
            block_size,
            position: 0,
            realtime: self.realtime,
            started: None,
        }))
    }
}

struct BufferStream {
    buffer: AudioBuffer,
    block_size: usize,
    position: usize,
    realtime: bool,
    started: Option<Instant>,
}

impl BlockStream for BufferStream {
    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    fn next_block(&mut self, timeout: Duration) -> Result<BlockRead<'_>> {
        let end = self.position + self.block_size;
        // Trailing partial block is not delivered
        if end > self.buffer.len() {
            return Ok(BlockRead::Closed);
        }

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = started + Duration::from_secs_f64(end as f64 / self.buffer.sample_rate() as f64);
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(BlockRead::Pending);
                }
                std::thread::sleep(wait);
            }
        }

        let start = self.position;
        self.position = end;
        Ok(BlockRead::Block(&self.buffer.samples()[start..end]))
    }
}
