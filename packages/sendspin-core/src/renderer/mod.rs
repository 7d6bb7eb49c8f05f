//! Device output stage.
//!
//! The renderer owns the host audio device and the [`BufferLedger`] that
//! bounds outstanding audio. CPAL streams are not `Send`, so the stream
//! lives on a dedicated output thread; the renderer handle talks to it
//! through a command channel and shares a short-critical-section sample
//! queue with the device callback. The callback never takes session-level
//! locks: it pops normalized samples, applies volume from atomics and
//! converts to the device sample format.

mod ledger;

pub use ledger::BufferLedger;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::decoder::bytes_to_samples;
use crate::error::DeviceError;
use crate::format::AudioFormat;
use crate::scheduler::SchedulerStats;
use crate::time::now_us;

/// How long `start` waits for the output thread to bring the device up.
const DEVICE_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Full-scale divisor for the 24-bit-aligned internal format.
const SCALE_24: f32 = 8_388_608.0;

/// Full-scale divisor for 32-bit passthrough sources.
const SCALE_32: f32 = 2_147_483_648.0;

/// Shared volume and mute state, readable from the device callback.
#[derive(Debug)]
pub struct VolumeState {
    value: AtomicU8,
    muted: AtomicBool,
}

impl VolumeState {
    /// Creates volume state with an initial level (0-100) and mute flag.
    #[must_use]
    pub fn new(value: u8, muted: bool) -> Self {
        Self {
            value: AtomicU8::new(value.min(100)),
            muted: AtomicBool::new(muted),
        }
    }

    /// Current level, 0-100.
    #[must_use]
    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_value(&self, value: u8) {
        self.value.store(value.min(100), Ordering::Relaxed);
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::new(100, false)
    }
}

/// State shared between the renderer handle and the device callback.
struct SharedSamples {
    queue: Mutex<VecDeque<i32>>,
    underrun_events: AtomicU64,
}

enum OutputCommand {
    Start {
        format: AudioFormat,
        reply: mpsc::Sender<Result<(), DeviceError>>,
    },
    Stop,
}

/// Renders scheduled chunks on the host audio device.
pub struct Renderer {
    format: AudioFormat,
    shared: Arc<SharedSamples>,
    volume: Arc<VolumeState>,
    ledger: BufferLedger,
    ledger_capacity: usize,
    stats: Arc<SchedulerStats>,
    worker_tx: mpsc::Sender<OutputCommand>,
    worker: Option<thread::JoinHandle<()>>,
    device_ready: bool,
}

impl Renderer {
    /// Creates a renderer for the negotiated format. The device is not
    /// touched until [`Renderer::start`].
    #[must_use]
    pub fn new(
        format: AudioFormat,
        buffer_capacity: usize,
        volume: Arc<VolumeState>,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        let shared = Arc::new(SharedSamples {
            queue: Mutex::new(VecDeque::new()),
            underrun_events: AtomicU64::new(0),
        });
        let (worker_tx, worker_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker_volume = Arc::clone(&volume);
        let worker = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || output_thread_main(worker_rx, worker_shared, worker_volume))
            .ok();

        Self {
            format,
            shared,
            volume,
            ledger: BufferLedger::new(buffer_capacity),
            ledger_capacity: buffer_capacity,
            stats,
            worker_tx,
            worker,
            device_ready: false,
        }
    }

    /// Configures and starts the output device for the negotiated format.
    /// Idempotent: starting an already-started renderer is a no-op.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.device_ready {
            return Ok(());
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.worker_tx
            .send(OutputCommand::Start {
                format: self.format,
                reply: reply_tx,
            })
            .map_err(|_| DeviceError::StartFailed("output thread terminated".into()))?;
        match reply_rx.recv_timeout(DEVICE_START_TIMEOUT) {
            Ok(Ok(())) => {
                self.device_ready = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::StartFailed(
                "output thread did not respond".into(),
            )),
        }
    }

    /// Registers a chunk in the ledger under its playout deadline and
    /// submits its samples to the device queue.
    ///
    /// When the ledger cannot admit the payload, the oldest entries are
    /// evicted (and counted in the scheduler's "other" drop class) until
    /// there is room. Submission is a no-op while the device is stopped,
    /// e.g. after a route change took the stream down.
    pub fn play_pcm(&mut self, pcm: &Bytes, deadline_us: i64) {
        if pcm.is_empty() {
            return;
        }
        let byte_count = pcm.len();
        if byte_count > self.ledger_capacity {
            tracing::warn!(byte_count, "chunk larger than the render buffer, rejected");
            self.stats.dropped_other.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.ledger.prune_consumed(now_us());
        while !self.ledger.has_capacity(byte_count) {
            let Some(evicted_bytes) = self.ledger.evict_oldest() else {
                return;
            };
            self.stats.dropped_other.fetch_add(1, Ordering::Relaxed);
            // Drop the same span from the head of the device queue.
            let evicted_samples = evicted_bytes / 4;
            let mut queue = self.shared.queue.lock();
            let drain = evicted_samples.min(queue.len());
            queue.drain(..drain);
        }

        let duration_us = self.format.normalized_duration_us(byte_count);
        self.ledger.register(deadline_us + duration_us, byte_count);
        self.shared.queue.lock().extend(bytes_to_samples(pcm));
    }

    pub fn set_volume(&self, value: f32) {
        self.volume.set_value((value.clamp(0.0, 1.0) * 100.0) as u8);
    }

    pub fn set_mute(&self, muted: bool) {
        self.volume.set_muted(muted);
    }

    /// Outstanding unplayed bytes according to the ledger.
    #[must_use]
    pub fn buffered_bytes(&mut self) -> usize {
        self.ledger.prune_consumed(now_us());
        self.ledger.usage()
    }

    /// Number of underruns observed by the device callback.
    #[must_use]
    pub fn underrun_events(&self) -> u64 {
        self.shared.underrun_events.load(Ordering::Relaxed)
    }

    /// Stops the device, flushes pending samples and clears the ledger.
    pub fn stop(&mut self) {
        let _ = self.worker_tx.send(OutputCommand::Stop);
        self.shared.queue.lock().clear();
        self.ledger.clear();
        self.device_ready = false;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.worker_tx.send(OutputCommand::Stop);
        // Closing the command channel ends the output thread.
        let (drop_tx, _) = mpsc::channel();
        let _ = std::mem::replace(&mut self.worker_tx, drop_tx);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Output thread: owns the CPAL stream, which is not `Send`.
fn output_thread_main(
    rx: mpsc::Receiver<OutputCommand>,
    shared: Arc<SharedSamples>,
    volume: Arc<VolumeState>,
) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = rx.recv() {
        match command {
            OutputCommand::Start { format, reply } => {
                let result = build_device_stream(&format, &shared, &volume);
                match result {
                    Ok(s) => {
                        stream = Some(s);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        stream = None;
                        let _ = reply.send(Err(e));
                    }
                }
            }
            OutputCommand::Stop => {
                stream = None;
            }
        }
    }
    drop(stream);
}

/// Builds and starts an output stream wired to the source bit depth.
fn build_device_stream(
    format: &AudioFormat,
    shared: &Arc<SharedSamples>,
    volume: &Arc<VolumeState>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::StartFailed("no default output device".into()))?;

    let supported = pick_output_config(&device, format)?;
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.into();
    config.channels = format.channels as u16;

    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, format, shared, volume),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, format, shared, volume),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, format, shared, volume),
        other => Err(DeviceError::StartFailed(format!(
            "unsupported device sample format {other:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|e| DeviceError::StartFailed(e.to_string()))?;
    Ok(stream)
}

/// Picks a supported device config at the stream's sample rate, preferring
/// the sample format that matches the source bit depth.
fn pick_output_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| DeviceError::StartFailed(e.to_string()))?;

    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        if range.channels() < format.channels as u16 {
            continue;
        }
        if format.sample_rate < range.min_sample_rate()
            || format.sample_rate > range.max_sample_rate()
        {
            continue;
        }
        let rank = sample_format_rank(range.sample_format(), format.bit_depth);
        let candidate = range.with_sample_rate(format.sample_rate);
        let replace = best.as_ref().map_or(true, |(b_rank, _)| rank < *b_rank);
        if replace {
            best = Some((rank, candidate));
        }
    }
    best.map(|(_, config)| config).ok_or_else(|| {
        DeviceError::StartFailed(format!(
            "device does not support {} Hz / {} ch output",
            format.sample_rate, format.channels
        ))
    })
}

/// Lower is better. The device format is wired to the source bit depth:
/// 16-bit sources prefer an i16 stream, 24/32-bit prefer i32.
fn sample_format_rank(device_format: cpal::SampleFormat, bit_depth: u8) -> u8 {
    match (bit_depth, device_format) {
        (16, cpal::SampleFormat::I16) => 0,
        (24 | 32, cpal::SampleFormat::I32) => 0,
        (_, cpal::SampleFormat::F32) => 1,
        (_, cpal::SampleFormat::I32) => 2,
        (_, cpal::SampleFormat::I16) => 3,
        _ => 10,
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: &AudioFormat,
    shared: &Arc<SharedSamples>,
    volume: &Arc<VolumeState>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let bit_depth = format.bit_depth;
    let shared = Arc::clone(shared);
    let volume = Arc::clone(volume);
    let err_fn = |err| tracing::warn!("output stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let gain = if volume.muted() {
                    0.0
                } else {
                    volume.value() as f32 / 100.0
                };
                let mut queue = shared.queue.lock();
                let mut underrun = false;
                for slot in data.iter_mut() {
                    match queue.pop_front() {
                        Some(sample) => {
                            *slot = <T as cpal::Sample>::from_sample::<f32>(scale_sample(
                                sample, gain, bit_depth,
                            ));
                        }
                        None => {
                            underrun = true;
                            *slot = <T as cpal::Sample>::from_sample::<f32>(0.0);
                        }
                    }
                }
                if underrun {
                    shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::StartFailed(e.to_string()))
}

/// Applies gain to a normalized sample and converts to the unit float range
/// for the device conversion.
///
/// 16- and 24-bit sources share the 24-bit-aligned internal scale, so the
/// post-gain clamp is to the signed 24-bit range; 32-bit passthrough clamps
/// to the full 32-bit range.
#[inline]
fn scale_sample(sample: i32, gain: f32, bit_depth: u8) -> f32 {
    let scaled = (sample as f64 * gain as f64) as i64;
    if bit_depth == 32 {
        (scaled.clamp(i32::MIN as i64, i32::MAX as i64) as f32) / SCALE_32
    } else {
        (scaled.clamp(-(1 << 23), (1 << 23) - 1) as f32) / SCALE_24
    }
}
