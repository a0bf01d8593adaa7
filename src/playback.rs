//! Playback scheduling for synthesized tutor speech
//!
//! Received audio chunks must play back-to-back with no audible gap or
//! overlap, and must stop dead when the user interrupts. The scheduler
//! tracks a monotonic "next start" cursor and the set of units still
//! playing; actual output goes through the [`AudioSink`] / [`OutputClock`]
//! seam so the scheduling math is testable without a sound card.
//!
//! # Scheduling
//!
//! ```text
//! start_at = max(cursor, clock.now())
//! cursor   = start_at + chunk_duration
//! ```
//!
//! On interruption every active unit is stopped and the cursor resets to 0
//! (not to the current clock); the next enqueue recomputes from the live
//! clock through the `max`, so a stale zero can never schedule into the
//! past.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleRate, StreamConfig};

use crate::live::OUTPUT_SAMPLE_RATE;

/// Errors that can occur while acquiring the output device.
#[derive(Debug, Clone)]
pub enum PlaybackError {
    NoOutputDevice,
    StreamCreationFailed(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::NoOutputDevice => write!(f, "No audio output device found"),
            PlaybackError::StreamCreationFailed(e) => {
                write!(f, "Failed to create output stream: {}", e)
            }
        }
    }
}

impl std::error::Error for PlaybackError {}

/// Clock measuring rendered output time, in seconds.
pub trait OutputClock: Send {
    fn now(&self) -> f64;
}

/// Destination for scheduled audio units.
pub trait AudioSink: Send {
    /// Schedule `samples` (24 kHz mono PCM16) to begin at `start_at` seconds
    /// on the output clock.
    fn play(&mut self, id: u64, samples: Vec<i16>, start_at: f64);

    /// Immediately silence everything scheduled or playing.
    fn stop_all(&mut self);
}

/// Gapless playback scheduler with hard-stop interruption.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    clock: Box<dyn OutputClock>,
    /// Next output start time in seconds; 0.0 means "unset"
    cursor: f64,
    /// Scheduled, not-yet-finished units: id -> scheduled end time
    active: BTreeMap<u64, f64>,
    next_id: u64,
    chunks_played: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>, clock: Box<dyn OutputClock>) -> Self {
        Self {
            sink,
            clock,
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
            chunks_played: 0,
        }
    }

    /// Schedule one decoded chunk for gapless playback.
    ///
    /// Returns the unit id assigned to the chunk. Empty chunks are ignored.
    pub fn enqueue(&mut self, samples: Vec<i16>) -> Option<u64> {
        if samples.is_empty() {
            return None;
        }

        let now = self.clock.now();

        // Units that ended before "now" finished naturally
        self.active.retain(|_, end| *end > now);

        let duration = samples.len() as f64 / OUTPUT_SAMPLE_RATE as f64;
        let start_at = self.cursor.max(now);

        let id = self.next_id;
        self.next_id += 1;

        self.sink.play(id, samples, start_at);
        self.active.insert(id, start_at + duration);
        self.cursor = start_at + duration;

        self.chunks_played += 1;
        if self.chunks_played % 50 == 0 {
            log::debug!(
                "Playback: {} chunks scheduled, cursor at {:.2}s",
                self.chunks_played,
                self.cursor
            );
        }

        Some(id)
    }

    /// Hard-stop every active unit and reset the cursor.
    ///
    /// Safe to call when nothing is playing. The cursor deliberately resets
    /// to 0 rather than to the clock; `enqueue`'s `max(cursor, now)` picks
    /// the live clock back up on the next chunk.
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        self.sink.stop_all();
        self.active.clear();
        self.cursor = 0.0;

        if stopped > 0 {
            log::info!("Playback interrupted, {} units stopped", stopped);
        }
    }

    /// Number of scheduled, not-yet-finished units.
    pub fn active_units(&self) -> usize {
        let now = self.clock.now();
        self.active.values().filter(|end| **end > now).count()
    }

    /// Current "next start" cursor in seconds.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

// ============================================================================
// cpal output implementation
// ============================================================================

struct ScheduledBuf {
    start_frame: u64,
    samples: Vec<i16>,
}

/// State shared between the scheduler side and the output callback.
struct SinkShared {
    queue: Vec<ScheduledBuf>,
    /// Frames rendered since the stream started
    head: u64,
}

impl SinkShared {
    /// Render one output frame: sum of every buffer covering `head`.
    fn render_frame(&mut self) -> i16 {
        let head = self.head;
        self.head += 1;

        let mut acc: i32 = 0;
        for buf in &self.queue {
            if head >= buf.start_frame {
                let offset = (head - buf.start_frame) as usize;
                if offset < buf.samples.len() {
                    acc += buf.samples[offset] as i32;
                }
            }
        }
        self.queue
            .retain(|b| b.start_frame + b.samples.len() as u64 > head + 1);

        acc.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

/// Owner of the cpal output stream thread.
///
/// Hand its [`sink()`](CpalPlayer::sink) and [`clock()`](CpalPlayer::clock)
/// to a [`PlaybackScheduler`]; keep the player alive for as long as playback
/// is needed.
pub struct CpalPlayer {
    shared: Arc<Mutex<SinkShared>>,
    active: Arc<AtomicBool>,
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalPlayer {
    /// Open the default output device at 24 kHz mono.
    pub fn start() -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::NoOutputDevice)?;

        log::info!("Using audio output device: {:?}", device.name());

        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;
        let sample_format = supported.sample_format();

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(OUTPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(Mutex::new(SinkShared {
            queue: Vec::new(),
            head: 0,
        }));
        let active = Arc::new(AtomicBool::new(true));

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), PlaybackError>>();

        let shared_cb = shared.clone();
        let active_cb = active.clone();
        let thread = thread::spawn(move || {
            let build = match sample_format {
                cpal::SampleFormat::I16 => {
                    build_output_stream::<i16>(&device, &config, shared_cb, active_cb)
                }
                cpal::SampleFormat::U16 => {
                    build_output_stream::<u16>(&device, &config, shared_cb, active_cb)
                }
                cpal::SampleFormat::F32 => {
                    build_output_stream::<f32>(&device, &config, shared_cb, active_cb)
                }
                _ => Err(PlaybackError::StreamCreationFailed(format!(
                    "Unsupported output sample format: {:?}",
                    sample_format
                ))),
            };

            let stream = match build {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(PlaybackError::StreamCreationFailed(format!(
                    "Failed to start output stream: {}",
                    e
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                active,
                stop_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::StreamCreationFailed(
                "Output thread exited during startup".to_string(),
            )),
        }
    }

    /// Sink half for a [`PlaybackScheduler`].
    pub fn sink(&self) -> CpalSink {
        CpalSink {
            shared: self.shared.clone(),
        }
    }

    /// Clock half for a [`PlaybackScheduler`].
    pub fn clock(&self) -> CpalClock {
        CpalClock {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<Mutex<SinkShared>>,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + FromSample<f32> + Send + 'static,
{
    let err_fn = |err| log::error!("Output stream error: {}", err);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !active.load(Ordering::SeqCst) {
                    for out in data.iter_mut() {
                        *out = T::from_sample(0.0f32);
                    }
                    return;
                }

                let mut state = match shared.lock() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for out in data.iter_mut() {
                    let sample = state.render_frame();
                    *out = T::from_sample(sample as f32 / 32768.0);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Schedules buffers into the shared output queue by absolute frame offset.
pub struct CpalSink {
    shared: Arc<Mutex<SinkShared>>,
}

impl AudioSink for CpalSink {
    fn play(&mut self, _id: u64, samples: Vec<i16>, start_at: f64) {
        let mut state = match self.shared.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let start_frame = ((start_at * OUTPUT_SAMPLE_RATE as f64).round() as u64).max(state.head);
        state.queue.push(ScheduledBuf {
            start_frame,
            samples,
        });
    }

    fn stop_all(&mut self) {
        let mut state = match self.shared.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.queue.clear();
    }
}

/// Reads rendered time off the shared output head.
pub struct CpalClock {
    shared: Arc<Mutex<SinkShared>>,
}

impl OutputClock for CpalClock {
    fn now(&self) -> f64 {
        let state = match self.shared.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.head as f64 / OUTPUT_SAMPLE_RATE as f64
    }
}
