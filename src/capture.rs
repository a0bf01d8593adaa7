//! Microphone capture pipeline
//!
//! Turns the live input device into a sequence of [`EncodedChunk`]s at
//! 16 kHz mono, ready for the live session transport. The cpal stream lives
//! on a dedicated thread (cpal's `Stream` is not `Send`); the audio callback
//! mono-mixes, downsamples, and hands fixed-size frames off with a
//! non-blocking `try_send` so the network can never stall capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, StreamConfig};
use tokio::sync::mpsc;

use crate::live::{EncodedChunk, INPUT_SAMPLE_RATE};
use crate::pcm;

/// Frame size handed to the transport, in samples at 16 kHz.
/// Trades latency (~256 ms) against per-message overhead.
pub const FRAME_SAMPLES: usize = 4096;

/// Errors that can occur while acquiring or running the microphone.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
        }
    }
}

impl std::error::Error for CaptureError {}

/// Handle to an active capture stream.
/// Stopping (or dropping) the handle stops the stream and ends the thread.
pub struct CaptureHandle {
    active: Arc<AtomicBool>,
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stop capturing and release the microphone.
    pub fn stop(mut self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        log::info!("Capture stopped, microphone released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
    }
}

/// Microphone capture using the default input device.
pub struct MicCapture {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl MicCapture {
    /// Acquire the default input device.
    ///
    /// Failure here is a fatal precondition for starting a session.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "Capture config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Start capturing into `tx`.
    ///
    /// Each full 4096-sample frame at 16 kHz mono is encoded and sent with
    /// `try_send`; if the channel is full the frame is dropped (back-pressure
    /// is the transport's concern, not the capture loop's).
    pub fn start(&self, tx: mpsc::Sender<EncodedChunk>) -> Result<CaptureHandle, CaptureError> {
        let device = self.device.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;

        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        // Handshake so start() can report stream-creation failure synchronously
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();

        let active_cb = active.clone();
        let thread = thread::spawn(move || {
            let stream = match build_stream(&device, &config, sample_format, active_cb, tx) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamCreationFailed(format!(
                    "Failed to start stream: {}",
                    e
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until stopped; the callback does the work
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Capture started ({} samples/frame @ 16 kHz)", FRAME_SAMPLES);
                Ok(CaptureHandle {
                    active,
                    stop_tx,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::StreamCreationFailed(
                "Capture thread exited during startup".to_string(),
            )),
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<EncodedChunk>,
) -> Result<cpal::Stream, CaptureError> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, active, tx),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, active, tx),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, active, tx),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<EncodedChunk>,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let source_rate = config.sample_rate.0;
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let mut frame_buf: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);
    let mut frames_sent: u64 = 0;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }

                let mono = mono_mix(data, channels);
                frame_buf.extend(downsample(&mono, source_rate, INPUT_SAMPLE_RATE));

                while frame_buf.len() >= FRAME_SAMPLES {
                    let frame: Vec<f32> = frame_buf.drain(..FRAME_SAMPLES).collect();
                    let chunk =
                        EncodedChunk::pcm16(&pcm::f32_to_i16(&frame), INPUT_SAMPLE_RATE);

                    // Fire-and-forget: never block the audio callback
                    if tx.try_send(chunk).is_err() {
                        log::debug!("Outbound channel full, dropping capture frame");
                        continue;
                    }

                    frames_sent += 1;
                    if frames_sent % 50 == 0 {
                        log::debug!("Capture: {} frames sent", frames_sent);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Mix interleaved multi-channel samples down to mono f32.
fn mono_mix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| f32::from_sample(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
            sum / frame.len() as f32
        })
        .collect()
}

/// Downsample mono f32 audio from `source_rate` to `target_rate`.
///
/// Integer ratios (e.g. 48 kHz -> 16 kHz) use block averaging; other ratios
/// fall back to nearest-sample decimation. Rates of zero return the input
/// unchanged rather than panicking.
pub fn downsample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate == 0 {
        let ratio = (source_rate / target_rate) as usize;
        return samples
            .chunks(ratio)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect();
    }

    // Non-integer ratio (e.g. 44.1 kHz -> 16 kHz): nearest-sample decimation
    let step = source_rate as f64 / target_rate as f64;
    let out_len = (samples.len() as f64 / step) as usize;
    (0..out_len)
        .map(|i| samples[((i as f64 * step) as usize).min(samples.len() - 1)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_3x_averaging() {
        // 48 kHz -> 16 kHz (3:1)
        let input = vec![3.0f32, 6.0, 9.0, 12.0, 15.0, 18.0];
        let output = downsample(&input, 48000, 16000);

        assert_eq!(output.len(), 2);
        assert!((output[0] - 6.0).abs() < f32::EPSILON); // (3+6+9)/3
        assert!((output[1] - 15.0).abs() < f32::EPSILON); // (12+15+18)/3
    }

    #[test]
    fn test_downsample_same_rate() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(downsample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_downsample_fractional_ratio() {
        // 44.1 kHz -> 16 kHz: length shrinks by ~2.756x
        let input: Vec<f32> = (0..441).map(|i| i as f32).collect();
        let output = downsample(&input, 44100, 16000);

        assert_eq!(output.len(), 160);
        // Monotonic input stays monotonic under decimation
        assert!(output.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_downsample_zero_rate() {
        let input = vec![0.5f32, -0.5];
        assert_eq!(downsample(&input, 0, 16000), input);
        assert_eq!(downsample(&input, 48000, 0), input);
    }

    #[test]
    fn test_mono_mix_stereo() {
        let data = vec![0.2f32, 0.4, -0.6, -0.2];
        let mono = mono_mix(&data, 2);

        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_mono_mix_mono_passthrough() {
        let data = vec![0.1f32, 0.2, 0.3];
        assert_eq!(mono_mix(&data, 1), data);
    }
}
