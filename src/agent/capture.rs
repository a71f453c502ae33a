//! Capture sources feeding the agent pipeline
//!
//! Sources run on their own thread (or the audio driver's) and push raw
//! buffers into a bounded crossbeam channel. A full channel drops the buffer;
//! the capture side never blocks.

use crossbeam_channel::{Sender, TrySendError};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::CaptureError;
use crate::protocol::AudioFormat;

/// Raw PCM as delivered by a capture source
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

/// Producer of interleaved little-endian PCM
pub trait CaptureSource: Send {
    /// Format of the buffers this source produces
    fn format(&self) -> AudioFormat;

    /// Start delivering buffers into `tx`
    fn start(&mut self, tx: Sender<CaptureBuffer>) -> Result<(), CaptureError>;

    /// Stop delivering; dropping the sender ends the consumer
    fn stop(&mut self);

    /// Buffers dropped because the consumer fell behind
    fn dropped(&self) -> u64 {
        0
    }
}

/// Push a buffer without blocking, counting drops
fn deliver(tx: &Sender<CaptureBuffer>, buffer: CaptureBuffer, dropped: &AtomicU64) -> bool {
    match tx.try_send(buffer) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Synthetic sine wave paced in real time
pub struct ToneSource {
    format: AudioFormat,
    frequency: f32,
    period: Duration,
    phase: f32,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f32) -> Self {
        Self {
            format,
            frequency,
            period: Duration::from_millis(10),
            phase: 0.0,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Interval between delivered buffers
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    /// Render `frames` frames at half scale, continuing the previous phase
    pub fn render(&mut self, frames: usize) -> Vec<u8> {
        let step = TAU * self.frequency / self.format.sample_rate.max(1) as f32;
        let mut out = Vec::with_capacity(frames * self.format.block_align());

        for _ in 0..frames {
            let sample = 0.5 * self.phase.sin();
            self.phase = (self.phase + step) % TAU;
            for _ in 0..self.format.channels {
                match self.format.bits_per_sample {
                    8 => out.push(((sample * 127.0) as i8 as u8).wrapping_add(128)),
                    16 => out.extend_from_slice(&((sample * 32767.0) as i16).to_le_bytes()),
                    24 => out.extend_from_slice(&((sample * 8_388_607.0) as i32).to_le_bytes()[..3]),
                    _ => out.extend_from_slice(&sample.to_le_bytes()),
                }
            }
        }
        out
    }
}

impl CaptureSource for ToneSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, tx: Sender<CaptureBuffer>) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.format.is_valid() {
            return Err(CaptureError::Stream(format!("invalid tone format {}", self.format)));
        }

        let mut generator = ToneSource::new(self.format, self.frequency);
        generator.phase = self.phase;
        let period = self.period;
        let frames_per_period =
            ((self.format.sample_rate as u128 * period.as_millis()) / 1000).max(1) as usize;
        let running = self.running.clone();
        let dropped = self.dropped.clone();
        let format = self.format;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("tone-capture".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::Relaxed) {
                    let buffer = CaptureBuffer {
                        data: generator.render(frames_per_period),
                        format,
                    };
                    if !deliver(&tx, buffer, &dropped) {
                        break;
                    }

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        self.thread_handle = Some(handle);
        tracing::info!("Tone capture started: {} Hz at {}", self.frequency, self.format);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "device-capture")]
pub use device::DeviceSource;

#[cfg(feature = "device-capture")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;

    /// Default input device of the default host
    ///
    /// The cpal stream is not `Send`, so it is built and owned by a dedicated
    /// thread that lives until [`CaptureSource::stop`].
    pub struct DeviceSource {
        device: cpal::Device,
        config: cpal::StreamConfig,
        sample_format: SampleFormat,
        format: AudioFormat,
        stop_tx: Option<crossbeam_channel::Sender<()>>,
        dropped: Arc<AtomicU64>,
        thread_handle: Option<JoinHandle<()>>,
    }

    impl DeviceSource {
        /// Open the default input device with its default configuration
        pub fn open_default() -> Result<Self, CaptureError> {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
            let supported = device
                .default_input_config()
                .map_err(|e| CaptureError::Stream(e.to_string()))?;

            let sample_format = supported.sample_format();
            let bits = match sample_format {
                SampleFormat::F32 => 32,
                SampleFormat::I16 => 16,
                SampleFormat::U8 => 8,
                other => return Err(CaptureError::UnsupportedSampleFormat(format!("{:?}", other))),
            };
            let config: cpal::StreamConfig = supported.into();
            let format = AudioFormat::new(config.sample_rate.0, config.channels, bits);

            if let Ok(name) = device.name() {
                tracing::info!("Using input device: {} ({})", name, format);
            }

            Ok(Self {
                device,
                config,
                sample_format,
                format,
                stop_tx: None,
                dropped: Arc::new(AtomicU64::new(0)),
                thread_handle: None,
            })
        }

        fn build_stream(
            device: &cpal::Device,
            config: &cpal::StreamConfig,
            sample_format: SampleFormat,
            format: AudioFormat,
            tx: Sender<CaptureBuffer>,
            dropped: Arc<AtomicU64>,
        ) -> Result<cpal::Stream, CaptureError> {
            let on_error = |e: cpal::StreamError| tracing::warn!("Capture stream error: {}", e);

            let stream = match sample_format {
                SampleFormat::F32 => device.build_input_stream(
                    config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let bytes = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                        deliver(&tx, CaptureBuffer { data: bytes, format }, &dropped);
                    },
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let bytes = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                        deliver(&tx, CaptureBuffer { data: bytes, format }, &dropped);
                    },
                    on_error,
                    None,
                ),
                SampleFormat::U8 => device.build_input_stream(
                    config,
                    move |data: &[u8], _: &cpal::InputCallbackInfo| {
                        deliver(&tx, CaptureBuffer { data: data.to_vec(), format }, &dropped);
                    },
                    on_error,
                    None,
                ),
                other => return Err(CaptureError::UnsupportedSampleFormat(format!("{:?}", other))),
            };

            stream.map_err(|e| CaptureError::Stream(e.to_string()))
        }
    }

    impl CaptureSource for DeviceSource {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn start(&mut self, tx: Sender<CaptureBuffer>) -> Result<(), CaptureError> {
            if self.thread_handle.is_some() {
                return Ok(());
            }

            let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
            let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);
            let device = self.device.clone();
            let config = self.config.clone();
            let sample_format = self.sample_format;
            let format = self.format;
            let dropped = self.dropped.clone();

            let handle = thread::Builder::new()
                .name("device-capture".to_string())
                .spawn(move || {
                    let stream = match Self::build_stream(&device, &config, sample_format, format, tx, dropped)
                        .and_then(|s| s.play().map(|_| s).map_err(|e| CaptureError::Stream(e.to_string())))
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    // Keep the stream alive until asked to stop
                    let _ = stop_rx.recv();
                    drop(stream);
                })
                .map_err(|e| CaptureError::Stream(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    self.stop_tx = Some(stop_tx);
                    self.thread_handle = Some(handle);
                    tracing::info!("Device capture started");
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => Err(CaptureError::Stream("capture thread exited".to_string())),
            }
        }

        fn stop(&mut self) {
            if let Some(stop_tx) = self.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }

        fn dropped(&self) -> u64 {
            self.dropped.load(Ordering::Relaxed)
        }
    }

    impl Drop for DeviceSource {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_layout() {
        let mut tone = ToneSource::new(AudioFormat::new(48_000, 2, 16), 440.0);
        assert_eq!(tone.render(480).len(), 480 * 4);

        let mut float = ToneSource::new(AudioFormat::new(48_000, 1, 32), 440.0);
        let data = float.render(100);
        assert_eq!(data.len(), 400);
        let peak = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]).abs())
            .fold(0.0f32, f32::max);
        assert!(peak > 0.3 && peak <= 0.5);
    }

    #[test]
    fn test_render_is_phase_continuous() {
        let format = AudioFormat::new(8_000, 1, 16);
        let mut split = ToneSource::new(format, 1_000.0);
        let mut joined = split.render(30);
        joined.extend(split.render(50));

        let mut whole = ToneSource::new(format, 1_000.0);
        assert_eq!(joined, whole.render(80));
    }

    #[test]
    fn test_tone_thread_delivers_and_stops() {
        let format = AudioFormat::new(8_000, 1, 16);
        let mut tone = ToneSource::new(format, 440.0).with_period(Duration::from_millis(5));
        let (tx, rx) = crossbeam_channel::bounded(64);

        tone.start(tx).unwrap();
        let buffer = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(buffer.format, format);
        assert_eq!(buffer.data.len(), 40 * 2);

        tone.stop();
        // Sender dropped with the thread; the channel drains then disconnects
        while rx.recv_timeout(Duration::from_secs(1)).is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_full_channel_drops() {
        let mut tone = ToneSource::new(AudioFormat::new(8_000, 1, 16), 440.0).with_period(Duration::from_millis(1));
        let (tx, rx) = crossbeam_channel::bounded(1);
        tone.start(tx).unwrap();
        thread::sleep(Duration::from_millis(50));
        tone.stop();
        assert!(tone.dropped() > 0);
        drop(rx);
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut tone = ToneSource::new(AudioFormat::new(0, 1, 16), 440.0);
        let (tx, _rx) = crossbeam_channel::bounded(1);
        assert!(tone.start(tx).is_err());
    }
}
