//! Audio device output using cpal
//!
//! Each render runs on its own audio thread that owns the cpal stream (the
//! stream type is not `Send` on every host). The thread reports startup, then
//! waits for the callback to drain the buffer or for a stop request.

use crate::audio::resampler::resample_planar;
use crate::audio::sink::{OutputControl, OutputHandle, RenderRequest, RenderSink};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How long `render` waits for the audio thread to start the stream
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval of the audio thread while output is running
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Render sink that plays through a cpal output device
#[derive(Debug, Clone)]
pub struct CpalSink {
    /// Requested device name (None = default device)
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
}

impl CpalSink {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::Playback(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device and read its default configuration
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let device = open_device(device_name.as_deref())?;
        let supported = device
            .default_output_config()
            .map_err(|e| Error::Playback(format!("Failed to get default output config: {}", e)))?;

        info!(
            "Audio output: {} ({}Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        Ok(Self {
            device_name,
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
            sample_format: supported.sample_format(),
        })
    }

    /// Resample for device rate and playback rate, then map to device channels
    fn prepare_samples(&self, request: &RenderRequest) -> Result<Vec<f32>> {
        let rate = if request.playback_rate.is_finite() && request.playback_rate > 0.0 {
            f64::from(request.playback_rate)
        } else {
            1.0
        };
        let target_rate = f64::from(self.sample_rate) / rate;
        let planar = resample_planar(&request.audio.channels, request.audio.sample_rate, target_rate)?;

        let frames = planar.first().map(Vec::len).unwrap_or(0);
        let device_channels = usize::from(self.channels);
        let mut interleaved = Vec::with_capacity(frames * device_channels);
        for frame in 0..frames {
            for channel in 0..device_channels {
                // Mono sources are duplicated; extra device channels reuse the last source channel
                let source = planar
                    .get(channel)
                    .or_else(|| planar.last())
                    .and_then(|c| c.get(frame))
                    .copied()
                    .unwrap_or(0.0);
                interleaved.push((source * request.volume).clamp(-1.0, 1.0));
            }
        }
        Ok(interleaved)
    }
}

impl RenderSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn render(&self, request: RenderRequest) -> Result<OutputHandle> {
        let samples = Arc::new(self.prepare_samples(&request)?);
        let control = Arc::new(ThreadControl::default());
        let (done_tx, done_rx) = oneshot::channel();
        let (started_tx, started_rx) = mpsc::channel::<Result<()>>();

        let sink = self.clone();
        let thread_control = Arc::clone(&control);
        let render_id = request.render_id;

        std::thread::Builder::new()
            .name(format!("sfp-render-{}", request.index))
            .spawn(move || {
                let position = Arc::new(AtomicUsize::new(0));
                let stream = match sink.build_stream(Arc::clone(&samples), Arc::clone(&position)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = started_tx.send(Err(Error::Playback(format!("Failed to start stream: {}", e))));
                    return;
                }
                let _ = started_tx.send(Ok(()));

                loop {
                    std::thread::sleep(POLL_INTERVAL);
                    if thread_control.is_stopped() {
                        debug!("Render {} stopped", render_id);
                        break;
                    }
                    if position.load(Ordering::Relaxed) >= samples.len() {
                        let _ = done_tx.send(());
                        break;
                    }
                }
                drop(stream);
            })
            .map_err(|e| Error::Playback(format!("Failed to spawn audio thread: {}", e)))?;

        match started_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(OutputHandle {
                completion: done_rx,
                control,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                control.stop();
                Err(Error::Playback("Audio thread did not start output in time".into()))
            }
        }
    }
}

impl CpalSink {
    fn build_stream(&self, samples: Arc<Vec<f32>>, position: Arc<AtomicUsize>) -> Result<cpal::Stream> {
        let device = open_device(self.device_name.as_deref())?;
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_fn = |err| error!("Audio stream error: {}", err);

        let stream = match self.sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = next_sample(&samples, &position);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        *out = (next_sample(&samples, &position) * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            ),
            other => {
                warn!("Unsupported device sample format {:?}", other);
                return Err(Error::Playback(format!("Unsupported sample format {:?}", other)));
            }
        };

        stream.map_err(|e| Error::Playback(format!("Failed to build stream: {}", e)))
    }
}

fn next_sample(samples: &[f32], position: &AtomicUsize) -> f32 {
    let index = position.fetch_add(1, Ordering::Relaxed);
    samples.get(index).copied().unwrap_or(0.0)
}

fn open_device(device_name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(name) = device_name {
        let found = host
            .output_devices()
            .map_err(|e| Error::Playback(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => warn!("Output device '{}' not found, using default", name),
        }
    }
    host.default_output_device()
        .ok_or_else(|| Error::Playback("No default output device".into()))
}

/// Stop flag shared with the audio thread
#[derive(Debug, Default)]
struct ThreadControl {
    stopped: AtomicBool,
}

impl ThreadControl {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl OutputControl for ThreadControl {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}
