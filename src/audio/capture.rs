//! Live microphone capture using cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::source::SampleSource;
use crate::config::AudioConfig;
use crate::error::{AudioError, Result};

/// Capture callbacks buffered before blocks are dropped
const CAPTURE_QUEUE: usize = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags shared between the handle, the cpal callbacks and the source
#[derive(Default)]
struct CaptureFlags {
    running: AtomicBool,
    failed: AtomicBool,
    overflows: AtomicU64,
}

/// Audio input device handle.
///
/// The cpal stream is not `Send`, so it stays with this handle on the thread
/// that created it; [`AudioCapture::source`] hands the sample side to the
/// pipeline.
pub struct AudioCapture {
    config: AudioConfig,
    host: Host,
    device: Option<(Device, SupportedStreamConfig)>,
    stream: Option<Stream>,
    blocks_tx: Sender<Vec<f32>>,
    blocks_rx: Receiver<Vec<f32>>,
    flags: Arc<CaptureFlags>,
}

impl AudioCapture {
    pub fn new(config: AudioConfig) -> Result<Self> {
        let (blocks_tx, blocks_rx) = bounded(CAPTURE_QUEUE);
        Ok(Self {
            config,
            host: cpal::default_host(),
            device: None,
            stream: None,
            blocks_tx,
            blocks_rx,
            flags: Arc::new(CaptureFlags::default()),
        })
    }

    /// List available audio input devices
    pub fn list_devices(&self) -> Result<Vec<String>> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    /// Open the configured device and pick its stream format
    pub fn init(&mut self) -> Result<()> {
        let device = self.open_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio input device: {}", name);

        let stream_config = choose_stream_config(&device, &self.config)?;
        info!(
            "Audio config: {} channels @ {} Hz (pipeline: {} Hz)",
            stream_config.channels(),
            stream_config.sample_rate().0,
            self.config.sample_rate
        );

        self.device = Some((device, stream_config));
        Ok(())
    }

    /// Rate the device delivers (0 before `init`)
    pub fn actual_sample_rate(&self) -> u32 {
        self.device
            .as_ref()
            .map_or(0, |(_, cfg)| cfg.sample_rate().0)
    }

    /// Start the input stream
    pub fn start(&mut self) -> Result<()> {
        let (device, supported) = self
            .device
            .as_ref()
            .ok_or_else(|| AudioError::DeviceConfig("Device not initialized".to_string()))?;

        let channels = supported.channels();
        let stream_config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(self.config.buffer_size),
        };

        let blocks = self.blocks_tx.clone();
        let on_data = Arc::clone(&self.flags);
        let on_error = Arc::clone(&self.flags);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !on_data.running.load(Ordering::Relaxed) {
                        return;
                    }
                    if blocks.try_send(downmix(data, channels as usize)).is_err() {
                        on_data.overflows.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    // Ends the paired source so the caller can reconnect
                    on_error.failed.store(true, Ordering::Relaxed);
                    on_error.running.store(false, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        self.flags.failed.store(false, Ordering::Relaxed);
        self.flags.running.store(true, Ordering::Relaxed);
        self.stream = Some(stream);

        info!("Audio capture started");
        Ok(())
    }

    /// Stop the input stream; the paired source ends on its next poll
    pub fn stop(&mut self) {
        self.flags.running.store(false, Ordering::Relaxed);
        if self.stream.take().is_some() {
            let overflows = self.flags.overflows.swap(0, Ordering::Relaxed);
            if overflows > 0 {
                warn!("Audio capture dropped {} callback blocks", overflows);
            }
            info!("Audio capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::Relaxed)
    }

    /// True once the device reported an error since the last `start`
    pub fn has_failed(&self) -> bool {
        self.flags.failed.load(Ordering::Relaxed)
    }

    /// Sample side of the capture, movable to the pipeline thread
    pub fn source(&self) -> CaptureSource {
        CaptureSource {
            blocks: self.blocks_rx.clone(),
            flags: Arc::clone(&self.flags),
            sample_rate: self.actual_sample_rate(),
        }
    }

    fn open_device(&self) -> Result<Device> {
        let Some(wanted) = self.config.device.as_deref() else {
            return Ok(self
                .host
                .default_input_device()
                .ok_or(AudioError::NoInputDevice)?);
        };

        let mut devices = self
            .host
            .input_devices()
            .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

        devices
            .find(|device| device.name().is_ok_and(|name| name.contains(wanted)))
            .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string()).into())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Prefer the configured channel count at the pipeline rate; otherwise take
/// the highest rate on offer and let conditioning resample.
fn choose_stream_config(device: &Device, config: &AudioConfig) -> Result<SupportedStreamConfig> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?
        .collect();

    let target = SampleRate(config.sample_rate);
    for range in &ranges {
        debug!(
            "Supported config: channels={}, sample_rate={:?}-{:?}",
            range.channels(),
            range.min_sample_rate(),
            range.max_sample_rate()
        );
    }

    let covers_target =
        |r: &&cpal::SupportedStreamConfigRange| r.min_sample_rate() <= target && target <= r.max_sample_rate();

    if let Some(range) = ranges
        .iter()
        .filter(|r| r.channels() == config.channels)
        .find(covers_target)
    {
        return Ok(range.clone().with_sample_rate(target));
    }
    if let Some(range) = ranges.iter().find(covers_target) {
        return Ok(range.clone().with_sample_rate(target));
    }

    ranges
        .into_iter()
        .max_by_key(|r| r.max_sample_rate())
        .map(|r| r.with_max_sample_rate())
        .ok_or_else(|| {
            AudioError::DeviceConfig("No suitable audio configuration found".to_string()).into()
        })
}

/// Average interleaved frames down to mono
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Receiving end of an [`AudioCapture`]
pub struct CaptureSource {
    blocks: Receiver<Vec<f32>>,
    flags: Arc<CaptureFlags>,
    sample_rate: u32,
}

impl SampleSource for CaptureSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self) -> Option<Vec<f32>> {
        match self.blocks.recv_timeout(POLL_INTERVAL) {
            Ok(block) => Some(block),
            // Empty block lets the session check for cancellation
            Err(RecvTimeoutError::Timeout) if self.flags.running.load(Ordering::Relaxed) => {
                Some(Vec::new())
            }
            Err(_) => None,
        }
    }
}
