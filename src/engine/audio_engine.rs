//! Audio Engine
//!
//! Owns the cpal output stream. The master processor is moved into the
//! stream callback, which runs on the device thread and must stay
//! real-time safe. Everything else talks to it through the queues and the
//! shared statistics.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig};

use super::channels::QueueConsumer;
use super::commands::NoteEvent;
use super::config::EngineConfig;
use super::error::{EngineError, EngineResult};
use super::renderer::InterleavedRenderer;
use crate::master::MasterProcessor;

/// An output device and the format the master would run at on it.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Device channels; the master renders `min(channels, 2)` of them.
    pub channels: u16,
    pub sample_rate: u32,
}

/// Most channels the master renders; extra device channels repeat the last.
const MASTER_CHANNELS: usize = 2;

/// Channels the master renders for a device with `device_channels`.
fn master_channels(device_channels: u16) -> usize {
    (device_channels as usize).clamp(1, MASTER_CHANNELS)
}

/// Case-insensitive substring match used for device selection.
fn matches_device(name: &str, query: &str) -> bool {
    name.to_lowercase().contains(&query.to_lowercase())
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

fn default_config(device: &Device) -> EngineResult<StreamConfig> {
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::Device(e.to_string()))?;
    Ok(StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(supported.sample_rate().0),
        buffer_size: cpal::BufferSize::Default,
    })
}

pub struct AudioEngine {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioEngine {
    /// Opens the default output device at its default configuration.
    pub fn new() -> EngineResult<Self> {
        Self::open(None)
    }

    /// Opens the first output device whose name contains `query`, or the
    /// default device when `query` is `None`.
    pub fn open(query: Option<&str>) -> EngineResult<Self> {
        let host = cpal::default_host();
        let device = match query {
            Some(query) => Self::find_device(&host, query)?,
            None => host
                .default_output_device()
                .ok_or(EngineError::NoOutputDevice)?,
        };
        let config = default_config(&device)?;
        log::info!(
            "audio device: {} ({} Hz, {} ch)",
            device_name(&device),
            config.sample_rate.0,
            config.channels
        );
        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    fn find_device(host: &Host, query: &str) -> EngineResult<Device> {
        host.output_devices()
            .map_err(|e| EngineError::Device(e.to_string()))?
            .find(|d| d.name().map_or(false, |name| matches_device(&name, query)))
            .ok_or_else(|| EngineError::Device(format!("no output device matching '{}'", query)))
    }

    /// Output devices on the default host with their default formats.
    /// Devices that cannot report a format are skipped.
    pub fn output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let Ok(devices) = host.output_devices() else {
            return Vec::new();
        };
        devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = default_config(&device).ok()?;
                Some(DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    name,
                    channels: config.channels,
                    sample_rate: config.sample_rate.0,
                })
            })
            .collect()
    }

    pub fn device_name(&self) -> String {
        device_name(&self.device)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Engine configuration matching the device format. `max_block_size`
    /// bounds the master block; longer callbacks are split.
    pub fn engine_config(&self, max_block_size: usize) -> EngineConfig {
        EngineConfig::new(
            self.config.sample_rate.0 as f32,
            max_block_size,
            master_channels(self.config.channels),
        )
    }

    /// Starts the stream, moving `master` onto the device thread. Notes
    /// from `midi` are drained once per callback.
    pub fn start(
        &mut self,
        master: MasterProcessor,
        midi: Option<QueueConsumer<NoteEvent>>,
    ) -> EngineResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let channels = self.config.channels as usize;
        let mut renderer = InterleavedRenderer::new(master, midi);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // REAL-TIME SAFE: No allocations, no locks, no blocking
                    renderer.render(data, channels);
                },
                move |err| {
                    log::error!("audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| EngineError::Device(e.to_string()))?;
        self.stream = Some(stream);
        log::info!("audio stream started");
        Ok(())
    }

    /// Stops the stream. The master is dropped with it.
    pub fn stop(&mut self) -> EngineResult<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| EngineError::Device(e.to_string()))?;
            log::info!("audio stream stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}
