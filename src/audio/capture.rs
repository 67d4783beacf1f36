//! Audio capture using cpal
//!
//! cpal streams are not `Send`, so a dedicated thread builds and owns the
//! stream. The thread exits when the returned [`AudioStream`] is dropped.

use super::{AudioInput, AudioStream, CHUNK_SIZE, FRAME_BUFFER, SAMPLE_RATE};
use crate::error::{VoxError, VoxResult};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default (or named) cpal input device
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    /// Prefer a device whose name contains this text
    preferred: Option<String>,
}

/// Dropping this stops the capture thread
struct CaptureGuard {
    stop: std_mpsc::Sender<()>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

impl CpalInput {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }

    /// Log available input devices
    pub fn list_devices(&self) -> Result<()> {
        let host = cpal::default_host();
        info!("Available audio input devices:");
        for (i, device) in host.input_devices()?.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            info!("  [{}] {}", i, name);
        }
        Ok(())
    }

    fn select_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(wanted) = &self.preferred {
            let wanted = wanted.to_lowercase();
            for device in host.input_devices()? {
                let name = device.name().unwrap_or_default();
                if name.to_lowercase().contains(&wanted) {
                    return Ok(device);
                }
            }
            warn!("Input device '{}' not found, using default", wanted);
        }
        host.default_input_device().context("No default input device")
    }
}

impl AudioInput for CpalInput {
    fn default_device(&self) -> Option<String> {
        self.select_device().ok().and_then(|d| d.name().ok())
    }

    fn open(&self) -> VoxResult<AudioStream> {
        let device = self
            .select_device()
            .map_err(|e| VoxError::DeviceUnavailable(e.to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<i16>>(FRAME_BUFFER);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        thread::spawn(move || {
            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(SAMPLE_RATE),
                buffer_size: cpal::BufferSize::Fixed(CHUNK_SIZE as u32),
            };

            let stream = device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if frame_tx.try_send(data.to_vec()).is_err() {
                        debug!("Audio frame dropped");
                    }
                },
                |err| {
                    warn!("Audio stream error: {}", err);
                },
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Blocks until the guard is dropped
            let _ = stop_rx.recv();
            drop(stream);
            debug!("🎙️ Capture thread stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("🎙️ Audio capture started on {}", device_name);
                Ok(AudioStream::new(frame_rx, CaptureGuard { stop: stop_tx }))
            }
            Ok(Err(e)) => Err(VoxError::DeviceUnavailable(e)),
            Err(_) => Err(VoxError::DeviceUnavailable(
                "capture thread exited".to_string(),
            )),
        }
    }
}
