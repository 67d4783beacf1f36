//! Audio input
//!
//! Recognizers consume 16 kHz mono i16 frames from an [`AudioStream`].
//! The stream owns whatever keeps the device open; dropping it releases the device.

#[cfg(feature = "native-audio")]
pub mod capture;
pub mod cue;

use crate::error::{VoxError, VoxResult};
use std::any::Any;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHUNK_SIZE: usize = 1024;
/// Frames buffered between the device and the recognizer
pub const FRAME_BUFFER: usize = 64;

/// An open capture stream
pub struct AudioStream {
    pub frames: mpsc::Receiver<Vec<i16>>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl AudioStream {
    /// `guard` is kept alive for as long as the stream is
    pub fn new(frames: mpsc::Receiver<Vec<i16>>, guard: impl Any + Send) -> Self {
        Self {
            frames,
            _guard: Some(Box::new(guard)),
        }
    }

    pub fn from_receiver(frames: mpsc::Receiver<Vec<i16>>) -> Self {
        Self {
            frames,
            _guard: None,
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream").finish()
    }
}

/// Capture device access
pub trait AudioInput: Send + Sync {
    /// Identifier of the current default capture device, `None` when there is none
    fn default_device(&self) -> Option<String>;

    /// Open the default device
    fn open(&self) -> VoxResult<AudioStream>;
}

/// In-memory input for tests and headless runs
#[derive(Debug, Default)]
pub struct ChannelInput {
    state: Mutex<ChannelState>,
}

#[derive(Debug, Default)]
struct ChannelState {
    device: Option<String>,
    sender: Option<mpsc::Sender<Vec<i16>>>,
    opened: usize,
}

impl ChannelInput {
    pub fn new(device: Option<&str>) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                device: device.map(str::to_string),
                ..ChannelState::default()
            }),
        }
    }

    /// Change the default device. `None` unplugs it and closes the open stream.
    pub fn set_device(&self, device: Option<&str>) -> VoxResult<()> {
        let mut state = self.state.lock()?;
        if device.is_none() {
            state.sender = None;
        }
        state.device = device.map(str::to_string);
        Ok(())
    }

    /// End the open stream. The device stays listed.
    pub fn close(&self) -> VoxResult<()> {
        self.state.lock()?.sender = None;
        Ok(())
    }

    /// Push a frame to the open stream. Returns false when no stream is open.
    pub fn feed(&self, frame: Vec<i16>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let sent = match &state.sender {
            Some(sender) => sender.try_send(frame),
            None => return false,
        };
        match sent {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Audio buffer full, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                state.sender = None;
                false
            }
        }
    }

    /// Number of times the input was opened
    pub fn open_count(&self) -> usize {
        self.state.lock().map(|s| s.opened).unwrap_or_default()
    }

    /// True while a consumer holds the stream
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.sender.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl AudioInput for ChannelInput {
    fn default_device(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.device.clone())
    }

    fn open(&self) -> VoxResult<AudioStream> {
        let mut state = self.state.lock()?;
        if state.device.is_none() {
            return Err(VoxError::DeviceUnavailable("no input device".to_string()));
        }
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        state.sender = Some(tx);
        state.opened += 1;
        Ok(AudioStream::from_receiver(rx))
    }
}

/// Signal problems worth logging when `log_audio_signal_issues` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalIssue {
    TooQuiet,
    TooLoud,
}

const QUIET_ENERGY: f32 = 30.0;
const LOUD_ENERGY: f32 = 20000.0;

/// Calculate audio energy (RMS)
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).pow(2)).sum();
    (sum as f32 / samples.len() as f32).sqrt()
}

pub fn signal_issue(samples: &[i16]) -> Option<SignalIssue> {
    if samples.is_empty() {
        return None;
    }
    let energy = calculate_energy(samples);
    if energy < QUIET_ENERGY {
        Some(SignalIssue::TooQuiet)
    } else if energy > LOUD_ENERGY {
        Some(SignalIssue::TooLoud)
    } else {
        None
    }
}
