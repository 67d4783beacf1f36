//! Recognition session state machine
//!
//! Pure and synchronous: every input returns the [`Effect`]s the session actor
//! must carry out, in order. Nothing here touches a backend or a device.

use crate::error::VoxError;
use crate::grammar::CompiledGrammar;
use crate::provider::{GrammarProvider, Resolution};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Command,
    Dialogue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    WaitingForDevice,
    Idle,
    Recognizing,
    Stopped,
}

/// A phrase that was heard, accepted and resolved
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    pub grammar: Arc<CompiledGrammar>,
    pub resolution: Resolution,
    pub mode: Mode,
}

/// Why a load or restart failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The capture device is listed but could not be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("{0}")]
    Backend(String),
}

impl From<&VoxError> for LoadFailure {
    fn from(err: &VoxError) -> Self {
        match err {
            VoxError::DeviceUnavailable(reason) => LoadFailure::DeviceUnavailable(reason.clone()),
            other => LoadFailure::Backend(other.to_string()),
        }
    }
}

/// Work the actor performs on behalf of the machine
#[derive(Debug, Clone)]
pub enum Effect {
    /// Abort any load in flight and stop the backend
    Cancel,
    /// Load and start a grammar set
    Load {
        generation: u64,
        grammars: Vec<Arc<CompiledGrammar>>,
    },
    /// Start the backend again on a set it still holds
    Restart { generation: u64 },
    /// Make the fallback backend current
    UseFallback,
    /// Poll until a capture device shows up
    WaitForDevice,
    /// Stop device watching and waiting
    StopDeviceWatch,
    PlayCue { paused: bool },
    Emit(Recognition),
}

/// Confidence gates and always-on phrases
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub dialogue_min_confidence: f32,
    pub command_min_confidence: f32,
    pub pause: Vec<Arc<CompiledGrammar>>,
    pub resume: Vec<Arc<CompiledGrammar>>,
    pub fallback_available: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dialogue_min_confidence: 0.5,
            command_min_confidence: 0.7,
            pause: Vec::new(),
            resume: Vec::new(),
            fallback_available: false,
        }
    }
}

#[derive(Clone)]
struct Request {
    mode: Mode,
    providers: Vec<Arc<dyn GrammarProvider>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Provider(usize),
    PauseToggle,
}

/// A grammar set as handed to the backend
#[derive(Clone)]
struct ActiveSet {
    generation: u64,
    mode: Mode,
    grammars: Vec<Arc<CompiledGrammar>>,
    owners: Vec<Owner>,
    providers: Vec<Arc<dyn GrammarProvider>>,
}

/// Read-only view for the host and tests
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub mode: Mode,
    pub paused: bool,
    /// Generation results are accepted for
    pub generation: Option<u64>,
    pub loading: bool,
    pub grammar_count: usize,
    pub using_fallback: bool,
}

pub struct SessionMachine {
    settings: SessionSettings,
    phase: Phase,
    paused: bool,
    /// Last generation number handed out
    counter: u64,
    request: Option<Request>,
    active: Option<ActiveSet>,
    /// Set kept while its replacement loads, to revert to on failure
    previous: Option<ActiveSet>,
    pending_load: Option<u64>,
    fallen_back: bool,
}

impl SessionMachine {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            phase: Phase::Uninitialized,
            paused: false,
            counter: 0,
            request: None,
            active: None,
            previous: None,
            pending_load: None,
            fallen_back: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            mode: self.request.as_ref().map(|r| r.mode).unwrap_or_default(),
            paused: self.paused,
            generation: self.active_generation(),
            loading: self.pending_load.is_some(),
            grammar_count: self.active.as_ref().map_or(0, |a| a.grammars.len()),
            using_fallback: self.fallen_back,
        }
    }

    fn in_flight(&self) -> bool {
        self.phase == Phase::Recognizing || self.pending_load.is_some()
    }

    /// Leave `Uninitialized`. With a device a pending request is activated,
    /// otherwise the session waits for one.
    pub fn start(&mut self, device_ready: bool) -> Vec<Effect> {
        if self.phase != Phase::Uninitialized {
            return Vec::new();
        }
        if device_ready {
            self.phase = Phase::Idle;
            self.activate_pending()
        } else {
            self.phase = Phase::WaitingForDevice;
            vec![Effect::WaitForDevice]
        }
    }

    pub fn activate(&mut self, mode: Mode, providers: Vec<Arc<dyn GrammarProvider>>) -> Vec<Effect> {
        if self.phase == Phase::Stopped {
            return Vec::new();
        }
        self.request = Some(Request { mode, providers });
        match self.phase {
            Phase::Uninitialized | Phase::WaitingForDevice => {
                info!("Recording device is not ready, deferring activation");
                Vec::new()
            }
            _ => self.activate_current(),
        }
    }

    fn build_set(&self, generation: u64) -> ActiveSet {
        let (mode, providers) = match &self.request {
            Some(r) => (r.mode, r.providers.clone()),
            None => (Mode::Command, Vec::new()),
        };

        let mut grammars = Vec::new();
        let mut owners = Vec::new();
        if self.paused {
            for g in &self.settings.resume {
                grammars.push(g.clone());
                owners.push(Owner::PauseToggle);
            }
        } else {
            for (i, provider) in providers.iter().enumerate() {
                for g in provider.grammars() {
                    grammars.push(g);
                    owners.push(Owner::Provider(i));
                }
            }
            for g in &self.settings.pause {
                grammars.push(g.clone());
                owners.push(Owner::PauseToggle);
            }
        }

        ActiveSet {
            generation,
            mode,
            grammars,
            owners,
            providers,
        }
    }

    fn activate_pending(&mut self) -> Vec<Effect> {
        if self.request.is_none() {
            debug!("No activation requested yet");
            return Vec::new();
        }
        self.activate_current()
    }

    fn activate_current(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.in_flight() {
            effects.push(Effect::Cancel);
        }

        // Only a set that finished loading can be reverted to
        let active_loaded = self.pending_load.is_none();
        self.counter += 1;
        let set = self.build_set(self.counter);
        self.phase = Phase::Idle;
        self.pending_load = None;

        if set.grammars.is_empty() {
            debug!("No grammars to load for generation {}", set.generation);
            self.active = None;
            self.previous = None;
            return effects;
        }

        info!(
            "Recognition {}: {:?} mode, {} phrases (generation {})",
            if self.paused { "paused" } else { "started" },
            set.mode,
            set.grammars.len(),
            set.generation
        );
        effects.push(Effect::Load {
            generation: set.generation,
            grammars: set.grammars.clone(),
        });
        self.pending_load = Some(set.generation);
        let replaced = self.active.replace(set);
        if active_loaded {
            self.previous = replaced;
        }
        effects
    }

    /// A load or restart finished. `retained` is the generation the backend
    /// still holds after a failure.
    pub fn on_load_finished(
        &mut self,
        generation: u64,
        result: Result<(), LoadFailure>,
        retained: Option<u64>,
    ) -> Vec<Effect> {
        if self.phase == Phase::Stopped || self.pending_load != Some(generation) {
            debug!("Ignoring outcome of superseded load {}", generation);
            return Vec::new();
        }
        self.pending_load = None;

        match result {
            Ok(()) => {
                self.phase = Phase::Recognizing;
                self.previous = None;
                Vec::new()
            }
            Err(LoadFailure::DeviceUnavailable(reason)) => {
                warn!("⚠️ Could not open recording device: {}", reason);
                // Re-activated from the request once the device opens
                self.active = None;
                self.previous = None;
                self.phase = Phase::WaitingForDevice;
                vec![Effect::WaitForDevice]
            }
            Err(e) => {
                error!("❌ Loading generation {} failed: {}", generation, e);
                self.phase = Phase::Idle;
                match self.previous.take() {
                    Some(prev) if retained == Some(prev.generation) => {
                        warn!("Reverting to generation {}", prev.generation);
                        self.pending_load = Some(prev.generation);
                        let generation = prev.generation;
                        self.active = Some(prev);
                        vec![Effect::Restart { generation }]
                    }
                    _ => {
                        warn!("No grammar set loaded until the next activation");
                        self.active = None;
                        Vec::new()
                    }
                }
            }
        }
    }

    /// The backend died while serving `generation`
    pub fn on_backend_failed(&mut self, generation: u64, reason: &str) -> Vec<Effect> {
        if self.active_generation() != Some(generation) || self.phase != Phase::Recognizing {
            return Vec::new();
        }
        error!("❌ Recognizer failed: {}", reason);

        let mut effects = vec![Effect::Cancel];
        self.phase = Phase::Idle;
        self.pending_load = None;
        if self.settings.fallback_available && !self.fallen_back {
            self.fallen_back = true;
            effects.push(Effect::UseFallback);
            effects.extend(self.activate_current());
        } else {
            self.active = None;
            self.previous = None;
        }
        effects
    }

    /// The backend switched to its fallback on its own during a load
    pub fn on_fallback_engaged(&mut self) {
        self.fallen_back = true;
    }

    pub fn on_device_lost(&mut self) -> Vec<Effect> {
        match self.phase {
            Phase::Uninitialized | Phase::WaitingForDevice | Phase::Stopped => return Vec::new(),
            Phase::Idle | Phase::Recognizing => {}
        }

        let mut effects = Vec::new();
        if self.in_flight() {
            effects.push(Effect::Cancel);
        }
        self.active = None;
        self.previous = None;
        self.pending_load = None;
        self.phase = Phase::WaitingForDevice;
        effects.push(Effect::WaitForDevice);
        effects
    }

    pub fn on_device_restored(&mut self) -> Vec<Effect> {
        if self.phase != Phase::WaitingForDevice {
            return Vec::new();
        }
        self.phase = Phase::Idle;
        self.activate_pending()
    }

    pub fn on_result(&mut self, generation: u64, index: usize, text: &str, confidence: f32) -> Vec<Effect> {
        if self.phase == Phase::Stopped {
            return Vec::new();
        }
        let Some(active) = &self.active else {
            debug!("Dropping '{}': nothing active", text);
            return Vec::new();
        };
        if active.generation != generation {
            debug!("Dropping '{}' from stale generation {}", text, generation);
            return Vec::new();
        }
        let (Some(owner), Some(grammar)) = (active.owners.get(index), active.grammars.get(index)) else {
            warn!("Result index {} out of range for generation {}", index, generation);
            return Vec::new();
        };

        match *owner {
            Owner::PauseToggle => {
                if confidence < self.settings.command_min_confidence {
                    info!(
                        "Recognized phrase '{}' but ignored because confidence was too low (Confidence: {:.2})",
                        text, confidence
                    );
                    return Vec::new();
                }
                self.paused = !self.paused;
                let mut effects = vec![Effect::PlayCue {
                    paused: self.paused,
                }];
                effects.extend(self.activate_current());
                effects
            }
            Owner::Provider(p) => {
                let threshold = match active.mode {
                    Mode::Dialogue => self.settings.dialogue_min_confidence,
                    Mode::Command => self.settings.command_min_confidence,
                };
                if confidence < threshold {
                    info!(
                        "Recognized phrase '{}' but ignored because confidence was too low (Confidence: {:.2})",
                        text, confidence
                    );
                    return Vec::new();
                }

                let provider = &active.providers[p];
                match provider.resolve(grammar, text) {
                    Some(resolution) => {
                        info!("Recognized phrase '{}' (Confidence: {:.2})", text, confidence);
                        vec![Effect::Emit(Recognition {
                            text: text.to_string(),
                            grammar: grammar.clone(),
                            resolution,
                            mode: active.mode,
                        })]
                    }
                    None => {
                        warn!("{} could not resolve '{}'", provider.name(), grammar.name());
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Terminal. Safe to call repeatedly.
    pub fn stop(&mut self) -> Vec<Effect> {
        if self.phase == Phase::Stopped {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.in_flight() {
            effects.push(Effect::Cancel);
        }
        effects.push(Effect::StopDeviceWatch);
        self.phase = Phase::Stopped;
        self.active = None;
        self.previous = None;
        self.pending_load = None;
        effects
    }
}
