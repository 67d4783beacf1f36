//! Recognition session
//!
//! [`SessionMachine`] decides, the actor here carries out its effects:
//! - commands from the host arrive over a [`SessionHandle`]
//! - a backend worker task owns the recognizers and runs loads one at a time
//! - device watching runs on child tasks of the session's cancellation token

pub mod machine;

pub use machine::{
    Effect, LoadFailure, Mode, Phase, Recognition, SessionMachine, SessionSettings,
    SessionSnapshot,
};

use crate::audio::cue::{FeedbackCue, LogCue};
use crate::audio::AudioInput;
use crate::backend::{BackendEvent, Backends, EventReceiver};
use crate::config::Config;
use crate::device::{self, DeviceEvent};
use crate::error::{VoxError, VoxResult};
use crate::grammar::{CompiledGrammar, GrammarCompiler};
use crate::provider::GrammarProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl SessionSettings {
    /// Thresholds from config, pause and resume phrases compiled strict
    pub fn from_config(config: &Config, compiler: &GrammarCompiler) -> Self {
        let compile = |phrases: &[String]| -> Vec<Arc<CompiledGrammar>> {
            Config::phrases(phrases)
                .iter()
                .filter_map(|p| match compiler.compile_phrase(p, false) {
                    Ok(g) => Some(Arc::new(g)),
                    Err(e) => {
                        error!("❌ Failed to create grammar for '{}': {}", p, e);
                        None
                    }
                })
                .collect()
        };

        Self {
            dialogue_min_confidence: config.dialogue_min_confidence,
            command_min_confidence: config.command_min_confidence,
            pause: compile(&config.pause_phrases),
            resume: compile(&config.resume_phrases),
            fallback_available: config.fallback_engine.is_some(),
        }
    }
}

enum SessionCommand {
    Activate {
        mode: Mode,
        providers: Vec<Arc<dyn GrammarProvider>>,
    },
    Device(DeviceEvent),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Stop,
}

/// Cloneable control surface of a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> VoxResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VoxError::SessionClosed)
    }

    /// Replace the active grammar set with the given providers
    pub fn activate(&self, mode: Mode, providers: Vec<Arc<dyn GrammarProvider>>) -> VoxResult<()> {
        self.send(SessionCommand::Activate { mode, providers })
    }

    pub fn device_lost(&self) -> VoxResult<()> {
        self.send(SessionCommand::Device(DeviceEvent::Lost))
    }

    pub fn device_restored(&self) -> VoxResult<()> {
        self.send(SessionCommand::Device(DeviceEvent::Restored))
    }

    /// Stop the session. Stopping a stopped session is a no-op.
    pub fn stop(&self) {
        let _ = self.commands.send(SessionCommand::Stop);
    }

    pub async fn snapshot(&self) -> VoxResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await.map_err(|_| VoxError::SessionClosed)
    }
}

/// Accepted recognitions, in order
pub type RecognitionReceiver = mpsc::UnboundedReceiver<Recognition>;

enum BackendOp {
    Cancel,
    Load {
        generation: u64,
        grammars: Vec<Arc<CompiledGrammar>>,
        token: CancellationToken,
    },
    Restart {
        generation: u64,
        token: CancellationToken,
    },
    Fallback,
    Shutdown,
}

#[derive(Debug)]
struct LoadReport {
    generation: u64,
    result: Result<(), LoadFailure>,
    /// Generation the backend still holds
    retained: Option<u64>,
    fell_back: bool,
}

/// Owns the backends so loads and cancels never interleave
struct BackendWorker {
    backends: Backends,
    reports: mpsc::UnboundedSender<LoadReport>,
}

impl BackendWorker {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<BackendOp>) {
        while let Some(op) = ops.recv().await {
            match op {
                BackendOp::Cancel => self.backends.cancel().await,
                BackendOp::Load {
                    generation,
                    grammars,
                    token,
                } => self.load(generation, grammars, token).await,
                BackendOp::Restart { generation, token } => {
                    if token.is_cancelled() {
                        continue;
                    }
                    let result = self.backends.current_mut().start().await;
                    self.report(generation, result, false);
                }
                BackendOp::Fallback => {
                    self.backends.switch_to_fallback().await;
                }
                BackendOp::Shutdown => break,
            }
        }
        self.backends.cancel().await;
        debug!("Backend worker stopped");
    }

    async fn load(
        &mut self,
        generation: u64,
        grammars: Vec<Arc<CompiledGrammar>>,
        token: CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        let outcome = tokio::select! {
            () = token.cancelled() => None,
            result = self.backends.load_and_start(generation, &grammars) => Some(result),
        };

        let result = match outcome {
            None => {
                debug!("Load of generation {} cancelled", generation);
                self.backends.cancel().await;
                return;
            }
            Some(result) => result,
        };

        let subprocess_failed = matches!(&result, Err(e) if e.is_subprocess_failure());
        if !subprocess_failed || !self.backends.switch_to_fallback().await {
            self.report(generation, result, false);
            return;
        }

        if let Err(e) = &result {
            warn!("⚠️ {}", e);
        }
        let retry = tokio::select! {
            () = token.cancelled() => None,
            result = self.backends.load_and_start(generation, &grammars) => Some(result),
        };
        match retry {
            None => self.backends.cancel().await,
            Some(result) => self.report(generation, result, true),
        }
    }

    fn report(&self, generation: u64, result: VoxResult<()>, fell_back: bool) {
        let _ = self.reports.send(LoadReport {
            generation,
            result: result.map_err(|e| LoadFailure::from(&e)),
            retained: self.backends.current().loaded_generation(),
            fell_back,
        });
    }
}

/// A recognition session waiting to be spawned
pub struct RecognitionSession {
    machine: SessionMachine,
    backends: Backends,
    events: EventReceiver,
    input: Arc<dyn AudioInput>,
    cue: Arc<dyn FeedbackCue>,
    poll_interval: Duration,
}

impl RecognitionSession {
    /// `events` must be the receiving end of the channel the backends were
    /// built with.
    pub fn new(
        mut settings: SessionSettings,
        backends: Backends,
        events: EventReceiver,
        input: Arc<dyn AudioInput>,
    ) -> Self {
        settings.fallback_available = backends.has_fallback();
        Self {
            machine: SessionMachine::new(settings),
            backends,
            events,
            input,
            cue: Arc::new(LogCue),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_cue(mut self, cue: Arc<dyn FeedbackCue>) -> Self {
        self.cue = cue;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start the session. It runs until stopped or every handle is dropped.
    pub fn spawn(self) -> (SessionHandle, RecognitionReceiver, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (recognitions_tx, recognitions_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (device_tx, device_rx) = mpsc::unbounded_channel();

        let worker = BackendWorker {
            backends: self.backends,
            reports: reports_tx,
        };
        let worker = tokio::spawn(worker.run(ops_rx));

        let actor = SessionActor {
            machine: self.machine,
            input: self.input,
            cue: self.cue,
            poll_interval: self.poll_interval,
            ops: ops_tx,
            recognitions: recognitions_tx,
            device_events: device_tx,
            root: CancellationToken::new(),
            load_token: None,
            wait_token: None,
        };
        let handle = tokio::spawn(actor.run(
            commands_rx,
            self.events,
            device_rx,
            reports_rx,
            worker,
        ));

        (
            SessionHandle {
                commands: commands_tx,
            },
            recognitions_rx,
            handle,
        )
    }
}

struct SessionActor {
    machine: SessionMachine,
    input: Arc<dyn AudioInput>,
    cue: Arc<dyn FeedbackCue>,
    poll_interval: Duration,
    ops: mpsc::UnboundedSender<BackendOp>,
    recognitions: mpsc::UnboundedSender<Recognition>,
    device_events: device::DeviceSender,
    root: CancellationToken,
    /// Token of the newest load or restart
    load_token: Option<CancellationToken>,
    wait_token: Option<CancellationToken>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: EventReceiver,
        mut devices: mpsc::UnboundedReceiver<DeviceEvent>,
        mut reports: mpsc::UnboundedReceiver<LoadReport>,
        worker: JoinHandle<()>,
    ) {
        let ready = match self.input.default_device() {
            Some(device) => {
                info!("🎙️ Recording device is ready: {}", device);
                true
            }
            None => false,
        };
        device::spawn_watcher(
            self.input.clone(),
            self.poll_interval,
            self.device_events.clone(),
            self.root.child_token(),
        );
        let effects = self.machine.start(ready);
        self.apply(effects);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All session handles dropped");
                        let effects = self.machine.stop();
                        self.apply(effects);
                        break;
                    };
                    self.handle_command(command);
                }
                Some(event) = events.recv() => {
                    let effects = match event {
                        BackendEvent::Recognized { generation, index, text, confidence } => {
                            self.machine.on_result(generation, index, &text, confidence)
                        }
                        BackendEvent::Failed { generation, error } => {
                            self.machine.on_backend_failed(generation, &error)
                        }
                    };
                    self.apply(effects);
                }
                Some(event) = devices.recv() => {
                    let effects = self.device_event(event);
                    self.apply(effects);
                }
                Some(report) = reports.recv() => {
                    if report.fell_back {
                        self.machine.on_fallback_engaged();
                    }
                    let effects = self.machine.on_load_finished(
                        report.generation,
                        report.result,
                        report.retained,
                    );
                    self.apply(effects);
                }
            }

            if self.machine.phase() == Phase::Stopped {
                break;
            }
        }

        let _ = self.ops.send(BackendOp::Shutdown);
        if let Err(e) = worker.await {
            warn!("Backend worker ended abnormally: {}", e);
        }
        self.root.cancel();
        info!("🛑 Recognition session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let effects = match command {
            SessionCommand::Activate { mode, providers } => self.machine.activate(mode, providers),
            SessionCommand::Device(event) => self.device_event(event),
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.machine.snapshot());
                Vec::new()
            }
            SessionCommand::Stop => self.machine.stop(),
        };
        self.apply(effects);
    }

    fn device_event(&mut self, event: DeviceEvent) -> Vec<Effect> {
        match event {
            DeviceEvent::Lost => self.machine.on_device_lost(),
            DeviceEvent::Restored => {
                if let Some(token) = self.wait_token.take() {
                    token.cancel();
                }
                self.machine.on_device_restored()
            }
        }
    }

    fn new_load_token(&mut self) -> CancellationToken {
        let token = self.root.child_token();
        self.load_token = Some(token.clone());
        token
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Cancel => {
                    if let Some(token) = self.load_token.take() {
                        token.cancel();
                    }
                    let _ = self.ops.send(BackendOp::Cancel);
                }
                Effect::Load {
                    generation,
                    grammars,
                } => {
                    let token = self.new_load_token();
                    let _ = self.ops.send(BackendOp::Load {
                        generation,
                        grammars,
                        token,
                    });
                }
                Effect::Restart { generation } => {
                    let token = self.new_load_token();
                    let _ = self.ops.send(BackendOp::Restart { generation, token });
                }
                Effect::UseFallback => {
                    let _ = self.ops.send(BackendOp::Fallback);
                }
                Effect::WaitForDevice => {
                    if let Some(token) = self.wait_token.take() {
                        token.cancel();
                    }
                    let token = self.root.child_token();
                    device::spawn_wait_for_device(
                        self.input.clone(),
                        self.poll_interval,
                        self.device_events.clone(),
                        token.clone(),
                    );
                    self.wait_token = Some(token);
                }
                Effect::StopDeviceWatch => self.root.cancel(),
                Effect::PlayCue { paused } => self.cue.play(paused),
                Effect::Emit(recognition) => {
                    if self.recognitions.send(recognition).is_err() {
                        debug!("Nobody is listening for recognitions");
                    }
                }
            }
        }
    }
}
