//! Recording backend and cue for session tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use voxbind::audio::cue::FeedbackCue;
use voxbind::backend::BackendAdapter;
use voxbind::error::{VoxError, VoxResult};
use voxbind::grammar::CompiledGrammar;

/// What the session asked the backend to do
#[derive(Debug, Default)]
pub struct BackendLog {
    /// (generation, grammar names) per load
    pub loads: Vec<(u64, Vec<String>)>,
    pub starts: usize,
    pub cancels: usize,
    /// Fail every load with this error kind
    pub fail_loads: Option<FailKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Engine,
    Subprocess,
}

impl BackendLog {
    pub fn last_generation(&self) -> Option<u64> {
        self.loads.last().map(|(generation, _)| *generation)
    }
}

/// Backend that records calls and never produces results on its own
pub struct RecordingBackend {
    name: String,
    pub log: Arc<Mutex<BackendLog>>,
    loaded: Option<u64>,
}

impl RecordingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::new(Mutex::new(BackendLog::default())),
            loaded: None,
        }
    }
}

#[async_trait]
impl BackendAdapter for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self, generation: u64, grammars: &[Arc<CompiledGrammar>]) -> VoxResult<()> {
        let fail = {
            let mut log = self.log.lock()?;
            log.loads.push((
                generation,
                grammars.iter().map(|g| g.name().to_string()).collect(),
            ));
            log.fail_loads
        };
        match fail {
            Some(FailKind::Engine) => Err(VoxError::EngineLoad("scripted failure".to_string())),
            Some(FailKind::Subprocess) => Err(VoxError::Subprocess("scripted crash".to_string())),
            None => {
                self.loaded = Some(generation);
                Ok(())
            }
        }
    }

    async fn start(&mut self) -> VoxResult<()> {
        self.log.lock()?.starts += 1;
        Ok(())
    }

    async fn cancel(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.cancels += 1;
        }
    }

    fn loaded_generation(&self) -> Option<u64> {
        self.loaded
    }
}

/// Cue that remembers what it played
#[derive(Debug, Default)]
pub struct RecordingCue {
    pub played: Mutex<Vec<bool>>,
}

impl FeedbackCue for RecordingCue {
    fn play(&self, paused: bool) {
        if let Ok(mut played) = self.played.lock() {
            played.push(paused);
        }
    }
}
