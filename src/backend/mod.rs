//! Recognition backends
//!
//! Two interchangeable recognizers sit behind [`BackendAdapter`]:
//! - Local: an in-process engine fed from the audio input
//! - Subprocess: the voice2json pipeline, results read from its stdout

pub mod local;
pub mod record;
pub mod subprocess;
#[cfg(feature = "vosk")]
pub mod vosk;

use crate::error::VoxResult;
use crate::grammar::CompiledGrammar;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use local::{EngineResult, LocalAdapter, LocalEngine};
pub use record::{IntentTag, RecognitionRecord};
pub use subprocess::SubprocessAdapter;

/// Raw output of a backend, before the session validates it
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A grammar of `generation` matched with the given confidence
    Recognized {
        generation: u64,
        index: usize,
        text: String,
        confidence: f32,
    },
    /// The recognizer died while serving `generation`
    Failed { generation: u64, error: String },
}

pub type EventSender = mpsc::UnboundedSender<BackendEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BackendEvent>;

#[async_trait]
pub trait BackendAdapter: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Replace the loaded grammar set. On failure the previous set stays loaded.
    async fn load(&mut self, generation: u64, grammars: &[Arc<CompiledGrammar>]) -> VoxResult<()>;

    /// Begin recognizing against the loaded set
    async fn start(&mut self) -> VoxResult<()>;

    /// Stop recognizing and release the audio input. Idempotent.
    async fn cancel(&mut self);

    /// Generation of the grammar set currently loaded, if any
    fn loaded_generation(&self) -> Option<u64>;
}

/// The primary backend plus an optional fallback, owned by the load task
pub struct Backends {
    primary: Box<dyn BackendAdapter>,
    fallback: Option<Box<dyn BackendAdapter>>,
    using_fallback: bool,
}

impl Backends {
    pub fn new(primary: Box<dyn BackendAdapter>, fallback: Option<Box<dyn BackendAdapter>>) -> Self {
        Self {
            primary,
            fallback,
            using_fallback: false,
        }
    }

    pub fn current(&self) -> &dyn BackendAdapter {
        match (&self.fallback, self.using_fallback) {
            (Some(fallback), true) => fallback.as_ref(),
            _ => self.primary.as_ref(),
        }
    }

    pub fn current_mut(&mut self) -> &mut dyn BackendAdapter {
        match (&mut self.fallback, self.using_fallback) {
            (Some(fallback), true) => fallback.as_mut(),
            _ => self.primary.as_mut(),
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Cancel the current backend and make the fallback current.
    /// Returns false when there is nothing to fall back to.
    pub async fn switch_to_fallback(&mut self) -> bool {
        if self.using_fallback || self.fallback.is_none() {
            return false;
        }
        self.primary.cancel().await;
        self.using_fallback = true;
        let name = self.current().name().to_string();
        warn!("🔁 Switching recognizer backend to {}", name);
        true
    }

    /// Load and start in one step
    pub async fn load_and_start(
        &mut self,
        generation: u64,
        grammars: &[Arc<CompiledGrammar>],
    ) -> VoxResult<()> {
        let backend = self.current_mut();
        backend.load(generation, grammars).await?;
        backend.start().await?;
        info!(
            "🎙️ {} recognizing generation {} ({} phrases)",
            backend.name(),
            generation,
            grammars.len()
        );
        Ok(())
    }

    pub async fn cancel(&mut self) {
        self.current_mut().cancel().await;
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("current", &self.current().name())
            .field("using_fallback", &self.using_fallback)
            .finish()
    }
}
