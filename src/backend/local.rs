//! In-process recognition
//!
//! The engine only knows phrase lists, so each loaded grammar is flattened to
//! its strict sentences (or its vocabulary for subset rules). Recognized text
//! is attributed back to a grammar with the matcher.

use super::{BackendAdapter, BackendEvent, EventSender};
use crate::audio::{signal_issue, AudioInput, AudioStream};
use crate::error::{VoxError, VoxResult};
use crate::grammar::matcher::Matcher;
use crate::grammar::CompiledGrammar;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sentences enumerated per grammar before falling back to its vocabulary
pub const PHRASE_LIMIT: usize = 256;
/// Out-of-grammar token understood by Vosk-style engines
pub const UNKNOWN_WORD: &str = "[unk]";

/// Final result from an engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub text: String,
    pub confidence: f32,
}

/// Speech engine running in this process
pub trait LocalEngine: Send {
    fn name(&self) -> &str {
        "local"
    }

    /// Restrict recognition to these phrases
    fn set_grammar(&mut self, phrases: &[String]) -> VoxResult<()>;

    /// Feed samples; returns a result when an utterance is final
    fn process(&mut self, samples: &[i16]) -> VoxResult<Option<EngineResult>>;

    /// Drop any partial utterance
    fn reset(&mut self);
}

/// Phrase list for a grammar set, `[unk]` last
pub fn engine_phrases(grammars: &[Arc<CompiledGrammar>], limit: usize) -> Vec<String> {
    let mut phrases: Vec<String> = Vec::new();
    let mut push = |p: String| {
        if !phrases.contains(&p) {
            phrases.push(p);
        }
    };
    for grammar in grammars {
        match grammar.rule().phrases(limit) {
            Some(list) => list.into_iter().for_each(&mut push),
            None => grammar.rule().vocabulary().into_iter().for_each(&mut push),
        }
    }
    push(UNKNOWN_WORD.to_string());
    phrases
}

struct Loaded {
    generation: u64,
    grammars: Vec<Arc<CompiledGrammar>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LocalAdapter {
    engine: Arc<Mutex<Box<dyn LocalEngine>>>,
    name: String,
    input: Arc<dyn AudioInput>,
    events: EventSender,
    matcher: Matcher,
    log_signal_issues: bool,
    loaded: Option<Loaded>,
    worker: Option<Worker>,
}

impl LocalAdapter {
    pub fn new(
        engine: Box<dyn LocalEngine>,
        input: Arc<dyn AudioInput>,
        events: EventSender,
        matcher: Matcher,
    ) -> Self {
        let name = engine.name().to_string();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            name,
            input,
            events,
            matcher,
            log_signal_issues: false,
            loaded: None,
            worker: None,
        }
    }

    pub fn with_signal_logging(mut self, enabled: bool) -> Self {
        self.log_signal_issues = enabled;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.handle.is_finished())
    }
}

#[async_trait]
impl BackendAdapter for LocalAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&mut self, generation: u64, grammars: &[Arc<CompiledGrammar>]) -> VoxResult<()> {
        self.cancel().await;

        let phrases = engine_phrases(grammars, PHRASE_LIMIT);
        debug!("Engine grammar for generation {}: {:?}", generation, phrases);
        {
            let mut engine = self.engine.lock()?;
            engine
                .set_grammar(&phrases)
                .map_err(|e| VoxError::EngineLoad(e.to_string()))?;
        }

        self.loaded = Some(Loaded {
            generation,
            grammars: grammars.to_vec(),
        });
        info!(
            "⚙️ {} loaded generation {} ({} grammars, {} phrases)",
            self.name,
            generation,
            grammars.len(),
            phrases.len()
        );
        Ok(())
    }

    async fn start(&mut self) -> VoxResult<()> {
        let Some(loaded) = &self.loaded else {
            return Err(VoxError::EngineLoad("no grammar loaded".to_string()));
        };
        if self.is_running() {
            return Ok(());
        }

        let stream = self.input.open()?;
        let cancel = CancellationToken::new();
        let job = RecognizeJob {
            engine: self.engine.clone(),
            generation: loaded.generation,
            grammars: loaded.grammars.clone(),
            events: self.events.clone(),
            matcher: self.matcher.clone(),
            log_signal_issues: self.log_signal_issues,
        };
        let handle = tokio::spawn(job.run(stream, cancel.clone()));
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    async fn cancel(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!("Recognition worker ended abnormally: {}", e);
            }
        }
        if let Ok(mut engine) = self.engine.lock() {
            engine.reset();
        }
    }

    fn loaded_generation(&self) -> Option<u64> {
        self.loaded.as_ref().map(|l| l.generation)
    }
}

struct RecognizeJob {
    engine: Arc<Mutex<Box<dyn LocalEngine>>>,
    generation: u64,
    grammars: Vec<Arc<CompiledGrammar>>,
    events: EventSender,
    matcher: Matcher,
    log_signal_issues: bool,
}

impl RecognizeJob {
    async fn run(self, mut stream: AudioStream, cancel: CancellationToken) {
        debug!("Local recognition started for generation {}", self.generation);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = stream.frames.recv() => {
                    let Some(samples) = frame else {
                        warn!("🎙️ Audio input closed");
                        let _ = self.events.send(BackendEvent::Failed {
                            generation: self.generation,
                            error: "audio input closed".to_string(),
                        });
                        break;
                    };
                    if self.log_signal_issues {
                        if let Some(issue) = signal_issue(&samples) {
                            info!("Audio signal problem: {:?}", issue);
                        }
                    }
                    if !self.handle_frame(&samples) {
                        break;
                    }
                }
            }
        }
        debug!("Local recognition stopped for generation {}", self.generation);
    }

    /// Returns false when the session stopped listening
    fn handle_frame(&self, samples: &[i16]) -> bool {
        let result = match self.engine.lock() {
            Ok(mut engine) => engine.process(samples),
            Err(e) => {
                warn!("Engine lock poisoned: {}", e);
                return false;
            }
        };

        let result = match result {
            Ok(Some(result)) => result,
            Ok(None) => return true,
            Err(e) => {
                debug!("Engine error: {}", e);
                return true;
            }
        };

        match self.matcher.best_match(&self.grammars, &result.text) {
            Some((index, score)) => {
                debug!(
                    "'{}' matched grammar {} (score {:.2}, confidence {:.2})",
                    result.text, index, score, result.confidence
                );
                self.events
                    .send(BackendEvent::Recognized {
                        generation: self.generation,
                        index,
                        text: result.text,
                        confidence: result.confidence,
                    })
                    .is_ok()
            }
            None => {
                debug!("'{}' did not match any grammar", result.text);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::grammar::GrammarCompiler;

    #[test]
    fn test_engine_phrases() {
        let c = GrammarCompiler::from_config(&Config::default()).unwrap();
        let grammars = vec![
            Arc::new(c.compile_phrase("equip (the) sword", false).unwrap()),
            Arc::new(c.compile_phrase("draw sword", false).unwrap()),
            Arc::new(c.compile_phrase("tell me about the sword", true).unwrap()),
        ];
        assert_eq!(
            engine_phrases(&grammars, PHRASE_LIMIT),
            vec![
                "equip sword",
                "equip the sword",
                "draw sword",
                "tell",
                "me",
                "about",
                "the",
                "sword",
                "[unk]",
            ]
        );
    }
}
