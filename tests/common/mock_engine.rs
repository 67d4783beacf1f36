//! Mock local engine for testing
//!
//! Provides controlled responses for integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use voxbind::backend::{EngineResult, LocalEngine};
use voxbind::error::{VoxError, VoxResult};

/// Engine that answers each audio frame with the next scripted result
pub struct ScriptedEngine {
    /// Results returned one per frame
    script: VecDeque<EngineResult>,
    /// Every phrase list passed to `set_grammar`
    pub grammars: Arc<Mutex<Vec<Vec<String>>>>,
    /// Reject grammars when set
    pub reject_grammar: bool,
}

impl ScriptedEngine {
    pub fn new(script: &[(&str, f32)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(text, confidence)| EngineResult {
                    text: text.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            grammars: Arc::new(Mutex::new(Vec::new())),
            reject_grammar: false,
        }
    }
}

impl LocalEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_grammar(&mut self, phrases: &[String]) -> VoxResult<()> {
        if self.reject_grammar {
            return Err(VoxError::EngineLoad("scripted rejection".to_string()));
        }
        self.grammars.lock()?.push(phrases.to_vec());
        Ok(())
    }

    fn process(&mut self, _samples: &[i16]) -> VoxResult<Option<EngineResult>> {
        Ok(self.script.pop_front())
    }

    fn reset(&mut self) {}
}
