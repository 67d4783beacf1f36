use super::{Bindings, GrammarProvider, Resolution};
use crate::error::{VoxError, VoxResult};
use crate::grammar::{CompiledGrammar, GrammarCompiler};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Index reported when a goodbye phrase ends the conversation
pub const GOODBYE_INDEX: i32 = -2;

/// Dialogue options currently offered by the game
#[derive(Debug, Clone)]
pub struct DialogueList {
    id: i64,
    bindings: Bindings<i32>,
}

impl DialogueList {
    /// Parse `"id|line0|line1…"`. Blank lines keep their index but get no grammar.
    pub fn parse(input: &str, goodbye_phrases: &[String], compiler: &GrammarCompiler) -> VoxResult<Self> {
        let mut tokens = input.split('|');
        let id_token = tokens.next().unwrap_or_default().trim();
        let id: i64 = id_token
            .parse()
            .map_err(|_| VoxError::Protocol(format!("invalid dialogue id '{}'", id_token)))?;
        let lines: Vec<&str> = tokens.collect();
        Ok(Self::new(id, &lines, goodbye_phrases, compiler))
    }

    pub fn new<S: AsRef<str>>(
        id: i64,
        lines: &[S],
        goodbye_phrases: &[String],
        compiler: &GrammarCompiler,
    ) -> Self {
        let mut bindings = Bindings::default();

        for (index, line) in lines.iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            match compiler.compile_phrase(line, true) {
                Ok(grammar) => bindings.push(grammar, index as i32),
                Err(e) => error!("❌ Failed to create grammar for line '{}': {}", line, e),
            }
        }

        for phrase in goodbye_phrases {
            if phrase.trim().is_empty() {
                continue;
            }
            match compiler.compile_phrase(phrase, true) {
                Ok(grammar) => bindings.push(grammar, GOODBYE_INDEX),
                Err(e) => error!("❌ Failed to create goodbye grammar '{}': {}", phrase, e),
            }
        }

        info!("💬 Dialogue {} with {} phrases", id, bindings.len());
        for (grammar, index) in bindings.iter() {
            debug!("Line {}: {}", index, grammar.name());
        }
        Self { id, bindings }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn line_index(&self, grammar: &CompiledGrammar) -> Option<i32> {
        self.bindings.get(grammar).copied()
    }
}

impl GrammarProvider for DialogueList {
    fn name(&self) -> &str {
        "dialogue"
    }

    fn grammars(&self) -> Vec<Arc<CompiledGrammar>> {
        self.bindings.grammars()
    }

    fn resolve(&self, grammar: &CompiledGrammar, _text: &str) -> Option<Resolution> {
        self.line_index(grammar).map(|index| Resolution::DialogueLine {
            dialogue_id: self.id,
            index,
        })
    }
}
