use super::{Bindings, GrammarProvider, Resolution};
use crate::config::CommandEntry;
use crate::grammar::{CompiledGrammar, GrammarCompiler};
use std::sync::Arc;
use tracing::{error, info};

/// Console commands bound to fixed phrases
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    bindings: Bindings<String>,
}

impl CommandList {
    pub fn new(entries: &[CommandEntry], compiler: &GrammarCompiler) -> Self {
        let mut bindings = Bindings::default();
        for entry in entries {
            let command = entry.command.trim();
            if command.is_empty() {
                info!("Ignoring empty command for phrase '{}'", entry.phrase);
                continue;
            }
            match compiler.compile_phrase(&entry.phrase, false) {
                Ok(grammar) => bindings.push(grammar.with_name(entry.phrase.trim()), command.to_string()),
                Err(e) => error!("❌ Skipping command phrase '{}': {}", entry.phrase, e),
            }
        }
        info!("🎮 Loaded {} console command phrases", bindings.len());
        Self { bindings }
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn command_for(&self, grammar: &CompiledGrammar) -> Option<&str> {
        self.bindings.get(grammar).map(String::as_str)
    }
}

impl GrammarProvider for CommandList {
    fn name(&self) -> &str {
        "commands"
    }

    fn grammars(&self) -> Vec<Arc<CompiledGrammar>> {
        self.bindings.grammars()
    }

    fn resolve(&self, grammar: &CompiledGrammar, _text: &str) -> Option<Resolution> {
        self.command_for(grammar)
            .map(|c| Resolution::Command(c.to_string()))
    }
}
