//! Grammar providers
//!
//! Sources of recognizable phrases, each paired with what a recognized phrase
//! means to the host.

pub mod commands;
pub mod dialogue;
pub mod favorites;

use crate::grammar::{CompiledGrammar, GrammarId};
use std::collections::HashMap;
use std::sync::Arc;

pub use commands::CommandList;
pub use dialogue::DialogueList;
pub use favorites::FavoritesList;

/// What a recognized phrase stands for. Opaque to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Console command string
    Command(String),
    /// Equip command, hand digit included
    Equip(String),
    /// Dialogue line; index -2 is a goodbye phrase
    DialogueLine { dialogue_id: i64, index: i32 },
}

pub trait GrammarProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Compiled grammars in load order
    fn grammars(&self) -> Vec<Arc<CompiledGrammar>>;

    /// Resolve a recognized grammar. `None` when the grammar is not ours.
    fn resolve(&self, grammar: &CompiledGrammar, text: &str) -> Option<Resolution>;
}

/// Ordered grammars with per-grammar payload
#[derive(Debug, Clone)]
pub(crate) struct Bindings<T> {
    grammars: Vec<Arc<CompiledGrammar>>,
    by_id: HashMap<GrammarId, T>,
}

impl<T> Default for Bindings<T> {
    fn default() -> Self {
        Self {
            grammars: Vec::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<T> Bindings<T> {
    pub fn push(&mut self, grammar: CompiledGrammar, value: T) {
        self.by_id.insert(grammar.id(), value);
        self.grammars.push(Arc::new(grammar));
    }

    pub fn grammars(&self) -> Vec<Arc<CompiledGrammar>> {
        self.grammars.clone()
    }

    pub fn get(&self, grammar: &CompiledGrammar) -> Option<&T> {
        self.by_id.get(&grammar.id())
    }

    pub fn len(&self) -> usize {
        self.grammars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grammars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<CompiledGrammar>, &T)> {
        self.grammars
            .iter()
            .filter_map(move |g| self.by_id.get(&g.id()).map(|v| (g, v)))
    }
}
