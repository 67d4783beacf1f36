//! Grammar model
//!
//! Backend-neutral phrase grammars: normalization, optional-phrase expansion,
//! compilation into engine artifacts and matching of recognized text.

pub mod compiler;
pub mod matcher;
pub mod normalizer;
pub mod optional;
pub mod segmenter;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use compiler::{GrammarCompiler, Rule};
pub use normalizer::PhraseNormalizer;
pub use optional::OptionalPhraseExpander;

/// Relaxed matching policy for long phrases such as dialogue lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SubsetMatchingMode {
    /// Strict left-to-right match
    None,
    /// A contiguous run of the phrase words
    Subsequence,
    /// A contiguous run that contains at least one content word
    SubsequenceContentRequired,
    /// Any words of the phrase, relative order preserved
    OrderedSubset,
    /// Ordered subset that contains at least one content word
    #[default]
    OrderedSubsetContentRequired,
}

impl SubsetMatchingMode {
    pub fn is_enabled(self) -> bool {
        self != SubsetMatchingMode::None
    }

    /// Matched words must form one contiguous run
    pub fn is_contiguous(self) -> bool {
        matches!(
            self,
            SubsetMatchingMode::Subsequence | SubsetMatchingMode::SubsequenceContentRequired
        )
    }

    pub fn requires_content(self) -> bool {
        matches!(
            self,
            SubsetMatchingMode::SubsequenceContentRequired
                | SubsetMatchingMode::OrderedSubsetContentRequired
        )
    }
}

/// One position in a grammar: a set of word alternatives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrammarSegment {
    alternatives: Vec<String>,
    pub optional: bool,
    pub subset_matchable: bool,
}

impl GrammarSegment {
    /// Build a segment; blank alternatives are dropped and duplicates removed.
    /// Returns `None` when nothing is left.
    pub fn new<I, S>(alternatives: I, optional: bool, subset_matchable: bool) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut alts: Vec<String> = Vec::new();
        for alt in alternatives {
            let alt = alt.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
            if !alt.is_empty() && !alts.contains(&alt) {
                alts.push(alt);
            }
        }
        if alts.is_empty() {
            return None;
        }
        Some(Self {
            alternatives: alts,
            optional,
            subset_matchable,
        })
    }

    pub fn literal(text: &str) -> Option<Self> {
        Self::new([text], false, false)
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }
}

/// Ordered list of segments describing one recognizable phrase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GrammarModel {
    segments: Vec<GrammarSegment>,
}

impl GrammarModel {
    pub fn new(segments: Vec<GrammarSegment>) -> Self {
        Self { segments }
    }

    pub fn push(&mut self, segment: GrammarSegment) {
        self.segments.push(segment);
    }

    pub fn extend(&mut self, segments: impl IntoIterator<Item = GrammarSegment>) {
        self.segments.extend(segments);
    }

    pub fn segments(&self) -> &[GrammarSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Readable form, used as the default grammar name
    pub fn display_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| {
                let words = if s.alternatives.len() > 1 {
                    format!("({})", s.alternatives.join("|"))
                } else {
                    s.alternatives[0].clone()
                };
                if s.optional {
                    format!("[{}]", words)
                } else {
                    words
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Process-unique identity of a compiled grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrammarId(u64);

impl GrammarId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        GrammarId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// A grammar ready to be loaded into a backend
#[derive(Debug)]
pub struct CompiledGrammar {
    id: GrammarId,
    name: String,
    model: Arc<GrammarModel>,
    rule: Rule,
    jsgf: String,
}

impl CompiledGrammar {
    pub(crate) fn new(name: String, model: Arc<GrammarModel>, rule: Rule, jsgf: String) -> Self {
        Self {
            id: GrammarId::next(),
            name,
            model,
            rule,
            jsgf,
        }
    }

    pub fn id(&self) -> GrammarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn model(&self) -> &Arc<GrammarModel> {
        &self.model
    }

    /// Rule tree for in-process engines
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// JSGF-style sentence for the external recognizer
    pub fn jsgf(&self) -> &str {
        &self.jsgf
    }
}
