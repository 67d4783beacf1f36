//! Match recognized text against compiled rule trees.
//!
//! A strict match scores 1.0. Subset rules may skip words; the score is then
//! the fraction of rule words the text covered.

use super::{CompiledGrammar, Rule, SubsetMatchingMode};
use crate::config::Config;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// A partial match: (next token position, words covered, words accounted for)
type Outcome = (usize, usize, usize);

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    filler: HashSet<String>,
}

impl Matcher {
    pub fn new<I, S>(filler_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            filler: filler_words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.filler_words)
    }

    fn is_content(&self, word: &str) -> bool {
        !self.filler.contains(word)
    }

    /// `None` when the tokens are not accepted by the rule
    pub fn score(&self, rule: &Rule, tokens: &[String]) -> Option<f32> {
        if tokens.is_empty() {
            return None;
        }
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        self.walk(rule, &tokens, 0)
            .into_iter()
            .filter(|(end, _, total)| *end == tokens.len() && *total > 0)
            .map(|(_, covered, total)| covered as f32 / total as f32)
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
    }

    /// Index and score of the best grammar for `text`. Ties go to the lowest index.
    pub fn best_match(&self, grammars: &[Arc<CompiledGrammar>], text: &str) -> Option<(usize, f32)> {
        let tokens = tokenize(text);
        let mut best: Option<(usize, f32)> = None;
        for (index, grammar) in grammars.iter().enumerate() {
            if let Some(score) = self.score(grammar.rule(), &tokens) {
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((index, score));
                }
            }
        }
        best
    }

    fn walk(&self, rule: &Rule, tokens: &[String], pos: usize) -> BTreeSet<Outcome> {
        let mut out = BTreeSet::new();
        match rule {
            Rule::Text(words) => {
                let end = pos + words.len();
                if end <= tokens.len()
                    && words
                        .iter()
                        .zip(&tokens[pos..end])
                        .all(|(w, t)| w.to_lowercase() == *t)
                {
                    out.insert((end, words.len(), words.len()));
                }
            }
            Rule::Choice(alts) => {
                for alt in alts {
                    out.extend(self.walk(alt, tokens, pos));
                }
            }
            Rule::Sequence(parts) => {
                let mut acc: BTreeSet<Outcome> = BTreeSet::from([(pos, 0, 0)]);
                for part in parts {
                    let mut next = BTreeSet::new();
                    for (at, covered, total) in acc {
                        for (end, c, t) in self.walk(part, tokens, at) {
                            next.insert((end, covered + c, total + t));
                        }
                    }
                    if next.is_empty() {
                        return next;
                    }
                    acc = next;
                }
                out = acc;
            }
            Rule::Repeat { min, max, rule } => {
                let mut acc: BTreeSet<Outcome> = BTreeSet::from([(pos, 0, 0)]);
                for count in 0..=*max {
                    if count >= *min {
                        out.extend(acc.iter().copied());
                    }
                    if count == *max {
                        break;
                    }
                    let mut next = BTreeSet::new();
                    for (at, covered, total) in &acc {
                        for (end, c, t) in self.walk(rule, tokens, *at) {
                            // Zero-width repeats would loop forever
                            if end > *at {
                                next.insert((end, covered + c, total + t));
                            }
                        }
                    }
                    if next.is_empty() {
                        break;
                    }
                    acc = next;
                }
            }
            Rule::Subset { mode, words } => {
                let words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
                out = self.walk_subset(*mode, &words, tokens, pos);
            }
        }
        out
    }

    fn walk_subset(
        &self,
        mode: SubsetMatchingMode,
        words: &[String],
        tokens: &[String],
        pos: usize,
    ) -> BTreeSet<Outcome> {
        let mut out = BTreeSet::new();
        let total = words.len();
        let remaining = tokens.len().saturating_sub(pos);

        for taken in 1..=remaining.min(total) {
            let slice = &tokens[pos..pos + taken];
            let accepted = if !mode.is_enabled() {
                taken == total && slice == words
            } else if mode.is_contiguous() {
                words.windows(taken).any(|w| w == slice)
            } else {
                is_ordered_subset(slice, words)
            };
            if !accepted {
                continue;
            }
            if mode.requires_content() && !slice.iter().any(|w| self.is_content(w)) {
                continue;
            }
            out.insert((pos + taken, taken, total));
        }
        out
    }
}

fn is_ordered_subset(needle: &[String], haystack: &[String]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|n| rest.any(|h| h == n))
}

/// Lowercased whitespace tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}
