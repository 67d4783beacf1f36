//! Grammar compilation
//!
//! Turns a [`GrammarModel`] into the artifacts the backends load: a rule tree
//! for in-process engines and a JSGF-style sentence for voice2json.

use super::normalizer::{clean_blank, PhraseNormalizer};
use super::optional::OptionalPhraseExpander;
use super::{CompiledGrammar, GrammarModel, GrammarSegment, SubsetMatchingMode};
use crate::config::Config;
use crate::error::{VoxError, VoxResult};
use std::sync::Arc;

/// Engine-neutral grammar rule tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Literal words, matched in order
    Text(Vec<String>),
    /// Exactly one alternative
    Choice(Vec<Rule>),
    /// All parts, in order
    Sequence(Vec<Rule>),
    /// Inner rule repeated `min..=max` times
    Repeat { min: u32, max: u32, rule: Box<Rule> },
    /// Relaxed match over the given words
    Subset {
        mode: SubsetMatchingMode,
        words: Vec<String>,
    },
}

impl Rule {
    pub fn text(words: &str) -> Self {
        Rule::Text(words.split_whitespace().map(str::to_string).collect())
    }

    pub fn optional(rule: Rule) -> Self {
        Rule::Repeat {
            min: 0,
            max: 1,
            rule: Box::new(rule),
        }
    }

    /// Every word the rule can produce, first occurrence order
    pub fn vocabulary(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_words(&mut out);
        out
    }

    fn collect_words(&self, out: &mut Vec<String>) {
        match self {
            Rule::Text(words) | Rule::Subset { words, .. } => {
                for w in words {
                    if !out.contains(w) {
                        out.push(w.clone());
                    }
                }
            }
            Rule::Choice(rules) | Rule::Sequence(rules) => {
                rules.iter().for_each(|r| r.collect_words(out))
            }
            Rule::Repeat { rule, .. } => rule.collect_words(out),
        }
    }

    /// Enumerate the sentences a strict match accepts. `None` when the rule
    /// contains subset matching or would produce more than `limit` sentences.
    pub fn phrases(&self, limit: usize) -> Option<Vec<String>> {
        let expanded = self.expand(limit)?;
        Some(
            expanded
                .into_iter()
                .map(|words| words.join(" "))
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    fn expand(&self, limit: usize) -> Option<Vec<Vec<String>>> {
        match self {
            Rule::Text(words) => Some(vec![words.clone()]),
            Rule::Subset { .. } => None,
            Rule::Choice(alts) => {
                let mut out = Vec::new();
                for alt in alts {
                    out.extend(alt.expand(limit)?);
                    if out.len() > limit {
                        return None;
                    }
                }
                Some(out)
            }
            Rule::Sequence(parts) => {
                let mut acc: Vec<Vec<String>> = vec![Vec::new()];
                for part in parts {
                    let tails = part.expand(limit)?;
                    if acc.len() * tails.len() > limit {
                        return None;
                    }
                    acc = acc
                        .iter()
                        .flat_map(|head| {
                            tails.iter().map(move |tail| {
                                let mut words = head.clone();
                                words.extend(tail.iter().cloned());
                                words
                            })
                        })
                        .collect();
                }
                Some(acc)
            }
            Rule::Repeat { min, max, rule } => {
                let once = rule.expand(limit)?;
                let mut out = Vec::new();
                for count in *min..=*max {
                    let mut acc: Vec<Vec<String>> = vec![Vec::new()];
                    for _ in 0..count {
                        acc = acc
                            .iter()
                            .flat_map(|head| {
                                once.iter().map(move |tail| {
                                    let mut words = head.clone();
                                    words.extend(tail.iter().cloned());
                                    words
                                })
                            })
                            .collect();
                        if acc.len() > limit {
                            return None;
                        }
                    }
                    out.extend(acc);
                    if out.len() > limit {
                        return None;
                    }
                }
                Some(out)
            }
        }
    }
}

/// Builds compiled grammars from phrase text or models
#[derive(Debug, Clone)]
pub struct GrammarCompiler {
    normalizer: PhraseNormalizer,
    expander: OptionalPhraseExpander,
    subset_mode: SubsetMatchingMode,
}

impl Default for GrammarCompiler {
    fn default() -> Self {
        Self {
            normalizer: PhraseNormalizer::default(),
            expander: OptionalPhraseExpander::default(),
            subset_mode: SubsetMatchingMode::None,
        }
    }
}

impl GrammarCompiler {
    pub fn new(
        normalizer: PhraseNormalizer,
        expander: OptionalPhraseExpander,
        subset_mode: SubsetMatchingMode,
    ) -> Self {
        Self {
            normalizer,
            expander,
            subset_mode,
        }
    }

    pub fn from_config(config: &Config) -> VoxResult<Self> {
        Ok(Self::new(
            PhraseNormalizer::from_config(config)?,
            OptionalPhraseExpander::from_config(config)?,
            config.subset_matching_mode,
        ))
    }

    pub fn normalizer(&self) -> &PhraseNormalizer {
        &self.normalizer
    }

    /// Configured mode for grammars that allow relaxed matching
    pub fn subset_mode(&self) -> SubsetMatchingMode {
        self.subset_mode
    }

    /// Normalize, expand optional parts and compile one phrase.
    /// `subset` opts the phrase into the configured subset matching mode.
    pub fn compile_phrase(&self, text: &str, subset: bool) -> VoxResult<CompiledGrammar> {
        let normalized = self.normalizer.normalize(text);
        let mode = if subset {
            self.subset_mode
        } else {
            SubsetMatchingMode::None
        };
        let model = GrammarModel::new(self.expander.expand(&normalized, mode.is_enabled()));
        Ok(self.compile(model, mode)?.with_name(normalized))
    }

    /// Compile a model. Segments flagged subset-matchable use `mode`.
    pub fn compile(&self, model: GrammarModel, mode: SubsetMatchingMode) -> VoxResult<CompiledGrammar> {
        if model.is_empty() {
            return Err(VoxError::GrammarBuild("empty phrase".to_string()));
        }

        let mut parts = Vec::with_capacity(model.segments().len());
        let mut sentence = Vec::with_capacity(model.segments().len());
        for segment in model.segments() {
            parts.push(segment_rule(segment, mode)?);
            sentence.push(segment_jsgf(segment));
        }

        let rule = if parts.len() == 1 {
            parts.remove(0)
        } else {
            Rule::Sequence(parts)
        };
        let jsgf = clean_blank(&sentence.join(" "));
        let name = model.display_text();
        Ok(CompiledGrammar::new(name, Arc::new(model), rule, jsgf))
    }
}

fn segment_rule(segment: &GrammarSegment, mode: SubsetMatchingMode) -> VoxResult<Rule> {
    let alts = segment.alternatives();
    if alts.is_empty() {
        return Err(VoxError::GrammarBuild("segment without alternatives".to_string()));
    }

    let subset = segment.subset_matchable && !segment.optional && mode.is_enabled();
    let leaf = |alt: &String| {
        if subset {
            Rule::Subset {
                mode,
                words: alt.split_whitespace().map(str::to_string).collect(),
            }
        } else {
            Rule::text(alt)
        }
    };

    let words = if alts.len() > 1 {
        Rule::Choice(alts.iter().map(leaf).collect())
    } else {
        leaf(&alts[0])
    };

    Ok(if segment.optional {
        Rule::optional(words)
    } else {
        words
    })
}

fn segment_jsgf(segment: &GrammarSegment) -> String {
    let alts = segment.alternatives();
    let words = if alts.len() > 1 {
        format!("( {} )", alts.join(" | "))
    } else {
        alts[0].clone()
    };
    if segment.optional {
        format!("[ {} ]", words)
    } else {
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> GrammarCompiler {
        GrammarCompiler::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_compile_optional_phrase() {
        let g = compiler().compile_phrase("equip (the) sword", false).unwrap();
        assert_eq!(g.jsgf(), "equip [ the ] sword");
        assert_eq!(
            g.rule(),
            &Rule::Sequence(vec![
                Rule::text("equip"),
                Rule::optional(Rule::text("the")),
                Rule::text("sword"),
            ])
        );
        assert_eq!(g.name(), "equip (the) sword");
    }

    #[test]
    fn test_compile_choice_segment() {
        let model = GrammarModel::new(vec![
            GrammarSegment::new(["left", "right"], true, false).unwrap(),
            GrammarSegment::literal("equip").unwrap(),
            GrammarSegment::literal("iron dagger").unwrap(),
        ]);
        let g = compiler().compile(model, SubsetMatchingMode::None).unwrap();
        assert_eq!(g.jsgf(), "[ ( left | right ) ] equip iron dagger");
        assert_eq!(
            g.rule().phrases(16).unwrap(),
            vec![
                "equip iron dagger",
                "left equip iron dagger",
                "right equip iron dagger",
            ]
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let c = compiler();
        let a = c.compile_phrase("I (will) take the {old} map", true).unwrap();
        let b = c.compile_phrase("I (will) take the {old} map", true).unwrap();
        assert_eq!(a.rule(), b.rule());
        assert_eq!(a.jsgf(), b.jsgf());
        assert_eq!(a.model(), b.model());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_subset_rule_only_when_enabled() {
        let c = compiler();
        let g = c.compile_phrase("tell me about the war", true).unwrap();
        assert!(matches!(g.rule(), Rule::Subset { mode, .. }
            if *mode == SubsetMatchingMode::OrderedSubsetContentRequired));
        assert!(g.rule().phrases(8).is_none());

        let strict = c.compile_phrase("tell me about the war", false).unwrap();
        assert_eq!(strict.rule(), &Rule::text("tell me about the war"));
    }

    #[test]
    fn test_empty_phrase_is_grammar_error() {
        let err = compiler().compile_phrase("   ", false).unwrap_err();
        assert!(matches!(err, VoxError::GrammarBuild(_)));
    }

    #[test]
    fn test_phrase_limit() {
        let model = GrammarModel::new(
            (0..6)
                .map(|i| GrammarSegment::new([format!("a{}", i), format!("b{}", i)], false, false).unwrap())
                .collect(),
        );
        let g = compiler().compile(model, SubsetMatchingMode::None).unwrap();
        assert!(g.rule().phrases(32).is_none());
        assert_eq!(g.rule().phrases(64).unwrap().len(), 64);
        assert_eq!(g.rule().vocabulary().len(), 12);
    }
}
