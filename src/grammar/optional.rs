//! Optional phrase expansion
//!
//! `"equip (the) sword"` becomes `equip`, optional `the`, `sword`.

use super::GrammarSegment;
use crate::config::Config;
use crate::error::VoxResult;
use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct OptionalPhraseExpander {
    pattern: Option<Regex>,
}

impl OptionalPhraseExpander {
    /// The first participating capture group of each match is the optional
    /// text; a pattern without groups marks the whole match optional.
    pub fn new(pattern: Option<Regex>) -> Self {
        Self { pattern }
    }

    pub fn from_config(config: &Config) -> VoxResult<Self> {
        if config.optional_expression.is_empty() {
            return Ok(Self::new(None));
        }
        Ok(Self::new(Some(Regex::new(&config.optional_expression)?)))
    }

    /// Split into ordered segments. `subset_matchable` applies to mandatory
    /// segments only.
    pub fn expand(&self, text: &str, subset_matchable: bool) -> Vec<GrammarSegment> {
        let Some(pattern) = &self.pattern else {
            return GrammarSegment::new([text], false, subset_matchable)
                .into_iter()
                .collect();
        };

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            segments.extend(GrammarSegment::new(
                [&text[last..whole.start()]],
                false,
                subset_matchable,
            ));

            let inner = caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str())
                .unwrap_or_else(|| whole.as_str());
            segments.extend(GrammarSegment::new([inner], true, false));
            last = whole.end();
        }
        segments.extend(GrammarSegment::new([&text[last..]], false, subset_matchable));
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> OptionalPhraseExpander {
        OptionalPhraseExpander::from_config(&Config::default()).unwrap()
    }

    fn describe(segments: &[GrammarSegment]) -> Vec<(String, bool)> {
        segments
            .iter()
            .map(|s| (s.alternatives()[0].clone(), s.optional))
            .collect()
    }

    #[test]
    fn test_expand_parentheses() {
        let segs = expander().expand("equip (the) sword", false);
        assert_eq!(
            describe(&segs),
            vec![
                ("equip".to_string(), false),
                ("the".to_string(), true),
                ("sword".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_expand_all_bracket_kinds() {
        let segs = expander().expand("a [b] {c} <d> （e） 【f】 g", false);
        let optional: Vec<_> = describe(&segs)
            .into_iter()
            .filter(|(_, opt)| *opt)
            .map(|(w, _)| w)
            .collect();
        assert_eq!(optional, vec!["b", "c", "d", "e", "f"]);
        assert_eq!(segs.first().unwrap().alternatives()[0], "a");
        assert_eq!(segs.last().unwrap().alternatives()[0], "g");
    }

    #[test]
    fn test_expand_drops_empty_segments() {
        let segs = expander().expand("(please) ()  open map", false);
        assert_eq!(
            describe(&segs),
            vec![("please".to_string(), true), ("open map".to_string(), false)]
        );
    }

    #[test]
    fn test_expand_without_pattern_is_single_segment() {
        let segs = OptionalPhraseExpander::default().expand("equip (the) sword", true);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].alternatives()[0], "equip (the) sword");
        assert!(!segs[0].optional);
        assert!(segs[0].subset_matchable);
    }

    #[test]
    fn test_subset_flag_only_on_mandatory() {
        let segs = expander().expand("I will (gladly) help you", true);
        assert!(segs[0].subset_matchable);
        assert!(!segs[1].subset_matchable);
        assert!(segs[2].subset_matchable);
    }

    #[test]
    fn test_pattern_without_groups() {
        let exp = OptionalPhraseExpander::new(Some(Regex::new(r"~\w+").unwrap()));
        let segs = exp.expand("open ~now map", false);
        assert_eq!(
            describe(&segs),
            vec![
                ("open".to_string(), false),
                ("~now".to_string(), true),
                ("map".to_string(), false),
            ]
        );
    }
}
