//! Phrase normalization
//!
//! Cleans raw phrase text before grammar construction: configured
//! find/replace, quote stripping, optional word segmentation, whitespace folding.

use super::segmenter::Segmenter;
use crate::config::Config;
use crate::error::VoxResult;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

/// Normalizes phrase text. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PhraseNormalizer {
    expression: Option<Regex>,
    replacement: String,
    strip_unattached_quotes: bool,
    segmenter: Option<Arc<Segmenter>>,
}

impl Default for PhraseNormalizer {
    fn default() -> Self {
        Self {
            expression: None,
            replacement: String::new(),
            strip_unattached_quotes: false,
            segmenter: None,
        }
    }
}

impl PhraseNormalizer {
    pub fn new(
        expression: Option<Regex>,
        replacement: &str,
        strip_unattached_quotes: bool,
        segmenter: Option<Arc<Segmenter>>,
    ) -> Self {
        Self {
            expression,
            replacement: replacement.to_string(),
            strip_unattached_quotes,
            segmenter,
        }
    }

    /// Build from configuration. An invalid expression is a configuration error.
    pub fn from_config(config: &Config) -> VoxResult<Self> {
        let expression = if config.normalize_expression.is_empty() {
            None
        } else {
            Some(Regex::new(&config.normalize_expression)?)
        };

        let segmenter = if config.needs_segmenter() {
            let segmenter = match &config.segmenter_dictionary {
                Some(path) => Segmenter::from_dictionary_file(path).unwrap_or_else(|e| {
                    warn!("⚠️ Could not load segmenter dictionary: {}", e);
                    Segmenter::default()
                }),
                None => Segmenter::default(),
            };
            Some(Arc::new(segmenter))
        } else {
            None
        };

        Ok(Self::new(
            expression,
            &config.normalize_replacement,
            config.strip_unattached_quotes,
            segmenter,
        ))
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut phrase = match &self.expression {
            Some(re) => re.replace_all(text, self.replacement.as_str()).into_owned(),
            None => text.to_string(),
        };

        if self.strip_unattached_quotes {
            phrase = strip_unattached_quotes(&phrase);
        }

        if let Some(segmenter) = &self.segmenter {
            phrase = segmenter.cut(&phrase);
        }

        clean_blank(&phrase)
    }

    /// Normalize a list, dropping phrases that end up empty
    pub fn normalize_all<S: AsRef<str>>(&self, phrases: &[S]) -> Vec<String> {
        phrases
            .iter()
            .map(|p| self.normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Collapse whitespace runs to a single space and trim
pub fn clean_blank(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace `'` with a space unless it follows an ASCII letter
fn strip_unattached_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c == '\'' && !prev.is_some_and(|p| p.is_ascii_alphabetic()) {
            out.push(' ');
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_normalizer() -> PhraseNormalizer {
        PhraseNormalizer::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_normalize_whitespace_and_quotes() {
        let n = default_normalizer();
        assert_eq!(n.normalize("  Draw   \"the\"\tsword "), "Draw the sword");
        assert_eq!(n.normalize("Ja'Kar's bow"), "Ja'Kar's bow");
        assert_eq!(n.normalize("'quoted'"), "quoted'");
    }

    #[test]
    fn test_normalize_cjk_quote() {
        let n = default_normalizer();
        assert_eq!(n.normalize("吉'扎格的卷轴"), "吉 扎格的卷轴");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let n = default_normalizer();
        for phrase in [
            "  equip (the)  sword ",
            "\"Fus\" Ro Dah",
            "'' ' a'b ' ",
            "",
            "Lydia's \t 'sword'",
        ] {
            let once = n.normalize(phrase);
            assert_eq!(n.normalize(&once), once, "not idempotent for {:?}", phrase);
        }
    }

    #[test]
    fn test_normalize_with_segmenter_is_idempotent() {
        let mut config = Config::default();
        config.locale = "zh-CN".to_string();
        let n = PhraseNormalizer::from_config(&config).unwrap();
        let once = n.normalize("装备 黑檀弓");
        assert_eq!(once, "装 备 黑 檀 弓");
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn test_normalize_without_expression_only_trims() {
        let n = PhraseNormalizer::default();
        assert_eq!(n.normalize("  a  \"b\" "), "a \"b\"");
    }

    #[test]
    fn test_normalize_all_drops_empty() {
        let n = default_normalizer();
        let out = n.normalize_all(&["hello", "  ", "\"\""][..]);
        assert_eq!(out, vec!["hello".to_string()]);
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        let mut config = Config::default();
        config.normalize_expression = "(unclosed".to_string();
        assert!(PhraseNormalizer::from_config(&config).is_err());
    }
}
