//! voice2json `recognize-intent` output
//!
//! Each stdout line is one JSON object. Lines are parsed once into a
//! [`RecognitionRecord`]; everything downstream works on the enum.

use crate::error::VoxResult;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    intent: Option<RawIntent>,
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionRecord {
    /// Nothing was recognized
    Empty,
    Matched {
        text: String,
        intent: String,
        confidence: f32,
    },
}

impl RecognitionRecord {
    /// Parse one output line. Invalid JSON is an error; a record without
    /// text or intent is `Empty`.
    pub fn parse(line: &str) -> VoxResult<Self> {
        let raw: RawRecord = serde_json::from_str(line)?;
        let text = raw.text.unwrap_or_default();
        let (intent, confidence) = match raw.intent {
            Some(intent) => (
                intent.name.unwrap_or_default(),
                intent.confidence.unwrap_or(0.0),
            ),
            None => (String::new(), 0.0),
        };

        if text.trim().is_empty() || intent.is_empty() {
            return Ok(RecognitionRecord::Empty);
        }
        Ok(RecognitionRecord::Matched {
            text: text.trim().to_string(),
            intent,
            confidence,
        })
    }
}

/// Generation and grammar index carried in an intent name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentTag {
    pub generation: u64,
    pub index: usize,
}

impl IntentTag {
    pub fn new(generation: u64, index: usize) -> Self {
        Self { generation, index }
    }

    /// `<prefix>_<generation>_<index>`
    pub fn encode(&self, prefix: &str) -> String {
        format!("{}_{}_{}", prefix, self.generation, self.index)
    }

    pub fn decode(prefix: &str, intent: &str) -> Option<Self> {
        let rest = intent.strip_prefix(prefix)?.strip_prefix('_')?;
        let (generation, index) = rest.split_once('_')?;
        Some(Self {
            generation: generation.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matched_record() {
        let line = r#"{"text": "装备 黑 檀 弓", "likelihood": 0.05, "tokens": ["装备"], "intent": {"name": "vox_28_3", "confidence": 0.75}, "entities": [], "slots": {}}"#;
        assert_eq!(
            RecognitionRecord::parse(line).unwrap(),
            RecognitionRecord::Matched {
                text: "装备 黑 檀 弓".to_string(),
                intent: "vox_28_3".to_string(),
                confidence: 0.75,
            }
        );
    }

    #[test]
    fn test_parse_empty_record() {
        let line = r#"{"text": "", "intent": {"name": "", "confidence": 0}, "speech_confidence": null}"#;
        assert_eq!(RecognitionRecord::parse(line).unwrap(), RecognitionRecord::Empty);
        assert_eq!(RecognitionRecord::parse("{}").unwrap(), RecognitionRecord::Empty);
    }

    #[test]
    fn test_parse_garbled_record() {
        assert!(RecognitionRecord::parse("Loading profile...").is_err());
        assert!(RecognitionRecord::parse(r#"{"text": 5}"#).is_err());
    }

    #[test]
    fn test_intent_tag() {
        let tag = IntentTag::new(12, 4);
        assert_eq!(tag.encode("vox"), "vox_12_4");
        assert_eq!(IntentTag::decode("vox", "vox_12_4"), Some(tag));
        assert_eq!(IntentTag::decode("vox", "dsn_12_4"), None);
        assert_eq!(IntentTag::decode("vox", "vox_12"), None);
        assert_eq!(IntentTag::decode("vox", "vox_12_4_1"), None);
        assert_eq!(IntentTag::decode("vox", "voxel_1_2"), None);
    }
}
