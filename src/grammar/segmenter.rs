//! Word segmentation for languages written without spaces.
//!
//! Forward maximum matching against the recognizer's dictionary. Runs of CJK
//! ideographs that the dictionary does not know fall back to one token per
//! character, which every engine can pronounce.

use crate::error::VoxResult;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    words: HashSet<String>,
    /// Longest dictionary word, in chars
    max_len: usize,
}

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x20000..=0x2A6DF | 0xF900..=0xFAFF)
}

impl Segmenter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segmenter = Self::default();
        for word in words {
            segmenter.insert(word.into());
        }
        segmenter
    }

    /// Dictionary file: one entry per line, the word is the first field
    /// (separated by space, tab or `(`).
    pub fn from_dictionary_file(path: &Path) -> VoxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let segmenter = Self::new(
            content
                .lines()
                .filter_map(|line| line.split([' ', '\t', '(']).next())
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string),
        );
        info!(
            "📖 Loaded {} segmenter words from {}",
            segmenter.words.len(),
            path.display()
        );
        Ok(segmenter)
    }

    fn insert(&mut self, word: String) {
        self.max_len = self.max_len.max(word.chars().count());
        self.words.insert(word);
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Split text into space separated tokens
    pub fn cut(&self, text: &str) -> String {
        let mut tokens: Vec<String> = Vec::new();
        for chunk in text.split_whitespace() {
            let chars: Vec<char> = chunk.chars().collect();
            let mut i = 0;
            let mut plain = String::new();
            while i < chars.len() {
                if !is_cjk(chars[i]) {
                    plain.push(chars[i]);
                    i += 1;
                    continue;
                }
                if !plain.is_empty() {
                    tokens.push(std::mem::take(&mut plain));
                }
                let len = self.longest_word_at(&chars[i..]);
                tokens.push(chars[i..i + len].iter().collect());
                i += len;
            }
            if !plain.is_empty() {
                tokens.push(plain);
            }
        }
        tokens.join(" ")
    }

    /// Length of the longest known word starting the slice, 1 when none is known
    fn longest_word_at(&self, chars: &[char]) -> usize {
        let upper = self.max_len.min(chars.len());
        for len in (2..=upper).rev() {
            let candidate: String = chars[..len].iter().collect();
            if self.words.contains(&candidate) {
                return len;
            }
        }
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_known_words() {
        let seg = Segmenter::new(["装备", "黑檀"]);
        assert_eq!(seg.cut("装备黑檀弓"), "装备 黑檀 弓");
    }

    #[test]
    fn test_cut_unknown_splits_per_character() {
        let seg = Segmenter::default();
        assert_eq!(seg.cut("火焰风暴"), "火 焰 风 暴");
    }

    #[test]
    fn test_cut_keeps_latin_runs() {
        let seg = Segmenter::new(["装备"]);
        assert_eq!(seg.cut("装备Dwarven弓 bow"), "装备 Dwarven 弓 bow");
    }

    #[test]
    fn test_dictionary_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        std::fs::write(&path, "装备 3 v\n黑檀\t2\n弓箭(n)\n").unwrap();
        let seg = Segmenter::from_dictionary_file(&path).unwrap();
        assert!(seg.contains("装备"));
        assert!(seg.contains("黑檀"));
        assert!(seg.contains("弓箭"));
    }
}
