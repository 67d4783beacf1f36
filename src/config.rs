use crate::grammar::SubsetMatchingMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which recognizer backend drives the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// In-process engine (Vosk)
    Local,
    /// External voice2json pipeline
    Voice2json,
}

/// How audio frames are written to the recognizer process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Little-endian 16-bit PCM straight into stdin
    #[default]
    Raw,
    /// One base64 line per frame, for bridges that cannot carry binary
    Base64Lines,
}

/// A console command phrase and the command sent back to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub phrase: String,
    pub command: String,
}

/// Favorites (equip) grammar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoritesConfig {
    pub enabled: bool,
    pub use_equip_hand_prefix: bool,
    /// Leading space keeps "Iron Battleaxe" from matching " Axe"
    pub known_equipment_types: Vec<String>,
    pub equip_left_suffix: Vec<String>,
    pub equip_right_suffix: Vec<String>,
    pub equip_both_suffix: Vec<String>,
    /// An empty entry makes the prefix optional
    pub equip_phrase_prefix: Vec<String>,
    pub main_hand: String,
    /// JSON object mapping in-game item names to spoken names
    pub item_name_map: Option<PathBuf>,
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_equip_hand_prefix: false,
            known_equipment_types: [
                " Dagger",
                " Mace",
                " Sword",
                " Axe",
                " Battleaxe",
                " Greatsword",
                " Warhammer",
                " Bow",
                " Crossbow",
                " Shield",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            equip_left_suffix: vec!["left".to_string()],
            equip_right_suffix: vec!["right".to_string()],
            equip_both_suffix: vec!["both".to_string()],
            equip_phrase_prefix: vec!["equip".to_string()],
            main_hand: "none".to_string(),
            item_name_map: None,
        }
    }
}

/// voice2json pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Voice2JsonConfig {
    pub command: String,
    /// Profile name passed with `-p`; falls back to the locale
    pub profile: Option<String>,
    /// Profile directories that get `sentences.ini` linked to `sentences_path`
    pub profile_dirs: Vec<PathBuf>,
    pub sentences_path: PathBuf,
    /// First-time profile download and training
    pub setup_timeout_secs: u64,
    /// Steady-state grammar swap
    pub train_timeout_secs: u64,
    pub audio_encoding: AudioEncoding,
    /// Intent name prefix used to tag generation and grammar index
    pub intent_prefix: String,
}

impl Default for Voice2JsonConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_default();
        Self {
            command: "voice2json".to_string(),
            profile: None,
            profile_dirs: Vec::new(),
            sentences_path: data_dir.join("voxbind/sentences.ini"),
            setup_timeout_secs: 120,
            train_timeout_secs: 30,
            audio_encoding: AudioEncoding::Raw,
            intent_prefix: "vox".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Engine
    pub engine: EngineKind,
    pub fallback_engine: Option<EngineKind>,
    pub locale: String,
    pub vosk_model_path: String,
    pub input_device: Option<String>,
    pub device_poll_interval_ms: u64,

    // Recognition
    pub dialogue_min_confidence: f32,
    pub command_min_confidence: f32,
    pub log_audio_signal_issues: bool,

    // Phrases
    pub normalize_expression: String,
    pub normalize_replacement: String,
    /// Drop `'` unless it follows a Latin letter ("吉'扎格" breaks some engines)
    pub strip_unattached_quotes: bool,
    pub optional_expression: String,
    pub subset_matching_mode: SubsetMatchingMode,
    pub filler_words: Vec<String>,
    pub segmenter_dictionary: Option<PathBuf>,

    pub pause_phrases: Vec<String>,
    pub resume_phrases: Vec<String>,
    pub goodbye_phrases: Vec<String>,
    pub pause_audio_file: String,
    pub resume_audio_file: String,

    // Providers
    pub dialogue_enabled: bool,
    pub console_commands: Vec<CommandEntry>,
    pub favorites: FavoritesConfig,
    pub voice2json: Voice2JsonConfig,

    // Meta
    pub log_level: String,
}

pub const DEFAULT_NORMALIZE_EXPRESSION: &str = r#"(?:"|\s+)"#;
pub const DEFAULT_OPTIONAL_EXPRESSION: &str =
    r"\(([^)]*)\)|\[([^\]]*)\]|\{([^}]*)\}|<([^>]*)>|（([^）]*)）|【([^】]*)】";

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineKind::Voice2json,
            fallback_engine: None,
            locale: "en-US".to_string(),
            vosk_model_path: dirs::data_dir()
                .unwrap_or_default()
                .join("voxbind/models/vosk-model-small-en-us")
                .to_string_lossy()
                .to_string(),
            input_device: None,
            device_poll_interval_ms: 500,
            dialogue_min_confidence: 0.5,
            command_min_confidence: 0.7,
            log_audio_signal_issues: false,
            normalize_expression: DEFAULT_NORMALIZE_EXPRESSION.to_string(),
            normalize_replacement: " ".to_string(),
            strip_unattached_quotes: true,
            optional_expression: DEFAULT_OPTIONAL_EXPRESSION.to_string(),
            subset_matching_mode: SubsetMatchingMode::OrderedSubsetContentRequired,
            filler_words: ["a", "an", "the", "of", "to", "at", "in", "on", "and", "is", "i"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            segmenter_dictionary: None,
            pause_phrases: Vec::new(),
            resume_phrases: Vec::new(),
            goodbye_phrases: Vec::new(),
            pause_audio_file: String::new(),
            resume_audio_file: String::new(),
            dialogue_enabled: true,
            console_commands: Vec::new(),
            favorites: FavoritesConfig::default(),
            voice2json: Voice2JsonConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from a file, degrading to defaults when it is corrupt
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save config to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Languages written without spaces between words need segmentation
    pub fn needs_segmenter(&self) -> bool {
        let lang = self.locale.to_lowercase();
        lang == "zh" || lang.starts_with("zh-") || lang.starts_with("zh_")
    }

    pub fn voice2json_profile(&self) -> &str {
        self.voice2json.profile.as_deref().unwrap_or(&self.locale)
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms.max(50))
    }

    /// Non-empty, trimmed phrases
    pub fn phrases(list: &[String]) -> Vec<String> {
        list.iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxbind")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dialogue_min_confidence, 0.5);
        assert_eq!(config.command_min_confidence, 0.7);
        assert_eq!(config.device_poll_interval_ms, 500);
        assert_eq!(
            config.subset_matching_mode,
            SubsetMatchingMode::OrderedSubsetContentRequired
        );
        assert!(config.dialogue_enabled);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "engine": "local", "locale": "zh-CN", "subset_matching_mode": "None" }"#;
        let config: Config = serde_json::from_str(json).expect("Failed to parse");
        assert_eq!(config.engine, EngineKind::Local);
        assert!(config.needs_segmenter());
        assert_eq!(config.subset_matching_mode, SubsetMatchingMode::None);
        assert_eq!(config.command_min_confidence, 0.7);
        assert_eq!(config.voice2json_profile(), "zh-CN");
    }

    #[test]
    fn test_config_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let config = Config::load_from(&path).expect("load should degrade");
        assert_eq!(config.locale, "en-US");
        assert!(path.with_extension("json.corrupt").exists());
    }

    #[test]
    fn test_config_save_and_reload() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested/config.json");
        let mut config = Config::default();
        config.console_commands.push(CommandEntry {
            phrase: "open map".to_string(),
            command: "tm".to_string(),
        });
        config.save_to(&path).unwrap();

        let restored = Config::load_from(&path).unwrap();
        assert_eq!(restored.console_commands, config.console_commands);
    }

    #[test]
    fn test_phrases_drops_blank_entries() {
        let list = vec!["  stop listening ".to_string(), "".to_string(), "  ".to_string()];
        assert_eq!(Config::phrases(&list), vec!["stop listening".to_string()]);
    }
}
