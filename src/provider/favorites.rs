//! Equip grammars built from the player's favorites menu.

use super::{Bindings, GrammarProvider, Resolution};
use crate::config::FavoritesConfig;
use crate::error::{VoxError, VoxResult};
use crate::grammar::{CompiledGrammar, GrammarCompiler, GrammarModel, GrammarSegment, SubsetMatchingMode};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One `name,formId,itemId,singleHanded,typeId` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteItem {
    pub name: String,
    pub form_id: i64,
    pub item_id: i64,
    pub single_handed: bool,
    pub type_id: i32,
}

impl FavoriteItem {
    pub fn parse(entry: &str) -> VoxResult<Self> {
        let fields: Vec<&str> = entry.split(',').collect();
        if fields.len() < 5 {
            return Err(VoxError::Protocol(format!(
                "favorite '{}' has {} fields, expected 5",
                entry,
                fields.len()
            )));
        }
        Ok(Self {
            name: fields[0].to_string(),
            form_id: number(entry, fields[1])?,
            item_id: number(entry, fields[2])?,
            single_handed: number::<i64>(entry, fields[3])? > 0,
            type_id: number(entry, fields[4])?,
        })
    }

    /// Host command without the hand digit
    pub fn command(&self) -> String {
        format!("{};{};{};", self.form_id, self.item_id, self.type_id)
    }
}

fn number<T: std::str::FromStr>(entry: &str, field: &str) -> VoxResult<T> {
    field
        .trim()
        .parse()
        .map_err(|_| VoxError::Protocol(format!("bad number '{}' in '{}'", field, entry)))
}

#[derive(Debug, Clone)]
struct HandWords {
    both: Vec<String>,
    right: Vec<String>,
    left: Vec<String>,
}

impl HandWords {
    fn all(&self) -> Vec<String> {
        self.both
            .iter()
            .chain(&self.right)
            .chain(&self.left)
            .cloned()
            .collect()
    }

    /// Main hand digit: fixed keywords first, then the configured words,
    /// first declared list wins.
    fn main_hand_digit(&self, main_hand: &str) -> &'static str {
        let main_hand = main_hand.trim().to_lowercase();
        match main_hand.as_str() {
            "both" => return "0",
            "right" => return "1",
            "left" => return "2",
            _ => {}
        }
        if self.both.contains(&main_hand) {
            "0"
        } else if self.right.contains(&main_hand) {
            "1"
        } else if self.left.contains(&main_hand) {
            "2"
        } else {
            "0"
        }
    }
}

#[derive(Debug, Clone)]
pub struct FavoritesList {
    enabled: bool,
    hand_prefix: bool,
    equip_prefix: Vec<String>,
    equip_prefix_optional: bool,
    hands: HandWords,
    main_hand_digit: &'static str,
    /// Lowercased, longest first
    equipment_types: Vec<String>,
    item_names: HashMap<String, String>,
    compiler: GrammarCompiler,
    bindings: Bindings<String>,
}

impl FavoritesList {
    pub fn new(config: &FavoritesConfig, compiler: &GrammarCompiler) -> Self {
        let normalizer = compiler.normalizer();
        let words = |list: &[String]| -> Vec<String> {
            normalizer
                .normalize_all(list)
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect()
        };

        let hands = HandWords {
            both: words(&config.equip_both_suffix),
            right: words(&config.equip_right_suffix),
            left: words(&config.equip_left_suffix),
        };

        // An empty configured prefix makes the prefix optional
        let equip_prefix_optional = config
            .equip_phrase_prefix
            .iter()
            .any(|p| normalizer.normalize(p).is_empty());
        let equip_prefix = normalizer.normalize_all(&config.equip_phrase_prefix);

        let mut equipment_types: Vec<String> = config
            .known_equipment_types
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        equipment_types.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        if equipment_types.is_empty() {
            info!("Known equipment types disabled");
        } else {
            debug!("Known equipment types: {:?}", equipment_types);
        }

        let item_names = match &config.item_name_map {
            Some(path) => load_item_name_map(path).unwrap_or_else(|e| {
                warn!("⚠️ Could not load item name map {}: {}", path.display(), e);
                HashMap::new()
            }),
            None => HashMap::new(),
        };

        Self {
            enabled: config.enabled,
            hand_prefix: config.use_equip_hand_prefix,
            equip_prefix,
            equip_prefix_optional,
            main_hand_digit: hands.main_hand_digit(&config.main_hand),
            hands,
            equipment_types,
            item_names,
            compiler: compiler.clone(),
            bindings: Bindings::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Replace the grammars with the items of a `FAVORITES` message.
    /// Malformed entries are skipped.
    pub fn update(&mut self, input: &str) {
        if !self.enabled {
            return;
        }

        self.bindings = Bindings::default();
        let mut seen_types: HashSet<String> = HashSet::new();

        for entry in input.split('|').filter(|e| !e.is_empty()) {
            let item = match FavoriteItem::parse(entry) {
                Ok(item) => item,
                Err(e) => {
                    error!("❌ Failed to parse favorite: {}", e);
                    continue;
                }
            };

            let name = self
                .item_names
                .get(&item.name)
                .cloned()
                .unwrap_or_else(|| item.name.clone());
            let command = item.command();
            self.add_grammar(&name, &command, item.single_handed);

            // The first item of each weapon type also answers to the type name
            if let Some(kind) = self.equipment_type(&name) {
                if seen_types.insert(kind.clone()) {
                    debug!("Equipment type: {} -> {}", name, kind.trim());
                    self.add_grammar(&kind, &command, item.single_handed);
                }
            }
        }

        info!("🗡️ Favorites list has {} phrases", self.bindings.len());
        for (grammar, command) in self.bindings.iter() {
            debug!("Phrase '{}' mapped to equip command '{}'", grammar.name(), command);
        }
    }

    pub fn equipment_type(&self, item_name: &str) -> Option<String> {
        let name = self.compiler.normalizer().normalize(item_name).to_lowercase();
        self.equipment_types
            .iter()
            .find(|kind| name.contains(kind.as_str()))
            .cloned()
    }

    fn add_grammar(&mut self, phrase: &str, command: &str, single_handed: bool) {
        match self.build_grammar(phrase, single_handed) {
            Ok(grammar) => self.bindings.push(grammar, command.to_string()),
            Err(e) => error!("❌ Skipping favorite '{}': {}", phrase, e),
        }
    }

    fn build_grammar(&self, phrase: &str, single_handed: bool) -> VoxResult<CompiledGrammar> {
        let name = self.compiler.normalizer().normalize(phrase);
        let name_segment = GrammarSegment::literal(&name)
            .ok_or_else(|| VoxError::GrammarBuild(format!("empty item name '{}'", phrase)))?;
        let hand = if single_handed {
            GrammarSegment::new(self.hands.all(), true, false)
        } else {
            None
        };

        let mut model = GrammarModel::default();
        if self.hand_prefix {
            model.extend(hand.clone());
        }
        model.extend(GrammarSegment::new(&self.equip_prefix, self.equip_prefix_optional, false));
        model.push(name_segment);
        if !self.hand_prefix {
            model.extend(hand);
        }

        Ok(self
            .compiler
            .compile(model, SubsetMatchingMode::None)?
            .with_name(name))
    }

    /// Hand digit for the recognized text
    fn hand_digit(&self, text: &str) -> &str {
        let text = text.trim().to_lowercase();
        let has = |words: &[String]| {
            words.iter().any(|w| {
                if self.hand_prefix {
                    text.starts_with(w.as_str())
                } else {
                    text.ends_with(w.as_str())
                }
            })
        };
        if has(&self.hands.both) {
            "0"
        } else if has(&self.hands.right) {
            "1"
        } else if has(&self.hands.left) {
            "2"
        } else {
            self.main_hand_digit
        }
    }
}

fn load_item_name_map(path: &Path) -> VoxResult<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl GrammarProvider for FavoritesList {
    fn name(&self) -> &str {
        "favorites"
    }

    fn grammars(&self) -> Vec<Arc<CompiledGrammar>> {
        self.bindings.grammars()
    }

    fn resolve(&self, grammar: &CompiledGrammar, text: &str) -> Option<Resolution> {
        let command = self.bindings.get(grammar)?;
        Some(Resolution::Equip(format!("{}{}", command, self.hand_digit(text))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::grammar::matcher::{tokenize, Matcher};

    fn favorites(config: &FavoritesConfig) -> FavoritesList {
        let compiler = GrammarCompiler::from_config(&Config::default()).unwrap();
        FavoritesList::new(config, &compiler)
    }

    fn grammar_named(list: &FavoritesList, name: &str) -> Arc<CompiledGrammar> {
        list.grammars()
            .into_iter()
            .find(|g| g.name() == name)
            .unwrap_or_else(|| panic!("no grammar named {}", name))
    }

    #[test]
    fn test_parse_item() {
        let item = FavoriteItem::parse("Iron Dagger,123,456,1,7").unwrap();
        assert_eq!(item.name, "Iron Dagger");
        assert!(item.single_handed);
        assert_eq!(item.command(), "123;456;7;");
        assert!(FavoriteItem::parse("Iron Dagger,123").is_err());
        assert!(FavoriteItem::parse("Iron Dagger,x,456,1,7").is_err());
    }

    #[test]
    fn test_parse_rejects_type_id_out_of_range() {
        assert!(FavoriteItem::parse("Iron Dagger,123,456,1,4294967303").is_err());
        assert!(FavoriteItem::parse("Iron Dagger,123,456,1,-2147483649").is_err());
        let item = FavoriteItem::parse("Iron Dagger,123,456,0,2147483647").unwrap();
        assert_eq!(item.type_id, i32::MAX);
        assert!(!item.single_handed);
    }

    #[test]
    fn test_update_adds_type_grammar_for_first_item() {
        let mut list = favorites(&FavoritesConfig::default());
        list.update("Iron Dagger,1,2,1,7|Steel Dagger,3,4,1,7|Daedric Battleaxe,5,6,0,7|broken");

        let names: Vec<String> = list.grammars().iter().map(|g| g.name().to_string()).collect();
        assert_eq!(
            names,
            vec!["Iron Dagger", "dagger", "Steel Dagger", "Daedric Battleaxe", "battleaxe"]
        );

        let dagger = grammar_named(&list, "dagger");
        assert_eq!(
            list.resolve(&dagger, "equip dagger"),
            Some(Resolution::Equip("1;2;7;0".to_string()))
        );
    }

    #[test]
    fn test_hand_suffix_resolution() {
        let mut list = favorites(&FavoritesConfig::default());
        list.update("Iron Dagger,1,2,1,7");
        let g = grammar_named(&list, "Iron Dagger");

        assert_eq!(g.jsgf(), "equip Iron Dagger [ ( both | right | left ) ]");
        assert_eq!(list.resolve(&g, "equip iron dagger left"), Some(Resolution::Equip("1;2;7;2".to_string())));
        assert_eq!(list.resolve(&g, "equip iron dagger right"), Some(Resolution::Equip("1;2;7;1".to_string())));
        assert_eq!(list.resolve(&g, "equip iron dagger"), Some(Resolution::Equip("1;2;7;0".to_string())));
    }

    #[test]
    fn test_hand_prefix_and_optional_equip() {
        let config = FavoritesConfig {
            use_equip_hand_prefix: true,
            equip_phrase_prefix: vec!["equip".to_string(), "".to_string()],
            main_hand: "right".to_string(),
            ..FavoritesConfig::default()
        };
        let mut list = favorites(&config);
        list.update("Hunting Bow,9,8,0,7|Iron Mace,1,2,1,4");

        let bow = grammar_named(&list, "Hunting Bow");
        assert_eq!(bow.jsgf(), "[ equip ] Hunting Bow");
        let mace = grammar_named(&list, "Iron Mace");
        assert_eq!(mace.jsgf(), "[ ( both | right | left ) ] [ equip ] Iron Mace");

        let matcher = Matcher::default();
        assert!(matcher.score(mace.rule(), &tokenize("left iron mace")).is_some());
        assert_eq!(list.resolve(&mace, "left iron mace"), Some(Resolution::Equip("1;2;4;2".to_string())));
        assert_eq!(list.resolve(&mace, "iron mace"), Some(Resolution::Equip("1;2;4;1".to_string())));
    }

    #[test]
    fn test_main_hand_lookup() {
        let hands = HandWords {
            both: vec!["both".to_string(), "twin".to_string()],
            right: vec!["right".to_string(), "twin".to_string()],
            left: vec!["left".to_string(), "off".to_string()],
        };
        assert_eq!(hands.main_hand_digit("left"), "2");
        assert_eq!(hands.main_hand_digit("twin"), "0");
        assert_eq!(hands.main_hand_digit("off"), "2");
        assert_eq!(hands.main_hand_digit("none"), "0");
    }

    #[test]
    fn test_item_name_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item-name-map.json");
        std::fs::write(&path, r#"{ "Bound Bow": "spirit bow" }"#).unwrap();
        let config = FavoritesConfig {
            item_name_map: Some(path),
            ..FavoritesConfig::default()
        };
        let mut list = favorites(&config);
        list.update("Bound Bow,1,1,0,7");
        assert_eq!(list.grammars()[0].name(), "spirit bow");
        assert_eq!(list.grammars()[1].name(), "bow");
    }

    #[test]
    fn test_disabled_list_stays_empty() {
        let config = FavoritesConfig {
            enabled: false,
            ..FavoritesConfig::default()
        };
        let mut list = favorites(&config);
        list.update("Iron Dagger,1,2,1,7");
        assert!(list.is_empty());
        assert!(!list.is_enabled());
    }
}
