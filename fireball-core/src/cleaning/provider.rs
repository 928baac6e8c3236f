//! Suggestion providers.
//!
//! A [`SuggestionProvider`] answers three questions: what is the clean name
//! of an attack, is a race value genuine, and what kind of character is
//! this. [`HeuristicProvider`] answers from fixed rules with no network;
//! [`LlmSuggestionProvider`] asks a text-completion endpoint.

use super::client::{create_client, TextCompletion};
use super::{normalize_cleaned, parse_labeled_response};
use crate::config::{Config, ProviderKind};
use crate::error::{Error, Result};
use crate::fields::is_monster_label;
use crate::types::{Character, CharacterType};
use once_cell::sync::Lazy;
use regex::Regex;

/// A cleaned name with confidence (0-100).
#[derive(Debug, Clone, PartialEq)]
pub struct NameSuggestion {
    pub cleaned: Option<String>,
    pub confidence: u8,
    pub reasoning: String,
}

/// Whether a race value is genuine, and what to replace it with if not.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceAssessment {
    pub valid: bool,
    /// Replacement when invalid; `None` clears the value
    pub cleaned: Option<String>,
    pub confidence: u8,
    pub reasoning: String,
}

/// Character classification with confidence in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub character_type: CharacterType,
    pub confidence: f64,
}

/// Source of cleaning and classification suggestions.
pub trait SuggestionProvider {
    /// Short label for logs and summaries.
    fn name(&self) -> &'static str;

    fn clean_attack_name(&self, name: &str) -> Result<NameSuggestion>;

    fn assess_race(&self, character_name: &str, race: &str) -> Result<RaceAssessment>;

    /// Classify a character the rule table in [`crate::classify`] left undecided.
    fn classify_character(&self, character: &Character) -> Result<Classification>;
}

/// Build the provider selected by `cleaning.provider`.
pub fn create_provider(config: &Config) -> Result<Box<dyn SuggestionProvider>> {
    match config.cleaning.provider {
        ProviderKind::Heuristic => Ok(Box::new(HeuristicProvider)),
        ProviderKind::Llm => {
            let llm = config.llm.as_ref().ok_or_else(|| {
                Error::Config("cleaning.provider = \"llm\" requires an [llm] section".to_string())
            })?;
            Ok(Box::new(LlmSuggestionProvider::new(create_client(llm)?)))
        }
    }
}

// ============================================
// Heuristic provider
// ============================================

/// Words that mark a value as a plausible race or creature type.
const RACE_KEYWORDS: &[&str] = &[
    "human", "elf", "dwarf", "halfling", "gnome", "orc", "dragonborn", "tiefling", "aasimar",
    "genasi", "goblin", "hobgoblin", "bugbear", "kobold", "lizardfolk", "tabaxi", "kenku",
    "aarakocra", "tortle", "firbolg", "goliath", "triton", "yuan-ti", "changeling", "shifter",
    "warforged", "kalashtar", "githyanki", "githzerai", "centaur", "minotaur", "satyr", "fairy",
    "harengon", "owlin", "lineage", "reborn", "dhampir", "hexblood", "dragon", "demon", "devil",
    "elemental", "undead", "skeleton", "zombie", "ghost", "vampire", "lich", "werewolf",
    "werebear", "celestial", "angel", "deva", "planetar", "giant", "ogre", "troll", "beholder",
    "mind flayer", "illithid", "aboleth", "kraken", "hydra", "sphinx", "medusa", "gorgon",
    "chimera", "manticore", "wyvern", "drake", "ooze", "slime", "jelly", "slaad", "modron",
    "construct", "golem", "homunculus", "animated", "spirit", "specter", "wraith", "banshee",
    "revenant", "mummy", "ghoul", "wight",
];

static PARENTHETICAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid parenthetical regex"));

static RACE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{8,}$").expect("valid id regex"));

/// Deterministic provider; never fails and never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicProvider;

impl SuggestionProvider for HeuristicProvider {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn clean_attack_name(&self, name: &str) -> Result<NameSuggestion> {
        let original = name.trim();
        let mut cleaned = PARENTHETICAL_RE.replace_all(original, " ").into_owned();

        // "Legendary Action: Blue Dragon Head: Lightning Breath" keeps the last segment
        if let Some(rest) = cleaned.strip_prefix("Legendary Action:") {
            if let Some((_, attack)) = rest.rsplit_once(':') {
                cleaned = format!("Legendary Action: {}", attack.trim());
            }
        }

        if let Some((head, _)) = cleaned.split_once(" - ") {
            cleaned = head.to_string();
        }

        let cleaned = cleaned
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches([':', ';', ',', '-'])
            .trim()
            .to_string();

        Ok(if cleaned.is_empty() {
            NameSuggestion {
                cleaned: None,
                confidence: 0,
                reasoning: "nothing left after removing notes".to_string(),
            }
        } else if cleaned == original {
            NameSuggestion {
                cleaned: Some(cleaned),
                confidence: 50,
                reasoning: "no notes found to remove".to_string(),
            }
        } else {
            NameSuggestion {
                cleaned: Some(cleaned),
                confidence: 85,
                reasoning: "removed parenthetical notes and trailing commentary".to_string(),
            }
        })
    }

    fn assess_race(&self, character_name: &str, race: &str) -> Result<RaceAssessment> {
        let race = race.trim();
        let lower = race.to_lowercase();
        let assessment = |valid: bool, cleaned: Option<&str>, confidence: u8, reasoning: &str| {
            RaceAssessment {
                valid,
                cleaned: cleaned.map(ToString::to_string),
                confidence,
                reasoning: reasoning.to_string(),
            }
        };

        if race.is_empty() {
            return Ok(assessment(false, None, 100, "empty value"));
        }

        if race.eq_ignore_ascii_case(character_name.trim()) {
            return Ok(if is_monster_label(race) {
                assessment(true, Some(race), 95, "creature type doubling as a name")
            } else {
                assessment(false, None, 99, "race repeats the character name")
            });
        }

        if !race.contains(' ')
            && RACE_ID_RE.is_match(race)
            && race.chars().any(|c| c.is_ascii_digit())
        {
            return Ok(assessment(false, None, 99, "opaque identifier"));
        }

        if race.contains(['"', '\'']) {
            return Ok(assessment(false, None, 95, "quoted text looks like a character name"));
        }

        if race.contains('[') {
            let stripped = race.split('[').next().unwrap_or_default().trim();
            if !stripped.is_empty() {
                return Ok(assessment(false, Some(stripped), 85, "removed bracketed note"));
            }
            return Ok(assessment(false, None, 90, "bracketed note only"));
        }

        if race.chars().count() > 40 {
            return Ok(assessment(false, None, 90, "descriptive text, not a race"));
        }

        if RACE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Ok(assessment(true, Some(race), 95, "known race or creature type"));
        }

        let len = race.chars().count();
        let capitalized = race.chars().next().is_some_and(char::is_uppercase);
        if (5..=25).contains(&len)
            && capitalized
            && (race.contains(' ') || race.contains('-') || race.chars().all(char::is_alphabetic))
        {
            return Ok(assessment(true, Some(race), 80, "plausible race name"));
        }

        Ok(assessment(true, Some(race), 50, "uncertain, left unchanged"))
    }

    fn classify_character(&self, _character: &Character) -> Result<Classification> {
        Ok(Classification {
            character_type: CharacterType::Unknown,
            confidence: 0.0,
        })
    }
}

// ============================================
// Text-completion provider
// ============================================

static CLASSIFICATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(npc|pc|monster|other)\b").expect("valid classification regex")
});

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3})\s*%").expect("valid percent regex"));

/// Provider backed by a [`TextCompletion`] endpoint.
pub struct LlmSuggestionProvider {
    client: Box<dyn TextCompletion>,
}

impl LlmSuggestionProvider {
    pub fn new(client: Box<dyn TextCompletion>) -> Self {
        Self { client }
    }
}

impl SuggestionProvider for LlmSuggestionProvider {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn clean_attack_name(&self, name: &str) -> Result<NameSuggestion> {
        let prompt = format!(
            r#"Extract the actual weapon or attack name from this verbose attack name taken from a D&D combat log.

Attack name: "{name}"

Rules:
- Keep only the weapon or attack name ("Longsword", "Staff of Power", "Unarmed Strike").
- Keep modifiers that are part of the weapon ("+1 Longsword", "Flame Tongue").
- Drop player notes, explanations and character names in parentheses.
- For legendary actions keep "Legendary Action: <attack>".

Examples:
"Radiant Mace (Defender Only) (Avenger Celestial Spirit 1)" -> "Radiant Mace"
"Legendary Action: Blue Dragon Head: Lightning Breath" -> "Legendary Action: Lightning Breath"

Respond in exactly this format:
CLEANED: <attack name>
CONFIDENCE: <0-100>
REASON: <short explanation>"#
        );
        let parsed = parse_labeled_response(&self.client.complete(&prompt)?);

        Ok(NameSuggestion {
            cleaned: parsed.cleaned.as_deref().and_then(normalize_cleaned),
            confidence: parsed.confidence,
            reasoning: parsed.reason,
        })
    }

    fn assess_race(&self, character_name: &str, race: &str) -> Result<RaceAssessment> {
        let prompt = format!(
            r#"Decide whether this race field from a D&D combat log is a genuine race or creature type, or corrupt data.

Character name: "{character_name}"
Race value: "{race}"

Genuine: Human, Elf, Fire Genasi, Protector Aasimar, Ancient Red Dragon, Skeleton, Werewolf, Custom Lineage
Corrupt: the character's own name, database ids (wcjc3y2d8z), descriptive text, quoted nicknames

A value equal to the character name is corrupt unless it is a creature type such as "Skeleton".
If the value has a genuine race inside extra notes, suggest that race.

Respond in exactly this format:
STATUS: VALID or CORRUPT
CLEANED: <original value if VALID, cleaned value or NULL if CORRUPT>
CONFIDENCE: <0-100>
REASON: <short explanation>"#
        );
        let parsed = parse_labeled_response(&self.client.complete(&prompt)?);
        let cleaned = parsed.cleaned.as_deref().and_then(normalize_cleaned);
        let valid = match parsed.status.as_deref() {
            Some("VALID") => true,
            Some("CORRUPT") => false,
            _ => cleaned.as_deref() == Some(race.trim()),
        };

        Ok(RaceAssessment {
            valid,
            cleaned: if valid { Some(race.trim().to_string()) } else { cleaned },
            confidence: parsed.confidence,
            reasoning: parsed.reason,
        })
    }

    fn classify_character(&self, character: &Character) -> Result<Classification> {
        let prompt = format!(
            r#"Classify this character from a D&D combat log as one of:
- PC: a player's adventurer, active in many combats
- NPC: a named ally, quest giver or recurring character
- Monster: an enemy, summoned creature or generic opponent
- Other: map markers, DM notes or other non-characters

Name: {}
Class: {}
Race: {}
Appearances: {}

Respond with only the label and a confidence, e.g. "Monster 85%"."#,
            character.name,
            character.most_common_class.as_deref().unwrap_or("Unknown"),
            character.most_common_race.as_deref().unwrap_or("Unknown"),
            character.total_appearances,
        );
        let answer = self.client.complete(&prompt)?;
        parse_classification(&answer)
            .ok_or_else(|| Error::Llm(format!("unrecognized classification: {}", answer.trim())))
    }
}

/// Read a label and optional percentage from a free-form answer.
///
/// Whole-word matching keeps "NPC" from being read as "PC". Without a
/// percentage the confidence is 0.5.
pub fn parse_classification(answer: &str) -> Option<Classification> {
    let label = CLASSIFICATION_RE.captures(answer)?[1].to_ascii_lowercase();
    let character_type = match label.as_str() {
        "pc" => CharacterType::Pc,
        "npc" => CharacterType::Npc,
        "monster" => CharacterType::Monster,
        _ => CharacterType::Other,
    };
    let confidence = PERCENT_RE
        .captures(answer)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map(|p| f64::from(p.min(100)) / 100.0)
        .unwrap_or(0.5);

    Some(Classification {
        character_type,
        confidence,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Completion client returning canned answers in order.
    pub(crate) struct MockClient {
        answers: Mutex<VecDeque<Result<String>>>,
    }

    impl MockClient {
        pub(crate) fn new(answers: Vec<Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
            }
        }
    }

    impl TextCompletion for MockClient {
        fn complete(&self, _prompt: &str) -> Result<String> {
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Llm("no more answers".to_string())))
        }
    }

    fn llm(answers: Vec<Result<String>>) -> LlmSuggestionProvider {
        LlmSuggestionProvider::new(Box::new(MockClient::new(answers)))
    }

    #[test]
    fn test_heuristic_attack_cleaning() {
        let provider = HeuristicProvider;

        let s = provider
            .clean_attack_name("Radiant Mace (Defender Only) (Avenger Celestial Spirit 1)")
            .unwrap();
        assert_eq!(s.cleaned.as_deref(), Some("Radiant Mace"));
        assert_eq!(s.confidence, 85);

        let s = provider
            .clean_attack_name("Legendary Action: Blue Dragon Head: Lightning Breath")
            .unwrap();
        assert_eq!(s.cleaned.as_deref(), Some("Legendary Action: Lightning Breath"));

        let s = provider
            .clean_attack_name("Longsword - use this one when raging against the big guy")
            .unwrap();
        assert_eq!(s.cleaned.as_deref(), Some("Longsword"));

        let s = provider.clean_attack_name("Unarmed Strike").unwrap();
        assert_eq!(s.cleaned.as_deref(), Some("Unarmed Strike"));
        assert_eq!(s.confidence, 50);
    }

    #[test]
    fn test_heuristic_race_assessment() {
        let provider = HeuristicProvider;

        let a = provider.assess_race("Lily", "Lily").unwrap();
        assert!(!a.valid);
        assert_eq!(a.cleaned, None);
        assert_eq!(a.confidence, 99);

        let a = provider.assess_race("Skeleton", "Skeleton").unwrap();
        assert!(a.valid);

        let a = provider.assess_race("Bob", "wcjc3y2d8z").unwrap();
        assert!(!a.valid);
        assert_eq!(a.confidence, 99);

        let a = provider.assess_race("Uturik", "Uturik \"Chinchillen\" Rathen").unwrap();
        assert!(!a.valid);

        let a = provider.assess_race("Nix", "Elf [homebrew notes]").unwrap();
        assert!(!a.valid);
        assert_eq!(a.cleaned.as_deref(), Some("Elf"));

        for race in ["Dragonborn", "Fire Genasi", "Protector Aasimar"] {
            assert!(provider.assess_race("Nix", race).unwrap().valid, "{race}");
        }
    }

    #[test]
    fn test_heuristic_never_classifies() {
        let character = Character {
            character_id: 1,
            name: "Zariel".to_string(),
            most_common_class: None,
            most_common_race: None,
            controller_id: None,
            first_seen_action_id: None,
            last_seen_action_id: None,
            total_appearances: 1,
            character_type: CharacterType::Unknown,
            classification_confidence: 0.0,
        };
        let c = HeuristicProvider.classify_character(&character).unwrap();
        assert_eq!(c.character_type, CharacterType::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_llm_attack_response() {
        let provider = llm(vec![Ok(
            "CLEANED: Staff of Power\nCONFIDENCE: 90%\nREASON: removed note".to_string(),
        )]);
        let s = provider
            .clean_attack_name("2-Handed Because Avrae autorolls Staff of Power extra damage")
            .unwrap();
        assert_eq!(s.cleaned.as_deref(), Some("Staff of Power"));
        assert_eq!(s.confidence, 90);
        assert_eq!(s.reasoning, "removed note");
    }

    #[test]
    fn test_llm_race_response() {
        let provider = llm(vec![
            Ok("STATUS: CORRUPT\nCLEANED: NULL\nCONFIDENCE: 99\nREASON: name".to_string()),
            Ok("STATUS: VALID\nCLEANED: Elf\nCONFIDENCE: 95\nREASON: ok".to_string()),
        ]);

        let a = provider.assess_race("Lily", "Lily").unwrap();
        assert!(!a.valid);
        assert_eq!(a.cleaned, None);

        let a = provider.assess_race("Nix", "Elf").unwrap();
        assert!(a.valid);
        assert_eq!(a.cleaned.as_deref(), Some("Elf"));
    }

    #[test]
    fn test_llm_errors_propagate() {
        let provider = llm(vec![Err(Error::Llm("timeout".to_string()))]);
        assert!(provider.clean_attack_name("Bite").is_err());
    }

    #[test]
    fn test_parse_classification() {
        let c = parse_classification("Classification: NPC (Confidence: 80%)").unwrap();
        assert_eq!(c.character_type, CharacterType::Npc);
        assert!((c.confidence - 0.8).abs() < f64::EPSILON);

        let c = parse_classification("pc").unwrap();
        assert_eq!(c.character_type, CharacterType::Pc);
        assert_eq!(c.confidence, 0.5);

        assert!(parse_classification("no idea").is_none());
    }
}
