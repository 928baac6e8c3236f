//! Character classification (PC, NPC, Monster, Other).
//!
//! A fixed rule table settles most characters from their name and
//! aggregates. Whatever the rules leave undecided goes to the configured
//! [`SuggestionProvider`]; the heuristic provider answers `Unknown`.

use crate::cleaning::provider::{Classification, SuggestionProvider};
use crate::db::repo::{row_to_character, CHARACTER_SELECT};
use crate::error::Result;
use crate::types::{Character, CharacterType};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

/// Characters committed per transaction.
const COMMIT_EVERY: usize = 100;

/// Names used for map markers and table bookkeeping rather than creatures.
const META_NAMES: &[&str] = &[
    "DM", "dm", "Map", "map", "Environment", "Player 1", "Player 2", "Player 3", "Player 4",
    "Player 5",
];

/// Initiative-tracker codes such as `MA1` or `DLoT1`.
static MONSTER_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2,4}\d+$").expect("valid monster code regex"));

/// Outcome of a classification run.
#[derive(Debug, Default)]
pub struct ClassificationSummary {
    pub examined: usize,
    /// Settled by the rule table
    pub by_rule: usize,
    /// Settled by the provider
    pub by_provider: usize,
    /// Provider calls that failed (stored as `Unknown`, 0.5)
    pub provider_failures: usize,
    /// Characters per assigned label
    pub by_type: BTreeMap<&'static str, usize>,
}

/// Classify a character from the rule table alone.
pub fn rule_classification(character: &Character) -> Option<Classification> {
    let name = character.name.trim();
    let has_class = character
        .most_common_class
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    let has_race = character
        .most_common_race
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    let appearances = character.total_appearances;

    let (character_type, confidence) = if META_NAMES.contains(&name) {
        (CharacterType::Other, 1.0)
    } else if MONSTER_CODE_RE.is_match(name) && name[..2].chars().all(|c| c.is_ascii_uppercase()) {
        (CharacterType::Monster, 0.95)
    } else if name.chars().count() <= 3 && is_all_caps(name) {
        (CharacterType::Monster, 0.85)
    } else if name.contains(' ') && name.chars().any(|c| c.is_ascii_digit()) {
        (CharacterType::Monster, 0.90)
    } else if has_class && has_race {
        let confidence = if appearances > 50 {
            0.90
        } else if appearances > 20 {
            0.80
        } else {
            0.75
        };
        (CharacterType::Pc, confidence)
    } else if has_class && appearances >= 5 {
        (CharacterType::Pc, 0.70)
    } else if !has_class && !has_race && appearances < 10 {
        (CharacterType::Monster, 0.80)
    } else if has_race && !has_class && appearances > 10 {
        (CharacterType::Npc, 0.65)
    } else if appearances >= 3 {
        (CharacterType::Npc, 0.50)
    } else {
        return None;
    };

    Some(Classification {
        character_type,
        confidence,
    })
}

/// At least one cased character and no lowercase ones.
fn is_all_caps(name: &str) -> bool {
    name.chars().any(char::is_uppercase) && !name.chars().any(char::is_lowercase)
}

/// Classify characters and store the label and confidence.
///
/// By default only characters still `Unknown` (or never classified) are
/// visited, most frequent first; `all` revisits everyone.
pub fn classify_characters<F>(
    conn: &mut Connection,
    provider: &dyn SuggestionProvider,
    all: bool,
    mut on_progress: F,
) -> Result<ClassificationSummary>
where
    F: FnMut(usize, usize),
{
    let characters = {
        let filter = if all {
            ""
        } else {
            "WHERE character_type IS NULL OR character_type = 'Unknown'"
        };
        let mut stmt = conn.prepare(&format!(
            "{CHARACTER_SELECT} {filter} ORDER BY total_appearances DESC, character_id"
        ))?;
        let rows = stmt
            .query_map([], row_to_character)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let total = characters.len();
    tracing::info!(total, provider = provider.name(), all, "Classifying characters");

    let mut summary = ClassificationSummary::default();
    let mut done = 0;
    for chunk in characters.chunks(COMMIT_EVERY) {
        let tx = conn.transaction()?;
        for character in chunk {
            let classification = match rule_classification(character) {
                Some(c) => {
                    summary.by_rule += 1;
                    c
                }
                None => match provider.classify_character(character) {
                    Ok(c) => {
                        summary.by_provider += 1;
                        c
                    }
                    Err(e) => {
                        tracing::warn!(name = %character.name, error = %e, "Classification failed");
                        summary.provider_failures += 1;
                        Classification {
                            character_type: CharacterType::Unknown,
                            confidence: 0.5,
                        }
                    }
                },
            };

            tx.execute(
                "UPDATE characters SET character_type = ?2, classification_confidence = ?3
                 WHERE character_id = ?1",
                params![
                    character.character_id,
                    classification.character_type.as_str(),
                    classification.confidence
                ],
            )?;
            *summary
                .by_type
                .entry(classification.character_type.as_str())
                .or_insert(0) += 1;
            summary.examined += 1;

            done += 1;
            on_progress(done, total);
        }
        tx.commit()?;
    }

    tracing::info!(
        examined = summary.examined,
        by_rule = summary.by_rule,
        by_provider = summary.by_provider,
        failures = summary.provider_failures,
        "Classification complete"
    );
    Ok(summary)
}

/// Stored label counts with average confidence, most common first.
pub fn type_distribution(conn: &Connection) -> Result<Vec<(CharacterType, i64, f64)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT COALESCE(character_type, 'Unknown'), COUNT(*), AVG(COALESCE(classification_confidence, 0))
        FROM characters
        GROUP BY COALESCE(character_type, 'Unknown')
        ORDER BY COUNT(*) DESC, 1
        "#,
    )?;
    let rows = stmt
        .query_map([], |row| {
            let label: String = row.get(0)?;
            Ok((CharacterType::parse(&label), row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::provider::tests::MockClient;
    use crate::cleaning::provider::{HeuristicProvider, LlmSuggestionProvider};
    use crate::db::Database;
    use crate::error::Error;

    fn character(name: &str, class: Option<&str>, race: Option<&str>, appearances: i64) -> Character {
        Character {
            character_id: 1,
            name: name.to_string(),
            most_common_class: class.map(ToString::to_string),
            most_common_race: race.map(ToString::to_string),
            controller_id: None,
            first_seen_action_id: None,
            last_seen_action_id: None,
            total_appearances: appearances,
            character_type: CharacterType::Unknown,
            classification_confidence: 0.0,
        }
    }

    fn label(c: &Character) -> Option<(CharacterType, f64)> {
        rule_classification(c).map(|c| (c.character_type, c.confidence))
    }

    #[test]
    fn test_rule_table() {
        use CharacterType::*;

        assert_eq!(label(&character("DM", None, None, 100)), Some((Other, 1.0)));
        assert_eq!(label(&character("Player 3", None, None, 1)), Some((Other, 1.0)));
        assert_eq!(label(&character("MA1", None, None, 1)), Some((Monster, 0.95)));
        assert_eq!(label(&character("DLoT1", None, None, 1)), Some((Monster, 0.95)));
        assert_eq!(label(&character("GO", None, None, 30)), Some((Monster, 0.85)));
        assert_eq!(label(&character("Goblin 2", Some("Fighter"), Some("Goblin"), 60)), Some((Monster, 0.90)));
        assert_eq!(label(&character("Zariel", Some("Paladin"), Some("Tiefling"), 51)), Some((Pc, 0.90)));
        assert_eq!(label(&character("Zariel", Some("Paladin"), Some("Tiefling"), 21)), Some((Pc, 0.80)));
        assert_eq!(label(&character("Zariel", Some("Paladin"), Some("Tiefling"), 1)), Some((Pc, 0.75)));
        assert_eq!(label(&character("Zariel", Some("Paladin"), None, 5)), Some((Pc, 0.70)));
        assert_eq!(label(&character("Wolf", None, None, 9)), Some((Monster, 0.80)));
        assert_eq!(label(&character("Elminster", None, Some("Human"), 11)), Some((Npc, 0.65)));
        assert_eq!(label(&character("Elminster", None, Some("Human"), 4)), Some((Npc, 0.50)));
        assert_eq!(label(&character("Elminster", Some("Wizard"), None, 2)), None);
    }

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.connection()
            .execute_batch(
                r#"
                INSERT INTO characters (name, most_common_class, most_common_race, total_appearances, character_type)
                VALUES
                    ('Zariel', 'Paladin', 'Tiefling', 60, NULL),
                    ('Elminster', 'Wizard', NULL, 2, 'Unknown'),
                    ('Bram', 'Rogue', 'Human', 30, 'NPC');
                "#,
            )
            .unwrap();
        db
    }

    #[test]
    fn test_classify_unknown_only() {
        let db = seeded_db();
        let mut ticks = 0;
        let summary =
            classify_characters(&mut db.connection(), &HeuristicProvider, false, |_, _| ticks += 1)
                .unwrap();

        assert_eq!(summary.examined, 2);
        assert_eq!(summary.by_rule, 1);
        assert_eq!(summary.by_provider, 1);
        assert_eq!(ticks, 2);

        let zariel = db.get_character(1).unwrap().unwrap();
        assert_eq!(zariel.character_type, CharacterType::Pc);
        assert_eq!(zariel.classification_confidence, 0.90);
        let bram = db.get_character(3).unwrap().unwrap();
        assert_eq!(bram.character_type, CharacterType::Npc);
    }

    #[test]
    fn test_classify_all_with_provider_failure() {
        let db = seeded_db();
        let provider = LlmSuggestionProvider::new(Box::new(MockClient::new(vec![Err(
            Error::Llm("timeout".to_string()),
        )])));
        let summary = classify_characters(&mut db.connection(), &provider, true, |_, _| {}).unwrap();

        assert_eq!(summary.examined, 3);
        assert_eq!(summary.provider_failures, 1);
        let elminster = db.get_character(2).unwrap().unwrap();
        assert_eq!(elminster.character_type, CharacterType::Unknown);
        assert_eq!(elminster.classification_confidence, 0.5);
        let bram = db.get_character(3).unwrap().unwrap();
        assert_eq!(bram.character_type, CharacterType::Pc);
    }

    #[test]
    fn test_type_distribution() {
        let db = seeded_db();
        let distribution = type_distribution(&db.connection()).unwrap();
        assert_eq!(distribution[0].0, CharacterType::Unknown);
        assert_eq!(distribution[0].1, 2);
    }
}
