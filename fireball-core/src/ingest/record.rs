//! Input record shape.
//!
//! One record per action, as found in the dataset's JSON/JSONL files. Every
//! field is optional; `null` is treated like an absent field.

use serde::{Deserialize, Deserializer};

/// One action record from the dataset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub speaker_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub before_utterances: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub combat_state_before: Vec<Option<CharacterState>>,
    pub current_actor: Option<CharacterState>,
    #[serde(deserialize_with = "string_or_list")]
    pub commands_norm: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub automation_results: Vec<String>,
    pub caster_after: Option<CharacterState>,
    #[serde(deserialize_with = "null_as_default")]
    pub targets_after: Vec<Option<CharacterState>>,
    #[serde(deserialize_with = "null_as_default")]
    pub combat_state_after: Vec<Option<CharacterState>>,
    #[serde(deserialize_with = "null_as_default")]
    pub after_utterances: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub utterance_history: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub before_idxs: Vec<i64>,
    pub before_state_idx: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub command_idxs: Vec<i64>,
    pub after_state_idx: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub after_idxs: Vec<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub embed_idxs: Vec<i64>,
}

/// A character's state as rendered by the game bot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CharacterState {
    pub name: Option<String>,
    pub hp: Option<String>,
    pub class: Option<String>,
    pub race: Option<String>,
    pub attacks: Option<String>,
    pub spells: Option<String>,
    pub actions: Option<String>,
    pub effects: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub controller_id: Option<String>,
}

impl CharacterState {
    /// Trimmed, non-empty display name.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a single string, a list of strings, or null.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<Option<String>>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(items)) => items.into_iter().flatten().collect(),
    })
}

/// Discord ids arrive as strings or integers; store them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Unsigned(u64),
        Float(f64),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        None => None,
        Some(Id::Text(s)) => Some(s).filter(|s| !s.trim().is_empty()),
        Some(Id::Int(n)) => Some(n.to_string()),
        Some(Id::Unsigned(n)) => Some(n.to_string()),
        Some(Id::Float(n)) => Some(format!("{n}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_record() {
        let json = r#"{
            "speaker_id": 123456789012345678,
            "before_utterances": ["I cast fireball!"],
            "combat_state_before": [{"name": "Zariel", "hp": "<40/40 HP; Healthy>"}],
            "current_actor": {"name": "Zariel", "class": "Paladin 5", "controller_id": "42"},
            "commands_norm": ["!cast fireball -t goblin"],
            "automation_results": ["goblin took 12 damage"],
            "caster_after": {},
            "targets_after": [null],
            "combat_state_after": null,
            "before_state_idx": 3,
            "after_state_idx": 4,
            "before_idxs": [1, 2]
        }"#;
        let record: ActionRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.speaker_id.as_deref(), Some("123456789012345678"));
        assert_eq!(record.combat_state_before.len(), 1);
        assert_eq!(
            record.current_actor.as_ref().and_then(|s| s.display_name()),
            Some("Zariel")
        );
        assert_eq!(record.commands_norm, vec!["!cast fireball -t goblin"]);
        assert!(record.caster_after.unwrap().display_name().is_none());
        assert_eq!(record.targets_after.len(), 1);
        assert!(record.targets_after[0].is_none());
        assert!(record.combat_state_after.is_empty());
        assert_eq!(record.before_state_idx, Some(3));
        assert_eq!(record.before_idxs, vec![1, 2]);
    }

    #[test]
    fn test_commands_accept_single_string() {
        let record: ActionRecord =
            serde_json::from_str(r#"{"commands_norm": "!i begin", "automation_results": null}"#)
                .unwrap();
        assert_eq!(record.commands_norm, vec!["!i begin"]);
        assert!(record.automation_results.is_empty());
    }

    #[test]
    fn test_empty_record() {
        let record: ActionRecord = serde_json::from_str("{}").unwrap();
        assert!(record.speaker_id.is_none());
        assert!(record.current_actor.is_none());
        assert!(record.commands_norm.is_empty());
    }
}
