//! Core domain types for fireball
//!
//! These mirror the relational store: named entities (characters, spells,
//! attacks, effects), actions, and the per-action character snapshots.

use serde::{Deserialize, Serialize};

// ============================================
// Named entities
// ============================================

/// Kinds of natural-keyed entities managed by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Character,
    Spell,
    Attack,
    Effect,
}

impl EntityKind {
    /// Table holding this entity.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Character => "characters",
            EntityKind::Spell => "spells",
            EntityKind::Attack => "attacks",
            EntityKind::Effect => "effects",
        }
    }

    /// Primary key column.
    pub fn id_column(&self) -> &'static str {
        match self {
            EntityKind::Character => "character_id",
            EntityKind::Spell => "spell_id",
            EntityKind::Attack => "attack_id",
            EntityKind::Effect => "effect_id",
        }
    }

    /// Natural key column.
    pub fn name_column(&self) -> &'static str {
        match self {
            EntityKind::Character => "name",
            EntityKind::Spell => "spell_name",
            EntityKind::Attack => "attack_name",
            EntityKind::Effect => "effect_name",
        }
    }

    /// Snapshot junction table linking snapshots to this entity.
    ///
    /// Characters are referenced directly by snapshots and have no junction.
    pub fn junction_table(&self) -> Option<&'static str> {
        match self {
            EntityKind::Character => None,
            EntityKind::Spell => Some("character_snapshot_spells"),
            EntityKind::Attack => Some("character_snapshot_attacks"),
            EntityKind::Effect => Some("character_snapshot_effects"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Spell => "spell",
            EntityKind::Attack => "attack",
            EntityKind::Effect => "effect",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Snapshots
// ============================================

/// Role a character plays in the action a snapshot was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Before,
    After,
    CurrentActor,
    Caster,
    Target,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Before => "before",
            SnapshotType::After => "after",
            SnapshotType::CurrentActor => "current_actor",
            SnapshotType::Caster => "caster",
            SnapshotType::Target => "target",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "before" => Some(SnapshotType::Before),
            "after" => Some(SnapshotType::After),
            "current_actor" => Some(SnapshotType::CurrentActor),
            "caster" => Some(SnapshotType::Caster),
            "target" => Some(SnapshotType::Target),
            _ => None,
        }
    }
}

/// A stored character snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub snapshot_id: i64,
    pub action_id: i64,
    pub character_id: i64,
    pub snapshot_type: SnapshotType,
    pub hp_current: Option<i64>,
    pub hp_max: Option<i64>,
    pub hp_percentage: Option<f64>,
    pub health_status: Option<String>,
    pub class_text: Option<String>,
    pub class_primary: Option<String>,
    pub class_level: Option<i64>,
    pub class_archetype: Option<String>,
    pub race: Option<String>,
    pub controller_id: Option<String>,
}

// ============================================
// Characters
// ============================================

/// Classification label for a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterType {
    #[serde(rename = "PC")]
    Pc,
    #[serde(rename = "NPC")]
    Npc,
    Monster,
    Other,
    Unknown,
}

impl CharacterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacterType::Pc => "PC",
            CharacterType::Npc => "NPC",
            CharacterType::Monster => "Monster",
            CharacterType::Other => "Other",
            CharacterType::Unknown => "Unknown",
        }
    }

    /// Parse a stored label. Unrecognized labels map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "PC" => CharacterType::Pc,
            "NPC" => CharacterType::Npc,
            "Monster" => CharacterType::Monster,
            "Other" => CharacterType::Other,
            _ => CharacterType::Unknown,
        }
    }
}

impl std::fmt::Display for CharacterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored character with its derived aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub character_id: i64,
    pub name: String,
    pub most_common_class: Option<String>,
    pub most_common_race: Option<String>,
    pub controller_id: Option<String>,
    pub first_seen_action_id: Option<i64>,
    pub last_seen_action_id: Option<i64>,
    pub total_appearances: i64,
    pub character_type: CharacterType,
    pub classification_confidence: f64,
}

// ============================================
// Actions and facts
// ============================================

/// A stored action row.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_id: i64,
    pub speaker_id: Option<String>,
    pub current_actor_id: Option<i64>,
    pub before_state_idx: Option<i64>,
    pub after_state_idx: Option<i64>,
    /// Commands joined with `" | "` for display.
    pub command_text: Option<String>,
    /// Automation results joined with `" | "` for display.
    pub automation_result: Option<String>,
    /// Original command list (source of truth).
    pub commands: Vec<String>,
    /// Original automation result list (source of truth).
    pub automation_results: Vec<String>,
    pub source_file: Option<String>,
}

/// A spell cast fact derived from a `!cast` command.
#[derive(Debug, Clone, PartialEq)]
pub struct SpellCast {
    pub cast_id: i64,
    pub action_id: i64,
    pub character_id: i64,
    pub spell_id: i64,
    pub damage_dealt: Option<i64>,
    pub target_count: i64,
}

/// A damage event fact derived from automation text.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    pub event_id: i64,
    pub action_id: i64,
    pub attacker_id: Option<i64>,
    pub target_name: String,
    pub damage_amount: i64,
}

/// Load checkpoint for one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFileCheckpoint {
    pub path: String,
    pub content_hash: String,
    pub records_total: i64,
    pub records_loaded: i64,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl SourceFileCheckpoint {
    /// True when every record of the file has been committed.
    pub fn is_complete(&self) -> bool {
        self.records_loaded >= self.records_total
    }
}
