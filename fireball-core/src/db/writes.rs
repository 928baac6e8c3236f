//! Insert operations used inside caller-managed transactions.
//!
//! Every function takes a plain `&Connection` so it can run against a
//! `rusqlite::Transaction` (which derefs to `Connection`).

use crate::error::{Error, Result};
use crate::types::{EntityKind, SnapshotType, SourceFileCheckpoint};
use rusqlite::{params, Connection};

/// Separator used for the joined display view of command/result arrays.
pub const DISPLAY_SEPARATOR: &str = " | ";

/// Action row to insert.
#[derive(Debug, Clone, Default)]
pub struct NewAction<'a> {
    pub speaker_id: Option<&'a str>,
    pub current_actor_id: Option<i64>,
    pub before_state_idx: Option<i64>,
    pub after_state_idx: Option<i64>,
    pub commands: &'a [String],
    pub automation_results: &'a [String],
    pub source_file: Option<&'a str>,
}

/// Snapshot row to insert.
#[derive(Debug, Clone)]
pub struct NewSnapshot<'a> {
    pub action_id: i64,
    pub character_id: i64,
    pub snapshot_type: SnapshotType,
    pub hp_current: Option<i64>,
    pub hp_max: Option<i64>,
    pub hp_percentage: Option<f64>,
    pub health_status: Option<&'a str>,
    pub class_text: Option<&'a str>,
    pub class_primary: Option<&'a str>,
    pub class_level: Option<i64>,
    pub class_archetype: Option<&'a str>,
    pub race: Option<&'a str>,
    pub controller_id: Option<&'a str>,
}

/// Join segments for display. An empty array gives an empty string.
pub fn join_display(parts: &[String]) -> String {
    parts.join(DISPLAY_SEPARATOR)
}

/// Insert an action and return its id.
pub fn insert_action(conn: &Connection, action: &NewAction<'_>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO actions (
            speaker_id, current_actor_id, before_state_idx, after_state_idx,
            command_text, automation_result, commands_json, automation_json, source_file
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            action.speaker_id,
            action.current_actor_id,
            action.before_state_idx,
            action.after_state_idx,
            join_display(action.commands),
            join_display(action.automation_results),
            serde_json::to_string(action.commands)?,
            serde_json::to_string(action.automation_results)?,
            action.source_file,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a character snapshot and return its id.
pub fn insert_snapshot(conn: &Connection, snapshot: &NewSnapshot<'_>) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO character_snapshots (
            action_id, character_id, snapshot_type,
            hp_current, hp_max, hp_percentage, health_status,
            class_text, class_primary, class_level, class_archetype,
            race, controller_id
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            snapshot.action_id,
            snapshot.character_id,
            snapshot.snapshot_type.as_str(),
            snapshot.hp_current,
            snapshot.hp_max,
            snapshot.hp_percentage,
            snapshot.health_status,
            snapshot.class_text,
            snapshot.class_primary,
            snapshot.class_level,
            snapshot.class_archetype,
            snapshot.race,
            snapshot.controller_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Link a snapshot to a spell, attack or effect.
///
/// Duplicate pairs are ignored. Returns `true` when a new link was written.
pub fn link_snapshot(
    conn: &Connection,
    kind: EntityKind,
    snapshot_id: i64,
    entity_id: i64,
) -> Result<bool> {
    let junction = kind
        .junction_table()
        .ok_or_else(|| Error::NotFound(format!("no snapshot junction for {kind}")))?;
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {junction} (snapshot_id, {}) VALUES (?1, ?2)",
            kind.id_column()
        ),
        params![snapshot_id, entity_id],
    )?;
    Ok(changed > 0)
}

/// Insert a spell cast fact and return its id.
pub fn insert_spell_cast(
    conn: &Connection,
    action_id: i64,
    character_id: i64,
    spell_id: i64,
    damage_dealt: Option<i64>,
    target_count: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO spell_casts (action_id, character_id, spell_id, damage_dealt, target_count)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![action_id, character_id, spell_id, damage_dealt, target_count],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a damage event fact and return its id.
pub fn insert_damage_event(
    conn: &Connection,
    action_id: i64,
    attacker_id: Option<i64>,
    target_name: &str,
    damage_amount: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO damage_events (action_id, attacker_id, target_name, damage_amount)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![action_id, attacker_id, target_name, damage_amount],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delete every action loaded from `source_file` along with its snapshots,
/// snapshot links, spell casts and damage events.
///
/// Returns the number of actions removed. Entities and characters are left in
/// place; their aggregates are recomputed after the load.
pub fn delete_source_actions(conn: &Connection, source_file: &str) -> Result<usize> {
    const SOURCE_ACTIONS: &str = "SELECT action_id FROM actions WHERE source_file = ?1";

    for junction in [
        "character_snapshot_spells",
        "character_snapshot_attacks",
        "character_snapshot_effects",
    ] {
        conn.execute(
            &format!(
                "DELETE FROM {junction} WHERE snapshot_id IN (
                    SELECT snapshot_id FROM character_snapshots
                    WHERE action_id IN ({SOURCE_ACTIONS}))"
            ),
            [source_file],
        )?;
    }
    for fact in ["character_snapshots", "spell_casts", "damage_events"] {
        conn.execute(
            &format!("DELETE FROM {fact} WHERE action_id IN ({SOURCE_ACTIONS})"),
            [source_file],
        )?;
    }
    let removed = conn.execute("DELETE FROM actions WHERE source_file = ?1", [source_file])?;
    Ok(removed)
}

/// Insert or update a file load checkpoint.
pub fn upsert_checkpoint(conn: &Connection, checkpoint: &SourceFileCheckpoint) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO source_files (path, content_hash, records_total, records_loaded, loaded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            records_total = excluded.records_total,
            records_loaded = excluded.records_loaded,
            loaded_at = excluded.loaded_at
        "#,
        params![
            checkpoint.path,
            checkpoint.content_hash,
            checkpoint.records_total,
            checkpoint.records_loaded,
            checkpoint.loaded_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_checkpoint, Database};
    use chrono::Utc;

    #[test]
    fn test_action_keeps_lossless_arrays() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let commands = vec!["!a longsword | extra".to_string(), "!i end".to_string()];
        let id = {
            let conn = db.connection();
            insert_action(
                &conn,
                &NewAction {
                    commands: &commands,
                    ..Default::default()
                },
            )
            .unwrap()
        };

        let action = db.get_action(id).unwrap().unwrap();
        assert_eq!(action.commands, commands);
        assert_eq!(
            action.command_text.as_deref(),
            Some("!a longsword | extra | !i end")
        );
        assert!(action.automation_results.is_empty());
        assert_eq!(action.automation_result.as_deref(), Some(""));
    }

    #[test]
    fn test_delete_source_actions_is_scoped_to_file() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let conn = db.connection();
        conn.execute_batch(
            r#"
            INSERT INTO characters (name) VALUES ('Zariel');
            INSERT INTO spells (spell_name) VALUES ('fireball');
            INSERT INTO actions (action_id, source_file) VALUES (1, '/data/a.jsonl'), (2, '/data/b.jsonl');
            INSERT INTO character_snapshots (action_id, character_id, snapshot_type)
                VALUES (1, 1, 'before'), (2, 1, 'before');
            INSERT INTO character_snapshot_spells VALUES (1, 1), (2, 1);
            INSERT INTO spell_casts (action_id, character_id, spell_id, target_count) VALUES (1, 1, 1, 1);
            INSERT INTO damage_events (action_id, attacker_id, target_name, damage_amount)
                VALUES (1, 1, 'goblin', 7), (2, 1, 'orc', 3);
            "#,
        )
        .unwrap();

        assert_eq!(delete_source_actions(&conn, "/data/a.jsonl").unwrap(), 1);
        drop(conn);

        assert_eq!(db.table_count("actions").unwrap(), 1);
        assert_eq!(db.table_count("character_snapshots").unwrap(), 1);
        assert_eq!(db.table_count("character_snapshot_spells").unwrap(), 1);
        assert_eq!(db.table_count("spell_casts").unwrap(), 0);
        assert_eq!(db.table_count("damage_events").unwrap(), 1);
        assert_eq!(db.table_count("characters").unwrap(), 1);
    }

    #[test]
    fn test_checkpoint_upsert() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let conn = db.connection();

        let mut checkpoint = SourceFileCheckpoint {
            path: "/data/a.jsonl".to_string(),
            content_hash: "abc".to_string(),
            records_total: 10,
            records_loaded: 4,
            loaded_at: Utc::now(),
        };
        upsert_checkpoint(&conn, &checkpoint).unwrap();
        checkpoint.records_loaded = 10;
        upsert_checkpoint(&conn, &checkpoint).unwrap();

        let stored = get_checkpoint(&conn, "/data/a.jsonl").unwrap().unwrap();
        assert_eq!(stored.records_loaded, 10);
        assert!(stored.is_complete());
    }
}
