//! Database repository layer
//!
//! Provides the database handle and query operations for all entity types.
//! Write operations that run inside caller-managed transactions live in
//! [`super::writes`].

use super::schema::TABLES;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle (single connection, single writer)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete a store and its WAL side files.
    ///
    /// Returns `true` if a store existed.
    pub fn remove_store(path: &Path) -> Result<bool> {
        let existed = path.exists();
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if existed {
            tracing::warn!(path = %path.display(), "Deleted existing database");
        }
        Ok(existed)
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for transactions and advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Table statistics
    // ============================================

    /// Row count of one relational table.
    pub fn table_count(&self, table: &str) -> Result<i64> {
        let conn = self.connection();
        count_rows(&conn, table)
    }

    /// Row counts of every relational table, in export order.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let conn = self.connection();
        TABLES
            .iter()
            .map(|table| Ok((*table, count_rows(&conn, table)?)))
            .collect()
    }

    // ============================================
    // Named entities
    // ============================================

    /// Look up an entity id by its exact stored name.
    pub fn entity_id(&self, kind: EntityKind, name: &str) -> Result<Option<i64>> {
        let conn = self.connection();
        lookup_entity(&conn, kind, name)
    }

    /// Look up an entity name by id.
    pub fn entity_name(&self, kind: EntityKind, id: i64) -> Result<Option<String>> {
        let conn = self.connection();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            kind.name_column(),
            kind.table(),
            kind.id_column()
        );
        conn.query_row(&sql, [id], |row| row.get(0))
            .optional()
            .map_err(Error::from)
    }

    /// Entity ids linked to a snapshot through the kind's junction table.
    pub fn linked_entities(&self, snapshot_id: i64, kind: EntityKind) -> Result<Vec<i64>> {
        let junction = kind
            .junction_table()
            .ok_or_else(|| Error::NotFound(format!("no snapshot junction for {kind}")))?;
        let conn = self.connection();
        let sql = format!(
            "SELECT {id} FROM {junction} WHERE snapshot_id = ?1 ORDER BY {id}",
            id = kind.id_column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([snapshot_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    // ============================================
    // Character operations
    // ============================================

    /// Get a character by display name
    pub fn get_character_by_name(&self, name: &str) -> Result<Option<Character>> {
        let conn = self.connection();
        conn.query_row(
            &format!("{CHARACTER_SELECT} WHERE name = ?1"),
            [name],
            row_to_character,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a character by id
    pub fn get_character(&self, character_id: i64) -> Result<Option<Character>> {
        let conn = self.connection();
        conn.query_row(
            &format!("{CHARACTER_SELECT} WHERE character_id = ?1"),
            [character_id],
            row_to_character,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all characters ordered by id
    pub fn list_characters(&self) -> Result<Vec<Character>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!("{CHARACTER_SELECT} ORDER BY character_id"))?;
        let characters = stmt
            .query_map([], row_to_character)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(characters)
    }

    // ============================================
    // Action operations
    // ============================================

    /// Get an action by id
    pub fn get_action(&self, action_id: i64) -> Result<Option<Action>> {
        let conn = self.connection();
        conn.query_row(
            r#"
            SELECT action_id, speaker_id, current_actor_id, before_state_idx, after_state_idx,
                   command_text, automation_result, commands_json, automation_json, source_file
            FROM actions
            WHERE action_id = ?1
            "#,
            [action_id],
            row_to_action,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Spell casts recorded for an action
    pub fn list_spell_casts(&self, action_id: i64) -> Result<Vec<SpellCast>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT cast_id, action_id, character_id, spell_id, damage_dealt, target_count
            FROM spell_casts
            WHERE action_id = ?1
            ORDER BY cast_id
            "#,
        )?;
        let casts = stmt
            .query_map([action_id], |row| {
                Ok(SpellCast {
                    cast_id: row.get(0)?,
                    action_id: row.get(1)?,
                    character_id: row.get(2)?,
                    spell_id: row.get(3)?,
                    damage_dealt: row.get(4)?,
                    target_count: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(casts)
    }

    /// Damage events recorded for an action
    pub fn list_damage_events(&self, action_id: i64) -> Result<Vec<DamageEvent>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, action_id, attacker_id, target_name, damage_amount
            FROM damage_events
            WHERE action_id = ?1
            ORDER BY event_id
            "#,
        )?;
        let events = stmt
            .query_map([action_id], |row| {
                Ok(DamageEvent {
                    event_id: row.get(0)?,
                    action_id: row.get(1)?,
                    attacker_id: row.get(2)?,
                    target_name: row.get(3)?,
                    damage_amount: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// Snapshots of one character, in action order
    pub fn list_snapshots_for_character(&self, character_id: i64) -> Result<Vec<Snapshot>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "{SNAPSHOT_SELECT} WHERE character_id = ?1 ORDER BY action_id, snapshot_id"
        ))?;
        let snapshots = stmt
            .query_map([character_id], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// Snapshots taken at one action, in insertion order
    pub fn list_snapshots_for_action(&self, action_id: i64) -> Result<Vec<Snapshot>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!(
            "{SNAPSHOT_SELECT} WHERE action_id = ?1 ORDER BY snapshot_id"
        ))?;
        let snapshots = stmt
            .query_map([action_id], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    // ============================================
    // Checkpoint operations
    // ============================================

    /// Load checkpoint for an input file, if any
    pub fn get_checkpoint(&self, path: &str) -> Result<Option<SourceFileCheckpoint>> {
        let conn = self.connection();
        get_checkpoint(&conn, path)
    }
}

// ============================================
// Connection-level helpers
// ============================================

/// Row count of a relational table. Rejects names outside the schema.
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    if !TABLES.contains(&table) && table != "source_files" {
        return Err(Error::NotFound(format!("unknown table: {table}")));
    }
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(count)
}

/// Exact-name entity lookup.
pub fn lookup_entity(conn: &Connection, kind: EntityKind, name: &str) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        kind.id_column(),
        kind.table(),
        kind.name_column()
    );
    conn.query_row(&sql, [name], |row| row.get(0))
        .optional()
        .map_err(Error::from)
}

/// Load checkpoint for an input file.
pub fn get_checkpoint(conn: &Connection, path: &str) -> Result<Option<SourceFileCheckpoint>> {
    conn.query_row(
        r#"
        SELECT path, content_hash, records_total, records_loaded, loaded_at
        FROM source_files
        WHERE path = ?1
        "#,
        params![path],
        |row| {
            let loaded_at_str: String = row.get(4)?;
            Ok(SourceFileCheckpoint {
                path: row.get(0)?,
                content_hash: row.get(1)?,
                records_total: row.get(2)?,
                records_loaded: row.get(3)?,
                loaded_at: DateTime::parse_from_rfc3339(&loaded_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

// ============================================
// Row mapping
// ============================================

pub(crate) const CHARACTER_SELECT: &str = r#"
    SELECT character_id, name, most_common_class, most_common_race, controller_id,
           first_seen_action_id, last_seen_action_id, total_appearances,
           character_type, classification_confidence
    FROM characters
"#;

const SNAPSHOT_SELECT: &str = r#"
    SELECT snapshot_id, action_id, character_id, snapshot_type,
           hp_current, hp_max, hp_percentage, health_status,
           class_text, class_primary, class_level, class_archetype,
           race, controller_id
    FROM character_snapshots
"#;

pub(crate) fn row_to_character(row: &Row) -> rusqlite::Result<Character> {
    let character_type: Option<String> = row.get(8)?;
    Ok(Character {
        character_id: row.get(0)?,
        name: row.get(1)?,
        most_common_class: row.get(2)?,
        most_common_race: row.get(3)?,
        controller_id: row.get(4)?,
        first_seen_action_id: row.get(5)?,
        last_seen_action_id: row.get(6)?,
        total_appearances: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        character_type: character_type
            .as_deref()
            .map(CharacterType::parse)
            .unwrap_or(CharacterType::Unknown),
        classification_confidence: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
    })
}

fn row_to_snapshot(row: &Row) -> rusqlite::Result<Snapshot> {
    let snapshot_type: String = row.get(3)?;
    Ok(Snapshot {
        snapshot_id: row.get(0)?,
        action_id: row.get(1)?,
        character_id: row.get(2)?,
        snapshot_type: SnapshotType::parse(&snapshot_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown snapshot type: {snapshot_type}").into(),
            )
        })?,
        hp_current: row.get(4)?,
        hp_max: row.get(5)?,
        hp_percentage: row.get(6)?,
        health_status: row.get(7)?,
        class_text: row.get(8)?,
        class_primary: row.get(9)?,
        class_level: row.get(10)?,
        class_archetype: row.get(11)?,
        race: row.get(12)?,
        controller_id: row.get(13)?,
    })
}

fn row_to_action(row: &Row) -> rusqlite::Result<Action> {
    let commands_json: String = row.get(7)?;
    let automation_json: String = row.get(8)?;
    Ok(Action {
        action_id: row.get(0)?,
        speaker_id: row.get(1)?,
        current_actor_id: row.get(2)?,
        before_state_idx: row.get(3)?,
        after_state_idx: row.get(4)?,
        command_text: row.get(5)?,
        automation_result: row.get(6)?,
        commands: serde_json::from_str(&commands_json).unwrap_or_default(),
        automation_results: serde_json::from_str(&automation_json).unwrap_or_default(),
        source_file: row.get(9)?,
    })
}
