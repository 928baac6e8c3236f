//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Relational tables in dependency order: dimensions, facts, junctions.
///
/// The exporter and the verifier both walk tables in this order.
pub const TABLES: &[&str] = &[
    "characters",
    "spells",
    "attacks",
    "effects",
    "actions",
    "character_snapshots",
    "spell_casts",
    "damage_events",
    "character_snapshot_spells",
    "character_snapshot_attacks",
    "character_snapshot_effects",
];

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Normalized game log schema
    r#"
    -- ============================================
    -- Dimensions (natural-keyed, get-or-create)
    -- ============================================

    CREATE TABLE IF NOT EXISTS characters (
        character_id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name                      TEXT UNIQUE NOT NULL,

        -- Derived aggregates (recomputed from snapshots)
        most_common_class         TEXT,
        most_common_race          TEXT,
        controller_id             TEXT,
        first_seen_action_id      INTEGER,
        last_seen_action_id       INTEGER,
        total_appearances         INTEGER DEFAULT 0,

        -- Classification
        character_type            TEXT DEFAULT 'Unknown',
        classification_confidence REAL DEFAULT 0.0
    );

    CREATE TABLE IF NOT EXISTS spells (
        spell_id    INTEGER PRIMARY KEY AUTOINCREMENT,
        spell_name  TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS attacks (
        attack_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        attack_name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS effects (
        effect_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        effect_name TEXT UNIQUE NOT NULL
    );

    -- ============================================
    -- Facts
    -- ============================================

    CREATE TABLE IF NOT EXISTS actions (
        action_id         INTEGER PRIMARY KEY AUTOINCREMENT,
        speaker_id        TEXT,
        current_actor_id  INTEGER REFERENCES characters(character_id),
        before_state_idx  INTEGER,
        after_state_idx   INTEGER,

        -- Display view, segments joined with " | "
        command_text      TEXT,
        automation_result TEXT,

        -- Source of truth: original string arrays
        commands_json     JSON NOT NULL DEFAULT '[]',
        automation_json   JSON NOT NULL DEFAULT '[]',

        -- Lineage
        source_file       TEXT
    );

    CREATE TABLE IF NOT EXISTS character_snapshots (
        snapshot_id     INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id       INTEGER NOT NULL REFERENCES actions(action_id),
        character_id    INTEGER NOT NULL REFERENCES characters(character_id),
        snapshot_type   TEXT NOT NULL,

        hp_current      INTEGER,
        hp_max          INTEGER,
        hp_percentage   REAL,
        health_status   TEXT,

        class_text      TEXT,
        class_primary   TEXT,
        class_level     INTEGER,
        class_archetype TEXT,

        race            TEXT,
        controller_id   TEXT
    );

    CREATE TABLE IF NOT EXISTS spell_casts (
        cast_id       INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id     INTEGER NOT NULL REFERENCES actions(action_id),
        character_id  INTEGER NOT NULL REFERENCES characters(character_id),
        spell_id      INTEGER NOT NULL REFERENCES spells(spell_id),
        damage_dealt  INTEGER,
        target_count  INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS damage_events (
        event_id      INTEGER PRIMARY KEY AUTOINCREMENT,
        action_id     INTEGER NOT NULL REFERENCES actions(action_id),
        attacker_id   INTEGER REFERENCES characters(character_id),
        target_name   TEXT NOT NULL,
        damage_amount INTEGER NOT NULL
    );

    -- ============================================
    -- Junctions (no duplicate pairs)
    -- ============================================

    CREATE TABLE IF NOT EXISTS character_snapshot_spells (
        snapshot_id INTEGER NOT NULL REFERENCES character_snapshots(snapshot_id),
        spell_id    INTEGER NOT NULL REFERENCES spells(spell_id),
        PRIMARY KEY (snapshot_id, spell_id)
    );

    CREATE TABLE IF NOT EXISTS character_snapshot_attacks (
        snapshot_id INTEGER NOT NULL REFERENCES character_snapshots(snapshot_id),
        attack_id   INTEGER NOT NULL REFERENCES attacks(attack_id),
        PRIMARY KEY (snapshot_id, attack_id)
    );

    CREATE TABLE IF NOT EXISTS character_snapshot_effects (
        snapshot_id INTEGER NOT NULL REFERENCES character_snapshots(snapshot_id),
        effect_id   INTEGER NOT NULL REFERENCES effects(effect_id),
        PRIMARY KEY (snapshot_id, effect_id)
    );

    -- Indexes
    CREATE INDEX IF NOT EXISTS idx_actions_actor ON actions(current_actor_id);
    CREATE INDEX IF NOT EXISTS idx_snapshots_action ON character_snapshots(action_id);
    CREATE INDEX IF NOT EXISTS idx_snapshots_character ON character_snapshots(character_id);
    CREATE INDEX IF NOT EXISTS idx_spell_casts_action ON spell_casts(action_id);
    CREATE INDEX IF NOT EXISTS idx_spell_casts_spell ON spell_casts(spell_id);
    CREATE INDEX IF NOT EXISTS idx_damage_events_action ON damage_events(action_id);
    CREATE INDEX IF NOT EXISTS idx_snapshot_spells_spell ON character_snapshot_spells(spell_id);
    CREATE INDEX IF NOT EXISTS idx_snapshot_attacks_attack ON character_snapshot_attacks(attack_id);
    CREATE INDEX IF NOT EXISTS idx_snapshot_effects_effect ON character_snapshot_effects(effect_id);
    "#,
    // Version 2: Load checkpoints for resumable ingestion
    r#"
    CREATE TABLE IF NOT EXISTS source_files (
        path            TEXT PRIMARY KEY,
        content_hash    TEXT NOT NULL,
        records_total   INTEGER NOT NULL,
        records_loaded  INTEGER NOT NULL DEFAULT 0,
        loaded_at       DATETIME NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
