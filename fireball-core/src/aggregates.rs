//! Derived character aggregates.
//!
//! Aggregates on `characters` are a cache over `character_snapshots`:
//! most common class and race, first/last appearance and appearance count.
//! Recomputing is idempotent. Characters without snapshots keep whatever
//! values they already had.
//!
//! Ties in the most common class/race go to the lexically smallest value.

use crate::error::Result;
use rusqlite::{params, Connection};
use std::collections::HashMap;

/// Aggregates computed for one character.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterAggregate {
    pub character_id: i64,
    pub most_common_class: Option<String>,
    pub most_common_race: Option<String>,
    pub first_seen_action_id: i64,
    pub last_seen_action_id: i64,
    pub total_appearances: i64,
}

/// Recompute aggregates for every character that has snapshots.
///
/// Returns the number of characters updated.
pub fn recompute_all(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    let aggregates = compute(&tx, None)?;
    for aggregate in &aggregates {
        write_aggregate(&tx, aggregate)?;
    }
    tx.commit()?;

    tracing::info!(characters = aggregates.len(), "Recomputed character aggregates");
    Ok(aggregates.len())
}

/// Recompute aggregates for one character inside the caller's transaction.
///
/// Returns `false` when the character has no snapshots (nothing changed).
pub fn recompute_character(conn: &Connection, character_id: i64) -> Result<bool> {
    let aggregates = compute(conn, Some(character_id))?;
    for aggregate in &aggregates {
        write_aggregate(conn, aggregate)?;
    }
    Ok(!aggregates.is_empty())
}

/// Compute aggregates without writing them.
pub fn compute(conn: &Connection, character_id: Option<i64>) -> Result<Vec<CharacterAggregate>> {
    let filter = if character_id.is_some() {
        "WHERE character_id = ?1"
    } else {
        "WHERE ?1 IS NULL"
    };

    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT character_id, MIN(action_id), MAX(action_id), COUNT(*)
        FROM character_snapshots
        {filter}
        GROUP BY character_id
        ORDER BY character_id
        "#
    ))?;
    let mut aggregates = stmt
        .query_map(params![character_id], |row| {
            Ok(CharacterAggregate {
                character_id: row.get(0)?,
                most_common_class: None,
                most_common_race: None,
                first_seen_action_id: row.get(1)?,
                last_seen_action_id: row.get(2)?,
                total_appearances: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let classes = modes(conn, "class_primary", filter, character_id)?;
    let races = modes(conn, "race", filter, character_id)?;
    for aggregate in &mut aggregates {
        aggregate.most_common_class = classes.get(&aggregate.character_id).cloned();
        aggregate.most_common_race = races.get(&aggregate.character_id).cloned();
    }

    Ok(aggregates)
}

/// Most frequent non-empty value of `column` per character.
///
/// Rows come back ordered by count descending then value ascending, so the
/// first row seen for a character is its mode.
fn modes(
    conn: &Connection,
    column: &str,
    filter: &str,
    character_id: Option<i64>,
) -> Result<HashMap<i64, String>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT character_id, {column}, COUNT(*) AS n
        FROM character_snapshots
        {filter} AND {column} IS NOT NULL AND TRIM({column}) != ''
        GROUP BY character_id, {column}
        ORDER BY character_id, n DESC, {column} ASC
        "#
    ))?;
    let rows = stmt.query_map(params![character_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut modes = HashMap::new();
    for row in rows {
        let (id, value) = row?;
        modes.entry(id).or_insert(value);
    }
    Ok(modes)
}

fn write_aggregate(conn: &Connection, aggregate: &CharacterAggregate) -> Result<()> {
    conn.execute(
        r#"
        UPDATE characters SET
            most_common_class = ?2,
            most_common_race = ?3,
            first_seen_action_id = ?4,
            last_seen_action_id = ?5,
            total_appearances = ?6
        WHERE character_id = ?1
        "#,
        params![
            aggregate.character_id,
            aggregate.most_common_class,
            aggregate.most_common_race,
            aggregate.first_seen_action_id,
            aggregate.last_seen_action_id,
            aggregate.total_appearances,
        ],
    )?;
    Ok(())
}
