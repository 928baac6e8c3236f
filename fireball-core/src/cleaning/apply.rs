//! Apply reviewed suggestions to the store.
//!
//! Every suggestion is applied in its own transaction, so a failure leaves
//! earlier suggestions applied and later ones untouched.

use super::{Suggestion, SuggestionStatus};
use crate::aggregates::{recompute_all, recompute_character};
use crate::db::lookup_entity;
use crate::error::{Error, Result};
use crate::fields::{is_standard_class, parse_class};
use crate::types::EntityKind;
use rusqlite::{params, Connection, OptionalExtension};

/// Outcome of applying name suggestions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    /// Entities renamed in place (no entity held the cleaned name)
    pub renamed: usize,
    /// Entities merged into an existing entity with the cleaned name
    pub merged: usize,
    /// Suggestions below the confidence threshold or marked failed
    pub skipped: usize,
    /// Suggestions whose cleaned value is empty or unchanged
    pub unchanged: usize,
    /// Suggestions whose entity no longer exists
    pub missing: usize,
    /// Snapshot links moved to the surviving entity
    pub links_redirected: usize,
    /// Links dropped because the snapshot already linked the survivor
    pub links_dropped: usize,
}

/// Link changes made by one merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub links_redirected: usize,
    pub links_dropped: usize,
    pub casts_redirected: usize,
}

/// Apply cleaned names for spells, attacks or effects.
///
/// A suggestion whose cleaned name already belongs to another entity merges
/// into it; otherwise the entity is renamed. With `dry_run` nothing is
/// written but the summary reports what would have happened.
pub fn apply_entity_suggestions(
    conn: &mut Connection,
    kind: EntityKind,
    suggestions: &[Suggestion],
    min_confidence: u8,
    dry_run: bool,
) -> Result<ApplySummary> {
    if kind.junction_table().is_none() {
        return Err(Error::Config(format!(
            "name suggestions cannot be applied to {kind} entities"
        )));
    }

    let mut summary = ApplySummary::default();
    for suggestion in suggestions {
        if suggestion.status != SuggestionStatus::Success
            || suggestion.confidence < min_confidence
        {
            summary.skipped += 1;
            continue;
        }
        let Some(cleaned) = suggestion.normalized_cleaned() else {
            summary.unchanged += 1;
            continue;
        };
        if cleaned == suggestion.original_value.trim() {
            summary.unchanged += 1;
            continue;
        }

        let tx = conn.transaction()?;
        let current = entity_name(&tx, kind, suggestion.id)?;
        let Some(current) = current else {
            tracing::debug!(kind = %kind, id = suggestion.id, "Entity no longer exists");
            summary.missing += 1;
            continue;
        };
        if current != suggestion.original_value {
            tracing::debug!(
                kind = %kind,
                id = suggestion.id,
                current = %current,
                original = %suggestion.original_value,
                "Entity name differs from suggestion; applying by id"
            );
        }

        match lookup_entity(&tx, kind, &cleaned)? {
            Some(target) if target != suggestion.id => {
                let stats = merge_entity(&tx, kind, suggestion.id, target)?;
                summary.merged += 1;
                summary.links_redirected += stats.links_redirected;
                summary.links_dropped += stats.links_dropped;
                tracing::debug!(kind = %kind, from = suggestion.id, into = target, "Merged entity");
            }
            _ => {
                rename_entity(&tx, kind, suggestion.id, &cleaned)?;
                summary.renamed += 1;
            }
        }

        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
    }

    tracing::info!(
        kind = %kind,
        renamed = summary.renamed,
        merged = summary.merged,
        skipped = summary.skipped,
        dry_run,
        "Applied name suggestions"
    );
    Ok(summary)
}

/// Merge entity `from` into `into` and delete `from`.
///
/// Snapshot links move to `into`; a link that would duplicate an existing
/// `(snapshot, into)` pair is dropped. Spell casts follow merged spells.
pub fn merge_entity(conn: &Connection, kind: EntityKind, from: i64, into: i64) -> Result<MergeStats> {
    let junction = kind
        .junction_table()
        .ok_or_else(|| Error::Config(format!("{kind} entities cannot be merged")))?;
    let id_column = kind.id_column();

    let links_dropped = conn.execute(
        &format!(
            "DELETE FROM {junction}
             WHERE {id_column} = ?1
               AND snapshot_id IN (SELECT snapshot_id FROM {junction} WHERE {id_column} = ?2)"
        ),
        params![from, into],
    )?;
    let links_redirected = conn.execute(
        &format!("UPDATE {junction} SET {id_column} = ?2 WHERE {id_column} = ?1"),
        params![from, into],
    )?;
    let casts_redirected = if kind == EntityKind::Spell {
        conn.execute(
            "UPDATE spell_casts SET spell_id = ?2 WHERE spell_id = ?1",
            params![from, into],
        )?
    } else {
        0
    };
    conn.execute(
        &format!("DELETE FROM {} WHERE {id_column} = ?1", kind.table()),
        [from],
    )?;

    Ok(MergeStats {
        links_redirected,
        links_dropped,
        casts_redirected,
    })
}

fn rename_entity(conn: &Connection, kind: EntityKind, id: i64, name: &str) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET {} = ?2 WHERE {} = ?1",
            kind.table(),
            kind.name_column(),
            kind.id_column()
        ),
        params![id, name],
    )?;
    Ok(())
}

fn entity_name(conn: &Connection, kind: EntityKind, id: i64) -> Result<Option<String>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            kind.name_column(),
            kind.table(),
            kind.id_column()
        ),
        [id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

// ============================================
// Races
// ============================================

/// Outcome of applying race suggestions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RaceApplySummary {
    /// Suggestions that judged the race genuine
    pub kept: usize,
    /// Races replaced by a cleaned value
    pub simplified: usize,
    /// Races cleared
    pub nulled: usize,
    /// Suggestions below the threshold or marked failed
    pub skipped: usize,
    /// Snapshot rows rewritten
    pub snapshots_updated: usize,
}

/// Apply race suggestions to snapshots and recompute the affected
/// characters' aggregates.
pub fn apply_race_suggestions(
    conn: &mut Connection,
    suggestions: &[Suggestion],
    min_confidence: u8,
    dry_run: bool,
) -> Result<RaceApplySummary> {
    let mut summary = RaceApplySummary::default();

    for suggestion in suggestions {
        if suggestion.status != SuggestionStatus::Success {
            summary.skipped += 1;
            continue;
        }
        if suggestion.valid != Some(false) {
            summary.kept += 1;
            continue;
        }
        if suggestion.confidence < min_confidence {
            summary.skipped += 1;
            continue;
        }

        let cleaned = suggestion.normalized_cleaned();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE character_snapshots SET race = ?3 WHERE character_id = ?1 AND race = ?2",
            params![suggestion.id, suggestion.original_value, cleaned],
        )?;
        // Characters without snapshots keep their aggregate; fix it directly.
        tx.execute(
            "UPDATE characters SET most_common_race = ?3
             WHERE character_id = ?1 AND most_common_race = ?2",
            params![suggestion.id, suggestion.original_value, cleaned],
        )?;
        recompute_character(&tx, suggestion.id)?;

        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }

        summary.snapshots_updated += updated;
        match cleaned {
            Some(_) => summary.simplified += 1,
            None => summary.nulled += 1,
        }
    }

    tracing::info!(
        kept = summary.kept,
        simplified = summary.simplified,
        nulled = summary.nulled,
        skipped = summary.skipped,
        dry_run,
        "Applied race suggestions"
    );
    Ok(summary)
}

// ============================================
// Classes
// ============================================

/// Outcome of class normalization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassNormalizeSummary {
    /// Snapshots with class text that were re-parsed
    pub examined: usize,
    /// Snapshots whose parsed class fields changed
    pub updated: usize,
    /// Snapshots deleted because their class is not a standard class
    pub pruned: usize,
    /// Junction links deleted along with pruned snapshots
    pub links_removed: usize,
}

type ClassFields = (Option<String>, Option<i64>, Option<String>);

/// Re-parse stored class text and, with `prune`, delete snapshots whose
/// class is not one of the standard classes. Aggregates are recomputed
/// afterwards.
pub fn normalize_classes(conn: &mut Connection, prune: bool, dry_run: bool) -> Result<ClassNormalizeSummary> {
    let mut summary = ClassNormalizeSummary::default();
    let tx = conn.transaction()?;

    let rows = {
        let mut stmt = tx.prepare(
            "SELECT snapshot_id, class_text, class_primary, class_level, class_archetype
             FROM character_snapshots
             WHERE class_text IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    (row.get(2)?, row.get(3)?, row.get(4)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<(i64, String, ClassFields)>>>()?;
        rows
    };

    for (snapshot_id, class_text, stored) in rows {
        summary.examined += 1;
        let parsed: ClassFields = match parse_class(&class_text) {
            Some(info) => (Some(info.primary), Some(info.level), info.archetype),
            None => (None, None, None),
        };
        if parsed != stored {
            tx.execute(
                "UPDATE character_snapshots
                 SET class_primary = ?2, class_level = ?3, class_archetype = ?4
                 WHERE snapshot_id = ?1",
                params![snapshot_id, parsed.0, parsed.1, parsed.2],
            )?;
            summary.updated += 1;
        }
    }

    if prune {
        let doomed = {
            let mut stmt = tx.prepare(
                "SELECT snapshot_id, class_primary FROM character_snapshots
                 WHERE class_primary IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter(|(_, primary)| !is_standard_class(primary))
                .map(|(id, _)| id)
                .collect::<Vec<_>>()
        };

        for snapshot_id in doomed {
            for kind in [EntityKind::Spell, EntityKind::Attack, EntityKind::Effect] {
                if let Some(junction) = kind.junction_table() {
                    summary.links_removed += tx.execute(
                        &format!("DELETE FROM {junction} WHERE snapshot_id = ?1"),
                        [snapshot_id],
                    )?;
                }
            }
            tx.execute(
                "DELETE FROM character_snapshots WHERE snapshot_id = ?1",
                [snapshot_id],
            )?;
            summary.pruned += 1;
        }
    }

    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
        recompute_all(conn)?;
    }

    tracing::info!(
        examined = summary.examined,
        updated = summary.updated,
        pruned = summary.pruned,
        dry_run,
        "Normalized classes"
    );
    Ok(summary)
}
