//! Post-load verification.
//!
//! Counts rows, referential-integrity violations and HP invariant breaks.
//! Nothing is repaired; callers decide what a failed report means.

use crate::db::{count_rows, TABLES};
use crate::error::Result;
use rusqlite::Connection;

/// One integrity check and the number of offending rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityCheck {
    pub name: &'static str,
    pub violations: i64,
}

/// Result of a verification pass.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Row count per relational table, in export order
    pub table_counts: Vec<(&'static str, i64)>,
    /// Referential and data-quality checks
    pub checks: Vec<IntegrityCheck>,
    /// Snapshots with class text that did not parse (warning only)
    pub unparsed_classes: i64,
}

impl IntegrityReport {
    /// True when no check found a violation.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.violations == 0)
    }

    /// Checks that found violations.
    pub fn failures(&self) -> impl Iterator<Item = &IntegrityCheck> {
        self.checks.iter().filter(|c| c.violations > 0)
    }
}

/// (name, query counting violating rows)
const CHECKS: &[(&str, &str)] = &[
    (
        "actions.current_actor_id -> characters",
        "SELECT COUNT(*) FROM actions a
         WHERE a.current_actor_id IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM characters c WHERE c.character_id = a.current_actor_id)",
    ),
    (
        "character_snapshots.action_id -> actions",
        "SELECT COUNT(*) FROM character_snapshots s
         WHERE NOT EXISTS (SELECT 1 FROM actions a WHERE a.action_id = s.action_id)",
    ),
    (
        "character_snapshots.character_id -> characters",
        "SELECT COUNT(*) FROM character_snapshots s
         WHERE NOT EXISTS (SELECT 1 FROM characters c WHERE c.character_id = s.character_id)",
    ),
    (
        "character_snapshot_spells -> snapshots/spells",
        "SELECT COUNT(*) FROM character_snapshot_spells j
         WHERE NOT EXISTS (SELECT 1 FROM character_snapshots s WHERE s.snapshot_id = j.snapshot_id)
            OR NOT EXISTS (SELECT 1 FROM spells e WHERE e.spell_id = j.spell_id)",
    ),
    (
        "character_snapshot_attacks -> snapshots/attacks",
        "SELECT COUNT(*) FROM character_snapshot_attacks j
         WHERE NOT EXISTS (SELECT 1 FROM character_snapshots s WHERE s.snapshot_id = j.snapshot_id)
            OR NOT EXISTS (SELECT 1 FROM attacks e WHERE e.attack_id = j.attack_id)",
    ),
    (
        "character_snapshot_effects -> snapshots/effects",
        "SELECT COUNT(*) FROM character_snapshot_effects j
         WHERE NOT EXISTS (SELECT 1 FROM character_snapshots s WHERE s.snapshot_id = j.snapshot_id)
            OR NOT EXISTS (SELECT 1 FROM effects e WHERE e.effect_id = j.effect_id)",
    ),
    (
        "spell_casts -> actions/characters/spells",
        "SELECT COUNT(*) FROM spell_casts f
         WHERE NOT EXISTS (SELECT 1 FROM actions a WHERE a.action_id = f.action_id)
            OR NOT EXISTS (SELECT 1 FROM characters c WHERE c.character_id = f.character_id)
            OR NOT EXISTS (SELECT 1 FROM spells s WHERE s.spell_id = f.spell_id)",
    ),
    (
        "damage_events -> actions/characters",
        "SELECT COUNT(*) FROM damage_events f
         WHERE NOT EXISTS (SELECT 1 FROM actions a WHERE a.action_id = f.action_id)
            OR (f.attacker_id IS NOT NULL
                AND NOT EXISTS (SELECT 1 FROM characters c WHERE c.character_id = f.attacker_id))",
    ),
    (
        "character_snapshots.hp_current <= hp_max",
        "SELECT COUNT(*) FROM character_snapshots
         WHERE hp_current IS NOT NULL AND hp_max IS NOT NULL AND hp_current > hp_max",
    ),
];

/// Run every check against the store.
pub fn verify(conn: &Connection) -> Result<IntegrityReport> {
    let table_counts = TABLES
        .iter()
        .map(|table| Ok((*table, count_rows(conn, table)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut checks = Vec::with_capacity(CHECKS.len());
    for &(name, sql) in CHECKS {
        let violations: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        if violations > 0 {
            tracing::warn!(check = name, violations, "Integrity check failed");
        }
        checks.push(IntegrityCheck { name, violations });
    }

    let unparsed_classes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM character_snapshots
         WHERE class_text IS NOT NULL AND TRIM(class_text) != '' AND class_primary IS NULL",
        [],
        |r| r.get(0),
    )?;
    if unparsed_classes > 0 {
        tracing::info!(unparsed_classes, "Snapshots with unparsed class text");
    }

    Ok(IntegrityReport {
        table_counts,
        checks,
        unparsed_classes,
    })
}
