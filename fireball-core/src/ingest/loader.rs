//! Normalizes one action record into relational rows.

use super::record::{ActionRecord, CharacterState};
use crate::db::writes::{self, NewAction, NewSnapshot};
use crate::db::EntityResolver;
use crate::error::Result;
use crate::fields::{self, parse_class, parse_health};
use crate::types::{EntityKind, SnapshotType};
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Rows written for one record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordStats {
    pub action_id: i64,
    pub snapshots: usize,
    pub links: usize,
    pub spell_casts: usize,
    pub damage_events: usize,
}

/// Write one record: action, snapshots with their links, spell casts and
/// damage events.
///
/// Runs against whatever transaction the caller holds.
pub fn load_record(
    conn: &Connection,
    resolver: &mut EntityResolver,
    record: &ActionRecord,
    source_file: Option<&str>,
) -> Result<RecordStats> {
    // 1. Acting character
    let actor_id = match record.current_actor.as_ref() {
        Some(actor) => match actor.display_name() {
            Some(name) => {
                resolver.get_or_create_character(conn, name, actor.controller_id.as_deref())?
            }
            None => None,
        },
        None => None,
    };

    // 2. Action
    let action_id = writes::insert_action(
        conn,
        &NewAction {
            speaker_id: record.speaker_id.as_deref(),
            current_actor_id: actor_id,
            before_state_idx: record.before_state_idx,
            after_state_idx: record.after_state_idx,
            commands: &record.commands_norm,
            automation_results: &record.automation_results,
            source_file,
        },
    )?;

    let mut stats = RecordStats {
        action_id,
        ..Default::default()
    };

    // 3. Snapshots, in role order
    let states = record
        .combat_state_before
        .iter()
        .flatten()
        .map(|s| (SnapshotType::Before, s))
        .chain(
            record
                .combat_state_after
                .iter()
                .flatten()
                .map(|s| (SnapshotType::After, s)),
        )
        .chain(
            record
                .current_actor
                .iter()
                .map(|s| (SnapshotType::CurrentActor, s)),
        )
        .chain(record.caster_after.iter().map(|s| (SnapshotType::Caster, s)))
        .chain(
            record
                .targets_after
                .iter()
                .flatten()
                .map(|s| (SnapshotType::Target, s)),
        );

    for (snapshot_type, state) in states {
        if let Some(links) = insert_state(conn, resolver, action_id, snapshot_type, state)? {
            stats.snapshots += 1;
            stats.links += links;
        }
    }

    // 4 + 5. Facts parsed from automation text
    let hits: Vec<(String, i64)> = record
        .automation_results
        .iter()
        .flat_map(|text| fields::parse_damage(text))
        .collect();

    if let Some(actor_id) = actor_id {
        let total_damage = hits
            .iter()
            .fold(0i64, |total, (_, amount)| total.saturating_add(*amount));
        let targets: BTreeSet<&str> = hits.iter().map(|(target, _)| target.as_str()).collect();

        for command in &record.commands_norm {
            let Some(spell) = fields::parse_spell_command(command) else {
                continue;
            };
            let Some(spell_id) = resolver.get_or_create(conn, EntityKind::Spell, &spell)? else {
                continue;
            };
            writes::insert_spell_cast(
                conn,
                action_id,
                actor_id,
                spell_id,
                (total_damage > 0).then_some(total_damage),
                targets.len() as i64,
            )?;
            stats.spell_casts += 1;
        }

        for (target, amount) in &hits {
            writes::insert_damage_event(conn, action_id, Some(actor_id), target, *amount)?;
            stats.damage_events += 1;
        }
    } else if !hits.is_empty() {
        tracing::debug!(
            action_id,
            hits = hits.len(),
            "Skipping damage events without an acting character"
        );
    }

    Ok(stats)
}

/// Insert one snapshot. Returns the number of junction links written, or
/// `None` when the state has no usable name.
fn insert_state(
    conn: &Connection,
    resolver: &mut EntityResolver,
    action_id: i64,
    snapshot_type: SnapshotType,
    state: &CharacterState,
) -> Result<Option<usize>> {
    let Some(name) = state.display_name() else {
        return Ok(None);
    };
    let Some(character_id) =
        resolver.get_or_create_character(conn, name, state.controller_id.as_deref())?
    else {
        return Ok(None);
    };

    let health = state.hp.as_deref().and_then(parse_health);
    let class_text = state
        .class
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let class = class_text.and_then(parse_class);
    let race = fields::clean_race(state.race.as_deref(), Some(name));

    let snapshot_id = writes::insert_snapshot(
        conn,
        &NewSnapshot {
            action_id,
            character_id,
            snapshot_type,
            hp_current: health.as_ref().map(|h| h.current),
            hp_max: health.as_ref().map(|h| h.max),
            hp_percentage: health.as_ref().map(|h| h.percentage),
            health_status: health.as_ref().map(|h| h.status.as_str()),
            class_text,
            class_primary: class.as_ref().map(|c| c.primary.as_str()),
            class_level: class.as_ref().map(|c| c.level),
            class_archetype: class.as_ref().and_then(|c| c.archetype.as_deref()),
            race: race.as_deref(),
            controller_id: state.controller_id.as_deref(),
        },
    )?;

    let mut links = 0;
    for (kind, list) in [
        (EntityKind::Spell, &state.spells),
        (EntityKind::Attack, &state.attacks),
        (EntityKind::Effect, &state.effects),
    ] {
        let Some(list) = list.as_deref() else {
            continue;
        };
        for token in fields::split_list(list) {
            if let Some(entity_id) = resolver.get_or_create(conn, kind, token)? {
                if writes::link_snapshot(conn, kind, snapshot_id, entity_id)? {
                    links += 1;
                }
            }
        }
    }

    Ok(Some(links))
}
