//! Integration tests for the fireball load, clean, classify and export pipeline
//!
//! These tests use `tests/fixtures/sample.jsonl`: three well-formed action
//! records and one malformed line.

use fireball_core::aggregates::recompute_all;
use fireball_core::classify::classify_characters;
use fireball_core::cleaning::{
    apply_entity_suggestions, apply_race_suggestions, load_suggestions, normalize_classes,
    suggest_attacks, suggest_races, HeuristicProvider,
};
use fireball_core::db::Database;
use fireball_core::export::{export_extract, verify_extract};
use fireball_core::ingest::{resolve_inputs, IngestCoordinator};
use fireball_core::types::{CharacterType, EntityKind, SnapshotType};
use fireball_core::verify::verify;
use fireball_core::Error;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Load the sample fixture into a fresh on-disk database and recompute
/// aggregates.
fn loaded_db(dir: &TempDir) -> Database {
    let db = Database::open(&dir.path().join("fireball.db")).unwrap();
    db.migrate().unwrap();
    let coordinator = IngestCoordinator::new(db, 2);
    let result = coordinator
        .load_files(&[fixture_path("sample.jsonl")])
        .unwrap();
    assert_eq!(result.records_loaded, 3);

    let db = coordinator.into_database();
    recompute_all(&mut db.connection()).unwrap();
    db
}

fn count(db: &Database, table: &str) -> i64 {
    db.table_count(table).unwrap()
}

// ============================================
// Load
// ============================================

#[test]
fn test_full_load_pipeline() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("fireball.db")).unwrap();
    db.migrate().unwrap();
    let coordinator = IngestCoordinator::new(db, 2);

    let mut progress = Vec::new();
    let result = coordinator
        .load_files_with_progress(&[fixture_path("sample.jsonl")], |done, total, _| {
            progress.push((done, total))
        })
        .expect("load should succeed");

    assert_eq!(result.files_processed, 1);
    assert_eq!(result.records_loaded, 3);
    assert_eq!(result.actions_inserted, 3);
    assert_eq!(result.snapshots_inserted, 7);
    assert_eq!(result.links_inserted, 11);
    assert_eq!(result.spell_casts_inserted, 1);
    assert_eq!(result.damage_events_inserted, 2);
    assert_eq!(result.characters_created, 4);
    assert_eq!(result.warnings.len(), 1, "malformed line is reported");
    assert!(result.errors.is_empty());
    assert_eq!(progress, vec![(2, 4), (4, 4)]);

    let db = coordinator.into_database();
    assert_eq!(count(&db, "characters"), 4);
    assert_eq!(count(&db, "attacks"), 4);
    assert_eq!(count(&db, "spells"), 2);
    assert_eq!(count(&db, "effects"), 0);
    assert_eq!(count(&db, "character_snapshot_attacks"), 7);
    assert_eq!(count(&db, "character_snapshot_spells"), 4);
}

#[test]
fn test_loaded_rows_match_records() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);

    let zariel = db.get_character_by_name("Zariel").unwrap().unwrap();
    assert_eq!(zariel.controller_id.as_deref(), Some("1001"));

    let action = db.get_action(1).unwrap().unwrap();
    assert_eq!(action.current_actor_id, Some(zariel.character_id));
    assert_eq!(action.speaker_id.as_deref(), Some("1001"));
    assert_eq!(action.commands, vec!["!cast fireball -t GO1".to_string()]);
    let source_file = action.source_file.expect("action records its source file");
    assert!(source_file.ends_with("sample.jsonl"));
    assert!(PathBuf::from(&source_file).is_absolute());

    let casts = db.list_spell_casts(1).unwrap();
    assert_eq!(casts.len(), 1);
    assert_eq!(casts[0].damage_dealt, Some(24));
    assert_eq!(casts[0].target_count, 1);
    assert_eq!(
        Some(casts[0].spell_id),
        db.entity_id(EntityKind::Spell, "fireball").unwrap()
    );

    let snapshots = db.list_snapshots_for_action(1).unwrap();
    let types: Vec<SnapshotType> = snapshots.iter().map(|s| s.snapshot_type).collect();
    assert_eq!(
        types,
        vec![
            SnapshotType::Before,
            SnapshotType::Before,
            SnapshotType::CurrentActor,
            SnapshotType::Target
        ]
    );
    let target = &snapshots[3];
    assert_eq!(target.hp_current, Some(0));
    assert_eq!(target.hp_max, Some(7));
    assert_eq!(target.health_status.as_deref(), Some("Dead"));

    // String-form commands and automation are accepted
    let action = db.get_action(2).unwrap().unwrap();
    assert_eq!(action.commands, vec!["!attack shortsword -t GO1".to_string()]);
    assert_eq!(db.list_damage_events(2).unwrap()[0].damage_amount, 5);

    // No acting character, no damage event
    assert!(db.list_damage_events(3).unwrap().is_empty());
}

#[test]
fn test_reload_skips_completed_file() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);
    let coordinator = IngestCoordinator::new(db, 2);

    let result = coordinator
        .load_files(&[fixture_path("sample.jsonl")])
        .unwrap();
    assert_eq!(result.files_skipped, 1);
    assert_eq!(result.actions_inserted, 0);
    assert_eq!(count(coordinator.database(), "actions"), 3);
}

#[test]
fn test_changed_file_is_reloaded_with_warning() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.jsonl");
    std::fs::copy(fixture_path("sample.jsonl"), &input).unwrap();

    let db = Database::open(&dir.path().join("fireball.db")).unwrap();
    db.migrate().unwrap();
    let coordinator = IngestCoordinator::new(db, 10);
    coordinator.load_files(&[input.clone()]).unwrap();

    let mut content = std::fs::read_to_string(&input).unwrap();
    content.push_str("{\"current_actor\": {\"name\": \"Zariel\"}}\n");
    std::fs::write(&input, content).unwrap();

    let result = coordinator.load_files(&[input]).unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("content changed")));
    assert_eq!(result.actions_inserted, 4);
    assert_eq!(result.actions_removed, 3);

    let db = coordinator.into_database();
    assert_eq!(count(&db, "actions"), 4);
    assert_eq!(count(&db, "character_snapshots"), 8);
    assert_eq!(count(&db, "character_snapshot_attacks"), 7);
    assert_eq!(count(&db, "character_snapshot_spells"), 4);
    assert_eq!(count(&db, "spell_casts"), 1);
    assert_eq!(count(&db, "damage_events"), 2);
    assert_eq!(count(&db, "characters"), 4);
    let report = verify(&db.connection()).unwrap();
    assert!(report.passed());
}

#[test]
fn test_resolve_inputs_glob() {
    let dir = TempDir::new().unwrap();
    for name in ["b.jsonl", "a.jsonl", "notes.txt"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }

    let pattern = dir.path().join("*.jsonl").to_string_lossy().into_owned();
    let files = resolve_inputs(&[pattern]).unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.jsonl", "b.jsonl"]);

    let missing = dir.path().join("*.json").to_string_lossy().into_owned();
    assert!(matches!(
        resolve_inputs(&[missing]),
        Err(Error::Input { .. })
    ));
}

// ============================================
// Aggregates and verification
// ============================================

#[test]
fn test_aggregates_after_load() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);

    let zariel = db.get_character_by_name("Zariel").unwrap().unwrap();
    assert_eq!(zariel.most_common_class.as_deref(), Some("Paladin"));
    assert_eq!(zariel.most_common_race.as_deref(), Some("Tiefling"));
    assert_eq!(zariel.total_appearances, 2);
    assert_eq!(zariel.first_seen_action_id, Some(1));
    assert_eq!(zariel.last_seen_action_id, Some(1));

    let goblin = db.get_character_by_name("GO1").unwrap().unwrap();
    assert_eq!(goblin.most_common_race.as_deref(), Some("Goblin"));
    assert_eq!(goblin.most_common_class, None);
}

#[test]
fn test_verify_loaded_store() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);

    let report = verify(&db.connection()).unwrap();
    assert!(report.passed(), "failures: {:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.unparsed_classes, 0);
    assert_eq!(report.table_counts, db.table_counts().unwrap());
}

// ============================================
// Cleaning
// ============================================

#[test]
fn test_attack_cleaning_merges_duplicates() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);
    let suggestions_path = dir.path().join("attack_suggestions.json");

    let summary = suggest_attacks(
        &db.connection(),
        &HeuristicProvider,
        15,
        &suggestions_path,
        10,
        |_, _| {},
    )
    .unwrap();
    assert_eq!(summary.candidates, 1);

    let suggestions = load_suggestions(&suggestions_path).unwrap();
    assert_eq!(suggestions[0].original_value, "Longsword (Etri Feiro)");
    assert_eq!(suggestions[0].cleaned_value.as_deref(), Some("Longsword"));

    let merged_id = suggestions[0].id;
    let survivor = db.entity_id(EntityKind::Attack, "Longsword").unwrap().unwrap();
    let applied = apply_entity_suggestions(
        &mut db.connection(),
        EntityKind::Attack,
        &suggestions,
        80,
        false,
    )
    .unwrap();

    assert_eq!(applied.merged, 1);
    assert_eq!(applied.links_dropped, 2);
    assert_eq!(db.entity_name(EntityKind::Attack, merged_id).unwrap(), None);
    assert_eq!(count(&db, "attacks"), 3);
    assert_eq!(count(&db, "character_snapshot_attacks"), 5);
    for snapshot in db.list_snapshots_for_action(1).unwrap() {
        let attacks = db
            .linked_entities(snapshot.snapshot_id, EntityKind::Attack)
            .unwrap();
        assert!(!attacks.contains(&merged_id));
        if snapshot.character_id == 1 {
            assert_eq!(attacks, vec![survivor]);
        }
    }
    assert!(verify(&db.connection()).unwrap().passed());
}

#[test]
fn test_race_cleaning_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);
    db.connection()
        .execute_batch(
            "UPDATE character_snapshots SET race = 'Bram' WHERE character_id = 3;
             UPDATE characters SET most_common_race = 'Bram' WHERE character_id = 3;",
        )
        .unwrap();

    let path = dir.path().join("race_suggestions.json");
    let summary = suggest_races(&db.connection(), &HeuristicProvider, &path, 10, |_, _| {}).unwrap();
    assert_eq!(summary.candidates, 1);

    let suggestions = load_suggestions(&path).unwrap();
    assert_eq!(suggestions[0].valid, Some(false));
    let applied = apply_race_suggestions(&mut db.connection(), &suggestions, 80, false).unwrap();
    assert_eq!(applied.nulled, 1);
    assert_eq!(applied.snapshots_updated, 2);

    let bram = db.get_character(3).unwrap().unwrap();
    assert_eq!(bram.most_common_race, None);
    assert_eq!(bram.total_appearances, 2);
}

#[test]
fn test_class_prune_keeps_store_consistent() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);
    db.connection()
        .execute(
            "UPDATE character_snapshots SET class_text = 'Starfarer 3' WHERE character_id = 3",
            [],
        )
        .unwrap();

    let summary = normalize_classes(&mut db.connection(), true, false).unwrap();
    assert_eq!(summary.pruned, 2);
    assert_eq!(summary.links_removed, 2);
    assert!(db.list_snapshots_for_character(3).unwrap().is_empty());
    assert!(verify(&db.connection()).unwrap().passed());
}

// ============================================
// Classification and export
// ============================================

#[test]
fn test_classification_after_load() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);

    let summary =
        classify_characters(&mut db.connection(), &HeuristicProvider, false, |_, _| {}).unwrap();
    assert_eq!(summary.examined, 4);
    assert_eq!(summary.by_rule, 4);

    let label = |name: &str| db.get_character_by_name(name).unwrap().unwrap().character_type;
    assert_eq!(label("Zariel"), CharacterType::Pc);
    assert_eq!(label("Bram"), CharacterType::Pc);
    assert_eq!(label("GO1"), CharacterType::Monster);
    assert_eq!(label("DM"), CharacterType::Other);

    // Nothing left to classify
    let summary =
        classify_characters(&mut db.connection(), &HeuristicProvider, false, |_, _| {}).unwrap();
    assert_eq!(summary.examined, 0);
}

#[test]
fn test_export_round_trip_and_tamper() {
    let dir = TempDir::new().unwrap();
    let db = loaded_db(&dir);
    let extract = dir.path().join("out").join("fireball.extract.db");

    let report = export_extract(&db.connection(), &extract).unwrap();
    let expected: i64 = db.table_counts().unwrap().iter().map(|(_, n)| n).sum();
    assert_eq!(report.total_rows(), expected);
    assert!(verify_extract(&db.connection(), &extract).is_ok());

    rusqlite::Connection::open(&extract)
        .unwrap()
        .execute("DELETE FROM damage_events WHERE event_id = 1", [])
        .unwrap();
    assert!(matches!(
        verify_extract(&db.connection(), &extract),
        Err(Error::Export(_))
    ));
}
