//! Advisors: select candidate rows and collect suggestions for them.
//!
//! Advisors only read the store. Suggestions are flushed to the output file
//! every `save_every` items so an interrupted run keeps its progress; a
//! rerun skips ids already present in the file.

use super::provider::SuggestionProvider;
use super::{load_suggestions, save_suggestions, Suggestion, SuggestionStatus};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Outcome of an advisor run.
#[derive(Debug, Default)]
pub struct AdvisorSummary {
    /// Candidate rows selected from the store
    pub candidates: usize,
    /// Candidates already present in the output file
    pub resumed: usize,
    /// Provider calls that produced a suggestion
    pub succeeded: usize,
    /// Provider calls that failed (recorded with status `failed`)
    pub failed: usize,
    /// Where the suggestions were written
    pub output: PathBuf,
}

/// A character whose race value looks suspicious.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceCandidate {
    pub character_id: i64,
    pub name: String,
    pub race: String,
    pub total_appearances: i64,
}

/// Attacks whose name is at least `min_length` characters long.
pub fn attack_candidates(conn: &Connection, min_length: usize) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT attack_id, attack_name
        FROM attacks
        WHERE LENGTH(attack_name) >= ?1
        ORDER BY LENGTH(attack_name) DESC, attack_id
        "#,
    )?;
    let rows = stmt
        .query_map([min_length as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Characters whose most common race repeats their name (monster labels
/// excepted), is overly long, looks like an opaque id or carries quotes or
/// brackets.
pub fn race_candidates(conn: &Connection) -> Result<Vec<RaceCandidate>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT character_id, name, most_common_race, total_appearances
        FROM characters
        WHERE most_common_race IS NOT NULL
          AND (
              (LOWER(most_common_race) = LOWER(name)
                  AND LOWER(name) NOT IN ('skeleton', 'zombie', 'ghost', 'spirit', 'elemental'))
              OR LENGTH(most_common_race) > 35
              OR (most_common_race NOT LIKE '% %'
                  AND most_common_race GLOB '*[a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9][a-z0-9]*'
                  AND most_common_race GLOB '*[0-9]*')
              OR INSTR(most_common_race, '"') > 0
              OR INSTR(most_common_race, '[') > 0
          )
        ORDER BY total_appearances DESC, character_id
        "#,
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RaceCandidate {
                character_id: row.get(0)?,
                name: row.get(1)?,
                race: row.get(2)?,
                total_appearances: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Collect attack-name suggestions into `output`.
pub fn suggest_attacks<F>(
    conn: &Connection,
    provider: &dyn SuggestionProvider,
    min_length: usize,
    output: &Path,
    save_every: usize,
    on_progress: F,
) -> Result<AdvisorSummary>
where
    F: FnMut(usize, usize),
{
    let candidates = attack_candidates(conn, min_length)?;
    tracing::info!(
        candidates = candidates.len(),
        min_length,
        provider = provider.name(),
        "Collecting attack name suggestions"
    );

    run_advisor(
        candidates,
        output,
        save_every,
        on_progress,
        |(id, _)| *id,
        |(id, name)| match provider.clean_attack_name(name) {
            Ok(s) => Suggestion {
                id: *id,
                context: None,
                original_value: name.clone(),
                cleaned_value: s.cleaned,
                confidence: s.confidence,
                reasoning: s.reasoning,
                status: SuggestionStatus::Success,
                valid: None,
            },
            Err(e) => {
                tracing::warn!(attack_id = id, error = %e, "Attack suggestion failed");
                Suggestion::failed(*id, name, e.to_string())
            }
        },
    )
}

/// Collect race assessments for suspicious characters into `output`.
pub fn suggest_races<F>(
    conn: &Connection,
    provider: &dyn SuggestionProvider,
    output: &Path,
    save_every: usize,
    on_progress: F,
) -> Result<AdvisorSummary>
where
    F: FnMut(usize, usize),
{
    let candidates = race_candidates(conn)?;
    tracing::info!(
        candidates = candidates.len(),
        provider = provider.name(),
        "Collecting race suggestions"
    );

    run_advisor(
        candidates,
        output,
        save_every,
        on_progress,
        |c| c.character_id,
        |c| match provider.assess_race(&c.name, &c.race) {
            Ok(a) => Suggestion {
                id: c.character_id,
                context: Some(c.name.clone()),
                original_value: c.race.clone(),
                cleaned_value: a.cleaned,
                confidence: a.confidence,
                reasoning: a.reasoning,
                status: SuggestionStatus::Success,
                valid: Some(a.valid),
            },
            Err(e) => {
                tracing::warn!(character_id = c.character_id, error = %e, "Race assessment failed");
                Suggestion {
                    context: Some(c.name.clone()),
                    ..Suggestion::failed(c.character_id, &c.race, e.to_string())
                }
            }
        },
    )
}

fn run_advisor<T, F, K, S>(
    candidates: Vec<T>,
    output: &Path,
    save_every: usize,
    mut on_progress: F,
    id_of: K,
    mut suggest: S,
) -> Result<AdvisorSummary>
where
    F: FnMut(usize, usize),
    K: Fn(&T) -> i64,
    S: FnMut(&T) -> Suggestion,
{
    let mut suggestions = if output.exists() {
        load_suggestions(output)?
    } else {
        Vec::new()
    };
    // Failed entries are retried
    suggestions.retain(|s| s.status == SuggestionStatus::Success);
    let done: HashSet<i64> = suggestions.iter().map(|s| s.id).collect();

    let mut summary = AdvisorSummary {
        candidates: candidates.len(),
        output: output.to_path_buf(),
        ..Default::default()
    };
    let total = candidates.len();
    let save_every = save_every.max(1);
    let mut pending = 0;

    for (i, candidate) in candidates.iter().enumerate() {
        on_progress(i + 1, total);

        if done.contains(&id_of(candidate)) {
            summary.resumed += 1;
            continue;
        }
        let suggestion = suggest(candidate);
        match suggestion.status {
            SuggestionStatus::Success => summary.succeeded += 1,
            SuggestionStatus::Failed => summary.failed += 1,
        }
        suggestions.push(suggestion);

        pending += 1;
        if pending >= save_every {
            save_suggestions(output, &suggestions)?;
            pending = 0;
        }
    }

    save_suggestions(output, &suggestions)?;
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        resumed = summary.resumed,
        path = %output.display(),
        "Saved suggestions"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::provider::tests::MockClient;
    use crate::cleaning::provider::{HeuristicProvider, LlmSuggestionProvider};
    use crate::db::Database;
    use crate::error::Error;
    use tempfile::TempDir;

    const LONG_ATTACK: &str = "Radiant Mace (Defender Only) (Avenger Celestial Spirit 1)";

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.connection()
            .execute(
                "INSERT INTO attacks (attack_name) VALUES ('Bite'), (?1), ('Claw')",
                [LONG_ATTACK],
            )
            .unwrap();
        db.connection()
            .execute_batch(
                r#"
                INSERT INTO characters (name, most_common_race, total_appearances) VALUES
                    ('Lily', 'Lily', 12),
                    ('Skeleton', 'Skeleton', 40),
                    ('Bob', 'wcjc3y2d8z', 3),
                    ('Nix', 'Dragonborn', 9),
                    ('Uturik', 'Uturik "Chinchillen" Rathen', 5);
                "#,
            )
            .unwrap();
        db
    }

    #[test]
    fn test_attack_candidates_use_length_threshold() {
        let db = seeded_db();
        let candidates = attack_candidates(&db.connection(), 40).unwrap();
        assert_eq!(candidates, vec![(2, LONG_ATTACK.to_string())]);
        assert_eq!(attack_candidates(&db.connection(), 4).unwrap().len(), 3);
    }

    #[test]
    fn test_race_candidates() {
        let db = seeded_db();
        let names: Vec<String> = race_candidates(&db.connection())
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Lily", "Uturik", "Bob"]);
    }

    #[test]
    fn test_suggest_attacks_writes_file() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("attack_suggestions.json");
        let mut ticks = Vec::new();

        let summary = suggest_attacks(
            &db.connection(),
            &HeuristicProvider,
            40,
            &output,
            10,
            |current, total| ticks.push((current, total)),
        )
        .unwrap();

        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(ticks, vec![(1, 1)]);
        let saved = load_suggestions(&output).unwrap();
        assert_eq!(saved[0].id, 2);
        assert_eq!(saved[0].cleaned_value.as_deref(), Some("Radiant Mace"));
    }

    #[test]
    fn test_failures_recorded_then_retried() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("race_suggestions.json");

        let failing = LlmSuggestionProvider::new(Box::new(MockClient::new(vec![
            Ok("STATUS: CORRUPT\nCLEANED: NULL\nCONFIDENCE: 99\nREASON: name".to_string()),
            Err(Error::Llm("timeout".to_string())),
            Ok("STATUS: CORRUPT\nCLEANED: NULL\nCONFIDENCE: 99\nREASON: id".to_string()),
        ])));
        let summary = suggest_races(&db.connection(), &failing, &output, 1, |_, _| {}).unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let saved = load_suggestions(&output).unwrap();
        assert_eq!(saved[1].status, SuggestionStatus::Failed);
        assert_eq!(saved[1].context.as_deref(), Some("Uturik"));

        // Only the failed candidate is asked again
        let summary = suggest_races(&db.connection(), &HeuristicProvider, &output, 1, |_, _| {})
            .unwrap();
        assert_eq!(summary.resumed, 2);
        assert_eq!(summary.succeeded, 1);
        let saved = load_suggestions(&output).unwrap();
        assert_eq!(saved.len(), 3);
        assert!(saved.iter().all(|s| s.status == SuggestionStatus::Success));
    }
}
