//! Ingestion layer for dataset files
//!
//! This module loads raw action records (JSON arrays or JSONL) into the
//! normalized relational store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Input Files    │ ──► │ IngestCoordinator│ ──► │    Database     │
//! │ (*.json/.jsonl) │     │  (checkpoints)   │     │ (actions, etc)  │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  load_record         │
//!                    │  ├─ fields           │
//!                    │  └─ EntityResolver   │
//!                    └──────────────────────┘
//! ```
//!
//! Records are committed in batches. Each batch also advances the file's
//! checkpoint in `source_files`, so an interrupted load resumes after the
//! last committed batch.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fireball_core::{Config, Database};
//! use fireball_core::ingest::IngestCoordinator;
//!
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//! let coordinator = IngestCoordinator::new(db, 100);
//! let files = fireball_core::ingest::resolve_inputs(&["data/*.jsonl".to_string()])?;
//! let result = coordinator.load_files(&files)?;
//! println!("Loaded {} actions from {} files", result.actions_inserted, result.files_processed);
//! ```

pub mod loader;
pub mod record;

pub use loader::{load_record, RecordStats};
pub use record::{ActionRecord, CharacterState};

use crate::db::{get_checkpoint, writes, Database, EntityResolver};
use crate::error::{Error, Result};
use crate::types::{EntityKind, SourceFileCheckpoint};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Result of a load run across all input files.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Number of files processed
    pub files_processed: usize,
    /// Number of files skipped (already fully loaded)
    pub files_skipped: usize,
    /// Records read and written
    pub records_loaded: usize,
    /// Actions inserted
    pub actions_inserted: usize,
    /// Snapshots inserted
    pub snapshots_inserted: usize,
    /// Snapshot junction links inserted
    pub links_inserted: usize,
    /// Spell cast facts inserted
    pub spell_casts_inserted: usize,
    /// Damage event facts inserted
    pub damage_events_inserted: usize,
    /// Characters created
    pub characters_created: usize,
    /// Actions removed because their source file changed
    pub actions_removed: usize,
    /// Errors encountered (file path → error message)
    pub errors: Vec<(PathBuf, String)>,
    /// Warnings (malformed records, changed files)
    pub warnings: Vec<String>,
}

/// Why a file was not (fully) loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Content hash matches a completed checkpoint
    AlreadyLoaded,
    /// File contains no records
    EmptyFile,
}

/// Records parsed from one input file. Malformed records are kept as
/// error strings so their positions still count toward the checkpoint.
pub struct ParsedFile {
    pub content_hash: String,
    pub records: Vec<std::result::Result<ActionRecord, String>>,
}

/// Coordinates loading of input files into the database.
pub struct IngestCoordinator {
    db: Database,
    batch_size: usize,
}

impl IngestCoordinator {
    /// Create a coordinator committing every `batch_size` records.
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
        }
    }

    /// Access the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Consume the coordinator, returning the database.
    pub fn into_database(self) -> Database {
        self.db
    }

    /// Load every file.
    pub fn load_files(&self, files: &[PathBuf]) -> Result<LoadResult> {
        self.load_files_with_progress(files, |_, _, _| {})
    }

    /// Load every file with progress callback.
    ///
    /// The callback receives `(records_done, records_total, file_path)` after
    /// each committed batch. A file that fails to read or parse is recorded
    /// in `errors` and the run moves on to the next file.
    pub fn load_files_with_progress<F>(
        &self,
        files: &[PathBuf],
        mut on_progress: F,
    ) -> Result<LoadResult>
    where
        F: FnMut(usize, usize, &Path),
    {
        let mut result = LoadResult::default();
        let mut resolver = EntityResolver::new();

        for path in files {
            let parsed = match read_records(path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read input file");
                    result.errors.push((path.clone(), e.to_string()));
                    continue;
                }
            };

            match self.load_parsed(path, &parsed, &mut resolver, &mut result, &mut on_progress)? {
                Some(reason) => {
                    tracing::info!(path = %path.display(), ?reason, "Skipping file");
                    result.files_skipped += 1;
                }
                None => result.files_processed += 1,
            }
        }

        result.characters_created = resolver.created(EntityKind::Character);

        tracing::info!(
            files_processed = result.files_processed,
            files_skipped = result.files_skipped,
            actions = result.actions_inserted,
            actions_removed = result.actions_removed,
            snapshots = result.snapshots_inserted,
            characters = result.characters_created,
            warnings = result.warnings.len(),
            errors = result.errors.len(),
            "Load complete"
        );

        Ok(result)
    }

    fn load_parsed<F>(
        &self,
        path: &Path,
        parsed: &ParsedFile,
        resolver: &mut EntityResolver,
        result: &mut LoadResult,
        on_progress: &mut F,
    ) -> Result<Option<SkipReason>>
    where
        F: FnMut(usize, usize, &Path),
    {
        let key = checkpoint_key(path);
        let total = parsed.records.len();
        if total == 0 {
            return Ok(Some(SkipReason::EmptyFile));
        }

        let mut conn = self.db.connection();

        let (start, mut purge_previous) = match get_checkpoint(&conn, &key)? {
            Some(cp) if cp.content_hash == parsed.content_hash => {
                if cp.is_complete() {
                    return Ok(Some(SkipReason::AlreadyLoaded));
                }
                tracing::info!(path = %key, resume_at = cp.records_loaded, "Resuming file");
                (cp.records_loaded.max(0) as usize, false)
            }
            Some(_) => {
                let message = format!("{key}: content changed since last load, reloading from start");
                tracing::warn!(path = %key, "Content changed since last load");
                result.warnings.push(message);
                (0, true)
            }
            None => (0, false),
        };

        let mut done = start;
        while done < total {
            let end = (done + self.batch_size).min(total);
            let tx = conn.transaction()?;

            // Rows from the earlier version go in the same commit as the first new batch
            if purge_previous {
                let removed = writes::delete_source_actions(&tx, &key)?;
                tracing::info!(path = %key, removed, "Removed actions from previous load");
                result.actions_removed += removed;
                purge_previous = false;
            }

            for (offset, record) in parsed.records[done..end].iter().enumerate() {
                match record {
                    Ok(record) => {
                        let stats = load_record(&tx, resolver, record, Some(key.as_str()))?;
                        result.records_loaded += 1;
                        result.actions_inserted += 1;
                        result.snapshots_inserted += stats.snapshots;
                        result.links_inserted += stats.links;
                        result.spell_casts_inserted += stats.spell_casts;
                        result.damage_events_inserted += stats.damage_events;
                    }
                    Err(message) => {
                        let index = done + offset;
                        tracing::warn!(path = %key, index, error = %message, "Skipping malformed record");
                        result
                            .warnings
                            .push(format!("{key}: record {index}: {message}"));
                    }
                }
            }

            writes::upsert_checkpoint(
                &tx,
                &SourceFileCheckpoint {
                    path: key.clone(),
                    content_hash: parsed.content_hash.clone(),
                    records_total: total as i64,
                    records_loaded: end as i64,
                    loaded_at: Utc::now(),
                },
            )?;
            tx.commit()?;

            tracing::debug!(path = %key, committed = end, total, "Committed batch");
            done = end;
            on_progress(done, total, path);
        }

        Ok(None)
    }
}

/// Expand file paths and glob patterns into a sorted, de-duplicated file list.
///
/// Fails when no pattern matches any file.
pub fn resolve_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let literal = PathBuf::from(pattern);
        if literal.is_file() {
            files.push(literal);
            continue;
        }
        for entry in glob::glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Unreadable glob entry"),
            }
        }
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(Error::Input {
            path: patterns.join(" "),
            message: "no input files matched".to_string(),
        });
    }
    Ok(files)
}

/// Read and hash one input file.
///
/// `.jsonl` files hold one record per line; anything else is read as a JSON
/// array of records (or a single record object).
pub fn read_records(path: &Path) -> Result<ParsedFile> {
    let bytes = std::fs::read(path)?;
    let content_hash = hex::encode(Sha256::digest(&bytes));
    let text = String::from_utf8_lossy(&bytes);

    let is_jsonl = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);

    let records = if is_jsonl {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<ActionRecord>(line).map_err(|e| e.to_string()))
            .collect()
    } else {
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| Error::Input {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value::<ActionRecord>(item).map_err(|e| e.to_string())
                })
                .collect(),
            serde_json::Value::Object(_) => {
                vec![serde_json::from_value::<ActionRecord>(value).map_err(|e| e.to_string())]
            }
            _ => {
                return Err(Error::Input {
                    path: path.display().to_string(),
                    message: "expected a JSON array of action records".to_string(),
                })
            }
        }
    };

    Ok(ParsedFile {
        content_hash,
        records,
    })
}

/// Stable checkpoint key for a file (canonical path when resolvable).
fn checkpoint_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const ZARIEL: &str = r#"{"current_actor": {"name": "Zariel", "class": "Paladin 5"}, "commands_norm": ["!cast fireball -t goblin"], "automation_results": ["goblin took 12 damage"]}"#;
    const GOBLIN: &str = r#"{"combat_state_before": [{"name": "Goblin 1", "hp": "<7/7 HP; Healthy>"}]}"#;

    fn write_file(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn coordinator(batch_size: usize) -> IngestCoordinator {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        IngestCoordinator::new(db, batch_size)
    }

    #[test]
    fn test_jsonl_malformed_line_is_warning() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.jsonl", &[ZARIEL, "{not json", GOBLIN]);

        let coordinator = coordinator(100);
        let result = coordinator.load_files(&[path]).unwrap();

        assert_eq!(result.files_processed, 1);
        assert_eq!(result.actions_inserted, 2);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.characters_created, 2);
    }

    #[test]
    fn test_reload_of_unchanged_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.jsonl", &[ZARIEL, GOBLIN]);

        let coordinator = coordinator(1);
        coordinator.load_files(&[path.clone()]).unwrap();
        let second = coordinator.load_files(&[path]).unwrap();

        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.actions_inserted, 0);
        assert_eq!(coordinator.database().table_count("actions").unwrap(), 2);
    }

    #[test]
    fn test_partial_checkpoint_resumes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.jsonl", &[ZARIEL, GOBLIN, GOBLIN]);
        let parsed = read_records(&path).unwrap();

        let coordinator = coordinator(1);
        {
            // Simulate a crash after the first committed batch
            let conn = coordinator.database().connection();
            writes::upsert_checkpoint(
                &conn,
                &SourceFileCheckpoint {
                    path: checkpoint_key(&path),
                    content_hash: parsed.content_hash.clone(),
                    records_total: 3,
                    records_loaded: 1,
                    loaded_at: Utc::now(),
                },
            )
            .unwrap();
        }

        let mut progress = Vec::new();
        let result = coordinator
            .load_files_with_progress(&[path], |done, total, _| progress.push((done, total)))
            .unwrap();

        assert_eq!(result.actions_inserted, 2);
        assert_eq!(progress, vec![(2, 3), (3, 3)]);
    }

    #[test]
    fn test_changed_file_reloads_with_warning() {
        crate::logging::init_test();
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.jsonl", &[ZARIEL]);

        let coordinator = coordinator(100);
        coordinator.load_files(&[path.clone()]).unwrap();

        write_file(&dir, "a.jsonl", &[ZARIEL, GOBLIN]);
        let result = coordinator.load_files(&[path]).unwrap();

        assert_eq!(result.actions_inserted, 2);
        assert_eq!(result.actions_removed, 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("content changed"));

        let db = coordinator.database();
        assert_eq!(db.table_count("actions").unwrap(), 2);
        assert_eq!(db.table_count("spell_casts").unwrap(), 1);
        assert_eq!(db.table_count("damage_events").unwrap(), 1);
        assert_eq!(db.table_count("character_snapshots").unwrap(), 2);
    }

    #[test]
    fn test_json_array_and_bad_file() {
        let dir = TempDir::new().unwrap();
        let array = dir.path().join("records.json");
        std::fs::write(&array, format!("[{ZARIEL}, {GOBLIN}]")).unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "[{").unwrap();

        let coordinator = coordinator(100);
        let result = coordinator.load_files(&[array, broken]).unwrap();

        assert_eq!(result.files_processed, 1);
        assert_eq!(result.actions_inserted, 2);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_resolve_inputs() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "b.jsonl", &[GOBLIN]);
        write_file(&dir, "a.jsonl", &[GOBLIN]);

        let pattern = format!("{}/*.jsonl", dir.path().display());
        let files = resolve_inputs(&[pattern.clone(), pattern]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.jsonl"));

        let missing = format!("{}/*.nothing", dir.path().display());
        assert!(resolve_inputs(&[missing]).is_err());
    }
}
