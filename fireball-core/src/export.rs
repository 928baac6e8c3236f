//! Extract export.
//!
//! Writes the relational tables to a standalone SQLite extract file for BI
//! tooling. The extract carries the same table catalog with flat, typed
//! columns (`BIGINT`, `DOUBLE`, `TEXT`) and no keys or indexes. Every export
//! is verified by comparing row counts and per-column checksums against the
//! source store.

use crate::db::TABLES;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Schema alias the extract file is attached under.
const EXTRACT_SCHEMA: &str = "extract";

/// Column type in the extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractType {
    BigInt,
    Double,
    Text,
}

impl ExtractType {
    /// Map a declared SQLite column type.
    fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("INT") {
            ExtractType::BigInt
        } else if declared.contains("REAL") || declared.contains("DOUB") || declared.contains("FLOA") {
            ExtractType::Double
        } else {
            ExtractType::Text
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ExtractType::BigInt => "BIGINT",
            ExtractType::Double => "DOUBLE",
            ExtractType::Text => "TEXT",
        }
    }
}

/// One extract column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractColumn {
    pub name: String,
    pub column_type: ExtractType,
    pub not_null: bool,
}

/// Rows written per table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableExport {
    pub table: &'static str,
    pub rows: i64,
    pub columns: usize,
}

/// Outcome of an export (or a verification of an existing extract).
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub tables: Vec<TableExport>,
}

impl ExportReport {
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Export every relational table to `path`, replacing any existing file,
/// then verify the result.
pub fn export_extract(conn: &Connection, path: &Path) -> Result<ExportReport> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        tracing::info!(path = %path.display(), "Replacing existing extract");
        std::fs::remove_file(path)?;
    }

    with_attached(conn, path, |conn| {
        conn.execute_batch("BEGIN")?;
        let result = TABLES.iter().try_for_each(|&table| -> Result<()> {
            let columns = source_columns(conn, table)?;
            create_extract_table(conn, table, &columns)?;
            let column_list = quoted_list(&columns);
            let copied = conn.execute(
                &format!(
                    "INSERT INTO {EXTRACT_SCHEMA}.{table} ({column_list})
                     SELECT {column_list} FROM main.{table}"
                ),
                [],
            )?;
            tracing::debug!(table, rows = copied, "Exported table");
            Ok(())
        });
        match result {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
        }
        Ok(())
    })?;

    let report = verify_extract(conn, path)?;
    tracing::info!(
        path = %path.display(),
        tables = report.tables.len(),
        rows = report.total_rows(),
        "Extract written and verified"
    );
    Ok(report)
}

/// Compare an extract against the store: per-table row counts, and per
/// column the non-null count plus a checksum (`TOTAL(col)` for numbers,
/// `TOTAL(LENGTH(col))` for text).
pub fn verify_extract(conn: &Connection, path: &Path) -> Result<ExportReport> {
    if !path.exists() {
        return Err(Error::NotFound(format!("extract {}", path.display())));
    }

    let tables = with_attached(conn, path, |conn| {
        TABLES
            .iter()
            .map(|&table| -> Result<TableExport> {
                let columns = source_columns(conn, table)?;
                let source = table_fingerprint(conn, "main", table, &columns)?;
                let extract = table_fingerprint(conn, EXTRACT_SCHEMA, table, &columns)?;
                if source != extract {
                    return Err(Error::Export(format!(
                        "{table}: extract does not match store (store rows {}, extract rows {})",
                        source.first().copied().unwrap_or_default(),
                        extract.first().copied().unwrap_or_default()
                    )));
                }
                Ok(TableExport {
                    table,
                    rows: source.first().map(|r| *r as i64).unwrap_or_default(),
                    columns: columns.len(),
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(ExportReport {
        path: path.to_path_buf(),
        tables,
    })
}

/// Columns of a source table with their extract types.
pub fn source_columns(conn: &Connection, table: &str) -> Result<Vec<ExtractColumn>> {
    let mut stmt = conn.prepare(&format!("PRAGMA main.table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| {
            let declared: String = row.get(2)?;
            let not_null: bool = row.get(3)?;
            let pk: i64 = row.get(5)?;
            Ok(ExtractColumn {
                name: row.get(1)?,
                column_type: ExtractType::from_declared(&declared),
                // Primary keys are always populated even when not declared NOT NULL
                not_null: not_null || pk > 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Error::NotFound(format!("table {table}")));
    }
    Ok(columns)
}

fn create_extract_table(conn: &Connection, table: &str, columns: &[ExtractColumn]) -> Result<()> {
    let definitions = columns
        .iter()
        .map(|c| {
            format!(
                "\"{}\" {}{}",
                c.name,
                c.column_type.as_sql(),
                if c.not_null { " NOT NULL" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!("CREATE TABLE {EXTRACT_SCHEMA}.{table} ({definitions})"),
        [],
    )?;
    Ok(())
}

/// Row count followed by (non-null count, checksum) per column.
fn table_fingerprint(
    conn: &Connection,
    schema: &str,
    table: &str,
    columns: &[ExtractColumn],
) -> Result<Vec<f64>> {
    let mut expressions = vec!["COUNT(*)".to_string()];
    for column in columns {
        let name = format!("\"{}\"", column.name);
        expressions.push(format!("COUNT({name})"));
        expressions.push(match column.column_type {
            ExtractType::Text => format!("TOTAL(LENGTH({name}))"),
            ExtractType::BigInt | ExtractType::Double => format!("TOTAL({name})"),
        });
    }

    let sql = format!("SELECT {} FROM {schema}.{table}", expressions.join(", "));
    let fingerprint = conn
        .query_row(&sql, [], |row| {
            (0..expressions.len())
                .map(|i| row.get::<_, f64>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(_, Some(message)) => {
                Error::Export(format!("{schema}.{table}: {message}"))
            }
            other => Error::from(other),
        })?;
    Ok(fingerprint)
}

fn quoted_list(columns: &[ExtractColumn]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run `f` with the extract attached, detaching afterwards even on error.
fn with_attached<T>(
    conn: &Connection,
    path: &Path,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {EXTRACT_SCHEMA}"),
        [path.to_string_lossy().into_owned()],
    )?;
    let result = f(conn);
    conn.execute_batch(&format!("DETACH DATABASE {EXTRACT_SCHEMA}"))?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.connection()
            .execute_batch(
                r#"
                INSERT INTO characters (name, most_common_class, total_appearances, classification_confidence)
                    VALUES ('Zariel', 'Paladin', 1, 0.9);
                INSERT INTO spells (spell_name) VALUES ('fireball');
                INSERT INTO actions (current_actor_id, commands_json) VALUES (1, '["!cast fireball"]');
                INSERT INTO character_snapshots (action_id, character_id, snapshot_type, hp_current, hp_max, hp_percentage)
                    VALUES (1, 1, 'current_actor', 30, 40, 75.0);
                INSERT INTO character_snapshot_spells VALUES (1, 1);
                INSERT INTO spell_casts (action_id, character_id, spell_id, damage_dealt, target_count)
                    VALUES (1, 1, 1, 24, 2);
                "#,
            )
            .unwrap();
        db
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(ExtractType::from_declared("INTEGER"), ExtractType::BigInt);
        assert_eq!(ExtractType::from_declared("REAL"), ExtractType::Double);
        assert_eq!(ExtractType::from_declared("JSON"), ExtractType::Text);
        assert_eq!(ExtractType::from_declared("DATETIME"), ExtractType::Text);
    }

    #[test]
    fn test_export_round_trip() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fireball.extract.db");

        let report = export_extract(&db.connection(), &path).unwrap();
        assert_eq!(report.tables.len(), TABLES.len());
        assert_eq!(report.total_rows(), 6);

        let extract = Connection::open(&path).unwrap();
        let (declared, not_null): (String, bool) = extract
            .query_row(
                "SELECT type, \"notnull\" FROM pragma_table_info('character_snapshots') WHERE name = 'hp_percentage'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(declared, "DOUBLE");
        assert!(!not_null);
        let commands: String = extract
            .query_row("SELECT commands_json FROM actions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(commands, r#"["!cast fireball"]"#);
    }

    #[test]
    fn test_export_replaces_existing_file() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fireball.extract.db");

        export_extract(&db.connection(), &path).unwrap();
        let report = export_extract(&db.connection(), &path).unwrap();
        assert_eq!(report.total_rows(), 6);
    }

    #[test]
    fn test_tampered_extract_fails_verification() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fireball.extract.db");
        export_extract(&db.connection(), &path).unwrap();

        {
            let extract = Connection::open(&path).unwrap();
            extract
                .execute("UPDATE spell_casts SET damage_dealt = 25", [])
                .unwrap();
        }

        let verified = verify_extract(&db.connection(), &path);
        match verified {
            Err(Error::Export(message)) => assert!(message.contains("spell_casts")),
            other => panic!("expected export error, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_missing_extract() {
        let db = seeded_db();
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            verify_extract(&db.connection(), &dir.path().join("missing.db")),
            Err(Error::NotFound(_))
        ));
    }
}
