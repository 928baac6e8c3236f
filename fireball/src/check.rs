//! fireball-check - verify an existing store
//!
//! Prints row counts for every relational table, runs the referential
//! integrity and data-quality checks and exits non-zero when any check
//! finds violations. Nothing is repaired.

use anyhow::{Context, Result};
use clap::Parser;
use fireball_core::classify::type_distribution;
use fireball_core::verify::verify;
use fireball_core::{Config, Database};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fireball-check")]
#[command(about = "Verify row counts and referential integrity of the database")]
#[command(version)]
struct Args {
    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = fireball_core::logging::init(&config.logging, "fireball-check")
        .context("failed to initialize logging")?;

    let db_path = args.db.unwrap_or_else(Config::database_path);
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }

    tracing::info!(path = %db_path.display(), "Checking database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let conn = db.connection();
    let report = verify(&conn).context("verification failed")?;

    println!("Database: {}", db_path.display());
    println!("\nTable counts:");
    for (table, count) in &report.table_counts {
        println!("  {:<28} {}", table, count);
    }

    println!("\nIntegrity checks:");
    for check in &report.checks {
        let status = if check.violations == 0 { "ok" } else { "FAILED" };
        println!("  [{:>6}] {} ({})", status, check.name, check.violations);
    }

    if report.unparsed_classes > 0 {
        println!(
            "\nWarning: {} snapshot(s) with unparsed class text",
            report.unparsed_classes
        );
    }

    let distribution = type_distribution(&conn).context("failed to read character types")?;
    if !distribution.is_empty() {
        println!("\nCharacter types:");
        for (character_type, count, confidence) in distribution {
            println!(
                "  {:<8} {:>6}  (avg confidence {:.2})",
                character_type.as_str(),
                count,
                confidence
            );
        }
    }

    if !report.passed() {
        tracing::warn!(
            failures = report.failures().count(),
            "Integrity verification failed"
        );
        anyhow::bail!("integrity verification failed");
    }

    println!("\nVerification passed");
    Ok(())
}
