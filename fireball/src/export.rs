//! fireball-export - write the relational tables to an extract file
//!
//! The extract is a standalone SQLite file with the same table catalog and
//! flat typed columns. An existing extract is replaced, and every export is
//! verified against the store before the command succeeds.

mod process_lock;

use anyhow::{Context, Result};
use clap::Parser;
use fireball_core::export::{export_extract, verify_extract, ExportReport};
use fireball_core::{Config, Database};
use process_lock::acquire_writer_guard;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fireball-export")]
#[command(about = "Export the database to a verified extract file")]
#[command(version)]
struct Args {
    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Extract path (defaults to fireball.extract.db next to the database)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Only verify an existing extract, do not rewrite it
    #[arg(long)]
    verify_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = fireball_core::logging::init(&config.logging, "fireball-export")
        .context("failed to initialize logging")?;

    tracing::info!("fireball-export starting");

    let db_path = args.db.unwrap_or_else(Config::database_path);
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }
    let out = args.out.unwrap_or_else(Config::extract_path);

    // The store must not change while it is copied and checksummed
    let _writer_guard = acquire_writer_guard(&db_path).context("failed to acquire process lock")?;

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let conn = db.connection();
    let report = if args.verify_only {
        verify_extract(&conn, &out).context("extract verification failed")?
    } else {
        export_extract(&conn, &out).context("export failed")?
    };

    print_export_report(&report, args.verify_only);
    Ok(())
}

fn print_export_report(report: &ExportReport, verify_only: bool) {
    println!("Extract: {}", report.path.display());
    println!(
        "\n{}:",
        if verify_only {
            "Extract verified"
        } else {
            "Export complete"
        }
    );
    for table in &report.tables {
        println!(
            "  {:<28} {:>8} rows  {:>3} columns",
            table.table, table.rows, table.columns
        );
    }
    println!("  Total rows: {}", report.total_rows());
}
