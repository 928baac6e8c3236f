//! fireball-load - load FIREBALL action records into the relational store
//!
//! Reads JSON arrays or JSONL files (paths or glob patterns), writes
//! normalized rows, recomputes character aggregates and verifies the
//! result. Loading is resumable: fully loaded files are skipped and
//! partially loaded files continue from their checkpoint.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/fireball/fireball.db (~/.local/share/fireball/fireball.db)
//! - Logs: $XDG_STATE_HOME/fireball/fireball-load.log.YYYY-MM-DD
//! - Config: $XDG_CONFIG_HOME/fireball/config.toml (~/.config/fireball/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use fireball_core::ingest::{resolve_inputs, IngestCoordinator, LoadResult};
use fireball_core::verify::{verify, IntegrityReport};
use fireball_core::{aggregates, Config, Database};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_writer_guard;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fireball-load")]
#[command(about = "Load FIREBALL action records into the database")]
#[command(version)]
struct Args {
    /// Input files or glob patterns (*.json arrays, *.jsonl lines)
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Delete the existing database before loading
    #[arg(long)]
    fresh: bool,

    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Records committed per transaction (overrides config)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Skip post-load verification
    #[arg(long)]
    skip_verify: bool,

    /// Verbose output (-v per-file warnings and table counts)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = fireball_core::logging::init(&config.logging, "fireball-load")
        .context("failed to initialize logging")?;

    tracing::info!("fireball-load starting");

    let files = resolve_inputs(&args.inputs).context("failed to resolve input files")?;

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    let _writer_guard = acquire_writer_guard(&db_path).context("failed to acquire process lock")?;

    if args.fresh {
        let existed = Database::remove_store(&db_path).context("failed to delete database")?;
        if existed {
            println!(
                "Warning: --fresh deleted the existing database at {}",
                db_path.display()
            );
        }
    }

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());
    println!("Input files: {}", files.len());

    let batch_size = args.batch_size.unwrap_or(config.load.batch_size);
    let coordinator = IngestCoordinator::new(db, batch_size);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let result = coordinator
        .load_files_with_progress(&files, |current, total, path| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
            pb.set_message(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("...")
                    .to_string(),
            );
        })
        .context("load failed")?;

    pb.finish_and_clear();
    print_load_result(&result, args.verbose);

    let db = coordinator.into_database();
    let updated = {
        let mut conn = db.connection();
        aggregates::recompute_all(&mut conn).context("failed to recompute aggregates")?
    };
    println!("\nAggregates recomputed for {} character(s)", updated);

    tracing::info!(
        files_processed = result.files_processed,
        actions_inserted = result.actions_inserted,
        "fireball-load complete"
    );

    if !args.skip_verify {
        let report = verify(&db.connection()).context("verification failed")?;
        print_integrity_report(&report, args.verbose);
        if !report.passed() {
            anyhow::bail!("integrity verification failed");
        }
    }

    if !result.errors.is_empty() {
        anyhow::bail!("{} input file(s) failed to load", result.errors.len());
    }

    Ok(())
}

fn print_load_result(result: &LoadResult, verbose: u8) {
    println!("\nLoad complete:");
    println!("  Files processed:    {}", result.files_processed);
    println!("  Files skipped:      {}", result.files_skipped);
    println!("  Records loaded:     {}", result.records_loaded);
    println!("  Actions inserted:   {}", result.actions_inserted);
    if result.actions_removed > 0 {
        println!("  Actions replaced:   {}", result.actions_removed);
    }
    println!("  Snapshots inserted: {}", result.snapshots_inserted);
    println!("  Links inserted:     {}", result.links_inserted);
    println!("  Spell casts:        {}", result.spell_casts_inserted);
    println!("  Damage events:      {}", result.damage_events_inserted);
    println!("  Characters created: {}", result.characters_created);

    if !result.warnings.is_empty() {
        println!("\nWarnings: {}", result.warnings.len());
        if verbose >= 1 {
            for warning in &result.warnings {
                println!("  {}", warning);
            }
        }
    }

    if !result.errors.is_empty() {
        println!("\nErrors ({}):", result.errors.len());
        for (path, err) in &result.errors {
            println!("  {}: {}", path.display(), err);
        }
    }
}

fn print_integrity_report(report: &IntegrityReport, verbose: u8) {
    if verbose >= 1 {
        println!("\nTable counts:");
        for (table, count) in &report.table_counts {
            println!("  {:<28} {}", table, count);
        }
    }

    if report.unparsed_classes > 0 {
        println!(
            "\nWarning: {} snapshot(s) with unparsed class text",
            report.unparsed_classes
        );
    }

    if report.passed() {
        println!("\nVerification passed");
    } else {
        println!("\nVerification FAILED:");
        for check in report.failures() {
            println!("  {}: {} violation(s)", check.name, check.violations);
        }
    }
}
