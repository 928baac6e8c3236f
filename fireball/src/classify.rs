//! fireball-classify - label characters as PC, NPC, Monster or Other
//!
//! A fixed rule table settles most characters; the rest go to the provider
//! selected by `cleaning.provider` in the config (or the text-completion
//! endpoint with `--llm`).

mod process_lock;

use anyhow::{Context, Result};
use clap::Parser;
use fireball_core::classify::{classify_characters, type_distribution};
use fireball_core::cleaning::create_provider;
use fireball_core::config::ProviderKind;
use fireball_core::{Config, Database};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_writer_guard;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fireball-classify")]
#[command(about = "Classify characters as PC, NPC, Monster or Other")]
#[command(version)]
struct Args {
    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Reclassify every character, not just those still Unknown
    #[arg(long)]
    all: bool,

    /// Send undecided characters to the configured [llm] endpoint
    #[arg(long)]
    llm: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let mut config = Config::load().context("failed to load configuration")?;
    let _log_guard = fireball_core::logging::init(&config.logging, "fireball-classify")
        .context("failed to initialize logging")?;

    tracing::info!("fireball-classify starting");

    if args.llm {
        config.cleaning.provider = ProviderKind::Llm;
    }
    let provider = create_provider(&config).context("failed to create suggestion provider")?;

    let db_path = args.db.unwrap_or_else(Config::database_path);
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }
    let _writer_guard = acquire_writer_guard(&db_path).context("failed to acquire process lock")?;

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());
    println!("Provider: {}", provider.name());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_message("characters");

    let mut conn = db.connection();
    let summary = classify_characters(&mut conn, provider.as_ref(), args.all, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })
    .context("classification failed")?;
    pb.finish_and_clear();

    println!("\nClassification complete:");
    println!("  Characters examined: {}", summary.examined);
    println!("  Settled by rules:    {}", summary.by_rule);
    println!("  Settled by provider: {}", summary.by_provider);
    println!("  Provider failures:   {}", summary.provider_failures);
    for (label, count) in &summary.by_type {
        println!("    {:<8} {}", label, count);
    }

    println!("\nStored distribution:");
    for (character_type, count, confidence) in
        type_distribution(&conn).context("failed to read character types")?
    {
        println!(
            "  {:<8} {:>6}  (avg confidence {:.2})",
            character_type.as_str(),
            count,
            confidence
        );
    }

    tracing::info!(
        examined = summary.examined,
        failures = summary.provider_failures,
        "fireball-classify complete"
    );
    Ok(())
}
