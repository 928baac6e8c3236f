//! fireball-clean - suggest, review and apply cleaning passes
//!
//! Suggest passes write a JSON suggestions file that can be reviewed or
//! edited before an apply pass reads it back:
//!
//! ```text
//! fireball-clean suggest-attacks          # -> attack_suggestions.json
//! fireball-clean apply-attacks --dry-run  # report merges and renames
//! fireball-clean apply-attacks            # write them
//! ```
//!
//! Suggestion files default to the XDG data directory next to the database.

mod process_lock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fireball_core::cleaning::{
    apply_entity_suggestions, apply_race_suggestions, create_provider, load_suggestions,
    normalize_classes, suggest_attacks, suggest_races, AdvisorSummary,
};
use fireball_core::config::ProviderKind;
use fireball_core::{aggregates, Config, Database, EntityKind};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_writer_guard;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "fireball-clean")]
#[command(about = "Suggest and apply cleaning passes over the database")]
#[command(version)]
struct Args {
    /// Database path (defaults to the XDG data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect cleaned-name suggestions for long attack names
    SuggestAttacks {
        /// Suggestions file to write (resumes if it exists)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Minimum attack name length (overrides config)
        #[arg(long)]
        min_length: Option<usize>,

        /// Use the configured [llm] endpoint instead of the config's provider
        #[arg(long)]
        llm: bool,
    },

    /// Collect race assessments for characters with suspicious races
    SuggestRaces {
        /// Suggestions file to write (resumes if it exists)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Use the configured [llm] endpoint instead of the config's provider
        #[arg(long)]
        llm: bool,
    },

    /// Merge or rename entities from a name suggestions file
    ApplyAttacks {
        /// Suggestions file to read
        #[arg(long)]
        input: Option<PathBuf>,

        /// Entity kind the suggestions refer to
        #[arg(long, value_enum, default_value_t = NamedKind::Attack)]
        kind: NamedKind,

        /// Minimum confidence to apply (overrides config)
        #[arg(long)]
        min_confidence: Option<u8>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Rewrite corrupt snapshot races from a race suggestions file
    ApplyRaces {
        /// Suggestions file to read
        #[arg(long)]
        input: Option<PathBuf>,

        /// Minimum confidence to apply (overrides config)
        #[arg(long)]
        min_confidence: Option<u8>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-parse snapshot class text and optionally prune non-standard classes
    NormalizeClasses {
        /// Delete snapshots whose primary class is not a standard class
        #[arg(long)]
        prune: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Recompute every character's aggregates
    Aggregates,
}

/// Entities that carry snapshot links and can be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NamedKind {
    Attack,
    Spell,
    Effect,
}

impl From<NamedKind> for EntityKind {
    fn from(kind: NamedKind) -> Self {
        match kind {
            NamedKind::Attack => EntityKind::Attack,
            NamedKind::Spell => EntityKind::Spell,
            NamedKind::Effect => EntityKind::Effect,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let mut config = Config::load().context("failed to load configuration")?;
    let _log_guard = fireball_core::logging::init(&config.logging, "fireball-clean")
        .context("failed to initialize logging")?;

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }
    let _writer_guard = acquire_writer_guard(&db_path).context("failed to acquire process lock")?;

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    match args.command {
        Command::SuggestAttacks {
            output,
            min_length,
            llm,
        } => {
            if llm {
                config.cleaning.provider = ProviderKind::Llm;
            }
            let provider = create_provider(&config).context("failed to create suggestion provider")?;
            let output = output.unwrap_or_else(|| Config::suggestions_path("attack"));
            let min_length = min_length.unwrap_or(config.cleaning.attack_min_length);

            let pb = progress_bar("attacks")?;
            let summary = suggest_attacks(
                &db.connection(),
                provider.as_ref(),
                min_length,
                &output,
                config.cleaning.save_every,
                |done, total| {
                    pb.set_length(total as u64);
                    pb.set_position(done as u64);
                },
            )
            .context("attack suggestions failed")?;
            pb.finish_and_clear();
            print_advisor_summary("Attack suggestions", &summary);
        }

        Command::SuggestRaces { output, llm } => {
            if llm {
                config.cleaning.provider = ProviderKind::Llm;
            }
            let provider = create_provider(&config).context("failed to create suggestion provider")?;
            let output = output.unwrap_or_else(|| Config::suggestions_path("race"));

            let pb = progress_bar("races")?;
            let summary = suggest_races(
                &db.connection(),
                provider.as_ref(),
                &output,
                config.cleaning.save_every,
                |done, total| {
                    pb.set_length(total as u64);
                    pb.set_position(done as u64);
                },
            )
            .context("race suggestions failed")?;
            pb.finish_and_clear();
            print_advisor_summary("Race suggestions", &summary);
        }

        Command::ApplyAttacks {
            input,
            kind,
            min_confidence,
            dry_run,
        } => {
            let kind = EntityKind::from(kind);
            let input = input.unwrap_or_else(|| Config::suggestions_path(kind.as_str()));
            let suggestions = read_suggestions(&input)?;
            let min_confidence = min_confidence.unwrap_or(config.cleaning.min_confidence);

            let summary = apply_entity_suggestions(
                &mut db.connection(),
                kind,
                &suggestions,
                min_confidence,
                dry_run,
            )
            .context("failed to apply name suggestions")?;

            println!(
                "\n{} name suggestions{}:",
                kind,
                if dry_run { " (dry run)" } else { "" }
            );
            println!("  Renamed:          {}", summary.renamed);
            println!("  Merged:           {}", summary.merged);
            println!("  Unchanged:        {}", summary.unchanged);
            println!("  Below threshold:  {}", summary.skipped);
            println!("  Missing entities: {}", summary.missing);
            println!("  Links redirected: {}", summary.links_redirected);
            println!("  Links dropped:    {}", summary.links_dropped);
        }

        Command::ApplyRaces {
            input,
            min_confidence,
            dry_run,
        } => {
            let input = input.unwrap_or_else(|| Config::suggestions_path("race"));
            let suggestions = read_suggestions(&input)?;
            let min_confidence = min_confidence.unwrap_or(config.cleaning.min_confidence);

            let summary =
                apply_race_suggestions(&mut db.connection(), &suggestions, min_confidence, dry_run)
                    .context("failed to apply race suggestions")?;

            println!(
                "\nRace suggestions{}:",
                if dry_run { " (dry run)" } else { "" }
            );
            println!("  Kept as valid:     {}", summary.kept);
            println!("  Simplified:        {}", summary.simplified);
            println!("  Cleared:           {}", summary.nulled);
            println!("  Skipped:           {}", summary.skipped);
            println!("  Snapshots updated: {}", summary.snapshots_updated);
        }

        Command::NormalizeClasses { prune, dry_run } => {
            let summary = normalize_classes(&mut db.connection(), prune, dry_run)
                .context("class normalization failed")?;

            println!(
                "\nClass normalization{}:",
                if dry_run { " (dry run)" } else { "" }
            );
            println!("  Snapshots examined: {}", summary.examined);
            println!("  Snapshots updated:  {}", summary.updated);
            if prune {
                println!("  Snapshots pruned:   {}", summary.pruned);
                println!("  Links removed:      {}", summary.links_removed);
            }
        }

        Command::Aggregates => {
            let updated = aggregates::recompute_all(&mut db.connection())
                .context("failed to recompute aggregates")?;
            println!("\nAggregates recomputed for {} character(s)", updated);
        }
    }

    tracing::info!("fireball-clean complete");
    Ok(())
}

fn read_suggestions(path: &Path) -> Result<Vec<fireball_core::cleaning::Suggestion>> {
    if !path.exists() {
        anyhow::bail!("suggestions file not found: {}", path.display());
    }
    println!("Suggestions: {}", path.display());
    load_suggestions(path).with_context(|| format!("failed to read {}", path.display()))
}

fn progress_bar(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

fn print_advisor_summary(title: &str, summary: &AdvisorSummary) {
    println!("\n{title}:");
    println!("  Candidates: {}", summary.candidates);
    println!("  Resumed:    {}", summary.resumed);
    println!("  Succeeded:  {}", summary.succeeded);
    println!("  Failed:     {}", summary.failed);
    println!("  Written to: {}", summary.output.display());
}
