//! # fireball-core
//!
//! Core library for fireball - an ETL pipeline for the FIREBALL D&D combat
//! dataset.
//!
//! This library provides:
//! - Domain types for characters, actions and per-action snapshots
//! - Database storage layer with SQLite
//! - Field parsing for HP, class and race text
//! - Resumable loading of JSON / JSONL action records
//! - Cleaning passes (suggest, review, apply) and character classification
//! - Post-load verification and extract export
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 0 (Raw):** Input record files on disk (immutable)
//! - **Layer 1 (Canonical):** Normalized SQLite tables; actions keep their
//!   original command and automation arrays
//! - **Layer 2 (Derived):** Character aggregates and classifications
//!   (regenerable from Layer 1)
//!
//! ## Example
//!
//! ```rust,no_run
//! use fireball_core::{Config, Database, IngestCoordinator};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let coordinator = IngestCoordinator::new(db, config.load.batch_size);
//! let files = fireball_core::ingest::resolve_inputs(&["data/*.jsonl".to_string()])
//!     .expect("no input files");
//! let result = coordinator.load_files(&files).expect("load failed");
//! println!("{} actions loaded", result.actions_inserted);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, EntityResolver};
pub use error::{Error, Result};
pub use ingest::{IngestCoordinator, LoadResult};
pub use types::*;

// Public modules
pub mod aggregates;
pub mod classify;
pub mod cleaning;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fields;
pub mod ingest;
pub mod logging;
pub mod types;
pub mod verify;
