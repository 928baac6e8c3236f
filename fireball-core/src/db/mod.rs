//! Database layer for fireball
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Transaction-scoped inserts and the entity resolver used by the loader

pub mod repo;
pub mod resolver;
pub mod schema;
pub mod writes;

pub use repo::{count_rows, get_checkpoint, lookup_entity, Database};
pub use resolver::EntityResolver;
pub use schema::TABLES;
