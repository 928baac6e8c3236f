//! Get-or-create mapping from natural-key names to stable ids.
//!
//! A resolver owns the name → id memo tables for one pipeline run. It is
//! passed by reference to the loader; nothing is cached globally.

use super::repo::lookup_entity;
use crate::error::Result;
use crate::types::EntityKind;
use rusqlite::{params, Connection};
use std::collections::HashMap;

/// Per-run entity resolver.
#[derive(Debug, Default)]
pub struct EntityResolver {
    memo: HashMap<(EntityKind, String), i64>,
    created: HashMap<EntityKind, usize>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a spell, attack or effect name (or a character without
    /// controller information).
    ///
    /// Returns `None` when the trimmed name is empty.
    pub fn get_or_create(
        &mut self,
        conn: &Connection,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<i64>> {
        self.resolve(conn, kind, name, None)
    }

    /// Resolve a character, recording `controller_id` if the character is new.
    pub fn get_or_create_character(
        &mut self,
        conn: &Connection,
        name: &str,
        controller_id: Option<&str>,
    ) -> Result<Option<i64>> {
        self.resolve(conn, EntityKind::Character, name, controller_id)
    }

    fn resolve(
        &mut self,
        conn: &Connection,
        kind: EntityKind,
        name: &str,
        controller_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let key = (kind, name.to_string());
        if let Some(id) = self.memo.get(&key) {
            return Ok(Some(*id));
        }

        let id = match lookup_entity(conn, kind, name)? {
            Some(id) => id,
            None => {
                match kind {
                    EntityKind::Character => {
                        conn.execute(
                            "INSERT INTO characters (name, controller_id) VALUES (?1, ?2)",
                            params![name, controller_id],
                        )?;
                    }
                    _ => {
                        conn.execute(
                            &format!(
                                "INSERT INTO {} ({}) VALUES (?1)",
                                kind.table(),
                                kind.name_column()
                            ),
                            [name],
                        )?;
                    }
                }
                *self.created.entry(kind).or_insert(0) += 1;
                tracing::trace!(kind = %kind, name, "Created entity");
                conn.last_insert_rowid()
            }
        };

        self.memo.insert(key, id);
        Ok(Some(id))
    }

    /// Number of entities of `kind` this resolver inserted.
    pub fn created(&self, kind: EntityKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_same_trimmed_name_same_id() {
        let db = test_db();
        let conn = db.connection();
        let mut resolver = EntityResolver::new();

        let a = resolver
            .get_or_create(&conn, EntityKind::Spell, "fireball")
            .unwrap();
        let b = resolver
            .get_or_create(&conn, EntityKind::Spell, "  fireball ")
            .unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(resolver.created(EntityKind::Spell), 1);

        // A fresh resolver (new run) finds the stored row
        let mut next_run = EntityResolver::new();
        let c = next_run
            .get_or_create(&conn, EntityKind::Spell, "fireball")
            .unwrap();
        assert_eq!(a, c);
        assert_eq!(next_run.created(EntityKind::Spell), 0);
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        let db = test_db();
        let conn = db.connection();
        let mut resolver = EntityResolver::new();

        let a = resolver
            .get_or_create(&conn, EntityKind::Attack, "Longsword")
            .unwrap();
        let b = resolver
            .get_or_create(&conn, EntityKind::Attack, "Shortsword")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_name_yields_none() {
        let db = test_db();
        let conn = db.connection();
        let mut resolver = EntityResolver::new();

        assert_eq!(
            resolver
                .get_or_create(&conn, EntityKind::Effect, "   ")
                .unwrap(),
            None
        );
        assert_eq!(resolver.created(EntityKind::Effect), 0);
    }

    #[test]
    fn test_character_records_first_controller() {
        let db = test_db();
        let mut resolver = EntityResolver::new();
        {
            let conn = db.connection();
            resolver
                .get_or_create_character(&conn, "Zariel", Some("1234"))
                .unwrap();
            resolver
                .get_or_create_character(&conn, "Zariel", Some("9999"))
                .unwrap();
        }

        let character = db.get_character_by_name("Zariel").unwrap().unwrap();
        assert_eq!(character.controller_id.as_deref(), Some("1234"));
    }
}
