//! Persistent project properties
//!
//! Properties are namespaced by `(qualifier, name)` pairs and scoped to a project.
//! The filesystem store keeps them in a small SQLite database next to the
//! workspace; the connection carries its credentials, proxy settings, online flag
//! and per-path response stamps here.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::errors::{ModelError, Result};

/// Qualifier used for every property written by this crate
pub const PLUGIN_ID: &str = "bigsync";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub qualifier: String,
    pub name: String,
}

impl PropertyKey {
    pub fn new(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            name: name.into(),
        }
    }

    /// Key in this crate's own namespace
    pub fn plugin(name: impl Into<String>) -> Self {
        Self::new(PLUGIN_ID, name)
    }
}

/// SQLite-backed property table
pub struct PropertyDatabase {
    conn: Mutex<Connection>,
}

impl PropertyDatabase {
    /// Open or create a property database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Create in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS properties (
                project TEXT NOT NULL,
                qualifier TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (project, qualifier, name)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))
    }

    pub fn get(&self, project: &str, key: &PropertyKey) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM properties WHERE project = ?1 AND qualifier = ?2 AND name = ?3",
                params![project, key.qualifier, key.name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a property; `None` removes it
    pub fn set(&self, project: &str, key: &PropertyKey, value: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT INTO properties (project, qualifier, name, value)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(project, qualifier, name)
                     DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                    params![project, key.qualifier, key.name, value],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM properties WHERE project = ?1 AND qualifier = ?2 AND name = ?3",
                    params![project, key.qualifier, key.name],
                )?;
            }
        }
        Ok(())
    }

    /// Drop every property of a project
    pub fn clear_project(&self, project: &str) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM properties WHERE project = ?1", params![project])?;
        debug!("Removed {} properties of project {}", removed, project);
        Ok(removed)
    }

    /// Projects that have at least one property
    pub fn projects(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT project FROM properties ORDER BY project")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }
}
