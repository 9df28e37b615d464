//! Persisted system of record for packages and their transition history.

pub mod models;
mod queries;

use crate::analysis::KindRegistry;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub use models::{Package, PackageId, ProcessingRecord, ProcessingState, StagedPackage};

/// SQLite-backed catalog.
///
/// The connection sits behind a mutex so stage workers can share one
/// `&Catalog`; every mutating call is a short transaction scoped to a
/// single package.
pub struct Catalog {
    conn: Mutex<Connection>,
    registry: KindRegistry,
}

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let catalog = Catalog {
            conn: Mutex::new(conn),
            registry: KindRegistry::builtin(),
        };
        catalog.configure_pragmas()?;
        catalog.migrate_schema()?;
        Ok(catalog)
    }

    /// Replace the accepted measurement kinds.
    pub fn with_registry(mut self, registry: KindRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.connection().execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 16MB cache)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        let conn = self.connection();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Catalog schema initialized (was version {}, now 1)", version);
        Ok(())
    }

    /// Exclusive access to the underlying connection.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.connection().execute_batch(
            "DELETE FROM measurement;
             DELETE FROM package_state;
             DELETE FROM processing_record;
             DELETE FROM package;",
        )?;
        debug!("All catalog tables truncated");
        Ok(())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(idx: usize, raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_state(idx: usize, raw: String) -> Result<ProcessingState> {
    raw.parse::<ProcessingState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}
