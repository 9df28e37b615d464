use super::models::*;
use super::{decode_state, decode_time, encode_time, Catalog};
use crate::analysis::{Measurement, MeasurementSet};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::debug;

const PACKAGE_COLUMNS: &str = "p.id, p.name, p.full_path, p.captured_at, ps.state";

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    let captured_at: Option<String> = row.get(3)?;
    let state: Option<String> = row.get(4)?;
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        full_path: PathBuf::from(row.get::<_, String>(2)?),
        captured_at: captured_at.map(|raw| decode_time(3, raw)).transpose()?,
        state: state.map(|raw| decode_state(4, raw)).transpose()?,
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Current state of `package_id` as seen by `conn`, failing if the package
/// does not exist. Returns the package name for error reporting.
fn current_state(
    conn: &Connection,
    package_id: PackageId,
) -> Result<(String, Option<ProcessingState>)> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT p.name, ps.state FROM package p \
             LEFT JOIN package_state ps ON ps.package_id = p.id \
             WHERE p.id = ?1",
            params![package_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((name, state)) => Ok((name, state.map(|raw| decode_state(1, raw)).transpose()?)),
        None => Err(Error::NotFound(format!("package id {}", package_id))),
    }
}

/// Time of the package's current transition, if it has one.
fn current_changed_at(
    conn: &Connection,
    package_id: PackageId,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT changed_at FROM package_state WHERE package_id = ?1",
            params![package_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|raw| decode_time(0, raw)).transpose()?)
}

/// Guarded append: refuse unless the package is currently in the
/// predecessor of `state`. Must run inside the caller's transaction.
///
/// `at` is clamped up to the current transition's time so the newest
/// record is always the one with the latest `changed_at`, even if the
/// wall clock stepped backwards between runs.
fn append_guarded(
    conn: &Connection,
    package_id: PackageId,
    state: ProcessingState,
    path: &Path,
    at: DateTime<Utc>,
) -> Result<i64> {
    let (name, found) = current_state(conn, package_id)?;
    let expected = state.predecessor();
    if found != expected {
        return Err(Error::InvariantViolation {
            package: name,
            expected,
            found,
        });
    }

    let at = match current_changed_at(conn, package_id)? {
        Some(current) if current > at => {
            debug!(
                "Clock behind current transition of {} ({} < {}), clamping",
                name, at, current
            );
            current
        }
        _ => at,
    };
    let changed_at = encode_time(at);
    let path = path_text(path);
    conn.execute(
        "INSERT INTO processing_record (package_id, state, changed_at, path) \
         VALUES (?1, ?2, ?3, ?4)",
        params![package_id, state.as_str(), changed_at, path],
    )?;
    let record_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO package_state (package_id, state, changed_at, path, record_id) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(package_id) DO UPDATE SET \
             state = excluded.state, \
             changed_at = excluded.changed_at, \
             path = excluded.path, \
             record_id = excluded.record_id",
        params![package_id, state.as_str(), changed_at, path, record_id],
    )?;
    if state == ProcessingState::Moved {
        conn.execute(
            "UPDATE package SET full_path = ?1 WHERE id = ?2",
            params![path, package_id],
        )?;
    }
    Ok(record_id)
}

fn insert_measurements(
    conn: &Connection,
    package_id: PackageId,
    set: &MeasurementSet,
    at: DateTime<Utc>,
) -> Result<usize> {
    let recorded_at = encode_time(at);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO measurement (package_id, kind, payload, recorded_at) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut count = 0;
    for m in set.iter() {
        let payload = serde_json::to_string(&m.payload)?;
        count += stmt.execute(params![package_id, m.kind, payload, recorded_at])?;
    }
    Ok(count)
}

impl Catalog {
    // ── Registration ─────────────────────────────────────────────

    /// Insert a package keyed by case-insensitive `name` unless one exists.
    /// Safe to call concurrently; returns the id either way.
    pub fn register_if_absent(
        &self,
        name: &str,
        full_path: &Path,
        captured_at: Option<DateTime<Utc>>,
    ) -> Result<PackageId> {
        let conn = self.connection();
        let key = name_key(name);
        let inserted = conn.execute(
            "INSERT INTO package (name, name_key, full_path, captured_at, registered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(name_key) DO NOTHING",
            params![
                name,
                key,
                path_text(full_path),
                captured_at.map(encode_time),
                encode_time(Utc::now()),
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM package WHERE name_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        if inserted > 0 {
            debug!("Registered package {} as {}", name, id);
        }
        Ok(id)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Append a transition into `state`.
    ///
    /// Within one immediate transaction the package's current state is
    /// re-read and must equal `state.predecessor()`; otherwise nothing is
    /// written and `InvariantViolation` is returned. A `Moved` transition
    /// also updates the package's canonical path.
    pub fn append_transition(
        &self,
        package_id: PackageId,
        state: ProcessingState,
        path: &Path,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record_id = append_guarded(&tx, package_id, state, path, at)?;
        tx.commit()?;
        debug!("Package {} -> {} ({})", package_id, state, path.display());
        Ok(record_id)
    }

    /// Record that the post-measure action ran for the package named `name`.
    /// The package must currently be `Measured`.
    pub fn mark_handled(&self, name: &str, at: DateTime<Utc>) -> Result<Package> {
        let package = self
            .package_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.append_transition(
            package.id,
            ProcessingState::PostMeasureActionInvoked,
            &package.full_path,
            at,
        )?;
        self.package(package.id)
    }

    /// State of the most recent transition, or `None` if the package is
    /// registered but has no transitions yet.
    pub fn latest_state(&self, package_id: PackageId) -> Result<Option<ProcessingState>> {
        let conn = self.connection();
        current_state(&conn, package_id).map(|(_, state)| state)
    }

    /// Up to `limit` packages whose latest transition is `state`, oldest
    /// transition first.
    pub fn select_by_state(
        &self,
        state: ProcessingState,
        limit: usize,
    ) -> Result<Vec<StagedPackage>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(
            "SELECT ps.package_id, p.name, ps.path \
             FROM package_state ps \
             JOIN package p ON p.id = ps.package_id \
             WHERE ps.state = ?1 \
             ORDER BY ps.changed_at, ps.package_id \
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let staged = stmt
            .query_map(params![state.as_str(), limit], |row| {
                Ok(StagedPackage {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    path: PathBuf::from(row.get::<_, String>(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(staged)
    }

    pub fn history(&self, package_id: PackageId) -> Result<Vec<ProcessingRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(
            "SELECT id, package_id, state, changed_at, path FROM processing_record \
             WHERE package_id = ?1 ORDER BY changed_at, id",
        )?;
        let records = stmt
            .query_map(params![package_id], |row| {
                Ok(ProcessingRecord {
                    id: row.get(0)?,
                    package_id: row.get(1)?,
                    state: decode_state(2, row.get(2)?)?,
                    changed_at: decode_time(3, row.get(3)?)?,
                    path: PathBuf::from(row.get::<_, String>(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn record_count(&self, package_id: PackageId) -> Result<i64> {
        Ok(self.connection().query_row(
            "SELECT COUNT(*) FROM processing_record WHERE package_id = ?1",
            params![package_id],
            |row| row.get(0),
        )?)
    }

    /// Raw transition rows into `state` for one package.
    pub fn transition_count(&self, package_id: PackageId, state: ProcessingState) -> Result<i64> {
        Ok(self.connection().query_row(
            "SELECT COUNT(*) FROM processing_record WHERE package_id = ?1 AND state = ?2",
            params![package_id, state.as_str()],
            |row| row.get(0),
        )?)
    }

    // ── Measurements ─────────────────────────────────────────────

    /// Attach a measurement payload to a package. Returns rows written.
    pub fn persist_measurement(
        &self,
        package_id: PackageId,
        set: &MeasurementSet,
    ) -> Result<usize> {
        self.registry().check(set)?;
        let conn = self.connection();
        let tx = conn.unchecked_transaction()?;
        current_state(&tx, package_id)?;
        let rows = insert_measurements(&tx, package_id, set, Utc::now())?;
        tx.commit()?;
        Ok(rows)
    }

    /// Persist measurements and the `Measured` transition atomically.
    /// Returns rows written (measurements plus the transition).
    pub fn record_measured(
        &self,
        package_id: PackageId,
        set: &MeasurementSet,
        path: &Path,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        self.registry().check(set)?;
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        append_guarded(&tx, package_id, ProcessingState::Measured, path, at)?;
        let rows = insert_measurements(&tx, package_id, set, at)?;
        tx.commit()?;
        Ok(rows + 1)
    }

    pub fn measurements_for(&self, package_id: PackageId) -> Result<MeasurementSet> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, payload FROM measurement WHERE package_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![package_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut set = MeasurementSet::new();
        for (kind, payload) in rows {
            set.measurements.push(Measurement {
                kind,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(set)
    }

    // ── Packages ─────────────────────────────────────────────────

    pub fn package(&self, package_id: PackageId) -> Result<Package> {
        let conn = self.connection();
        let sql = format!(
            "SELECT {} FROM package p \
             LEFT JOIN package_state ps ON ps.package_id = p.id WHERE p.id = ?1",
            PACKAGE_COLUMNS
        );
        conn.query_row(&sql, params![package_id], package_from_row)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("package id {}", package_id)))
    }

    /// Look up a package by case-insensitive file name.
    pub fn package_by_name(&self, name: &str) -> Result<Option<Package>> {
        let conn = self.connection();
        let sql = format!(
            "SELECT {} FROM package p \
             LEFT JOIN package_state ps ON ps.package_id = p.id WHERE p.name_key = ?1",
            PACKAGE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![name_key(name)], package_from_row)
            .optional()?)
    }

    pub fn packages_in_state(&self, state: ProcessingState) -> Result<Vec<Package>> {
        let conn = self.connection();
        let sql = format!(
            "SELECT {} FROM package p \
             JOIN package_state ps ON ps.package_id = p.id \
             WHERE ps.state = ?1 ORDER BY p.name_key",
            PACKAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![state.as_str()], package_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    pub fn package_count(&self) -> Result<i64> {
        Ok(self
            .connection()
            .query_row("SELECT COUNT(*) FROM package", [], |row| row.get(0))?)
    }

    /// Package counts per current state, in pipeline order. States with
    /// no packages are reported as zero.
    pub fn state_counts(&self) -> Result<Vec<(ProcessingState, i64)>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM package_state GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| Ok((decode_state(0, row.get(0)?)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ProcessingState::ALL
            .into_iter()
            .map(|state| {
                let count = rows
                    .iter()
                    .find(|(s, _)| *s == state)
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (state, count)
            })
            .collect())
    }
}
