//! Durable observation log.
//!
//! Every novel [`ObservationRecord`] is appended to a local SQLite database.
//! The log is append-only: records are never updated or deleted, and their
//! insertion sequence is preserved.
//!
//! # Storage layout
//!
//! | column      | type    | description                                  |
//! |-------------|---------|----------------------------------------------|
//! | seq         | INTEGER | autoincrement insertion sequence             |
//! | id          | TEXT    | UUID v4, unique                              |
//! | timestamp   | TEXT    | RFC-3339 creation time (UTC)                 |
//! | category    | TEXT    | issue category, snake_case                   |
//! | severity    | TEXT    | `minor` / `moderate` / `severe`              |
//! | latitude    | REAL    | `0.0` when the record had no fix             |
//! | longitude   | REAL    |                                              |
//! | record      | TEXT    | full record as JSON                          |
//!
//! # Example
//!
//! ```rust
//! use roadwise_memory::observation_log::ObservationLog;
//! use roadwise_types::{IssueCategory, IssueSeverity, ObservationRecord};
//!
//! let log = ObservationLog::open_in_memory().unwrap();
//! let rec = ObservationRecord::new(IssueCategory::Pothole, IssueSeverity::Moderate, "deep", 0.8);
//! log.append(&rec).unwrap();
//!
//! assert_eq!(log.count().unwrap(), 1);
//! assert_eq!(log.recent(10).unwrap()[0].id, rec.id);
//! ```

use std::path::Path;

use roadwise_types::{ObservationRecord, RoadwiseError};
use rusqlite::{Connection, params};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from observation log operations.
#[derive(Error, Debug)]
pub enum ObservationLogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<ObservationLogError> for RoadwiseError {
    fn from(e: ObservationLogError) -> Self {
        RoadwiseError::Persistence(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ObservationLog
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed append-only record store.
pub struct ObservationLog {
    conn: Connection,
}

impl ObservationLog {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ObservationLogError> {
        let conn = Connection::open(path)?;
        let log = Self { conn };
        log.init_schema()?;
        Ok(log)
    }

    /// Open a temporary in-memory database.
    pub fn open_in_memory() -> Result<Self, ObservationLogError> {
        let conn = Connection::open_in_memory()?;
        let log = Self { conn };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<(), ObservationLogError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS observations (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                id        TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                category  TEXT NOT NULL,
                severity  TEXT NOT NULL,
                latitude  REAL NOT NULL,
                longitude REAL NOT NULL,
                record    TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Append `record`.  Appending the same id twice is an error.
    pub fn append(&self, record: &ObservationRecord) -> Result<(), ObservationLogError> {
        let json = serde_json::to_string(record)?;
        let severity = serde_json::to_value(record.severity)?;
        self.conn.execute(
            "INSERT INTO observations
                 (id, timestamp, category, severity, latitude, longitude, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.timestamp.to_rfc3339(),
                record.category.as_str(),
                severity.as_str().unwrap_or("minor"),
                record.latitude,
                record.longitude,
                json,
            ],
        )?;
        Ok(())
    }

    /// Number of records ever appended.
    pub fn count(&self) -> Result<u64, ObservationLogError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// All records in insertion order.
    pub fn all(&self) -> Result<Vec<ObservationRecord>, ObservationLogError> {
        self.query("SELECT record FROM observations ORDER BY seq ASC", None)
    }

    /// The `limit` most recently appended records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ObservationRecord>, ObservationLogError> {
        self.query(
            "SELECT record FROM observations ORDER BY seq DESC LIMIT ?1",
            Some(limit.min(i64::MAX as usize) as i64),
        )
    }

    fn query(
        &self,
        sql: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ObservationRecord>, ObservationLogError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<String> = match limit {
            Some(n) => stmt
                .query_map(params![n], |row| row.get(0))?
                .collect::<Result<_, _>>()?,
            None => stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?,
        };
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(ObservationLogError::from))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use roadwise_types::{IssueCategory, IssueSeverity};

    fn record(category: IssueCategory, description: &str) -> ObservationRecord {
        let mut rec = ObservationRecord::new(category, IssueSeverity::Moderate, description, 0.7);
        rec.latitude = 27.95;
        rec.longitude = -82.46;
        rec
    }

    #[test]
    fn empty_log_has_no_records() {
        let log = ObservationLog::open_in_memory().unwrap();
        assert_eq!(log.count().unwrap(), 0);
        assert!(log.all().unwrap().is_empty());
    }

    #[test]
    fn append_preserves_insertion_order() {
        let log = ObservationLog::open_in_memory().unwrap();
        let a = record(IssueCategory::Pothole, "first");
        let b = record(IssueCategory::Debris, "second");
        let c = record(IssueCategory::Crack, "third");
        for r in [&a, &b, &c] {
            log.append(r).unwrap();
        }

        let all = log.all().unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, [a.id, b.id, c.id]);

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, c.id);
        assert_eq!(recent[1].id, b.id);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let log = ObservationLog::open_in_memory().unwrap();
        let a = record(IssueCategory::Pothole, "once");
        log.append(&a).unwrap();
        let err = log.append(&a).unwrap_err();
        assert!(matches!(err, ObservationLogError::Sqlite(_)));
        assert_eq!(log.count().unwrap(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("observations.db");

        let rec = record(IssueCategory::DamagedSign, "bent stop sign");
        {
            let log = ObservationLog::open(&path).unwrap();
            log.append(&rec).unwrap();
        }

        let log = ObservationLog::open(&path).unwrap();
        let all = log.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "bent stop sign");
        assert_eq!(all[0].category, IssueCategory::DamagedSign);
    }

    #[test]
    fn log_error_converts_to_persistence_error() {
        let err: RoadwiseError =
            ObservationLogError::Sqlite(rusqlite::Error::InvalidQuery).into();
        assert!(matches!(err, RoadwiseError::Persistence(_)));
    }
}
