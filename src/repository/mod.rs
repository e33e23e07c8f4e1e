//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking.
//! Supports both SQLite and PostgreSQL backends.

pub mod document;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod util;

pub use document::DocumentRepository;
pub use ledger::{ClaimOutcome, StepLedger};
pub use migrations::run_migrations;
pub use pool::{DbPool, DieselError};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Create a migrated throwaway SQLite pool for repository tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("docrelay.db");
    run_migrations(&db_path.display().to_string())
        .await
        .expect("run migrations");
    (dir, DbPool::sqlite_from_path(&db_path))
}
