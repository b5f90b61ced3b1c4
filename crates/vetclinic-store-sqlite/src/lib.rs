#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use vetclinic_core::ClinicError;

mod migrations;
mod records;
mod schema;
mod seed;

pub use migrations::{
    revision_for, AppliedMigration, ApplyReport, BackupTable, DowngradeReport,
    HistoryEntry, Migration, MigrationDirection, MigrationOptions, MigrationStatus,
    MigrationTarget, PendingMigration, RevertOutcome, RevertReport, UpgradeReport, HEAD_VERSION,
    INVOICES_VERSION, MEDICAL_RECORDS_VERSION, METRICS_VERSION, PET_OWNER_FIELDS_VERSION,
    VACCINATION_VERSION,
};
pub use records::{AppointmentQuery, RevenueQuery};
pub use schema::{ColumnShape, ForeignKeyShape, IndexShape, SchemaFingerprint, TableShape};
pub use seed::{
    preflight_counts, PreflightCounts, SeedOptions, SeedProfile, SeedReport, SeedTableReport,
};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./vetclinic.sqlite3";

/// Where a database URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:` or a bare
    /// filesystem path.
    pub fn parse(url: &str) -> std::result::Result<Self, ClinicError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ClinicError::Configuration(
                "database url cannot be empty".to_string(),
            ));
        }

        let rest = if let Some(rest) = trimmed.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
            rest
        } else if trimmed.contains("://") {
            return Err(ClinicError::Configuration(format!(
                "unsupported database url `{trimmed}`; expected sqlite://<path>"
            )));
        } else {
            trimmed
        };

        // Query parameters such as `?mode=rwc` carry no meaning here.
        let rest = rest.split('?').next().unwrap_or_default();
        if rest.is_empty() {
            return Err(ClinicError::Configuration(format!(
                "database url `{trimmed}` has no path"
            )));
        }
        if rest == ":memory:" {
            return Ok(Self::Memory);
        }

        Ok(Self::File(PathBuf::from(rest)))
    }
}

impl Display for DatabaseLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("sqlite::memory:"),
            Self::File(path) => write!(f, "sqlite://{}", path.display()),
        }
    }
}

pub struct SqliteClinicStore {
    conn: Connection,
}

const SCHEMA_BOOKKEEPING: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  revision TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  applied_at TEXT NOT NULL,
  schema_before_json TEXT
);

CREATE TABLE IF NOT EXISTS schema_migration_log (
  event_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  version INTEGER NOT NULL,
  revision TEXT NOT NULL,
  direction TEXT NOT NULL CHECK (direction IN ('upgrade', 'downgrade')),
  outcome TEXT NOT NULL,
  detail_json TEXT NOT NULL DEFAULT '{}',
  recorded_at TEXT NOT NULL
);
";

impl SqliteClinicStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::configure(conn)
    }

    pub fn open_url(url: &str) -> Result<Self> {
        match DatabaseLocation::parse(url)? {
            DatabaseLocation::Memory => Self::open_in_memory(),
            DatabaseLocation::File(path) => Self::open(&path),
        }
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Creates the baseline tables and migration bookkeeping when absent.
    ///
    /// The baseline is version 0 of the migration chain and is never reverted.
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_BOOKKEEPING)
            .context("failed to ensure migration bookkeeping tables exist")?;
        self.conn
            .execute_batch(schema::BASELINE_SCHEMA)
            .context("failed to apply baseline schema")?;
        Ok(())
    }

    /// Highest applied migration version, 0 when only the baseline exists.
    pub fn schema_version(&self) -> Result<i64> {
        current_version(&self.conn)
    }

    /// Fails with [`ClinicError::NotMigrated`] when `resource` needs a newer schema.
    pub fn require_schema(&self, resource: &'static str, required_version: i64) -> Result<i64> {
        let current_version = self.schema_version()?;
        if current_version < required_version {
            return Err(ClinicError::NotMigrated {
                resource,
                required_revision: revision_for(required_version).unwrap_or("unknown"),
                required_version,
                current_version,
            }
            .into());
        }
        Ok(current_version)
    }

    pub fn schema_fingerprint(&self) -> Result<SchemaFingerprint> {
        SchemaFingerprint::capture(&self.conn)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub(crate) fn current_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")?;
    Ok(version.unwrap_or(0))
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}

pub(crate) fn table_columns(conn: &Connection, table_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table_name})"))
        .with_context(|| format!("failed to inspect table_info for {table_name}"))?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

pub(crate) fn column_exists(conn: &Connection, table_name: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, table_name)?
        .iter()
        .any(|candidate| candidate == column))
}

pub(crate) fn count_rows(conn: &Connection, table_name: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| {
        row.get(0)
    })
    .with_context(|| format!("failed to count rows in {table_name}"))
}

pub(crate) fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

/// Maps constraint violations to [`ClinicError::Conflict`]; other failures keep
/// their sqlite error under `action` context.
pub(crate) fn write_error(err: rusqlite::Error, action: &str) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            return ClinicError::Conflict(format!("{action}: {detail}")).into();
        }
    }
    anyhow::Error::new(err).context(action.to_string())
}

pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
