use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::collect_rows;

pub(crate) const BASELINE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS veterinarians (
  veterinarian_id INTEGER PRIMARY KEY AUTOINCREMENT,
  license_number TEXT NOT NULL UNIQUE CHECK (length(license_number) <= 50),
  first_name TEXT NOT NULL CHECK (length(first_name) <= 100),
  last_name TEXT NOT NULL CHECK (length(last_name) <= 100),
  email TEXT NOT NULL UNIQUE CHECK (length(email) <= 255),
  phone TEXT CHECK (phone IS NULL OR length(phone) <= 20),
  specialization TEXT CHECK (specialization IS NULL OR length(specialization) <= 200),
  hire_date TEXT,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS owners (
  owner_id INTEGER PRIMARY KEY AUTOINCREMENT,
  first_name TEXT NOT NULL CHECK (length(first_name) <= 100),
  last_name TEXT NOT NULL CHECK (length(last_name) <= 100),
  email TEXT NOT NULL UNIQUE CHECK (length(email) <= 255),
  phone TEXT CHECK (phone IS NULL OR length(phone) <= 20),
  address TEXT,
  registration_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS pets (
  pet_id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL CHECK (length(name) <= 100),
  species TEXT NOT NULL CHECK (species IN ('dog', 'cat', 'bird', 'rabbit', 'other')),
  breed TEXT,
  birth_date TEXT,
  weight REAL NOT NULL CHECK (weight > 0 AND weight < 10000),
  owner_id INTEGER NOT NULL REFERENCES owners(owner_id) ON DELETE CASCADE,
  registration_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_pets_owner_id ON pets(owner_id);

CREATE TABLE IF NOT EXISTS appointments (
  appointment_id INTEGER PRIMARY KEY AUTOINCREMENT,
  pet_id INTEGER NOT NULL REFERENCES pets(pet_id) ON DELETE CASCADE,
  veterinarian_id INTEGER NOT NULL REFERENCES veterinarians(veterinarian_id) ON DELETE CASCADE,
  appointment_date TEXT NOT NULL,
  reason TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'scheduled' CHECK (
    status IN ('scheduled', 'completed', 'cancelled', 'no_show')
  ),
  notes TEXT,
  created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_appointments_pet_id ON appointments(pet_id);
CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments(appointment_date);
CREATE INDEX IF NOT EXISTS idx_appointments_vet_status ON appointments(veterinarian_id, status);
";

/// Tables that never take part in the fingerprint.
fn is_bookkeeping_table(name: &str) -> bool {
    name.starts_with("sqlite_")
        || name.starts_with("backup_")
        || name == "schema_migrations"
        || name == "schema_migration_log"
}

/// Structural description of the application tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SchemaFingerprint {
    pub tables: BTreeMap<String, TableShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TableShape {
    pub columns: Vec<ColumnShape>,
    pub indexes: Vec<IndexShape>,
    pub foreign_keys: Vec<ForeignKeyShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnShape {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key_position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexShape {
    pub name: String,
    pub unique: bool,
    pub origin: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyShape {
    pub from: String,
    pub references_table: String,
    pub references_column: Option<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl SchemaFingerprint {
    pub fn capture(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                 ORDER BY name ASC",
            )
            .context("failed to list tables for schema fingerprint")?;
        let names = collect_rows(stmt.query_map([], |row| row.get::<_, String>(0))?)?;

        let mut tables = BTreeMap::new();
        for name in names.into_iter().filter(|name| !is_bookkeeping_table(name)) {
            let shape = TableShape {
                columns: capture_columns(conn, &name)?,
                indexes: capture_indexes(conn, &name)?,
                foreign_keys: capture_foreign_keys(conn, &name)?,
            };
            tables.insert(name, shape);
        }

        Ok(Self { tables })
    }

    /// Describes every way `actual` departs from `self`. Empty means equal.
    #[must_use]
    pub fn diff(&self, actual: &Self) -> Vec<String> {
        let mut gaps = Vec::new();

        for (name, expected) in &self.tables {
            let Some(found) = actual.tables.get(name) else {
                gaps.push(format!("table {name} is missing"));
                continue;
            };

            diff_named(
                &mut gaps,
                name,
                "column",
                expected.columns.iter().map(|column| (column.name.as_str(), column)),
                found.columns.iter().map(|column| (column.name.as_str(), column)),
            );
            if expected.columns.len() == found.columns.len()
                && expected
                    .columns
                    .iter()
                    .zip(&found.columns)
                    .any(|(lhs, rhs)| lhs.name != rhs.name)
            {
                gaps.push(format!("table {name} has its columns in a different order"));
            }

            diff_named(
                &mut gaps,
                name,
                "index",
                expected.indexes.iter().map(|index| (index.name.as_str(), index)),
                found.indexes.iter().map(|index| (index.name.as_str(), index)),
            );

            if expected.foreign_keys != found.foreign_keys {
                gaps.push(format!("table {name} foreign keys differ"));
            }
        }

        for name in actual.tables.keys() {
            if !self.tables.contains_key(name) {
                gaps.push(format!("table {name} is unexpected"));
            }
        }

        gaps
    }
}

fn diff_named<'a, T: PartialEq + 'a>(
    gaps: &mut Vec<String>,
    table: &str,
    kind: &str,
    expected: impl Iterator<Item = (&'a str, &'a T)>,
    found: impl Iterator<Item = (&'a str, &'a T)>,
) {
    let expected: BTreeMap<&str, &T> = expected.collect();
    let found: BTreeMap<&str, &T> = found.collect();

    for (name, shape) in &expected {
        match found.get(name) {
            None => gaps.push(format!("{kind} {table}.{name} is missing")),
            Some(actual) if actual != shape => {
                gaps.push(format!("{kind} {table}.{name} changed definition"));
            }
            Some(_) => {}
        }
    }
    for name in found.keys() {
        if !expected.contains_key(name) {
            gaps.push(format!("{kind} {table}.{name} is unexpected"));
        }
    }
}

fn capture_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnShape>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnShape {
            name: row.get(1)?,
            declared_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            default_value: row.get(4)?,
            primary_key_position: row.get(5)?,
        })
    })?;
    collect_rows(rows)
}

fn capture_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexShape>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_list({table})"))
        .with_context(|| format!("failed to inspect index_list for {table}"))?;
    let listed = collect_rows(stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? != 0,
            row.get::<_, String>(3)?,
        ))
    })?)?;

    let mut indexes = Vec::with_capacity(listed.len());
    for (name, unique, origin) in listed {
        let mut info = conn
            .prepare(&format!("PRAGMA index_info({name})"))
            .with_context(|| format!("failed to inspect index_info for {name}"))?;
        let columns = collect_rows(info.query_map([], |row| row.get::<_, String>(2))?)?;
        indexes.push(IndexShape {
            name,
            unique,
            origin,
            columns,
        });
    }
    indexes.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
    Ok(indexes)
}

fn capture_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyShape>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list({table})"))
        .with_context(|| format!("failed to inspect foreign_key_list for {table}"))?;
    let mut keys = collect_rows(stmt.query_map([], |row| {
        Ok(ForeignKeyShape {
            references_table: row.get(2)?,
            from: row.get(3)?,
            references_column: row.get(4)?,
            on_update: row.get(5)?,
            on_delete: row.get(6)?,
        })
    })?)?;
    keys.sort_by(|lhs, rhs| {
        (&lhs.from, &lhs.references_table).cmp(&(&rhs.from, &rhs.references_table))
    });
    Ok(keys)
}
