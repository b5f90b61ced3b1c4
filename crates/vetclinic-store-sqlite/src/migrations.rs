use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use vetclinic_core::{format_date, invoice_number, now_timestamp, parse_timestamp, ClinicError};

use crate::{
    collect_rows, column_exists, count_rows, table_exists, write_error,
    SchemaFingerprint, SqliteClinicStore,
};

pub const MEDICAL_RECORDS_VERSION: i64 = 1;
pub const VACCINATION_VERSION: i64 = 2;
pub const PET_OWNER_FIELDS_VERSION: i64 = 3;
pub const INVOICES_VERSION: i64 = 4;
pub const METRICS_VERSION: i64 = 5;
pub const HEAD_VERSION: i64 = METRICS_VERSION;

type StepFn = fn(&mut StepContext<'_>) -> Result<()>;

/// One reversible schema step. `version` is its position in the chain.
pub struct Migration {
    pub version: i64,
    pub revision: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    apply: StepFn,
    revert: StepFn,
}

static MIGRATIONS: [Migration; 5] = [
    Migration {
        version: MEDICAL_RECORDS_VERSION,
        revision: "d8f3a1c9b4e2",
        name: "create_medical_records",
        description: "medical_records table, one row backfilled per completed appointment",
        apply: create_medical_records,
        revert: drop_medical_records,
    },
    Migration {
        version: VACCINATION_VERSION,
        revision: "e1a2b3c4d5f6",
        name: "create_vaccination_system",
        description: "vaccines catalog and vaccination_records, with legacy vaccinations import",
        apply: create_vaccination_system,
        revert: drop_vaccination_system,
    },
    Migration {
        version: PET_OWNER_FIELDS_VERSION,
        revision: "f7c6d8a9b0e1",
        name: "modify_pets_owners",
        description: "pet microchip/neutered/blood type and owner emergency contact/payment method",
        apply: add_pet_owner_fields,
        revert: drop_pet_owner_fields,
    },
    Migration {
        version: INVOICES_VERSION,
        revision: "a9b8c7d6e5f4",
        name: "create_invoices",
        description: "invoices table with placeholder invoices for completed appointments",
        apply: create_invoices,
        revert: drop_invoices,
    },
    Migration {
        version: METRICS_VERSION,
        revision: "b1c2d3e4f5a6",
        name: "add_metrics",
        description: "veterinarian fee/rating/totals and pet visit metrics backfilled from history",
        apply: add_metrics,
        revert: drop_metrics,
    },
];

#[must_use]
pub fn revision_for(version: i64) -> Option<&'static str> {
    migration_at(version).map(|migration| migration.revision)
}

fn migration_at(version: i64) -> Option<&'static Migration> {
    MIGRATIONS
        .iter()
        .find(|migration| migration.version == version)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationOptions {
    pub skip_backups: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    Head,
    Base,
    Version(i64),
}

impl MigrationTarget {
    /// Resolves `head`, `base`, a version number, or a revision prefix of at
    /// least four characters.
    pub fn parse(raw: &str) -> std::result::Result<Self, ClinicError> {
        let value = raw.trim();
        match value {
            "head" => return Ok(Self::Head),
            "base" => return Ok(Self::Base),
            _ => {}
        }

        if !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit()) {
            let version: i64 = value
                .parse()
                .map_err(|_| ClinicError::Validation(format!("invalid schema version `{value}`")))?;
            if version > HEAD_VERSION {
                return Err(ClinicError::Validation(format!(
                    "schema version {version} does not exist (head is {HEAD_VERSION})"
                )));
            }
            return Ok(if version == 0 {
                Self::Base
            } else {
                Self::Version(version)
            });
        }

        if value.len() < 4 {
            return Err(ClinicError::Validation(format!(
                "revision prefix `{value}` must have at least 4 characters"
            )));
        }

        let matches: Vec<&Migration> = MIGRATIONS
            .iter()
            .filter(|migration| migration.revision.starts_with(value))
            .collect();
        match matches.as_slice() {
            [single] => Ok(Self::Version(single.version)),
            [] => Err(ClinicError::Validation(format!("unknown revision `{value}`"))),
            _ => Err(ClinicError::Validation(format!(
                "revision prefix `{value}` is ambiguous"
            ))),
        }
    }

    #[must_use]
    pub fn version(self) -> i64 {
        match self {
            Self::Head => HEAD_VERSION,
            Self::Base => 0,
            Self::Version(version) => version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevertOutcome {
    /// Shape verified equal to the fingerprint recorded before the step ran.
    Restored,
    /// Committed, but the result could not be verified as an exact restore.
    PartiallyRestored { gaps: Vec<String> },
    /// Rolled back; the schema is still at the step's version.
    NotRestored { reason: String },
}

impl RevertOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::PartiallyRestored { .. } => "partially_restored",
            Self::NotRestored { .. } => "not_restored",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    Upgrade,
    Downgrade,
}

impl MigrationDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upgrade" => Some(Self::Upgrade),
            "downgrade" => Some(Self::Downgrade),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub revision: String,
    pub name: String,
    pub applied_at: String,
    pub fingerprint_recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub revision: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: i64,
    pub current_revision: Option<String>,
    pub head_version: i64,
    pub head_revision: String,
    pub at_head: bool,
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<PendingMigration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub event_seq: i64,
    pub version: i64,
    pub revision: String,
    pub direction: MigrationDirection,
    pub outcome: String,
    pub detail: Value,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyReport {
    pub version: i64,
    pub revision: String,
    pub name: String,
    pub backups_created: Vec<String>,
    pub backups_restored: Vec<String>,
    pub rows_backfilled: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from_version: i64,
    pub to_version: i64,
    pub applied: Vec<ApplyReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevertReport {
    pub version: i64,
    pub revision: String,
    pub name: String,
    pub outcome: RevertOutcome,
    pub backups_created: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DowngradeReport {
    pub from_version: i64,
    pub to_version: i64,
    pub reverted: Vec<RevertReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupTable {
    pub name: String,
    pub revision: String,
    pub source_table: String,
    pub new_columns_only: bool,
    pub row_count: i64,
}

impl SqliteClinicStore {
    pub fn migration_status(&self) -> Result<MigrationStatus> {
        self.initialize()?;
        let current = self.schema_version()?;

        let mut stmt = self.conn.prepare(
            "SELECT version, revision, name, applied_at, schema_before_json IS NOT NULL
             FROM schema_migrations
             ORDER BY version ASC",
        )?;
        let applied = collect_rows(stmt.query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                revision: row.get(1)?,
                name: row.get(2)?,
                applied_at: row.get(3)?,
                fingerprint_recorded: row.get(4)?,
            })
        })?)?;

        let pending = MIGRATIONS
            .iter()
            .filter(|migration| migration.version > current)
            .map(|migration| PendingMigration {
                version: migration.version,
                revision: migration.revision.to_string(),
                name: migration.name.to_string(),
                description: migration.description.to_string(),
            })
            .collect();

        Ok(MigrationStatus {
            current_version: current,
            current_revision: revision_for(current).map(ToString::to_string),
            head_version: HEAD_VERSION,
            head_revision: revision_for(HEAD_VERSION)
                .unwrap_or_default()
                .to_string(),
            at_head: current == HEAD_VERSION,
            applied,
            pending,
        })
    }

    pub fn migration_history(&self) -> Result<Vec<HistoryEntry>> {
        self.initialize()?;
        let mut stmt = self.conn.prepare(
            "SELECT event_seq, version, revision, direction, outcome, detail_json, recorded_at
             FROM schema_migration_log
             ORDER BY event_seq ASC",
        )?;
        let rows = collect_rows(stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?)?;

        rows.into_iter()
            .map(
                |(event_seq, version, revision, direction, outcome, detail_json, recorded_at)| {
                    let direction = MigrationDirection::parse(&direction)
                        .ok_or_else(|| anyhow!("invalid migration direction `{direction}`"))?;
                    let detail = serde_json::from_str(&detail_json)
                        .with_context(|| format!("invalid history detail for event {event_seq}"))?;
                    Ok(HistoryEntry {
                        event_seq,
                        version,
                        revision,
                        direction,
                        outcome,
                        detail,
                        recorded_at,
                    })
                },
            )
            .collect()
    }

    /// Applies pending steps up to `target`, one transaction per step.
    ///
    /// A failing step is rolled back and reported as an error; steps applied
    /// before it stay committed.
    pub fn upgrade(
        &mut self,
        target: MigrationTarget,
        options: MigrationOptions,
    ) -> Result<UpgradeReport> {
        self.initialize()?;
        let from_version = self.schema_version()?;
        let target_version = target.version();
        if target_version < from_version {
            return Err(ClinicError::Validation(format!(
                "target version {target_version} is below the current version {from_version}; use downgrade"
            ))
            .into());
        }

        let mut applied = Vec::new();
        for migration in MIGRATIONS
            .iter()
            .filter(|migration| migration.version > from_version && migration.version <= target_version)
        {
            applied.push(self.apply_migration(migration, options)?);
        }

        Ok(UpgradeReport {
            from_version,
            to_version: self.schema_version()?,
            applied,
        })
    }

    /// Reverts steps down to `target`, or a single step when `target` is `None`.
    ///
    /// Stops at the first step that could not be reverted.
    pub fn downgrade(
        &mut self,
        target: Option<MigrationTarget>,
        options: MigrationOptions,
    ) -> Result<DowngradeReport> {
        self.initialize()?;
        let from_version = self.schema_version()?;
        if from_version == 0 {
            return Err(ClinicError::InvalidState(
                "schema is at base; nothing to revert".to_string(),
            )
            .into());
        }
        let target_version = target.map_or(from_version - 1, MigrationTarget::version);
        if target_version > from_version {
            return Err(ClinicError::Validation(format!(
                "target version {target_version} is above the current version {from_version}; use upgrade"
            ))
            .into());
        }

        let mut reverted = Vec::new();
        for version in ((target_version + 1)..=from_version).rev() {
            let migration = migration_at(version)
                .ok_or_else(|| anyhow!("no migration registered for version {version}"))?;
            let report = self.revert_migration(migration, options)?;
            let stop = matches!(report.outcome, RevertOutcome::NotRestored { .. });
            reverted.push(report);
            if stop {
                break;
            }
        }

        Ok(DowngradeReport {
            from_version,
            to_version: self.schema_version()?,
            reverted,
        })
    }

    pub fn apply_migration(
        &mut self,
        migration: &Migration,
        options: MigrationOptions,
    ) -> Result<ApplyReport> {
        let current = self.schema_version()?;
        if migration.version != current + 1 {
            return Err(ClinicError::InvalidState(format!(
                "cannot apply {} (version {}) while schema is at version {current}",
                migration.revision, migration.version
            ))
            .into());
        }

        tracing::info!(
            revision = migration.revision,
            version = migration.version,
            name = migration.name,
            "applying migration"
        );
        match self.apply_in_transaction(migration, options) {
            Ok(report) => {
                tracing::info!(
                    revision = migration.revision,
                    backups_created = report.backups_created.len(),
                    backups_restored = report.backups_restored.len(),
                    "migration applied"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!(revision = migration.revision, error = %format!("{err:#}"), "migration failed");
                if let Err(history_err) = record_history(
                    &self.conn,
                    migration,
                    MigrationDirection::Upgrade,
                    "failed",
                    &json!({ "error": format!("{err:#}") }),
                ) {
                    tracing::warn!(
                        revision = migration.revision,
                        error = %format!("{history_err:#}"),
                        "failed to record migration failure in history"
                    );
                }
                Err(err.context(format!(
                    "migration {} ({}) failed; schema remains at version {current}",
                    migration.revision, migration.name
                )))
            }
        }
    }

    fn apply_in_transaction(
        &mut self,
        migration: &Migration,
        options: MigrationOptions,
    ) -> Result<ApplyReport> {
        let before = SchemaFingerprint::capture(&self.conn)?;
        let before_json =
            serde_json::to_string(&before).context("failed to serialize schema fingerprint")?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin migration transaction")?;
        let mut ctx = StepContext::new(&tx, migration.revision, options);
        (migration.apply)(&mut ctx)?;
        let output = ctx.finish();

        let applied_at = now_timestamp()?;
        tx.execute(
            "INSERT INTO schema_migrations(version, revision, name, applied_at, schema_before_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                migration.version,
                migration.revision,
                migration.name,
                applied_at,
                before_json
            ],
        )
        .context("failed to record applied migration")?;

        let report = ApplyReport {
            version: migration.version,
            revision: migration.revision.to_string(),
            name: migration.name.to_string(),
            backups_created: output.backups_created,
            backups_restored: output.backups_restored,
            rows_backfilled: output.rows_backfilled,
            warnings: output.gaps,
        };
        let detail = serde_json::to_value(&report).context("failed to serialize apply report")?;
        record_history(&tx, migration, MigrationDirection::Upgrade, "applied", &detail)?;

        tx.commit().context("failed to commit migration")?;
        Ok(report)
    }

    /// Reverts one applied step. Failures come back as
    /// [`RevertOutcome::NotRestored`] with the schema left untouched.
    pub fn revert_migration(
        &mut self,
        migration: &Migration,
        options: MigrationOptions,
    ) -> Result<RevertReport> {
        let current = self.schema_version()?;
        if migration.version != current {
            return Err(ClinicError::InvalidState(format!(
                "cannot revert {} (version {}) while schema is at version {current}",
                migration.revision, migration.version
            ))
            .into());
        }

        let recorded = self.recorded_fingerprint(migration.version)?;
        tracing::info!(
            revision = migration.revision,
            version = migration.version,
            "reverting migration"
        );

        match self.revert_in_transaction(migration, options, recorded.as_ref()) {
            Ok(report) => {
                tracing::info!(
                    revision = migration.revision,
                    outcome = report.outcome.as_str(),
                    "migration reverted"
                );
                Ok(report)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(revision = migration.revision, %reason, "migration revert rolled back");
                let outcome = RevertOutcome::NotRestored { reason };
                let detail =
                    serde_json::to_value(&outcome).context("failed to serialize revert outcome")?;
                if let Err(history_err) = record_history(
                    &self.conn,
                    migration,
                    MigrationDirection::Downgrade,
                    outcome.as_str(),
                    &detail,
                ) {
                    tracing::warn!(
                        revision = migration.revision,
                        error = %format!("{history_err:#}"),
                        "failed to record rolled back revert in history"
                    );
                }
                Ok(RevertReport {
                    version: migration.version,
                    revision: migration.revision.to_string(),
                    name: migration.name.to_string(),
                    outcome,
                    backups_created: Vec::new(),
                })
            }
        }
    }

    fn revert_in_transaction(
        &mut self,
        migration: &Migration,
        options: MigrationOptions,
        recorded: Option<&SchemaFingerprint>,
    ) -> Result<RevertReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin revert transaction")?;
        let mut ctx = StepContext::new(&tx, migration.revision, options);
        (migration.revert)(&mut ctx)?;
        let output = ctx.finish();

        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            params![migration.version],
        )
        .context("failed to remove migration bookkeeping row")?;

        let mut gaps = output.gaps;
        let after = SchemaFingerprint::capture(&tx)?;
        match recorded {
            Some(expected) => gaps.extend(expected.diff(&after)),
            None => gaps.push(
                "no schema fingerprint was recorded when this revision was applied; shape not verified"
                    .to_string(),
            ),
        }

        let outcome = if gaps.is_empty() {
            RevertOutcome::Restored
        } else {
            RevertOutcome::PartiallyRestored { gaps }
        };
        let report = RevertReport {
            version: migration.version,
            revision: migration.revision.to_string(),
            name: migration.name.to_string(),
            outcome,
            backups_created: output.backups_created,
        };
        let detail = serde_json::to_value(&report).context("failed to serialize revert report")?;
        record_history(
            &tx,
            migration,
            MigrationDirection::Downgrade,
            report.outcome.as_str(),
            &detail,
        )?;

        tx.commit().context("failed to commit revert")?;
        Ok(report)
    }

    fn recorded_fingerprint(&self, version: i64) -> Result<Option<SchemaFingerprint>> {
        let stored: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT schema_before_json FROM schema_migrations WHERE version = ?1",
                params![version],
                |row| row.get(0),
            )
            .optional()
            .context("failed to load recorded schema fingerprint")?;

        match stored.flatten() {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("invalid stored schema fingerprint")?,
            )),
            None => Ok(None),
        }
    }

    pub fn list_backups(&self) -> Result<Vec<BackupTable>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE 'backup\\_%' ESCAPE '\\'
             ORDER BY name ASC",
        )?;
        let names = collect_rows(stmt.query_map([], |row| row.get::<_, String>(0))?)?;

        let mut backups = Vec::with_capacity(names.len());
        for name in names {
            let rest = name.trim_start_matches("backup_");
            let (revision, source) = rest.split_once('_').unwrap_or((rest, ""));
            let new_columns_only = source.ends_with("_newcols");
            backups.push(BackupTable {
                row_count: count_rows(&self.conn, &name)?,
                revision: revision.to_string(),
                source_table: source.trim_end_matches("_newcols").to_string(),
                new_columns_only,
                name,
            });
        }
        Ok(backups)
    }

    /// Drops every backup table written by `revision` (full id or prefix).
    pub fn drop_backups(&self, revision: &str) -> Result<Vec<String>> {
        let target = MigrationTarget::parse(revision)?;
        let revision = match target {
            MigrationTarget::Version(version) => revision_for(version),
            MigrationTarget::Head => revision_for(HEAD_VERSION),
            MigrationTarget::Base => None,
        }
        .ok_or_else(|| ClinicError::Validation(format!("`{revision}` does not name a revision")))?;

        let mut dropped = Vec::new();
        for backup in self.list_backups()? {
            if backup.revision != revision {
                continue;
            }
            self.conn
                .execute_batch(&format!("DROP TABLE {};", backup.name))
                .with_context(|| format!("failed to drop backup {}", backup.name))?;
            tracing::info!(backup = %backup.name, "backup dropped");
            dropped.push(backup.name);
        }
        Ok(dropped)
    }
}

fn record_history(
    conn: &Connection,
    migration: &Migration,
    direction: MigrationDirection,
    outcome: &str,
    detail: &Value,
) -> Result<()> {
    let recorded_at = now_timestamp()?;
    conn.execute(
        "INSERT INTO schema_migration_log(version, revision, direction, outcome, detail_json, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            migration.version,
            migration.revision,
            direction.as_str(),
            outcome,
            detail.to_string(),
            recorded_at
        ],
    )
    .context("failed to record migration history")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Step plumbing
// ---------------------------------------------------------------------------

struct StepOutput {
    gaps: Vec<String>,
    backups_created: Vec<String>,
    backups_restored: Vec<String>,
    rows_backfilled: BTreeMap<String, usize>,
}

pub(crate) struct StepContext<'a> {
    conn: &'a Connection,
    revision: &'static str,
    options: MigrationOptions,
    gaps: Vec<String>,
    backups_created: Vec<String>,
    backups_restored: Vec<String>,
    rows_backfilled: BTreeMap<String, usize>,
}

impl<'a> StepContext<'a> {
    fn new(conn: &'a Connection, revision: &'static str, options: MigrationOptions) -> Self {
        Self {
            conn,
            revision,
            options,
            gaps: Vec::new(),
            backups_created: Vec::new(),
            backups_restored: Vec::new(),
            rows_backfilled: BTreeMap::new(),
        }
    }

    fn finish(self) -> StepOutput {
        StepOutput {
            gaps: self.gaps,
            backups_created: self.backups_created,
            backups_restored: self.backups_restored,
            rows_backfilled: self.rows_backfilled,
        }
    }

    fn backup_name(&self, table: &str, new_columns_only: bool) -> String {
        if new_columns_only {
            format!("backup_{}_{table}_newcols", self.revision)
        } else {
            format!("backup_{}_{table}", self.revision)
        }
    }

    /// Full-table snapshot taken before altering `table`. An existing
    /// snapshot is kept as is.
    fn snapshot(&mut self, table: &str) -> Result<()> {
        let name = self.backup_name(table, false);
        if self.options.skip_backups {
            tracing::warn!(backup = %name, "snapshot skipped");
            self.gaps.push(format!("snapshot {name} was skipped"));
            return Ok(());
        }
        if table_exists(self.conn, &name)? {
            tracing::info!(backup = %name, "keeping existing snapshot");
            return Ok(());
        }
        self.create_backup(&name, &format!("SELECT * FROM {table}"))
    }

    /// Copies data that is about to be dropped. Refuses to replace an
    /// existing backup of the same name.
    fn backup(&mut self, table: &str, new_columns_only: bool, select: &str) -> Result<()> {
        let name = self.backup_name(table, new_columns_only);
        if self.options.skip_backups {
            tracing::warn!(backup = %name, "backup skipped");
            self.gaps.push(format!("backup {name} was skipped"));
            return Ok(());
        }
        if table_exists(self.conn, &name)? {
            return Err(anyhow!(
                "backup table {name} already exists; drop it or rerun with skip_backups"
            ));
        }
        self.create_backup(&name, select)
    }

    fn create_backup(&mut self, name: &str, select: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("CREATE TABLE {name} AS {select};"))
            .with_context(|| format!("failed to create backup {name}"))?;
        let rows = count_rows(self.conn, name)?;
        tracing::info!(backup = %name, rows, "backup created");
        self.backups_created.push(name.to_string());
        Ok(())
    }

    /// Backup left by an earlier revert of this revision, if any.
    fn revert_backup(&self, table: &str, new_columns_only: bool) -> Result<Option<String>> {
        let name = self.backup_name(table, new_columns_only);
        Ok(table_exists(self.conn, &name)?.then_some(name))
    }

    fn consume_backup(&mut self, name: String) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE {name};"))
            .with_context(|| format!("failed to drop restored backup {name}"))?;
        tracing::info!(backup = %name, "backup restored and dropped");
        self.backups_restored.push(name);
        Ok(())
    }

    fn require_table(&mut self, table: &str) -> Result<bool> {
        if table_exists(self.conn, table)? {
            return Ok(true);
        }
        self.gaps.push(format!("table {table} was already absent"));
        Ok(false)
    }

    /// Columns of `columns` present on `table`; missing ones are noted as gaps.
    fn present_columns(&mut self, table: &str, columns: &[&'static str]) -> Result<Vec<&'static str>> {
        let mut present = Vec::with_capacity(columns.len());
        for column in columns {
            if column_exists(self.conn, table, column)? {
                present.push(*column);
            } else {
                self.gaps.push(format!("column {table}.{column} was already absent"));
            }
        }
        Ok(present)
    }

    /// Backs up `columns` keyed by `key`, then drops them.
    fn drop_new_columns(&mut self, table: &str, key: &str, columns: &[&'static str]) -> Result<()> {
        if !self.require_table(table)? {
            return Ok(());
        }
        let present = self.present_columns(table, columns)?;
        if present.is_empty() {
            return Ok(());
        }
        self.backup(
            table,
            true,
            &format!("SELECT {key}, {} FROM {table}", present.join(", ")),
        )?;
        for column in present {
            self.conn
                .execute_batch(&format!("ALTER TABLE {table} DROP COLUMN {column};"))
                .with_context(|| format!("failed to drop column {table}.{column}"))?;
        }
        Ok(())
    }

    fn backfilled(&mut self, table: &str, rows: usize) {
        *self.rows_backfilled.entry(table.to_string()).or_insert(0) += rows;
    }
}

// ---------------------------------------------------------------------------
// d8f3a1c9b4e2 create_medical_records
// ---------------------------------------------------------------------------

fn create_medical_records(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch(
            "CREATE TABLE medical_records (
               record_id INTEGER PRIMARY KEY AUTOINCREMENT,
               appointment_id INTEGER NOT NULL UNIQUE
                 REFERENCES appointments(appointment_id) ON DELETE CASCADE,
               diagnosis TEXT NOT NULL,
               treatment TEXT NOT NULL,
               prescription TEXT,
               follow_up_required INTEGER NOT NULL DEFAULT 0 CHECK (follow_up_required IN (0, 1)),
               created_at TEXT NOT NULL
             );",
        )
        .context("failed to create medical_records")?;

    if let Some(backup) = ctx.revert_backup("medical_records", false)? {
        let restored = ctx
            .conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO medical_records(
                       record_id, appointment_id, diagnosis, treatment, prescription,
                       follow_up_required, created_at
                     )
                     SELECT record_id, appointment_id, diagnosis, treatment, prescription,
                            follow_up_required, created_at
                     FROM {backup}
                     WHERE appointment_id IN (SELECT appointment_id FROM appointments)"
                ),
                [],
            )
            .context("failed to restore medical_records from backup")?;
        tracing::info!(rows = restored, "medical records restored");
        ctx.consume_backup(backup)?;
    }

    let inserted = ctx
        .conn
        .execute(
            "INSERT INTO medical_records(
               appointment_id, diagnosis, treatment, prescription, follow_up_required, created_at
             )
             SELECT a.appointment_id, a.reason, COALESCE(a.notes, ''), NULL, 0, a.appointment_date
             FROM appointments a
             WHERE a.status = 'completed'
               AND NOT EXISTS (
                 SELECT 1 FROM medical_records m WHERE m.appointment_id = a.appointment_id
               )
             ORDER BY a.appointment_id ASC",
            [],
        )
        .context("failed to backfill medical_records")?;
    ctx.backfilled("medical_records", inserted);
    Ok(())
}

fn drop_medical_records(ctx: &mut StepContext<'_>) -> Result<()> {
    if !ctx.require_table("medical_records")? {
        return Ok(());
    }
    ctx.backup("medical_records", false, "SELECT * FROM medical_records")?;
    ctx.conn
        .execute_batch("DROP TABLE medical_records;")
        .context("failed to drop medical_records")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// e1a2b3c4d5f6 create_vaccination_system
// ---------------------------------------------------------------------------

const LEGACY_VACCINATION_COLUMNS: [&str; 7] = [
    "pet_id",
    "vaccine_name",
    "manufacturer",
    "species",
    "given_date",
    "veterinarian_id",
    "batch_number",
];

fn create_vaccination_system(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch(
            "CREATE TABLE vaccines (
               vaccine_id INTEGER PRIMARY KEY AUTOINCREMENT,
               name TEXT NOT NULL CHECK (length(name) <= 200),
               manufacturer TEXT CHECK (manufacturer IS NULL OR length(manufacturer) <= 200),
               species_applicable TEXT CHECK (species_applicable IS NULL OR length(species_applicable) <= 100)
             );

             CREATE TABLE vaccination_records (
               vaccination_id INTEGER PRIMARY KEY AUTOINCREMENT,
               pet_id INTEGER NOT NULL REFERENCES pets(pet_id) ON DELETE CASCADE,
               vaccine_id INTEGER NOT NULL REFERENCES vaccines(vaccine_id) ON DELETE RESTRICT,
               vaccination_date TEXT NOT NULL,
               next_dose_date TEXT CHECK (next_dose_date IS NULL OR next_dose_date >= vaccination_date),
               veterinarian_id INTEGER REFERENCES veterinarians(veterinarian_id) ON DELETE SET NULL,
               batch_number TEXT CHECK (batch_number IS NULL OR length(batch_number) <= 50)
             );

             CREATE INDEX idx_vaccination_records_pet_id ON vaccination_records(pet_id);
             CREATE INDEX idx_vaccination_records_vaccine_id ON vaccination_records(vaccine_id);
             CREATE INDEX idx_vaccination_records_veterinarian_id ON vaccination_records(veterinarian_id);",
        )
        .context("failed to create vaccination tables")?;

    if let Some(backup) = ctx.revert_backup("vaccines", false)? {
        ctx.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO vaccines(vaccine_id, name, manufacturer, species_applicable)
                     SELECT vaccine_id, name, manufacturer, species_applicable FROM {backup}"
                ),
                [],
            )
            .context("failed to restore vaccines from backup")?;
        ctx.consume_backup(backup)?;
    }
    if let Some(backup) = ctx.revert_backup("vaccination_records", false)? {
        ctx.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO vaccination_records(
                       vaccination_id, pet_id, vaccine_id, vaccination_date, next_dose_date,
                       veterinarian_id, batch_number
                     )
                     SELECT b.vaccination_id, b.pet_id, b.vaccine_id, b.vaccination_date, b.next_dose_date,
                            CASE WHEN b.veterinarian_id IN (SELECT veterinarian_id FROM veterinarians)
                                 THEN b.veterinarian_id END,
                            b.batch_number
                     FROM {backup} b
                     WHERE b.pet_id IN (SELECT pet_id FROM pets)
                       AND b.vaccine_id IN (SELECT vaccine_id FROM vaccines)"
                ),
                [],
            )
            .context("failed to restore vaccination_records from backup")?;
        ctx.consume_backup(backup)?;
    }

    import_legacy_vaccinations(ctx)
}

/// Best-effort copy from an ad-hoc `vaccinations` table.
fn import_legacy_vaccinations(ctx: &mut StepContext<'_>) -> Result<()> {
    if !table_exists(ctx.conn, "vaccinations")? {
        return Ok(());
    }
    for column in LEGACY_VACCINATION_COLUMNS {
        if !column_exists(ctx.conn, "vaccinations", column)? {
            tracing::warn!(column, "legacy vaccinations table lacks column; import skipped");
            ctx.gaps.push(format!(
                "legacy vaccinations import skipped: missing column {column}"
            ));
            return Ok(());
        }
    }

    let vaccines = ctx
        .conn
        .execute(
            "INSERT INTO vaccines(name, manufacturer, species_applicable)
             SELECT v.vaccine_name, MIN(v.manufacturer), MIN(v.species)
             FROM vaccinations v
             WHERE v.vaccine_name IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM vaccines x WHERE x.name = v.vaccine_name)
             GROUP BY v.vaccine_name",
            [],
        )
        .context("failed to import legacy vaccine names")?;
    ctx.backfilled("vaccines", vaccines);

    let records = ctx
        .conn
        .execute(
            "INSERT INTO vaccination_records(
               pet_id, vaccine_id, vaccination_date, next_dose_date, veterinarian_id, batch_number
             )
             SELECT v.pet_id, x.vaccine_id, date(v.given_date), NULL,
                    CASE WHEN v.veterinarian_id IN (SELECT veterinarian_id FROM veterinarians)
                         THEN v.veterinarian_id END,
                    v.batch_number
             FROM vaccinations v
             JOIN vaccines x ON x.name = v.vaccine_name
             WHERE v.pet_id IN (SELECT pet_id FROM pets)
               AND date(v.given_date) IS NOT NULL
               AND NOT EXISTS (
                 SELECT 1 FROM vaccination_records r
                 WHERE r.pet_id = v.pet_id
                   AND r.vaccine_id = x.vaccine_id
                   AND r.vaccination_date = date(v.given_date)
                   AND r.batch_number IS v.batch_number
               )",
            [],
        )
        .context("failed to import legacy vaccination rows")?;
    ctx.backfilled("vaccination_records", records);
    Ok(())
}

fn drop_vaccination_system(ctx: &mut StepContext<'_>) -> Result<()> {
    if ctx.require_table("vaccination_records")? {
        ctx.backup(
            "vaccination_records",
            false,
            "SELECT * FROM vaccination_records",
        )?;
        ctx.conn
            .execute_batch("DROP TABLE vaccination_records;")
            .context("failed to drop vaccination_records")?;
    }
    if ctx.require_table("vaccines")? {
        ctx.backup("vaccines", false, "SELECT * FROM vaccines")?;
        ctx.conn
            .execute_batch("DROP TABLE vaccines;")
            .context("failed to drop vaccines")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// f7c6d8a9b0e1 modify_pets_owners
// ---------------------------------------------------------------------------

const PET_CLINICAL_COLUMNS: [&str; 3] = ["microchip_number", "is_neutered", "blood_type"];
const OWNER_CONTACT_COLUMNS: [&str; 2] = ["emergency_contact", "preferred_payment_method"];

fn add_pet_owner_fields(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.snapshot("pets")?;
    ctx.snapshot("owners")?;

    ctx.conn
        .execute_batch(
            "ALTER TABLE pets ADD COLUMN microchip_number TEXT
               CHECK (microchip_number IS NULL OR length(microchip_number) <= 50);
             CREATE UNIQUE INDEX uq_pets_microchip_number ON pets(microchip_number);
             ALTER TABLE pets ADD COLUMN is_neutered INTEGER NOT NULL DEFAULT 0
               CHECK (is_neutered IN (0, 1));
             ALTER TABLE pets ADD COLUMN blood_type TEXT
               CHECK (blood_type IS NULL OR length(blood_type) <= 10);
             ALTER TABLE owners ADD COLUMN emergency_contact TEXT
               CHECK (emergency_contact IS NULL OR length(emergency_contact) <= 20);
             ALTER TABLE owners ADD COLUMN preferred_payment_method TEXT
               CHECK (
                 preferred_payment_method IS NULL
                 OR preferred_payment_method IN ('cash', 'credit', 'debit', 'insurance')
               );",
        )
        .context("failed to add pet and owner columns")?;

    let initialized = ctx
        .conn
        .execute("UPDATE pets SET is_neutered = 0 WHERE is_neutered IS NULL", [])
        .context("failed to initialize pets.is_neutered")?;
    ctx.backfilled("pets", initialized);

    if let Some(backup) = ctx.revert_backup("pets", true)? {
        ctx.conn
            .execute(
                &format!(
                    "UPDATE pets
                     SET microchip_number = b.microchip_number,
                         is_neutered = COALESCE(b.is_neutered, 0),
                         blood_type = b.blood_type
                     FROM {backup} AS b
                     WHERE b.pet_id = pets.pet_id"
                ),
                [],
            )
            .map_err(|err| write_error(err, "failed to restore pet columns from backup"))?;
        ctx.consume_backup(backup)?;
    }
    if let Some(backup) = ctx.revert_backup("owners", true)? {
        ctx.conn
            .execute(
                &format!(
                    "UPDATE owners
                     SET emergency_contact = b.emergency_contact,
                         preferred_payment_method = b.preferred_payment_method
                     FROM {backup} AS b
                     WHERE b.owner_id = owners.owner_id"
                ),
                [],
            )
            .context("failed to restore owner columns from backup")?;
        ctx.consume_backup(backup)?;
    }
    Ok(())
}

fn drop_pet_owner_fields(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch("DROP INDEX IF EXISTS uq_pets_microchip_number;")
        .context("failed to drop uq_pets_microchip_number")?;
    ctx.drop_new_columns("pets", "pet_id", &PET_CLINICAL_COLUMNS)?;
    ctx.drop_new_columns("owners", "owner_id", &OWNER_CONTACT_COLUMNS)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// a9b8c7d6e5f4 create_invoices
// ---------------------------------------------------------------------------

fn create_invoices(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.conn
        .execute_batch(
            "CREATE TABLE invoices (
               invoice_id INTEGER PRIMARY KEY AUTOINCREMENT,
               appointment_id INTEGER NOT NULL
                 REFERENCES appointments(appointment_id) ON DELETE CASCADE,
               invoice_number TEXT NOT NULL CHECK (length(invoice_number) <= 50),
               issue_date TEXT NOT NULL,
               subtotal INTEGER NOT NULL DEFAULT 0 CHECK (subtotal >= 0),
               tax_amount INTEGER NOT NULL DEFAULT 0 CHECK (tax_amount >= 0),
               total_amount INTEGER NOT NULL DEFAULT 0 CHECK (total_amount >= 0),
               payment_status TEXT NOT NULL DEFAULT 'pending' CHECK (
                 payment_status IN ('pending', 'partial', 'paid', 'overdue')
               ),
               payment_date TEXT,
               CONSTRAINT uq_invoices_invoice_number UNIQUE (invoice_number),
               CONSTRAINT uq_invoices_appointment UNIQUE (appointment_id)
             );",
        )
        .context("failed to create invoices")?;

    if let Some(backup) = ctx.revert_backup("invoices", false)? {
        ctx.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO invoices(
                       invoice_id, appointment_id, invoice_number, issue_date, subtotal,
                       tax_amount, total_amount, payment_status, payment_date
                     )
                     SELECT invoice_id, appointment_id, invoice_number, issue_date, subtotal,
                            tax_amount, total_amount, payment_status, payment_date
                     FROM {backup}
                     WHERE appointment_id IN (SELECT appointment_id FROM appointments)"
                ),
                [],
            )
            .context("failed to restore invoices from backup")?;
        ctx.consume_backup(backup)?;
    }

    let generated = backfill_placeholder_invoices(ctx.conn)?;
    ctx.backfilled("invoices", generated);
    Ok(())
}

fn drop_invoices(ctx: &mut StepContext<'_>) -> Result<()> {
    if !ctx.require_table("invoices")? {
        return Ok(());
    }
    ctx.backup("invoices", false, "SELECT * FROM invoices")?;
    ctx.conn
        .execute_batch("DROP TABLE invoices;")
        .context("failed to drop invoices")?;
    Ok(())
}

/// Invoice number and issue date for an appointment's placeholder invoice.
fn placeholder_invoice_fields(
    appointment_id: i64,
    appointment_date: &str,
) -> Result<(String, String)> {
    let parsed = parse_timestamp(appointment_date).map_err(|err| {
        anyhow!("appointment {appointment_id} has an unreadable date: {err}")
    })?;
    Ok((
        invoice_number(appointment_id, parsed)?,
        format_date(parsed.date())?,
    ))
}

/// Inserts a zero-valued pending invoice for one appointment and returns its id.
pub(crate) fn insert_placeholder_invoice(
    conn: &Connection,
    appointment_id: i64,
    appointment_date: &str,
) -> Result<i64> {
    let (number, issue_date) = placeholder_invoice_fields(appointment_id, appointment_date)?;
    conn.prepare_cached(
        "INSERT INTO invoices(
           appointment_id, invoice_number, issue_date, subtotal, tax_amount, total_amount,
           payment_status, payment_date
         ) VALUES (?1, ?2, ?3, 0, 0, 0, 'pending', NULL)",
    )?
    .execute(params![appointment_id, number, issue_date])
    .map_err(|err| write_error(err, "failed to insert placeholder invoice"))?;
    Ok(conn.last_insert_rowid())
}

/// One zero-valued pending invoice per completed appointment without one.
pub(crate) fn backfill_placeholder_invoices(conn: &Connection) -> Result<usize> {
    let mut select = conn.prepare(
        "SELECT a.appointment_id, a.appointment_date
         FROM appointments a
         WHERE a.status = 'completed'
           AND NOT EXISTS (SELECT 1 FROM invoices i WHERE i.appointment_id = a.appointment_id)
         ORDER BY a.appointment_id ASC",
    )?;
    let pending = collect_rows(select.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?)?;

    for (appointment_id, appointment_date) in &pending {
        insert_placeholder_invoice(conn, *appointment_id, appointment_date)?;
    }
    Ok(pending.len())
}

// ---------------------------------------------------------------------------
// b1c2d3e4f5a6 add_metrics
// ---------------------------------------------------------------------------

const VETERINARIAN_METRIC_COLUMNS: [&str; 3] = ["consultation_fee", "rating", "total_appointments"];
const PET_METRIC_COLUMNS: [&str; 2] = ["last_visit_date", "visit_count"];

fn add_metrics(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.snapshot("veterinarians")?;
    ctx.snapshot("pets")?;

    ctx.conn
        .execute_batch(
            "ALTER TABLE veterinarians ADD COLUMN consultation_fee INTEGER NOT NULL DEFAULT 0
               CHECK (consultation_fee >= 0);
             ALTER TABLE veterinarians ADD COLUMN rating REAL
               CHECK (rating IS NULL OR (rating >= 0 AND rating <= 5));
             ALTER TABLE veterinarians ADD COLUMN total_appointments INTEGER NOT NULL DEFAULT 0;
             ALTER TABLE pets ADD COLUMN last_visit_date TEXT;
             ALTER TABLE pets ADD COLUMN visit_count INTEGER NOT NULL DEFAULT 0;",
        )
        .context("failed to add metrics columns")?;

    if let Some(backup) = ctx.revert_backup("veterinarians", true)? {
        ctx.conn
            .execute(
                &format!(
                    "UPDATE veterinarians
                     SET consultation_fee = COALESCE(b.consultation_fee, 0),
                         rating = b.rating
                     FROM {backup} AS b
                     WHERE b.veterinarian_id = veterinarians.veterinarian_id"
                ),
                [],
            )
            .context("failed to restore veterinarian metrics from backup")?;
        ctx.consume_backup(backup)?;
    }
    // Pet metrics are derived, so their backup only needs clearing.
    if let Some(backup) = ctx.revert_backup("pets", true)? {
        ctx.consume_backup(backup)?;
    }

    let (vets, pets) = refresh_activity_metrics(ctx.conn)?;
    ctx.backfilled("veterinarians", vets);
    ctx.backfilled("pets", pets);
    Ok(())
}

fn drop_metrics(ctx: &mut StepContext<'_>) -> Result<()> {
    ctx.drop_new_columns(
        "veterinarians",
        "veterinarian_id",
        &VETERINARIAN_METRIC_COLUMNS,
    )?;
    ctx.drop_new_columns("pets", "pet_id", &PET_METRIC_COLUMNS)?;
    Ok(())
}

/// Recomputes completed-visit counters on veterinarians and pets.
pub(crate) fn refresh_activity_metrics(conn: &Connection) -> Result<(usize, usize)> {
    let vets = conn
        .execute(
            "UPDATE veterinarians
             SET total_appointments = (
               SELECT COUNT(*) FROM appointments a
               WHERE a.veterinarian_id = veterinarians.veterinarian_id
                 AND a.status = 'completed'
             )",
            [],
        )
        .context("failed to refresh veterinarian totals")?;
    let pets = conn
        .execute(
            "UPDATE pets
             SET visit_count = (
                   SELECT COUNT(*) FROM appointments a
                   WHERE a.pet_id = pets.pet_id AND a.status = 'completed'
                 ),
                 last_visit_date = (
                   SELECT date(MAX(a.appointment_date)) FROM appointments a
                   WHERE a.pet_id = pets.pet_id AND a.status = 'completed'
                 )",
            [],
        )
        .context("failed to refresh pet visit metrics")?;
    Ok((vets, pets))
}

/// Sets each veterinarian's fee to the average invoice total of their
/// appointments; veterinarians without invoices keep their fee.
pub(crate) fn refresh_consultation_fees(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE veterinarians
         SET consultation_fee = COALESCE((
           SELECT CAST(ROUND(AVG(i.total_amount)) AS INTEGER)
           FROM invoices i
           JOIN appointments a ON a.appointment_id = i.appointment_id
           WHERE a.veterinarian_id = veterinarians.veterinarian_id
         ), consultation_fee)",
        [],
    )
    .context("failed to refresh consultation fees")
}
