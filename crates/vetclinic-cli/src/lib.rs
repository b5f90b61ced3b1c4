//! Embedded command surface for the `vetclinic` binary.
//!
//! Hosts can drive the same behavior without spawning a process through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_db_with_url`] for a [`DbCommand`] against a database URL.
//! - [`run_db`] and [`run_seed`] against an already opened [`SqliteClinicStore`].

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;
use vetclinic_store_sqlite::{
    MigrationOptions, MigrationTarget, RevertOutcome, SeedOptions, SeedProfile,
    SqliteClinicStore, DEFAULT_DATABASE_URL,
};

#[derive(Debug, Parser)]
#[command(name = "vetclinic")]
#[command(about = "Veterinary clinic schema migrations and seed data")]
pub struct Cli {
    #[arg(long, env = "VETCLINIC_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Seed(SeedArgs),
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Current and head revision with applied and pending steps.
    Status,
    /// Every apply/revert attempt, oldest first.
    History,
    Upgrade(MigrateArgs),
    Downgrade(MigrateArgs),
    Backups {
        #[command(subcommand)]
        command: BackupsCommand,
    },
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Revision id or prefix, version number, `head`, or `base`.
    #[arg(long)]
    to: Option<String>,
    #[arg(long)]
    skip_backups: bool,
}

#[derive(Debug, Subcommand)]
pub enum BackupsCommand {
    List,
    Drop {
        #[arg(long)]
        revision: String,
    },
}

#[derive(Debug, Args)]
pub struct SeedArgs {
    #[arg(long, value_enum, default_value_t = ProfileArg::Sample)]
    profile: ProfileArg,
    /// Tags post-migration seed keys; 5 or more also refreshes metrics.
    #[arg(long, default_value_t = 0)]
    migration: i64,
    /// Day (YYYY-MM-DD) appointments are spread around; defaults to today.
    #[arg(long)]
    anchor_date: Option<String>,
    /// Proceed even when the database already holds rows.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Sample,
    Initial,
    PostMigration,
}

impl From<ProfileArg> for SeedProfile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Sample => Self::Sample,
            ProfileArg::Initial => Self::Initial,
            ProfileArg::PostMigration => Self::PostMigration,
        }
    }
}

#[derive(Debug, Serialize)]
struct DroppedBackups {
    revision: String,
    dropped: Vec<String>,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    debug!(database_url = %cli.database_url, "opening clinic database");
    let mut store = SqliteClinicStore::open_url(&cli.database_url)?;
    store.initialize()?;
    match cli.command {
        Command::Db { command } => run_db(*command, &mut store),
        Command::Seed(args) => run_seed(&args, &store),
    }
}

pub fn run_db_with_url(database_url: &str, command: DbCommand) -> Result<()> {
    let mut store = SqliteClinicStore::open_url(database_url)?;
    store.initialize()?;
    run_db(command, &mut store)
}

pub fn run_db(command: DbCommand, store: &mut SqliteClinicStore) -> Result<()> {
    match command {
        DbCommand::Status => print_json(&store.migration_status()?),
        DbCommand::History => print_json(&store.migration_history()?),
        DbCommand::Upgrade(args) => {
            let target = match args.to.as_deref() {
                Some(raw) => MigrationTarget::parse(raw)?,
                None => MigrationTarget::Head,
            };
            let report = store.upgrade(target, migration_options(&args))?;
            print_json(&report)
        }
        DbCommand::Downgrade(args) => {
            let target = args.to.as_deref().map(MigrationTarget::parse).transpose()?;
            let report = store.downgrade(target, migration_options(&args))?;
            print_json(&report)?;
            match report.reverted.last().map(|step| &step.outcome) {
                Some(RevertOutcome::NotRestored { reason }) => Err(anyhow!(
                    "downgrade stopped at version {}: {reason}",
                    report.to_version
                )),
                _ => Ok(()),
            }
        }
        DbCommand::Backups { command } => match command {
            BackupsCommand::List => print_json(&store.list_backups()?),
            BackupsCommand::Drop { revision } => {
                let dropped = store.drop_backups(&revision)?;
                print_json(&DroppedBackups { revision, dropped })
            }
        },
    }
}

pub fn run_seed(args: &SeedArgs, store: &SqliteClinicStore) -> Result<()> {
    let report = store.seed(&SeedOptions {
        profile: args.profile.into(),
        migration: args.migration,
        anchor_date: args.anchor_date.clone(),
        force: args.yes,
    })?;
    print_json(&report)?;
    if report.aborted {
        eprintln!("database already contains data; rerun with --yes to seed anyway");
    }
    Ok(())
}

fn migration_options(args: &MigrateArgs) -> MigrationOptions {
    MigrationOptions {
        skip_backups: args.skip_backups,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
