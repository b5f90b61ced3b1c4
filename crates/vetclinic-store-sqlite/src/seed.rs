use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::macros::{date, time};
use time::{Date, Duration, PrimitiveDateTime};
use tracing::{info, warn};
use vetclinic_core::{
    format_date, format_timestamp, now_utc, parse_date, Appointment, AppointmentInput,
    AppointmentStatus, ClinicError, Owner, OwnerInput, Pet, PetInput, Species, Veterinarian,
    VeterinarianInput,
};

use crate::migrations::{refresh_activity_metrics, refresh_consultation_fees, METRICS_VERSION};
use crate::{count_rows, SqliteClinicStore};

const SPECIALIZATIONS: [&str; 5] = [
    "General",
    "Surgery",
    "Dentistry",
    "Dermatology",
    "Internal Medicine",
];
const REASONS: [&str; 5] = ["Checkup", "Vaccination", "Illness", "Grooming", "Follow-up"];
const SAMPLE_VETERINARIANS: [(&str, &str, &str, &str); 5] = [
    ("Ana", "Pérez", "ana.perez@example.com", "Surgery"),
    ("Luis", "Martínez", "luis.martinez@example.com", "Dermatology"),
    ("María", "González", "maria.gonzalez@example.com", "Dentistry"),
    ("Carlos", "Ruiz", "carlos.ruiz@example.com", "Internal Medicine"),
    ("Elena", "Soto", "elena.soto@example.com", "General"),
];
/// Status rotation for seeded visits that lie before the anchor date.
const PAST_STATUSES: [AppointmentStatus; 10] = [
    AppointmentStatus::Completed,
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
    AppointmentStatus::Completed,
    AppointmentStatus::Completed,
    AppointmentStatus::NoShow,
    AppointmentStatus::Completed,
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
    AppointmentStatus::Completed,
];
/// Birth dates hang off a fixed day so re-runs find the same pets.
const BIRTH_EPOCH: Date = date!(2024 - 01 - 01);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SeedProfile {
    Sample,
    Initial,
    PostMigration,
}

impl SeedProfile {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Initial => "initial",
            Self::PostMigration => "post-migration",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sample" => Some(Self::Sample),
            "initial" => Some(Self::Initial),
            "post-migration" => Some(Self::PostMigration),
            _ => None,
        }
    }

    fn plan(self) -> SeedPlan {
        match self {
            Self::Sample => SeedPlan {
                veterinarians: 5,
                owners: 10,
                pets: 15,
                appointments: 30,
                first_day: -20,
                last_day: 20,
            },
            Self::Initial => SeedPlan {
                veterinarians: 10,
                owners: 20,
                pets: 30,
                appointments: 50,
                first_day: -90,
                last_day: 30,
            },
            Self::PostMigration => SeedPlan {
                veterinarians: 2,
                owners: 5,
                pets: 10,
                appointments: 20,
                first_day: -60,
                last_day: 30,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedPlan {
    veterinarians: usize,
    owners: usize,
    pets: usize,
    appointments: usize,
    first_day: i64,
    last_day: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOptions {
    pub profile: SeedProfile,
    /// Tags post-migration keys; values ≥ 5 also refresh metrics.
    pub migration: i64,
    /// `YYYY-MM-DD`; today (UTC) when absent.
    pub anchor_date: Option<String>,
    /// Seed even when the preflight finds existing rows.
    pub force: bool,
}

impl SeedOptions {
    #[must_use]
    pub fn new(profile: SeedProfile) -> Self {
        Self {
            profile,
            migration: 0,
            anchor_date: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightCounts {
    pub veterinarians: i64,
    pub owners: i64,
    pub pets: i64,
    pub appointments: i64,
}

impl PreflightCounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.veterinarians == 0 && self.owners == 0 && self.pets == 0 && self.appointments == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedTableReport {
    pub table: String,
    pub created: usize,
    pub existing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedReport {
    pub profile: SeedProfile,
    pub migration: i64,
    pub anchor_date: String,
    pub preflight: PreflightCounts,
    /// True when the preflight found data and `force` was not set.
    pub aborted: bool,
    pub tables: Vec<SeedTableReport>,
    pub metrics_refreshed: bool,
}

/// Row counts of the four baseline tables.
pub fn preflight_counts(store: &SqliteClinicStore) -> Result<PreflightCounts> {
    let conn = &store.conn;
    Ok(PreflightCounts {
        veterinarians: count_rows(conn, "veterinarians").context("preflight failed")?,
        owners: count_rows(conn, "owners").context("preflight failed")?,
        pets: count_rows(conn, "pets").context("preflight failed")?,
        appointments: count_rows(conn, "appointments").context("preflight failed")?,
    })
}

#[derive(Default)]
struct Tally {
    created: usize,
    existing: usize,
}

impl Tally {
    fn record<T>(&mut self, outcome: (T, bool)) -> T {
        if outcome.1 {
            self.created += 1;
        } else {
            self.existing += 1;
        }
        outcome.0
    }

    fn report(self, table: &str) -> SeedTableReport {
        SeedTableReport {
            table: table.to_string(),
            created: self.created,
            existing: self.existing,
        }
    }
}

impl SqliteClinicStore {
    /// Loads a deterministic data set. Every row is get-or-create on a
    /// natural key, so running a profile twice leaves the counts unchanged.
    pub fn seed(&self, options: &SeedOptions) -> Result<SeedReport> {
        let anchor = match options.anchor_date.as_deref() {
            Some(raw) => parse_date(raw)?,
            None => now_utc().date(),
        };
        if options.migration < 0 {
            return Err(ClinicError::Validation("migration tag cannot be negative".to_string()).into());
        }
        let preflight = preflight_counts(self)?;
        let mut report = SeedReport {
            profile: options.profile,
            migration: options.migration,
            anchor_date: format_date(anchor)?,
            preflight,
            aborted: false,
            tables: Vec::new(),
            metrics_refreshed: false,
        };

        if !preflight.is_empty() && !options.force {
            warn!(
                profile = options.profile.as_str(),
                veterinarians = preflight.veterinarians,
                owners = preflight.owners,
                pets = preflight.pets,
                appointments = preflight.appointments,
                "database already contains data; seeding aborted (force to proceed)"
            );
            report.aborted = true;
            return Ok(report);
        }

        let plan = options.profile.plan();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to start seed transaction")?;

        let mut tally = Tally::default();
        let mut vets = Vec::with_capacity(plan.veterinarians);
        for index in 0..plan.veterinarians {
            let input = veterinarian_input(options, index);
            vets.push(tally.record(self.get_or_create_veterinarian(&input)?));
        }
        report.tables.push(tally.report("veterinarians"));

        let mut tally = Tally::default();
        let mut owners = Vec::with_capacity(plan.owners);
        for index in 0..plan.owners {
            let input = owner_input(options, index);
            owners.push(tally.record(self.get_or_create_owner(&input)?));
        }
        report.tables.push(tally.report("owners"));

        let mut tally = Tally::default();
        let mut pets = Vec::with_capacity(plan.pets);
        for index in 0..plan.pets {
            let owner = &owners[(index * 7) % owners.len()];
            let input = pet_input(options, index, owner.owner_id)?;
            pets.push(tally.record(self.get_or_create_pet(&input)?));
        }
        report.tables.push(tally.report("pets"));

        let mut tally = Tally::default();
        for index in 0..plan.appointments {
            let pet = &pets[(index * 5 + 1) % pets.len()];
            let vet = &vets[(index * 3) % vets.len()];
            let input = appointment_input(options, plan, anchor, index, pet, vet)?;
            tally.record(self.get_or_create_appointment(&input)?);
        }
        report.tables.push(tally.report("appointments"));

        if options.profile == SeedProfile::PostMigration
            && options.migration >= METRICS_VERSION
            && self.schema_version()? >= METRICS_VERSION
        {
            refresh_activity_metrics(&tx)?;
            refresh_consultation_fees(&tx)?;
            report.metrics_refreshed = true;
        }

        tx.commit().context("failed to commit seed transaction")?;
        info!(
            profile = options.profile.as_str(),
            migration = options.migration,
            anchor_date = %report.anchor_date,
            metrics_refreshed = report.metrics_refreshed,
            "seed completed"
        );
        Ok(report)
    }

    /// Looks the veterinarian up by license number, then by email.
    pub fn get_or_create_veterinarian(
        &self,
        input: &VeterinarianInput,
    ) -> Result<(Veterinarian, bool)> {
        if let Some(found) = self.find_veterinarian_by_license(&input.license_number)? {
            return Ok((found, false));
        }
        if let Some(found) = self.find_veterinarian_by_email(&input.email)? {
            return Ok((found, false));
        }
        Ok((self.create_veterinarian(input)?, true))
    }

    pub fn get_or_create_owner(&self, input: &OwnerInput) -> Result<(Owner, bool)> {
        if let Some(found) = self.find_owner_by_email(&input.email)? {
            return Ok((found, false));
        }
        Ok((self.create_owner(input)?, true))
    }

    pub fn get_or_create_pet(&self, input: &PetInput) -> Result<(Pet, bool)> {
        if let Some(found) = self.find_pet(input.owner_id, &input.name, input.birth_date.as_deref())? {
            return Ok((found, false));
        }
        Ok((self.create_pet(input)?, true))
    }

    /// Matches on (pet, veterinarian, notes) first so slot-tagged seed rows
    /// survive a moved anchor, then on (pet, veterinarian, date).
    pub fn get_or_create_appointment(&self, input: &AppointmentInput) -> Result<(Appointment, bool)> {
        let appointment_date = input.validate()?;
        let existing_id = match input.notes.as_deref() {
            Some(notes) => self.find_appointment_id(
                "pet_id = ?1 AND veterinarian_id = ?2 AND notes = ?3",
                input,
                notes,
            )?,
            None => None,
        };
        let existing_id = match existing_id {
            Some(id) => Some(id),
            None => self.find_appointment_id(
                "pet_id = ?1 AND veterinarian_id = ?2 AND appointment_date = ?3",
                input,
                &appointment_date,
            )?,
        };
        if let Some(id) = existing_id {
            return Ok((self.get_appointment(id)?, false));
        }
        Ok((self.insert_appointment_unchecked(input)?, true))
    }

    fn find_appointment_id(
        &self,
        predicate: &str,
        input: &AppointmentInput,
        value: &str,
    ) -> Result<Option<i64>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT appointment_id FROM appointments
                     WHERE {predicate}
                     ORDER BY appointment_id ASC
                     LIMIT 1"
                ),
                params![input.pet_id, input.veterinarian_id, value],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up appointment")
    }
}

fn veterinarian_input(options: &SeedOptions, index: usize) -> VeterinarianInput {
    let number = index + 1;
    let (license_number, first_name, last_name, email, specialization) = match options.profile {
        SeedProfile::Sample => {
            let (first, last, email, specialization) =
                SAMPLE_VETERINARIANS[index % SAMPLE_VETERINARIANS.len()];
            (
                format!("VET-{}", 1000 + number),
                first.to_string(),
                last.to_string(),
                email.to_string(),
                specialization,
            )
        }
        SeedProfile::Initial => (
            format!("VET-2{number:03}"),
            format!("Vet{number}"),
            "Seed".to_string(),
            format!("vet{number}@example.com"),
            SPECIALIZATIONS[index % SPECIALIZATIONS.len()],
        ),
        SeedProfile::PostMigration => (
            format!("VET-M{}-{number}", options.migration),
            format!("Post{number}"),
            "Migration".to_string(),
            format!("post_mig{}_vet{number}@example.com", options.migration),
            SPECIALIZATIONS[index % 3],
        ),
    };

    VeterinarianInput {
        license_number,
        first_name,
        last_name,
        email,
        phone: None,
        specialization: Some(specialization.to_string()),
        hire_date: None,
        is_active: Some(true),
        consultation_fee: None,
        rating: None,
    }
}

fn owner_input(options: &SeedOptions, index: usize) -> OwnerInput {
    let number = index + 1;
    let (first_name, last_name, email, phone, address) = match options.profile {
        SeedProfile::Sample => (
            format!("Owner{number}"),
            "Seed",
            format!("owner{number}@example.com"),
            format!("+1-555-10{number:03}"),
            format!("Seed Ave {number}"),
        ),
        SeedProfile::Initial => (
            format!("Owner{number}"),
            "Initial",
            format!("initial_owner{number}@example.com"),
            format!("+1-555-20{number:03}"),
            format!("Initial St {number}"),
        ),
        SeedProfile::PostMigration => (
            format!("PostOwner{number}"),
            "Migration",
            format!("post_mig{}_owner{number}@example.com", options.migration),
            format!("+1-555-30{number:03}"),
            format!("Post Migration St {number}"),
        ),
    };

    OwnerInput {
        first_name,
        last_name: last_name.to_string(),
        email,
        phone: Some(phone),
        address: Some(address),
        emergency_contact: None,
        preferred_payment_method: None,
    }
}

fn pet_input(options: &SeedOptions, index: usize, owner_id: i64) -> Result<PetInput> {
    let number = index + 1;
    let name = match options.profile {
        SeedProfile::Sample => format!("Pet{number}"),
        SeedProfile::Initial => format!("InitPet{number}"),
        SeedProfile::PostMigration => format!("PostPet{}-{number}", options.migration),
    };
    let age_days = 200 + i64::try_from((index * 397) % 3800)?;
    let weight_hundredths = 150 + (index * 733) % 2850;

    Ok(PetInput {
        name,
        species: Species::ALL[index % Species::ALL.len()],
        breed: Some("Mixed".to_string()),
        birth_date: Some(format_date(BIRTH_EPOCH - Duration::days(age_days))?),
        weight: f64::from(u32::try_from(weight_hundredths)?) / 100.0,
        owner_id,
        microchip_number: None,
        is_neutered: None,
        blood_type: None,
    })
}

fn appointment_input(
    options: &SeedOptions,
    plan: SeedPlan,
    anchor: Date,
    index: usize,
    pet: &Pet,
    vet: &Veterinarian,
) -> Result<AppointmentInput> {
    let span = plan.last_day - plan.first_day + 1;
    let step = i64::try_from(index)?;
    let offset_days = plan.first_day + (step * 17) % span;
    let offset_minutes = 15 * (step % 4);
    let at = PrimitiveDateTime::new(anchor, time!(09:00)).assume_utc()
        + Duration::days(offset_days)
        + Duration::minutes(offset_minutes);

    let status = if offset_days >= 0 {
        AppointmentStatus::Scheduled
    } else {
        PAST_STATUSES[index % PAST_STATUSES.len()]
    };
    let notes = match options.profile {
        SeedProfile::Sample => "Seeded appointment".to_string(),
        SeedProfile::Initial => "Initial seed appointment".to_string(),
        SeedProfile::PostMigration => {
            format!("Post-migration {} seeded appointment", options.migration)
        }
    };

    Ok(AppointmentInput {
        pet_id: pet.pet_id,
        veterinarian_id: vet.veterinarian_id,
        appointment_date: format_timestamp(at)?,
        reason: REASONS[index % REASONS.len()].to_string(),
        status: Some(status),
        notes: Some(format!("{notes} (slot {})", index + 1)),
    })
}
