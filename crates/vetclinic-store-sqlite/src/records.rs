use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use vetclinic_core::{
    format_date, now_timestamp, now_utc, parse_date, Appointment,
    AppointmentInput, AppointmentStatus, Cents, ClinicError, Invoice, InvoicePaymentInput,
    MedicalRecord, MedicalRecordInput, Owner, OwnerContact, OwnerInput, PaymentMethod,
    PaymentStatus, Pet, PetClinical, PetInput, PetMetrics, RevenueBucket, RevenueReport, Species,
    VaccinationRecord, VaccinationRecordInput, Vaccine, VaccineInput, Veterinarian,
    VeterinarianInput, VeterinarianMetrics,
};

use crate::migrations::{
    insert_placeholder_invoice, INVOICES_VERSION, MEDICAL_RECORDS_VERSION, METRICS_VERSION,
    PET_OWNER_FIELDS_VERSION, VACCINATION_VERSION,
};
use crate::{bool_to_sql, collect_rows, write_error, SqliteClinicStore};

const VETERINARIAN_COLUMNS: &str = "veterinarian_id, license_number, first_name, last_name, email, \
     phone, specialization, hire_date, is_active";
const VETERINARIAN_METRIC_COLUMNS: &str = ", consultation_fee, rating, total_appointments";
const OWNER_COLUMNS: &str =
    "owner_id, first_name, last_name, email, phone, address, registration_date";
const OWNER_CONTACT_COLUMNS: &str = ", emergency_contact, preferred_payment_method";
const PET_COLUMNS: &str =
    "pet_id, name, species, breed, birth_date, weight, owner_id, registration_date";
const PET_CLINICAL_COLUMNS: &str = ", microchip_number, is_neutered, blood_type";
const PET_METRIC_COLUMNS: &str = ", last_visit_date, visit_count";
const APPOINTMENT_COLUMNS: &str = "a.appointment_id, a.pet_id, a.veterinarian_id, \
     a.appointment_date, a.reason, a.status, a.notes, a.created_at";
const MEDICAL_RECORD_COLUMNS: &str = "m.record_id, m.appointment_id, m.diagnosis, m.treatment, \
     m.prescription, m.follow_up_required, m.created_at";
const VACCINE_COLUMNS: &str = "vaccine_id, name, manufacturer, species_applicable";
const VACCINATION_COLUMNS: &str = "vaccination_id, pet_id, vaccine_id, vaccination_date, \
     next_dose_date, veterinarian_id, batch_number";
const INVOICE_COLUMNS: &str = "invoice_id, appointment_id, invoice_number, issue_date, subtotal, \
     tax_amount, total_amount, payment_status, payment_date";

/// Optional filters for listing appointments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppointmentQuery {
    pub status: Option<AppointmentStatus>,
    pub pet_id: Option<i64>,
    pub veterinarian_id: Option<i64>,
}

/// Inclusive issue-date window for the revenue report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn veterinarian_columns(version: i64) -> String {
    let mut columns = VETERINARIAN_COLUMNS.to_string();
    if version >= METRICS_VERSION {
        columns.push_str(VETERINARIAN_METRIC_COLUMNS);
    }
    columns
}

fn owner_columns(version: i64) -> String {
    let mut columns = OWNER_COLUMNS.to_string();
    if version >= PET_OWNER_FIELDS_VERSION {
        columns.push_str(OWNER_CONTACT_COLUMNS);
    }
    columns
}

fn pet_columns(version: i64) -> String {
    let mut columns = PET_COLUMNS.to_string();
    if version >= PET_OWNER_FIELDS_VERSION {
        columns.push_str(PET_CLINICAL_COLUMNS);
    }
    if version >= METRICS_VERSION {
        columns.push_str(PET_METRIC_COLUMNS);
    }
    columns
}

impl SqliteClinicStore {
    // -----------------------------------------------------------------------
    // Veterinarians
    // -----------------------------------------------------------------------

    pub fn list_veterinarians(&self) -> Result<Vec<Veterinarian>> {
        let version = self.schema_version()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM veterinarians ORDER BY veterinarian_id ASC",
            veterinarian_columns(version)
        ))?;
        let rows = stmt.query_map([], |row| parse_veterinarian_row(row, version))?;
        collect_rows(rows)
    }

    pub fn get_veterinarian(&self, veterinarian_id: i64) -> Result<Veterinarian> {
        self.find_veterinarian_where("veterinarian_id = ?1", &veterinarian_id)?
            .ok_or_else(|| ClinicError::not_found("veterinarian", veterinarian_id).into())
    }

    pub fn find_veterinarian_by_license(&self, license_number: &str) -> Result<Option<Veterinarian>> {
        self.find_veterinarian_where("license_number = ?1", &license_number)
    }

    pub fn find_veterinarian_by_email(&self, email: &str) -> Result<Option<Veterinarian>> {
        self.find_veterinarian_where("email = ?1", &email)
    }

    fn find_veterinarian_where(
        &self,
        predicate: &str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<Option<Veterinarian>> {
        let version = self.schema_version()?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM veterinarians WHERE {predicate}",
                    veterinarian_columns(version)
                ),
                [value],
                |row| parse_veterinarian_row(row, version),
            )
            .optional()
            .context("failed to load veterinarian")
    }

    pub fn create_veterinarian(&self, input: &VeterinarianInput) -> Result<Veterinarian> {
        input.validate()?;
        let version = self.schema_version()?;
        if input.uses_metrics_fields() {
            self.require_schema("veterinarians.metrics", METRICS_VERSION)?;
        }

        if version >= METRICS_VERSION {
            self.conn.execute(
                "INSERT INTO veterinarians(
                   license_number, first_name, last_name, email, phone, specialization,
                   hire_date, is_active, consultation_fee, rating
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, 0), ?10)",
                params![
                    input.license_number,
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.specialization,
                    input.hire_date,
                    bool_to_sql(input.is_active.unwrap_or(true)),
                    input.consultation_fee.map(|fee| fee.0),
                    input.rating,
                ],
            )
        } else {
            self.conn.execute(
                "INSERT INTO veterinarians(
                   license_number, first_name, last_name, email, phone, specialization,
                   hire_date, is_active
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    input.license_number,
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.specialization,
                    input.hire_date,
                    bool_to_sql(input.is_active.unwrap_or(true)),
                ],
            )
        }
        .map_err(|err| write_error(err, "failed to insert veterinarian"))?;

        self.get_veterinarian(self.conn.last_insert_rowid())
    }

    pub fn update_veterinarian(
        &self,
        veterinarian_id: i64,
        input: &VeterinarianInput,
    ) -> Result<Veterinarian> {
        input.validate()?;
        self.get_veterinarian(veterinarian_id)?;
        if input.uses_metrics_fields() {
            self.require_schema("veterinarians.metrics", METRICS_VERSION)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE veterinarians
             SET license_number = ?2, first_name = ?3, last_name = ?4, email = ?5,
                 phone = COALESCE(?6, phone),
                 specialization = COALESCE(?7, specialization),
                 hire_date = COALESCE(?8, hire_date),
                 is_active = COALESCE(?9, is_active)
             WHERE veterinarian_id = ?1",
            params![
                veterinarian_id,
                input.license_number,
                input.first_name,
                input.last_name,
                input.email,
                input.phone,
                input.specialization,
                input.hire_date,
                input.is_active.map(bool_to_sql),
            ],
        )
        .map_err(|err| write_error(err, "failed to update veterinarian"))?;
        if input.uses_metrics_fields() {
            tx.execute(
                "UPDATE veterinarians
                 SET consultation_fee = COALESCE(?2, consultation_fee),
                     rating = COALESCE(?3, rating)
                 WHERE veterinarian_id = ?1",
                params![
                    veterinarian_id,
                    input.consultation_fee.map(|fee| fee.0),
                    input.rating
                ],
            )
            .map_err(|err| write_error(err, "failed to update veterinarian metrics"))?;
        }
        tx.commit().context("failed to commit veterinarian update")?;

        self.get_veterinarian(veterinarian_id)
    }

    pub fn delete_veterinarian(&self, veterinarian_id: i64) -> Result<()> {
        self.get_veterinarian(veterinarian_id)?;
        if self.has_upcoming_appointments("veterinarian_id", veterinarian_id)? {
            return Err(ClinicError::InvalidState(
                "veterinarian has upcoming appointments and cannot be deleted".to_string(),
            )
            .into());
        }
        self.conn
            .execute(
                "DELETE FROM veterinarians WHERE veterinarian_id = ?1",
                params![veterinarian_id],
            )
            .map_err(|err| write_error(err, "failed to delete veterinarian"))?;
        Ok(())
    }

    pub fn veterinarian_appointments(&self, veterinarian_id: i64) -> Result<Vec<Appointment>> {
        self.get_veterinarian(veterinarian_id)?;
        self.query_appointments(
            "FROM appointments a WHERE a.veterinarian_id = ?1 ORDER BY a.appointment_date ASC",
            params![veterinarian_id],
        )
    }

    /// Appointments of one veterinarian, optionally limited to a UTC day.
    pub fn veterinarian_schedule(
        &self,
        veterinarian_id: i64,
        day: Option<&str>,
    ) -> Result<Vec<Appointment>> {
        self.get_veterinarian(veterinarian_id)?;
        if let Some(raw) = day {
            parse_date(raw)?;
        }
        self.query_appointments(
            "FROM appointments a
             WHERE a.veterinarian_id = ?1 AND (?2 IS NULL OR date(a.appointment_date) = ?2)
             ORDER BY a.appointment_date ASC",
            params![veterinarian_id, day],
        )
    }

    // -----------------------------------------------------------------------
    // Owners
    // -----------------------------------------------------------------------

    pub fn list_owners(&self) -> Result<Vec<Owner>> {
        let version = self.schema_version()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM owners ORDER BY owner_id ASC",
            owner_columns(version)
        ))?;
        let rows = stmt.query_map([], |row| parse_owner_row(row, version))?;
        collect_rows(rows)
    }

    pub fn get_owner(&self, owner_id: i64) -> Result<Owner> {
        self.find_owner_where("owner_id = ?1", &owner_id)?
            .ok_or_else(|| ClinicError::not_found("owner", owner_id).into())
    }

    pub fn find_owner_by_email(&self, email: &str) -> Result<Option<Owner>> {
        self.find_owner_where("email = ?1", &email)
    }

    fn find_owner_where(&self, predicate: &str, value: &dyn rusqlite::ToSql) -> Result<Option<Owner>> {
        let version = self.schema_version()?;
        self.conn
            .query_row(
                &format!("SELECT {} FROM owners WHERE {predicate}", owner_columns(version)),
                [value],
                |row| parse_owner_row(row, version),
            )
            .optional()
            .context("failed to load owner")
    }

    pub fn create_owner(&self, input: &OwnerInput) -> Result<Owner> {
        input.validate()?;
        let version = self.schema_version()?;
        if input.uses_contact_fields() {
            self.require_schema("owners.contact_fields", PET_OWNER_FIELDS_VERSION)?;
        }
        let registered_at = now_timestamp()?;

        if version >= PET_OWNER_FIELDS_VERSION {
            self.conn.execute(
                "INSERT INTO owners(
                   first_name, last_name, email, phone, address, registration_date,
                   emergency_contact, preferred_payment_method
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.address,
                    registered_at,
                    input.emergency_contact,
                    input.preferred_payment_method.map(PaymentMethod::as_str),
                ],
            )
        } else {
            self.conn.execute(
                "INSERT INTO owners(first_name, last_name, email, phone, address, registration_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.address,
                    registered_at,
                ],
            )
        }
        .map_err(|err| write_error(err, "failed to insert owner"))?;

        self.get_owner(self.conn.last_insert_rowid())
    }

    pub fn update_owner(&self, owner_id: i64, input: &OwnerInput) -> Result<Owner> {
        input.validate()?;
        self.get_owner(owner_id)?;
        let version = self.schema_version()?;
        if input.uses_contact_fields() {
            self.require_schema("owners.contact_fields", PET_OWNER_FIELDS_VERSION)?;
        }

        if version >= PET_OWNER_FIELDS_VERSION {
            self.conn.execute(
                "UPDATE owners
                 SET first_name = ?2, last_name = ?3, email = ?4,
                     phone = COALESCE(?5, phone), address = COALESCE(?6, address),
                     emergency_contact = COALESCE(?7, emergency_contact),
                     preferred_payment_method = COALESCE(?8, preferred_payment_method)
                 WHERE owner_id = ?1",
                params![
                    owner_id,
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.address,
                    input.emergency_contact,
                    input.preferred_payment_method.map(PaymentMethod::as_str),
                ],
            )
        } else {
            self.conn.execute(
                "UPDATE owners
                 SET first_name = ?2, last_name = ?3, email = ?4,
                     phone = COALESCE(?5, phone), address = COALESCE(?6, address)
                 WHERE owner_id = ?1",
                params![
                    owner_id,
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.address,
                ],
            )
        }
        .map_err(|err| write_error(err, "failed to update owner"))?;

        self.get_owner(owner_id)
    }

    pub fn delete_owner(&self, owner_id: i64) -> Result<()> {
        self.get_owner(owner_id)?;
        let has_pets = self
            .conn
            .query_row(
                "SELECT 1 FROM pets WHERE owner_id = ?1 LIMIT 1",
                params![owner_id],
                |_| Ok(()),
            )
            .optional()
            .context("failed to check owner pets")?
            .is_some();
        if has_pets {
            return Err(ClinicError::InvalidState(
                "owner has pets and cannot be deleted".to_string(),
            )
            .into());
        }
        self.conn
            .execute("DELETE FROM owners WHERE owner_id = ?1", params![owner_id])
            .map_err(|err| write_error(err, "failed to delete owner"))?;
        Ok(())
    }

    pub fn owner_pets(&self, owner_id: i64) -> Result<Vec<Pet>> {
        self.get_owner(owner_id)?;
        let version = self.schema_version()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pets WHERE owner_id = ?1 ORDER BY pet_id ASC",
            pet_columns(version)
        ))?;
        let rows = stmt.query_map(params![owner_id], |row| parse_pet_row(row, version))?;
        collect_rows(rows)
    }

    pub fn owner_appointments(&self, owner_id: i64) -> Result<Vec<Appointment>> {
        self.get_owner(owner_id)?;
        self.query_appointments(
            "FROM appointments a
             JOIN pets p ON p.pet_id = a.pet_id
             WHERE p.owner_id = ?1
             ORDER BY a.appointment_date ASC",
            params![owner_id],
        )
    }

    // -----------------------------------------------------------------------
    // Pets
    // -----------------------------------------------------------------------

    pub fn list_pets(&self) -> Result<Vec<Pet>> {
        let version = self.schema_version()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pets ORDER BY pet_id ASC",
            pet_columns(version)
        ))?;
        let rows = stmt.query_map([], |row| parse_pet_row(row, version))?;
        collect_rows(rows)
    }

    pub fn get_pet(&self, pet_id: i64) -> Result<Pet> {
        let version = self.schema_version()?;
        self.conn
            .query_row(
                &format!("SELECT {} FROM pets WHERE pet_id = ?1", pet_columns(version)),
                params![pet_id],
                |row| parse_pet_row(row, version),
            )
            .optional()
            .context("failed to load pet")?
            .ok_or_else(|| ClinicError::not_found("pet", pet_id).into())
    }

    /// Pet identified by owner, name and birth date (absent dates match each other).
    pub fn find_pet(
        &self,
        owner_id: i64,
        name: &str,
        birth_date: Option<&str>,
    ) -> Result<Option<Pet>> {
        let version = self.schema_version()?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM pets
                     WHERE owner_id = ?1 AND name = ?2 AND birth_date IS ?3
                     ORDER BY pet_id ASC
                     LIMIT 1",
                    pet_columns(version)
                ),
                params![owner_id, name, birth_date],
                |row| parse_pet_row(row, version),
            )
            .optional()
            .context("failed to look up pet")
    }

    pub fn create_pet(&self, input: &PetInput) -> Result<Pet> {
        input.validate()?;
        let version = self.schema_version()?;
        if input.uses_clinical_fields() {
            self.require_schema("pets.clinical_fields", PET_OWNER_FIELDS_VERSION)?;
        }
        self.require_owner_reference(input.owner_id)?;
        let registered_at = now_timestamp()?;

        if version >= PET_OWNER_FIELDS_VERSION {
            self.conn.execute(
                "INSERT INTO pets(
                   name, species, breed, birth_date, weight, owner_id, registration_date,
                   microchip_number, is_neutered, blood_type
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, 0), ?10)",
                params![
                    input.name,
                    input.species.as_str(),
                    input.breed,
                    input.birth_date,
                    input.weight,
                    input.owner_id,
                    registered_at,
                    input.microchip_number,
                    input.is_neutered.map(bool_to_sql),
                    input.blood_type,
                ],
            )
        } else {
            self.conn.execute(
                "INSERT INTO pets(name, species, breed, birth_date, weight, owner_id, registration_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    input.name,
                    input.species.as_str(),
                    input.breed,
                    input.birth_date,
                    input.weight,
                    input.owner_id,
                    registered_at,
                ],
            )
        }
        .map_err(|err| write_error(err, "failed to insert pet"))?;

        self.get_pet(self.conn.last_insert_rowid())
    }

    pub fn update_pet(&self, pet_id: i64, input: &PetInput) -> Result<Pet> {
        input.validate()?;
        self.get_pet(pet_id)?;
        let version = self.schema_version()?;
        if input.uses_clinical_fields() {
            self.require_schema("pets.clinical_fields", PET_OWNER_FIELDS_VERSION)?;
        }
        self.require_owner_reference(input.owner_id)?;

        if version >= PET_OWNER_FIELDS_VERSION {
            self.conn.execute(
                "UPDATE pets
                 SET name = ?2, species = ?3, breed = COALESCE(?4, breed),
                     birth_date = COALESCE(?5, birth_date), weight = ?6,
                     owner_id = ?7, microchip_number = COALESCE(?8, microchip_number),
                     is_neutered = COALESCE(?9, is_neutered), blood_type = COALESCE(?10, blood_type)
                 WHERE pet_id = ?1",
                params![
                    pet_id,
                    input.name,
                    input.species.as_str(),
                    input.breed,
                    input.birth_date,
                    input.weight,
                    input.owner_id,
                    input.microchip_number,
                    input.is_neutered.map(bool_to_sql),
                    input.blood_type,
                ],
            )
        } else {
            self.conn.execute(
                "UPDATE pets
                 SET name = ?2, species = ?3, breed = COALESCE(?4, breed),
                     birth_date = COALESCE(?5, birth_date), weight = ?6,
                     owner_id = ?7
                 WHERE pet_id = ?1",
                params![
                    pet_id,
                    input.name,
                    input.species.as_str(),
                    input.breed,
                    input.birth_date,
                    input.weight,
                    input.owner_id,
                ],
            )
        }
        .map_err(|err| write_error(err, "failed to update pet"))?;

        self.get_pet(pet_id)
    }

    pub fn delete_pet(&self, pet_id: i64) -> Result<()> {
        self.get_pet(pet_id)?;
        if self.has_upcoming_appointments("pet_id", pet_id)? {
            return Err(ClinicError::InvalidState(
                "pet has upcoming appointments and cannot be deleted".to_string(),
            )
            .into());
        }
        self.conn
            .execute("DELETE FROM pets WHERE pet_id = ?1", params![pet_id])
            .map_err(|err| write_error(err, "failed to delete pet"))?;
        Ok(())
    }

    pub fn pet_medical_history(&self, pet_id: i64) -> Result<Vec<MedicalRecord>> {
        self.require_schema("medical_records", MEDICAL_RECORDS_VERSION)?;
        self.get_pet(pet_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDICAL_RECORD_COLUMNS}
             FROM medical_records m
             JOIN appointments a ON a.appointment_id = m.appointment_id
             WHERE a.pet_id = ?1
             ORDER BY a.appointment_date ASC, m.record_id ASC"
        ))?;
        let rows = stmt.query_map(params![pet_id], parse_medical_record_row)?;
        collect_rows(rows)
    }

    pub fn pet_vaccinations(&self, pet_id: i64) -> Result<Vec<VaccinationRecord>> {
        self.require_schema("vaccination_records", VACCINATION_VERSION)?;
        self.get_pet(pet_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VACCINATION_COLUMNS} FROM vaccination_records
             WHERE pet_id = ?1
             ORDER BY vaccination_date ASC, vaccination_id ASC"
        ))?;
        let rows = stmt.query_map(params![pet_id], parse_vaccination_row)?;
        collect_rows(rows)
    }

    fn require_owner_reference(&self, owner_id: i64) -> Result<()> {
        if self.row_exists("owners", "owner_id", owner_id)? {
            return Ok(());
        }
        Err(ClinicError::Validation(format!("owner {owner_id} does not exist")).into())
    }

    // -----------------------------------------------------------------------
    // Appointments
    // -----------------------------------------------------------------------

    pub fn list_appointments(&self, query: &AppointmentQuery) -> Result<Vec<Appointment>> {
        self.query_appointments(
            "FROM appointments a
             WHERE (?1 IS NULL OR a.status = ?1)
               AND (?2 IS NULL OR a.pet_id = ?2)
               AND (?3 IS NULL OR a.veterinarian_id = ?3)
             ORDER BY a.appointment_date ASC, a.appointment_id ASC",
            params![
                query.status.map(AppointmentStatus::as_str),
                query.pet_id,
                query.veterinarian_id
            ],
        )
    }

    pub fn get_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {APPOINTMENT_COLUMNS} FROM appointments a WHERE a.appointment_id = ?1"
                ),
                params![appointment_id],
                parse_appointment_row,
            )
            .optional()
            .context("failed to load appointment")?
            .ok_or_else(|| ClinicError::not_found("appointment", appointment_id).into())
    }

    /// Appointments whose UTC calendar day is today.
    pub fn today_appointments(&self) -> Result<Vec<Appointment>> {
        let today = format_date(now_utc().date())?;
        self.query_appointments(
            "FROM appointments a
             WHERE date(a.appointment_date) = ?1
             ORDER BY a.appointment_date ASC",
            params![today],
        )
    }

    pub fn pending_appointments(&self) -> Result<Vec<Appointment>> {
        self.query_appointments(
            "FROM appointments a
             WHERE a.status = 'scheduled'
             ORDER BY a.appointment_date ASC",
            [],
        )
    }

    /// Books a new appointment; the date must lie in the future.
    pub fn create_appointment(&self, input: &AppointmentInput) -> Result<Appointment> {
        let appointment_date = input.validate()?;
        self.require_appointment_references(input)?;
        let now = now_timestamp()?;
        if appointment_date <= now {
            return Err(ClinicError::Validation(
                "appointment_date must be in the future".to_string(),
            )
            .into());
        }
        self.insert_appointment_row(input, &appointment_date, &now)
    }

    /// Inserts an appointment without the future-date rule. Used for
    /// historical data loaded by seeding.
    pub(crate) fn insert_appointment_unchecked(&self, input: &AppointmentInput) -> Result<Appointment> {
        let appointment_date = input.validate()?;
        self.require_appointment_references(input)?;
        let now = now_timestamp()?;
        self.insert_appointment_row(input, &appointment_date, &now)
    }

    fn insert_appointment_row(
        &self,
        input: &AppointmentInput,
        appointment_date: &str,
        created_at: &str,
    ) -> Result<Appointment> {
        self.conn
            .execute(
                "INSERT INTO appointments(
                   pet_id, veterinarian_id, appointment_date, reason, status, notes, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    input.pet_id,
                    input.veterinarian_id,
                    appointment_date,
                    input.reason,
                    input.status.unwrap_or_default().as_str(),
                    input.notes,
                    created_at,
                ],
            )
            .map_err(|err| write_error(err, "failed to insert appointment"))?;
        self.get_appointment(self.conn.last_insert_rowid())
    }

    pub fn update_appointment(
        &self,
        appointment_id: i64,
        input: &AppointmentInput,
    ) -> Result<Appointment> {
        let appointment_date = input.validate()?;
        self.get_appointment(appointment_id)?;
        self.require_appointment_references(input)?;
        self.conn
            .execute(
                "UPDATE appointments
                 SET pet_id = ?2, veterinarian_id = ?3, appointment_date = ?4, reason = ?5,
                     status = COALESCE(?6, status), notes = COALESCE(?7, notes)
                 WHERE appointment_id = ?1",
                params![
                    appointment_id,
                    input.pet_id,
                    input.veterinarian_id,
                    appointment_date,
                    input.reason,
                    input.status.map(AppointmentStatus::as_str),
                    input.notes,
                ],
            )
            .map_err(|err| write_error(err, "failed to update appointment"))?;
        self.get_appointment(appointment_id)
    }

    pub fn delete_appointment(&self, appointment_id: i64) -> Result<()> {
        self.get_appointment(appointment_id)?;
        self.conn
            .execute(
                "DELETE FROM appointments WHERE appointment_id = ?1",
                params![appointment_id],
            )
            .map_err(|err| write_error(err, "failed to delete appointment"))?;
        Ok(())
    }

    pub fn complete_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        let appointment = self.get_appointment(appointment_id)?;
        if appointment.status == AppointmentStatus::Completed {
            return Err(
                ClinicError::InvalidState("appointment already completed".to_string()).into(),
            );
        }
        self.set_appointment_status(appointment_id, AppointmentStatus::Completed)
    }

    pub fn cancel_appointment(&self, appointment_id: i64) -> Result<Appointment> {
        let appointment = self.get_appointment(appointment_id)?;
        if matches!(
            appointment.status,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed
        ) {
            return Err(ClinicError::InvalidState(format!(
                "appointment is {} and cannot be cancelled",
                appointment.status.as_str()
            ))
            .into());
        }
        self.set_appointment_status(appointment_id, AppointmentStatus::Cancelled)
    }

    fn set_appointment_status(
        &self,
        appointment_id: i64,
        status: AppointmentStatus,
    ) -> Result<Appointment> {
        self.conn
            .execute(
                "UPDATE appointments SET status = ?2 WHERE appointment_id = ?1",
                params![appointment_id, status.as_str()],
            )
            .map_err(|err| write_error(err, "failed to update appointment status"))?;
        self.get_appointment(appointment_id)
    }

    /// Returns the invoice of a completed appointment, issuing a placeholder
    /// one first when none exists. The flag is true when it was just issued.
    pub fn appointment_invoice(&self, appointment_id: i64) -> Result<(Invoice, bool)> {
        self.require_schema("invoices", INVOICES_VERSION)?;
        let appointment = self.get_appointment(appointment_id)?;
        if appointment.status != AppointmentStatus::Completed {
            return Err(ClinicError::InvalidState(
                "invoices are issued for completed appointments only".to_string(),
            )
            .into());
        }
        if let Some(invoice) = self.find_invoice_for_appointment(appointment_id)? {
            return Ok((invoice, false));
        }

        let invoice_id =
            insert_placeholder_invoice(&self.conn, appointment_id, &appointment.appointment_date)?;
        Ok((self.get_invoice(invoice_id)?, true))
    }

    fn require_appointment_references(&self, input: &AppointmentInput) -> Result<()> {
        if !self.row_exists("pets", "pet_id", input.pet_id)? {
            return Err(
                ClinicError::Validation(format!("pet {} does not exist", input.pet_id)).into(),
            );
        }
        if !self.row_exists("veterinarians", "veterinarian_id", input.veterinarian_id)? {
            return Err(ClinicError::Validation(format!(
                "veterinarian {} does not exist",
                input.veterinarian_id
            ))
            .into());
        }
        Ok(())
    }

    fn has_upcoming_appointments(&self, column: &str, id: i64) -> Result<bool> {
        let now = now_timestamp()?;
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT 1 FROM appointments
                     WHERE {column} = ?1 AND appointment_date >= ?2
                     LIMIT 1"
                ),
                params![id, now],
                |_| Ok(()),
            )
            .optional()
            .context("failed to check upcoming appointments")?
            .is_some())
    }

    fn query_appointments(
        &self,
        tail: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Appointment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {APPOINTMENT_COLUMNS} {tail}"))?;
        let rows = stmt.query_map(params, parse_appointment_row)?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Medical records
    // -----------------------------------------------------------------------

    pub fn list_medical_records(&self) -> Result<Vec<MedicalRecord>> {
        self.require_schema("medical_records", MEDICAL_RECORDS_VERSION)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDICAL_RECORD_COLUMNS} FROM medical_records m ORDER BY m.record_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_medical_record_row)?;
        collect_rows(rows)
    }

    pub fn get_medical_record(&self, record_id: i64) -> Result<MedicalRecord> {
        self.require_schema("medical_records", MEDICAL_RECORDS_VERSION)?;
        self.conn
            .query_row(
                &format!("SELECT {MEDICAL_RECORD_COLUMNS} FROM medical_records m WHERE m.record_id = ?1"),
                params![record_id],
                parse_medical_record_row,
            )
            .optional()
            .context("failed to load medical record")?
            .ok_or_else(|| ClinicError::not_found("medical_record", record_id).into())
    }

    pub fn create_medical_record(&self, input: &MedicalRecordInput) -> Result<MedicalRecord> {
        self.require_schema("medical_records", MEDICAL_RECORDS_VERSION)?;
        input.validate()?;
        self.require_appointment_reference(input.appointment_id)?;
        let created_at = now_timestamp()?;
        self.conn
            .execute(
                "INSERT INTO medical_records(
                   appointment_id, diagnosis, treatment, prescription, follow_up_required, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input.appointment_id,
                    input.diagnosis,
                    input.treatment,
                    input.prescription,
                    bool_to_sql(input.follow_up_required),
                    created_at,
                ],
            )
            .map_err(|err| write_error(err, "failed to insert medical record"))?;
        self.get_medical_record(self.conn.last_insert_rowid())
    }

    pub fn update_medical_record(
        &self,
        record_id: i64,
        input: &MedicalRecordInput,
    ) -> Result<MedicalRecord> {
        self.get_medical_record(record_id)?;
        input.validate()?;
        self.require_appointment_reference(input.appointment_id)?;
        self.conn
            .execute(
                "UPDATE medical_records
                 SET appointment_id = ?2, diagnosis = ?3, treatment = ?4,
                     prescription = COALESCE(?5, prescription), follow_up_required = ?6
                 WHERE record_id = ?1",
                params![
                    record_id,
                    input.appointment_id,
                    input.diagnosis,
                    input.treatment,
                    input.prescription,
                    bool_to_sql(input.follow_up_required),
                ],
            )
            .map_err(|err| write_error(err, "failed to update medical record"))?;
        self.get_medical_record(record_id)
    }

    pub fn delete_medical_record(&self, record_id: i64) -> Result<()> {
        self.get_medical_record(record_id)?;
        self.conn
            .execute(
                "DELETE FROM medical_records WHERE record_id = ?1",
                params![record_id],
            )
            .map_err(|err| write_error(err, "failed to delete medical record"))?;
        Ok(())
    }

    fn require_appointment_reference(&self, appointment_id: i64) -> Result<()> {
        if self.row_exists("appointments", "appointment_id", appointment_id)? {
            return Ok(());
        }
        Err(ClinicError::Validation(format!("appointment {appointment_id} does not exist")).into())
    }

    // -----------------------------------------------------------------------
    // Vaccines and vaccination records
    // -----------------------------------------------------------------------

    pub fn list_vaccines(&self) -> Result<Vec<Vaccine>> {
        self.require_schema("vaccines", VACCINATION_VERSION)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VACCINE_COLUMNS} FROM vaccines ORDER BY vaccine_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_vaccine_row)?;
        collect_rows(rows)
    }

    pub fn get_vaccine(&self, vaccine_id: i64) -> Result<Vaccine> {
        self.require_schema("vaccines", VACCINATION_VERSION)?;
        self.conn
            .query_row(
                &format!("SELECT {VACCINE_COLUMNS} FROM vaccines WHERE vaccine_id = ?1"),
                params![vaccine_id],
                parse_vaccine_row,
            )
            .optional()
            .context("failed to load vaccine")?
            .ok_or_else(|| ClinicError::not_found("vaccine", vaccine_id).into())
    }

    pub fn find_vaccine_by_name(&self, name: &str) -> Result<Option<Vaccine>> {
        self.require_schema("vaccines", VACCINATION_VERSION)?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {VACCINE_COLUMNS} FROM vaccines WHERE name = ?1 ORDER BY vaccine_id LIMIT 1"
                ),
                params![name],
                parse_vaccine_row,
            )
            .optional()
            .context("failed to look up vaccine")
    }

    pub fn create_vaccine(&self, input: &VaccineInput) -> Result<Vaccine> {
        self.require_schema("vaccines", VACCINATION_VERSION)?;
        input.validate()?;
        self.conn
            .execute(
                "INSERT INTO vaccines(name, manufacturer, species_applicable) VALUES (?1, ?2, ?3)",
                params![input.name, input.manufacturer, input.species_applicable],
            )
            .map_err(|err| write_error(err, "failed to insert vaccine"))?;
        self.get_vaccine(self.conn.last_insert_rowid())
    }

    pub fn update_vaccine(&self, vaccine_id: i64, input: &VaccineInput) -> Result<Vaccine> {
        self.get_vaccine(vaccine_id)?;
        input.validate()?;
        self.conn
            .execute(
                "UPDATE vaccines
                 SET name = ?2, manufacturer = COALESCE(?3, manufacturer),
                     species_applicable = COALESCE(?4, species_applicable)
                 WHERE vaccine_id = ?1",
                params![
                    vaccine_id,
                    input.name,
                    input.manufacturer,
                    input.species_applicable
                ],
            )
            .map_err(|err| write_error(err, "failed to update vaccine"))?;
        self.get_vaccine(vaccine_id)
    }

    pub fn delete_vaccine(&self, vaccine_id: i64) -> Result<()> {
        self.get_vaccine(vaccine_id)?;
        self.conn
            .execute("DELETE FROM vaccines WHERE vaccine_id = ?1", params![vaccine_id])
            .map_err(|err| write_error(err, "failed to delete vaccine"))?;
        Ok(())
    }

    pub fn list_vaccination_records(&self) -> Result<Vec<VaccinationRecord>> {
        self.require_schema("vaccination_records", VACCINATION_VERSION)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VACCINATION_COLUMNS} FROM vaccination_records ORDER BY vaccination_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_vaccination_row)?;
        collect_rows(rows)
    }

    pub fn get_vaccination_record(&self, vaccination_id: i64) -> Result<VaccinationRecord> {
        self.require_schema("vaccination_records", VACCINATION_VERSION)?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {VACCINATION_COLUMNS} FROM vaccination_records WHERE vaccination_id = ?1"
                ),
                params![vaccination_id],
                parse_vaccination_row,
            )
            .optional()
            .context("failed to load vaccination record")?
            .ok_or_else(|| ClinicError::not_found("vaccination_record", vaccination_id).into())
    }

    pub fn create_vaccination_record(
        &self,
        input: &VaccinationRecordInput,
    ) -> Result<VaccinationRecord> {
        self.require_schema("vaccination_records", VACCINATION_VERSION)?;
        input.validate()?;
        if !self.row_exists("pets", "pet_id", input.pet_id)? {
            return Err(
                ClinicError::Validation(format!("pet {} does not exist", input.pet_id)).into(),
            );
        }
        if !self.row_exists("vaccines", "vaccine_id", input.vaccine_id)? {
            return Err(ClinicError::Validation(format!(
                "vaccine {} does not exist",
                input.vaccine_id
            ))
            .into());
        }
        if let Some(veterinarian_id) = input.veterinarian_id {
            if !self.row_exists("veterinarians", "veterinarian_id", veterinarian_id)? {
                return Err(ClinicError::Validation(format!(
                    "veterinarian {veterinarian_id} does not exist"
                ))
                .into());
            }
        }

        self.conn
            .execute(
                "INSERT INTO vaccination_records(
                   pet_id, vaccine_id, vaccination_date, next_dose_date, veterinarian_id, batch_number
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input.pet_id,
                    input.vaccine_id,
                    input.vaccination_date,
                    input.next_dose_date,
                    input.veterinarian_id,
                    input.batch_number,
                ],
            )
            .map_err(|err| write_error(err, "failed to insert vaccination record"))?;
        self.get_vaccination_record(self.conn.last_insert_rowid())
    }

    pub fn delete_vaccination_record(&self, vaccination_id: i64) -> Result<()> {
        self.get_vaccination_record(vaccination_id)?;
        self.conn
            .execute(
                "DELETE FROM vaccination_records WHERE vaccination_id = ?1",
                params![vaccination_id],
            )
            .map_err(|err| write_error(err, "failed to delete vaccination record"))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invoices and reports
    // -----------------------------------------------------------------------

    pub fn list_invoices(&self) -> Result<Vec<Invoice>> {
        self.require_schema("invoices", INVOICES_VERSION)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY invoice_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_invoice_row)?;
        collect_rows(rows)
    }

    pub fn get_invoice(&self, invoice_id: i64) -> Result<Invoice> {
        self.require_schema("invoices", INVOICES_VERSION)?;
        self.conn
            .query_row(
                &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = ?1"),
                params![invoice_id],
                parse_invoice_row,
            )
            .optional()
            .context("failed to load invoice")?
            .ok_or_else(|| ClinicError::not_found("invoice", invoice_id).into())
    }

    fn find_invoice_for_appointment(&self, appointment_id: i64) -> Result<Option<Invoice>> {
        self.conn
            .query_row(
                &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE appointment_id = ?1"),
                params![appointment_id],
                parse_invoice_row,
            )
            .optional()
            .context("failed to look up appointment invoice")
    }

    pub fn record_invoice_payment(
        &self,
        invoice_id: i64,
        input: &InvoicePaymentInput,
    ) -> Result<Invoice> {
        self.get_invoice(invoice_id)?;
        let payment_date = input.validate()?;
        self.conn
            .execute(
                "UPDATE invoices SET payment_status = ?2, payment_date = ?3 WHERE invoice_id = ?1",
                params![invoice_id, input.payment_status.as_str(), payment_date],
            )
            .map_err(|err| write_error(err, "failed to record invoice payment"))?;
        self.get_invoice(invoice_id)
    }

    /// Invoice totals grouped by payment status over an issue-date window.
    pub fn revenue_report(&self, query: &RevenueQuery) -> Result<RevenueReport> {
        self.require_schema("reports.revenue", METRICS_VERSION)?;
        let start = query.start_date.as_deref().map(parse_date).transpose()?;
        let end = query.end_date.as_deref().map(parse_date).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(ClinicError::Validation(
                    "start_date cannot be after end_date".to_string(),
                )
                .into());
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT payment_status, COUNT(*), COALESCE(SUM(total_amount), 0)
             FROM invoices
             WHERE (?1 IS NULL OR issue_date >= ?1) AND (?2 IS NULL OR issue_date <= ?2)
             GROUP BY payment_status
             ORDER BY payment_status ASC",
        )?;
        let by_payment_status = collect_rows(stmt.query_map(
            params![query.start_date, query.end_date],
            |row| {
                Ok(RevenueBucket {
                    payment_status: enum_column(row, 0, PaymentStatus::parse)?,
                    invoice_count: row.get(1)?,
                    total_amount: Cents(row.get(2)?),
                })
            },
        )?)?;

        Ok(RevenueReport {
            start_date: query.start_date.clone(),
            end_date: query.end_date.clone(),
            invoice_count: by_payment_status.iter().map(|bucket| bucket.invoice_count).sum(),
            total_amount: Cents(by_payment_status.iter().map(|bucket| bucket.total_amount.0).sum()),
            by_payment_status,
        })
    }

    fn row_exists(&self, table: &str, key: &str, id: i64) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE {key} = ?1"),
                params![id],
                |_| Ok(()),
            )
            .optional()
            .with_context(|| format!("failed to check {table} reference"))?
            .is_some())
    }
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn enum_column<T>(row: &Row<'_>, index: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).ok_or_else(|| invalid_column(index, format!("unexpected enum value `{raw}`")))
}

fn optional_enum_column<T>(
    row: &Row<'_>,
    index: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|value| {
        parse(&value).ok_or_else(|| invalid_column(index, format!("unexpected enum value `{value}`")))
    })
    .transpose()
}

fn parse_veterinarian_row(row: &Row<'_>, version: i64) -> rusqlite::Result<Veterinarian> {
    let metrics = if version >= METRICS_VERSION {
        Some(VeterinarianMetrics {
            consultation_fee: Cents(row.get(9)?),
            rating: row.get(10)?,
            total_appointments: row.get(11)?,
        })
    } else {
        None
    };

    Ok(Veterinarian {
        veterinarian_id: row.get(0)?,
        license_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        specialization: row.get(6)?,
        hire_date: row.get(7)?,
        is_active: row.get(8)?,
        metrics,
    })
}

fn parse_owner_row(row: &Row<'_>, version: i64) -> rusqlite::Result<Owner> {
    let contact = if version >= PET_OWNER_FIELDS_VERSION {
        Some(OwnerContact {
            emergency_contact: row.get(7)?,
            preferred_payment_method: optional_enum_column(row, 8, PaymentMethod::parse)?,
        })
    } else {
        None
    };

    Ok(Owner {
        owner_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        registration_date: row.get(6)?,
        contact,
    })
}

fn parse_pet_row(row: &Row<'_>, version: i64) -> rusqlite::Result<Pet> {
    let clinical = if version >= PET_OWNER_FIELDS_VERSION {
        Some(PetClinical {
            microchip_number: row.get(8)?,
            is_neutered: row.get(9)?,
            blood_type: row.get(10)?,
        })
    } else {
        None
    };
    let metrics = if version >= METRICS_VERSION {
        Some(PetMetrics {
            last_visit_date: row.get(11)?,
            visit_count: row.get(12)?,
        })
    } else {
        None
    };

    Ok(Pet {
        pet_id: row.get(0)?,
        name: row.get(1)?,
        species: enum_column(row, 2, Species::parse)?,
        breed: row.get(3)?,
        birth_date: row.get(4)?,
        weight: row.get(5)?,
        owner_id: row.get(6)?,
        registration_date: row.get(7)?,
        clinical,
        metrics,
    })
}

fn parse_appointment_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        appointment_id: row.get(0)?,
        pet_id: row.get(1)?,
        veterinarian_id: row.get(2)?,
        appointment_date: row.get(3)?,
        reason: row.get(4)?,
        status: enum_column(row, 5, AppointmentStatus::parse)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn parse_medical_record_row(row: &Row<'_>) -> rusqlite::Result<MedicalRecord> {
    Ok(MedicalRecord {
        record_id: row.get(0)?,
        appointment_id: row.get(1)?,
        diagnosis: row.get(2)?,
        treatment: row.get(3)?,
        prescription: row.get(4)?,
        follow_up_required: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn parse_vaccine_row(row: &Row<'_>) -> rusqlite::Result<Vaccine> {
    Ok(Vaccine {
        vaccine_id: row.get(0)?,
        name: row.get(1)?,
        manufacturer: row.get(2)?,
        species_applicable: row.get(3)?,
    })
}

fn parse_vaccination_row(row: &Row<'_>) -> rusqlite::Result<VaccinationRecord> {
    Ok(VaccinationRecord {
        vaccination_id: row.get(0)?,
        pet_id: row.get(1)?,
        vaccine_id: row.get(2)?,
        vaccination_date: row.get(3)?,
        next_dose_date: row.get(4)?,
        veterinarian_id: row.get(5)?,
        batch_number: row.get(6)?,
    })
}

fn parse_invoice_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        invoice_id: row.get(0)?,
        appointment_id: row.get(1)?,
        invoice_number: row.get(2)?,
        issue_date: row.get(3)?,
        subtotal: Cents(row.get(4)?),
        tax_amount: Cents(row.get(5)?),
        total_amount: Cents(row.get(6)?),
        payment_status: enum_column(row, 7, PaymentStatus::parse)?,
        payment_date: row.get(8)?,
    })
}

/// Shifts a stored timestamp by whole days; used to place fixtures around now.
#[cfg(test)]
fn timestamp_in_days(days: i64) -> String {
    match vetclinic_core::format_timestamp(now_utc() + time::Duration::days(days)) {
        Ok(value) => value,
        Err(err) => panic!("failed to format fixture timestamp: {err}"),
    }
}
