//! Domain model for the clinic records service.
//!
//! Everything here is storage-agnostic: entity shapes as they are read back
//! from the store, write inputs with their validation rules, the closed
//! enumerations mirrored by SQL `CHECK` constraints, and the deterministic
//! invoice numbering shared by the invoice migration and the API.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

pub const NAME_MAX: usize = 100;
pub const EMAIL_MAX: usize = 255;
pub const PHONE_MAX: usize = 20;
pub const LICENSE_MAX: usize = 50;
pub const SPECIALIZATION_MAX: usize = 200;
pub const MICROCHIP_MAX: usize = 50;
pub const BLOOD_TYPE_MAX: usize = 10;
pub const BATCH_NUMBER_MAX: usize = 50;
pub const VACCINE_NAME_MAX: usize = 200;
pub const INVOICE_NUMBER_MAX: usize = 50;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ClinicError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(
        "{resource} requires schema revision {required_revision} (version {required_version}); database is at version {current_version}"
    )]
    NotMigrated {
        resource: &'static str,
        required_revision: &'static str,
        required_version: i64,
        current_version: i64,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClinicError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Dog,
    Cat,
    Bird,
    Rabbit,
    Other,
}

impl Species {
    pub const ALL: [Self; 5] = [Self::Dog, Self::Cat, Self::Bird, Self::Rabbit, Self::Other];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dog => "dog",
            Self::Cat => "cat",
            Self::Bird => "bird",
            Self::Rabbit => "rabbit",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dog" => Some(Self::Dog),
            "cat" => Some(Self::Cat),
            "bird" => Some(Self::Bird),
            "rabbit" => Some(Self::Rabbit),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Credit,
    Debit,
    Insurance,
}

impl PaymentMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Insurance => "insurance",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(Self::Cash),
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            "insurance" => Some(Self::Insurance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl PaymentStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Partial, Self::Paid, Self::Overdue];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "partial" => Some(Self::Partial),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

/// Monetary amount in cents. Serialized as a plain integer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Display for Cents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Veterinarian {
    pub veterinarian_id: i64,
    pub license_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub hire_date: Option<String>,
    pub is_active: bool,
    #[serde(flatten)]
    pub metrics: Option<VeterinarianMetrics>,
}

/// Columns added by the metrics revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VeterinarianMetrics {
    pub consultation_fee: Cents,
    pub rating: Option<f64>,
    pub total_appointments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub owner_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub registration_date: String,
    #[serde(flatten)]
    pub contact: Option<OwnerContact>,
}

/// Columns added by the pets/owners revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerContact {
    pub emergency_contact: Option<String>,
    pub preferred_payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pet {
    pub pet_id: i64,
    pub name: String,
    pub species: Species,
    pub breed: Option<String>,
    pub birth_date: Option<String>,
    pub weight: f64,
    pub owner_id: i64,
    pub registration_date: String,
    #[serde(flatten)]
    pub clinical: Option<PetClinical>,
    #[serde(flatten)]
    pub metrics: Option<PetMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PetClinical {
    pub microchip_number: Option<String>,
    pub is_neutered: bool,
    pub blood_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PetMetrics {
    pub last_visit_date: Option<String>,
    pub visit_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appointment {
    pub appointment_id: i64,
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub appointment_date: String,
    pub reason: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicalRecord {
    pub record_id: i64,
    pub appointment_id: i64,
    pub diagnosis: String,
    pub treatment: String,
    pub prescription: Option<String>,
    pub follow_up_required: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vaccine {
    pub vaccine_id: i64,
    pub name: String,
    pub manufacturer: Option<String>,
    pub species_applicable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccinationRecord {
    pub vaccination_id: i64,
    pub pet_id: i64,
    pub vaccine_id: i64,
    pub vaccination_date: String,
    pub next_dose_date: Option<String>,
    pub veterinarian_id: Option<i64>,
    pub batch_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invoice {
    pub invoice_id: i64,
    pub appointment_id: i64,
    pub invoice_number: String,
    pub issue_date: String,
    pub subtotal: Cents,
    pub tax_amount: Cents,
    pub total_amount: Cents,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueReport {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub invoice_count: i64,
    pub total_amount: Cents,
    pub by_payment_status: Vec<RevenueBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueBucket {
    pub payment_status: PaymentStatus,
    pub invoice_count: i64,
    pub total_amount: Cents,
}

// ---------------------------------------------------------------------------
// Write inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VeterinarianInput {
    pub license_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub hire_date: Option<String>,
    /// Defaults to active on create; left unchanged on update when absent.
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub consultation_fee: Option<Cents>,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl VeterinarianInput {
    /// Validates a veterinarian payload against the column constraints.
    ///
    /// # Errors
    /// Returns [`ClinicError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ClinicError> {
        require_text("license_number", &self.license_number, LICENSE_MAX)?;
        require_text("first_name", &self.first_name, NAME_MAX)?;
        require_text("last_name", &self.last_name, NAME_MAX)?;
        require_text("email", &self.email, EMAIL_MAX)?;
        optional_text("phone", self.phone.as_deref(), PHONE_MAX)?;
        optional_text("specialization", self.specialization.as_deref(), SPECIALIZATION_MAX)?;
        if let Some(raw) = self.hire_date.as_deref() {
            parse_date(raw).map_err(|err| field_error("hire_date", &err))?;
        }
        if let Some(fee) = self.consultation_fee {
            if fee.0 < 0 {
                return Err(ClinicError::Validation(
                    "consultation_fee cannot be negative".to_string(),
                ));
            }
        }
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(ClinicError::Validation(
                    "rating must be in [0.00, 5.00]".to_string(),
                ));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn uses_metrics_fields(&self) -> bool {
        self.consultation_fee.is_some() || self.rating.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub preferred_payment_method: Option<PaymentMethod>,
}

impl OwnerInput {
    /// Validates an owner payload.
    ///
    /// # Errors
    /// Returns [`ClinicError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ClinicError> {
        require_text("first_name", &self.first_name, NAME_MAX)?;
        require_text("last_name", &self.last_name, NAME_MAX)?;
        require_text("email", &self.email, EMAIL_MAX)?;
        optional_text("phone", self.phone.as_deref(), PHONE_MAX)?;
        optional_text("emergency_contact", self.emergency_contact.as_deref(), PHONE_MAX)?;
        Ok(())
    }

    #[must_use]
    pub fn uses_contact_fields(&self) -> bool {
        self.emergency_contact.is_some() || self.preferred_payment_method.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PetInput {
    pub name: String,
    pub species: Species,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    pub weight: f64,
    pub owner_id: i64,
    #[serde(default)]
    pub microchip_number: Option<String>,
    #[serde(default)]
    pub is_neutered: Option<bool>,
    #[serde(default)]
    pub blood_type: Option<String>,
}

impl PetInput {
    /// Validates a pet payload. Weight follows the `NUMERIC(6,2)` column range.
    ///
    /// # Errors
    /// Returns [`ClinicError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ClinicError> {
        require_text("name", &self.name, NAME_MAX)?;
        optional_text("breed", self.breed.as_deref(), NAME_MAX)?;
        if let Some(raw) = self.birth_date.as_deref() {
            parse_date(raw).map_err(|err| field_error("birth_date", &err))?;
        }
        if !self.weight.is_finite() || self.weight <= 0.0 || self.weight >= 10_000.0 {
            return Err(ClinicError::Validation(
                "weight must be in (0, 10000) kg".to_string(),
            ));
        }
        if self.owner_id <= 0 {
            return Err(ClinicError::Validation("owner_id must be provided".to_string()));
        }
        optional_text("microchip_number", self.microchip_number.as_deref(), MICROCHIP_MAX)?;
        optional_text("blood_type", self.blood_type.as_deref(), BLOOD_TYPE_MAX)?;
        Ok(())
    }

    #[must_use]
    pub fn uses_clinical_fields(&self) -> bool {
        self.microchip_number.is_some() || self.is_neutered.is_some() || self.blood_type.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppointmentInput {
    pub pet_id: i64,
    pub veterinarian_id: i64,
    pub appointment_date: String,
    pub reason: String,
    /// Defaults to `scheduled` on create; left unchanged on update when absent.
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AppointmentInput {
    /// Validates an appointment payload and returns its canonical UTC date.
    ///
    /// # Errors
    /// Returns [`ClinicError::Validation`] for missing references, an empty
    /// reason, or an unparseable `appointment_date`.
    pub fn validate(&self) -> Result<String, ClinicError> {
        if self.pet_id <= 0 {
            return Err(ClinicError::Validation("pet_id must be provided".to_string()));
        }
        if self.veterinarian_id <= 0 {
            return Err(ClinicError::Validation(
                "veterinarian_id must be provided".to_string(),
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(ClinicError::Validation("reason cannot be empty".to_string()));
        }
        let parsed = parse_timestamp(&self.appointment_date)
            .map_err(|err| field_error("appointment_date", &err))?;
        format_timestamp(parsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicalRecordInput {
    pub appointment_id: i64,
    pub diagnosis: String,
    pub treatment: String,
    #[serde(default)]
    pub prescription: Option<String>,
    #[serde(default)]
    pub follow_up_required: bool,
}

impl MedicalRecordInput {
    /// # Errors
    /// Returns [`ClinicError::Validation`] when the appointment reference or
    /// diagnosis is missing.
    pub fn validate(&self) -> Result<(), ClinicError> {
        if self.appointment_id <= 0 {
            return Err(ClinicError::Validation(
                "appointment_id must be provided".to_string(),
            ));
        }
        if self.diagnosis.trim().is_empty() {
            return Err(ClinicError::Validation("diagnosis cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccineInput {
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub species_applicable: Option<String>,
}

impl VaccineInput {
    /// # Errors
    /// Returns [`ClinicError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ClinicError> {
        require_text("name", &self.name, VACCINE_NAME_MAX)?;
        optional_text("manufacturer", self.manufacturer.as_deref(), VACCINE_NAME_MAX)?;
        optional_text("species_applicable", self.species_applicable.as_deref(), NAME_MAX)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccinationRecordInput {
    pub pet_id: i64,
    pub vaccine_id: i64,
    pub vaccination_date: String,
    #[serde(default)]
    pub next_dose_date: Option<String>,
    #[serde(default)]
    pub veterinarian_id: Option<i64>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

impl VaccinationRecordInput {
    /// # Errors
    /// Returns [`ClinicError::Validation`] for bad dates, a next dose before
    /// the vaccination, or missing references.
    pub fn validate(&self) -> Result<(), ClinicError> {
        if self.pet_id <= 0 || self.vaccine_id <= 0 {
            return Err(ClinicError::Validation(
                "pet_id and vaccine_id must be provided".to_string(),
            ));
        }
        let given = parse_date(&self.vaccination_date)
            .map_err(|err| field_error("vaccination_date", &err))?;
        if let Some(raw) = self.next_dose_date.as_deref() {
            let next = parse_date(raw).map_err(|err| field_error("next_dose_date", &err))?;
            if next < given {
                return Err(ClinicError::Validation(
                    "next_dose_date cannot precede vaccination_date".to_string(),
                ));
            }
        }
        optional_text("batch_number", self.batch_number.as_deref(), BATCH_NUMBER_MAX)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoicePaymentInput {
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_date: Option<String>,
}

impl InvoicePaymentInput {
    /// Returns the canonical payment timestamp, if any.
    ///
    /// # Errors
    /// Returns [`ClinicError::Validation`] for an unparseable timestamp or a
    /// `paid` status without a payment date.
    pub fn validate(&self) -> Result<Option<String>, ClinicError> {
        let payment_date = match self.payment_date.as_deref() {
            Some(raw) => Some(format_timestamp(
                parse_timestamp(raw).map_err(|err| field_error("payment_date", &err))?,
            )?),
            None => None,
        };
        if self.payment_status == PaymentStatus::Paid && payment_date.is_none() {
            return Err(ClinicError::Validation(
                "payment_date must be provided when payment_status=paid".to_string(),
            ));
        }
        Ok(payment_date)
    }
}

fn require_text(field: &str, value: &str, max: usize) -> Result<(), ClinicError> {
    if value.trim().is_empty() {
        return Err(ClinicError::Validation(format!("{field} cannot be empty")));
    }
    if value.chars().count() > max {
        return Err(ClinicError::Validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<(), ClinicError> {
    match value {
        Some(inner) => require_text(field, inner, max),
        None => Ok(()),
    }
}

fn field_error(field: &str, err: &ClinicError) -> ClinicError {
    match err {
        ClinicError::Validation(message) => ClinicError::Validation(format!("{field}: {message}")),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Invoice numbering
// ---------------------------------------------------------------------------

/// Deterministic invoice number `INV-{appointment_id}-{YYYYMMDD}`.
///
/// The date part is the UTC calendar day of the appointment, so the same
/// appointment always maps to the same number.
///
/// # Errors
/// Returns [`ClinicError::Validation`] when the date cannot be formatted.
pub fn invoice_number(appointment_id: i64, appointment_date: OffsetDateTime) -> Result<String, ClinicError> {
    let day = appointment_date
        .to_offset(UtcOffset::UTC)
        .date()
        .format(format_description!("[year][month][day]"))
        .map_err(|err| ClinicError::Validation(format!("failed to format invoice date: {err}")))?;
    Ok(format!("INV-{appointment_id}-{day}"))
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Parses an RFC3339 timestamp and normalizes it to UTC.
///
/// # Errors
/// Returns [`ClinicError::Validation`] when parsing fails.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, ClinicError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| ClinicError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;
    Ok(parsed.to_offset(UtcOffset::UTC))
}

/// Formats a timestamp as UTC RFC3339 truncated to whole seconds.
///
/// Stored timestamps share this shape so they sort lexicographically.
///
/// # Errors
/// Returns [`ClinicError::Validation`] when formatting fails.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, ClinicError> {
    value
        .to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|err| ClinicError::Validation(format!("invalid timestamp component: {err}")))?
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| ClinicError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

/// Parses a `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns [`ClinicError::Validation`] when parsing fails.
pub fn parse_date(value: &str) -> Result<Date, ClinicError> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|err| ClinicError::Validation(format!("invalid date (expected YYYY-MM-DD): {err}")))
}

/// # Errors
/// Returns [`ClinicError::Validation`] when formatting fails.
pub fn format_date(value: Date) -> Result<String, ClinicError> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| ClinicError::Validation(format!("failed to format date: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Current UTC time in the stored timestamp shape.
///
/// # Errors
/// Returns [`ClinicError::Validation`] when formatting fails.
pub fn now_timestamp() -> Result<String, ClinicError> {
    format_timestamp(now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::Duration;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn fixture_pet_input() -> PetInput {
        PetInput {
            name: "Rex".to_string(),
            species: Species::Dog,
            breed: Some("Mixed".to_string()),
            birth_date: Some("2020-04-01".to_string()),
            weight: 12.5,
            owner_id: 1,
            microchip_number: None,
            is_neutered: None,
            blood_type: None,
        }
    }

    #[test]
    fn invoice_number_uses_appointment_id_and_utc_day() {
        let date = must_ok(parse_timestamp("2025-11-03T23:30:00-02:00"));
        let number = must_ok(invoice_number(42, date));
        assert_eq!(number, "INV-42-20251104");
    }

    #[test]
    fn invoice_number_survives_a_stored_date_round_trip() {
        let stored = "2025-01-09T08:15:00Z";
        let number = must_ok(invoice_number(7, must_ok(parse_timestamp(stored))));
        assert_eq!(number, "INV-7-20250109");
    }

    proptest! {
        #[test]
        fn prop_invoice_number_is_stable_under_recomputation(
            appointment_id in 1_i64..10_000_000,
            offset_minutes in 0_i64..(60 * 24 * 3650),
        ) {
            let base = must_ok(parse_timestamp("2015-01-01T00:00:00Z"));
            let date = base + Duration::minutes(offset_minutes);
            let first = must_ok(invoice_number(appointment_id, date));
            let stored = must_ok(format_timestamp(date));
            let second = must_ok(invoice_number(appointment_id, must_ok(parse_timestamp(&stored))));
            prop_assert_eq!(&first, &second);
            let expected_prefix = format!("INV-{appointment_id}-");
            prop_assert!(first.starts_with(&expected_prefix));
            prop_assert!(first.len() <= INVOICE_NUMBER_MAX);
        }
    }

    #[test]
    fn format_timestamp_truncates_fraction_and_normalizes_offset() {
        let parsed = must_ok(parse_timestamp("2025-11-03T10:00:00.750+01:00"));
        assert_eq!(must_ok(format_timestamp(parsed)), "2025-11-03T09:00:00Z");
    }

    #[test]
    fn parse_date_rejects_timestamps() {
        assert!(parse_date("2025-11-03").is_ok());
        assert!(parse_date("2025-11-03T10:00:00Z").is_err());
        assert!(parse_date("03/11/2025").is_err());
    }

    #[test]
    fn enum_round_trip_matches_sql_literals() {
        for species in Species::ALL {
            assert_eq!(Species::parse(species.as_str()), Some(species));
        }
        for status in PaymentStatus::ALL {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("no_show"), Some(AppointmentStatus::NoShow));
        assert_eq!(PaymentMethod::parse("insurance"), Some(PaymentMethod::Insurance));
        assert_eq!(AppointmentStatus::parse("done"), None);
    }

    #[test]
    fn pet_validation_rejects_non_positive_weight() {
        let mut input = fixture_pet_input();
        input.weight = 0.0;
        let err = match input.validate() {
            Ok(()) => panic!("zero weight must be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("weight"));
    }

    #[test]
    fn pet_validation_reports_field_for_bad_birth_date() {
        let mut input = fixture_pet_input();
        input.birth_date = Some("yesterday".to_string());
        let err = match input.validate() {
            Ok(()) => panic!("bad birth_date must be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("birth_date"));
    }

    #[test]
    fn clinical_fields_are_detected() {
        let mut input = fixture_pet_input();
        assert!(!input.uses_clinical_fields());
        input.is_neutered = Some(false);
        assert!(input.uses_clinical_fields());
    }

    #[test]
    fn veterinarian_validation_bounds_rating_and_lengths() {
        let mut input = VeterinarianInput {
            license_number: "LIC-001".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Perez".to_string(),
            email: "ana@example.com".to_string(),
            phone: None,
            specialization: None,
            hire_date: Some("2019-06-01".to_string()),
            is_active: Some(true),
            consultation_fee: None,
            rating: Some(5.0),
        };
        must_ok(input.validate());

        input.rating = Some(5.5);
        assert!(input.validate().is_err());

        input.rating = None;
        input.license_number = "L".repeat(LICENSE_MAX + 1);
        assert!(input.validate().is_err());
    }

    #[test]
    fn appointment_validation_returns_canonical_date() {
        let input = AppointmentInput {
            pet_id: 1,
            veterinarian_id: 1,
            appointment_date: "2030-02-01T09:30:00+00:00".to_string(),
            reason: "Checkup".to_string(),
            status: Some(AppointmentStatus::Scheduled),
            notes: None,
        };
        assert_eq!(must_ok(input.validate()), "2030-02-01T09:30:00Z");
    }

    #[test]
    fn vaccination_next_dose_cannot_precede_given_date() {
        let input = VaccinationRecordInput {
            pet_id: 1,
            vaccine_id: 1,
            vaccination_date: "2025-05-10".to_string(),
            next_dose_date: Some("2025-05-01".to_string()),
            veterinarian_id: None,
            batch_number: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn paid_invoice_requires_payment_date() {
        let input = InvoicePaymentInput {
            payment_status: PaymentStatus::Paid,
            payment_date: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn cents_display_keeps_two_decimals() {
        assert_eq!(Cents(0).to_string(), "0.00");
        assert_eq!(Cents(12_345).to_string(), "123.45");
        assert_eq!(Cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn pet_without_extended_columns_serializes_base_fields_only() {
        let pet = Pet {
            pet_id: 1,
            name: "Rex".to_string(),
            species: Species::Dog,
            breed: None,
            birth_date: None,
            weight: 10.0,
            owner_id: 3,
            registration_date: "2025-11-03T10:00:00Z".to_string(),
            clinical: None,
            metrics: None,
        };
        let value = must_ok(serde_json::to_value(&pet));
        assert!(value.get("microchip_number").is_none());
        assert!(value.get("visit_count").is_none());
        assert_eq!(value["species"], serde_json::json!("dog"));
    }
}
