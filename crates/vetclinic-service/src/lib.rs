//! Local HTTP JSON API over the clinic database.
//!
//! Every request runs its SQLite work on the blocking pool against a fresh
//! connection, bounded by the configured operation timeout.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use vetclinic_core::{
    AppointmentInput, ClinicError, InvoicePaymentInput, MedicalRecordInput, OwnerInput, PetInput,
    VaccinationRecordInput, VaccineInput, VeterinarianInput,
};
use vetclinic_store_sqlite::{
    AppointmentQuery, DatabaseLocation, MigrationStatus, RevenueQuery, SqliteClinicStore,
};

pub const SERVICE_CONTRACT_VERSION: &str = "vetclinic.v1";

#[derive(Debug, Clone)]
pub struct ServiceState {
    database: PathBuf,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    schema_version: Option<i64>,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

/// A store result together with the schema version it was produced under.
struct Served<T> {
    schema_version: i64,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Clone, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    checks: MigrationStatus,
}

#[derive(Debug, Clone, Serialize)]
struct Deleted {
    entity: &'static str,
    id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
}

/// `?name=` narrows the vaccine catalog to an exact name match.
#[derive(Debug, Clone, Default, Deserialize)]
struct VaccineQuery {
    name: Option<String>,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    invalid_json_total: AtomicU64,
    validation_error_total: AtomicU64,
    invalid_state_total: AtomicU64,
    not_found_total: AtomicU64,
    write_conflict_total: AtomicU64,
    not_migrated_total: AtomicU64,
    schema_unavailable_total: AtomicU64,
    internal_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    invalid_json_total: u64,
    validation_error_total: u64,
    invalid_state_total: u64,
    not_found_total: u64,
    write_conflict_total: u64,
    not_migrated_total: u64,
    schema_unavailable_total: u64,
    internal_error_total: u64,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

/// Positive integer id taken from the `:id` path segment.
struct EntityId(i64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for EntityId
where
    S: Send + Sync,
{
    type Rejection = ServiceFailure;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                ServiceState::failure(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    rejection.body_text(),
                    None,
                )
            })?;
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(ServiceState::failure(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("`{raw}` is not a valid id"),
                None,
            )),
        }
    }
}

impl ServiceState {
    /// Each request opens its own connection, so a private in-memory
    /// database cannot back the service.
    pub fn new(location: DatabaseLocation, operation_timeout: Duration) -> Result<Self> {
        let database = match location {
            DatabaseLocation::File(path) => path,
            DatabaseLocation::Memory => {
                return Err(ClinicError::Configuration(
                    "the service needs a file database; sqlite::memory: is not shared between requests"
                        .to_string(),
                )
                .into())
            }
        };
        Ok(Self {
            database,
            operation_timeout,
            telemetry: Arc::new(ServiceTelemetry::default()),
        })
    }

    /// Creates the baseline schema when the database is new.
    pub fn initialize(&self) -> Result<()> {
        SqliteClinicStore::open(&self.database)?.initialize()
    }

    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure {
            status,
            code,
            message: message.into(),
            details,
        }
    }

    fn invalid_json_with_telemetry(&self, rejection: &JsonRejection) -> ServiceFailure {
        self.telemetry.record_failure("invalid_json", false);
        Self::failure(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            rejection.body_text(),
            Some(json!({ "rejection": rejection.to_string() })),
        )
    }

    fn invalid_query_with_telemetry(&self, rejection: &QueryRejection) -> ServiceFailure {
        self.telemetry.record_failure("validation_error", false);
        Self::failure(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
            None,
        )
    }

    fn classify_api_error(
        err: &anyhow::Error,
        default_status: StatusCode,
        default_code: &'static str,
    ) -> ServiceFailure {
        let message = err.to_string();
        if let Some(clinic) = err.chain().find_map(|cause| cause.downcast_ref::<ClinicError>()) {
            return match clinic {
                ClinicError::Validation(_) => {
                    Self::failure(StatusCode::BAD_REQUEST, "validation_error", message, None)
                }
                ClinicError::InvalidState(_) => {
                    Self::failure(StatusCode::BAD_REQUEST, "invalid_state", message, None)
                }
                ClinicError::NotFound { entity, id } => Self::failure(
                    StatusCode::NOT_FOUND,
                    "not_found",
                    clinic.to_string(),
                    Some(json!({ "entity": entity, "id": id })),
                ),
                ClinicError::Conflict(_) => {
                    Self::failure(StatusCode::CONFLICT, "write_conflict", message, None)
                }
                ClinicError::NotMigrated {
                    resource,
                    required_revision,
                    required_version,
                    current_version,
                } => Self::failure(
                    StatusCode::NOT_IMPLEMENTED,
                    "resource_not_migrated",
                    clinic.to_string(),
                    Some(json!({
                        "resource": resource,
                        "required_revision": required_revision,
                        "required_version": required_version,
                        "current_version": current_version
                    })),
                ),
                ClinicError::Configuration(_) => Self::failure(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "schema_unavailable",
                    message,
                    None,
                ),
            };
        }

        let normalized = format!("{err:#}").to_ascii_lowercase();
        if normalized.contains("unique constraint failed")
            || normalized.contains("foreign key constraint failed")
        {
            return Self::failure(StatusCode::CONFLICT, "write_conflict", message, None);
        }

        if normalized.contains("no such table")
            || normalized.contains("unable to open database")
            || normalized.contains("failed to open sqlite database")
            || normalized.contains("database is locked")
        {
            return Self::failure(
                StatusCode::SERVICE_UNAVAILABLE,
                "schema_unavailable",
                message,
                None,
            );
        }

        Self::failure(default_status, default_code, message, None)
    }

    async fn run_blocking<T, F>(
        &self,
        default_status: StatusCode,
        default_code: &'static str,
        operation_label: &'static str,
        op: F,
    ) -> Result<Served<T>, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteClinicStore) -> anyhow::Result<T> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let database = self.database.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let store = SqliteClinicStore::open(&database)?;
            let data = op(&store)?;
            let schema_version = store.schema_version()?;
            Ok::<_, anyhow::Error>(Served {
                schema_version,
                data,
            })
        });
        let join_result =
            tokio::time::timeout(self.operation_timeout, handle).await.map_err(|_| {
                self.telemetry.record_failure("operation_timeout", true);
                tracing::warn!(operation = operation_label, "operation timed out");
                Self::failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "operation_timeout",
                    format!(
                        "{operation_label} timed out after {} ms",
                        self.operation_timeout.as_millis()
                    ),
                    Some(json!({ "timeout_ms": self.operation_timeout.as_millis() })),
                )
            })?;

        let op_result = join_result.map_err(|err| {
            self.telemetry.record_failure("internal_error", false);
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        match op_result {
            Ok(value) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                let failure = Self::classify_api_error(&err, default_status, default_code);
                if failure.status.is_server_error() {
                    tracing::error!(operation = operation_label, error = %format!("{err:#}"), "operation failed");
                } else {
                    tracing::debug!(operation = operation_label, code = failure.code, "operation rejected");
                }
                self.telemetry.record_failure(failure.code, false);
                Err(failure)
            }
        }
    }

    async fn run<T, F>(&self, operation_label: &'static str, op: F) -> Result<Served<T>, ServiceFailure>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteClinicStore) -> anyhow::Result<T> + Send + 'static,
    {
        self.run_blocking(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            operation_label,
            op,
        )
        .await
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, code: &str, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match code {
            "invalid_json" => &self.invalid_json_total,
            "validation_error" => &self.validation_error_total,
            "invalid_state" => &self.invalid_state_total,
            "not_found" => &self.not_found_total,
            "write_conflict" => &self.write_conflict_total,
            "resource_not_migrated" => &self.not_migrated_total,
            "schema_unavailable" => &self.schema_unavailable_total,
            "operation_timeout" => return,
            _ => &self.internal_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            invalid_json_total: self.invalid_json_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            invalid_state_total: self.invalid_state_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            write_conflict_total: self.write_conflict_total.load(Ordering::Relaxed),
            not_migrated_total: self.not_migrated_total.load(Ordering::Relaxed),
            schema_unavailable_total: self.schema_unavailable_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
        }
    }
}

fn envelope<T>(schema_version: Option<i64>, data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        schema_version,
        data,
    }
}

fn respond<T: Serialize>(status: StatusCode, served: Served<T>) -> Response {
    (status, Json(envelope(Some(served.schema_version), served.data))).into_response()
}

fn ok<T: Serialize>(served: Served<T>) -> Response {
    respond(StatusCode::OK, served)
}

fn created<T: Serialize>(served: Served<T>) -> Response {
    respond(StatusCode::CREATED, served)
}

fn deleted(entity: &'static str, id: i64, served: Served<()>) -> Response {
    ok(Served {
        schema_version: served.schema_version,
        data: Deleted { entity, id },
    })
}

type Reply = Result<Response, ServiceFailure>;

pub fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/ready", get(ready))
        .route("/v1/db/schema-version", get(db_schema_version))
        .route("/v1/veterinarians", get(list_veterinarians).post(create_veterinarian))
        .route(
            "/v1/veterinarians/:id",
            get(get_veterinarian).put(update_veterinarian).delete(delete_veterinarian),
        )
        .route("/v1/veterinarians/:id/appointments", get(veterinarian_appointments))
        .route("/v1/veterinarians/:id/schedule", get(veterinarian_schedule))
        .route("/v1/owners", get(list_owners).post(create_owner))
        .route(
            "/v1/owners/:id",
            get(get_owner).put(update_owner).delete(delete_owner),
        )
        .route("/v1/owners/:id/pets", get(owner_pets))
        .route("/v1/owners/:id/appointments", get(owner_appointments))
        .route("/v1/pets", get(list_pets).post(create_pet))
        .route("/v1/pets/:id", get(get_pet).put(update_pet).delete(delete_pet))
        .route("/v1/pets/:id/medical-history", get(pet_medical_history))
        .route("/v1/pets/:id/vaccinations", get(pet_vaccinations))
        .route("/v1/appointments", get(list_appointments).post(create_appointment))
        .route("/v1/appointments/today", get(today_appointments))
        .route("/v1/appointments/pending", get(pending_appointments))
        .route(
            "/v1/appointments/:id",
            get(get_appointment).put(update_appointment).delete(delete_appointment),
        )
        .route(
            "/v1/appointments/:id/complete",
            post(complete_appointment).put(complete_appointment),
        )
        .route(
            "/v1/appointments/:id/cancel",
            post(cancel_appointment).put(cancel_appointment),
        )
        .route("/v1/appointments/:id/invoice", post(appointment_invoice))
        .route("/v1/medical-records", get(list_medical_records).post(create_medical_record))
        .route(
            "/v1/medical-records/:id",
            get(get_medical_record).put(update_medical_record).delete(delete_medical_record),
        )
        .route("/v1/vaccines", get(list_vaccines).post(create_vaccine))
        .route(
            "/v1/vaccines/:id",
            get(get_vaccine).put(update_vaccine).delete(delete_vaccine),
        )
        .route(
            "/v1/vaccination-records",
            get(list_vaccination_records).post(create_vaccination_record),
        )
        .route(
            "/v1/vaccination-records/:id",
            get(get_vaccination_record).delete(delete_vaccination_record),
        )
        .route("/v1/invoices", get(list_invoices))
        .route("/v1/invoices/:id", get(get_invoice))
        .route("/v1/invoices/:id/payment", put(record_invoice_payment))
        .route("/v1/reports/revenue", get(revenue_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    let timeout_ms = u64::try_from(state.operation_timeout.as_millis()).unwrap_or(u64::MAX);
    Json(envelope(
        None,
        HealthResponse {
            status: "ok",
            timeout_ms,
            telemetry: state.telemetry.snapshot(),
        },
    ))
}

async fn ready(State(state): State<ServiceState>) -> Reply {
    let served = state
        .run_blocking(
            StatusCode::SERVICE_UNAVAILABLE,
            "schema_unavailable",
            "migration_status",
            |store| store.migration_status(),
        )
        .await?;

    if served.data.at_head {
        return Ok(ok(Served {
            schema_version: served.schema_version,
            data: ReadinessResponse {
                status: "ready",
                checks: served.data,
            },
        }));
    }

    state.telemetry.record_failure("schema_unavailable", false);
    Err(ServiceState::failure(
        StatusCode::SERVICE_UNAVAILABLE,
        "schema_unavailable",
        "database schema is not at head; run `vetclinic db upgrade` before serving traffic",
        Some(json!({
            "current_version": served.data.current_version,
            "head_version": served.data.head_version,
            "pending_revisions": served
                .data
                .pending
                .iter()
                .map(|pending| pending.revision.clone())
                .collect::<Vec<_>>()
        })),
    ))
}

async fn db_schema_version(State(state): State<ServiceState>) -> Reply {
    state
        .run_blocking(
            StatusCode::SERVICE_UNAVAILABLE,
            "schema_unavailable",
            "migration_status",
            |store| store.migration_status(),
        )
        .await
        .map(ok)
}

// ---------------------------------------------------------------------------
// Veterinarians
// ---------------------------------------------------------------------------

async fn list_veterinarians(State(state): State<ServiceState>) -> Reply {
    state
        .run("list_veterinarians", |store| store.list_veterinarians())
        .await
        .map(ok)
}

async fn create_veterinarian(
    State(state): State<ServiceState>,
    payload: Result<Json<VeterinarianInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_veterinarian", move |store| store.create_veterinarian(&input))
        .await
        .map(created)
}

async fn get_veterinarian(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("get_veterinarian", move |store| store.get_veterinarian(id))
        .await
        .map(ok)
}

async fn update_veterinarian(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<VeterinarianInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_veterinarian", move |store| store.update_veterinarian(id, &input))
        .await
        .map(ok)
}

async fn delete_veterinarian(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_veterinarian", move |store| store.delete_veterinarian(id))
        .await
        .map(|served| deleted("veterinarian", id, served))
}

async fn veterinarian_appointments(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
) -> Reply {
    state
        .run("veterinarian_appointments", move |store| store.veterinarian_appointments(id))
        .await
        .map(ok)
}

async fn veterinarian_schedule(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    query: Result<Query<ScheduleQuery>, QueryRejection>,
) -> Reply {
    let Query(query) = query.map_err(|rejection| state.invalid_query_with_telemetry(&rejection))?;
    state
        .run("veterinarian_schedule", move |store| {
            store.veterinarian_schedule(id, query.date.as_deref())
        })
        .await
        .map(ok)
}

// ---------------------------------------------------------------------------
// Owners
// ---------------------------------------------------------------------------

async fn list_owners(State(state): State<ServiceState>) -> Reply {
    state.run("list_owners", |store| store.list_owners()).await.map(ok)
}

async fn create_owner(
    State(state): State<ServiceState>,
    payload: Result<Json<OwnerInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_owner", move |store| store.create_owner(&input))
        .await
        .map(created)
}

async fn get_owner(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state.run("get_owner", move |store| store.get_owner(id)).await.map(ok)
}

async fn update_owner(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<OwnerInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_owner", move |store| store.update_owner(id, &input))
        .await
        .map(ok)
}

async fn delete_owner(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_owner", move |store| store.delete_owner(id))
        .await
        .map(|served| deleted("owner", id, served))
}

async fn owner_pets(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state.run("owner_pets", move |store| store.owner_pets(id)).await.map(ok)
}

async fn owner_appointments(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("owner_appointments", move |store| store.owner_appointments(id))
        .await
        .map(ok)
}

// ---------------------------------------------------------------------------
// Pets
// ---------------------------------------------------------------------------

async fn list_pets(State(state): State<ServiceState>) -> Reply {
    state.run("list_pets", |store| store.list_pets()).await.map(ok)
}

async fn create_pet(
    State(state): State<ServiceState>,
    payload: Result<Json<PetInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_pet", move |store| store.create_pet(&input))
        .await
        .map(created)
}

async fn get_pet(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state.run("get_pet", move |store| store.get_pet(id)).await.map(ok)
}

async fn update_pet(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<PetInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_pet", move |store| store.update_pet(id, &input))
        .await
        .map(ok)
}

async fn delete_pet(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_pet", move |store| store.delete_pet(id))
        .await
        .map(|served| deleted("pet", id, served))
}

async fn pet_medical_history(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("pet_medical_history", move |store| store.pet_medical_history(id))
        .await
        .map(ok)
}

async fn pet_vaccinations(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("pet_vaccinations", move |store| store.pet_vaccinations(id))
        .await
        .map(ok)
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

async fn list_appointments(
    State(state): State<ServiceState>,
    query: Result<Query<AppointmentQuery>, QueryRejection>,
) -> Reply {
    let Query(query) = query.map_err(|rejection| state.invalid_query_with_telemetry(&rejection))?;
    state
        .run("list_appointments", move |store| store.list_appointments(&query))
        .await
        .map(ok)
}

async fn today_appointments(State(state): State<ServiceState>) -> Reply {
    state
        .run("today_appointments", |store| store.today_appointments())
        .await
        .map(ok)
}

async fn pending_appointments(State(state): State<ServiceState>) -> Reply {
    state
        .run("pending_appointments", |store| store.pending_appointments())
        .await
        .map(ok)
}

async fn create_appointment(
    State(state): State<ServiceState>,
    payload: Result<Json<AppointmentInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_appointment", move |store| store.create_appointment(&input))
        .await
        .map(created)
}

async fn get_appointment(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("get_appointment", move |store| store.get_appointment(id))
        .await
        .map(ok)
}

async fn update_appointment(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<AppointmentInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_appointment", move |store| store.update_appointment(id, &input))
        .await
        .map(ok)
}

async fn delete_appointment(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_appointment", move |store| store.delete_appointment(id))
        .await
        .map(|served| deleted("appointment", id, served))
}

async fn complete_appointment(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("complete_appointment", move |store| store.complete_appointment(id))
        .await
        .map(ok)
}

async fn cancel_appointment(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("cancel_appointment", move |store| store.cancel_appointment(id))
        .await
        .map(ok)
}

async fn appointment_invoice(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    let served = state
        .run("appointment_invoice", move |store| store.appointment_invoice(id))
        .await?;
    let (invoice, issued) = served.data;
    let status = if issued { StatusCode::CREATED } else { StatusCode::OK };
    Ok(respond(
        status,
        Served {
            schema_version: served.schema_version,
            data: invoice,
        },
    ))
}

// ---------------------------------------------------------------------------
// Medical records
// ---------------------------------------------------------------------------

async fn list_medical_records(State(state): State<ServiceState>) -> Reply {
    state
        .run("list_medical_records", |store| store.list_medical_records())
        .await
        .map(ok)
}

async fn create_medical_record(
    State(state): State<ServiceState>,
    payload: Result<Json<MedicalRecordInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_medical_record", move |store| store.create_medical_record(&input))
        .await
        .map(created)
}

async fn get_medical_record(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("get_medical_record", move |store| store.get_medical_record(id))
        .await
        .map(ok)
}

async fn update_medical_record(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<MedicalRecordInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_medical_record", move |store| store.update_medical_record(id, &input))
        .await
        .map(ok)
}

async fn delete_medical_record(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_medical_record", move |store| store.delete_medical_record(id))
        .await
        .map(|served| deleted("medical_record", id, served))
}

// ---------------------------------------------------------------------------
// Vaccines and vaccination records
// ---------------------------------------------------------------------------

async fn list_vaccines(
    State(state): State<ServiceState>,
    query: Result<Query<VaccineQuery>, QueryRejection>,
) -> Reply {
    let Query(query) = query.map_err(|rejection| state.invalid_query_with_telemetry(&rejection))?;
    state
        .run("list_vaccines", move |store| match query.name.as_deref() {
            Some(name) => Ok(store.find_vaccine_by_name(name)?.into_iter().collect::<Vec<_>>()),
            None => store.list_vaccines(),
        })
        .await
        .map(ok)
}

async fn create_vaccine(
    State(state): State<ServiceState>,
    payload: Result<Json<VaccineInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_vaccine", move |store| store.create_vaccine(&input))
        .await
        .map(created)
}

async fn get_vaccine(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state.run("get_vaccine", move |store| store.get_vaccine(id)).await.map(ok)
}

async fn update_vaccine(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<VaccineInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("update_vaccine", move |store| store.update_vaccine(id, &input))
        .await
        .map(ok)
}

async fn delete_vaccine(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("delete_vaccine", move |store| store.delete_vaccine(id))
        .await
        .map(|served| deleted("vaccine", id, served))
}

async fn list_vaccination_records(State(state): State<ServiceState>) -> Reply {
    state
        .run("list_vaccination_records", |store| store.list_vaccination_records())
        .await
        .map(ok)
}

async fn create_vaccination_record(
    State(state): State<ServiceState>,
    payload: Result<Json<VaccinationRecordInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("create_vaccination_record", move |store| {
            store.create_vaccination_record(&input)
        })
        .await
        .map(created)
}

async fn get_vaccination_record(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state
        .run("get_vaccination_record", move |store| store.get_vaccination_record(id))
        .await
        .map(ok)
}

async fn delete_vaccination_record(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
) -> Reply {
    state
        .run("delete_vaccination_record", move |store| store.delete_vaccination_record(id))
        .await
        .map(|served| deleted("vaccination_record", id, served))
}

// ---------------------------------------------------------------------------
// Invoices and reports
// ---------------------------------------------------------------------------

async fn list_invoices(State(state): State<ServiceState>) -> Reply {
    state.run("list_invoices", |store| store.list_invoices()).await.map(ok)
}

async fn get_invoice(State(state): State<ServiceState>, EntityId(id): EntityId) -> Reply {
    state.run("get_invoice", move |store| store.get_invoice(id)).await.map(ok)
}

async fn record_invoice_payment(
    State(state): State<ServiceState>,
    EntityId(id): EntityId,
    payload: Result<Json<InvoicePaymentInput>, JsonRejection>,
) -> Reply {
    let Json(input) = payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;
    state
        .run("record_invoice_payment", move |store| {
            store.record_invoice_payment(id, &input)
        })
        .await
        .map(ok)
}

async fn revenue_report(
    State(state): State<ServiceState>,
    query: Result<Query<RevenueQuery>, QueryRejection>,
) -> Reply {
    let Query(query) = query.map_err(|rejection| state.invalid_query_with_telemetry(&rejection))?;
    state
        .run("revenue_report", move |store| store.revenue_report(&query))
        .await
        .map(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use vetclinic_store_sqlite::{MigrationOptions, MigrationTarget};

    const FUTURE_VISIT: &str = "2999-03-04T10:00:00Z";

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("vetclinic-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_state(timeout_ms: u64, target: MigrationTarget) -> ServiceState {
        let db_path = unique_temp_db_path();
        let mut store = match SqliteClinicStore::open(&db_path) {
            Ok(store) => store,
            Err(err) => panic!("failed to open test database: {err:#}"),
        };
        if let Err(err) = store.upgrade(target, MigrationOptions::default()) {
            panic!("failed to migrate test database: {err:#}");
        }
        match ServiceState::new(
            DatabaseLocation::File(db_path),
            Duration::from_millis(timeout_ms),
        ) {
            Ok(state) => state,
            Err(err) => panic!("failed to build service state: {err:#}"),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!(
                "response body is not JSON: {err}; body={}",
                String::from_utf8_lossy(&bytes)
            ),
        }
    }

    fn error_code(value: &Value) -> Option<&str> {
        value
            .get("error")
            .and_then(|error| error.get("code"))
            .and_then(Value::as_str)
    }

    fn data_id(value: &Value, field: &str) -> i64 {
        match value
            .get("data")
            .and_then(|data| data.get(field))
            .and_then(Value::as_i64)
        {
            Some(id) => id,
            None => panic!("response has no data.{field}: {value}"),
        }
    }

    fn vet_payload(license: &str, email: &str) -> Value {
        json!({
            "license_number": license,
            "first_name": "Ana",
            "last_name": "Perez",
            "email": email,
            "specialization": "Surgery"
        })
    }

    /// Creates a vet, an owner, a pet and one future appointment; returns the appointment id.
    async fn book_visit(router: &Router) -> i64 {
        let vet = send(router, "POST", "/v1/veterinarians", Some(vet_payload("LIC-100", "ana@clinic.test"))).await;
        assert_eq!(vet.status(), StatusCode::CREATED);
        let vet_id = data_id(&response_json(vet).await, "veterinarian_id");

        let owner = send(
            router,
            "POST",
            "/v1/owners",
            Some(json!({"first_name": "Luis", "last_name": "Gomez", "email": "luis@clinic.test"})),
        )
        .await;
        assert_eq!(owner.status(), StatusCode::CREATED);
        let owner_id = data_id(&response_json(owner).await, "owner_id");

        let pet = send(
            router,
            "POST",
            "/v1/pets",
            Some(json!({"name": "Rex", "species": "dog", "weight": 12.5, "owner_id": owner_id})),
        )
        .await;
        assert_eq!(pet.status(), StatusCode::CREATED);
        let pet_id = data_id(&response_json(pet).await, "pet_id");

        let appointment = send(
            router,
            "POST",
            "/v1/appointments",
            Some(json!({
                "pet_id": pet_id,
                "veterinarian_id": vet_id,
                "appointment_date": FUTURE_VISIT,
                "reason": "Annual checkup"
            })),
        )
        .await;
        assert_eq!(appointment.status(), StatusCode::CREATED);
        data_id(&response_json(appointment).await, "appointment_id")
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(test_state(2500, MigrationTarget::Base));

        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert!(value.get("schema_version").is_some_and(Value::is_null));
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("timeout_ms"))
                .and_then(Value::as_u64),
            Some(2500)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn ready_endpoint_requires_head_schema() {
        let behind = app(test_state(2500, MigrationTarget::Version(2)));
        let response = send(&behind, "GET", "/v1/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("schema_unavailable"));
        assert_eq!(
            value
                .get("error")
                .and_then(|error| error.get("details"))
                .and_then(|details| details.get("pending_revisions"))
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(3)
        );

        let current = app(test_state(2500, MigrationTarget::Head));
        let response = send(&current, "GET", "/v1/ready", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value.get("schema_version").and_then(Value::as_i64), Some(5));
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("status"))
                .and_then(Value::as_str),
            Some("ready")
        );
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn ready_endpoint_returns_schema_unavailable_when_db_is_unreachable() {
        let db_path = std::env::temp_dir().join(format!(
            "vetclinic-service-missing-parent-{}/db.sqlite3",
            ulid::Ulid::new()
        ));
        let state = match ServiceState::new(DatabaseLocation::File(db_path), Duration::from_millis(2500)) {
            Ok(state) => state,
            Err(err) => panic!("failed to build service state: {err:#}"),
        };
        let router = app(state);

        let response = send(&router, "GET", "/v1/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("schema_unavailable"));
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn appointment_flow_books_completes_and_invoices() {
        let router = app(test_state(2500, MigrationTarget::Head));
        let appointment_id = book_visit(&router).await;

        let listed = send(&router, "GET", "/v1/appointments?status=scheduled", None).await;
        assert_eq!(listed.status(), StatusCode::OK);
        let value = response_json(listed).await;
        assert_eq!(
            value.get("data").and_then(Value::as_array).map(Vec::len),
            Some(1)
        );

        let early = send(&router, "POST", &format!("/v1/appointments/{appointment_id}/invoice"), None).await;
        assert_eq!(early.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&response_json(early).await), Some("invalid_state"));

        let completed = send(&router, "PUT", &format!("/v1/appointments/{appointment_id}/complete"), None).await;
        assert_eq!(completed.status(), StatusCode::OK);
        let value = response_json(completed).await;
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("status"))
                .and_then(Value::as_str),
            Some("completed")
        );

        let again = send(&router, "POST", &format!("/v1/appointments/{appointment_id}/complete"), None).await;
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);

        let issued = send(&router, "POST", &format!("/v1/appointments/{appointment_id}/invoice"), None).await;
        assert_eq!(issued.status(), StatusCode::CREATED);
        let issued = response_json(issued).await;
        let expected_number = format!("INV-{appointment_id}-29990304");
        assert_eq!(
            issued
                .get("data")
                .and_then(|data| data.get("invoice_number"))
                .and_then(Value::as_str),
            Some(expected_number.as_str())
        );
        let invoice_id = data_id(&issued, "invoice_id");

        let existing = send(&router, "POST", &format!("/v1/appointments/{appointment_id}/invoice"), None).await;
        assert_eq!(existing.status(), StatusCode::OK);
        assert_eq!(data_id(&response_json(existing).await, "invoice_id"), invoice_id);

        let paid = send(
            &router,
            "PUT",
            &format!("/v1/invoices/{invoice_id}/payment"),
            Some(json!({"payment_status": "paid", "payment_date": "2999-03-05T09:00:00Z"})),
        )
        .await;
        assert_eq!(paid.status(), StatusCode::OK);
        let paid = response_json(paid).await;
        assert_eq!(
            paid.get("data")
                .and_then(|data| data.get("payment_status"))
                .and_then(Value::as_str),
            Some("paid")
        );
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn missing_entity_returns_not_found_machine_error() {
        let router = app(test_state(2500, MigrationTarget::Head));

        let response = send(&router, "GET", "/v1/pets/999", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("not_found"));
        assert_eq!(
            value
                .get("error")
                .and_then(|error| error.get("details"))
                .and_then(|details| details.get("entity"))
                .and_then(Value::as_str),
            Some("pet")
        );
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn duplicate_license_returns_write_conflict() {
        let router = app(test_state(2500, MigrationTarget::Base));

        let first = send(&router, "POST", "/v1/veterinarians", Some(vet_payload("LIC-200", "a@clinic.test"))).await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = send(&router, "POST", "/v1/veterinarians", Some(vet_payload("LIC-200", "b@clinic.test"))).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(error_code(&response_json(second).await), Some("write_conflict"));
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn unmigrated_resource_returns_not_implemented_with_revision() {
        let router = app(test_state(2500, MigrationTarget::Version(3)));

        let response = send(&router, "GET", "/v1/invoices", None).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("resource_not_migrated"));
        let details = value.get("error").and_then(|error| error.get("details"));
        assert_eq!(
            details
                .and_then(|details| details.get("required_revision"))
                .and_then(Value::as_str),
            Some("a9b8c7d6e5f4")
        );
        assert_eq!(
            details
                .and_then(|details| details.get("current_version"))
                .and_then(Value::as_i64),
            Some(3)
        );
    }

    // Test IDs: TSVC-008
    #[tokio::test]
    async fn invalid_json_payload_returns_invalid_json_error() {
        let state = test_state(2500, MigrationTarget::Base);
        let router = app(state.clone());

        let response = match router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/owners")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"first_name\":"))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("invalid_json"));
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(state.telemetry.snapshot().invalid_json_total, 1);
    }

    // Test IDs: TSVC-009
    #[tokio::test]
    async fn malformed_path_id_returns_validation_error() {
        let router = app(test_state(2500, MigrationTarget::Base));

        for uri in ["/v1/owners/abc", "/v1/owners/0"] {
            let response = send(&router, "GET", uri, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri={uri}");
            assert_eq!(error_code(&response_json(response).await), Some("validation_error"));
        }
    }

    // Test IDs: TSVC-010
    #[tokio::test]
    async fn owner_with_pets_cannot_be_deleted() {
        let router = app(test_state(2500, MigrationTarget::Head));
        book_visit(&router).await;

        let refused = send(&router, "DELETE", "/v1/owners/1", None).await;
        assert_eq!(refused.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&response_json(refused).await), Some("invalid_state"));

        let deleted = send(&router, "DELETE", "/v1/appointments/1", None).await;
        assert_eq!(deleted.status(), StatusCode::OK);
        let value = response_json(deleted).await;
        assert_eq!(
            value
                .get("data")
                .and_then(|data| data.get("entity"))
                .and_then(Value::as_str),
            Some("appointment")
        );
    }

    // Test IDs: TSVC-011
    #[tokio::test]
    async fn run_blocking_times_out_with_operation_timeout_code() {
        let state = test_state(1, MigrationTarget::Base);

        let result = state
            .run("unit_timeout_operation", |_store| {
                std::thread::sleep(Duration::from_millis(25));
                Ok::<_, anyhow::Error>(())
            })
            .await;

        match result {
            Ok(_) => panic!("expected timeout for slow blocking operation"),
            Err(err) => {
                assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(err.code, "operation_timeout");
                assert!(err.message.contains("timed out"), "message={}", err.message);
            }
        }
    }

    // Test IDs: TSVC-012
    #[tokio::test]
    async fn telemetry_counters_track_success_failure_and_timeout() {
        let state = test_state(1000, MigrationTarget::Base);

        let success = state
            .run("telemetry_success", |_store| Ok::<_, anyhow::Error>(1_u32))
            .await;
        assert!(success.is_ok(), "expected success path for telemetry test");

        let missing = state
            .run("telemetry_missing", |store| store.get_owner(42))
            .await;
        assert!(missing.is_err(), "expected not found for telemetry test");

        let slow = ServiceState {
            operation_timeout: Duration::from_millis(1),
            ..state.clone()
        };
        let timeout = slow
            .run("telemetry_timeout", |_store| {
                std::thread::sleep(Duration::from_millis(20));
                Ok::<_, anyhow::Error>(0_u32)
            })
            .await;
        assert!(timeout.is_err(), "expected timeout path for telemetry test");

        let snapshot = state.telemetry.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests_success_total, 1);
        assert_eq!(snapshot.requests_failure_total, 2);
        assert_eq!(snapshot.not_found_total, 1);
        assert_eq!(snapshot.timeout_total, 1);
    }

    async fn appointment_pet_id(router: &Router, appointment_id: i64) -> i64 {
        let response = send(router, "GET", &format!("/v1/appointments/{appointment_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        data_id(&response_json(response).await, "pet_id")
    }

    fn data_len(value: &Value) -> Option<usize> {
        value.get("data").and_then(Value::as_array).map(Vec::len)
    }

    // Test IDs: TSVC-013
    #[tokio::test]
    async fn extended_pet_field_before_its_revision_returns_not_implemented() {
        let router = app(test_state(2500, MigrationTarget::Base));
        let owner = send(
            &router,
            "POST",
            "/v1/owners",
            Some(json!({"first_name": "Rita", "last_name": "Lopes", "email": "rita@clinic.test"})),
        )
        .await;
        assert_eq!(owner.status(), StatusCode::CREATED);
        let owner_id = data_id(&response_json(owner).await, "owner_id");

        let response = send(
            &router,
            "POST",
            "/v1/pets",
            Some(json!({
                "name": "Chip",
                "species": "dog",
                "weight": 9.0,
                "owner_id": owner_id,
                "microchip_number": "985112000000001"
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let value = response_json(response).await;
        assert_eq!(error_code(&value), Some("resource_not_migrated"));
        let details = value.get("error").and_then(|error| error.get("details"));
        assert_eq!(
            details
                .and_then(|details| details.get("resource"))
                .and_then(Value::as_str),
            Some("pets.clinical_fields")
        );
        assert_eq!(
            details
                .and_then(|details| details.get("required_revision"))
                .and_then(Value::as_str),
            Some("f7c6d8a9b0e1")
        );

        let pets = send(&router, "GET", "/v1/pets", None).await;
        assert_eq!(data_len(&response_json(pets).await), Some(0));
    }

    // Test IDs: TSVC-014
    #[tokio::test]
    async fn vaccines_and_vaccination_records_round_trip_over_http() {
        let router = app(test_state(2500, MigrationTarget::Head));
        let appointment_id = book_visit(&router).await;
        let pet_id = appointment_pet_id(&router, appointment_id).await;

        let vaccine = send(
            &router,
            "POST",
            "/v1/vaccines",
            Some(json!({"name": "Rabies", "manufacturer": "Zoetis", "species_applicable": "dog"})),
        )
        .await;
        assert_eq!(vaccine.status(), StatusCode::CREATED);
        let vaccine_id = data_id(&response_json(vaccine).await, "vaccine_id");

        let renamed = send(
            &router,
            "PUT",
            &format!("/v1/vaccines/{vaccine_id}"),
            Some(json!({"name": "Rabies 3yr"})),
        )
        .await;
        assert_eq!(renamed.status(), StatusCode::OK);
        let renamed = response_json(renamed).await;
        assert_eq!(
            renamed
                .get("data")
                .and_then(|data| data.get("manufacturer"))
                .and_then(Value::as_str),
            Some("Zoetis")
        );

        let by_name = send(&router, "GET", "/v1/vaccines?name=Rabies%203yr", None).await;
        assert_eq!(by_name.status(), StatusCode::OK);
        assert_eq!(data_len(&response_json(by_name).await), Some(1));
        let unknown = send(&router, "GET", "/v1/vaccines?name=Leptospirosis", None).await;
        assert_eq!(data_len(&response_json(unknown).await), Some(0));

        let backwards = send(
            &router,
            "POST",
            "/v1/vaccination-records",
            Some(json!({
                "pet_id": pet_id,
                "vaccine_id": vaccine_id,
                "vaccination_date": "2025-05-10",
                "next_dose_date": "2025-01-01"
            })),
        )
        .await;
        assert_eq!(backwards.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&response_json(backwards).await), Some("validation_error"));

        let record = send(
            &router,
            "POST",
            "/v1/vaccination-records",
            Some(json!({
                "pet_id": pet_id,
                "vaccine_id": vaccine_id,
                "vaccination_date": "2025-05-10",
                "next_dose_date": "2028-05-10",
                "batch_number": "RB-2025-17"
            })),
        )
        .await;
        assert_eq!(record.status(), StatusCode::CREATED);
        let vaccination_id = data_id(&response_json(record).await, "vaccination_id");

        let history = send(&router, "GET", &format!("/v1/pets/{pet_id}/vaccinations"), None).await;
        assert_eq!(history.status(), StatusCode::OK);
        let history = response_json(history).await;
        assert_eq!(data_len(&history), Some(1));
        assert_eq!(
            history
                .get("data")
                .and_then(|data| data.get(0))
                .and_then(|row| row.get("batch_number"))
                .and_then(Value::as_str),
            Some("RB-2025-17")
        );

        let removed = send(
            &router,
            "DELETE",
            &format!("/v1/vaccination-records/{vaccination_id}"),
            None,
        )
        .await;
        assert_eq!(removed.status(), StatusCode::OK);
        let gone = send(
            &router,
            "GET",
            &format!("/v1/vaccination-records/{vaccination_id}"),
            None,
        )
        .await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    // Test IDs: TSVC-015
    #[tokio::test]
    async fn medical_records_round_trip_over_http() {
        let router = app(test_state(2500, MigrationTarget::Head));
        let appointment_id = book_visit(&router).await;
        let pet_id = appointment_pet_id(&router, appointment_id).await;
        let completed = send(&router, "PUT", &format!("/v1/appointments/{appointment_id}/complete"), None).await;
        assert_eq!(completed.status(), StatusCode::OK);

        let created = send(
            &router,
            "POST",
            "/v1/medical-records",
            Some(json!({
                "appointment_id": appointment_id,
                "diagnosis": "Otitis externa",
                "treatment": "Ear cleaning",
                "prescription": "Otomax 5 days",
                "follow_up_required": true
            })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let record_id = data_id(&response_json(created).await, "record_id");

        let updated = send(
            &router,
            "PUT",
            &format!("/v1/medical-records/{record_id}"),
            Some(json!({
                "appointment_id": appointment_id,
                "diagnosis": "Otitis externa, resolving",
                "treatment": "Ear cleaning"
            })),
        )
        .await;
        assert_eq!(updated.status(), StatusCode::OK);
        let updated = response_json(updated).await;
        let data = updated.get("data");
        assert_eq!(
            data.and_then(|data| data.get("diagnosis")).and_then(Value::as_str),
            Some("Otitis externa, resolving")
        );
        assert_eq!(
            data.and_then(|data| data.get("prescription")).and_then(Value::as_str),
            Some("Otomax 5 days")
        );
        assert_eq!(
            data.and_then(|data| data.get("follow_up_required")).and_then(Value::as_bool),
            Some(false)
        );

        let history = send(&router, "GET", &format!("/v1/pets/{pet_id}/medical-history"), None).await;
        assert_eq!(history.status(), StatusCode::OK);
        assert_eq!(data_len(&response_json(history).await), Some(1));

        let orphan = send(
            &router,
            "POST",
            "/v1/medical-records",
            Some(json!({"appointment_id": 4040, "diagnosis": "None", "treatment": "None"})),
        )
        .await;
        assert_eq!(orphan.status(), StatusCode::BAD_REQUEST);

        let removed = send(&router, "DELETE", &format!("/v1/medical-records/{record_id}"), None).await;
        assert_eq!(removed.status(), StatusCode::OK);
        let removed = response_json(removed).await;
        assert_eq!(
            removed
                .get("data")
                .and_then(|data| data.get("entity"))
                .and_then(Value::as_str),
            Some("medical_record")
        );
        let history = send(&router, "GET", &format!("/v1/pets/{pet_id}/medical-history"), None).await;
        assert_eq!(data_len(&response_json(history).await), Some(0));
    }

    // Test IDs: TSVC-016
    #[tokio::test]
    async fn pet_put_without_microchip_keeps_the_stored_chip() {
        let router = app(test_state(2500, MigrationTarget::Head));
        let appointment_id = book_visit(&router).await;
        let pet_id = appointment_pet_id(&router, appointment_id).await;
        let pet = send(&router, "GET", &format!("/v1/pets/{pet_id}"), None).await;
        let owner_id = data_id(&response_json(pet).await, "owner_id");

        let chipped = send(
            &router,
            "PUT",
            &format!("/v1/pets/{pet_id}"),
            Some(json!({
                "name": "Rex",
                "species": "dog",
                "weight": 12.5,
                "owner_id": owner_id,
                "microchip_number": "985112009876543"
            })),
        )
        .await;
        assert_eq!(chipped.status(), StatusCode::OK);

        let reweighed = send(
            &router,
            "PUT",
            &format!("/v1/pets/{pet_id}"),
            Some(json!({"name": "Rex", "species": "dog", "weight": 13.1, "owner_id": owner_id})),
        )
        .await;
        assert_eq!(reweighed.status(), StatusCode::OK);
        let value = response_json(reweighed).await;
        let data = value.get("data");
        assert_eq!(
            data.and_then(|data| data.get("microchip_number")).and_then(Value::as_str),
            Some("985112009876543")
        );
        let weight = data.and_then(|data| data.get("weight")).and_then(Value::as_f64);
        assert!(weight.is_some_and(|weight| (weight - 13.1).abs() < 1e-9), "weight={weight:?}");
    }

    #[test]
    fn in_memory_database_is_rejected() {
        match ServiceState::new(DatabaseLocation::Memory, Duration::from_millis(10)) {
            Ok(_) => panic!("expected configuration error for in-memory database"),
            Err(err) => assert!(
                matches!(
                    err.downcast_ref::<ClinicError>(),
                    Some(ClinicError::Configuration(_))
                ),
                "unexpected error: {err:#}"
            ),
        }
    }
}
