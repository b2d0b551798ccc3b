//! REST surface for the GridScout exploration benchmark.
//!
//! The handlers here are a thin boundary: they parse and validate requests,
//! dispatch into the engine or the job scheduler, and shape responses.
//! Everything simulation-shaped lives in the library crates.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gridscout_core::{MapKind, SimError, Simulation, SimulationConfig};
use gridscout_jobs::{JobError, JobRegistry, spawn_benchmark, spawn_compare};
use gridscout_policy::PolicyKind;
use gridscout_storage::{RunStore, StorageError, SummaryRow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub registry: JobRegistry,
    pub store: Arc<RunStore>,
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

/// Error type mapped onto HTTP status codes with a structured `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SimError> for ApiError {
    fn from(err: SimError) -> Self {
        match err {
            SimError::InvalidConfig(_) => Self::bad_request(err.to_string()),
            SimError::Ungeneratable { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Sim(inner) => inner.into(),
            JobError::InvalidRunCount => Self::bad_request(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MissingBatch(_) => Self::not_found(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message.clone(),
        });
        (self.status, body).into_response()
    }
}

fn default_dim() -> u32 {
    100
}

fn default_policy() -> String {
    "random".to_string()
}

fn default_map_type() -> String {
    "floorplan".to_string()
}

fn default_complexity() -> f64 {
    0.67
}

fn default_room_size() -> u32 {
    15
}

fn default_num_rooms() -> u32 {
    10
}

fn default_drones() -> u32 {
    1
}

fn default_targets() -> u32 {
    1
}

fn default_num_runs() -> u32 {
    5
}

/// Parameters accepted by the simulation endpoints.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SimulationRequest {
    #[serde(default = "default_dim")]
    pub width: u32,
    #[serde(default = "default_dim")]
    pub height: u32,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_map_type")]
    pub map_type: String,
    #[serde(default = "default_complexity")]
    pub complexity: f64,
    #[serde(default = "default_room_size")]
    pub room_size: u32,
    #[serde(default = "default_num_rooms")]
    pub map_num_rooms: u32,
    #[serde(default = "default_drones")]
    pub num_drones: u32,
    #[serde(default = "default_targets")]
    pub num_targets: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationRequest {
    fn policy_kind(&self) -> Result<PolicyKind, ApiError> {
        self.policy
            .parse::<PolicyKind>()
            .map_err(|err| ApiError::bad_request(err.to_string()))
    }

    fn map_kind(&self) -> Result<MapKind, ApiError> {
        match self.map_type.as_str() {
            "random" => Ok(MapKind::Random),
            "floorplan" => Ok(MapKind::Floorplan),
            other => Err(ApiError::bad_request(format!("unknown map_type: {other}"))),
        }
    }

    fn to_config(&self) -> Result<SimulationConfig, ApiError> {
        let config = SimulationConfig {
            width: self.width,
            height: self.height,
            map_kind: self.map_kind()?,
            complexity: self.complexity,
            room_size: self.room_size,
            num_rooms: self.map_num_rooms,
            num_drones: self.num_drones,
            num_targets: self.num_targets,
            seed: self.seed,
            ..SimulationConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Body for `/api/benchmark`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BenchmarkRequest {
    #[serde(flatten)]
    pub simulation: SimulationRequest,
    #[serde(default = "default_num_runs")]
    pub num_runs: u32,
}

/// Body for `/api/compare`. An empty policy list selects every policy.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CompareRequest {
    #[serde(flatten)]
    pub simulation: SimulationRequest,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default = "default_num_runs")]
    pub num_runs: u32,
}

#[derive(Debug, Serialize, ToSchema)]
struct PoliciesResponse {
    policies: Vec<&'static str>,
}

#[derive(Debug, Serialize, ToSchema)]
struct JobCreatedResponse {
    job_id: Uuid,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_policies,
        simulate,
        start_benchmark,
        start_compare,
        job_status,
        list_history,
        history_folder,
        download_summary,
        get_simulation
    ),
    components(schemas(
        SimulationRequest,
        BenchmarkRequest,
        CompareRequest,
        PoliciesResponse,
        JobCreatedResponse,
        ErrorResponse
    )),
    info(
        title = "GridScout API",
        description = "Multi-agent grid exploration benchmark",
        version = env!("CARGO_PKG_VERSION")
    ),
    tags((name = "gridscout", description = "Simulation, job, and archive endpoints"))
)]
struct ApiDoc;

#[utoipa::path(
    get,
    path = "/api/policies",
    tag = "gridscout",
    responses((status = 200, body = PoliciesResponse))
)]
async fn get_policies() -> Json<PoliciesResponse> {
    Json(PoliciesResponse {
        policies: PolicyKind::ALL.iter().map(|p| p.as_str()).collect(),
    })
}

#[utoipa::path(
    post,
    path = "/api/simulate",
    tag = "gridscout",
    request_body = SimulationRequest,
    responses(
        (status = 200, description = "Full simulation record"),
        (status = 400, body = ErrorResponse)
    )
)]
async fn simulate(
    State(state): State<ApiState>,
    Json(request): Json<SimulationRequest>,
) -> Result<Json<Value>, ApiError> {
    let policy = request.policy_kind()?;
    let config = request.to_config()?;

    let record = tokio::task::spawn_blocking(move || {
        let agents = config.num_drones as usize;
        Simulation::new(config, policy.build(agents)).map(Simulation::run)
    })
    .await
    .map_err(|err| ApiError::internal(format!("simulation task failed: {err}")))??;

    let run_id = Uuid::new_v4();
    persist_single_run(&state.store, run_id, policy, &record);

    Ok(Json(json!({
        "id": run_id,
        "config": record.config,
        "stats": record.stats,
        "map": record.map,
        "history": record.history,
    })))
}

/// Archive a synchronous single run. Storage failures are logged, never
/// surfaced: the in-memory result is already complete.
fn persist_single_run(
    store: &RunStore,
    run_id: Uuid,
    policy: PolicyKind,
    record: &gridscout_core::RunRecord,
) {
    let batch = match store.create_batch("single", policy.as_str()) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(%err, "failed to create batch folder for single run");
            return;
        }
    };
    if let Err(err) = batch.write_config(&json!({
        "type": "single",
        "simulation": record.config,
    })) {
        warn!(%err, "failed to persist single-run config");
    }
    if let Err(err) = batch.write_run(run_id, record) {
        warn!(%err, "failed to persist single run");
    }
    if let Err(err) = batch.write_summary(&[SummaryRow::from_record(record)]) {
        warn!(%err, "failed to persist single-run summary");
    }
}

#[utoipa::path(
    post,
    path = "/api/benchmark",
    tag = "gridscout",
    request_body = BenchmarkRequest,
    responses(
        (status = 200, body = JobCreatedResponse),
        (status = 400, body = ErrorResponse)
    )
)]
async fn start_benchmark(
    State(state): State<ApiState>,
    Json(request): Json<BenchmarkRequest>,
) -> Result<Json<JobCreatedResponse>, ApiError> {
    let policy = request.simulation.policy_kind()?;
    let config = request.simulation.to_config()?;
    let job_id = spawn_benchmark(
        &state.registry,
        Some(state.store.as_ref().clone()),
        config,
        policy,
        request.num_runs,
    )?;
    Ok(Json(JobCreatedResponse { job_id }))
}

#[utoipa::path(
    post,
    path = "/api/compare",
    tag = "gridscout",
    request_body = CompareRequest,
    responses(
        (status = 200, body = JobCreatedResponse),
        (status = 400, body = ErrorResponse)
    )
)]
async fn start_compare(
    State(state): State<ApiState>,
    Json(request): Json<CompareRequest>,
) -> Result<Json<JobCreatedResponse>, ApiError> {
    let config = request.simulation.to_config()?;
    let policies = request
        .policies
        .iter()
        .map(|name| {
            name.parse::<PolicyKind>()
                .map_err(|err| ApiError::bad_request(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let job_id = spawn_compare(
        &state.registry,
        Some(state.store.as_ref().clone()),
        config,
        policies,
        request.num_runs,
    )?;
    Ok(Json(JobCreatedResponse { job_id }))
}

#[utoipa::path(
    get,
    path = "/api/job/{id}",
    tag = "gridscout",
    params(("id" = Uuid, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Matching payload"),
        (status = 404, body = ErrorResponse)
    )
)]
async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state
        .registry
        .snapshot(id)
        .ok_or_else(|| ApiError::not_found(format!("job not found: {id}")))?;
    serde_json::to_value(&snapshot)
        .map(Json)
        .map_err(|err| ApiError::internal(err.to_string()))
}

#[utoipa::path(
    get,
    path = "/api/history",
    tag = "gridscout",
    responses((status = 200, description = "Archived batch folders"))
)]
async fn list_history(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let folders = state.store.list_batches()?;
    Ok(Json(json!({ "folders": folders })))
}

#[utoipa::path(
    get,
    path = "/api/history/{folder}",
    tag = "gridscout",
    params(("folder" = String, Path, description = "Batch folder name")),
    responses(
        (status = 200, description = "Matching payload"),
        (status = 404, body = ErrorResponse)
    )
)]
async fn history_folder(
    State(state): State<ApiState>,
    Path(folder): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let contents = state.store.batch_contents(&folder)?;
    Ok(Json(json!({
        "runs": contents.runs,
        "config": contents.config,
    })))
}

#[utoipa::path(
    get,
    path = "/api/history/{folder}/download",
    tag = "gridscout",
    params(("folder" = String, Path, description = "Batch folder name")),
    responses(
        (status = 200, description = "summary.csv attachment"),
        (status = 404, body = ErrorResponse)
    )
)]
async fn download_summary(
    State(state): State<ApiState>,
    Path(folder): Path<String>,
) -> Result<Response, ApiError> {
    let csv = state.store.summary_csv(&folder)?;
    let disposition = format!("attachment; filename=\"{folder}_summary.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/simulation/{id}",
    tag = "gridscout",
    params(("id" = Uuid, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Matching payload"),
        (status = 404, body = ErrorResponse)
    )
)]
async fn get_simulation(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .find_run(id)?
        .ok_or_else(|| ApiError::not_found(format!("simulation not found: {id}")))?;
    Ok(Json(json!({
        "id": id,
        "config": record.config,
        "stats": record.stats,
        "map": record.map,
        "history": record.history,
    })))
}

/// Build the full application router, API and Swagger UI included.
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/api/policies", get(get_policies))
        .route("/api/simulate", post(simulate))
        .route("/api/benchmark", post(start_benchmark))
        .route("/api/compare", post(start_compare))
        .route("/api/job/{id}", get(job_status))
        .route("/api/history", get(list_history))
        .route("/api/history/{folder}", get(history_folder))
        .route("/api/history/{folder}/download", get(download_summary))
        .route("/api/simulation/{id}", get(get_simulation))
        .with_state(state);

    Router::new()
        .merge(api)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
