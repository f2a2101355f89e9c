//! HTTP edge: JSON routes over the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::command_set::{CommandSetUpdate, CreateCommandSet};
use crate::error::{AppError, ErrorKind, Result};
use crate::hardware::HardwareType;
use crate::instance::{CreateInstance, InstanceConfig};
use crate::logs::read_log;
use crate::orchestrator::Orchestrator;
use crate::ports::list_serial_ports;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Where the workers write their `logs/` tree.
    pub work_dir: PathBuf,
}

type SharedState = Arc<AppState>;

impl ErrorKind {
    fn status(self) -> StatusCode {
        match self {
            Self::InstanceNotFound | Self::CommandSetNotFound | Self::LogNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::NotRunning => StatusCode::NOT_FOUND,
            Self::DefaultSetImmutable => StatusCode::FORBIDDEN,
            Self::DuplicateProject
            | Self::DuplicateName
            | Self::AlreadyRunning
            | Self::Validation
            | Self::NoChange => StatusCode::BAD_REQUEST,
            Self::PortConflict | Self::InstanceBusy => StatusCode::CONFLICT,
            Self::Allocation
            | Self::Store
            | Self::Config
            | Self::Io
            | Self::Process
            | Self::Other => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind().status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (status, Json(self)).into_response()
    }
}

/// `Json` body extractor whose rejections use the `{code, reason, payload}`
/// error body instead of axum's plain-text one.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/hardware-types", get(hardware_types))
        .route("/api/serial-ports", get(serial_ports))
        .route("/api/instances/check-name", post(check_name))
        .route("/api/instances", get(list_instances).post(create_instance))
        .route(
            "/api/instances/{id}",
            get(get_instance)
                .put(update_instance)
                .delete(delete_instance),
        )
        .route("/api/instances/{id}/start", post(start_instance))
        .route("/api/instances/{id}/stop", post(stop_instance))
        .route("/api/instances/{id}/progress", get(instance_progress))
        .route("/api/instances/{id}/command-set", put(select_command_set))
        .route("/api/command-sets", post(create_command_set))
        .route(
            "/api/command-sets/{key}",
            get(get_command_sets)
                .put(update_command_set)
                .delete(delete_command_set),
        )
        .route("/api/logs/{date}/{instance_id}", get(get_log))
        .layer(cors)
        .with_state(state)
}

async fn hardware_types(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.hardware_types())
}

async fn serial_ports() -> Result<impl IntoResponse> {
    let ports = tokio::task::spawn_blocking(list_serial_ports)
        .await
        .map_err(|e| AppError::other(format!("Port enumeration task failed: {}", e)))??;
    Ok(Json(ports))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckNameRequest {
    #[serde(default)]
    name: String,
    hardware_type: String,
}

async fn check_name(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CheckNameRequest>,
) -> Result<impl IntoResponse> {
    state.orchestrator.check_name(&req.name, &req.hardware_type)?;
    Ok(Json(json!({ "available": true })))
}

async fn list_instances(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.list())
}

async fn create_instance(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateInstance>,
) -> Result<impl IntoResponse> {
    let instance = state.orchestrator.create(req)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Instance created successfully", "id": instance.id })),
    ))
}

async fn get_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.orchestrator.get(&id)?))
}

async fn update_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(config): ApiJson<InstanceConfig>,
) -> Result<impl IntoResponse> {
    state.orchestrator.update(&id, config)?;
    Ok(message("Instance updated successfully"))
}

async fn delete_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.orchestrator.delete(&id)?;
    Ok(message("Instance deleted successfully"))
}

async fn start_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let info = state.orchestrator.start(&id)?;
    Ok(Json(json!({
        "message": "Test started successfully",
        "pid": info.pid,
    })))
}

async fn stop_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.orchestrator.stop(&id)?;
    Ok(message("Test stopped successfully"))
}

async fn instance_progress(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let info = state.orchestrator.progress(&id)?;
    Ok(Json(json!({
        "running": info.is_some(),
        "pid": info.as_ref().and_then(|info| info.pid),
        "startedAt": info.as_ref().map(|info| info.started_at),
        "progress": info.and_then(|info| info.last_progress),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectCommandSetRequest {
    command_set_id: u64,
}

async fn select_command_set(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SelectCommandSetRequest>,
) -> Result<impl IntoResponse> {
    state.orchestrator.select_command_set(&id, req.command_set_id)?;
    Ok(message("Command set updated successfully"))
}

/// `GET` takes a hardware type or a set id, `PUT`/`DELETE` a set id.
fn parse_set_id(key: &str) -> Result<u64> {
    key.parse()
        .map_err(|_| AppError::validation(format!("Invalid command set id: {}", key)))
}

async fn get_command_sets(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<Response> {
    if let Ok(id) = key.parse::<u64>() {
        let set = state.orchestrator.get_command_set(id)?;
        return Ok(Json(set).into_response());
    }
    let hardware_type: HardwareType = key.parse()?;
    Ok(Json(state.orchestrator.list_command_sets(hardware_type)).into_response())
}

async fn create_command_set(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateCommandSet>,
) -> Result<impl IntoResponse> {
    let set = state.orchestrator.create_command_set(req)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": set.id }))))
}

async fn update_command_set(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    ApiJson(update): ApiJson<CommandSetUpdate>,
) -> Result<impl IntoResponse> {
    state
        .orchestrator
        .update_command_set(parse_set_id(&key)?, update)?;
    Ok(message("Command set updated successfully"))
}

async fn delete_command_set(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    state.orchestrator.delete_command_set(parse_set_id(&key)?)?;
    Ok(message("Command set deleted successfully"))
}

async fn get_log(
    State(state): State<SharedState>,
    Path((date, instance_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    read_log(&state.work_dir, &date, &instance_id).await
}
