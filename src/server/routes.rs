//! HTTP wiring over [`RpcService`].
//!
//! Every handler is a thin translation layer: extract path/body, call the
//! service method, map the domain error onto a status code with a typed JSON
//! body. No simulation logic lives here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MicroscopeConfig;
use crate::error::SimulationError;

use super::RpcService;

type ServiceState = State<Arc<RpcService>>;

/// Error envelope returned for every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(SimulationError);

impl From<SimulationError> for ApiError {
    fn from(error: SimulationError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SimulationError::UnknownSimulationId(_) => StatusCode::NOT_FOUND,
            SimulationError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SimulationError::ImageShape { .. } | SimulationError::InvalidSlice { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct CreatedBody {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct ControlSignalBody {
    value: f64,
}

/// Builds the full route table over a shared service.
pub fn router(service: Arc<RpcService>) -> Router {
    Router::new()
        .route("/api/status", get(server_status))
        .route("/api/simulations", post(create_simulation).get(list_simulations))
        .route("/api/simulations/:id", delete(delete_simulation))
        .route("/api/simulations/:id/next-image", get(next_image))
        .route("/api/simulations/:id/image-count", get(image_count))
        .route("/api/simulations/:id/increment", post(increment))
        .route(
            "/api/simulations/:id/control-signal",
            get(get_control_signal).put(set_control_signal),
        )
        .route("/api/simulations/:id/fov-size", get(fov_size))
        .route("/api/simulations/:id/pixel-size", get(pixel_size))
        .route("/api/simulations/:id/fluorescence", get(fluorescence))
        .route("/api/simulations/:id/fluorescence-name", get(fluorescence_name))
        .route(
            "/api/simulations/:id/true-signal-description",
            get(true_signal_description),
        )
        .route("/api/simulations/:id/true-signal/:frame", get(true_signal))
        .route("/api/simulations/:id/state", get(simulation_state))
        .with_state(service)
}

async fn server_status(State(service): ServiceState) -> &'static str {
    service.server_status()
}

async fn create_simulation(
    State(service): ServiceState,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreatedBody>)> {
    // An empty body means "use the server template"; a non-empty body must
    // be a valid config, and a parse failure is a client-visible error
    // rather than a silent fallback.
    let config = if body.is_empty() {
        None
    } else {
        let config = serde_json::from_slice::<MicroscopeConfig>(&body).map_err(|e| {
            ApiError(SimulationError::Configuration(format!(
                "malformed simulation config: {e}"
            )))
        })?;
        Some(config)
    };
    let id = service.create_simulation(config).await?;
    Ok((StatusCode::CREATED, Json(CreatedBody { id })))
}

async fn list_simulations(State(service): ServiceState) -> Json<Vec<u32>> {
    Json(service.list_simulations().await)
}

async fn delete_simulation(
    State(service): ServiceState,
    Path(id): Path<u32>,
) -> ApiResult<StatusCode> {
    service.delete_simulation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn next_image(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<Response> {
    let bytes = service.get_next_image(id).await?;
    Ok(([(header::CONTENT_TYPE, "image/tiff")], bytes).into_response())
}

async fn image_count(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<Json<usize>> {
    Ok(Json(service.get_image_count(id).await?))
}

async fn increment(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<StatusCode> {
    service.increment_time_step(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_control_signal(
    State(service): ServiceState,
    Path(id): Path<u32>,
) -> ApiResult<Json<f64>> {
    Ok(Json(service.get_control_signal(id).await?))
}

async fn set_control_signal(
    State(service): ServiceState,
    Path(id): Path<u32>,
    Json(body): Json<ControlSignalBody>,
) -> ApiResult<StatusCode> {
    service.set_control_signal(id, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fov_size(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<Json<f64>> {
    Ok(Json(service.get_fov_size(id).await?))
}

async fn pixel_size(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<Json<f64>> {
    Ok(Json(service.get_object_space_pixel_size(id).await?))
}

async fn fluorescence(State(service): ServiceState, Path(id): Path<u32>) -> ApiResult<Response> {
    let json = service.to_json_fluorescence(id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

async fn fluorescence_name(
    State(service): ServiceState,
    Path(id): Path<u32>,
) -> ApiResult<&'static str> {
    Ok(service.get_fluorescence_json_name(id).await?)
}

async fn true_signal_description(
    State(service): ServiceState,
    Path(id): Path<u32>,
) -> ApiResult<&'static str> {
    Ok(service.get_short_true_signal_description(id).await?)
}

async fn true_signal(
    State(service): ServiceState,
    Path((id, frame)): Path<(u32, usize)>,
) -> ApiResult<Json<f64>> {
    Ok(Json(service.get_true_signal(id, frame).await?))
}

async fn simulation_state(
    State(service): ServiceState,
    Path(id): Path<u32>,
) -> ApiResult<String> {
    Ok(service.get_simulation_state(id).await?)
}
