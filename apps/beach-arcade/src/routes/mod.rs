mod catalog;
mod sessions;
mod turn;

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, warn};

use arcade_proto::StatusResponse;

use crate::{metrics, state::AppState};

pub use catalog::*;
pub use sessions::*;
pub use turn::*;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin_list());
    let static_dir = state.config.static_dir.clone();

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/game_info", get(list_simulations))
        .route("/game_info/:category", get(list_category))
        .route("/game_info/:category/:id", get(describe_simulation))
        .route("/game/:category/:id/params/schema", get(parameter_schema))
        .route("/offer/:category/:id", post(negotiate))
        .route("/params/:session_id", post(update_parameters))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:session_id", delete(close_session))
        .route("/turn-credentials", get(turn_credentials))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(cors).layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check() -> Json<StatusResponse> {
    Json(StatusResponse::new("healthy"))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// Host name the viewer used to reach us, without the port.
pub(crate) fn request_host(headers: &HeaderMap) -> String {
    let raw = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    if let Some(rest) = raw.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host.to_string(),
        _ => raw.to_string(),
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
        };
        (
            status,
            Json(ApiErrorBody {
                error: code,
                message: Some(message),
            }),
        )
            .into_response()
    }
}
