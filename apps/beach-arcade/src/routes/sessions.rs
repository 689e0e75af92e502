use arcade_proto::{NegotiateResponse, ParamsUpdate, SessionDescription, StatusResponse};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};

use crate::{
    negotiation::NegotiationError,
    session::SessionSummary,
    simulation::ParamsError,
    state::{AppState, StateError},
};

use super::{catalog::map_catalog_err, request_host, ApiError, ApiResult};

pub async fn negotiate(
    State(state): State<AppState>,
    Path((category, id)): Path<(String, String)>,
    headers: HeaderMap,
    offer: Result<Json<SessionDescription>, JsonRejection>,
) -> ApiResult<NegotiateResponse> {
    let Json(offer) = offer.map_err(map_body_rejection)?;
    let host = request_host(&headers);
    let response = state
        .negotiation
        .negotiate(&category, &id, offer, &host)
        .await
        .map_err(map_negotiation_err)?;
    Ok(Json(response))
}

pub async fn update_parameters(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<ParamsUpdate>, JsonRejection>,
) -> ApiResult<StatusResponse> {
    let Json(body) = body.map_err(map_body_rejection)?;
    state
        .update_parameters(&session_id, body.params)
        .map_err(map_state_err)?;
    Ok(Json(StatusResponse::new("success")))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.list_sessions())
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusResponse> {
    state
        .close_session(&session_id)
        .await
        .map_err(map_state_err)?;
    Ok(Json(StatusResponse::new("closed")))
}

/// Malformed request bodies are client errors, whatever axum's default
/// status for the rejection would be.
fn map_body_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

fn map_negotiation_err(err: NegotiationError) -> ApiError {
    match err {
        NegotiationError::UnknownCategory(_) | NegotiationError::UnknownSimulation { .. } => {
            ApiError::NotFound(err.to_string())
        }
        NegotiationError::InvalidOffer(_) => ApiError::BadRequest(err.to_string()),
        NegotiationError::ImplementationMissing { .. }
        | NegotiationError::RelayConfigMissing(_)
        | NegotiationError::Transport(_)
        | NegotiationError::Simulation(_)
        | NegotiationError::IdExhausted => ApiError::Internal(err.to_string()),
    }
}

fn map_state_err(err: StateError) -> ApiError {
    match err {
        StateError::SessionNotFound => ApiError::NotFound("session not found".into()),
        StateError::Catalog(err) => map_catalog_err(err),
        StateError::ImplementationMissing { .. } => ApiError::Internal(err.to_string()),
        StateError::Params(ParamsError::Invalid(msg)) => ApiError::BadRequest(msg),
        StateError::Params(ParamsError::Apply(msg)) => ApiError::Internal(msg),
    }
}
