use std::time::SystemTime;

use arcade_proto::RelayCredentials;
use axum::{extract::State, http::HeaderMap, Json};

use crate::state::AppState;

use super::{request_host, ApiError, ApiResult};

/// Relay credentials for viewers that negotiate through TURN. Local-only
/// deployments never hand them out.
pub async fn turn_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<RelayCredentials> {
    if state.config.is_local_only() {
        return Err(ApiError::NotFound(
            "relay credentials are disabled in local-only mode".into(),
        ));
    }
    let credentials = state
        .turn
        .issue(SystemTime::now(), &request_host(&headers))
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(credentials))
}
