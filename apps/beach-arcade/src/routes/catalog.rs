use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::{
    catalog::{CatalogError, SimulationInfo},
    state::{AppState, StateError},
};

use super::{ApiError, ApiResult};

pub async fn list_simulations(State(state): State<AppState>) -> Json<Vec<SimulationInfo>> {
    Json(state.catalog.all())
}

pub async fn list_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> ApiResult<Vec<SimulationInfo>> {
    let entries = state.catalog.by_category(&category).map_err(map_catalog_err)?;
    Ok(Json(entries))
}

pub async fn describe_simulation(
    State(state): State<AppState>,
    Path((category, id)): Path<(String, String)>,
) -> ApiResult<SimulationInfo> {
    let entry = state.catalog.lookup(&category, &id).map_err(map_catalog_err)?;
    Ok(Json(entry.info.clone()))
}

pub async fn parameter_schema(
    State(state): State<AppState>,
    Path((category, id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let schema = state
        .parameter_schema(&category, &id)
        .map_err(|err| match err {
            StateError::Catalog(err) => map_catalog_err(err),
            other => ApiError::Internal(other.to_string()),
        })?;
    Ok(Json(schema))
}

pub(super) fn map_catalog_err(err: CatalogError) -> ApiError {
    match err {
        CatalogError::UnknownCategory(_) | CatalogError::UnknownSimulation { .. } => {
            ApiError::NotFound(err.to_string())
        }
        other => ApiError::Internal(other.to_string()),
    }
}
