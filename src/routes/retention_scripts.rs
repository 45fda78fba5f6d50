//! Retention script endpoints.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_valid::Valid;
use uuid::Uuid;

use super::{ApiError, get_services, require_org};
use crate::{
    AppState,
    auth::Caller,
    models::{
        CreateRetentionScript, DetailedRetentionScript, RetentionScript, RetentionScriptView,
        UpdateRetentionScript,
    },
};

#[tracing::instrument(name = "retention_scripts.list", skip(state, caller))]
pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<RetentionScriptView>>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let scripts = services
        .retention_scripts
        .list_scripts(&caller.credential, org_id)
        .await?;
    Ok(Json(scripts))
}

#[tracing::instrument(name = "retention_scripts.get", skip(state, caller))]
pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((org_id, script_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DetailedRetentionScript>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let script = services
        .retention_scripts
        .get_script(&caller.credential, org_id, script_id)
        .await?;
    Ok(Json(script))
}

/// Create a custom (non-preset) script for an enabled plugin.
#[tracing::instrument(name = "retention_scripts.create", skip(state, caller, input))]
pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(org_id): Path<Uuid>,
    Valid(Json(input)): Valid<Json<CreateRetentionScript>>,
) -> Result<(StatusCode, Json<RetentionScriptView>), ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let script = services
        .retention_scripts
        .create_script(&caller.credential, org_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(script)))
}

#[tracing::instrument(name = "retention_scripts.update", skip(state, caller, input))]
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((org_id, script_id)): Path<(Uuid, Uuid)>,
    Valid(Json(input)): Valid<Json<UpdateRetentionScript>>,
) -> Result<Json<RetentionScript>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let script = services
        .retention_scripts
        .update_script(&caller.credential, caller.org_id, script_id, input)
        .await?;
    Ok(Json(script))
}

#[tracing::instrument(name = "retention_scripts.delete", skip(state, caller))]
pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((org_id, script_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    services
        .retention_scripts
        .delete_script(&caller.credential, org_id, script_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
