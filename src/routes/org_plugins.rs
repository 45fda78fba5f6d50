//! Per-organization retention plugin endpoints.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use axum_valid::Valid;
use uuid::Uuid;

use super::{ApiError, get_services, require_org};
use crate::{
    AppState,
    auth::Caller,
    models::{EnabledPlugin, OrgPluginConfig, UpdateOrgPluginConfig},
    services::UpdateOutcome,
};

/// Retention plugins enabled for an organization.
#[tracing::instrument(name = "org_plugins.list", skip(state, caller))]
pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<EnabledPlugin>>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let plugins = services
        .retention_plugins
        .list_enabled_for_org(org_id)
        .await?;
    Ok(Json(plugins))
}

/// An organization's configuration for one plugin.
#[tracing::instrument(name = "org_plugins.get", skip(state, caller))]
pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((org_id, plugin_id)): Path<(Uuid, String)>,
) -> Result<Json<OrgPluginConfig>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let config = services
        .retention_plugins
        .get_org_config(org_id, &plugin_id)
        .await?;
    Ok(Json(config))
}

/// Enable, disable, reconfigure or upgrade a plugin.
#[tracing::instrument(name = "org_plugins.update", skip(state, caller, input))]
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((org_id, plugin_id)): Path<(Uuid, String)>,
    Valid(Json(input)): Valid<Json<UpdateOrgPluginConfig>>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    require_org(&caller, org_id)?;
    let services = get_services(&state)?;
    let outcome = services
        .retention_plugins
        .update_org_config(&caller.credential, org_id, &plugin_id, input)
        .await?;
    Ok(Json(outcome))
}
