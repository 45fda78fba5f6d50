//! Plugin catalog endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::{ApiError, get_services};
use crate::{
    AppState,
    models::{PluginKind, PluginSummary, RetentionReleaseConfig},
};

#[derive(Debug, Default, Deserialize)]
pub struct ListPluginsQuery {
    #[serde(default)]
    pub kind: PluginKind,
}

/// Latest release of every plugin, optionally only retention-capable ones.
#[tracing::instrument(name = "plugins.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListPluginsQuery>,
) -> Result<Json<Vec<PluginSummary>>, ApiError> {
    let services = get_services(&state)?;
    let plugins = services.retention_plugins.list_plugins(query.kind).await?;
    Ok(Json(plugins))
}

/// Retention settings of one plugin release.
#[tracing::instrument(name = "plugins.retention_config", skip(state))]
pub async fn get_retention_config(
    State(state): State<AppState>,
    Path((plugin_id, version)): Path<(String, String)>,
) -> Result<Json<RetentionReleaseConfig>, ApiError> {
    let services = get_services(&state)?;
    let config = services
        .retention_plugins
        .get_release_config(&plugin_id, &version)
        .await?;
    Ok(Json(config))
}
