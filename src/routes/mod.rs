mod error;
pub mod health;
pub mod org_plugins;
pub mod plugins;
pub mod retention_scripts;

use axum::{
    Router,
    routing::{get, patch},
};
pub use error::{ApiError, ErrorInfo, ErrorResponse};
use uuid::Uuid;

use crate::{AppState, auth::Caller, services::Services};

/// Authenticated API routes, mounted under `server.api_base_path`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/plugins", get(plugins::list))
        .route(
            "/plugins/{plugin_id}/versions/{version}/retention-config",
            get(plugins::get_retention_config),
        )
        .route(
            "/orgs/{org_id}/retention-plugins",
            get(org_plugins::list),
        )
        .route(
            "/orgs/{org_id}/retention-plugins/{plugin_id}",
            get(org_plugins::get).patch(org_plugins::update),
        )
        .route(
            "/orgs/{org_id}/retention-scripts",
            get(retention_scripts::list).post(retention_scripts::create),
        )
        .route(
            "/orgs/{org_id}/retention-scripts/{script_id}",
            patch(retention_scripts::update)
                .get(retention_scripts::get)
                .delete(retention_scripts::delete),
        )
        .route_layer(axum::middleware::from_fn(
            crate::auth::caller_auth_middleware,
        ))
}

fn get_services(state: &AppState) -> Result<&Services, ApiError> {
    state.services.as_ref().ok_or(ApiError::ServicesRequired)
}

/// Callers may only address their own organization.
fn require_org(caller: &Caller, org_id: Uuid) -> Result<(), ApiError> {
    if caller.org_id != org_id {
        return Err(ApiError::Forbidden(
            "Caller does not belong to this organization".into(),
        ));
    }
    Ok(())
}
