//! Per-organization data retention plugins.
//!
//! Organizations enable plugins that export their telemetry to external
//! systems. Enabling a plugin instantiates its preset export scripts on a
//! remote cron scheduler; updating the configuration re-renders every
//! script's configuration document, and disabling removes the scripts again.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod models;
pub mod observability;
pub mod routes;
pub mod scheduler;
pub mod services;

use std::{sync::Arc, time::Duration};

use axum::{Router, http::StatusCode, routing::get};
use http::HeaderName;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::{ConfigError, ServerConfig, ServiceConfig},
    crypto::{AesGcmCipher, FieldCipher},
    db::{DbError, DbPool},
    scheduler::{HttpScriptService, SchedulerError},
    services::Services,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub db: Option<Arc<DbPool>>,
    /// Present whenever a database is configured
    pub services: Option<Services>,
}

impl AppState {
    /// Connect to the database and the scheduler described by `config`.
    ///
    /// Without a database no services are built and only `/health` works.
    pub async fn from_config(config: ServiceConfig) -> Result<Self, InitError> {
        if config.database.is_none() {
            tracing::warn!("No database configured, retention plugin routes are unavailable");
            return Ok(Self {
                config: Arc::new(config),
                db: None,
                services: None,
            });
        }

        if !config.scheduler.is_configured() {
            return Err(ConfigError::Validation(
                "A database requires scheduler.base_url to be set".into(),
            )
            .into());
        }

        let db = Arc::new(DbPool::from_config(&config.database).await?);
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }

        let cipher: Arc<dyn FieldCipher> = Arc::new(AesGcmCipher::new(config.encryption.key()?));
        let scheduler = Arc::new(HttpScriptService::new(&config.scheduler)?);
        let services = Services::new(db.clone(), scheduler, cipher);

        Ok(Self {
            config: Arc::new(config),
            db: Some(db),
            services: Some(services),
        })
    }
}

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("Scheduler client initialization failed: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Build the router with the full middleware stack.
pub fn build_app(config: &ServerConfig, state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let app = Router::new().route("/health", get(routes::health::health_check));
    let app = if config.api_base_path.is_empty() || config.api_base_path == "/" {
        app.merge(routes::api_routes())
    } else {
        app.nest(&config.api_base_path, routes::api_routes())
    };

    // Layers run bottom-up
    app.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    ))
    .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
    .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
    .layer(TraceLayer::new_for_http())
    .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
    .with_state(state)
}
