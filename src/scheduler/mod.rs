//! Client side of the remote cron-script scheduler.
//!
//! The scheduler owns script bodies, schedules, and target clusters. This
//! service owns the metadata around them (names, export URLs, preset flags)
//! and keeps both sides consistent through [`ScriptService`].

mod http;
#[cfg(test)]
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use http::HttpScriptService;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Script not found: {0}")]
    NotFound(Uuid),

    #[error("Scheduler rejected caller credential")]
    Unauthorized,

    #[error("Scheduler API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// The caller's bearer token, forwarded verbatim to the scheduler.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct CallerCredential(String);

impl CallerCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CallerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallerCredential(<redacted>)")
    }
}

/// A script as the scheduler stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronScript {
    pub id: Uuid,
    pub script: String,
    #[serde(default)]
    pub cluster_ids: Vec<Uuid>,
    /// Opaque configuration document handed to the script at runtime
    #[serde(default)]
    pub configs: String,
    pub enabled: bool,
    pub frequency_s: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateScriptRequest {
    pub script: String,
    pub cluster_ids: Vec<Uuid>,
    pub configs: String,
    pub frequency_s: i64,
}

/// Partial update. `None` fields are left unchanged by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateScriptRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_s: Option<i64>,
}

impl UpdateScriptRequest {
    /// An update that only replaces the configuration document.
    pub fn configs_only(configs: String) -> Self {
        Self {
            configs: Some(configs),
            ..Default::default()
        }
    }
}

/// Remote scheduler operations, all performed on behalf of the caller.
#[async_trait]
pub trait ScriptService: Send + Sync {
    /// Create a script and return the id the scheduler assigned.
    async fn create_script(
        &self,
        credential: &CallerCredential,
        request: CreateScriptRequest,
    ) -> SchedulerResult<Uuid>;

    async fn update_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
        request: UpdateScriptRequest,
    ) -> SchedulerResult<()>;

    async fn delete_script(&self, credential: &CallerCredential, script_id: Uuid)
    -> SchedulerResult<()>;

    async fn get_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> SchedulerResult<CronScript>;

    /// Fetch several scripts at once. Unknown ids are omitted from the result.
    async fn get_scripts(
        &self,
        credential: &CallerCredential,
        script_ids: &[Uuid],
    ) -> SchedulerResult<Vec<CronScript>>;
}
