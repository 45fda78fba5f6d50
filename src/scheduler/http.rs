use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    CallerCredential, CreateScriptRequest, CronScript, SchedulerError, SchedulerResult,
    ScriptService, UpdateScriptRequest,
};
use crate::config::SchedulerConfig;

#[derive(Debug, Deserialize)]
struct CreateScriptResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    ids: &'a [Uuid],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    scripts: Vec<CronScript>,
}

/// HTTP client for the scheduler's script API.
///
/// Endpoints (relative to `base_url`):
/// - `POST /scripts` create, returns `{"id": ...}`
/// - `PATCH /scripts/{id}` partial update
/// - `DELETE /scripts/{id}`
/// - `GET /scripts/{id}`
/// - `POST /scripts/lookup` with `{"ids": [...]}`, returns `{"scripts": [...]}`
///
/// Every request carries the caller's credential as a bearer token.
#[derive(Clone)]
pub struct HttpScriptService {
    http_client: Client,
    base_url: String,
}

impl HttpScriptService {
    pub fn new(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self::with_client(http_client, &config.base_url))
    }

    pub fn with_client(http_client: Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn script_url(&self, script_id: Uuid) -> String {
        format!("{}/scripts/{}", self.base_url, script_id)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        credential: &CallerCredential,
        script_id: Option<Uuid>,
    ) -> SchedulerResult<Response> {
        let response = request.bearer_auth(credential.token()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match (status, script_id) {
            (StatusCode::NOT_FOUND, Some(id)) => Err(SchedulerError::NotFound(id)),
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
                Err(SchedulerError::Unauthorized)
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(SchedulerError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl ScriptService for HttpScriptService {
    async fn create_script(
        &self,
        credential: &CallerCredential,
        request: CreateScriptRequest,
    ) -> SchedulerResult<Uuid> {
        let url = format!("{}/scripts", self.base_url);
        let response = self
            .send(self.http_client.post(&url).json(&request), credential, None)
            .await?;

        // The script exists remotely even if its id cannot be read back
        let status = response.status();
        let text = response.text().await?;
        let body: CreateScriptResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(
                status = status.as_u16(),
                body = %text,
                error = %e,
                "Unreadable create response; scheduled script may be orphaned"
            );
            SchedulerError::InvalidResponse(e.to_string())
        })?;

        tracing::debug!(script_id = %body.id, "Created scheduled script");
        Ok(body.id)
    }

    async fn update_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
        request: UpdateScriptRequest,
    ) -> SchedulerResult<()> {
        let url = self.script_url(script_id);
        self.send(
            self.http_client.patch(&url).json(&request),
            credential,
            Some(script_id),
        )
        .await?;
        Ok(())
    }

    async fn delete_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> SchedulerResult<()> {
        let url = self.script_url(script_id);
        self.send(self.http_client.delete(&url), credential, Some(script_id))
            .await?;
        Ok(())
    }

    async fn get_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> SchedulerResult<CronScript> {
        let url = self.script_url(script_id);
        let response = self
            .send(self.http_client.get(&url), credential, Some(script_id))
            .await?;

        response
            .json()
            .await
            .map_err(|e| SchedulerError::InvalidResponse(e.to_string()))
    }

    async fn get_scripts(
        &self,
        credential: &CallerCredential,
        script_ids: &[Uuid],
    ) -> SchedulerResult<Vec<CronScript>> {
        if script_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/scripts/lookup", self.base_url);
        let response = self
            .send(
                self.http_client
                    .post(&url)
                    .json(&LookupRequest { ids: script_ids }),
                credential,
                None,
            )
            .await?;

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::InvalidResponse(e.to_string()))?;
        Ok(body.scripts)
    }
}
