//! Keeps local retention script rows and remote scheduled scripts in step.
//!
//! Remote side effects cannot join the database transaction. Every operation
//! here therefore runs inside a caller-owned [`RetentionPluginTx`] and is
//! ordered so that a local script row never outlives its remote script:
//! remote creates are recorded in a [`ScriptLedger`] for compensation, and
//! remote deletes of retired scripts wait until the local deletes commit.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use uuid::Uuid;

use super::error::{RetentionError, RetentionResult};
use crate::{
    crypto::FieldCipher,
    db::RetentionPluginTx,
    models::{PluginRelease, RetentionScript},
    scheduler::{
        CallerCredential, CreateScriptRequest, CronScript, SchedulerError, ScriptService,
        UpdateScriptRequest,
    },
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument<'a> {
    otel_endpoint_config: OtelEndpointConfig<'a>,
}

#[derive(Serialize)]
struct OtelEndpointConfig<'a> {
    url: &'a str,
    headers: &'a BTreeMap<String, String>,
}

/// Render the configuration document a script receives at runtime.
///
/// The plugin's configuration values become export headers. Output is
/// deterministic for equal inputs.
pub fn render_config_document(
    configurations: &BTreeMap<String, String>,
    export_url: &str,
) -> RetentionResult<String> {
    serde_json::to_string(&ConfigDocument {
        otel_endpoint_config: OtelEndpointConfig {
            url: export_url,
            headers: configurations,
        },
    })
    .map_err(|e| RetentionError::Internal(format!("Failed to render script config: {e}")))
}

/// Resolve the export URL for a script.
///
/// The organization-wide override wins, then the script's own override, then
/// the release default. Empty strings count as unset. Returns `""` when
/// nothing is configured.
pub fn effective_export_url(
    org_custom: Option<&str>,
    script_override: Option<&str>,
    release_default: Option<&str>,
) -> String {
    [org_custom, script_override, release_default]
        .into_iter()
        .flatten()
        .find(|url| !url.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// The organization-level inputs that shape a plugin's script configuration.
#[derive(Debug, Clone, Copy)]
pub struct PluginTarget<'a> {
    pub org_id: Uuid,
    pub release: &'a PluginRelease,
    pub configurations: &'a BTreeMap<String, String>,
    pub custom_export_url: Option<&'a str>,
}

impl PluginTarget<'_> {
    /// Configuration document for a script with the given override.
    pub fn config_document(&self, script_override: Option<&str>) -> RetentionResult<String> {
        let export_url = effective_export_url(
            self.custom_export_url,
            script_override,
            self.release.default_export_url.as_deref(),
        );
        render_config_document(self.configurations, &export_url)
    }
}

/// A script whose configuration could not be pushed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationFailure {
    pub script_id: Uuid,
    pub reason: String,
}

/// Remote side effects of one request, settled by
/// [`ScriptSynchronizer::finish`].
///
/// `created` scripts are deleted again if the request fails. `retired`
/// scripts are deleted remotely only once the request has committed.
#[derive(Debug, Default)]
pub struct ScriptLedger {
    created: Vec<Uuid>,
    retired: Vec<Uuid>,
}

impl ScriptLedger {
    pub fn created(&self) -> &[Uuid] {
        &self.created
    }
}

#[derive(Clone)]
pub struct ScriptSynchronizer {
    scheduler: Arc<dyn ScriptService>,
}

impl ScriptSynchronizer {
    pub fn new(scheduler: Arc<dyn ScriptService>) -> Self {
        Self { scheduler }
    }

    /// Create a remote script and record it for compensation.
    pub async fn create_remote(
        &self,
        credential: &CallerCredential,
        request: CreateScriptRequest,
        ledger: &mut ScriptLedger,
    ) -> RetentionResult<Uuid> {
        let id = self
            .scheduler
            .create_script(credential, request)
            .await
            .map_err(|e| match e {
                SchedulerError::Unauthorized => RetentionError::Unauthenticated,
                other => RetentionError::Internal(format!("Failed to create script: {other}")),
            })?;
        ledger.created.push(id);
        Ok(id)
    }

    pub async fn update_remote(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
        request: UpdateScriptRequest,
    ) -> RetentionResult<()> {
        self.scheduler
            .update_script(credential, script_id, request)
            .await
            .map_err(|e| match e {
                SchedulerError::Unauthorized => RetentionError::Unauthenticated,
                other => RetentionError::Internal(format!(
                    "Failed to update script {script_id}: {other}"
                )),
            })
    }

    /// Delete a remote script. A script the scheduler no longer knows about
    /// counts as deleted.
    pub async fn delete_remote(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> RetentionResult<()> {
        match self.scheduler.delete_script(credential, script_id).await {
            Ok(()) => Ok(()),
            Err(SchedulerError::NotFound(_)) => {
                tracing::debug!(%script_id, "Scheduled script already gone");
                Ok(())
            }
            Err(SchedulerError::Unauthorized) => Err(RetentionError::Unauthenticated),
            Err(e) => Err(RetentionError::Internal(format!(
                "Failed to delete script {script_id}: {e}"
            ))),
        }
    }

    pub async fn get_remote(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> RetentionResult<CronScript> {
        self.scheduler
            .get_script(credential, script_id)
            .await
            .map_err(|e| match e {
                SchedulerError::NotFound(_) => {
                    RetentionError::NotFound("Scheduled script not found".into())
                }
                other => other.into(),
            })
    }

    pub async fn get_remote_many(
        &self,
        credential: &CallerCredential,
        script_ids: &[Uuid],
    ) -> RetentionResult<Vec<CronScript>> {
        Ok(self.scheduler.get_scripts(credential, script_ids).await?)
    }

    /// Instantiate every preset of the target release for the organization:
    /// one remote script and one local row each. Returns the new script ids.
    pub async fn materialize_presets(
        &self,
        tx: &mut dyn RetentionPluginTx,
        cipher: &dyn FieldCipher,
        credential: &CallerCredential,
        target: &PluginTarget<'_>,
        ledger: &mut ScriptLedger,
    ) -> RetentionResult<Vec<Uuid>> {
        let release = target.release;
        let configs = target.config_document(None)?;

        let mut ids = Vec::with_capacity(release.preset_scripts.len());
        for preset in &release.preset_scripts {
            let script_id = self
                .create_remote(
                    credential,
                    CreateScriptRequest {
                        script: preset.script.clone(),
                        cluster_ids: Vec::new(),
                        configs: configs.clone(),
                        frequency_s: preset.default_frequency_s,
                    },
                    ledger,
                )
                .await?;

            tx.insert_script(
                &RetentionScript {
                    org_id: target.org_id,
                    script_id,
                    plugin_id: release.plugin_id.clone(),
                    script_name: preset.name.clone(),
                    description: preset.description.clone(),
                    is_preset: true,
                    export_url: None,
                },
                cipher,
            )
            .await?;

            tracing::debug!(
                org_id = %target.org_id,
                plugin_id = %release.plugin_id,
                %script_id,
                preset = %preset.name,
                "Created preset retention script"
            );
            ids.push(script_id);
        }

        Ok(ids)
    }

    /// Push a new configuration document to every script of the target
    /// plugin for the organization.
    ///
    /// Individual update failures do not abort the operation; they are logged
    /// and returned so the caller can report them.
    pub async fn propagate_config_change(
        &self,
        tx: &mut dyn RetentionPluginTx,
        cipher: &dyn FieldCipher,
        credential: &CallerCredential,
        target: &PluginTarget<'_>,
    ) -> RetentionResult<Vec<PropagationFailure>> {
        let plugin_id = &target.release.plugin_id;
        let scripts = tx
            .list_org_scripts(target.org_id, plugin_id, cipher)
            .await?;

        let mut failures = Vec::new();
        for script in scripts {
            let configs = target.config_document(script.export_url.as_deref())?;

            if let Err(e) = self
                .scheduler
                .update_script(
                    credential,
                    script.script_id,
                    UpdateScriptRequest::configs_only(configs),
                )
                .await
            {
                tracing::warn!(
                    org_id = %target.org_id,
                    %plugin_id,
                    script_id = %script.script_id,
                    error = %e,
                    "Failed to propagate retention config to script"
                );
                failures.push(PropagationFailure {
                    script_id: script.script_id,
                    reason: e.to_string(),
                });
            }
        }

        Ok(failures)
    }

    /// Delete the plugin's scripts for the organization inside `tx` and mark
    /// them retired in `ledger`. Returns the deleted ids.
    ///
    /// The remote scripts stay live until [`finish`](Self::finish) commits, so
    /// a rollback restores rows that still have their remote counterpart.
    pub async fn retire_scripts(
        &self,
        tx: &mut dyn RetentionPluginTx,
        org_id: Uuid,
        plugin_id: &str,
        preset_only: bool,
        ledger: &mut ScriptLedger,
    ) -> RetentionResult<Vec<Uuid>> {
        let ids = tx.delete_scripts(org_id, plugin_id, preset_only).await?;
        ledger.retired.extend_from_slice(&ids);
        Ok(ids)
    }

    /// Settle a request: commit `tx` if `result` is `Ok`, otherwise roll it
    /// back.
    ///
    /// After a commit, retired scripts are deleted remotely. When nothing was
    /// committed, created scripts are deleted instead and retired ones are
    /// left alone.
    pub async fn finish<T>(
        &self,
        tx: Box<dyn RetentionPluginTx>,
        credential: &CallerCredential,
        ledger: ScriptLedger,
        result: RetentionResult<T>,
    ) -> RetentionResult<T> {
        match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => {
                    self.delete_retired(credential, ledger.retired).await;
                    Ok(value)
                }
                Err(e) => {
                    self.compensate(credential, ledger.created).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back retention transaction");
                }
                self.compensate(credential, ledger.created).await;
                Err(e)
            }
        }
    }

    /// Best-effort remote deletion of scripts whose local rows are gone.
    ///
    /// A failure leaves a scheduled script with no local row, which a later
    /// cleanup can remove by id.
    async fn delete_retired(&self, credential: &CallerCredential, retired: Vec<Uuid>) {
        for script_id in retired {
            if let Err(e) = self.delete_remote(credential, script_id).await {
                tracing::warn!(
                    %script_id,
                    error = %e,
                    "Failed to delete retired scheduled script"
                );
            }
        }
    }

    /// Best-effort deletion of remote scripts created by a failed request.
    pub async fn compensate(&self, credential: &CallerCredential, created: Vec<Uuid>) {
        for script_id in created {
            match self.scheduler.delete_script(credential, script_id).await {
                Ok(()) | Err(SchedulerError::NotFound(_)) => {
                    tracing::debug!(%script_id, "Removed orphaned scheduled script");
                }
                Err(e) => {
                    tracing::warn!(
                        %script_id,
                        error = %e,
                        "Failed to clean up orphaned scheduled script"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::scheduler::memory::InMemoryScriptService;

    #[test]
    fn test_config_document_shape() {
        let configs = BTreeMap::from([
            ("X-Team".to_string(), "core".to_string()),
            ("API_KEY".to_string(), "abc".to_string()),
        ]);
        let doc = render_config_document(&configs, "https://otel.example.com").unwrap();
        assert_eq!(
            doc,
            r#"{"otelEndpointConfig":{"url":"https://otel.example.com","headers":{"API_KEY":"abc","X-Team":"core"}}}"#
        );
    }

    #[test]
    fn test_config_document_is_deterministic() {
        let a = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        let b = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert_eq!(
            render_config_document(&a, "u").unwrap(),
            render_config_document(&b, "u").unwrap()
        );
    }

    #[test]
    fn test_config_document_empty_headers() {
        let doc = render_config_document(&BTreeMap::new(), "").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed["otelEndpointConfig"]["url"], "");
        assert!(
            parsed["otelEndpointConfig"]["headers"]
                .as_object()
                .unwrap()
                .is_empty()
        );
    }

    #[rstest]
    #[case(Some("https://org"), Some("https://script"), Some("https://default"), "https://org")]
    #[case(None, Some("https://script"), Some("https://default"), "https://script")]
    #[case(Some(""), Some("https://script"), Some("https://default"), "https://script")]
    #[case(None, None, Some("https://default"), "https://default")]
    #[case(None, Some(""), Some("https://default"), "https://default")]
    #[case(None, None, None, "")]
    fn test_effective_export_url(
        #[case] org: Option<&str>,
        #[case] script: Option<&str>,
        #[case] default: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(effective_export_url(org, script, default), expected);
    }

    #[tokio::test]
    async fn test_delete_remote_tolerates_missing_script() {
        let scheduler = Arc::new(InMemoryScriptService::new());
        let sync = ScriptSynchronizer::new(scheduler);
        let credential = CallerCredential::new("t");
        sync.delete_remote(&credential, Uuid::new_v4())
            .await
            .expect("missing script counts as deleted");
    }

    #[tokio::test]
    async fn test_delete_remote_surfaces_failures() {
        let scheduler = Arc::new(InMemoryScriptService::new());
        scheduler.fail_deletes(true);
        let sync = ScriptSynchronizer::new(scheduler);
        let result = sync
            .delete_remote(&CallerCredential::new("t"), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(RetentionError::Internal(_))));
    }

    #[tokio::test]
    async fn test_compensate_deletes_created_scripts() {
        let scheduler = Arc::new(InMemoryScriptService::new());
        let sync = ScriptSynchronizer::new(scheduler.clone());
        let credential = CallerCredential::new("t");
        let mut ledger = ScriptLedger::default();

        for _ in 0..2 {
            sync.create_remote(
                &credential,
                CreateScriptRequest {
                    script: "import px".into(),
                    cluster_ids: vec![],
                    configs: "{}".into(),
                    frequency_s: 60,
                },
                &mut ledger,
            )
            .await
            .unwrap();
        }
        assert_eq!(ledger.created().len(), 2);
        assert_eq!(scheduler.script_count(), 2);

        sync.compensate(&credential, ledger.created).await;
        assert_eq!(scheduler.script_count(), 0);
    }
}
