use std::{collections::HashMap, sync::Arc};

use uuid::Uuid;

use super::{
    error::{RetentionError, RetentionResult},
    retention_plugins::retention_release,
    script_sync::{PluginTarget, ScriptLedger, ScriptSynchronizer, effective_export_url},
};
use crate::{
    crypto::FieldCipher,
    db::{DbPool, RetentionPluginTx},
    models::{
        CreateRetentionScript, DetailedRetentionScript, RetentionScript, RetentionScriptView,
        UpdateRetentionScript,
    },
    scheduler::{CallerCredential, CreateScriptRequest, UpdateScriptRequest},
};

fn script_not_found() -> RetentionError {
    RetentionError::NotFound("script not found".into())
}

/// Service layer for retention scripts, both preset and custom.
///
/// Script metadata is stored locally. Body, schedule and target clusters are
/// owned by the scheduler and merged in on read.
#[derive(Clone)]
pub struct RetentionScriptService {
    db: Arc<DbPool>,
    sync: ScriptSynchronizer,
    cipher: Arc<dyn FieldCipher>,
}

impl RetentionScriptService {
    pub fn new(db: Arc<DbPool>, sync: ScriptSynchronizer, cipher: Arc<dyn FieldCipher>) -> Self {
        Self { db, sync, cipher }
    }

    /// Scripts of every plugin enabled for the organization, with their
    /// schedules.
    ///
    /// Scripts the scheduler does not return are listed as disabled with no
    /// schedule.
    pub async fn list_scripts(
        &self,
        credential: &CallerCredential,
        org_id: Uuid,
    ) -> RetentionResult<Vec<RetentionScriptView>> {
        let scripts = self
            .db
            .retention_plugins()
            .list_scripts_for_org(org_id, self.cipher.as_ref())
            .await?;
        if scripts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = scripts.iter().map(|s| s.script_id).collect();
        let mut remote: HashMap<Uuid, _> = self
            .sync
            .get_remote_many(credential, &ids)
            .await?
            .into_iter()
            .map(|cron| (cron.id, cron))
            .collect();

        Ok(scripts
            .into_iter()
            .map(|script| match remote.remove(&script.script_id) {
                Some(cron) => RetentionScriptView {
                    script,
                    frequency_s: cron.frequency_s,
                    enabled: cron.enabled,
                    cluster_ids: cron.cluster_ids,
                },
                None => {
                    tracing::debug!(script_id = %script.script_id, "No scheduled script for retention script");
                    RetentionScriptView {
                        script,
                        frequency_s: 0,
                        enabled: false,
                        cluster_ids: Vec::new(),
                    }
                }
            })
            .collect())
    }

    /// One script with its body and the export URL it currently resolves to.
    pub async fn get_script(
        &self,
        credential: &CallerCredential,
        org_id: Uuid,
        script_id: Uuid,
    ) -> RetentionResult<DetailedRetentionScript> {
        let repo = self.db.retention_plugins();
        let script = repo
            .get_script(org_id, script_id, self.cipher.as_ref())
            .await?
            .ok_or_else(script_not_found)?;

        let config = repo
            .get_org_config(org_id, &script.plugin_id, self.cipher.as_ref())
            .await?;
        let release = match &config {
            Some(config) => repo.get_release(&script.plugin_id, &config.version).await?,
            None => None,
        };
        let effective = effective_export_url(
            config.as_ref().and_then(|c| c.custom_export_url.as_deref()),
            script.export_url.as_deref(),
            release.as_ref().and_then(|r| r.default_export_url.as_deref()),
        );

        let cron = self.sync.get_remote(credential, script_id).await?;
        Ok(DetailedRetentionScript {
            view: RetentionScriptView {
                script,
                frequency_s: cron.frequency_s,
                enabled: cron.enabled,
                cluster_ids: cron.cluster_ids,
            },
            contents: cron.script,
            effective_export_url: effective,
        })
    }

    /// Create a custom script for an enabled plugin.
    ///
    /// The scheduler assigns the script id. If the local insert fails, the
    /// remote script is deleted again.
    pub async fn create_script(
        &self,
        credential: &CallerCredential,
        org_id: Uuid,
        input: CreateRetentionScript,
    ) -> RetentionResult<RetentionScriptView> {
        if org_id.is_nil() {
            return Err(RetentionError::InvalidArgument("Must specify OrgID".into()));
        }

        let mut tx = self.db.retention_plugins().begin().await?;
        let mut ledger = ScriptLedger::default();
        let result = self
            .create_in_tx(tx.as_mut(), credential, org_id, input, &mut ledger)
            .await;
        let view = self.sync.finish(tx, credential, ledger, result).await?;

        tracing::info!(
            %org_id,
            plugin_id = %view.script.plugin_id,
            script_id = %view.script.script_id,
            "Created retention script"
        );
        Ok(view)
    }

    async fn create_in_tx(
        &self,
        tx: &mut dyn RetentionPluginTx,
        credential: &CallerCredential,
        org_id: Uuid,
        input: CreateRetentionScript,
        ledger: &mut ScriptLedger,
    ) -> RetentionResult<RetentionScriptView> {
        let cipher = self.cipher.as_ref();
        let config = tx
            .get_org_config(org_id, &input.plugin_id, cipher)
            .await?
            .ok_or_else(|| RetentionError::NotFound("plugin is not enabled".into()))?;
        let release = retention_release(tx, &input.plugin_id, &config.version).await?;

        let export_url = input.export_url.filter(|url| !url.is_empty());
        if export_url.is_some() && !release.allow_custom_export_url {
            return Err(RetentionError::InvalidArgument(format!(
                "Plugin {}@{} does not allow a custom export URL",
                release.plugin_id, release.version
            )));
        }

        let target = PluginTarget {
            org_id,
            release: &release,
            configurations: &config.configurations,
            custom_export_url: config.custom_export_url.as_deref(),
        };
        let configs = target.config_document(export_url.as_deref())?;

        let script_id = self
            .sync
            .create_remote(
                credential,
                CreateScriptRequest {
                    script: input.contents,
                    cluster_ids: input.cluster_ids.clone(),
                    configs,
                    frequency_s: input.frequency_s,
                },
                ledger,
            )
            .await?;

        let script = RetentionScript {
            org_id,
            script_id,
            plugin_id: input.plugin_id,
            script_name: input.script_name,
            description: input.description,
            is_preset: false,
            export_url,
        };
        tx.insert_script(&script, cipher).await?;

        Ok(RetentionScriptView {
            script,
            frequency_s: input.frequency_s,
            enabled: true,
            cluster_ids: input.cluster_ids,
        })
    }

    /// Update a script owned by the caller's organization.
    ///
    /// Preset scripts accept schedule changes only. The remote script always
    /// receives a freshly rendered configuration document.
    pub async fn update_script(
        &self,
        credential: &CallerCredential,
        caller_org_id: Uuid,
        script_id: Uuid,
        input: UpdateRetentionScript,
    ) -> RetentionResult<RetentionScript> {
        let mut tx = self.db.retention_plugins().begin().await?;
        let result = self
            .update_in_tx(tx.as_mut(), credential, caller_org_id, script_id, input)
            .await;
        let script = self
            .sync
            .finish(tx, credential, ScriptLedger::default(), result)
            .await?;

        tracing::info!(org_id = %caller_org_id, %script_id, "Updated retention script");
        Ok(script)
    }

    async fn update_in_tx(
        &self,
        tx: &mut dyn RetentionPluginTx,
        credential: &CallerCredential,
        caller_org_id: Uuid,
        script_id: Uuid,
        input: UpdateRetentionScript,
    ) -> RetentionResult<RetentionScript> {
        let cipher = self.cipher.as_ref();
        let current = tx
            .get_script(script_id, cipher)
            .await?
            .ok_or_else(script_not_found)?;

        if current.org_id != caller_org_id {
            return Err(RetentionError::Unauthorized(
                "Script belongs to another organization".into(),
            ));
        }
        if current.is_preset && input.changes_metadata() {
            return Err(RetentionError::InvalidArgument(
                "Preset scripts only allow changes to contents, schedule and clusters".into(),
            ));
        }

        let config = tx
            .get_org_config(current.org_id, &current.plugin_id, cipher)
            .await?
            .ok_or_else(|| RetentionError::NotFound("plugin is not enabled".into()))?;
        let release = retention_release(tx, &current.plugin_id, &config.version).await?;

        let export_url = match input.export_url {
            Some(url) if url.is_empty() => None,
            Some(url) => {
                if !release.allow_custom_export_url {
                    return Err(RetentionError::InvalidArgument(format!(
                        "Plugin {}@{} does not allow a custom export URL",
                        release.plugin_id, release.version
                    )));
                }
                Some(url)
            }
            None => current.export_url,
        };
        let updated = RetentionScript {
            script_name: input.script_name.unwrap_or(current.script_name),
            description: input.description.unwrap_or(current.description),
            export_url,
            ..current
        };
        tx.update_script(&updated, cipher).await?;

        let target = PluginTarget {
            org_id: updated.org_id,
            release: &release,
            configurations: &config.configurations,
            custom_export_url: config.custom_export_url.as_deref(),
        };
        self.sync
            .update_remote(
                credential,
                script_id,
                UpdateScriptRequest {
                    script: input.contents,
                    cluster_ids: input.cluster_ids,
                    configs: Some(target.config_document(updated.export_url.as_deref())?),
                    enabled: input.enabled,
                    frequency_s: input.frequency_s,
                },
            )
            .await?;

        Ok(updated)
    }

    /// Delete a custom script. Preset scripts are removed only by disabling
    /// or upgrading their plugin.
    pub async fn delete_script(
        &self,
        credential: &CallerCredential,
        org_id: Uuid,
        script_id: Uuid,
    ) -> RetentionResult<()> {
        let mut tx = self.db.retention_plugins().begin().await?;
        let result = self
            .delete_in_tx(tx.as_mut(), credential, org_id, script_id)
            .await;
        self.sync
            .finish(tx, credential, ScriptLedger::default(), result)
            .await?;

        tracing::info!(%org_id, %script_id, "Deleted retention script");
        Ok(())
    }

    async fn delete_in_tx(
        &self,
        tx: &mut dyn RetentionPluginTx,
        credential: &CallerCredential,
        org_id: Uuid,
        script_id: Uuid,
    ) -> RetentionResult<()> {
        if !tx.delete_custom_script(org_id, script_id).await? {
            return match tx.get_script(script_id, self.cipher.as_ref()).await? {
                Some(script) if script.is_preset && script.org_id == org_id => {
                    Err(RetentionError::InvalidArgument(
                        "Preset scripts cannot be deleted".into(),
                    ))
                }
                _ => Err(script_not_found()),
            };
        }
        self.sync.delete_remote(credential, script_id).await
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        crypto::{AesGcmCipher, testing::test_key},
        db::tests::harness::{create_sqlite_db, retention_release},
        models::UpdateOrgPluginConfig,
        scheduler::memory::InMemoryScriptService,
        services::RetentionPluginService,
    };

    const PLUGIN: &str = "otel";

    struct Fixture {
        scripts: RetentionScriptService,
        plugins: RetentionPluginService,
        scheduler: Arc<InMemoryScriptService>,
        credential: CallerCredential,
        org_id: Uuid,
        preset_id: Uuid,
    }

    impl Fixture {
        /// Plugin enabled at 1.0.0 with one preset script.
        async fn new() -> Self {
            let db = Arc::new(create_sqlite_db().await);
            let scheduler = Arc::new(InMemoryScriptService::new());
            let cipher: Arc<dyn FieldCipher> = Arc::new(AesGcmCipher::new(test_key()));
            let sync = ScriptSynchronizer::new(scheduler.clone());
            let plugins = RetentionPluginService::new(db.clone(), sync.clone(), cipher.clone());
            let scripts = RetentionScriptService::new(db, sync, cipher);

            plugins
                .publish_release(&retention_release(PLUGIN, "1.0.0"))
                .await
                .unwrap();
            let credential = CallerCredential::new("user-token");
            let org_id = Uuid::new_v4();
            let outcome = plugins
                .update_org_config(
                    &credential,
                    org_id,
                    PLUGIN,
                    UpdateOrgPluginConfig {
                        enabled: Some(true),
                        version: Some("1.0.0".into()),
                        configurations: Some(BTreeMap::from([(
                            "API_KEY".into(),
                            "secret".into(),
                        )])),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            Self {
                scripts,
                plugins,
                scheduler,
                credential,
                org_id,
                preset_id: outcome.created_scripts[0],
            }
        }

        fn create_input(&self, name: &str) -> CreateRetentionScript {
            CreateRetentionScript {
                plugin_id: PLUGIN.into(),
                script_name: name.into(),
                description: "custom export".into(),
                contents: "import px\npx.display(px.DataFrame('http_events'))".into(),
                cluster_ids: vec![Uuid::new_v4()],
                frequency_s: 300,
                export_url: None,
            }
        }

        async fn create(&self, input: CreateRetentionScript) -> RetentionResult<RetentionScriptView> {
            self.scripts
                .create_script(&self.credential, self.org_id, input)
                .await
        }

        fn remote_url(&self, script_id: Uuid) -> String {
            let configs = self.scheduler.script(script_id).unwrap().configs;
            let doc: serde_json::Value = serde_json::from_str(&configs).unwrap();
            doc["otelEndpointConfig"]["url"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn test_create_and_list_scripts() {
        let f = Fixture::new().await;
        let input = f.create_input("http");
        let clusters = input.cluster_ids.clone();
        let view = f.create(input).await.unwrap();
        assert!(!view.script.is_preset);
        assert_eq!(view.frequency_s, 300);

        let remote = f.scheduler.script(view.script.script_id).unwrap();
        assert_eq!(remote.cluster_ids, clusters);
        assert_eq!(f.remote_url(view.script.script_id), "https://otel.example.com/1.0.0");

        let listed = f
            .scripts
            .list_scripts(&f.credential, f.org_id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        let custom = listed
            .iter()
            .find(|s| s.script.script_id == view.script.script_id)
            .unwrap();
        assert_eq!(custom.frequency_s, 300);
        assert!(custom.enabled);
        assert_eq!(custom.cluster_ids, clusters);
        assert!(listed.iter().any(|s| s.script.script_id == f.preset_id && s.script.is_preset));
    }

    #[tokio::test]
    async fn test_list_scripts_missing_remote_is_disabled() {
        let f = Fixture::new().await;
        f.scheduler.remove(f.preset_id);

        let listed = f
            .scripts
            .list_scripts(&f.credential, f.org_id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].enabled);
        assert_eq!(listed[0].frequency_s, 0);
    }

    #[tokio::test]
    async fn test_list_scripts_for_org_without_scripts_skips_scheduler() {
        let f = Fixture::new().await;
        let before = f.scheduler.credentials_seen().len();
        let listed = f
            .scripts
            .list_scripts(&f.credential, Uuid::new_v4())
            .await
            .unwrap();
        assert!(listed.is_empty());
        assert_eq!(f.scheduler.credentials_seen().len(), before);
    }

    #[tokio::test]
    async fn test_create_requires_enabled_plugin() {
        let f = Fixture::new().await;
        let mut input = f.create_input("http");
        input.plugin_id = "other".into();

        let result = f.create(input).await;
        assert!(matches!(result, Err(RetentionError::NotFound(msg)) if msg == "plugin is not enabled"));
        assert_eq!(f.scheduler.script_count(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_nothing_behind() {
        let f = Fixture::new().await;
        f.scheduler.fail_creates_after(0);

        let result = f.create(f.create_input("http")).await;
        assert!(matches!(result, Err(RetentionError::Internal(_))));
        assert_eq!(f.scheduler.script_count(), 1);
        let listed = f
            .scripts
            .list_scripts(&f.credential, f.org_id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_get_script_resolves_effective_url() {
        let f = Fixture::new().await;
        let mut input = f.create_input("http");
        input.export_url = Some("https://script.example.com".into());
        let id = f.create(input).await.unwrap().script.script_id;

        let detail = f
            .scripts
            .get_script(&f.credential, f.org_id, id)
            .await
            .unwrap();
        assert_eq!(detail.effective_export_url, "https://script.example.com");
        assert_eq!(
            detail.view.script.export_url.as_deref(),
            Some("https://script.example.com")
        );
        assert!(detail.contents.starts_with("import px"));
        assert_eq!(f.remote_url(id), "https://script.example.com");

        // Organization override takes precedence over the script's own
        f.plugins
            .update_org_config(
                &f.credential,
                f.org_id,
                PLUGIN,
                UpdateOrgPluginConfig {
                    custom_export_url: Some("https://org.example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let detail = f
            .scripts
            .get_script(&f.credential, f.org_id, id)
            .await
            .unwrap();
        assert_eq!(detail.effective_export_url, "https://org.example.com");
        assert_eq!(f.remote_url(id), "https://org.example.com");
    }

    #[tokio::test]
    async fn test_get_script_of_other_org_is_not_found() {
        let f = Fixture::new().await;
        let result = f
            .scripts
            .get_script(&f.credential, Uuid::new_v4(), f.preset_id)
            .await;
        assert!(matches!(result, Err(RetentionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_custom_script() {
        let f = Fixture::new().await;
        let id = f.create(f.create_input("http")).await.unwrap().script.script_id;

        let updated = f
            .scripts
            .update_script(
                &f.credential,
                f.org_id,
                id,
                UpdateRetentionScript {
                    script_name: Some("renamed".into()),
                    export_url: Some("https://script.example.com".into()),
                    frequency_s: Some(900),
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.script_name, "renamed");
        assert_eq!(updated.description, "custom export");

        let remote = f.scheduler.script(id).unwrap();
        assert_eq!(remote.frequency_s, 900);
        assert!(!remote.enabled);
        assert_eq!(f.remote_url(id), "https://script.example.com");

        // Clearing the override falls back to the release default
        f.scripts
            .update_script(
                &f.credential,
                f.org_id,
                id,
                UpdateRetentionScript {
                    export_url: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(f.remote_url(id), "https://otel.example.com/1.0.0");
    }

    #[tokio::test]
    async fn test_update_preset_allows_schedule_only() {
        let f = Fixture::new().await;

        let result = f
            .scripts
            .update_script(
                &f.credential,
                f.org_id,
                f.preset_id,
                UpdateRetentionScript {
                    script_name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RetentionError::InvalidArgument(_))));

        f.scripts
            .update_script(
                &f.credential,
                f.org_id,
                f.preset_id,
                UpdateRetentionScript {
                    frequency_s: Some(30),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(f.scheduler.script(f.preset_id).unwrap().frequency_s, 30);
    }

    #[tokio::test]
    async fn test_update_script_of_other_org_is_unauthorized() {
        let f = Fixture::new().await;
        let result = f
            .scripts
            .update_script(
                &f.credential,
                Uuid::new_v4(),
                f.preset_id,
                UpdateRetentionScript {
                    frequency_s: Some(30),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RetentionError::Unauthorized(_))));
        assert_eq!(f.scheduler.script(f.preset_id).unwrap().frequency_s, 60);
    }

    #[tokio::test]
    async fn test_failed_remote_update_rolls_back_local_change() {
        let f = Fixture::new().await;
        let id = f.create(f.create_input("http")).await.unwrap().script.script_id;
        f.scheduler.fail_updates_for(id);

        let result = f
            .scripts
            .update_script(
                &f.credential,
                f.org_id,
                id,
                UpdateRetentionScript {
                    script_name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RetentionError::Internal(_))));

        let detail = f
            .scripts
            .get_script(&f.credential, f.org_id, id)
            .await
            .unwrap();
        assert_eq!(detail.view.script.script_name, "http");
    }

    #[tokio::test]
    async fn test_update_missing_script_is_not_found() {
        let f = Fixture::new().await;
        let result = f
            .scripts
            .update_script(
                &f.credential,
                f.org_id,
                Uuid::new_v4(),
                UpdateRetentionScript::default(),
            )
            .await;
        assert!(matches!(result, Err(RetentionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_custom_script() {
        let f = Fixture::new().await;
        let id = f.create(f.create_input("http")).await.unwrap().script.script_id;

        f.scripts
            .delete_script(&f.credential, f.org_id, id)
            .await
            .unwrap();
        assert!(f.scheduler.script(id).is_none());
        assert!(matches!(
            f.scripts.get_script(&f.credential, f.org_id, id).await,
            Err(RetentionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_preset_is_rejected() {
        let f = Fixture::new().await;

        let result = f
            .scripts
            .delete_script(&f.credential, f.org_id, f.preset_id)
            .await;
        assert!(matches!(result, Err(RetentionError::InvalidArgument(_))));

        let result = f
            .scripts
            .delete_script(&f.credential, Uuid::new_v4(), f.preset_id)
            .await;
        assert!(result.is_err());
        assert!(f.scheduler.script(f.preset_id).is_some());
    }

    #[tokio::test]
    async fn test_delete_script_of_other_org_is_rejected() {
        let f = Fixture::new().await;
        let id = f.create(f.create_input("http")).await.unwrap().script.script_id;

        let result = f
            .scripts
            .delete_script(&f.credential, Uuid::new_v4(), id)
            .await;
        assert!(matches!(result, Err(RetentionError::NotFound(_))));
        assert!(f.scheduler.script(id).is_some());
        assert!(
            f.scripts
                .get_script(&f.credential, f.org_id, id)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_failed_remote_delete_keeps_local_row() {
        let f = Fixture::new().await;
        let id = f.create(f.create_input("http")).await.unwrap().script.script_id;
        f.scheduler.fail_deletes(true);

        let result = f.scripts.delete_script(&f.credential, f.org_id, id).await;
        assert!(matches!(result, Err(RetentionError::Internal(_))));
        f.scheduler.fail_deletes(false);
        assert!(
            f.scripts
                .get_script(&f.credential, f.org_id, id)
                .await
                .is_ok()
        );
    }
}
