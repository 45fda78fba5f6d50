use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::{
    error::{RetentionError, RetentionResult},
    script_sync::{PluginTarget, PropagationFailure, ScriptLedger, ScriptSynchronizer},
};
use crate::{
    crypto::FieldCipher,
    db::{DbPool, RetentionPluginTx},
    models::{
        EnabledPlugin, OrgPluginConfig, PluginKind, PluginRelease, PluginSummary,
        RetentionReleaseConfig, UpdateOrgPluginConfig,
    },
    scheduler::CallerCredential,
};

/// The state change an update request resolves to for one
/// `(org_id, plugin_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Disabled to enabled at `version`.
    Enable { version: String },
    /// Enabled at `version` to disabled.
    Disable { version: String },
    /// Disable requested for a plugin that is not enabled.
    AlreadyDisabled,
    /// Configuration change with the version unchanged.
    UpdateConfig { version: String },
    /// Configuration change and move to another release.
    Upgrade { from: String, to: String },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Enable { .. } => "enable",
            Transition::Disable { .. } => "disable",
            Transition::AlreadyDisabled => "already_disabled",
            Transition::UpdateConfig { .. } => "update_config",
            Transition::Upgrade { .. } => "upgrade",
        }
    }
}

/// Result of a successful configuration update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub transition: Transition,
    /// Preset scripts created by an enable or upgrade.
    pub created_scripts: Vec<Uuid>,
    /// Scripts removed by a disable or upgrade.
    pub deleted_scripts: Vec<Uuid>,
    /// Scripts that kept their previous configuration because the scheduler
    /// rejected the update. The request still succeeded.
    pub propagation_failures: Vec<PropagationFailure>,
}

impl UpdateOutcome {
    fn new(transition: Transition) -> Self {
        Self {
            transition,
            created_scripts: Vec::new(),
            deleted_scripts: Vec::new(),
            propagation_failures: Vec::new(),
        }
    }
}

fn validate_target(org_id: Uuid, plugin_id: &str) -> RetentionResult<()> {
    if org_id.is_nil() {
        return Err(RetentionError::InvalidArgument("Must specify OrgID".into()));
    }
    if plugin_id.is_empty() {
        return Err(RetentionError::InvalidArgument(
            "Must specify plugin ID".into(),
        ));
    }
    Ok(())
}

fn requested_version(request: &UpdateOrgPluginConfig) -> Option<&str> {
    request.version.as_deref().filter(|v| !v.is_empty())
}

/// Decide which transition a request makes from the current state.
///
/// `enabled: Some(true)` on an already-enabled plugin is treated as an update.
pub fn plan_transition(
    current: Option<&OrgPluginConfig>,
    request: &UpdateOrgPluginConfig,
) -> RetentionResult<Transition> {
    match (current, request.enabled) {
        (None, Some(false)) => Ok(Transition::AlreadyDisabled),
        (Some(config), Some(false)) => Ok(Transition::Disable {
            version: config.version.clone(),
        }),
        (None, Some(true)) => requested_version(request)
            .map(|version| Transition::Enable {
                version: version.to_string(),
            })
            .ok_or_else(|| {
                RetentionError::InvalidArgument(
                    "Must specify plugin version when enabling".into(),
                )
            }),
        (None, None) => Err(RetentionError::NotFound("plugin is not enabled".into())),
        (Some(config), _) => Ok(match requested_version(request) {
            Some(version) if version != config.version => Transition::Upgrade {
                from: config.version.clone(),
                to: version.to_string(),
            },
            _ => Transition::UpdateConfig {
                version: config.version.clone(),
            },
        }),
    }
}

/// Apply a request on top of the stored configuration.
fn merge_config(
    current: OrgPluginConfig,
    request: UpdateOrgPluginConfig,
    version: String,
) -> OrgPluginConfig {
    OrgPluginConfig {
        version,
        configurations: request.configurations.unwrap_or(current.configurations),
        custom_export_url: match request.custom_export_url {
            Some(url) if url.is_empty() => None,
            Some(url) => Some(url),
            None => current.custom_export_url,
        },
        ..current
    }
}

fn check_custom_export_url(
    release: &PluginRelease,
    custom_export_url: Option<&str>,
) -> RetentionResult<()> {
    match custom_export_url {
        Some(url) if !url.is_empty() && !release.allow_custom_export_url => {
            Err(RetentionError::InvalidArgument(format!(
                "Plugin {}@{} does not allow a custom export URL",
                release.plugin_id, release.version
            )))
        }
        _ => Ok(()),
    }
}

/// Fetch a release that can back a retention configuration.
pub(super) async fn retention_release(
    tx: &mut dyn RetentionPluginTx,
    plugin_id: &str,
    version: &str,
) -> RetentionResult<PluginRelease> {
    let release = tx.get_release(plugin_id, version).await?.ok_or_else(|| {
        RetentionError::NotFound(format!("Plugin release {plugin_id}@{version} not found"))
    })?;
    if !release.retention_enabled {
        return Err(RetentionError::InvalidArgument(format!(
            "Plugin {plugin_id}@{version} does not support data retention"
        )));
    }
    Ok(release)
}

/// Service layer for the retention plugin catalog and per-organization
/// enablement.
///
/// Enable, disable and update run as one database transaction plus a
/// sequence of scheduler calls. See [`ScriptSynchronizer`] for how the two
/// are kept consistent.
#[derive(Clone)]
pub struct RetentionPluginService {
    db: Arc<DbPool>,
    sync: ScriptSynchronizer,
    cipher: Arc<dyn FieldCipher>,
}

impl RetentionPluginService {
    pub fn new(db: Arc<DbPool>, sync: ScriptSynchronizer, cipher: Arc<dyn FieldCipher>) -> Self {
        Self { db, sync, cipher }
    }

    /// Latest release of every plugin.
    pub async fn list_plugins(&self, kind: PluginKind) -> RetentionResult<Vec<PluginSummary>> {
        Ok(self.db.retention_plugins().list_latest_releases(kind).await?)
    }

    /// Retention settings of one release.
    pub async fn get_release_config(
        &self,
        plugin_id: &str,
        version: &str,
    ) -> RetentionResult<RetentionReleaseConfig> {
        match self
            .db
            .retention_plugins()
            .get_release(plugin_id, version)
            .await?
        {
            Some(release) if release.retention_enabled => Ok(release.into()),
            _ => Err(RetentionError::NotFound("plugin not found".into())),
        }
    }

    /// Publish a release to the catalog.
    pub async fn publish_release(&self, release: &PluginRelease) -> RetentionResult<()> {
        if release.plugin_id.is_empty() || release.version.is_empty() {
            return Err(RetentionError::InvalidArgument(
                "Release must have a plugin ID and version".into(),
            ));
        }
        if let Some(preset) = release
            .preset_scripts
            .iter()
            .find(|p| p.default_frequency_s < 1)
        {
            return Err(RetentionError::InvalidArgument(format!(
                "Preset script '{}' must have a positive frequency",
                preset.name
            )));
        }

        self.db.retention_plugins().create_release(release).await?;
        tracing::info!(
            plugin_id = %release.plugin_id,
            version = %release.version,
            presets = release.preset_scripts.len(),
            "Published plugin release"
        );
        Ok(())
    }

    pub async fn list_enabled_for_org(&self, org_id: Uuid) -> RetentionResult<Vec<EnabledPlugin>> {
        if org_id.is_nil() {
            return Err(RetentionError::InvalidArgument("Must specify OrgID".into()));
        }
        Ok(self.db.retention_plugins().list_enabled_for_org(org_id).await?)
    }

    /// The organization's decrypted configuration for a plugin.
    pub async fn get_org_config(
        &self,
        org_id: Uuid,
        plugin_id: &str,
    ) -> RetentionResult<OrgPluginConfig> {
        validate_target(org_id, plugin_id)?;
        self.db
            .retention_plugins()
            .get_org_config(org_id, plugin_id, self.cipher.as_ref())
            .await?
            .ok_or_else(|| RetentionError::NotFound("plugin is not enabled".into()))
    }

    /// Enable, disable, reconfigure or upgrade a plugin for an organization.
    ///
    /// On error the local state is rolled back and remote scripts created by
    /// this request are deleted. Configuration pushes that already happened
    /// are not undone. Scripts removed by a disable or upgrade are deleted
    /// remotely only after the commit.
    pub async fn update_org_config(
        &self,
        credential: &CallerCredential,
        org_id: Uuid,
        plugin_id: &str,
        request: UpdateOrgPluginConfig,
    ) -> RetentionResult<UpdateOutcome> {
        validate_target(org_id, plugin_id)?;
        if request.enabled == Some(true) && requested_version(&request).is_none() {
            return Err(RetentionError::InvalidArgument(
                "Must specify plugin version when enabling".into(),
            ));
        }

        let mut tx = self.db.retention_plugins().begin().await?;
        let mut ledger = ScriptLedger::default();
        let result = self
            .apply(
                tx.as_mut(),
                credential,
                org_id,
                plugin_id,
                request,
                &mut ledger,
            )
            .await;
        let outcome = self.sync.finish(tx, credential, ledger, result).await?;

        tracing::info!(
            %org_id,
            %plugin_id,
            transition = outcome.transition.name(),
            created = outcome.created_scripts.len(),
            deleted = outcome.deleted_scripts.len(),
            propagation_failures = outcome.propagation_failures.len(),
            "Updated retention plugin config"
        );
        Ok(outcome)
    }

    async fn apply(
        &self,
        tx: &mut dyn RetentionPluginTx,
        credential: &CallerCredential,
        org_id: Uuid,
        plugin_id: &str,
        request: UpdateOrgPluginConfig,
        ledger: &mut ScriptLedger,
    ) -> RetentionResult<UpdateOutcome> {
        let cipher = self.cipher.as_ref();
        let current = tx.get_org_config(org_id, plugin_id, cipher).await?;
        let transition = plan_transition(current.as_ref(), &request)?;
        let mut outcome = UpdateOutcome::new(transition.clone());

        match transition {
            Transition::AlreadyDisabled => {}
            Transition::Enable { version } => {
                let release = retention_release(tx, plugin_id, &version).await?;
                let config = OrgPluginConfig {
                    org_id,
                    plugin_id: plugin_id.to_string(),
                    version,
                    configurations: request.configurations.unwrap_or_default(),
                    custom_export_url: request.custom_export_url.filter(|url| !url.is_empty()),
                };
                check_custom_export_url(&release, config.custom_export_url.as_deref())?;

                tx.put_org_config(&config, cipher).await?;
                let target = PluginTarget {
                    org_id,
                    release: &release,
                    configurations: &config.configurations,
                    custom_export_url: config.custom_export_url.as_deref(),
                };
                outcome.created_scripts = self
                    .sync
                    .materialize_presets(tx, cipher, credential, &target, ledger)
                    .await?;
            }
            Transition::Disable { .. } => {
                outcome.deleted_scripts = self
                    .sync
                    .retire_scripts(tx, org_id, plugin_id, false, ledger)
                    .await?;
                tx.delete_org_config(org_id, plugin_id).await?;
            }
            Transition::UpdateConfig { version } | Transition::Upgrade { to: version, .. } => {
                let current = current
                    .ok_or_else(|| RetentionError::NotFound("plugin is not enabled".into()))?;
                let upgrading = version != current.version;
                let release = retention_release(tx, plugin_id, &version).await?;
                let updated = merge_config(current, request, version);
                check_custom_export_url(&release, updated.custom_export_url.as_deref())?;

                // Old presets are retired before propagation so they get no push
                if upgrading {
                    outcome.deleted_scripts = self
                        .sync
                        .retire_scripts(tx, org_id, plugin_id, true, ledger)
                        .await?;
                }

                let target = PluginTarget {
                    org_id,
                    release: &release,
                    configurations: &updated.configurations,
                    custom_export_url: updated.custom_export_url.as_deref(),
                };
                outcome.propagation_failures = self
                    .sync
                    .propagate_config_change(tx, cipher, credential, &target)
                    .await?;
                tx.put_org_config(&updated, cipher).await?;

                if upgrading {
                    outcome.created_scripts = self
                        .sync
                        .materialize_presets(tx, cipher, credential, &target, ledger)
                        .await?;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod plan_tests {
    use std::collections::BTreeMap;

    use super::*;

    fn enabled_at(version: &str) -> OrgPluginConfig {
        OrgPluginConfig {
            org_id: Uuid::new_v4(),
            plugin_id: "otel".into(),
            version: version.into(),
            configurations: BTreeMap::from([("API_KEY".into(), "old".into())]),
            custom_export_url: Some("https://custom.example.com".into()),
        }
    }

    fn request(enabled: Option<bool>, version: Option<&str>) -> UpdateOrgPluginConfig {
        UpdateOrgPluginConfig {
            enabled,
            version: version.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_plugin_transitions() {
        assert_eq!(
            plan_transition(None, &request(Some(true), Some("1.0.0"))).unwrap(),
            Transition::Enable {
                version: "1.0.0".into()
            }
        );
        assert_eq!(
            plan_transition(None, &request(Some(false), None)).unwrap(),
            Transition::AlreadyDisabled
        );
        assert!(matches!(
            plan_transition(None, &request(Some(true), None)),
            Err(RetentionError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan_transition(None, &request(Some(true), Some(""))),
            Err(RetentionError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan_transition(None, &request(None, Some("1.0.0"))),
            Err(RetentionError::NotFound(_))
        ));
    }

    #[test]
    fn test_enabled_plugin_transitions() {
        let current = enabled_at("1.0.0");
        assert_eq!(
            plan_transition(Some(&current), &request(Some(false), None)).unwrap(),
            Transition::Disable {
                version: "1.0.0".into()
            }
        );
        assert_eq!(
            plan_transition(Some(&current), &request(None, None)).unwrap(),
            Transition::UpdateConfig {
                version: "1.0.0".into()
            }
        );
        assert_eq!(
            plan_transition(Some(&current), &request(Some(true), Some("1.0.0"))).unwrap(),
            Transition::UpdateConfig {
                version: "1.0.0".into()
            }
        );
        assert_eq!(
            plan_transition(Some(&current), &request(None, Some("2.0.0"))).unwrap(),
            Transition::Upgrade {
                from: "1.0.0".into(),
                to: "2.0.0".into()
            }
        );
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let current = enabled_at("1.0.0");
        let merged = merge_config(current.clone(), request(None, None), "1.0.0".into());
        assert_eq!(merged, current);
    }

    #[test]
    fn test_merge_replaces_and_clears() {
        let merged = merge_config(
            enabled_at("1.0.0"),
            UpdateOrgPluginConfig {
                configurations: Some(BTreeMap::new()),
                custom_export_url: Some(String::new()),
                ..Default::default()
            },
            "2.0.0".into(),
        );
        assert_eq!(merged.version, "2.0.0");
        assert!(merged.configurations.is_empty());
        assert_eq!(merged.custom_export_url, None);
    }
}
