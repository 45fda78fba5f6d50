use std::{cmp::Ordering, collections::BTreeMap};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    crypto::FieldCipher,
    db::error::DbResult,
    models::{
        EnabledPlugin, OrgPluginConfig, PluginKind, PluginRelease, PluginSummary, RetentionScript,
        compare_versions,
    },
};

/// Repository for plugin releases, per-organization retention plugin
/// configurations, and retention script metadata.
///
/// Reads that only need a consistent snapshot of a single table go through the
/// repository directly. Anything that participates in a state transition goes
/// through a [`RetentionPluginTx`] obtained from [`begin`](Self::begin).
///
/// Methods that read or write encrypted columns take the cipher explicitly.
#[async_trait]
pub trait RetentionPluginRepo: Send + Sync {
    /// Open a transaction. Dropping the returned handle without calling
    /// [`RetentionPluginTx::commit`] rolls it back.
    async fn begin(&self) -> DbResult<Box<dyn RetentionPluginTx>>;

    /// Publish a plugin release.
    ///
    /// # Errors
    /// Returns `DbError::Conflict` if `(plugin_id, version)` already exists.
    async fn create_release(&self, release: &PluginRelease) -> DbResult<()>;

    /// Latest release of every plugin, ordered by plugin id.
    ///
    /// "Latest" is the highest version by [`compare_versions`](crate::models::compare_versions).
    /// With `PluginKind::Retention`, plugins whose latest release lacks
    /// retention support are omitted.
    async fn list_latest_releases(&self, kind: PluginKind) -> DbResult<Vec<PluginSummary>>;

    async fn get_release(&self, plugin_id: &str, version: &str)
    -> DbResult<Option<PluginRelease>>;

    /// Plugins enabled for an organization, each with its enabled version.
    async fn list_enabled_for_org(&self, org_id: Uuid) -> DbResult<Vec<EnabledPlugin>>;

    async fn get_org_config(
        &self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<OrgPluginConfig>>;

    /// Scripts belonging to plugins currently enabled for the organization.
    async fn list_scripts_for_org(
        &self,
        org_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Vec<RetentionScript>>;

    async fn get_script(
        &self,
        org_id: Uuid,
        script_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<RetentionScript>>;
}

/// A unit of work over the retention tables.
///
/// Reads of the organization configuration lock the row where the backend
/// supports it, so concurrent updates for the same `(org_id, plugin_id)`
/// serialize on it.
#[async_trait]
pub trait RetentionPluginTx: Send {
    async fn get_release(
        &mut self,
        plugin_id: &str,
        version: &str,
    ) -> DbResult<Option<PluginRelease>>;

    async fn get_org_config(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<OrgPluginConfig>>;

    /// Insert or replace the configuration for `(org_id, plugin_id)`.
    async fn put_org_config(
        &mut self,
        config: &OrgPluginConfig,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()>;

    /// Returns `true` if a configuration was deleted.
    async fn delete_org_config(&mut self, org_id: Uuid, plugin_id: &str) -> DbResult<bool>;

    /// Scripts of one plugin for one organization.
    async fn list_org_scripts(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Vec<RetentionScript>>;

    async fn get_script(
        &mut self,
        script_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<RetentionScript>>;

    /// Insert a script row. The id comes from the remote scheduler.
    ///
    /// # Errors
    /// Returns `DbError::Conflict` if the script id already exists.
    async fn insert_script(
        &mut self,
        script: &RetentionScript,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()>;

    /// Update name, description and export URL of a script.
    ///
    /// # Errors
    /// Returns `DbError::NotFound` if no row matches `script.script_id`.
    async fn update_script(
        &mut self,
        script: &RetentionScript,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()>;

    /// Delete scripts of one plugin for one organization, returning the ids
    /// deleted. With `preset_only`, custom scripts are kept.
    async fn delete_scripts(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        preset_only: bool,
    ) -> DbResult<Vec<Uuid>>;

    /// Delete a custom script. Preset rows are never matched.
    ///
    /// Returns `true` if a row was deleted.
    async fn delete_custom_script(&mut self, org_id: Uuid, script_id: Uuid) -> DbResult<bool>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Reduce one row per release to the latest release of each plugin.
///
/// Each input `PluginSummary` carries its own version in `latest_version`.
pub(crate) fn latest_per_plugin(
    releases: impl IntoIterator<Item = PluginSummary>,
    kind: PluginKind,
) -> Vec<PluginSummary> {
    let mut latest: BTreeMap<String, PluginSummary> = BTreeMap::new();
    for release in releases {
        match latest.get(&release.id) {
            Some(current)
                if compare_versions(&release.latest_version, &current.latest_version)
                    != Ordering::Greater => {}
            _ => {
                latest.insert(release.id.clone(), release);
            }
        }
    }
    latest
        .into_values()
        .filter(|p| kind == PluginKind::All || p.retention_enabled)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, version: &str, retention: bool) -> PluginSummary {
        PluginSummary {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: None,
            logo: None,
            latest_version: version.to_string(),
            retention_enabled: retention,
        }
    }

    #[test]
    fn test_latest_per_plugin_uses_version_order() {
        let rows = vec![
            summary("a", "0.0.9", true),
            summary("a", "0.0.10", true),
            summary("b", "2.0.0", false),
            summary("a", "0.0.2", true),
        ];
        let latest = latest_per_plugin(rows, PluginKind::All);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, "a");
        assert_eq!(latest[0].latest_version, "0.0.10");
        assert_eq!(latest[1].id, "b");
    }

    #[test]
    fn test_retention_filter_applies_to_latest() {
        let rows = vec![
            summary("a", "1.0.0", true),
            summary("a", "2.0.0", false),
            summary("b", "1.0.0", true),
        ];
        let latest = latest_per_plugin(rows, PluginKind::Retention);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "b");
    }
}
