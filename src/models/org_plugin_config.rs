use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validators::validate_export_url;

/// An organization's enablement of one retention plugin.
///
/// At most one exists per `(org_id, plugin_id)`. Existence of the row means
/// the plugin is enabled for the organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgPluginConfig {
    pub org_id: Uuid,
    pub plugin_id: String,
    /// The release the organization is pinned to
    pub version: String,
    /// Plugin configuration values (API keys and similar). Encrypted at rest.
    pub configurations: BTreeMap<String, String>,
    /// Organization-wide export endpoint override. Encrypted at rest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_export_url: Option<String>,
}

/// A plugin enabled for an organization, with catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledPlugin {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub retention_enabled: bool,
    pub enabled_version: String,
}

/// Request to change an organization's retention plugin configuration.
///
/// All fields are optional:
/// - `enabled`: `Some(true)` enables (requires `version`), `Some(false)` disables.
/// - `version`: a different version from the current one is an upgrade.
/// - `configurations`: replaces the stored map; an empty map clears it.
/// - `custom_export_url`: replaces the override; `""` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UpdateOrgPluginConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[validate(length(min = 1, max = 64))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurations: Option<BTreeMap<String, String>>,

    #[validate(length(max = 2048), custom(function = "validate_export_url"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_export_url: Option<String>,
}
