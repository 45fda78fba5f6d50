use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

/// A script template shipped with a retention-capable plugin release.
///
/// Presets are instantiated once per organization when the plugin is enabled
/// or upgraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetScript {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default cron frequency in seconds
    pub default_frequency_s: i64,
    /// Script body
    pub script: String,
}

/// An immutable, versioned plugin release.
///
/// The retention fields are only meaningful when `retention_enabled` is set;
/// releases without retention support carry empty defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRelease {
    /// Plugin identifier (e.g. "otel-export")
    pub plugin_id: String,
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    /// Whether this release supports data retention export
    #[serde(default)]
    pub retention_enabled: bool,
    /// Configuration keys the plugin accepts, mapped to a human description
    #[serde(default)]
    pub configurations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_export_url: Option<String>,
    /// Whether organizations may override the export URL
    #[serde(default)]
    pub allow_custom_export_url: bool,
    #[serde(default)]
    pub preset_scripts: Vec<PresetScript>,
}

/// Latest release of a plugin, as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub latest_version: String,
    pub retention_enabled: bool,
}

/// Retention configuration schema of a specific release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReleaseConfig {
    pub configurations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_export_url: Option<String>,
    pub allow_custom_export_url: bool,
    pub preset_scripts: Vec<PresetScript>,
}

impl From<PluginRelease> for RetentionReleaseConfig {
    fn from(release: PluginRelease) -> Self {
        Self {
            configurations: release.configurations,
            documentation_url: release.documentation_url,
            default_export_url: release.default_export_url,
            allow_custom_export_url: release.allow_custom_export_url,
            preset_scripts: release.preset_scripts,
        }
    }
}

/// Catalog filter for plugin listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    All,
    Retention,
}

/// Compare two release versions.
///
/// Versions are split on `.` and `-`; numeric components compare numerically
/// and anything else compares lexically, so `1.10.0` sorts after `1.9.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Greater,
                    (Err(_), Ok(_)) => Ordering::Less,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
