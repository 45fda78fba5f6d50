use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validators::validate_export_url;

/// Local record of a retention export script.
///
/// The script body, schedule, and target clusters live in the remote
/// scheduler under the same `script_id`; this row holds the metadata the
/// scheduler knows nothing about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionScript {
    pub org_id: Uuid,
    /// Identifier assigned by the remote scheduler
    pub script_id: Uuid,
    pub plugin_id: String,
    pub script_name: String,
    pub description: String,
    /// Instantiated from a release's preset template
    pub is_preset: bool,
    /// Per-script export endpoint override. Encrypted at rest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_url: Option<String>,
}

/// A retention script merged with its remote schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionScriptView {
    #[serde(flatten)]
    pub script: RetentionScript,
    pub frequency_s: i64,
    pub enabled: bool,
    pub cluster_ids: Vec<Uuid>,
}

/// A single retention script including its body and effective export URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedRetentionScript {
    #[serde(flatten)]
    pub view: RetentionScriptView,
    pub contents: String,
    /// URL the script currently exports to after applying overrides
    pub effective_export_url: String,
}

/// Request to create a custom retention script.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRetentionScript {
    #[validate(length(min = 1, max = 128))]
    pub plugin_id: String,

    #[validate(length(min = 1, max = 255))]
    pub script_name: String,

    #[validate(length(max = 4096))]
    #[serde(default)]
    pub description: String,

    #[validate(length(min = 1))]
    pub contents: String,

    #[serde(default)]
    pub cluster_ids: Vec<Uuid>,

    #[validate(range(min = 1))]
    pub frequency_s: i64,

    #[validate(length(max = 2048), custom(function = "validate_export_url"))]
    #[serde(default)]
    pub export_url: Option<String>,
}

/// Request to update a retention script.
///
/// Preset scripts may only change `contents`, `cluster_ids`, `enabled` and
/// `frequency_s`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRetentionScript {
    #[validate(length(min = 1, max = 255))]
    #[serde(default)]
    pub script_name: Option<String>,

    #[validate(length(max = 4096))]
    #[serde(default)]
    pub description: Option<String>,

    /// `""` clears the per-script override
    #[validate(length(max = 2048), custom(function = "validate_export_url"))]
    #[serde(default)]
    pub export_url: Option<String>,

    #[validate(length(min = 1))]
    #[serde(default)]
    pub contents: Option<String>,

    #[serde(default)]
    pub cluster_ids: Option<Vec<Uuid>>,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[validate(range(min = 1))]
    #[serde(default)]
    pub frequency_s: Option<i64>,
}

impl UpdateRetentionScript {
    /// Whether the request touches fields presets do not allow changing.
    pub fn changes_metadata(&self) -> bool {
        self.script_name.is_some() || self.description.is_some() || self.export_url.is_some()
    }
}
