mod org_plugin_config;
mod plugin_release;
mod retention_script;
mod validators;

pub use org_plugin_config::*;
pub use plugin_release::*;
pub use retention_script::*;
pub use validators::*;
