use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Remote script scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Base URL of the scheduler's script API.
    #[serde(default)]
    pub base_url: String,

    /// Total request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_configured() {
            return Ok(());
        }
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Validation(format!("scheduler.base_url is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "scheduler.base_url must use http or https".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("http://scheduler:50700", true)]
    #[case("https://scheduler.example.com/api", true)]
    #[case("", true)]
    #[case("grpc://scheduler:50700", false)]
    #[case("scheduler:50700/scripts", false)]
    fn test_base_url_validation(#[case] base_url: &str, #[case] valid: bool) {
        let config = SchedulerConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate().is_ok(), valid, "{base_url}");
    }
}
