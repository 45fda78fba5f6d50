use std::fmt;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::crypto::EncryptionKey;

/// Key for the encrypted configuration columns.
///
/// The key is base64 of exactly 32 bytes (AES-256). It is never written back
/// out: serialization skips it and `Debug` redacts it.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    #[serde(default, skip_serializing)]
    key: Option<String>,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl EncryptionConfig {
    pub fn is_configured(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Decode the configured key.
    pub fn key(&self) -> Result<EncryptionKey, ConfigError> {
        let encoded = self
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::Validation("encryption.key is not set".into()))?;
        EncryptionKey::from_base64(encoded)
            .map_err(|e| ConfigError::Validation(format!("encryption.key: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_configured() {
            self.key()?;
        }
        Ok(())
    }
}
