use std::borrow::Cow;

use validator::ValidationError;

/// Validate an export endpoint URL.
///
/// The empty string is accepted: on update requests it means "clear the
/// override".
pub fn validate_export_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        Ok(_) => {
            let mut err = ValidationError::new("invalid_export_url");
            err.message = Some(Cow::Borrowed("Export URL must be an http(s) URL with a host"));
            Err(err)
        }
        Err(e) => {
            let mut err = ValidationError::new("invalid_export_url");
            err.message = Some(Cow::Owned(format!("Invalid export URL: {}", e)));
            Err(err)
        }
    }
}
