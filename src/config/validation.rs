//! Semantic validation on top of deserialization
//!
//! The `config` crate guarantees shape; this pass catches values that would
//! only fail deep inside a batch run, like a base URL the worker host cannot
//! resolve or a zero poll interval that would spin the tracker.

use thiserror::Error;
use url::Url;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Invalid scope {value:?}: must be non-empty without leading or trailing '/'")]
    InvalidScope { value: String },

    #[error("Invalid subdir prefix {value:?}: must be non-empty and contain no '/'")]
    InvalidSubdirPrefix { value: String },

    #[error("max_jobs_per_batch must be greater than zero")]
    ZeroBatchLimit,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_url("export.base_url", &config.export.base_url)?;
    validate_url("export.public_base", &config.export.public_base)?;
    validate_url("devtools.endpoint", &config.devtools.endpoint)?;

    if config.export.poll_interval_ms == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "export.poll_interval_ms",
        });
    }

    let scope = &config.export.default_scope;
    if scope.is_empty() || scope.starts_with('/') || scope.ends_with('/') {
        return Err(ValidationError::InvalidScope {
            value: scope.clone(),
        });
    }

    let prefix = &config.export.subdir_prefix;
    if prefix.is_empty() || prefix.contains('/') {
        return Err(ValidationError::InvalidSubdirPrefix {
            value: prefix.clone(),
        });
    }

    if config.server.api.max_jobs_per_batch == 0 {
        return Err(ValidationError::ZeroBatchLimit);
    }

    Ok(())
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    Url::parse(value).map_err(|_| ValidationError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config = Config::default();
        config.export.base_url = "not a url".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidUrl { field: "export.base_url", .. })
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::default();
        config.export.poll_interval_ms = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroDuration { .. })
        ));
    }

    #[test]
    fn test_slash_wrapped_scope_rejected() {
        let mut config = Config::default();
        config.export.default_scope = "/u/0".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_subdir_prefix_with_slash_rejected() {
        let mut config = Config::default();
        config.export.subdir_prefix = "a/b".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidSubdirPrefix { .. })
        ));
    }
}
