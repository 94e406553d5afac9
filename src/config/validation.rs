//! Configuration validation
//!
//! Validates tonproxy configuration for correctness:
//! - Upstream URL is set and uses http(s)
//! - Page sizes and fetch batch sizes are positive and consistent
//! - Server and rate-limit settings are usable

use super::proxy_config::ProxyConfig;
use crate::ProxyError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Largest `limit` TonAPI accepts on `/accounts/{id}/events`
pub const MAX_FETCH_BATCH_SIZE: usize = 100;

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a tonproxy configuration
pub fn validate_config(config: &ProxyConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let url = config.tonapi.url.trim();
    if url.is_empty() {
        errors.push(ValidationError::new("tonapi.url", "URL must not be empty"));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(ValidationError::new(
            "tonapi.url",
            format!("URL must start with http:// or https://, got '{}'", url),
        ));
    }

    if config.tonapi.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "tonapi.timeout_secs",
            "Timeout must be greater than 0",
        ));
    }

    let pagination = &config.pagination;
    if pagination.limit == 0 {
        errors.push(ValidationError::new(
            "pagination.limit",
            "Default page size must be greater than 0",
        ));
    }
    if pagination.fetch_batch_size == 0 {
        errors.push(ValidationError::new(
            "pagination.fetch_batch_size",
            "Fetch batch size must be greater than 0",
        ));
    } else if pagination.fetch_batch_size > MAX_FETCH_BATCH_SIZE {
        errors.push(ValidationError::new(
            "pagination.fetch_batch_size",
            format!(
                "Fetch batch size {} exceeds the upstream maximum of {}",
                pagination.fetch_batch_size, MAX_FETCH_BATCH_SIZE
            ),
        ));
    }
    if pagination.max_limit == 0 {
        errors.push(ValidationError::new(
            "pagination.max_limit",
            "Maximum page size must be greater than 0",
        ));
    } else if pagination.limit > pagination.max_limit {
        errors.push(ValidationError::new(
            "pagination.limit",
            format!(
                "Default page size {} exceeds max_limit {}",
                pagination.limit, pagination.max_limit
            ),
        ));
    }

    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "Host must not be empty"));
    }

    if config.server.rate_limit.max_requests == 0 {
        errors.push(ValidationError::new(
            "server.rate_limit.max_requests",
            "Must allow at least one request per window",
        ));
    }
    if config.server.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new(
            "server.rate_limit.window_secs",
            "Window must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert to a crate error
pub fn validate_config_result(config: &ProxyConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ProxyError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
