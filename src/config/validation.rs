//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Rate pair lists, key sizes and URL rate keys
//! - Parseable listener and metrics addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

const MIN_HASH_KEY: usize = 16;
const URL_RATE_METHODS: [&str; 10] = [
    "ANY", "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
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

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.router.max_body_bytes == 0 {
        errors.push(ValidationError::new("router.max_body_bytes", "must be greater than 0"));
    }

    let session = &config.session;
    check_pairs("session.cookie_rate", &session.cookie_rate, &mut errors);
    for (key, pairs) in &session.url_rate {
        let field = format!("session.url_rate.{key}");
        if !is_url_rate_key(key) {
            errors.push(ValidationError::new(
                field.clone(),
                "key must look like METHOD:/prefix or ANY:/prefix",
            ));
        }
        check_pairs(&field, pairs, &mut errors);
    }
    if session.cookie.name.is_empty() {
        errors.push(ValidationError::new("session.cookie.name", "must not be empty"));
    }
    check_keys("session", session.hash_key.as_deref(), session.block_key.as_deref(), &mut errors);

    let auth = &config.auth;
    check_keys("auth", auth.hash_key.as_deref(), auth.block_key.as_deref(), &mut errors);
    if auth.token_headers.is_empty() {
        errors.push(ValidationError::new("auth.token_headers", "must name at least one header"));
    }
    if auth.refresh_token_headers.is_empty() {
        errors.push(ValidationError::new(
            "auth.refresh_token_headers",
            "must name at least one header",
        ));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_pairs(field: &str, pairs: &[i64], errors: &mut Vec<ValidationError>) {
    if pairs.len() % 2 != 0 {
        errors.push(ValidationError::new(
            field,
            format!("expected (count, seconds) pairs, got {} values", pairs.len()),
        ));
    }
}

fn check_keys(section: &str, hash: Option<&str>, block: Option<&str>, errors: &mut Vec<ValidationError>) {
    if let Some(key) = hash.filter(|k| !k.is_empty()) {
        if key.len() < MIN_HASH_KEY {
            errors.push(ValidationError::new(
                format!("{section}.hash_key"),
                format!("must be at least {MIN_HASH_KEY} bytes"),
            ));
        }
    }
    if let Some(key) = block.filter(|k| !k.is_empty()) {
        if !matches!(key.len(), 16 | 24 | 32) {
            errors.push(ValidationError::new(
                format!("{section}.block_key"),
                "must be 16, 24 or 32 bytes",
            ));
        }
    }
}

fn is_url_rate_key(key: &str) -> bool {
    key.split_once(':')
        .is_some_and(|(method, path)| URL_RATE_METHODS.contains(&method) && path.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn test_all_errors_are_reported() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.session.cookie_rate = vec![10];
        config.session.url_rate.insert("login".into(), vec![1, 1]);
        config.session.url_rate.insert("POST:/login".into(), vec![1, 1, 1]);
        config.session.hash_key = Some("short".into());
        config.auth.block_key = Some("0123456789".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "session.cookie_rate",
                "session.url_rate.POST:/login",
                "session.url_rate.login",
                "session.hash_key",
                "auth.block_key",
            ]
        );
    }

    #[test]
    fn test_url_rate_keys() {
        assert!(is_url_rate_key("ANY:/"));
        assert!(is_url_rate_key("POST:/api/login"));
        assert!(!is_url_rate_key("post:/api"));
        assert!(!is_url_rate_key("GET:api"));
    }
}
