//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check service names are unique and usable as a path segment
//! - Check URL schemes (http/https for unary, ws/wss for tunnels)
//! - Validate value ranges (buffer sizes > 0, bind address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
    #[error("service name must be a non-empty path segment, got '{0}'")]
    ServiceName(String),
    #[error("duplicate service name '{0}'")]
    DuplicateService(String),
    #[error("service '{service}': invalid {field} '{value}': {reason}")]
    Url {
        service: String,
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("websocket.{0} must be greater than zero")]
    ZeroBuffer(&'static str),
    #[error("limits.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let mut seen = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() || service.name.contains('/') {
            errors.push(ValidationError::ServiceName(service.name.clone()));
        } else if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }

        if let Err(reason) = check_url(&service.api_url, &["http", "https"]) {
            errors.push(ValidationError::Url {
                service: service.name.clone(),
                field: "api_url",
                value: service.api_url.clone(),
                reason,
            });
        }
        if let Err(reason) = check_url(&service.ws_url, &["ws", "wss"]) {
            errors.push(ValidationError::Url {
                service: service.name.clone(),
                field: "ws_url",
                value: service.ws_url.clone(),
                reason,
            });
        }
    }

    if config.websocket.read_buffer_size == 0 {
        errors.push(ValidationError::ZeroBuffer("read_buffer_size"));
    }
    if config.websocket.write_buffer_size == 0 {
        errors.push(ValidationError::ZeroBuffer("write_buffer_size"));
    }
    if config.websocket.max_message_size == 0 {
        errors.push(ValidationError::ZeroBuffer("max_message_size"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!("scheme must be one of {}", schemes.join("/")));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.services.push(ServiceConfig::new(
            "comments",
            "ftp://comments/api",
            "http://comments/ws",
        ));
        config.websocket.read_buffer_size = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.contains(&ValidationError::BindAddress("not-an-address".into())));
        assert!(errors.contains(&ValidationError::DuplicateService("comments".into())));
        assert!(errors.contains(&ValidationError::ZeroBuffer("read_buffer_size")));
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ValidationError::Url { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn rejects_names_that_are_not_path_segments() {
        let mut config = GatewayConfig::default();
        config.services = vec![
            ServiceConfig::new("", "http://a/api", "ws://a/ws"),
            ServiceConfig::new("a/b", "http://a/api", "ws://a/ws"),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ServiceName("".into()),
                ValidationError::ServiceName("a/b".into()),
            ]
        );
    }
}
