//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, queue sizes > 0)
//! - Check the service domain suffix is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::MeshConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.mesh_ms == 0 {
        errors.push(ValidationError::new("timeouts.mesh_ms", "must be greater than 0"));
    }
    if config.timeouts.close_ms == 0 {
        errors.push(ValidationError::new("timeouts.close_ms", "must be greater than 0"));
    }
    if config.timeouts.request_ms == Some(0) {
        errors.push(ValidationError::new(
            "timeouts.request_ms",
            "must be greater than 0 when set",
        ));
    }
    if config.queue.max_per_turn == 0 {
        errors.push(ValidationError::new("queue.max_per_turn", "must be greater than 0"));
    }
    if config.streaming.max_inline_body == 0 {
        errors.push(ValidationError::new(
            "streaming.max_inline_body",
            "must be greater than 0",
        ));
    }
    if config.wiring.base_delay_ms > config.wiring.max_delay_ms {
        errors.push(ValidationError::new(
            "wiring.base_delay_ms",
            format!(
                "must not exceed wiring.max_delay_ms ({})",
                config.wiring.max_delay_ms
            ),
        ));
    }
    if let Some(domain) = &config.domain {
        if !domain.starts_with('.') {
            errors.push(ValidationError::new("domain", "must start with '.'"));
        }
        if domain.chars().any(char::is_whitespace) {
            errors.push(ValidationError::new("domain", "must not contain whitespace"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MeshConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = MeshConfig::default();
        config.timeouts.mesh_ms = 0;
        config.queue.max_per_turn = 0;
        config.domain = Some("local".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["timeouts.mesh_ms", "queue.max_per_turn", "domain"]);
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let mut config = MeshConfig::default();
        config.wiring.base_delay_ms = 5_000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "wiring.base_delay_ms");
    }
}
