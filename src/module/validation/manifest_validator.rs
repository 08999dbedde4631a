//! Registration and scheme validation
//!
//! Checks module registrations for structure and schemes against the
//! registration contract of the module they bind to.

use tracing::{debug, warn};

use crate::model::{ModuleRegistration, Scheme};
use crate::module::traits::ExchangeError;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is valid
    Valid,
    /// Input is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Collapse into a `ConfigError` carrying every message
    pub fn into_result(self, subject: &str) -> Result<(), ExchangeError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => Err(ExchangeError::Config(format!(
                "{}: {}",
                subject,
                errors.join("; ")
            ))),
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }
}

/// Registration validator
pub struct ManifestValidator {
    /// Maximum length of ids and protocol names
    max_name_len: usize,
}

impl ManifestValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self { max_name_len: 64 }
    }

    /// Validate a module registration
    pub fn validate(&self, registration: &ModuleRegistration) -> ValidationResult {
        let mut errors = Vec::new();

        if registration.id.is_empty() {
            errors.push("Module id cannot be empty".to_string());
        } else if registration.id.len() > self.max_name_len {
            errors.push(format!("Module id {} is longer than {}", registration.id, self.max_name_len));
        }

        if !self.is_valid_protocol(&registration.protocol) {
            errors.push(format!(
                "Invalid protocol name: {} (must be lowercase alphanumeric with dashes/underscores)",
                registration.protocol
            ));
        }

        for key in &registration.required_config_keys {
            if key.trim().is_empty() {
                errors.push("Required config keys cannot be blank".to_string());
                break;
            }
        }

        let result = ValidationResult::from_errors(errors);
        match &result {
            ValidationResult::Valid => debug!("Registration validation passed for module: {}", registration.id),
            ValidationResult::Invalid(errors) => warn!(
                "Registration validation failed for module {}: {:?}",
                registration.id, errors
            ),
        }
        result
    }

    /// Validate a scheme against the registration it binds to
    ///
    /// Every problem is collected, so an operator sees all missing keys at once.
    pub fn validate_scheme(&self, scheme: &Scheme, registration: &ModuleRegistration) -> ValidationResult {
        let mut errors = Vec::new();

        if scheme.name.trim().is_empty() {
            errors.push("Scheme name cannot be empty".to_string());
        }
        if scheme.module_type != registration.module_type {
            errors.push(format!(
                "Scheme type {} does not match module {} type {}",
                scheme.module_type, registration.id, registration.module_type
            ));
        }
        if scheme.protocol != registration.protocol {
            errors.push(format!(
                "Scheme protocol {} does not match module {} protocol {}",
                scheme.protocol, registration.id, registration.protocol
            ));
        }

        let missing = registration.missing_config_keys(&scheme.config);
        if !missing.is_empty() {
            errors.push(format!("Missing required config keys: {}", missing.join(", ")));
        }

        if let Some(template) = scheme.config.get("template") {
            if !template.is_string() {
                errors.push("Config value 'template' must be a string".to_string());
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Validate protocol name format
    #[inline]
    fn is_valid_protocol(&self, protocol: &str) -> bool {
        if protocol.is_empty() || protocol.len() > self.max_name_len {
            return false;
        }

        if !protocol.chars().next().map_or(false, |c| c.is_ascii_alphanumeric()) {
            return false;
        }

        protocol
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}
