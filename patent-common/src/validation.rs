//! Configuration validation.
//!
//! Checks that model parameters and logging settings are within valid
//! ranges before the pipeline touches any data.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, OutputConfig, ValuationConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.valuation.validate() {
            errors.push(e);
        }

        if let Err(e) = self.output.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for ValuationConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "valuation.gamma".into(),
                reason: format!("must be a finite number greater than 0, got {}", self.gamma),
            });
        }

        if !self.mw_tolerance.is_finite() || self.mw_tolerance < 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "valuation.mw_tolerance".into(),
                reason: format!("must be a finite non-negative number, got {}", self.mw_tolerance),
            });
        }

        Ok(())
    }
}

impl Validate for OutputConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "output.path".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.preview_rows == 0 {
            return Err(ValidationError::InvalidValue {
                field: "output.preview_rows".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
