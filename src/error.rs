//! Error types for the delivery engine.
//!
//! Only configuration and programmer-misuse errors propagate to callers.
//! Transient channel errors (push failures, fetch failures) are absorbed into
//! the health score and never appear here.

use thiserror::Error;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Delivery controller used before initialize: {operation}")]
    NotInitialized { operation: &'static str },
    #[error("Delivery controller used after destroy: {operation}")]
    Destroyed { operation: &'static str },
    #[error("Delivery controller bound to tenant '{bound}', cannot rebind to '{requested}'")]
    TenantMismatch { bound: String, requested: String },
    #[error("No Tokio runtime available to schedule delivery tasks")]
    RuntimeUnavailable,
}

impl DeliveryError {
    /// Wiring bugs, as opposed to invalid configuration
    pub fn is_misuse(&self) -> bool {
        !matches!(self, DeliveryError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_misuse_classification() {
        let config_error: DeliveryError =
            ConfigurationError::invalid_value("polling_interval_ms", 0, "must be positive").into();
        assert!(!config_error.is_misuse());

        assert!(DeliveryError::NotInitialized {
            operation: "notify_push_message"
        }
        .is_misuse());
        assert!(DeliveryError::Destroyed {
            operation: "force_mode"
        }
        .is_misuse());
        assert!(DeliveryError::RuntimeUnavailable.is_misuse());
    }

    #[test]
    fn test_display_names_operation() {
        let error = DeliveryError::Destroyed {
            operation: "notify_push_failure",
        };
        assert_eq!(
            error.to_string(),
            "Delivery controller used after destroy: notify_push_failure"
        );
    }
}
