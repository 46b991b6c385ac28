//! Error types for the session authentication backend.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. Message texts are part of the observable contract: login-path
//! callers match on them, so they must stay stable.

use crate::db::driver::DriverError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// A required credential field is absent from the application
    /// configuration.
    #[error("Parameter '{parameter}' is missing for application '{application}'")]
    Configuration {
        parameter: String,
        application: String,
    },

    /// The configured database driver could not be located in the driver
    /// registry.
    #[error("Driver '{driver}' could not be loaded")]
    DriverLoad {
        driver: String,
        #[source]
        source: DriverError,
    },

    /// Opening the physical connection failed. The guard is fully torn down
    /// before this propagates, so no half-open state leaks.
    #[error("Could not open connection to '{url}' for application '{application}'")]
    ConnectionOpen {
        url: String,
        application: String,
        #[source]
        source: DriverError,
    },

    /// Access controller instantiation failed. The message is one of three
    /// literal texts, each naming the configured controller.
    #[error("{message}")]
    AccessController { message: String },
}

impl AuthError {
    /// Create a configuration error for a missing credential parameter.
    pub fn configuration(parameter: impl Into<String>, application: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            application: application.into(),
        }
    }

    /// Create a driver load error wrapping the underlying cause.
    pub fn driver_load(driver: impl Into<String>, source: DriverError) -> Self {
        Self::DriverLoad {
            driver: driver.into(),
            source,
        }
    }

    /// Create a connection open error wrapping the underlying cause.
    pub fn connection_open(
        url: impl Into<String>,
        application: impl Into<String>,
        source: DriverError,
    ) -> Self {
        Self::ConnectionOpen {
            url: url.into(),
            application: application.into(),
            source,
        }
    }

    /// Create an access controller error with one of the literal messages.
    pub fn access_controller(message: impl Into<String>) -> Self {
        Self::AccessController {
            message: message.into(),
        }
    }

    /// Check if this error points at the application configuration rather
    /// than the database side.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::AccessController { .. }
        )
    }
}

/// Result type alias for authentication backend operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message() {
        let err = AuthError::configuration("url", "demo");
        assert_eq!(
            err.to_string(),
            "Parameter 'url' is missing for application 'demo'"
        );
    }

    #[test]
    fn test_driver_load_message_names_driver() {
        let err = AuthError::driver_load("org.acme.Driver", DriverError::new("not registered"));
        assert!(err.to_string().contains("org.acme.Driver"));
    }

    #[test]
    fn test_connection_open_message_names_url_and_application() {
        let err = AuthError::connection_open(
            "testdb://localhost/auth",
            "demo",
            DriverError::new("refused"),
        );
        let msg = err.to_string();
        assert!(msg.contains("testdb://localhost/auth"));
        assert!(msg.contains("demo"));
    }

    #[test]
    fn test_connection_open_preserves_source() {
        use std::error::Error;
        let err = AuthError::connection_open("u", "a", DriverError::new("refused"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("refused".into()));
    }

    #[test]
    fn test_is_configuration() {
        assert!(AuthError::configuration("url", "demo").is_configuration());
        assert!(AuthError::access_controller("nope").is_configuration());
        assert!(!AuthError::driver_load("d", DriverError::new("x")).is_configuration());
    }
}
