//! Database driver seam.
//!
//! The physical database driver is an external collaborator: this module
//! defines the traits the connection guard drives, plus a registry that maps
//! driver names and URL schemes to registered implementations. The registry
//! replaces by-name reflection with an explicit, compile-time populated
//! lookup table.

use crate::models::Credentials;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

/// Error reported by a driver implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Create a driver error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a driver error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// An open prepared or callable statement.
pub trait Statement: Send + Sync {
    /// The SQL text this statement was prepared from.
    fn sql(&self) -> &str;

    /// Close the statement, releasing driver-side resources.
    fn close(&self) -> Result<(), DriverError>;
}

/// An open physical database connection.
pub trait Connection: Send + Sync + std::fmt::Debug {
    /// Execute `sql` and report whether at least one row was fetched.
    ///
    /// This is the shape the liveness probe needs; richer result access
    /// belongs to the statements the driver hands out.
    fn execute_query(&self, sql: &str) -> Result<bool, DriverError>;

    /// Prepare a statement on this connection.
    fn prepare_statement(&self, sql: &str) -> Result<Arc<dyn Statement>, DriverError>;

    /// Prepare a callable (stored-procedure) statement on this connection.
    fn prepare_call(&self, sql: &str) -> Result<Arc<dyn Statement>, DriverError>;

    /// Close the connection.
    fn close(&self) -> Result<(), DriverError>;

    /// True once the connection has been closed.
    fn is_closed(&self) -> bool;
}

/// A database driver able to open connections for its URL schemes.
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Registry name of this driver, the value of the `driver` credential
    /// field.
    fn name(&self) -> &str;

    /// URL schemes this driver serves, lowercase.
    fn schemes(&self) -> &[&str];

    /// Whether URLs served by this driver are classic driver-based
    /// connections requiring username and password. Alternative connection
    /// types (externally managed handles) return `false`.
    fn requires_credentials(&self) -> bool {
        true
    }

    /// Open a physical connection.
    fn open(&self, credentials: &Credentials) -> Result<Arc<dyn Connection>, DriverError>;
}

/// A resolved driver bound to concrete credentials, ready to open.
pub struct ConnectionOpener {
    driver: Arc<dyn Driver>,
    credentials: Credentials,
}

impl ConnectionOpener {
    /// Name of the driver that will perform the open.
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Open the physical connection.
    pub fn open(&self) -> Result<Arc<dyn Connection>, DriverError> {
        self.driver.open(&self.credentials)
    }
}

/// Registry of available database drivers, keyed by name and URL scheme.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    /// Create an empty driver registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        debug!(driver = %name, "Registering database driver");
        self.write().insert(name, driver);
    }

    /// Load a driver by name.
    pub fn load(&self, name: &str) -> Result<Arc<dyn Driver>, DriverError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("Driver '{name}' is not registered")))
    }

    /// Find the driver serving the scheme of `url`, if any.
    pub fn driver_for_url(&self, url: &str) -> Option<Arc<dyn Driver>> {
        let scheme = url::Url::parse(url).ok()?.scheme().to_ascii_lowercase();
        self.read()
            .values()
            .find(|d| d.schemes().contains(&scheme.as_str()))
            .cloned()
    }

    /// Whether `url` addresses a classic driver-based connection that
    /// requires username and password.
    ///
    /// URLs with no registered driver are treated as driver-based: the
    /// strict path then demands an explicit driver name and credentials.
    pub fn is_driver_url(&self, url: &str) -> bool {
        match self.driver_for_url(url) {
            Some(driver) => driver.requires_credentials(),
            None => true,
        }
    }

    /// Resolve credentials to an opener: explicit driver name first, URL
    /// scheme otherwise.
    pub fn resolve(&self, credentials: &Credentials) -> Result<ConnectionOpener, DriverError> {
        let driver = match credentials.driver.as_deref() {
            Some(name) => self.load(name)?,
            None => {
                let url = credentials.url.as_deref().unwrap_or_default();
                self.driver_for_url(url).ok_or_else(|| {
                    DriverError::new(format!("No driver registered for URL '{url}'"))
                })?
            }
        };
        Ok(ConnectionOpener {
            driver,
            credentials: credentials.clone(),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Driver>>> {
        // A poisoned lock only means a writer panicked; the map is still usable.
        self.drivers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Driver>>> {
        self.drivers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.read().keys().cloned().collect();
        f.debug_struct("DriverRegistry").field("drivers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullDriver {
        name: &'static str,
        schemes: &'static [&'static str],
        requires_credentials: bool,
    }

    impl Driver for NullDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn schemes(&self) -> &[&str] {
            self.schemes
        }

        fn requires_credentials(&self) -> bool {
            self.requires_credentials
        }

        fn open(&self, _credentials: &Credentials) -> Result<Arc<dyn Connection>, DriverError> {
            Err(DriverError::new("null driver cannot open connections"))
        }
    }

    fn registry_with_testdb() -> DriverRegistry {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NullDriver {
            name: "testdb",
            schemes: &["testdb"],
            requires_credentials: true,
        }));
        registry
    }

    #[test]
    fn test_load_registered_driver() {
        let registry = registry_with_testdb();
        assert_eq!(registry.load("testdb").unwrap().name(), "testdb");
    }

    #[test]
    fn test_load_unknown_driver_fails() {
        let registry = registry_with_testdb();
        let err = registry.load("org.acme.Driver").unwrap_err();
        assert!(err.to_string().contains("org.acme.Driver"));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_driver_for_url_matches_scheme_case_insensitive() {
        let registry = registry_with_testdb();
        assert!(registry.driver_for_url("TESTDB://localhost/auth").is_some());
        assert!(registry.driver_for_url("other://localhost/auth").is_none());
        assert!(registry.driver_for_url("not a url").is_none());
    }

    #[test]
    fn test_is_driver_url() {
        let registry = registry_with_testdb();
        registry.register(Arc::new(NullDriver {
            name: "handle",
            schemes: &["handle"],
            requires_credentials: false,
        }));

        assert!(registry.is_driver_url("testdb://localhost/auth"));
        assert!(!registry.is_driver_url("handle://pool/main"));
        // Unknown schemes stay on the strict path.
        assert!(registry.is_driver_url("unknown://x"));
    }

    #[test]
    fn test_resolve_prefers_explicit_driver_name() {
        let registry = registry_with_testdb();
        let credentials = Credentials::new()
            .with_driver("testdb")
            .with_url("other://localhost/auth");
        let opener = registry.resolve(&credentials).unwrap();
        assert_eq!(opener.driver_name(), "testdb");
    }

    #[test]
    fn test_resolve_falls_back_to_scheme() {
        let registry = registry_with_testdb();
        let credentials = Credentials::new().with_url("testdb://localhost/auth");
        let opener = registry.resolve(&credentials).unwrap();
        assert_eq!(opener.driver_name(), "testdb");
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = registry_with_testdb();
        let credentials = Credentials::new().with_url("other://localhost/auth");
        assert!(registry.resolve(&credentials).is_err());
    }

    #[test]
    fn test_driver_error_source_chain() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DriverError::with_source("open failed", io);
        assert_eq!(err.to_string(), "open failed");
        assert!(err.source().is_some());
    }
}
