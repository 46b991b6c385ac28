//! Pluggable authorization policies.
//!
//! Each application may configure an access controller deciding per-session
//! permissions. Implementations are looked up in an explicit registry of
//! constructor functions populated at startup, never located by reflection;
//! when nothing is configured, a shared allow-all policy is used.
//!
//! The three instantiation failure modes produce three literal messages,
//! each naming the configured controller. Callers match on these texts, so
//! they are part of the contract.

use crate::config::ACCESS_CONTROLLER_PROPERTY;
use crate::error::{AuthError, AuthResult};
use crate::models::Session;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Pluggable object deciding per-session permissions.
pub trait AccessController: Send + Sync + std::fmt::Debug {
    /// Whether the session may perform `action` on `resource`.
    fn is_allowed(&self, session: &dyn Session, action: &str, resource: &str) -> bool;
}

/// Default policy: everything is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAccessController;

impl AccessController for AllowAllAccessController {
    fn is_allowed(&self, _session: &dyn Session, _action: &str, _resource: &str) -> bool {
        true
    }
}

/// Constructor function registered for an access controller name.
pub type AccessControllerConstructor = fn() -> Result<Arc<dyn AccessController>, String>;

struct RegistryEntry {
    constructor: AccessControllerConstructor,
    accessible: bool,
}

/// Registry mapping configured controller names to constructor functions.
#[derive(Default)]
pub struct AccessControllerRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl AccessControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller constructor under `name`.
    pub fn register(&self, name: impl Into<String>, constructor: AccessControllerConstructor) {
        self.insert(name.into(), constructor, true);
    }

    /// Register a controller that is known but may not be instantiated,
    /// e.g. one disabled for this deployment.
    pub fn register_inaccessible(
        &self,
        name: impl Into<String>,
        constructor: AccessControllerConstructor,
    ) {
        self.insert(name.into(), constructor, false);
    }

    /// Instantiate the controller registered under `name`.
    pub fn instantiate(&self, name: &str) -> AuthResult<Arc<dyn AccessController>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get(name) else {
            return Err(AuthError::access_controller(format!(
                "Access controller '{name}' was not found!"
            )));
        };
        if !entry.accessible {
            return Err(AuthError::access_controller(format!(
                "Constructor of access controller '{name}' is not accessible!"
            )));
        }
        (entry.constructor)().map_err(|reason| {
            warn!(controller = %name, reason = %reason, "Access controller construction failed");
            AuthError::access_controller(format!(
                "Access controller '{name}' cannot be instantiated!"
            ))
        })
    }

    fn insert(&self, name: String, constructor: AccessControllerConstructor, accessible: bool) {
        debug!(controller = %name, accessible, "Registering access controller");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name,
                RegistryEntry {
                    constructor,
                    accessible,
                },
            );
    }
}

impl std::fmt::Debug for AccessControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("AccessControllerRegistry")
            .field("entries", &names)
            .finish()
    }
}

/// Produces the access controller of a session's application.
pub struct AccessControllerFactory {
    registry: Arc<AccessControllerRegistry>,
    default_controller: Arc<dyn AccessController>,
}

impl AccessControllerFactory {
    /// Create a factory over the given registry, defaulting to allow-all.
    pub fn new(registry: Arc<AccessControllerRegistry>) -> Self {
        Self {
            registry,
            default_controller: Arc::new(AllowAllAccessController),
        }
    }

    /// Create the access controller configured for the session's
    /// application, or the shared allow-all policy when none is configured.
    pub fn create(&self, session: &dyn Session) -> AuthResult<Arc<dyn AccessController>> {
        let configured = session
            .config()
            .get_property(ACCESS_CONTROLLER_PROPERTY)
            .map(str::trim)
            .filter(|name| !name.is_empty());
        match configured {
            None => {
                debug!(
                    application = %session.application_name(),
                    "No access controller configured, using allow-all"
                );
                Ok(Arc::clone(&self.default_controller))
            }
            Some(name) => self.registry.instantiate(name),
        }
    }
}

impl Default for AccessControllerFactory {
    fn default() -> Self {
        Self::new(Arc::new(AccessControllerRegistry::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::models::SimpleSession;

    #[derive(Debug)]
    struct DenyAll;

    impl AccessController for DenyAll {
        fn is_allowed(&self, _session: &dyn Session, _action: &str, _resource: &str) -> bool {
            false
        }
    }

    fn session_with_controller(name: &str) -> SimpleSession {
        SimpleSession::new(
            "demo",
            ConfigTree::new().with_property(ACCESS_CONTROLLER_PROPERTY, name),
        )
    }

    #[test]
    fn test_default_allow_all() {
        let factory = AccessControllerFactory::default();
        let session = SimpleSession::new("demo", ConfigTree::new());
        let controller = factory.create(&session).unwrap();
        assert!(controller.is_allowed(&session, "login", "demo"));
    }

    #[test]
    fn test_blank_name_uses_default() {
        let factory = AccessControllerFactory::default();
        let session = session_with_controller("   ");
        let controller = factory.create(&session).unwrap();
        assert!(controller.is_allowed(&session, "login", "demo"));
    }

    #[test]
    fn test_registered_controller_is_instantiated() {
        let registry = Arc::new(AccessControllerRegistry::new());
        registry.register("com.acme.DenyAll", || Ok(Arc::new(DenyAll)));
        let factory = AccessControllerFactory::new(registry);
        let session = session_with_controller("com.acme.DenyAll");
        let controller = factory.create(&session).unwrap();
        assert!(!controller.is_allowed(&session, "login", "demo"));
    }

    #[test]
    fn test_unknown_controller_message() {
        let factory = AccessControllerFactory::default();
        let session = session_with_controller("com.acme.MissingController");
        let err = factory.create(&session).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access controller 'com.acme.MissingController' was not found!"
        );
    }

    #[test]
    fn test_failing_constructor_message() {
        let registry = Arc::new(AccessControllerRegistry::new());
        registry.register("com.acme.Broken", || Err("missing backing store".to_string()));
        let factory = AccessControllerFactory::new(registry);
        let session = session_with_controller("com.acme.Broken");
        let err = factory.create(&session).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Access controller 'com.acme.Broken' cannot be instantiated!"
        );
    }

    #[test]
    fn test_inaccessible_constructor_message() {
        let registry = Arc::new(AccessControllerRegistry::new());
        registry.register_inaccessible("com.acme.Disabled", || Ok(Arc::new(DenyAll)));
        let factory = AccessControllerFactory::new(registry);
        let session = session_with_controller("com.acme.Disabled");
        let err = factory.create(&session).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Constructor of access controller 'com.acme.Disabled' is not accessible!"
        );
    }
}
