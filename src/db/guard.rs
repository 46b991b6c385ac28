//! Guarded shared database connection.
//!
//! One [`ConnectionGuard`] instance is shared by every session thread
//! authenticating against the same application deployment. It keeps a single
//! physical connection alive, detects staleness on three independent keys
//! (credential change, config-file modification time, liveness probe),
//! reopens lazily, and guarantees that teardown closes every registered
//! statement before the connection itself.
//!
//! This is deliberately not a pool: one connection serves all threads of a
//! deployment, which caps throughput under heavy concurrent authentication.

use crate::config::ConfigTree;
use crate::db::driver::{Connection, DriverError, Statement};
use crate::db::registry::{StatementMetadata, StatementRegistry};
use crate::db::resolver::resolve_credentials;
use crate::db::DriverRegistry;
use crate::error::{AuthError, AuthResult};
use crate::models::{Credentials, Session, Zone, VIRTUAL_CONFIG_VERSION};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Deployment-specific behavior injected into the guard.
///
/// Replaces subclassing: the guard calls back into this object after every
/// (re)open and before every liveness check.
pub trait GuardHooks: Send + Sync {
    /// Lightweight query used to detect a silently-dropped connection.
    /// `None` disables the probe; the cached connection is then assumed
    /// alive.
    fn alive_query(&self) -> Option<&str> {
        None
    }

    /// Re-create prepared statements after a (re)open. Statements created
    /// through `statements` are owned by the guard and closed on teardown.
    ///
    /// A failure here aborts the open: the guard reports it as a
    /// connection-open failure, since the connection never became usable.
    fn init_statements(
        &self,
        connection: &Arc<dyn Connection>,
        statements: &StatementRegistry,
    ) -> Result<(), DriverError>;

    /// Refresh configuration-derived values after a (re)open.
    fn update_configuration(&self, config: &ConfigTree) -> Result<(), DriverError>;
}

/// Hooks that configure nothing: no probe, no statements, no cached
/// configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl GuardHooks for NoopHooks {
    fn init_statements(
        &self,
        _connection: &Arc<dyn Connection>,
        _statements: &StatementRegistry,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    fn update_configuration(&self, _config: &ConfigTree) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Cached state of the guarded connection.
///
/// Invariant: `connection` is present if and only if `credentials` is.
struct GuardState {
    connection: Option<Arc<dyn Connection>>,
    credentials: Option<Credentials>,
    application: Option<String>,
    config_version: i64,
}

impl GuardState {
    fn empty() -> Self {
        Self {
            connection: None,
            credentials: None,
            application: None,
            config_version: VIRTUAL_CONFIG_VERSION,
        }
    }
}

/// Shared, validated, lazily-reopened database connection of one
/// application deployment.
pub struct ConnectionGuard {
    drivers: Arc<DriverRegistry>,
    zone: Arc<dyn Zone>,
    hooks: Box<dyn GuardHooks>,
    state: Mutex<GuardState>,
    statements: StatementRegistry,
}

impl ConnectionGuard {
    /// Create a guard for one application deployment.
    pub fn new(
        drivers: Arc<DriverRegistry>,
        zone: Arc<dyn Zone>,
        hooks: Box<dyn GuardHooks>,
    ) -> Self {
        Self {
            drivers,
            zone,
            hooks,
            state: Mutex::new(GuardState::empty()),
            statements: StatementRegistry::new(),
        }
    }

    /// Resolve credentials, decide whether the cached connection is still
    /// valid, and return a live connection, reopening if necessary.
    ///
    /// The whole decide-and-reopen sequence runs under the guard lock, so
    /// two threads cannot both open a connection and leak one of them.
    pub fn open_connection(
        &self,
        application: &str,
        config: &ConfigTree,
    ) -> AuthResult<Arc<dyn Connection>> {
        let mut credentials = resolve_credentials(config).unwrap_or_default();
        self.validate_credentials(&mut credentials, application)?;
        let version = self.current_config_version();

        let mut state = self.lock_state();
        if let Some(connection) = state.connection.clone() {
            let unchanged = state.credentials.as_ref() == Some(&credentials)
                && state.config_version != VIRTUAL_CONFIG_VERSION
                && state.config_version == version;
            if unchanged {
                if self.probe(&connection) {
                    debug!(application, "Reusing guarded connection");
                    return Ok(connection);
                }
                debug!(application, "Liveness probe failed, reopening");
            } else {
                info!(application, "Credentials or configuration changed, reopening");
            }
        }

        self.reopen_locked(&mut state, credentials, application, Some(config), version)
    }

    /// [`open_connection`](Self::open_connection) with the session's own
    /// application name and configuration.
    pub fn open_for_session(&self, session: &dyn Session) -> AuthResult<Arc<dyn Connection>> {
        self.open_connection(session.application_name(), session.config())
    }

    /// Revalidate the cached connection with the liveness probe only, no
    /// credential re-resolution. A dead connection is transparently
    /// reopened with the previously cached credentials. Returns `Ok(None)`
    /// if no connection was ever opened.
    pub fn current_connection(&self) -> AuthResult<Option<Arc<dyn Connection>>> {
        let mut state = self.lock_state();
        let Some(connection) = state.connection.clone() else {
            return Ok(None);
        };
        if self.probe(&connection) {
            return Ok(Some(connection));
        }
        let Some(credentials) = state.credentials.clone() else {
            return Ok(None);
        };
        let application = state.application.clone().unwrap_or_default();
        debug!(application = %application, "Cached connection failed liveness probe, reopening");
        // The configuration did not change here, so the cached config
        // version carries over and no configuration refresh runs.
        let version = state.config_version;
        let connection = self.reopen_locked(&mut state, credentials, &application, None, version)?;
        Ok(Some(connection))
    }

    /// Close every registered statement, then the physical connection.
    /// Calling this twice is a no-op the second time.
    pub fn close_connection(&self) {
        let mut state = self.lock_state();
        if state.connection.is_some() {
            info!(
                application = %state.application.as_deref().unwrap_or_default(),
                "Closing guarded connection"
            );
        }
        self.teardown_locked(&mut state);
    }

    /// True while a connection is cached.
    pub fn is_open(&self) -> bool {
        self.lock_state().connection.is_some()
    }

    /// Register a statement handle with the guard's registry.
    pub fn register(&self, statement: Arc<dyn Statement>) {
        self.statements.register(statement);
    }

    /// Remove a statement handle. Reports whether removal actually occurred.
    pub fn unregister(&self, statement: &Arc<dyn Statement>) -> bool {
        self.statements.unregister(statement)
    }

    /// Prepare a statement on `connection` and register it for teardown.
    pub fn prepare_statement(
        &self,
        connection: &Arc<dyn Connection>,
        sql: &str,
    ) -> Result<Arc<dyn Statement>, DriverError> {
        self.statements.prepare(connection, sql)
    }

    /// Prepare a callable statement on `connection` and register it for
    /// teardown.
    pub fn prepare_call(
        &self,
        connection: &Arc<dyn Connection>,
        sql: &str,
    ) -> Result<Arc<dyn Statement>, DriverError> {
        self.statements.prepare_call(connection, sql)
    }

    /// Best-effort close and unregister of the given statement handles.
    pub fn close(&self, statements: &[Arc<dyn Statement>]) {
        for statement in statements {
            if let Err(e) = statement.close() {
                warn!(sql = %statement.sql(), error = %e, "Failed to close statement");
            }
            self.statements.unregister(statement);
        }
    }

    /// Number of statements currently registered.
    pub fn statement_count(&self) -> usize {
        self.statements.count()
    }

    /// Metadata for every registered statement, in insertion order.
    pub fn registered_statements(&self) -> Vec<StatementMetadata> {
        self.statements.snapshot()
    }

    /// Enforce the required credential fields, filling in an auto-detected
    /// driver where the URL scheme identifies one.
    fn validate_credentials(
        &self,
        credentials: &mut Credentials,
        application: &str,
    ) -> AuthResult<()> {
        let url = match present(credentials.url.as_deref()) {
            Some(url) => url.to_string(),
            None => return Err(AuthError::configuration("url", application)),
        };

        if !self.drivers.is_driver_url(&url) {
            // Alternative connection types carry their own authentication.
            return Ok(());
        }

        if present(credentials.driver.as_deref()).is_none() {
            credentials.driver = self
                .drivers
                .driver_for_url(&url)
                .map(|d| d.name().to_string());
            match credentials.driver.as_deref() {
                Some(driver) => {
                    debug!(application, driver, "Auto-detected driver from URL scheme")
                }
                None => return Err(AuthError::configuration("driver", application)),
            }
        }
        if present(credentials.username.as_deref()).is_none() {
            return Err(AuthError::configuration("username", application));
        }
        if present(credentials.password.as_deref()).is_none() {
            return Err(AuthError::configuration("password", application));
        }
        Ok(())
    }

    /// Run the configured alive query against `connection`. With no query
    /// configured the connection is assumed alive; the probe is skipped on
    /// purpose.
    fn probe(&self, connection: &Arc<dyn Connection>) -> bool {
        let Some(sql) = self.hooks.alive_query() else {
            return true;
        };
        match connection.execute_query(sql) {
            Ok(true) => true,
            Ok(false) => {
                debug!(query = %sql, "Alive query returned no row");
                false
            }
            Err(e) => {
                debug!(query = %sql, error = %e, "Alive query failed");
                false
            }
        }
    }

    /// Tear down whatever is cached and open a fresh connection. On any
    /// failure the guard stays in the fully-closed state.
    fn reopen_locked(
        &self,
        state: &mut GuardState,
        credentials: Credentials,
        application: &str,
        config: Option<&ConfigTree>,
        config_version: i64,
    ) -> AuthResult<Arc<dyn Connection>> {
        self.teardown_locked(state);

        let opener = match self.drivers.resolve(&credentials) {
            Ok(opener) => opener,
            Err(source) => {
                let driver = credentials
                    .driver
                    .clone()
                    .unwrap_or_else(|| credentials.masked_url());
                return Err(AuthError::driver_load(driver, source));
            }
        };

        debug!(
            application,
            driver = %opener.driver_name(),
            url = %credentials.masked_url(),
            "Opening database connection"
        );
        let connection = match opener.open() {
            Ok(connection) => connection,
            Err(source) => {
                return Err(AuthError::connection_open(
                    credentials.masked_url(),
                    application,
                    source,
                ));
            }
        };

        let hook_result = match config {
            Some(config) => self.hooks.update_configuration(config),
            None => Ok(()),
        }
        .and_then(|()| self.hooks.init_statements(&connection, &self.statements));
        if let Err(source) = hook_result {
            self.abort_open(&connection);
            return Err(AuthError::connection_open(
                credentials.masked_url(),
                application,
                source,
            ));
        }

        state.config_version = config_version;
        state.application = Some(application.to_string());
        state.credentials = Some(credentials);
        state.connection = Some(Arc::clone(&connection));
        info!(application, "Database connection opened");
        Ok(connection)
    }

    /// Close statements, then the connection, then clear the cache. Tolerant
    /// of absent or already-closed state.
    fn teardown_locked(&self, state: &mut GuardState) {
        self.statements.close_all();
        if let Some(connection) = state.connection.take() {
            if !connection.is_closed() {
                if let Err(e) = connection.close() {
                    warn!(error = %e, "Failed to close connection");
                }
            }
        }
        state.credentials = None;
        state.application = None;
        state.config_version = VIRTUAL_CONFIG_VERSION;
    }

    /// A hook failed after the physical open: release everything the open
    /// produced before the error propagates.
    fn abort_open(&self, connection: &Arc<dyn Connection>) {
        warn!("Hook failed after open, tearing down");
        self.statements.close_all();
        if let Err(e) = connection.close() {
            warn!(error = %e, "Failed to close connection");
        }
    }

    fn current_config_version(&self) -> i64 {
        if self.zone.is_virtual() {
            VIRTUAL_CONFIG_VERSION
        } else {
            self.zone.last_modified()
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GuardState> {
        // A poisoned lock only means a panicking thread; the cached state is
        // still consistent enough to validate or tear down.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ConnectionGuard")
            .field("open", &state.connection.is_some())
            .field("application", &state.application)
            .field("config_version", &state.config_version)
            .field("statements", &self.statements.count())
            .finish()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
