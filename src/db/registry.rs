//! Statement registry.
//!
//! Owns every prepared or callable statement created against the guarded
//! connection so teardown can close them all. Entries are deduplicated by
//! handle identity and kept in insertion order; the backing store is
//! allocated lazily on first registration and discarded on bulk close.

use crate::db::driver::{Connection, DriverError, Statement};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Metadata about a registered statement (for listing without touching the
/// handle).
#[derive(Debug, Clone)]
pub struct StatementMetadata {
    /// Registry identifier, used for log correlation
    pub id: String,
    /// SQL text the statement was prepared from
    pub sql: String,
    /// When the statement was registered
    pub registered_at: DateTime<Utc>,
}

struct RegisteredStatement {
    id: String,
    handle: Arc<dyn Statement>,
    registered_at: DateTime<Utc>,
}

/// Insertion-ordered, deduplicated collection of open statements tied to
/// one guarded connection.
#[derive(Default)]
pub struct StatementRegistry {
    statements: Mutex<Option<Vec<RegisteredStatement>>>,
}

impl StatementRegistry {
    /// Create an empty registry. No backing store is allocated until the
    /// first registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement handle. Re-registering an already-registered
    /// handle is a no-op.
    pub fn register(&self, statement: Arc<dyn Statement>) {
        let mut store = self.lock();
        let entries = store.get_or_insert_with(Vec::new);
        if entries.iter().any(|e| Arc::ptr_eq(&e.handle, &statement)) {
            debug!(sql = %statement.sql(), "Statement already registered");
            return;
        }
        let id = generate_statement_id();
        debug!(statement_id = %id, sql = %statement.sql(), "Statement registered");
        entries.push(RegisteredStatement {
            id,
            handle: statement,
            registered_at: Utc::now(),
        });
    }

    /// Remove a statement handle. Reports whether removal actually occurred.
    pub fn unregister(&self, statement: &Arc<dyn Statement>) -> bool {
        let mut store = self.lock();
        let Some(entries) = store.as_mut() else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !Arc::ptr_eq(&e.handle, statement));
        let removed = entries.len() < before;
        if removed {
            debug!(sql = %statement.sql(), "Statement unregistered");
        }
        removed
    }

    /// Prepare a statement on `connection` and register it.
    pub fn prepare(
        &self,
        connection: &Arc<dyn Connection>,
        sql: &str,
    ) -> Result<Arc<dyn Statement>, DriverError> {
        let statement = connection.prepare_statement(sql)?;
        self.register(Arc::clone(&statement));
        Ok(statement)
    }

    /// Prepare a callable statement on `connection` and register it.
    pub fn prepare_call(
        &self,
        connection: &Arc<dyn Connection>,
        sql: &str,
    ) -> Result<Arc<dyn Statement>, DriverError> {
        let statement = connection.prepare_call(sql)?;
        self.register(Arc::clone(&statement));
        Ok(statement)
    }

    /// Close every registered statement, ignoring individual failures, and
    /// discard the backing store.
    pub fn close_all(&self) {
        let drained = self.lock().take();
        let Some(entries) = drained else {
            return;
        };
        debug!(count = entries.len(), "Closing registered statements");
        for entry in entries {
            if let Err(e) = entry.handle.close() {
                warn!(
                    statement_id = %entry.id,
                    sql = %entry.handle.sql(),
                    error = %e,
                    "Failed to close statement"
                );
            }
        }
    }

    /// Number of currently registered statements.
    pub fn count(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Metadata for every registered statement, in insertion order.
    pub fn snapshot(&self) -> Vec<StatementMetadata> {
        self.lock()
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| StatementMetadata {
                        id: e.id.clone(),
                        sql: e.handle.sql().to_string(),
                        registered_at: e.registered_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<RegisteredStatement>>> {
        // A poisoned lock only means a panicking thread; closing what was
        // registered so far is still the right teardown.
        self.statements.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for StatementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementRegistry")
            .field("count", &self.count())
            .finish()
    }
}

/// Generate a unique statement ID.
fn generate_statement_id() -> String {
    format!("stmt_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeStatement {
        sql: String,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl FakeStatement {
        fn new(sql: &str) -> Arc<dyn Statement> {
            Arc::new(Self {
                sql: sql.to_string(),
                closed: AtomicBool::new(false),
                fail_close: false,
            })
        }

        fn failing(sql: &str) -> Arc<dyn Statement> {
            Arc::new(Self {
                sql: sql.to_string(),
                closed: AtomicBool::new(false),
                fail_close: true,
            })
        }
    }

    impl Statement for FakeStatement {
        fn sql(&self) -> &str {
            &self.sql
        }

        fn close(&self) -> Result<(), DriverError> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(DriverError::new("close failed"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_statement_id_format() {
        let id = generate_statement_id();
        assert!(id.starts_with("stmt_"));
        assert_eq!(id.len(), 5 + 32); // "stmt_" + 32 hex chars
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = StatementRegistry::new();
        let stmt = FakeStatement::new("select 1");
        registry.register(Arc::clone(&stmt));
        registry.register(Arc::clone(&stmt));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_unregister_reports_removal() {
        let registry = StatementRegistry::new();
        let stmt = FakeStatement::new("select 1");
        registry.register(Arc::clone(&stmt));
        assert!(registry.unregister(&stmt));
        assert!(!registry.unregister(&stmt));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unregister_on_empty_registry() {
        let registry = StatementRegistry::new();
        let stmt = FakeStatement::new("select 1");
        assert!(!registry.unregister(&stmt));
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let registry = StatementRegistry::new();
        registry.register(FakeStatement::new("select 1"));
        registry.register(FakeStatement::new("select 2"));
        registry.register(FakeStatement::new("select 3"));

        let sqls: Vec<String> = registry.snapshot().into_iter().map(|m| m.sql).collect();
        assert_eq!(sqls, vec!["select 1", "select 2", "select 3"]);
    }

    #[test]
    fn test_close_all_closes_and_discards() {
        let registry = StatementRegistry::new();
        let stmt = Arc::new(FakeStatement {
            sql: "select 1".to_string(),
            closed: AtomicBool::new(false),
            fail_close: false,
        });
        registry.register(stmt.clone() as Arc<dyn Statement>);
        registry.close_all();
        assert!(stmt.closed.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_close_all_swallows_individual_failures() {
        let registry = StatementRegistry::new();
        let ok = Arc::new(FakeStatement {
            sql: "select ok".to_string(),
            closed: AtomicBool::new(false),
            fail_close: false,
        });
        registry.register(FakeStatement::failing("select bad"));
        registry.register(ok.clone() as Arc<dyn Statement>);

        registry.close_all();
        // The failure of the first close must not prevent the second.
        assert!(ok.closed.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_close_all_on_empty_registry_is_noop() {
        let registry = StatementRegistry::new();
        registry.close_all();
        registry.close_all();
        assert_eq!(registry.count(), 0);
    }
}
