//! Database connection lifecycle layer.
//!
//! This module provides the guarded-connection functionality:
//! - Driver seam and driver registry
//! - Credential resolution from the configuration tree
//! - Statement registry for guaranteed teardown
//! - The connection guard orchestrating all of the above

pub mod driver;
pub mod guard;
pub mod registry;
pub mod resolver;

pub use driver::{Connection, ConnectionOpener, Driver, DriverError, DriverRegistry, Statement};
pub use guard::{ConnectionGuard, GuardHooks, NoopHooks};
pub use registry::{StatementMetadata, StatementRegistry};
pub use resolver::{resolve_credentials, resolve_for_session};
