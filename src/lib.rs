//! Database-backed session authentication support.
//!
//! This library provides the connection lifecycle layer of a pluggable
//! authentication backend: every application deployment shares one guarded
//! database connection that is validated, transparently refreshed on
//! credential or configuration change, and torn down together with all of
//! its prepared statements. Authorization policies are pluggable through an
//! explicit registry.

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use access::{
    AccessController, AccessControllerFactory, AccessControllerRegistry, AllowAllAccessController,
};
pub use config::ConfigTree;
pub use db::{ConnectionGuard, DriverRegistry, GuardHooks, StatementRegistry};
pub use error::{AuthError, AuthResult};
pub use models::{Credentials, FileZone, Session, SimpleSession, VirtualZone, Zone};
