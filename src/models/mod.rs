//! Data models for the session authentication backend.

pub mod credentials;
pub mod session;

pub use credentials::Credentials;
pub use session::{FileZone, Session, SimpleSession, VirtualZone, Zone, VIRTUAL_CONFIG_VERSION};
