//! Session and deployment unit collaborators.
//!
//! The authentication backend only needs a narrow view of the surrounding
//! application server: a session knows which application it belongs to and
//! carries that application's configuration tree, and a zone (deployment
//! unit) reports whether its configuration is file-backed and when the file
//! last changed.

use crate::config::ConfigTree;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

/// Config version meaning "always treat as changed".
///
/// Cached for virtual zones and whenever no modification time can be
/// determined, forcing a reopen on the next staleness check.
pub const VIRTUAL_CONFIG_VERSION: i64 = -1;

/// The unit of application deployment; may be file-backed (modification
/// time trackable) or virtual.
pub trait Zone: Send + Sync {
    /// True when this zone has no backing configuration file.
    fn is_virtual(&self) -> bool;

    /// Modification time of the backing configuration file in milliseconds
    /// since the epoch, or [`VIRTUAL_CONFIG_VERSION`] when unavailable.
    fn last_modified(&self) -> i64;
}

/// A zone backed by a configuration file on disk.
#[derive(Debug, Clone)]
pub struct FileZone {
    path: PathBuf,
}

impl FileZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Zone for FileZone {
    fn is_virtual(&self) -> bool {
        false
    }

    fn last_modified(&self) -> i64 {
        let modified = std::fs::metadata(&self.path).and_then(|m| m.modified());
        match modified {
            Ok(time) => match time.duration_since(UNIX_EPOCH) {
                Ok(elapsed) => elapsed.as_millis() as i64,
                Err(_) => VIRTUAL_CONFIG_VERSION,
            },
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read zone modification time"
                );
                VIRTUAL_CONFIG_VERSION
            }
        }
    }
}

/// A zone with no backing file; always treated as changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualZone;

impl Zone for VirtualZone {
    fn is_virtual(&self) -> bool {
        true
    }

    fn last_modified(&self) -> i64 {
        VIRTUAL_CONFIG_VERSION
    }
}

/// An authenticating session of one application deployment.
pub trait Session: Send + Sync {
    /// Name of the application this session authenticates against.
    fn application_name(&self) -> &str;

    /// The application's configuration tree.
    fn config(&self) -> &ConfigTree;
}

/// Minimal owned [`Session`] implementation.
#[derive(Debug, Clone)]
pub struct SimpleSession {
    application_name: String,
    config: ConfigTree,
}

impl SimpleSession {
    pub fn new(application_name: impl Into<String>, config: ConfigTree) -> Self {
        Self {
            application_name: application_name.into(),
            config,
        }
    }
}

impl Session for SimpleSession {
    fn application_name(&self) -> &str {
        &self.application_name
    }

    fn config(&self) -> &ConfigTree {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_virtual_zone_always_changed() {
        let zone = VirtualZone;
        assert!(zone.is_virtual());
        assert_eq!(zone.last_modified(), VIRTUAL_CONFIG_VERSION);
    }

    #[test]
    fn test_file_zone_reads_mtime() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config").unwrap();
        let zone = FileZone::new(file.path());
        assert!(!zone.is_virtual());
        assert!(zone.last_modified() > 0);
    }

    #[test]
    fn test_file_zone_missing_file_is_always_changed() {
        let zone = FileZone::new("/nonexistent/zone/app.conf");
        assert_eq!(zone.last_modified(), VIRTUAL_CONFIG_VERSION);
    }

    #[test]
    fn test_simple_session() {
        let config = ConfigTree::new().with_property("/application/name", "demo");
        let session = SimpleSession::new("demo", config);
        assert_eq!(session.application_name(), "demo");
        assert_eq!(session.config().get_property("/application/name"), Some("demo"));
    }
}
