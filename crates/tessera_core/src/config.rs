//! Workspace and capability configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for building a workspace.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    /// Client ID of the local replica. Random when `None`.
    ///
    /// Two live replicas must never share a client ID.
    pub client_id: Option<u64>,
}

impl WorkspaceConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the local client ID.
    #[must_use]
    pub const fn client_id(mut self, id: u64) -> Self {
        self.client_id = Some(id);
        self
    }
}

/// Configuration for the relational mirror capability.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Quiet period after the last table change before the mirror is rebuilt.
    pub debounce: Duration,
    /// Whether to rebuild the mirror once when the capability attaches.
    pub rebuild_on_attach: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            rebuild_on_attach: true,
        }
    }
}

impl MirrorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the debounce quiet period.
    #[must_use]
    pub const fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets whether to rebuild on attach.
    #[must_use]
    pub const fn rebuild_on_attach(mut self, value: bool) -> Self {
        self.rebuild_on_attach = value;
        self
    }
}

/// Configuration for snapshot persistence.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Root directory. Snapshots land in `<dir>/<workspace id>/`.
    pub dir: PathBuf,
    /// Whether to also write `schema.json` and `settings.json`.
    pub write_json_mirrors: bool,
}

impl PersistenceConfig {
    /// Creates a configuration rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_json_mirrors: true,
        }
    }

    /// Sets whether to write the JSON mirrors.
    #[must_use]
    pub fn write_json_mirrors(mut self, value: bool) -> Self {
        self.write_json_mirrors = value;
        self
    }
}
