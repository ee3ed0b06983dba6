//! Error types for tessera core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tessera core operations.
///
/// Reads never produce these: missing and invalid rows are
/// [`RowResult`](crate::RowResult) variants, and local no-op writes report a
/// [`WriteOutcome`](crate::WriteOutcome).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Replicated document error.
    #[error("document error: {0}")]
    Doc(#[from] tessera_doc::DocError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tessera_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error while writing or reading a human-readable mirror.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Build-time misconfiguration. Fatal.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Table is not declared in the workspace schema.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// Name that was requested.
        name: String,
    },

    /// KV key is not declared in the workspace schema.
    #[error("unknown kv key: {key}")]
    UnknownKvKey {
        /// Key that was requested.
        key: String,
    },

    /// A capability failed to attach or tear down.
    #[error("capability {name} failed: {message}")]
    Capability {
        /// Capability name.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// Relational mirror error.
    #[error("mirror error: {0}")]
    Mirror(#[from] crate::capability::MirrorError),
}

impl CoreError {
    /// Creates a capability error.
    pub fn capability(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Creates an unknown kv key error.
    pub fn unknown_kv_key(key: impl Into<String>) -> Self {
        Self::UnknownKvKey { key: key.into() }
    }

    /// Returns true for build-time misconfiguration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CoreError::Configuration(_))
    }
}

/// Build-time misconfiguration of workspaces and their schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Two workspace definitions share an id.
    #[error("duplicate workspace id: {id}")]
    DuplicateWorkspaceId {
        /// Offending id.
        id: String,
    },

    /// A workspace depends on one that was not declared.
    #[error("workspace {workspace} depends on undeclared workspace {dependency}")]
    MissingDependency {
        /// Dependent workspace.
        workspace: String,
        /// Dependency that is missing.
        dependency: String,
    },

    /// Workspace dependencies form a cycle.
    #[error("dependency cycle between workspaces: {}", workspaces.join(", "))]
    DependencyCycle {
        /// Workspaces that could not be ordered.
        workspaces: Vec<String>,
    },

    /// A table, column or kv name does not match `^[A-Za-z][A-Za-z0-9_]*$`.
    #[error("invalid {what} name: {name:?}")]
    InvalidKey {
        /// What was being named ("table", "column", "kv key", "workspace").
        what: &'static str,
        /// Offending name.
        name: String,
    },

    /// Two tables share a name.
    #[error("duplicate table: {name}")]
    DuplicateTable {
        /// Offending name.
        name: String,
    },

    /// Two columns of one table share a name.
    #[error("duplicate column {column} in table {table}")]
    DuplicateColumn {
        /// Table being declared.
        table: String,
        /// Offending column.
        column: String,
    },

    /// Two kv entries share a key.
    #[error("duplicate kv key: {key}")]
    DuplicateKvKey {
        /// Offending key.
        key: String,
    },

    /// A column definition is inconsistent (bad default, empty options).
    #[error("invalid column {column} in {owner}: {message}")]
    InvalidColumn {
        /// Table name, or "kv".
        owner: String,
        /// Offending column.
        column: String,
        /// Description of the problem.
        message: String,
    },
}
