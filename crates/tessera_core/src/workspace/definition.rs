//! Workspace declarations.

use crate::error::ConfigurationError;
use crate::schema::{check_key, KvDefinition, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Self-describing declaration of a workspace: identity, schema, and the
/// workspaces it depends on.
///
/// `epoch` selects the persisted snapshot generation; bumping it starts the
/// workspace from an empty document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDefinition {
    /// Unique id.
    pub id: String,
    /// Human-friendly slug.
    pub slug: String,
    /// Snapshot generation.
    #[serde(default)]
    pub epoch: u64,
    /// Declared tables.
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
    /// Declared settings.
    #[serde(default)]
    pub kv: Vec<KvDefinition>,
    /// Ids of workspaces that must be initialised first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl WorkspaceDefinition {
    /// Creates an empty declaration whose slug equals its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            slug: id.clone(),
            id,
            epoch: 0,
            tables: Vec::new(),
            kv: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Sets the slug.
    #[must_use]
    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    /// Sets the epoch.
    #[must_use]
    pub fn epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Declares a table.
    #[must_use]
    pub fn table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// Declares a setting.
    #[must_use]
    pub fn kv(mut self, kv: KvDefinition) -> Self {
        self.kv.push(kv);
        self
    }

    /// Declares a dependency on another workspace.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Checks every name, duplicate and default.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        check_key("workspace", &self.id)?;

        let mut tables = HashSet::new();
        for table in &self.tables {
            table.check()?;
            if !tables.insert(table.name.as_str()) {
                return Err(ConfigurationError::DuplicateTable {
                    name: table.name.clone(),
                });
            }
        }

        let mut keys = HashSet::new();
        for kv in &self.kv {
            kv.check()?;
            if !keys.insert(kv.key.as_str()) {
                return Err(ConfigurationError::DuplicateKvKey {
                    key: kv.key.clone(),
                });
            }
        }
        Ok(())
    }
}
