//! Workspace fixtures.
//!
//! A small blog schema that exercises every column shape the table engine
//! cares about: a required column, a defaulted column, a nullable one, and
//! settings with and without options.

use std::path::Path;
use tessera_core::{
    ColumnDefinition, KvDefinition, PersistenceConfig, Row, SnapshotPersistence, TableDefinition,
    Workspace, WorkspaceBuilder, WorkspaceConfig, WorkspaceDefinition,
};

/// `posts`: required `title`, `views` defaulting to 0, nullable `labels`,
/// `published` defaulting to false.
pub fn posts_table() -> TableDefinition {
    TableDefinition::new("posts")
        .column(ColumnDefinition::text("title"))
        .column(ColumnDefinition::integer("views").default_value(0i64))
        .column(ColumnDefinition::tags("labels").nullable())
        .column(ColumnDefinition::boolean("published").default_value(false))
}

/// `authors`: required `name`.
pub fn authors_table() -> TableDefinition {
    TableDefinition::new("authors").column(ColumnDefinition::text("name"))
}

/// The blog workspace: `posts`, `authors`, and the `fontSize` (default 14)
/// and `theme` (light/dark, default light) settings.
pub fn blog_definition() -> WorkspaceDefinition {
    WorkspaceDefinition::new("blog")
        .table(posts_table())
        .table(authors_table())
        .kv(KvDefinition::new(
            "fontSize",
            ColumnDefinition::integer("fontSize").default_value(14i64),
        ))
        .kv(KvDefinition::new(
            "theme",
            ColumnDefinition::select("theme", ["light", "dark"]).default_value("light"),
        ))
}

/// A post with the given title.
pub fn post(id: &str, title: &str) -> Row {
    Row::new(id).with("title", title)
}

/// Builds the blog workspace in memory, without capabilities.
pub async fn memory_workspace(client: u64) -> Workspace {
    WorkspaceBuilder::new(blog_definition())
        .config(WorkspaceConfig::new().client_id(client))
        .build()
        .await
        .expect("Failed to build workspace")
}

/// Builds the blog workspace with snapshot persistence under `dir`.
pub async fn persistent_workspace(dir: &Path, client: u64) -> Workspace {
    WorkspaceBuilder::new(blog_definition())
        .config(WorkspaceConfig::new().client_id(client))
        .capability(SnapshotPersistence::new(PersistenceConfig::new(dir)))
        .build()
        .await
        .expect("Failed to build persistent workspace")
}
