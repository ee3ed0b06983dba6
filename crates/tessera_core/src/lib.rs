//! # tessera core
//!
//! Schema-typed tables and settings over a replicated tessera document.
//!
//! This crate provides:
//! - Cell-indexed row storage: each row is a sequence of cell entries, so
//!   concurrent edits to different columns of one row both survive
//! - The [`Table`] engine with read-time validation and batched, classified
//!   change observation
//! - The [`Kv`] settings store with defaults and reset
//! - Workspace composition from a self-describing [`WorkspaceDefinition`]
//! - Capabilities: snapshot persistence, in-process broadcast sync, and a
//!   debounced relational mirror
//!
//! ## Key Invariants
//!
//! - Reads never fail: missing and invalid rows are [`RowResult`] variants
//! - Writes are never validated; invalid rows surface on read
//! - `update` never creates a row
//! - Change callbacks run once per transaction, after it committed, with
//!   every changed row classified as add, update or delete
//! - A table container is never deleted, only replaced by a concurrent one,
//!   and observers rebind to the replacement
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{ColumnDefinition, Row, TableDefinition, Tables};
//! use tessera_doc::Doc;
//!
//! let doc = Doc::new();
//! let posts = TableDefinition::new("posts")
//!     .column(ColumnDefinition::text("title"))
//!     .column(ColumnDefinition::integer("views").default_value(0i64));
//! let tables = Tables::new(&doc, &[posts]).unwrap();
//! let posts = tables.table("posts").unwrap();
//!
//! posts.upsert(Row::new("p1").with("title", "Hello")).unwrap();
//! let row = posts.get("p1").into_valid().unwrap();
//! assert_eq!(row.get_integer("views"), Some(0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod capability;
pub mod cell_store;
pub mod config;
pub mod error;
pub mod json;
pub mod kv;
pub mod row;
pub mod schema;
pub mod table;
pub mod workspace;

pub use capability::{
    BroadcastHandle, BroadcastHub, BroadcastSync, Capability, CapabilityContext,
    CapabilityFuture, CapabilityHandle, MemoryMirror, MirrorCapability, MirrorError,
    MirrorHandle, MirrorResult, MirrorStore, MirrorTable, PersistenceHandle,
    SnapshotPersistence, SyncMessage,
};
#[cfg(feature = "sqlite")]
pub use capability::SqliteMirror;
pub use cell_store::CellStore;
pub use config::{MirrorConfig, PersistenceConfig, WorkspaceConfig};
pub use error::{ConfigurationError, CoreError, CoreResult};
pub use kv::{Kv, KvChange, KvResult, ResetOutcome};
pub use row::Row;
pub use schema::{
    ColumnDefinition, ColumnKind, DateWithZone, FieldError, FieldErrorKind, KvDefinition,
    SchemaValidator, TableDefinition,
};
pub use table::{
    BatchOutcome, ChangeSubscription, InvalidRow, ObservationPhase, RowChange, RowResult, Table,
    Tables, WriteOutcome,
};
pub use workspace::{
    resolve_initialization_order, Workspace, WorkspaceBuilder, WorkspaceDefinition,
    WorkspaceRegistry,
};
