//! Replicas that exchange updates by hand.
//!
//! Sync tests need full control over delivery order, so these replicas have
//! no capabilities: updates move only when a test calls [`sync`].

use tessera_core::{Kv, Table, Tables, WorkspaceDefinition};
use tessera_doc::{ClientId, Doc, Origin};

/// One replica of a workspace: a document with its table and KV engines.
pub struct Replica {
    doc: Doc,
    tables: Tables,
    kv: Kv,
}

impl Replica {
    /// Creates an empty replica with a fixed client id.
    pub fn new(client: u64, definition: &WorkspaceDefinition) -> Self {
        Self::with_doc(Doc::with_client_id(ClientId::new(client)), definition)
    }

    /// Creates a replica whose document starts from `snapshot`.
    pub fn from_snapshot(client: u64, definition: &WorkspaceDefinition, snapshot: &[u8]) -> Self {
        let doc = Doc::with_client_id(ClientId::new(client));
        doc.apply_update(snapshot, Origin::named("snapshot"))
            .expect("Failed to replay snapshot");
        Self::with_doc(doc, definition)
    }

    fn with_doc(doc: Doc, definition: &WorkspaceDefinition) -> Self {
        let tables = Tables::new(&doc, &definition.tables).expect("Invalid table definitions");
        let kv = Kv::new(&doc, &definition.kv).expect("Invalid kv definitions");
        Self { doc, tables, kv }
    }

    /// The replica's document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Every declared table.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// A declared table; panics if it is not declared.
    pub fn table(&self, name: &str) -> &Table {
        self.tables.table(name).expect("Unknown table")
    }

    /// Shorthand for `table("posts")`.
    pub fn posts(&self) -> &Table {
        self.table("posts")
    }

    /// The settings store.
    pub fn kv(&self) -> &Kv {
        &self.kv
    }

    /// Full document state.
    pub fn snapshot(&self) -> Vec<u8> {
        self.doc
            .encode_state_as_update(None)
            .expect("Failed to encode snapshot")
    }
}

/// Encodes what `to` is missing from `from`.
pub fn diff(from: &Replica, to: &Replica) -> Vec<u8> {
    from.doc
        .encode_state_as_update(Some(&to.doc.state_vector()))
        .expect("Failed to encode update")
}

/// Delivers to `to` everything it is missing from `from`.
pub fn sync(from: &Replica, to: &Replica) {
    let update = diff(from, to);
    to.doc
        .apply_update(&update, Origin::Remote)
        .expect("Failed to apply update");
}

/// Syncs both directions.
pub fn sync_both(a: &Replica, b: &Replica) {
    sync(a, b);
    sync(b, a);
}

/// Syncs every pair until all replicas hold the same state.
pub fn sync_all(replicas: &[&Replica]) {
    for from in replicas {
        for to in replicas {
            if !from.doc.ptr_eq(&to.doc) {
                sync(from, to);
            }
        }
    }
}
