//! Relational mirror of every valid row.
//!
//! The mirror is a secondary index outside the document. It is never merged:
//! every rebuild drops and recreates each table and re-inserts the rows that
//! currently validate. Rebuilds are debounced, so a burst of writes costs one
//! rebuild after the quiet period.

use super::{Capability, CapabilityContext, CapabilityFuture, CapabilityHandle};
use crate::config::MirrorConfig;
use crate::error::CoreResult;
use crate::row::Row;
use crate::schema::TableDefinition;
use crate::table::{ChangeSubscription, Tables};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tessera_doc::{Doc, Origin};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Origin of transactions that write mirror contents back into tables.
pub const MIRROR_ORIGIN: &str = "mirror";

/// Result type for mirror stores.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors raised by a [`MirrorStore`].
#[derive(Debug, Error)]
pub enum MirrorError {
    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error while encoding or decoding a structured cell.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row could not be turned back into cells.
    #[error("malformed row in mirror table {table}: {message}")]
    MalformedRow {
        /// Mirror table.
        table: String,
        /// What was wrong.
        message: String,
    },

    /// The blocking task running the store failed.
    #[error("mirror task failed: {0}")]
    Task(String),
}

/// One table's worth of mirror content.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorTable {
    /// Table declaration; drives the mirror's columns.
    pub definition: TableDefinition,
    /// Rows, valid at the time they were read.
    pub rows: Vec<Row>,
}

/// Storage behind a [`MirrorCapability`].
///
/// Calls are blocking; the capability runs them on the blocking pool.
pub trait MirrorStore: Send + Sync {
    /// Drops every given table and recreates it with exactly `rows`.
    fn replace_all(&self, tables: &[MirrorTable]) -> MirrorResult<()>;

    /// Reads back the rows of every declared table. Tables the mirror does
    /// not hold come back empty.
    fn read_all(&self, definitions: &[TableDefinition]) -> MirrorResult<Vec<MirrorTable>>;
}

/// In-memory [`MirrorStore`], for tests and tooling.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    replacements: AtomicU64,
}

impl MemoryMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently mirrored for `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Number of completed [`replace_all`](MirrorStore::replace_all) calls.
    pub fn replacements(&self) -> u64 {
        self.replacements.load(Ordering::SeqCst)
    }
}

impl MirrorStore for MemoryMirror {
    fn replace_all(&self, tables: &[MirrorTable]) -> MirrorResult<()> {
        let mut stored = self.tables.lock();
        for table in tables {
            stored.insert(table.definition.name.clone(), table.rows.clone());
        }
        self.replacements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_all(&self, definitions: &[TableDefinition]) -> MirrorResult<Vec<MirrorTable>> {
        let stored = self.tables.lock();
        Ok(definitions
            .iter()
            .map(|definition| MirrorTable {
                definition: definition.clone(),
                rows: stored.get(&definition.name).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMirror;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::{MirrorError, MirrorResult, MirrorStore, MirrorTable};
    use crate::json::{json_to_value, value_to_json};
    use crate::row::Row;
    use crate::schema::{ColumnDefinition, ColumnKind, TableDefinition};
    use parking_lot::Mutex;
    use rusqlite::types::Value as SqlValue;
    use rusqlite::{params_from_iter, Connection, OptionalExtension};
    use std::path::Path;
    use std::time::Duration;
    use tessera_codec::Value;
    use tracing::info;

    /// SQLite-backed [`MirrorStore`]. One SQL table per declared table, with
    /// `id` as primary key. Tags are stored as JSON text, booleans as 0/1.
    pub struct SqliteMirror {
        conn: Mutex<Connection>,
    }

    impl SqliteMirror {
        /// Opens (or creates) the mirror database at `path`.
        pub fn open(path: impl AsRef<Path>) -> MirrorResult<Self> {
            let path = path.as_ref();
            let conn = Connection::open(path)?;
            info!(path = %path.display(), "mirror database opened");
            Self::bootstrap(conn)
        }

        /// Opens a private in-memory mirror database.
        pub fn in_memory() -> MirrorResult<Self> {
            Self::bootstrap(Connection::open_in_memory()?)
        }

        fn bootstrap(conn: Connection) -> MirrorResult<Self> {
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        /// Runs `f` with the underlying connection, e.g. for ad-hoc queries.
        pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
            f(&self.conn.lock())
        }
    }

    impl std::fmt::Debug for SqliteMirror {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SqliteMirror").finish_non_exhaustive()
        }
    }

    fn sql_type(kind: &ColumnKind) -> &'static str {
        match kind {
            ColumnKind::Integer | ColumnKind::Boolean => "INTEGER",
            ColumnKind::Real => "REAL",
            _ => "TEXT",
        }
    }

    fn create_table_sql(definition: &TableDefinition) -> String {
        let columns: Vec<String> = definition
            .columns
            .iter()
            .map(|c| {
                let key = if c.name == "id" { " PRIMARY KEY" } else { "" };
                format!("\"{}\" {}{key}", c.name, sql_type(&c.kind))
            })
            .collect();
        format!("CREATE TABLE \"{}\" ({});", definition.name, columns.join(", "))
    }

    fn to_sql(column: &ColumnDefinition, value: Option<&Value>) -> MirrorResult<SqlValue> {
        Ok(match value {
            None | Some(Value::Null) => SqlValue::Null,
            Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            Some(Value::Integer(i)) if column.kind == ColumnKind::Real => SqlValue::Real(*i as f64),
            Some(Value::Integer(i)) => SqlValue::Integer(*i),
            Some(Value::Float(f)) => SqlValue::Real(*f),
            Some(Value::Text(s)) => SqlValue::Text(s.clone()),
            Some(Value::Bytes(b)) => SqlValue::Blob(b.clone()),
            Some(other) => SqlValue::Text(serde_json::to_string(&value_to_json(other))?),
        })
    }

    fn from_sql(table: &str, column: &ColumnDefinition, value: SqlValue) -> MirrorResult<Value> {
        let malformed = || MirrorError::MalformedRow {
            table: table.to_string(),
            message: format!("unexpected value in column {}", column.name),
        };
        Ok(match (&column.kind, value) {
            (_, SqlValue::Null) => Value::Null,
            (ColumnKind::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (ColumnKind::Real, SqlValue::Integer(i)) => Value::Float(i as f64),
            (ColumnKind::Tags { .. }, SqlValue::Text(s)) => {
                json_to_value(&serde_json::from_str(&s)?)
            }
            (_, SqlValue::Integer(i)) => Value::Integer(i),
            (_, SqlValue::Real(f)) if f.is_nan() => return Err(malformed()),
            (_, SqlValue::Real(f)) => Value::Float(f),
            (_, SqlValue::Text(s)) => Value::Text(s),
            (_, SqlValue::Blob(b)) => Value::Bytes(b),
        })
    }

    fn read_table(conn: &Connection, definition: &TableDefinition) -> MirrorResult<Vec<Row>> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&definition.name],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        let columns: Vec<String> = definition
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let sql = format!(
            "SELECT {} FROM \"{}\" ORDER BY \"id\";",
            columns.join(", "),
            definition.name
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(sql_row) = rows.next()? {
            let mut cells = Vec::with_capacity(definition.columns.len());
            for (index, column) in definition.columns.iter().enumerate() {
                let raw: SqlValue = sql_row.get(index)?;
                cells.push((column.name.as_str(), from_sql(&definition.name, column, raw)?));
            }
            let id = match cells.iter().find(|(name, _)| *name == "id") {
                Some((_, Value::Text(id))) => id.clone(),
                _ => {
                    return Err(MirrorError::MalformedRow {
                        table: definition.name.clone(),
                        message: "row without text id".into(),
                    })
                }
            };
            let row = cells
                .into_iter()
                .fold(Row::new(id), |row, (name, value)| row.with(name, value));
            out.push(row);
        }
        Ok(out)
    }

    impl MirrorStore for SqliteMirror {
        fn replace_all(&self, tables: &[MirrorTable]) -> MirrorResult<()> {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for table in tables {
                let definition = &table.definition;
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS \"{}\"; {}",
                    definition.name,
                    create_table_sql(definition)
                ))?;

                let names: Vec<String> = definition
                    .columns
                    .iter()
                    .map(|c| format!("\"{}\"", c.name))
                    .collect();
                let slots: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({});",
                    definition.name,
                    names.join(", "),
                    slots.join(", ")
                );
                let mut stmt = tx.prepare(&sql)?;
                for row in &table.rows {
                    let values = definition
                        .columns
                        .iter()
                        .map(|c| to_sql(c, row.get(&c.name)))
                        .collect::<MirrorResult<Vec<_>>>()?;
                    stmt.execute(params_from_iter(values))?;
                }
            }
            tx.commit()?;
            Ok(())
        }

        fn read_all(&self, definitions: &[TableDefinition]) -> MirrorResult<Vec<MirrorTable>> {
            let conn = self.conn.lock();
            definitions
                .iter()
                .map(|definition| {
                    Ok(MirrorTable {
                        definition: definition.clone(),
                        rows: read_table(&conn, definition)?,
                    })
                })
                .collect()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn notes() -> TableDefinition {
            TableDefinition::new("notes")
                .column(ColumnDefinition::text("title"))
                .column(ColumnDefinition::boolean("pinned"))
                .column(ColumnDefinition::real("score"))
                .column(ColumnDefinition::tags("labels"))
                .column(ColumnDefinition::text("body").nullable())
        }

        #[test]
        fn rows_survive_the_round_trip() {
            let mirror = SqliteMirror::in_memory().unwrap();
            let rows = vec![
                Row::new("a")
                    .with("title", "first")
                    .with("pinned", true)
                    .with("score", 2.5)
                    .with("labels", vec!["x".to_string(), "y".to_string()])
                    .with("body", Value::Null),
                Row::new("b")
                    .with("title", "second")
                    .with("pinned", false)
                    .with("score", 0.0)
                    .with("labels", Vec::<String>::new())
                    .with("body", "text"),
            ];
            mirror
                .replace_all(&[MirrorTable {
                    definition: notes(),
                    rows: rows.clone(),
                }])
                .unwrap();

            let read = mirror.read_all(&[notes()]).unwrap();
            assert_eq!(read[0].rows, rows);

            let count: i64 = mirror.with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM notes WHERE pinned = 1", [], |r| r.get(0))
                    .unwrap()
            });
            assert_eq!(count, 1);
        }

        #[test]
        fn replace_drops_previous_rows() {
            let mirror = SqliteMirror::in_memory().unwrap();
            let table = |rows| MirrorTable {
                definition: TableDefinition::new("t").column(ColumnDefinition::text("v")),
                rows,
            };
            mirror
                .replace_all(&[table(vec![Row::new("old").with("v", "1")])])
                .unwrap();
            mirror
                .replace_all(&[table(vec![Row::new("new").with("v", "2")])])
                .unwrap();
            let read = mirror.read_all(&[table(vec![]).definition]).unwrap();
            let ids: Vec<_> = read[0].rows.iter().map(|r| r.id().to_string()).collect();
            assert_eq!(ids, vec!["new"]);
        }

        #[test]
        fn missing_table_reads_empty() {
            let mirror = SqliteMirror::in_memory().unwrap();
            let read = mirror.read_all(&[notes()]).unwrap();
            assert!(read[0].rows.is_empty());
        }
    }
}

/// Capability keeping a [`MirrorStore`] eventually consistent with the
/// workspace tables.
#[derive(Clone)]
pub struct MirrorCapability {
    store: Arc<dyn MirrorStore>,
    config: MirrorConfig,
}

impl MirrorCapability {
    /// Creates the capability over `store`.
    pub fn new(store: impl MirrorStore + 'static, config: MirrorConfig) -> Self {
        Self::shared(Arc::new(store), config)
    }

    /// Creates the capability over a store the caller keeps a handle to.
    pub fn shared(store: Arc<dyn MirrorStore>, config: MirrorConfig) -> Self {
        Self { store, config }
    }
}

impl std::fmt::Debug for MirrorCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCapability")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Capability for MirrorCapability {
    fn name(&self) -> &str {
        "mirror"
    }

    fn attach(&self, ctx: CapabilityContext) -> CapabilityFuture<Box<dyn CapabilityHandle>> {
        let store = self.store.clone();
        let config = self.config.clone();
        Box::pin(async move {
            let handle = MirrorHandle::start(store, config, ctx).await?;
            Ok(Box::new(handle) as Box<dyn CapabilityHandle>)
        })
    }
}

struct Runtime {
    subscriptions: Vec<ChangeSubscription>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct MirrorInner {
    workspace: String,
    doc: Doc,
    tables: Tables,
    store: Arc<dyn MirrorStore>,
    writing_back: Arc<AtomicBool>,
    rebuilds: AtomicU64,
    // Serialises rebuilds and write-backs.
    exclusive: tokio::sync::Mutex<()>,
    runtime: Mutex<Option<Runtime>>,
}

impl MirrorInner {
    async fn rebuild(&self) -> CoreResult<()> {
        let _exclusive = self.exclusive.lock().await;
        let snapshot: Vec<MirrorTable> = self
            .tables
            .iter()
            .map(|table| MirrorTable {
                definition: table.definition().clone(),
                rows: table.get_all_valid(),
            })
            .collect();
        let rows: usize = snapshot.iter().map(|t| t.rows.len()).sum();

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.replace_all(&snapshot))
            .await
            .map_err(|e| MirrorError::Task(e.to_string()))??;

        let n = self.rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(workspace = %self.workspace, rows, rebuilds = n, "mirror rebuilt");
        Ok(())
    }

    async fn write_back(&self) -> CoreResult<()> {
        let _exclusive = self.exclusive.lock().await;
        let definitions: Vec<TableDefinition> = self
            .tables
            .iter()
            .map(|table| table.definition().clone())
            .collect();
        let store = self.store.clone();
        let mirrored = tokio::task::spawn_blocking(move || store.read_all(&definitions))
            .await
            .map_err(|e| MirrorError::Task(e.to_string()))??;

        self.writing_back.store(true, Ordering::SeqCst);
        let result = self
            .doc
            .transact_with(Origin::named(MIRROR_ORIGIN), |_| -> CoreResult<usize> {
                let mut rows = 0;
                for mirror in mirrored {
                    let table = self.tables.table(&mirror.definition.name)?;
                    rows += mirror.rows.len();
                    table.clear()?;
                    table.upsert_many(mirror.rows)?;
                }
                Ok(rows)
            });
        self.writing_back.store(false, Ordering::SeqCst);

        let rows = result?;
        info!(workspace = %self.workspace, rows, "mirror pushed into tables");
        Ok(())
    }
}

/// Live mirror of one workspace.
///
/// Cloning yields another handle to the same mirror, so it can be taken out
/// of [`Workspace::with_capability`](crate::Workspace::with_capability) and
/// awaited on.
#[derive(Clone)]
pub struct MirrorHandle {
    inner: Arc<MirrorInner>,
}

impl MirrorHandle {
    async fn start(
        store: Arc<dyn MirrorStore>,
        config: MirrorConfig,
        ctx: CapabilityContext,
    ) -> CoreResult<Self> {
        let inner = Arc::new(MirrorInner {
            workspace: ctx.id.clone(),
            doc: ctx.document.clone(),
            tables: ctx.tables.clone(),
            store,
            writing_back: Arc::new(AtomicBool::new(false)),
            rebuilds: AtomicU64::new(0),
            exclusive: tokio::sync::Mutex::new(()),
            runtime: Mutex::new(None),
        });

        let notify = Arc::new(Notify::new());
        let subscriptions = ctx
            .tables
            .iter()
            .map(|table| {
                let notify = notify.clone();
                let writing_back = inner.writing_back.clone();
                let workspace = inner.workspace.clone();
                table.observe_changes(move |changes, _| {
                    if writing_back.load(Ordering::SeqCst) {
                        debug!(workspace = %workspace, rows = changes.len(), "ignoring mirror write-back");
                        return;
                    }
                    notify.notify_one();
                })
            })
            .collect();

        let (shutdown, stop) = oneshot::channel();
        let task = tokio::spawn(debounce(
            Arc::downgrade(&inner),
            notify,
            config.debounce,
            stop,
        ));
        *inner.runtime.lock() = Some(Runtime {
            subscriptions,
            shutdown,
            task,
        });

        if config.rebuild_on_attach {
            inner.rebuild().await?;
        }
        info!(workspace = %inner.workspace, debounce_ms = config.debounce.as_millis() as u64, "mirror attached");
        Ok(Self { inner })
    }

    /// Rebuilds the mirror from the tables now.
    pub async fn pull_to_mirror(&self) -> CoreResult<()> {
        self.inner.rebuild().await
    }

    /// Replaces every table's rows with the mirror's rows, in one
    /// transaction.
    ///
    /// Destructive: rows absent from the mirror are deleted. The write-back
    /// does not schedule a rebuild of its own.
    pub async fn push_from_mirror(&self) -> CoreResult<()> {
        self.inner.write_back().await
    }

    /// Number of completed rebuilds.
    pub fn rebuilds(&self) -> u64 {
        self.inner.rebuilds.load(Ordering::SeqCst)
    }

    /// The store behind this mirror.
    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.inner.store
    }
}

/// Rebuilds once no change arrived for `quiet`.
async fn debounce(
    inner: Weak<MirrorInner>,
    notify: Arc<Notify>,
    quiet: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = notify.notified() => {}
            _ = &mut stop => return,
        }
        loop {
            tokio::select! {
                _ = notify.notified() => continue,
                _ = tokio::time::sleep(quiet) => break,
                _ = &mut stop => return,
            }
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Err(error) = inner.rebuild().await {
            warn!(workspace = %inner.workspace, %error, "mirror rebuild failed");
        }
    }
}

impl CapabilityHandle for MirrorHandle {
    fn name(&self) -> &str {
        "mirror"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn destroy(self: Box<Self>) -> CapabilityFuture<()> {
        Box::pin(async move {
            let runtime = self.inner.runtime.lock().take();
            if let Some(runtime) = runtime {
                drop(runtime.subscriptions);
                let _ = runtime.shutdown.send(());
                let _ = runtime.task.await;
            }
            debug!(workspace = %self.inner.workspace, "mirror detached");
            Ok(())
        })
    }
}
