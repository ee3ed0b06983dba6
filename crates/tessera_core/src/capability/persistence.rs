//! Snapshot persistence.
//!
//! Layout under the configured root:
//!
//! ```text
//! <dir>/<workspace id>/<epoch>.tessera   full document state
//! <dir>/<workspace id>/schema.json       workspace declaration
//! <dir>/<workspace id>/settings.json     resolved settings
//! ```

use super::{Capability, CapabilityContext, CapabilityFuture, CapabilityHandle};
use crate::config::PersistenceConfig;
use crate::error::CoreResult;
use crate::json::value_to_json;
use crate::kv::{Kv, KvResult};
use crate::workspace::WorkspaceDefinition;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_doc::{Doc, Origin, Subscription};
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SNAPSHOT_EXTENSION: &str = "tessera";
const SCHEMA_FILE: &str = "schema.json";
const SETTINGS_FILE: &str = "settings.json";

/// Origin of the transaction that replays a snapshot.
pub const PERSISTENCE_ORIGIN: &str = "persistence";

/// Persists the workspace document as one binary snapshot per epoch.
///
/// On attach the snapshot of the current epoch, if any, is replayed into the
/// document. After that every document update schedules an atomic rewrite
/// of the snapshot. Write failures are logged; they never touch the
/// in-memory document.
#[derive(Debug, Clone)]
pub struct SnapshotPersistence {
    config: PersistenceConfig,
}

impl SnapshotPersistence {
    /// Creates the capability.
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    /// Path of the snapshot for a workspace and epoch.
    pub fn snapshot_path(dir: &Path, workspace: &str, epoch: u64) -> PathBuf {
        dir.join(workspace)
            .join(format!("{epoch}.{SNAPSHOT_EXTENSION}"))
    }
}

impl Capability for SnapshotPersistence {
    fn name(&self) -> &str {
        "persistence"
    }

    fn attach(&self, ctx: CapabilityContext) -> CapabilityFuture<Box<dyn CapabilityHandle>> {
        let config = self.config.clone();
        Box::pin(async move {
            let handle = PersistenceHandle::start(config, ctx).await?;
            Ok(Box::new(handle) as Box<dyn CapabilityHandle>)
        })
    }
}

struct SnapshotWriter {
    doc: Doc,
    kv: Kv,
    dir: PathBuf,
    path: PathBuf,
    json: bool,
    writes: AtomicU64,
}

impl SnapshotWriter {
    async fn write(&self) -> CoreResult<()> {
        let bytes = self.doc.encode_state_as_update(None)?;
        write_atomic(&self.dir, &self.path, &bytes).await?;
        if self.json {
            let settings = settings_json(&self.kv);
            let settings = serde_json::to_vec_pretty(&settings)?;
            write_atomic(&self.dir, &self.dir.join(SETTINGS_FILE), &settings).await?;
        }
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(path = %self.path.display(), bytes = bytes.len(), writes = n, "snapshot written");
        Ok(())
    }

    async fn write_logged(&self) {
        if let Err(error) = self.write().await {
            warn!(path = %self.path.display(), %error, "snapshot write failed");
        }
    }
}

/// Resolved settings as JSON: valid values, `null` otherwise.
fn settings_json(kv: &Kv) -> serde_json::Value {
    let map = kv
        .get_all()
        .into_iter()
        .map(|(key, result)| {
            let value = match result {
                KvResult::Valid(v) => value_to_json(&v),
                KvResult::Invalid { value, .. } => value_to_json(&value),
                KvResult::NotFound { .. } => serde_json::Value::Null,
            };
            (key, value)
        })
        .collect();
    serde_json::Value::Object(map)
}

/// Writes `bytes` to a temp file, syncs it, renames it over `path`, then
/// syncs the directory.
async fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&temp, path).await?;
    sync_directory(dir).await
}

#[cfg(unix)]
async fn sync_directory(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_directory(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Live persistence of one workspace.
pub struct PersistenceHandle {
    writer: Arc<SnapshotWriter>,
    subscription: Option<Subscription>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PersistenceHandle {
    async fn start(config: PersistenceConfig, ctx: CapabilityContext) -> CoreResult<Self> {
        let dir = config.dir.join(&ctx.id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = SnapshotPersistence::snapshot_path(&config.dir, &ctx.id, ctx.definition.epoch);

        load_snapshot(&ctx.document, &path).await?;
        if config.write_json_mirrors {
            write_schema(&dir, &ctx.definition).await?;
        }

        let writer = Arc::new(SnapshotWriter {
            doc: ctx.document.clone(),
            kv: ctx.kv.clone(),
            dir,
            path,
            json: config.write_json_mirrors,
            writes: AtomicU64::new(0),
        });

        let notify = Arc::new(Notify::new());
        let subscription = {
            let notify = notify.clone();
            ctx.document.observe_update(move |_, _| notify.notify_one())
        };

        let (shutdown, mut stop) = oneshot::channel();
        let task = {
            let writer = writer.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = notify.notified() => writer.write_logged().await,
                        _ = &mut stop => break,
                    }
                }
            })
        };

        info!(workspace = %ctx.id, path = %writer.path.display(), "persistence attached");
        Ok(Self {
            writer,
            subscription: Some(subscription),
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.writer.path
    }

    /// Number of snapshots written so far.
    pub fn writes(&self) -> u64 {
        self.writer.writes.load(Ordering::SeqCst)
    }

    /// Writes a snapshot now.
    pub async fn flush(&self) -> CoreResult<()> {
        self.writer.write().await
    }
}

async fn load_snapshot(doc: &Doc, path: &Path) -> CoreResult<()> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    match doc.apply_update(&bytes, Origin::named(PERSISTENCE_ORIGIN)) {
        Ok(()) => info!(path = %path.display(), bytes = bytes.len(), "snapshot loaded"),
        Err(error) => warn!(path = %path.display(), %error, "snapshot unreadable, starting empty"),
    }
    Ok(())
}

async fn write_schema(dir: &Path, definition: &WorkspaceDefinition) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(definition)?;
    write_atomic(dir, &dir.join(SCHEMA_FILE), &bytes).await?;
    Ok(())
}

impl CapabilityHandle for PersistenceHandle {
    fn name(&self) -> &str {
        "persistence"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn destroy(mut self: Box<Self>) -> CapabilityFuture<()> {
        Box::pin(async move {
            drop(self.subscription.take());
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(task) = self.task.take() {
                let _ = task.await;
            }
            self.writer.write().await
        })
    }
}
