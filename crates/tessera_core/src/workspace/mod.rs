//! Workspace composition: one document, its tables and settings, and the
//! capabilities attached to it.

mod builder;
mod definition;
mod graph;

pub use builder::WorkspaceBuilder;
pub use definition::WorkspaceDefinition;
pub use graph::resolve_initialization_order;

use crate::capability::{Capability, CapabilityHandle};
use crate::config::WorkspaceConfig;
use crate::error::{ConfigurationError, CoreResult};
use crate::kv::Kv;
use crate::table::{Table, Tables};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_doc::Doc;
use tracing::{debug, info, warn};

/// A built workspace.
///
/// Cloning yields another handle to the same workspace.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

struct WorkspaceInner {
    definition: Arc<WorkspaceDefinition>,
    doc: Doc,
    tables: Tables,
    kv: Kv,
    handles: Mutex<Vec<Box<dyn CapabilityHandle>>>,
}

impl Workspace {
    fn new(
        definition: Arc<WorkspaceDefinition>,
        doc: Doc,
        tables: Tables,
        kv: Kv,
        handles: Vec<Box<dyn CapabilityHandle>>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkspaceInner {
                definition,
                doc,
                tables,
                kv,
                handles: Mutex::new(handles),
            }),
        }
    }

    /// Workspace id.
    pub fn id(&self) -> &str {
        &self.inner.definition.id
    }

    /// Workspace slug.
    pub fn slug(&self) -> &str {
        &self.inner.definition.slug
    }

    /// Snapshot generation.
    pub fn epoch(&self) -> u64 {
        self.inner.definition.epoch
    }

    /// Declaration the workspace was built from.
    pub fn definition(&self) -> &WorkspaceDefinition {
        &self.inner.definition
    }

    /// The replicated document.
    pub fn document(&self) -> &Doc {
        &self.inner.doc
    }

    /// Declared tables.
    pub fn tables(&self) -> &Tables {
        &self.inner.tables
    }

    /// Returns a table by name, or [`CoreError::UnknownTable`](crate::CoreError::UnknownTable).
    pub fn table(&self, name: &str) -> CoreResult<&Table> {
        self.inner.tables.table(name)
    }

    /// Settings store.
    pub fn kv(&self) -> &Kv {
        &self.inner.kv
    }

    /// Names of attached capabilities, in attach order.
    pub fn capabilities(&self) -> Vec<String> {
        self.inner
            .handles
            .lock()
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    /// Runs `f` on the first attached capability handle of type `T`.
    pub fn with_capability<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let handles = self.inner.handles.lock();
        handles
            .iter()
            .find_map(|h| h.as_any().downcast_ref::<T>())
            .map(f)
    }

    /// Destroys every capability, then disposes the document.
    ///
    /// Other handles to the workspace stay usable for reads, but no observer
    /// fires any more.
    pub async fn destroy(&self) {
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        destroy_handles(self.id(), handles).await;
        self.inner.doc.dispose();
        info!(workspace = %self.id(), "workspace destroyed");
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.id())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

/// Runs every destroy hook concurrently. Failures are logged; teardown
/// always completes.
async fn destroy_handles(workspace: &str, handles: Vec<Box<dyn CapabilityHandle>>) {
    let mut set = tokio::task::JoinSet::new();
    for handle in handles {
        let name = handle.name().to_string();
        set.spawn(async move { (name, handle.destroy().await) });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => debug!(workspace, capability = %name, "capability destroyed"),
            Ok((name, Err(error))) => {
                warn!(workspace, capability = %name, %error, "capability destroy failed");
            }
            Err(error) => warn!(workspace, %error, "capability destroy task failed"),
        }
    }
}

/// Builds a set of interdependent workspaces in dependency order.
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    definitions: Vec<WorkspaceDefinition>,
}

impl WorkspaceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateWorkspaceId`] if the id is
    /// already registered.
    pub fn register(&mut self, definition: WorkspaceDefinition) -> Result<(), ConfigurationError> {
        if self.definitions.iter().any(|d| d.id == definition.id) {
            return Err(ConfigurationError::DuplicateWorkspaceId { id: definition.id });
        }
        self.definitions.push(definition);
        Ok(())
    }

    /// Registered declarations, in registration order.
    pub fn definitions(&self) -> &[WorkspaceDefinition] {
        &self.definitions
    }

    /// Initialisation order of the registered workspaces.
    pub fn order(&self) -> Result<Vec<String>, ConfigurationError> {
        resolve_initialization_order(&self.definitions)
    }

    /// Builds every workspace in dependency order. `capabilities` supplies
    /// the capabilities of each workspace.
    ///
    /// If one build fails, the workspaces already built are destroyed.
    pub async fn build_all<F>(
        &self,
        config: WorkspaceConfig,
        capabilities: F,
    ) -> CoreResult<BTreeMap<String, Workspace>>
    where
        F: Fn(&WorkspaceDefinition) -> Vec<Arc<dyn Capability>>,
    {
        let order = self.order()?;
        let mut built: Vec<Workspace> = Vec::with_capacity(order.len());

        for id in order {
            let Some(definition) = self.definitions.iter().find(|d| d.id == id) else {
                continue;
            };
            let builder = capabilities(definition).into_iter().fold(
                WorkspaceBuilder::new(definition.clone()).config(config.clone()),
                WorkspaceBuilder::shared_capability,
            );
            match builder.build().await {
                Ok(workspace) => built.push(workspace),
                Err(error) => {
                    for workspace in built.iter().rev() {
                        workspace.destroy().await;
                    }
                    return Err(error);
                }
            }
        }

        Ok(built
            .into_iter()
            .map(|w| (w.id().to_string(), w))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityContext, CapabilityFuture};
    use crate::error::CoreError;
    use crate::row::Row;
    use crate::schema::{ColumnDefinition, KvDefinition, TableDefinition};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn blog() -> WorkspaceDefinition {
        WorkspaceDefinition::new("blog")
            .table(TableDefinition::new("posts").column(ColumnDefinition::text("title")))
            .kv(KvDefinition::new("theme", ColumnDefinition::text("v").default_value("light")))
    }

    /// Counts attaches and destroys; optionally fails to attach.
    struct Marker {
        name: &'static str,
        fail: bool,
        attached: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    struct MarkerHandle {
        name: &'static str,
        ctx: CapabilityContext,
        destroyed: Arc<AtomicUsize>,
    }

    impl Marker {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                fail,
                attached: Arc::default(),
                destroyed: Arc::default(),
            }
        }
    }

    impl Capability for Marker {
        fn name(&self) -> &str {
            self.name
        }

        fn attach(&self, ctx: CapabilityContext) -> CapabilityFuture<Box<dyn CapabilityHandle>> {
            let (name, fail) = (self.name, self.fail);
            let attached = self.attached.clone();
            let destroyed = self.destroyed.clone();
            Box::pin(async move {
                if fail {
                    return Err(CoreError::capability(name, "refused"));
                }
                attached.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MarkerHandle {
                    name,
                    ctx,
                    destroyed,
                }) as Box<dyn CapabilityHandle>)
            })
        }
    }

    impl CapabilityHandle for MarkerHandle {
        fn name(&self) -> &str {
            self.name
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn destroy(self: Box<Self>) -> CapabilityFuture<()> {
            Box::pin(async move {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn build_exposes_engines_to_capabilities() {
        let marker = Marker::new("marker", false);
        let destroyed = marker.destroyed.clone();
        let workspace = WorkspaceBuilder::new(blog())
            .config(WorkspaceConfig::new().client_id(9))
            .capability(marker)
            .build()
            .await
            .unwrap();

        assert_eq!(workspace.document().client_id().as_u64(), 9);
        assert_eq!(workspace.capabilities(), vec!["marker"]);

        workspace
            .table("posts")
            .unwrap()
            .upsert(Row::new("p1").with("title", "Hi"))
            .unwrap();
        let seen = workspace
            .with_capability(|h: &MarkerHandle| {
                assert_eq!(h.ctx.id, "blog");
                h.ctx.tables.table("posts").map(Table::count).unwrap_or(0)
            })
            .unwrap();
        assert_eq!(seen, 1);

        workspace.destroy().await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(workspace.capabilities().is_empty());
    }

    #[tokio::test]
    async fn failed_attach_tears_down_the_others() {
        let ok = Marker::new("ok", false);
        let (attached, destroyed) = (ok.attached.clone(), ok.destroyed.clone());
        let result = WorkspaceBuilder::new(blog())
            .capability(ok)
            .capability(Marker::new("broken", true))
            .build()
            .await;

        assert!(matches!(result, Err(CoreError::Capability { .. })));
        assert_eq!(attached.load(Ordering::SeqCst), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misconfiguration_fails_before_attach() {
        let marker = Marker::new("marker", false);
        let attached = marker.attached.clone();
        let bad = blog().table(TableDefinition::new("posts"));
        let result = WorkspaceBuilder::new(bad).capability(marker).build().await;

        assert!(result.unwrap_err().is_configuration());
        assert_eq!(attached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registry_builds_in_dependency_order() {
        let mut registry = WorkspaceRegistry::new();
        registry
            .register(WorkspaceDefinition::new("app").depends_on("auth"))
            .unwrap();
        registry.register(WorkspaceDefinition::new("auth")).unwrap();
        assert!(registry.register(WorkspaceDefinition::new("auth")).is_err());

        let built_order = Arc::new(Mutex::new(Vec::new()));
        let sink = built_order.clone();
        let workspaces = registry
            .build_all(WorkspaceConfig::new(), move |def| {
                sink.lock().push(def.id.clone());
                Vec::new()
            })
            .await
            .unwrap();

        assert_eq!(*built_order.lock(), vec!["auth", "app"]);
        assert_eq!(workspaces.len(), 2);
    }

    #[tokio::test]
    async fn registry_rejects_cycles() {
        let mut registry = WorkspaceRegistry::new();
        registry
            .register(WorkspaceDefinition::new("a").depends_on("b"))
            .unwrap();
        registry
            .register(WorkspaceDefinition::new("b").depends_on("a"))
            .unwrap();
        let err = registry
            .build_all(WorkspaceConfig::new(), |_| Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
