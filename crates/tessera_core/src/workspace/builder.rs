//! Workspace construction.

use super::{Workspace, WorkspaceDefinition};
use crate::capability::{Capability, CapabilityContext, CapabilityHandle};
use crate::config::WorkspaceConfig;
use crate::error::{CoreError, CoreResult};
use crate::kv::Kv;
use crate::table::Tables;
use std::sync::Arc;
use tessera_doc::{ClientId, Doc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Builds a [`Workspace`] from its declaration.
///
/// ```rust,ignore
/// let workspace = WorkspaceBuilder::new(definition)
///     .config(WorkspaceConfig::new().client_id(7))
///     .capability(SnapshotPersistence::new(PersistenceConfig::new(dir)))
///     .build()
///     .await?;
/// ```
pub struct WorkspaceBuilder {
    definition: WorkspaceDefinition,
    config: WorkspaceConfig,
    capabilities: Vec<Arc<dyn Capability>>,
}

impl WorkspaceBuilder {
    /// Starts a builder for `definition`.
    pub fn new(definition: WorkspaceDefinition) -> Self {
        Self {
            definition,
            config: WorkspaceConfig::default(),
            capabilities: Vec::new(),
        }
    }

    /// Sets the workspace configuration.
    #[must_use]
    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn capability(mut self, capability: impl Capability + 'static) -> Self {
        self.capabilities.push(Arc::new(capability));
        self
    }

    /// Adds a shared capability.
    #[must_use]
    pub fn shared_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Checks the schema, creates the document and engines, then attaches
    /// every capability concurrently.
    ///
    /// # Errors
    ///
    /// Misconfiguration fails before anything is created. If a capability
    /// fails to attach, the capabilities already attached are destroyed and
    /// the document is disposed before the error is returned.
    pub async fn build(self) -> CoreResult<Workspace> {
        let Self {
            definition,
            config,
            capabilities,
        } = self;
        definition.check()?;

        let client = config.client_id.map_or_else(ClientId::random, ClientId::new);
        let doc = Doc::with_client_id(client);
        let tables = Tables::new(&doc, &definition.tables)?;
        let kv = Kv::new(&doc, &definition.kv)?;
        let definition = Arc::new(definition);

        let ctx = CapabilityContext {
            id: definition.id.clone(),
            document: doc.clone(),
            tables: tables.clone(),
            kv: kv.clone(),
            definition: definition.clone(),
        };

        let mut set = JoinSet::new();
        for (index, capability) in capabilities.into_iter().enumerate() {
            let ctx = ctx.clone();
            set.spawn(async move {
                let name = capability.name().to_string();
                debug!(capability = %name, "attaching capability");
                (index, name, capability.attach(ctx).await)
            });
        }

        let mut handles: Vec<(usize, Box<dyn CapabilityHandle>)> = Vec::new();
        let mut failure: Option<CoreError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, _, Ok(handle))) => handles.push((index, handle)),
                Ok((_, name, Err(error))) => {
                    warn!(workspace = %definition.id, capability = %name, %error, "capability failed to attach");
                    failure.get_or_insert(error);
                }
                Err(error) => {
                    warn!(workspace = %definition.id, %error, "capability task failed");
                    failure.get_or_insert(CoreError::capability("attach", error.to_string()));
                }
            }
        }
        handles.sort_by_key(|(index, _)| *index);
        let handles: Vec<_> = handles.into_iter().map(|(_, h)| h).collect();

        if let Some(error) = failure {
            super::destroy_handles(&definition.id, handles).await;
            doc.dispose();
            return Err(error);
        }

        info!(
            workspace = %definition.id,
            client = %client,
            tables = tables.len(),
            capabilities = handles.len(),
            "workspace built"
        );
        Ok(Workspace::new(definition, doc, tables, kv, handles))
    }
}
