//! Application context
//!
//! Owns every long-lived collaborator (store, tracker, REST client, scheduler, model
//! tree, status channel) and the registry of connections. Everything is constructed
//! here and passed down; nothing lives in globals.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use bigsync_model::layout;
use bigsync_model::{
    ConnectionInfo, FsFileStore, LocalFileStore, ModelTree, ModificationTracker, ResourcePath,
};
use bigsync_rest::{
    ChunkedUploader, HttpTransport, ReachabilityProbe, ReqwestTransport, RestClient, TcpProbe,
};

use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::events::{StatusChannel, StatusEvent};
use crate::handle::ConnectionHandle;
use crate::scheduler::{JobOutcome, RequestScheduler};
use crate::state::{ConnectionStateMachine, OfflineOutcome, SyncPrompt};

pub struct AppContext {
    config: SyncConfig,
    store: Arc<dyn LocalFileStore>,
    tree: Arc<RwLock<ModelTree>>,
    events: StatusChannel,
    machine: ConnectionStateMachine,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl AppContext {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalFileStore>,
        transport: Arc<dyn HttpTransport>,
        probe: Arc<dyn ReachabilityProbe>,
        prompt: Arc<dyn SyncPrompt>,
    ) -> Result<Self> {
        let client = RestClient::new(transport, probe, config.client_options());
        let uploader = ChunkedUploader::new(client.clone(), store.clone(), config.max_chunk_size);
        let tracker = ModificationTracker::new(store.clone());
        let scheduler = RequestScheduler::new(
            client,
            uploader,
            tracker,
            config.upload_slot_timeout(),
            config.delete_retry(),
        );
        let tree = Arc::new(RwLock::new(ModelTree::new()));
        let events = StatusChannel::new();
        let machine = ConnectionStateMachine::new(
            scheduler,
            tree.clone(),
            events.clone(),
            prompt,
            config.version_gate()?,
            config.iapps_minimum()?,
        );

        Ok(Self {
            config,
            store,
            tree,
            events,
            machine,
            connections: RwLock::new(HashMap::new()),
        })
    }

    /// Context over a workspace directory, talking to devices over HTTPS
    pub fn open(config: SyncConfig, workspace: &Path, prompt: Arc<dyn SyncPrompt>) -> Result<Self> {
        let store = Arc::new(FsFileStore::open(workspace)?);
        let transport = Arc::new(
            ReqwestTransport::new(config.transport_options())
                .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {}", e)))?,
        );
        info!("Opened workspace {}", workspace.display());
        Self::new(config, store, transport, Arc::new(TcpProbe), prompt)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LocalFileStore> {
        &self.store
    }

    pub fn tree(&self) -> &Arc<RwLock<ModelTree>> {
        &self.tree
    }

    pub fn tracker(&self) -> &ModificationTracker {
        self.scheduler().tracker()
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        self.machine.scheduler()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub async fn connection(&self, name: &str) -> Result<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::ConnectionNotFound(name.to_string()))
    }

    pub async fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a new connection, offline, with an empty project folder
    pub async fn add_connection(
        &self,
        name: &str,
        mut info: ConnectionInfo,
    ) -> Result<Arc<ConnectionHandle>> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(SyncError::Config(format!("invalid connection name '{}'", name)));
        }
        let mut connections = self.connections.write().await;
        if connections.contains_key(name) {
            return Err(SyncError::ConnectionExists(name.to_string()));
        }

        info.online = false;
        info.persist(self.store.as_ref(), name)?;
        let handle = Arc::new(ConnectionHandle::new(name, info));
        self.machine.load_from_disk(&handle).await?;
        connections.insert(name.to_string(), handle.clone());
        info!(connection = name, "Added connection");
        Ok(handle)
    }

    /// Remove a connection with its project folder and properties. With `remove_remote`
    /// set and the connection online, its device resources are deleted first; a failed
    /// remote delete keeps the connection.
    pub async fn delete_connection(&self, name: &str, remove_remote: bool) -> Result<()> {
        let handle = self.connection(name).await?;
        if remove_remote && handle.is_online().await {
            let roots = self.machine.remote_roots(name).await?;
            let jobs: Vec<_> = roots
                .into_iter()
                .map(|resource| self.scheduler().schedule_delete(&handle, resource))
                .collect();
            for job in jobs {
                if let Err(e) = job.wait().await {
                    self.events.error(name, format!("Could not delete connection: {}", e));
                    return Err(e);
                }
            }
        }

        {
            let mut tree = self.tree.write().await;
            if let Some(id) = tree.find_connection(name) {
                tree.remove_subtree(id)?;
            }
        }
        self.store.delete(&layout::project_path(name))?;
        self.store.clear_persistent_properties(name)?;
        self.connections.write().await.remove(name);
        info!(connection = name, "Deleted connection");
        Ok(())
    }

    /// Re-create connections from the projects in the workspace and bring back online
    /// those that were online when last used. Returns the restored names.
    pub async fn restore_connections(&self) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for project in self.store.projects()? {
            let Some(info) = ConnectionInfo::restore(self.store.as_ref(), &project)? else {
                debug!("Project {} carries no connection", project);
                continue;
            };
            let was_online = info.online;
            let offline = ConnectionInfo {
                online: false,
                ..info
            };
            let handle = Arc::new(ConnectionHandle::new(&project, offline));
            self.machine.load_from_disk(&handle).await?;
            self.connections.write().await.insert(project.clone(), handle.clone());

            if was_online {
                if let Err(e) = self.machine.go_online(&handle).await {
                    warn!(connection = %project, "Restoring online mode failed: {}", e);
                }
            }
            restored.push(project);
        }
        info!("Restored {} connections", restored.len());
        Ok(restored)
    }

    pub async fn go_online(&self, name: &str) -> Result<()> {
        let handle = self.connection(name).await?;
        self.machine.go_online(&handle).await
    }

    pub async fn go_offline(&self, name: &str) -> Result<OfflineOutcome> {
        let handle = self.connection(name).await?;
        self.machine.go_offline(&handle).await
    }

    /// Rebuild a connection's subtree from the workspace
    pub async fn load_from_disk(&self, name: &str) -> Result<()> {
        let handle = self.connection(name).await?;
        self.machine.load_from_disk(&handle).await
    }

    pub async fn edited_resources(&self, name: &str) -> Result<Vec<ResourcePath>> {
        self.machine.edited_resources(name).await
    }

    pub async fn push(&self, name: &str, path: &ResourcePath) -> Result<JobOutcome> {
        let handle = self.connection(name).await?;
        self.machine.push(&handle, path).await
    }

    pub async fn create_resource(
        &self,
        name: &str,
        path: &ResourcePath,
        is_folder: bool,
        content: Option<&[u8]>,
    ) -> Result<Option<JobOutcome>> {
        let handle = self.connection(name).await?;
        self.machine.create_resource(&handle, path, is_folder, content).await
    }

    pub async fn delete_resource(&self, name: &str, path: &ResourcePath) -> Result<()> {
        let handle = self.connection(name).await?;
        self.machine.delete_resource(&handle, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProceedWithoutSync;
    use bigsync_model::MemoryFileStore;
    use bigsync_rest::testing::{RecordingTransport, StaticProbe};

    fn context(store: Arc<MemoryFileStore>) -> AppContext {
        AppContext::new(
            SyncConfig {
                pacing_ms: 0,
                ..SyncConfig::default()
            },
            store,
            Arc::new(RecordingTransport::new()),
            Arc::new(StaticProbe(true)),
            Arc::new(ProceedWithoutSync),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_delete_connection() {
        let store = Arc::new(MemoryFileStore::new());
        let ctx = context(store.clone());
        ctx.add_connection("lab", ConnectionInfo::new("bigip").with_credentials("admin", "x"))
            .await
            .unwrap();
        assert!(store.exists(&layout::project_path("lab")));
        assert!(matches!(
            ctx.add_connection("lab", ConnectionInfo::new("other")).await,
            Err(SyncError::ConnectionExists(_))
        ));
        assert!(ctx.tree().read().await.find_connection("lab").is_some());

        ctx.delete_connection("lab", false).await.unwrap();
        assert!(!store.exists(&layout::project_path("lab")));
        assert_eq!(ConnectionInfo::restore(store.as_ref(), "lab").unwrap(), None);
        assert!(ctx.tree().read().await.find_connection("lab").is_none());
        assert!(ctx.connection_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_names() {
        let ctx = context(Arc::new(MemoryFileStore::new()));
        for name in ["", "a/b", ".bigsync"] {
            assert!(matches!(
                ctx.add_connection(name, ConnectionInfo::new("bigip")).await,
                Err(SyncError::Config(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_restore_offline_connection() {
        let store = Arc::new(MemoryFileStore::new());
        {
            let ctx = context(store.clone());
            ctx.add_connection("lab", ConnectionInfo::new("bigip")).await.unwrap();
            ctx.create_resource(
                "lab",
                &layout::rule_path("lab", "Common", layout::TrafficModule::Ltm, "redirect"),
                false,
                Some(b"when HTTP_REQUEST {}"),
            )
            .await
            .unwrap();
        }

        let ctx = context(store);
        assert_eq!(ctx.restore_connections().await.unwrap(), vec!["lab"]);
        let edited = ctx.edited_resources("lab").await.unwrap();
        assert_eq!(edited.len(), 1);
        assert_eq!(edited[0].as_str(), "/lab/Common/iRules/LTM/redirect.tcl");
    }
}
