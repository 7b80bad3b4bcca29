//! Connection state machine
//!
//! A connection is either offline (tree built from the workspace alone) or online
//! (tree reconciled with the device). Going online walks through the connection phases,
//! loading one kind of information per phase:
//!
//! ```text
//! Offline -> Connecting -> VersionChecked -> ProvisioningLoaded
//!         -> PartitionsLoaded -> ResourcesLoaded
//! ```
//!
//! Any failure on the way drops the connection back to `Offline` with the tree loaded
//! from disk. Going offline asks what to do with locally edited resources first.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use bigsync_model::layout::{self, TrafficModule};
use bigsync_model::{
    ConnectionInfo, DataGroup, DataGroupType, LocalFileStore, ModelError, ModelNode, ModelTree,
    ModelType, ModificationTracker, NodeId, NodePayload, ResourcePath, SyncFlags,
};
use bigsync_rest::uri::SYS_VERSION;
use bigsync_rest::{Method, RestClient, RestFailure, UriBuilder, Version, VersionGate};

use crate::errors::{Result, SyncError};
use crate::events::StatusChannel;
use crate::handle::{ConnectionHandle, ConnectionPhase};
use crate::loaders::{self, RemoteEntry};
use crate::resources::RemoteResource;
use crate::scheduler::{forget_local, JobHandle, JobOutcome, RequestScheduler};

/// Provisioning name of the iLX module
const ILX_MODULE: &str = "ilx";

/// Answer to "these resources have local changes, what now?" when going offline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// Push the listed resources, then go offline
    Push(Vec<ResourcePath>),
    /// Stay online
    Cancel,
    /// Go offline and keep the local changes unpushed
    ProceedWithoutSync,
}

#[async_trait]
pub trait SyncPrompt: Send + Sync {
    async fn choose(&self, connection: &str, edited: &[ResourcePath]) -> SyncDecision;
}

/// Prompt that never pushes
pub struct ProceedWithoutSync;

#[async_trait]
impl SyncPrompt for ProceedWithoutSync {
    async fn choose(&self, _connection: &str, _edited: &[ResourcePath]) -> SyncDecision {
        SyncDecision::ProceedWithoutSync
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineOutcome {
    Offline,
    /// The prompt cancelled the transition
    StayedOnline,
}

#[derive(Clone)]
pub struct ConnectionStateMachine {
    store: Arc<dyn LocalFileStore>,
    tracker: ModificationTracker,
    scheduler: RequestScheduler,
    tree: Arc<RwLock<ModelTree>>,
    events: StatusChannel,
    prompt: Arc<dyn SyncPrompt>,
    gate: VersionGate,
    iapps_minimum: Version,
}

impl ConnectionStateMachine {
    pub fn new(
        scheduler: RequestScheduler,
        tree: Arc<RwLock<ModelTree>>,
        events: StatusChannel,
        prompt: Arc<dyn SyncPrompt>,
        gate: VersionGate,
        iapps_minimum: Version,
    ) -> Self {
        let tracker = scheduler.tracker().clone();
        Self {
            store: tracker.store().clone(),
            tracker,
            scheduler,
            tree,
            events,
            prompt,
            gate,
            iapps_minimum,
        }
    }

    fn client(&self) -> &RestClient {
        self.scheduler.client()
    }

    /// Bring the connection online. A trigger while a load is already running returns
    /// [`SyncError::AlreadyLoading`] without sending anything.
    pub async fn go_online(&self, handle: &Arc<ConnectionHandle>) -> Result<()> {
        let name = handle.name().to_string();
        if handle.is_online().await {
            debug!(connection = %name, "Already online");
            return Ok(());
        }
        if !handle.flow().try_begin_load() {
            return Err(SyncError::AlreadyLoading(name));
        }

        match self.load_remote(handle).await {
            Ok(()) => {
                handle.flow().finish_load(true);
                handle.set_phase(ConnectionPhase::ResourcesLoaded).await;
                handle.update_info(|info| info.online = true).await;
                let info = handle.info().await;
                info.persist(self.store.as_ref(), &name)?;
                self.sync_payload(handle).await?;
                self.events.info(
                    &name,
                    format!(
                        "Online with {} (BigIP {})",
                        info.address,
                        info.version.as_deref().unwrap_or("unknown")
                    ),
                );
                Ok(())
            }
            Err(e) => {
                handle.flow().finish_load(false);
                handle.set_phase(ConnectionPhase::Offline).await;
                handle.update_info(|info| info.online = false).await;
                let store = self.store.as_ref();
                if let Err(persist) = ConnectionInfo::persist_online(store, &name, false) {
                    warn!(connection = %name, "Saving offline mode failed: {}", persist);
                }
                self.events.error(&name, format!("Could not go online: {}", e));
                if let Err(disk) = self.load_from_disk(handle).await {
                    warn!(connection = %name, "Loading workspace state failed: {}", disk);
                }
                Err(e)
            }
        }
    }

    async fn load_remote(&self, handle: &Arc<ConnectionHandle>) -> Result<()> {
        let name = handle.name();
        handle.set_phase(ConnectionPhase::Connecting).await;
        let info = handle.info().await;

        let raw = loaders::load_version(self.client(), &info).await?;
        let version = self.gate.check(&raw).map_err(|e| {
            RestFailure::new(e, Method::Get, UriBuilder::endpoint(&info, SYS_VERSION).build())
        })?;
        info!(connection = name, %version, "Device version accepted");
        handle.update_info(|info| info.version = Some(raw)).await;
        handle.set_phase(ConnectionPhase::VersionChecked).await;

        let modules = loaders::load_provisioning(self.client(), &info).await?;
        debug!(connection = name, ?modules, "Provisioned modules");
        handle.update_info(|info| info.modules = modules).await;
        handle.set_phase(ConnectionPhase::ProvisioningLoaded).await;

        let partitions = loaders::load_partitions(self.client(), &info).await?;
        handle.update_info(|info| info.partitions = partitions).await;
        handle.set_phase(ConnectionPhase::PartitionsLoaded).await;

        let info = handle.info().await;
        let mut entries = Vec::new();
        let mut covered = HashSet::new();
        for module in [TrafficModule::Ltm, TrafficModule::Gtm] {
            if !info.is_provisioned(module.rest_name()) {
                continue;
            }
            entries.extend(loaders::load_rules(self.client(), name, &info, module).await?);
            entries.extend(loaders::load_data_groups(self.client(), name, &info, module).await?);
            covered.extend([module.rule_type(), module.data_group_type()]);
        }
        if info.is_provisioned(ILX_MODULE) {
            entries.extend(loaders::load_ilx_workspaces(self.client(), name, &info).await?);
            covered.extend([
                ModelType::Workspace,
                ModelType::Extension,
                ModelType::ExtensionFile,
                ModelType::RuleIlx,
            ]);
        }
        if version >= self.iapps_minimum {
            entries.extend(loaders::load_iapps(self.client(), name, &info).await?);
            covered.extend([
                ModelType::IAppLxModelPackage,
                ModelType::IAppLxModelDir,
                ModelType::IAppLxModel,
            ]);
        } else {
            debug!(connection = name, "iAppsLX needs BigIP {}", self.iapps_minimum);
        }

        self.reconcile(handle, entries, &covered).await
    }

    fn is_edited(&self, connection: &str, path: &ResourcePath) -> Result<bool> {
        Ok(self.tracker.is_new_file(connection, path)?
            || self.tracker.is_file_modified(connection, path)?)
    }

    /// Bring the workspace in line with the device listing: write remote content over
    /// unedited files, keep edited ones, drop unedited resources the device no longer
    /// has, then rebuild the tree.
    async fn reconcile(
        &self,
        handle: &Arc<ConnectionHandle>,
        entries: Vec<RemoteEntry>,
        covered: &HashSet<ModelType>,
    ) -> Result<()> {
        let name = handle.name();
        let remote: HashSet<ResourcePath> =
            entries.iter().map(|e| e.resource.path.clone()).collect();

        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry.resource.path.clone();
            if entry.is_folder {
                self.store.create_folder_recursive(&path)?;
                if self.tracker.response_stamp(name, &path)?.is_none() {
                    self.tracker.update_modification_stamp_map(name, &path)?;
                }
                continue;
            }
            if self.store.exists(&path) && self.is_edited(name, &path)? {
                info!(connection = name, path = %path, "Keeping local changes");
                continue;
            }
            jobs.push(match entry.document {
                Some(document) => self.scheduler.schedule_write(handle, entry.resource, document),
                None => self.scheduler.schedule_get(handle, entry.resource),
            });
        }
        wait_all(jobs).await?;

        self.prune(name, &remote, covered)?;
        self.load_from_disk(handle).await
    }

    /// Remove unedited local resources of the loaded kinds that the device does not list
    fn prune(
        &self,
        connection: &str,
        remote: &HashSet<ResourcePath>,
        covered: &HashSet<ModelType>,
    ) -> Result<()> {
        for (path, is_folder) in walk(self.store.as_ref(), &layout::project_path(connection))? {
            if remote.contains(&path) || !self.store.exists(&path) {
                continue;
            }
            let Some(resource) = RemoteResource::locate(&path, is_folder) else {
                continue;
            };
            if !covered.contains(&resource.kind) {
                continue;
            }
            let keep = if is_folder {
                self.has_local_work(connection, &path)?
            } else {
                self.is_edited(connection, &path)?
            };
            if keep {
                continue;
            }
            info!(connection, path = %path, "Removed on the device, deleting local copy");
            forget_local(&self.tracker, connection, &path)?;
        }
        Ok(())
    }

    /// Whether a folder holds files that exist only locally or carry local changes
    fn has_local_work(&self, connection: &str, folder: &ResourcePath) -> Result<bool> {
        for (path, is_folder) in walk(self.store.as_ref(), folder)? {
            if is_folder {
                continue;
            }
            let tracked =
                RemoteResource::locate(&path, false).is_some_and(|r| r.kind.is_remote_file());
            if !tracked || self.is_edited(connection, &path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rebuild the connection's subtree from the workspace
    pub async fn load_from_disk(&self, handle: &ConnectionHandle) -> Result<()> {
        let name = handle.name();
        let project = layout::project_path(name);
        self.store.create_folder_recursive(&project)?;
        let entries = walk(self.store.as_ref(), &project)?;
        let info = handle.info().await;

        let mut tree = self.tree.write().await;
        let connection = match tree.find_connection(name) {
            Some(id) => {
                tree.set_payload(id, NodePayload::Connection(Box::new(info)))?;
                id
            }
            None => {
                let root = tree.root();
                tree.add_child(root, ModelNode::connection(name, info))?
            }
        };
        tree.clear_children(connection, None);

        let mut folders: HashMap<ResourcePath, NodeId> = HashMap::new();
        folders.insert(project, connection);
        for (path, is_folder) in entries {
            let Some(parent) = path.parent().and_then(|p| folders.get(&p).copied()) else {
                continue;
            };
            let id = tree.add_child(parent, self.node_for(&path, is_folder))?;
            if is_folder {
                folders.insert(path, id);
            }
        }
        self.tracker.refresh_flags(&mut tree, connection)?;
        debug!(connection = name, nodes = folders.len(), "Loaded workspace state");
        Ok(())
    }

    fn node_for(&self, path: &ResourcePath, is_folder: bool) -> ModelNode {
        let classified = layout::classify(path, is_folder);
        let kind = classified.kind;
        let mut node =
            ModelNode::new(kind, classified.name, classified.partition, Some(path.clone()));
        if kind == ModelType::NodeModulesDir || layout::is_read_only(path) {
            node.flags = SyncFlags::read_only();
        }
        if kind.is_data_group() {
            match self.store.read_all(path).and_then(|bytes| DataGroup::from_json(&bytes)) {
                Ok(group) => node.payload = NodePayload::DataGroup(group),
                Err(e) => warn!(path = %path, "Unreadable data-group: {}", e),
            }
        }
        node
    }

    async fn sync_payload(&self, handle: &ConnectionHandle) -> Result<()> {
        let info = handle.info().await;
        let mut tree = self.tree.write().await;
        if let Some(id) = tree.find_connection(handle.name()) {
            tree.set_payload(id, NodePayload::Connection(Box::new(info)))?;
        }
        Ok(())
    }

    /// Paths of edited resources below the connection, after refreshing the flags
    pub async fn edited_resources(&self, connection: &str) -> Result<Vec<ResourcePath>> {
        let mut tree = self.tree.write().await;
        let Some(id) = tree.find_connection(connection) else {
            return Err(SyncError::ConnectionNotFound(connection.to_string()));
        };
        self.tracker.refresh_flags(&mut tree, id)?;
        Ok(tree
            .edited_descendants(id)
            .into_iter()
            .filter_map(|d| tree.node(d).and_then(|n| n.path.clone()))
            .collect())
    }

    /// Take the connection offline. Edited resources go through the prompt; without
    /// any, writable files are refreshed from the device first.
    pub async fn go_offline(&self, handle: &Arc<ConnectionHandle>) -> Result<OfflineOutcome> {
        let name = handle.name().to_string();
        if !handle.is_online().await {
            return Ok(OfflineOutcome::Offline);
        }

        let edited = self.edited_resources(&name).await?;
        if edited.is_empty() {
            self.reload_writable(handle).await?;
        } else {
            match self.prompt.choose(&name, &edited).await {
                SyncDecision::Cancel => {
                    info!(connection = %name, "Going offline cancelled");
                    return Ok(OfflineOutcome::StayedOnline);
                }
                SyncDecision::ProceedWithoutSync => {
                    info!(
                        connection = %name,
                        edited = edited.len(),
                        "Going offline without pushing"
                    );
                }
                SyncDecision::Push(paths) => {
                    for path in paths {
                        if let Err(e) = self.push(handle, &path).await {
                            warn!(
                                connection = %name,
                                path = %path,
                                "Push before going offline failed: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        handle.set_phase(ConnectionPhase::Offline).await;
        handle.flow().reset();
        handle.update_info(|info| info.online = false).await;
        ConnectionInfo::persist_online(self.store.as_ref(), &name, false)?;
        self.sync_payload(handle).await?;
        self.events.info(&name, "Working offline");
        Ok(OfflineOutcome::Offline)
    }

    async fn reload_writable(&self, handle: &Arc<ConnectionHandle>) -> Result<()> {
        let resources: Vec<RemoteResource> = {
            let tree = self.tree.read().await;
            let Some(id) = tree.find_connection(handle.name()) else {
                return Ok(());
            };
            tree.descendants(id)
                .into_iter()
                .filter_map(|d| tree.node(d))
                .filter(|n| n.kind.is_remote_file() && !n.flags.read_only && !n.is_locally_edited())
                .filter_map(|n| n.path.as_ref())
                .filter_map(|path| RemoteResource::locate(path, false))
                .collect()
        };
        debug!(connection = handle.name(), files = resources.len(), "Reloading writable files");
        let jobs = resources
            .into_iter()
            .map(|r| self.scheduler.schedule_get(handle, r))
            .collect();
        if let Err(e) = wait_all(jobs).await {
            warn!(connection = handle.name(), "Reload before going offline failed: {}", e);
        }
        Ok(())
    }

    fn find_node(tree: &ModelTree, connection: &str, path: &ResourcePath) -> Result<NodeId> {
        tree.find_connection(connection)
            .and_then(|c| tree.get_model(c, "", Some(path)))
            .ok_or_else(|| SyncError::ResourceNotFound(path.to_string()))
    }

    async fn refresh_node(&self, connection: &str, path: &ResourcePath) -> Result<()> {
        let mut tree = self.tree.write().await;
        if let Ok(id) = Self::find_node(&tree, connection, path) {
            self.tracker.refresh_flags(&mut tree, id)?;
        }
        Ok(())
    }

    /// Send local state of one resource to the device: POST when it was created locally,
    /// PATCH (or an upload) otherwise
    pub async fn push(
        &self,
        handle: &Arc<ConnectionHandle>,
        path: &ResourcePath,
    ) -> Result<JobOutcome> {
        let name = handle.name();
        if !handle.is_online().await {
            return Err(SyncError::Offline(name.to_string()));
        }
        if layout::is_read_only(path) {
            return Err(SyncError::ReadOnly(path.to_string()));
        }
        let is_folder = {
            let tree = self.tree.read().await;
            let id = Self::find_node(&tree, name, path)?;
            tree.node(id).is_some_and(|n| n.is_parent())
        };
        let resource = RemoteResource::locate(path, is_folder)
            .ok_or_else(|| SyncError::NotRemote(path.to_string()))?;

        let is_new = self.tracker.is_new_file(name, path)?;
        if is_folder && !is_new {
            return Ok(JobOutcome::Skipped(path.clone()));
        }
        let job = if is_new {
            self.scheduler.schedule_post(handle, resource)
        } else {
            self.scheduler.schedule_patch(handle, resource)
        };
        let outcome = job.wait().await;
        self.refresh_node(name, path).await?;
        outcome.map_err(|e| {
            self.events.error(name, format!("Pushing {} failed: {}", path, e));
            e
        })
    }

    /// Create a file or folder in the workspace and, when online, on the device.
    ///
    /// Data-groups created without content start as an empty string data-group.
    pub async fn create_resource(
        &self,
        handle: &Arc<ConnectionHandle>,
        path: &ResourcePath,
        is_folder: bool,
        content: Option<&[u8]>,
    ) -> Result<Option<JobOutcome>> {
        let name = handle.name();
        if path.project() != Some(name) || path.depth() < 2 {
            return Err(ModelError::InvalidPath(format!("{} is not inside {}", path, name)).into());
        }
        if layout::is_read_only(path) {
            return Err(SyncError::ReadOnly(path.to_string()));
        }

        let classified = layout::classify(path, is_folder);
        if is_folder {
            self.store.create_folder_recursive(path)?;
        } else {
            let content = match content {
                Some(content) => content.to_vec(),
                None if classified.kind.is_data_group() => {
                    let partition = classified.partition.clone();
                    DataGroup::new(&classified.name, partition, DataGroupType::String).to_json()?
                }
                None => Vec::new(),
            };
            self.store.write(path, &content, true)?;
        }
        self.insert_node(name, path, is_folder).await?;
        info!(connection = name, path = %path, "Created locally");

        if handle.is_online().await && RemoteResource::locate(path, is_folder).is_some() {
            return self.push(handle, path).await.map(Some);
        }
        Ok(None)
    }

    async fn insert_node(
        &self,
        connection: &str,
        path: &ResourcePath,
        is_folder: bool,
    ) -> Result<()> {
        let mut tree = self.tree.write().await;
        let mut parent = tree
            .find_connection(connection)
            .ok_or_else(|| SyncError::ConnectionNotFound(connection.to_string()))?;

        let mut folders: Vec<ResourcePath> = path
            .ancestors()
            .take_while(|a| a.depth() > 1)
            .collect();
        folders.reverse();
        for folder in folders {
            let classified = layout::classify(&folder, true);
            let segment = folder.file_name().unwrap_or_default().to_string();
            parent = tree.ensure_folder(parent, &segment, classified.kind, classified.partition)?;
        }
        let id = tree.add_child(parent, self.node_for(path, is_folder))?;
        self.tracker.refresh_flags(&mut tree, id)?;
        Ok(())
    }

    /// Delete a resource locally and, when online and known to the device, remotely.
    pub async fn delete_resource(
        &self,
        handle: &Arc<ConnectionHandle>,
        path: &ResourcePath,
    ) -> Result<()> {
        let name = handle.name();
        let is_folder = {
            let tree = self.tree.read().await;
            let id = Self::find_node(&tree, name, path)?;
            let node = tree.node(id).ok_or_else(|| SyncError::ResourceNotFound(path.to_string()))?;
            if node.flags.read_only {
                return Err(SyncError::ReadOnly(path.to_string()));
            }
            node.is_parent()
        };

        let remote = RemoteResource::locate(path, is_folder);
        let on_device = !self.tracker.is_new_file(name, path)?;
        match remote {
            Some(resource) if on_device && handle.is_online().await => {
                if let Err(e) = self.scheduler.schedule_delete(handle, resource).wait().await {
                    self.events.error(name, format!("Deleting {} failed: {}", path, e));
                    return Err(e);
                }
            }
            _ => forget_local(&self.tracker, name, path)?,
        }

        let mut tree = self.tree.write().await;
        if let Ok(id) = Self::find_node(&tree, name, path) {
            tree.remove_subtree(id)?;
        }
        info!(connection = name, path = %path, "Deleted");
        Ok(())
    }

    /// Top-level device resources of a connection: rules, data-groups, workspaces and
    /// iAppsLX packages that the device already knows
    pub async fn remote_roots(&self, connection: &str) -> Result<Vec<RemoteResource>> {
        let tree = self.tree.read().await;
        let Some(id) = tree.find_connection(connection) else {
            return Err(SyncError::ConnectionNotFound(connection.to_string()));
        };
        let mut roots = Vec::new();
        for node in tree.descendants(id).into_iter().filter_map(|d| tree.node(d)) {
            let top_level = matches!(
                node.kind,
                ModelType::RuleLtm
                    | ModelType::RuleGtm
                    | ModelType::DataGroupLtm
                    | ModelType::DataGroupGtm
                    | ModelType::Workspace
                    | ModelType::IAppLxModelPackage
            );
            let Some(path) = node.path.as_ref().filter(|_| top_level) else {
                continue;
            };
            if self.tracker.is_new_file(connection, path)? {
                continue;
            }
            if let Some(resource) = RemoteResource::locate(path, node.is_parent()) {
                roots.push(resource);
            }
        }
        Ok(roots)
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }
}

/// Files and folders below `root` in preorder, `root` excluded. A missing root yields
/// nothing.
fn walk(store: &dyn LocalFileStore, root: &ResourcePath) -> Result<Vec<(ResourcePath, bool)>> {
    let mut out = Vec::new();
    if !store.exists(root) {
        return Ok(out);
    }
    let mut stack = vec![root.clone()];
    while let Some(folder) = stack.pop() {
        let Ok(entries) = store.list(&folder) else {
            continue;
        };
        for entry in entries.into_iter().rev() {
            let path = folder.join(&entry.name);
            if entry.is_folder {
                stack.push(path.clone());
            }
            out.push((path, entry.is_folder));
        }
    }
    // Parents always precede their children; keep siblings in name order
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Await every job. Connectivity failures abort the caller; anything else is logged.
async fn wait_all(jobs: Vec<JobHandle<JobOutcome>>) -> Result<()> {
    let labels: Vec<String> = jobs.iter().map(|j| j.label().to_string()).collect();
    let results = join_all(jobs.into_iter().map(JobHandle::wait)).await;

    let mut first = None;
    for (label, result) in labels.into_iter().zip(results) {
        if let Err(e) = result {
            if first.is_none() && e.rest_error().is_some_and(|r| r.is_connectivity()) {
                first = Some(e);
            } else {
                warn!("{} failed: {}", label, e);
            }
        }
    }
    first.map_or(Ok(()), Err)
}
