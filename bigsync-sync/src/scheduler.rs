//! Request scheduling
//!
//! Every request against a resource runs as its own tokio task. Jobs of one connection
//! take that connection's storage lock, so at most one of them writes its files at a
//! time; jobs of different connections run independently. Uploads additionally take a
//! global single-slot semaphore with a bounded wait.
//!
//! Completion bookkeeping happens inside the job:
//! - GET writes the content locally and records the response stamps
//! - POST / PATCH record the response stamps (local content now matches the device)
//! - DELETE forgets the stamps and deletes the local copy

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use bigsync_model::{ConnectionInfo, LocalFileStore, ModificationTracker, ResourcePath};
use bigsync_rest::{
    CancelFlag, ChunkedUploader, Method, RestClient, RestError, RestFailure, UploadProgress,
};

use crate::errors::{Result, SyncError};
use crate::handle::ConnectionHandle;
use crate::resources::{RemoteResource, Transfer};
use crate::retry::DeleteRetry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Content was written to the local file
    Fetched(ResourcePath),
    /// The resource was created on the device
    Created(ResourcePath),
    /// Local changes were pushed
    Pushed(ResourcePath),
    /// Nothing changed since the last synchronization, no request was sent
    Skipped(ResourcePath),
    Deleted(ResourcePath),
}

impl JobOutcome {
    pub fn path(&self) -> &ResourcePath {
        match self {
            JobOutcome::Fetched(p)
            | JobOutcome::Created(p)
            | JobOutcome::Pushed(p)
            | JobOutcome::Skipped(p)
            | JobOutcome::Deleted(p) => p,
        }
    }
}

/// Completion of a scheduled job
pub struct JobHandle<T> {
    label: String,
    inner: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub async fn wait(self) -> Result<T> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SyncError::Rest(RestFailure::new(
                RestError::Cancelled,
                Method::Get,
                self.label,
            ))),
            Err(e) => Err(SyncError::Job(format!("{}: {}", self.label, e))),
        }
    }
}

struct SchedulerInner {
    client: RestClient,
    uploader: ChunkedUploader,
    tracker: ModificationTracker,
    store: Arc<dyn LocalFileStore>,
    upload_slot: Semaphore,
    upload_timeout: Duration,
    delete_retry: DeleteRetry,
}

#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<SchedulerInner>,
}

impl RequestScheduler {
    pub fn new(
        client: RestClient,
        uploader: ChunkedUploader,
        tracker: ModificationTracker,
        upload_timeout: Duration,
        delete_retry: DeleteRetry,
    ) -> Self {
        let store = tracker.store().clone();
        Self {
            inner: Arc::new(SchedulerInner {
                client,
                uploader,
                tracker,
                store,
                upload_slot: Semaphore::new(1),
                upload_timeout,
                delete_retry,
            }),
        }
    }

    pub fn client(&self) -> &RestClient {
        &self.inner.client
    }

    pub fn tracker(&self) -> &ModificationTracker {
        &self.inner.tracker
    }

    fn spawn<F>(
        &self,
        label: String,
        handle: &Arc<ConnectionHandle>,
        job: F,
    ) -> JobHandle<JobOutcome>
    where
        F: std::future::Future<Output = Result<JobOutcome>> + Send + 'static,
    {
        let guard = handle.flow().job();
        let handle = handle.clone();
        let task = async move {
            let _guard = guard;
            let _storage = handle.lock_storage().await;
            job.await
        };
        JobHandle {
            label,
            inner: tokio::spawn(task.in_current_span()),
        }
    }

    /// Fetch the resource and write its content locally
    pub fn schedule_get(
        &self,
        handle: &Arc<ConnectionHandle>,
        resource: RemoteResource,
    ) -> JobHandle<JobOutcome> {
        let inner = self.inner.clone();
        let conn = handle.clone();
        self.spawn(format!("GET {}", resource.path), handle, async move {
            let info = conn.info().await;
            let request = resource.get_request(&info)?;
            let response = inner.client.send(&info, request).await?;
            inner.write_from_response(conn.name(), &resource, &response.document)
        })
    }

    /// Write content already carried by a listing response, under the same rules as a GET
    pub fn schedule_write(
        &self,
        handle: &Arc<ConnectionHandle>,
        resource: RemoteResource,
        document: Value,
    ) -> JobHandle<JobOutcome> {
        let inner = self.inner.clone();
        let conn = handle.clone();
        self.spawn(format!("WRITE {}", resource.path), handle, async move {
            inner.write_from_response(conn.name(), &resource, &document)
        })
    }

    /// Create the resource on the device from its local state
    pub fn schedule_post(
        &self,
        handle: &Arc<ConnectionHandle>,
        resource: RemoteResource,
    ) -> JobHandle<JobOutcome> {
        let inner = self.inner.clone();
        let conn = handle.clone();
        self.spawn(format!("POST {}", resource.path), handle, async move {
            let info = conn.info().await;
            match resource.transfer() {
                Transfer::Json => {
                    let content = inner.store.read_all(&resource.path)?;
                    inner.client.send(&info, resource.create_request(&info, &content)?).await?;
                }
                Transfer::Upload => {
                    let uri = resource.object_uri(&info)?;
                    inner.upload(&info, Method::Post, &uri, &resource.path).await?;
                }
                Transfer::Container => {
                    inner.client.send(&info, resource.create_request(&info, &[])?).await?;
                }
            }
            inner.record(conn.name(), &resource.path)?;
            info!("Created {}", resource.path);
            Ok(JobOutcome::Created(resource.path))
        })
    }

    /// Push local changes. Skipped without a request when the local stamp still equals
    /// the stamp recorded at the last response.
    pub fn schedule_patch(
        &self,
        handle: &Arc<ConnectionHandle>,
        resource: RemoteResource,
    ) -> JobHandle<JobOutcome> {
        let inner = self.inner.clone();
        let conn = handle.clone();
        self.spawn(format!("PATCH {}", resource.path), handle, async move {
            let local = inner.store.modification_stamp(&resource.path)?;
            if inner.tracker.response_stamp(conn.name(), &resource.path)? == Some(local) {
                warn!(
                    path = %resource.path,
                    stamp = local,
                    "Local file unchanged since last synchronization, skipping update"
                );
                return Ok(JobOutcome::Skipped(resource.path));
            }

            let info = conn.info().await;
            match resource.transfer() {
                Transfer::Json => {
                    let content = inner.store.read_all(&resource.path)?;
                    inner.client.send(&info, resource.update_request(&info, &content)?).await?;
                }
                Transfer::Upload => {
                    let uri = resource.object_uri(&info)?;
                    inner.upload(&info, Method::Put, &uri, &resource.path).await?;
                }
                Transfer::Container => return Err(SyncError::NotRemote(resource.path.to_string())),
            }
            inner.record(conn.name(), &resource.path)?;
            info!("Pushed {}", resource.path);
            Ok(JobOutcome::Pushed(resource.path))
        })
    }

    /// Delete on the device (retrying while it reports being busy), then locally
    pub fn schedule_delete(
        &self,
        handle: &Arc<ConnectionHandle>,
        resource: RemoteResource,
    ) -> JobHandle<JobOutcome> {
        let inner = self.inner.clone();
        let conn = handle.clone();
        self.spawn(format!("DELETE {}", resource.path), handle, async move {
            let info = conn.info().await;
            let request = resource.delete_request(&info)?;
            inner
                .delete_retry
                .run(|| inner.client.send(&info, request.clone()))
                .await?;
            forget_local(&inner.tracker, conn.name(), &resource.path)?;
            info!("Deleted {}", resource.path);
            Ok(JobOutcome::Deleted(resource.path))
        })
    }
}

impl SchedulerInner {
    fn write_from_response(
        &self,
        connection: &str,
        resource: &RemoteResource,
        document: &Value,
    ) -> Result<JobOutcome> {
        let content = resource.content_from_response(document)?;
        self.store.write(&resource.path, &content, true)?;
        self.record(connection, &resource.path)?;
        debug!("Wrote {} bytes to {}", content.len(), resource.path);
        Ok(JobOutcome::Fetched(resource.path.clone()))
    }

    fn record(&self, connection: &str, path: &ResourcePath) -> Result<()> {
        if self.store.exists(path) {
            self.tracker.update_modification_stamp_map(connection, path)?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        info: &ConnectionInfo,
        method: Method,
        uri: &str,
        path: &ResourcePath,
    ) -> Result<()> {
        let acquire = self.upload_slot.acquire();
        let _slot = match tokio::time::timeout(self.upload_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(SyncError::Rest(RestFailure::new(RestError::Cancelled, method, uri)))
            }
            Err(_) => {
                warn!("No upload slot for {} within {:?}", path, self.upload_timeout);
                return Err(SyncError::Rest(RestFailure::new(RestError::Timeout, method, uri)));
            }
        };
        let (progress, _) = watch::channel(UploadProgress::default());
        self.uploader
            .upload(info, method, uri, path, Some(&progress), &CancelFlag::new())
            .await?;
        Ok(())
    }
}

/// Forget stamps of `path` and everything below it, then delete the local copy
pub(crate) fn forget_local(
    tracker: &ModificationTracker,
    connection: &str,
    path: &ResourcePath,
) -> Result<()> {
    let store = tracker.store();
    let mut pending = vec![path.clone()];
    while let Some(current) = pending.pop() {
        tracker.forget(connection, &current)?;
        if let Ok(entries) = store.list(&current) {
            pending.extend(entries.into_iter().map(|e| current.join(&e.name)));
        }
    }
    store.delete(path)?;
    Ok(())
}
