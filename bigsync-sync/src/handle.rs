//! Per-connection runtime state

use std::fmt;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use bigsync_model::ConnectionInfo;

use crate::flow::FlowTracker;

/// Where a connection is in its lifecycle. Everything past `Offline` counts as online;
/// the intermediate phases are passed through while going online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionPhase {
    Offline,
    Connecting,
    VersionChecked,
    ProvisioningLoaded,
    PartitionsLoaded,
    ResourcesLoaded,
}

impl ConnectionPhase {
    pub fn is_online(&self) -> bool {
        *self == ConnectionPhase::ResourcesLoaded
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct ConnectionHandle {
    name: String,
    info: RwLock<ConnectionInfo>,
    /// Serializes jobs touching this connection's storage
    write_lock: Mutex<()>,
    phase: RwLock<ConnectionPhase>,
    flow: FlowTracker,
}

impl ConnectionHandle {
    pub fn new(name: impl Into<String>, info: ConnectionInfo) -> Self {
        Self {
            name: name.into(),
            info: RwLock::new(info),
            write_lock: Mutex::new(()),
            phase: RwLock::new(ConnectionPhase::Offline),
            flow: FlowTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn info(&self) -> ConnectionInfo {
        self.info.read().await.clone()
    }

    pub async fn update_info<F: FnOnce(&mut ConnectionInfo)>(&self, update: F) {
        let mut info = self.info.write().await;
        update(&mut info);
    }

    pub async fn lock_storage(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn phase(&self) -> ConnectionPhase {
        *self.phase.read().await
    }

    pub async fn set_phase(&self, phase: ConnectionPhase) {
        *self.phase.write().await = phase;
    }

    pub async fn is_online(&self) -> bool {
        self.phase().await.is_online()
    }

    pub fn flow(&self) -> &FlowTracker {
        &self.flow
    }
}
