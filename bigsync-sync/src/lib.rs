//! Synchronization engine for bigsync
//!
//! Ties the model and REST layers together:
//! - Per-connection state machine taking connections online and offline
//! - Request scheduling with per-connection storage serialization
//! - Reconciliation of the workspace with device listings
//! - The application context owning every collaborator

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod flow;
pub mod handle;
pub mod loaders;
pub mod resources;
pub mod retry;
pub mod scheduler;
pub mod state;

pub use config::SyncConfig;
pub use context::AppContext;
pub use errors::{Result, SyncError};
pub use events::{StatusChannel, StatusEvent, StatusLevel};
pub use flow::{FlowTracker, LoadState};
pub use handle::{ConnectionHandle, ConnectionPhase};
pub use loaders::RemoteEntry;
pub use resources::{RemoteResource, Transfer};
pub use retry::DeleteRetry;
pub use scheduler::{JobHandle, JobOutcome, RequestScheduler};
pub use state::{
    ConnectionStateMachine, OfflineOutcome, ProceedWithoutSync, SyncDecision, SyncPrompt,
};
