//! bigsync: keeps BigIP configuration artifacts (iRules, data-groups, iLX workspaces,
//! iAppsLX packages) in a local workspace synchronized with the device's REST API.
//!
//! This crate is the root of the workspace. It re-exports the member crates and sets
//! up logging; the cross-crate tests live in `tests/`.

pub use bigsync_model as model;
pub use bigsync_rest as rest;
pub use bigsync_sync as sync;

pub use bigsync_sync::{AppContext, SyncConfig, SyncError};

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. Without explicit directives the filter comes
/// from `RUST_LOG`, defaulting to `info`.
pub fn init_logging(filter: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}
