//! Shared setup for the workspace-level tests

#![allow(dead_code)]

use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use bigsync::model::{FsFileStore, ResourcePath};
use bigsync::rest::testing::{RecordingTransport, StaticProbe};
use bigsync::rest::Method;
use bigsync::sync::ProceedWithoutSync;
use bigsync::{AppContext, SyncConfig};

pub const CONNECTION: &str = "edge";

pub fn config() -> SyncConfig {
    SyncConfig {
        pacing_ms: 0,
        ..SyncConfig::default()
    }
}

/// Context over an on-disk workspace, with requests answered by `transport`
pub fn open_context(
    workspace: &Path,
    transport: Arc<RecordingTransport>,
) -> (AppContext, Arc<FsFileStore>) {
    let store = Arc::new(FsFileStore::open(workspace).expect("workspace"));
    let ctx = AppContext::new(
        config(),
        store.clone(),
        transport,
        Arc::new(StaticProbe(true)),
        Arc::new(ProceedWithoutSync),
    )
    .expect("context");
    (ctx, store)
}

pub fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

/// A 13.1 device with LTM only, no rules or data-groups, and an empty iApps tree
pub fn serve_empty_device(transport: &RecordingTransport) {
    transport.route(
        Method::Get,
        "sys/version",
        200,
        json!({
            "entries": {
                "https://localhost/mgmt/tm/sys/version/0": {
                    "nestedStats": { "entries": { "Version": { "description": "13.1.0" } } }
                }
            }
        }),
    );
    transport.route(
        Method::Get,
        "sys/provision",
        200,
        json!({"items": [{"name": "ltm", "level": "nominal"}]}),
    );
    transport.route(Method::Get, "auth/partition", 200, json!({"items": [{"name": "Common"}]}));
    transport.route(Method::Get, "ltm/rule", 200, json!({"items": []}));
    transport.route(Method::Get, "ltm/data-group/internal", 200, json!({"items": []}));
    transport.route(Method::Get, "iapp/directory", 200, json!({"items": []}));
}
