//! Shared fixtures for the sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use bigsync_model::{
    ConnectionInfo, LocalFileStore, MemoryFileStore, ModelError, PropertyKey, ResourcePath,
    StoreEntry,
};
use bigsync_rest::testing::RecordingTransport;
use bigsync_rest::{HttpResponse, Method, ReachabilityProbe};
use bigsync_sync::{AppContext, SyncConfig, SyncDecision, SyncPrompt};

pub const CONNECTION: &str = "lab";

/// Prompt answering with a fixed decision and remembering what it was asked
pub struct ScriptedPrompt {
    decision: Mutex<SyncDecision>,
    pub asked: Mutex<Vec<Vec<ResourcePath>>>,
}

impl ScriptedPrompt {
    pub fn new(decision: SyncDecision) -> Arc<Self> {
        Arc::new(Self {
            decision: Mutex::new(decision),
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn answer(&self, decision: SyncDecision) {
        *self.decision.lock().unwrap() = decision;
    }

    pub fn questions(&self) -> Vec<Vec<ResourcePath>> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncPrompt for ScriptedPrompt {
    async fn choose(&self, _connection: &str, edited: &[ResourcePath]) -> SyncDecision {
        self.asked.lock().unwrap().push(edited.to_vec());
        self.decision.lock().unwrap().clone()
    }
}

/// Probe that holds every caller until the test opens the gate
pub struct GatedProbe {
    gate: Semaphore,
}

impl GatedProbe {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl ReachabilityProbe for GatedProbe {
    async fn is_reachable(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.gate.acquire().await.is_ok()
    }
}

/// In-memory store whose property writes can be switched to fail
#[derive(Default)]
pub struct LockableProperties {
    inner: MemoryFileStore,
    locked: AtomicBool,
}

impl LockableProperties {
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }
}

impl LocalFileStore for LockableProperties {
    fn exists(&self, path: &ResourcePath) -> bool {
        self.inner.exists(path)
    }

    fn read_all(&self, path: &ResourcePath) -> bigsync_model::Result<Vec<u8>> {
        self.inner.read_all(path)
    }

    fn write(
        &self,
        path: &ResourcePath,
        contents: &[u8],
        create: bool,
    ) -> bigsync_model::Result<()> {
        self.inner.write(path, contents, create)
    }

    fn modification_stamp(&self, path: &ResourcePath) -> bigsync_model::Result<i64> {
        self.inner.modification_stamp(path)
    }

    fn set_modification_stamp(&self, path: &ResourcePath, stamp: i64) -> bigsync_model::Result<()> {
        self.inner.set_modification_stamp(path, stamp)
    }

    fn create_folder_recursive(&self, path: &ResourcePath) -> bigsync_model::Result<()> {
        self.inner.create_folder_recursive(path)
    }

    fn list(&self, path: &ResourcePath) -> bigsync_model::Result<Vec<StoreEntry>> {
        self.inner.list(path)
    }

    fn delete(&self, path: &ResourcePath) -> bigsync_model::Result<()> {
        self.inner.delete(path)
    }

    fn persistent_property(
        &self,
        project: &str,
        key: &PropertyKey,
    ) -> bigsync_model::Result<Option<String>> {
        self.inner.persistent_property(project, key)
    }

    fn set_persistent_property(
        &self,
        project: &str,
        key: &PropertyKey,
        value: Option<&str>,
    ) -> bigsync_model::Result<()> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "properties are read-only",
            )));
        }
        self.inner.set_persistent_property(project, key, value)
    }

    fn clear_persistent_properties(&self, project: &str) -> bigsync_model::Result<()> {
        self.inner.clear_persistent_properties(project)
    }
}

pub struct Fixture {
    pub store: Arc<MemoryFileStore>,
    pub transport: Arc<RecordingTransport>,
    pub prompt: Arc<ScriptedPrompt>,
    pub ctx: Arc<AppContext>,
}

pub fn config() -> SyncConfig {
    SyncConfig {
        pacing_ms: 0,
        ..SyncConfig::default()
    }
}

pub async fn fixture_with_probe(probe: Arc<dyn ReachabilityProbe>) -> Fixture {
    let store = Arc::new(MemoryFileStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let prompt = ScriptedPrompt::new(SyncDecision::ProceedWithoutSync);
    let ctx = AppContext::new(config(), store.clone(), transport.clone(), probe, prompt.clone())
        .expect("context");
    ctx.add_connection(
        CONNECTION,
        ConnectionInfo::new("bigip.lab").with_credentials("admin", "admin"),
    )
    .await
    .expect("connection");
    Fixture {
        store,
        transport,
        prompt,
        ctx: Arc::new(ctx),
    }
}

pub async fn fixture() -> Fixture {
    fixture_with_probe(Arc::new(bigsync_rest::testing::StaticProbe(true))).await
}

pub fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

pub fn version_document(version: &str) -> Value {
    json!({
        "entries": {
            "https://localhost/mgmt/tm/sys/version/0": {
                "nestedStats": { "entries": { "Version": { "description": version } } }
            }
        }
    })
}

/// Answer the listing endpoints of a small LTM + iLX device
pub fn serve_device(transport: &RecordingTransport, version: &str) {
    transport.route(Method::Get, "sys/version", 200, version_document(version));
    transport.route(
        Method::Get,
        "sys/provision",
        200,
        json!({"items": [
            {"name": "ltm", "level": "nominal"},
            {"name": "gtm", "level": "none"},
            {"name": "ilx", "level": "nominal"}
        ]}),
    );
    transport.route(Method::Get, "auth/partition", 200, json!({"items": [{"name": "Common"}]}));
    serve_rules(
        transport,
        &[
            ("redirect", "when HTTP_REQUEST { HTTP::redirect / }"),
            ("block", "when CLIENT_ACCEPTED { reject }"),
        ],
    );
    let hosts = json!({
        "name": "hosts",
        "partition": "Common",
        "type": "ip",
        "records": [{"name": "10.0.0.1/32", "data": "web"}]
    });
    transport.route(
        Method::Get,
        "ltm/data-group/internal",
        200,
        json!({ "items": [hosts.clone()] }),
    );
    transport.route(Method::Get, "~Common~hosts", 200, hosts);
    transport.route(
        Method::Get,
        "ilx/workspace",
        200,
        json!({"items": [{
            "name": "ws",
            "partition": "Common",
            "extensions": [{"name": "ext", "files": [{"name": "index.js"}]}],
            "rules": []
        }]}),
    );
    transport.route_reply(
        Method::Get,
        "file,index.js",
        Ok(HttpResponse::new(200, "module.exports = {};")),
    );
    transport.route(Method::Get, "iapp/directory", 200, json!({"items": []}));
}

/// Replace the LTM rule listing and answer GETs of the listed rules
pub fn serve_rules(transport: &RecordingTransport, rules: &[(&str, &str)]) {
    let items: Vec<Value> = rules
        .iter()
        .map(|(name, body)| json!({"name": name, "partition": "Common", "apiAnonymous": body}))
        .collect();
    transport.route(Method::Get, "ltm/rule", 200, json!({ "items": items }));
    for item in items {
        let name = item["name"].as_str().unwrap_or_default().to_string();
        transport.route(Method::Get, &format!("ltm/rule/~Common~{}/", name), 200, item);
    }
}
