//! In-memory doubles for the HTTP transport and the reachability probe

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{RestError, Result};
use crate::method::Method;
use crate::probe::ReachabilityProbe;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

type Reply = Result<HttpResponse>;

struct Route {
    method: Method,
    fragment: String,
    reply: Reply,
}

/// Records every request. Replies come from the one-shot queue first, then from the
/// most recently added matching route, then default to `200 {}`.
#[derive(Default)]
pub struct RecordingTransport {
    queue: Mutex<VecDeque<Reply>>,
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: impl Into<Bytes>) {
        self.push_reply(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(status, body.to_string());
    }

    pub fn push_error(&self, error: RestError) {
        self.push_reply(Err(error));
    }

    fn push_reply(&self, reply: Reply) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(reply);
        }
    }

    /// Answer every `method` request whose URL contains `fragment`
    pub fn route(&self, method: Method, fragment: &str, status: u16, body: Value) {
        self.route_reply(method, fragment, Ok(HttpResponse::new(status, body.to_string())));
    }

    pub fn route_reply(&self, method: Method, fragment: &str, reply: Reply) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                method,
                fragment: fragment.to_string(),
                reply,
            });
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn count(&self, method: Method) -> usize {
        self.requests
            .lock()
            .map(|r| r.iter().filter(|req| req.method == method).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        let reply = match queued {
            Some(reply) => reply,
            None => self
                .routes
                .lock()
                .ok()
                .and_then(|routes| {
                    routes
                        .iter()
                        .rev()
                        .find(|r| r.method == request.method && request.url.contains(&r.fragment))
                        .map(|r| r.reply.clone())
                })
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}"))),
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        reply
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.0
    }
}
