//! HTTP transport collaborator
//!
//! [`HttpTransport`] performs one request and hands back status and raw body. The
//! production implementation wraps `reqwest`; a forward proxy (with optional
//! credentials) is applied per request.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

use bigsync_model::ProxySettings;

use crate::errors::{RestError, Result};
use crate::method::Method;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub proxy: Option<ProxySettings>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            proxy: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    /// Skip certificate validation on direct connections. Proxied connections always
    /// skip it, since the proxy re-terminates TLS.
    pub accept_invalid_certs: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            accept_invalid_certs: true,
        }
    }
}

/// `reqwest`-backed transport. Proxied clients are built lazily and cached per proxy.
pub struct ReqwestTransport {
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
    options: TransportOptions,
}

impl ReqwestTransport {
    pub fn new(options: TransportOptions) -> Result<Self> {
        let direct = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;
        Ok(Self {
            direct,
            proxied: Mutex::new(HashMap::new()),
            options,
        })
    }

    fn client_for(&self, proxy: Option<&ProxySettings>) -> Result<reqwest::Client> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let key = format!("{}:{}:{}", proxy.host, proxy.port, proxy.user.as_deref().unwrap_or(""));
        let mut cache = self
            .proxied
            .lock()
            .map_err(|e| RestError::Transport(e.to_string()))?;
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }

        let mut forward = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?;
        if let Some(user) = proxy.user.as_deref() {
            forward = forward.basic_auth(user, proxy.password.as_deref().unwrap_or(""));
        }
        let client = reqwest::Client::builder()
            .timeout(self.options.request_timeout)
            .proxy(forward)
            .danger_accept_invalid_certs(true)
            .build()?;
        debug!("Built proxied HTTP client for {}:{}", proxy.host, proxy.port);
        cache.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = self.client_for(request.proxy.as_ref())?;
        trace!("{} {}", request.method, request.url);

        let mut builder = client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }
}
