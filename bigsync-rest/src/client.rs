//! REST client for BigIP management endpoints
//!
//! Every send goes through the same steps:
//! 1. Probe the device (or its proxy) and fail fast with `Unreachable`
//! 2. Attach Basic credentials and send through the transport
//! 3. Classify the status and parse the body leniently
//! 4. Pause briefly after a success so bursts of requests do not overload the device

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use bigsync_model::ConnectionInfo;

use crate::errors::{RestError, RestFailure};
use crate::json::{parse_lenient, wrap_text};
use crate::method::Method;
use crate::probe::{probe_target, ReachabilityProbe};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

const AUTH_REQUIRED_TITLE: &str = "Authentication required!";
const AUTH_TITLE_LINE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Text,
    OctetStream,
}

impl ContentKind {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Json => "application/json",
            ContentKind::Text => "text/plain",
            ContentKind::OctetStream => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub uri: String,
    pub content_kind: ContentKind,
    pub body: Option<Bytes>,
    /// Response is plain text to be wrapped as `{"content": ..}`
    pub expect_text: bool,
    pub headers: Vec<(String, String)>,
}

impl RestRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            content_kind: ContentKind::Json,
            body: None,
            expect_text: false,
            headers: Vec::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::Delete, uri)
    }

    pub fn json(method: Method, uri: impl Into<String>, body: &Value) -> Self {
        let mut request = Self::new(method, uri);
        request.body = Some(Bytes::from(body.to_string()));
        request
    }

    pub fn octets(method: Method, uri: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(method, uri);
        request.content_kind = ContentKind::OctetStream;
        request.body = Some(body);
        request
    }

    pub fn expect_text(mut self) -> Self {
        self.expect_text = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub method: Method,
    pub uri: String,
    pub status: u16,
    pub document: Value,
}

impl RestResponse {
    /// Text content of a response requested with `expect_text`
    pub fn content(&self) -> Option<&str> {
        self.document.get(crate::json::CONTENT_FIELD).and_then(Value::as_str)
    }
}

pub type SendResult = std::result::Result<RestResponse, RestFailure>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub probe_timeout: Duration,
    /// Pause after each successful request
    pub pacing: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            pacing: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    probe: Arc<dyn ReachabilityProbe>,
    options: ClientOptions,
}

impl RestClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        probe: Arc<dyn ReachabilityProbe>,
        options: ClientOptions,
    ) -> Self {
        Self {
            transport,
            probe,
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn send(&self, connection: &ConnectionInfo, request: RestRequest) -> SendResult {
        let method = request.method;
        let uri = request.uri.clone();

        let (host, port) = probe_target(connection);
        if !self
            .probe
            .is_reachable(&host, port, self.options.probe_timeout)
            .await
        {
            warn!("{} {} skipped: {}:{} is unreachable", method, uri, host, port);
            return Err(RestFailure::new(
                RestError::Unreachable(format!("{}:{}", host, port)),
                method,
                uri,
            ));
        }

        let mut http = HttpRequest::new(method, &uri)
            .header("Authorization", basic_auth(connection))
            .header("Accept", "application/json")
            .proxy(connection.proxy.clone().filter(|_| !connection.address.is_empty()));
        if let Some(body) = request.body {
            http = http
                .header("Content-Type", request.content_kind.mime())
                .body(body);
        }
        for (name, value) in request.headers {
            http = http.header(name, value);
        }

        debug!("{} {}", method, uri);
        let response = match self.transport.send(http).await {
            Ok(response) => response,
            Err(error) => {
                log_failure(&error, method, &uri);
                return Err(RestFailure::new(error, method, uri));
            }
        };

        match classify(&response, request.expect_text) {
            Ok(document) => {
                if !self.options.pacing.is_zero() {
                    tokio::time::sleep(self.options.pacing).await;
                }
                Ok(RestResponse {
                    method,
                    uri,
                    status: response.status,
                    document,
                })
            }
            Err(error) => {
                log_failure(&error, method, &uri);
                Err(RestFailure::new(error, method, uri).with_body(response.text()))
            }
        }
    }

    pub async fn get(&self, connection: &ConnectionInfo, uri: impl Into<String>) -> SendResult {
        self.send(connection, RestRequest::get(uri)).await
    }

    pub async fn get_text(
        &self,
        connection: &ConnectionInfo,
        uri: impl Into<String>,
    ) -> SendResult {
        self.send(connection, RestRequest::get(uri).expect_text()).await
    }

    pub async fn delete(&self, connection: &ConnectionInfo, uri: impl Into<String>) -> SendResult {
        self.send(connection, RestRequest::delete(uri)).await
    }
}

fn basic_auth(connection: &ConnectionInfo) -> String {
    let credentials = &connection.credentials;
    let token = STANDARD.encode(format!("{}:{}", credentials.user, credentials.password));
    format!("Basic {}", token)
}

fn log_failure(error: &RestError, method: Method, uri: &str) {
    match error {
        RestError::Cancelled => info!("{} {} cancelled", method, uri),
        _ => warn!("{} {} failed: {}", method, uri, error),
    }
}

/// The device answers some unauthenticated requests with an HTML login page whose
/// title sits on the sixth line
fn is_auth_page(body: &str) -> bool {
    body.lines().nth(AUTH_TITLE_LINE).is_some_and(|line| {
        let line = line.trim();
        let title = line
            .strip_prefix("<title>")
            .and_then(|l| l.strip_suffix("</title>"))
            .unwrap_or(line);
        title.trim() == AUTH_REQUIRED_TITLE
    })
}

/// Success statuses carry the document; the login page fingerprint only counts on
/// failures and on bodies that should have been JSON but are not
fn classify(response: &HttpResponse, expect_text: bool) -> std::result::Result<Value, RestError> {
    let text = response.text();
    if (200..300).contains(&response.status) {
        if expect_text {
            return Ok(wrap_text(text));
        }
        return parse_lenient(&response.body).map_err(|e| {
            if is_auth_page(&text) {
                RestError::AuthenticationFailure
            } else {
                RestError::Protocol {
                    status: response.status,
                    message: format!("malformed JSON body: {}", e),
                }
            }
        });
    }

    if response.status == 401 || is_auth_page(&text) {
        return Err(RestError::AuthenticationFailure);
    }
    let message = parse_lenient(&response.body)
        .ok()
        .and_then(|doc| doc.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| text.trim().to_string());
    if response.status == 409 || message.to_ascii_lowercase().contains("busy") {
        return Err(RestError::ResourceConflict(message));
    }
    Err(RestError::Protocol {
        status: response.status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, StaticProbe};
    use serde_json::json;

    fn client(transport: Arc<RecordingTransport>, reachable: bool) -> RestClient {
        RestClient::new(
            transport,
            Arc::new(StaticProbe(reachable)),
            ClientOptions {
                probe_timeout: Duration::from_millis(10),
                pacing: Duration::ZERO,
            },
        )
    }

    fn conn() -> ConnectionInfo {
        ConnectionInfo::new("bigip.lab").with_credentials("admin", "admin")
    }

    #[tokio::test]
    async fn test_unreachable_never_calls_transport() {
        let transport = Arc::new(RecordingTransport::new());
        let failure = client(transport.clone(), false)
            .get(&conn(), "https://bigip.lab/mgmt/tm/sys/version")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, RestError::Unreachable(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_basic_auth_and_json_body() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(200, json!({"items": []}));
        let response = client(transport.clone(), true)
            .send(
                &conn(),
                RestRequest::json(
                    Method::Post,
                    "https://bigip.lab/mgmt/tm/ltm/rule/",
                    &json!({"name": "a"}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(response.document, json!({"items": []}));

        let sent = &transport.requests()[0];
        assert_eq!(sent.header_value("Authorization"), Some("Basic YWRtaW46YWRtaW4="));
        assert_eq!(sent.header_value("Content-Type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_text_is_wrapped() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push(200, "const x = 1;\n");
        let response = client(transport, true)
            .get_text(&conn(), "https://bigip.lab/mgmt/shared/iapp/file/pkg/main.js")
            .await
            .unwrap();
        assert_eq!(response.content(), Some("const x = 1;\n"));
    }

    #[tokio::test]
    async fn test_authentication_failures() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push(401, "");
        transport.push(
            200,
            "<html>\n<head>\n<meta charset=\"utf-8\">\n<link rel=\"icon\">\n\
             <style></style>\n<title>Authentication required!</title>\n</head>",
        );
        let client = client(transport, true);
        for _ in 0..2 {
            let failure = client.get(&conn(), "https://bigip.lab/x").await.unwrap_err();
            assert_eq!(failure.error, RestError::AuthenticationFailure);
        }
    }

    #[tokio::test]
    async fn test_login_title_in_downloaded_text_is_content() {
        let page = "<html>\n<head>\n<meta charset=\"utf-8\">\n<link rel=\"icon\">\n\
                    <style></style>\n<title>Authentication required!</title>\n</head>";
        let transport = Arc::new(RecordingTransport::new());
        transport.push(200, page);
        transport.push(403, page);
        let client = client(transport, true);

        let uri = "https://bigip.lab/mgmt/shared/iapp/file/pkg/presentation/login.html";
        let response = client.get_text(&conn(), uri).await.unwrap();
        assert_eq!(response.content(), Some(page));

        let failure = client.get_text(&conn(), uri).await.unwrap_err();
        assert_eq!(failure.error, RestError::AuthenticationFailure);
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_protocol_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push(200, "<html>oops</html>");
        let failure = client(transport, true)
            .get(&conn(), "https://bigip.lab/mgmt/tm/ltm/rule/")
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            RestError::Protocol { status: 200, ref message }
                if message.starts_with("malformed JSON body")
        ));
        assert_eq!(failure.raw_body.as_deref(), Some("<html>oops</html>"));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(400, json!({"code": 400, "message": "workspace ws is busy"}));
        transport.push_json(404, json!({"code": 404, "message": "not found"}));
        let client = client(transport, true);

        let busy = client.delete(&conn(), "https://bigip.lab/a").await.unwrap_err();
        assert!(busy.error.is_conflict());
        assert!(busy.raw_body.unwrap().contains("busy"));

        let missing = client.get(&conn(), "https://bigip.lab/b").await.unwrap_err();
        assert_eq!(
            missing.error,
            RestError::Protocol { status: 404, message: "not found".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_after_success() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(200, json!({}));
        let client = RestClient::new(
            transport,
            Arc::new(StaticProbe(true)),
            ClientOptions::default(),
        );
        let started = tokio::time::Instant::now();
        client.get(&conn(), "https://bigip.lab/x").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
