//! Reachability probe run before every request

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use bigsync_model::ConnectionInfo;

pub const HTTPS_PORT: u16 = 443;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Probes by opening (and immediately dropping) a TCP connection
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe of {}:{} failed: {}", host, port, e);
                false
            }
            Err(_) => {
                debug!("Probe of {}:{} timed out after {:?}", host, port, timeout);
                false
            }
        }
    }
}

/// Host and port to probe: the proxy when one is configured, the device otherwise
pub fn probe_target(connection: &ConnectionInfo) -> (String, u16) {
    match &connection.proxy {
        Some(proxy) => (proxy.host.clone(), proxy.port),
        None => {
            let host = connection.ip.as_deref().unwrap_or(&connection.address);
            split_host_port(host)
        }
    }
}

fn split_host_port(raw: &str) -> (String, u16) {
    if let Some((host, port)) = raw.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            if !host.contains(':') {
                return (host.to_string(), port);
            }
        }
    }
    (raw.to_string(), HTTPS_PORT)
}
