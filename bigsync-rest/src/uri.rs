//! REST URI construction
//!
//! ```text
//! https://{address}/mgmt/tm/{module}/{component}/~{partition}~{name}/?$select=a,b
//! https://{address}/mgmt/tm/ilx/workspace/~Common~ws/?options=extension,ext,file,index.js
//! https://{address}/mgmt/shared/iapp/file/{path}
//! ```

use bigsync_model::ConnectionInfo;

pub const SYS_VERSION: &str = "mgmt/tm/sys/version";
pub const SYS_PROVISION: &str = "mgmt/tm/sys/provision";
pub const AUTH_PARTITION: &str = "mgmt/tm/auth/partition";
pub const ILX_WORKSPACE: &str = "mgmt/tm/ilx/workspace";
pub const IAPP_DIRECTORY: &str = "mgmt/shared/iapp/directory";
pub const IAPP_FILE: &str = "mgmt/shared/iapp/file";

/// Scheme and authority for a connection. A connection without an address is reached
/// through its proxy endpoint.
pub fn base_url(connection: &ConnectionInfo) -> String {
    match (&connection.proxy, connection.address.is_empty()) {
        (Some(proxy), true) => format!("https://{}:{}/", proxy.host, proxy.port),
        _ => format!("https://{}/", connection.address),
    }
}

#[derive(Debug, Clone)]
pub struct UriBuilder {
    path: String,
    query: Option<String>,
}

impl UriBuilder {
    /// `https://{address}/{endpoint}`
    pub fn endpoint(connection: &ConnectionInfo, endpoint: &str) -> Self {
        Self {
            path: format!("{}{}", base_url(connection), endpoint.trim_matches('/')),
            query: None,
        }
    }

    /// `https://{address}/mgmt/tm/{module}/{component}/`
    pub fn tm(connection: &ConnectionInfo, module: &str, component: &str) -> Self {
        let mut builder = Self::endpoint(connection, &format!("mgmt/tm/{}/{}", module, component));
        builder.path.push('/');
        builder
    }

    /// Append a path segment (a trailing `/` is not added)
    pub fn segment(mut self, segment: &str) -> Self {
        if !self.path.ends_with('/') {
            self.path.push('/');
        }
        self.path.push_str(segment.trim_start_matches('/'));
        self
    }

    /// `~{partition}~{name}/`
    pub fn object(self, partition: &str, name: &str) -> Self {
        let id = object_id(partition, name);
        self.segment(&id)
    }

    /// `?$select=a,b`
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.query = Some(format!("$select={}", fields.join(",")));
        self
    }

    /// `?options=k,v[,k2,v2...]`
    pub fn options(mut self, pairs: &[(&str, &str)]) -> Self {
        let flat: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("{},{}", k, v))
            .collect();
        self.query = Some(format!("options={}", flat.join(",")));
        self
    }

    pub fn build(self) -> String {
        match self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path,
        }
    }
}

pub fn object_id(partition: &str, name: &str) -> String {
    format!("~{}~{}/", partition, name)
}
