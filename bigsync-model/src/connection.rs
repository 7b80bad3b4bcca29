//! Connection attributes and their persisted project properties

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::errors::Result;
use crate::properties::PropertyKey;
use crate::store::LocalFileStore;

pub const PROP_ADDRESS: &str = "address";
pub const PROP_IP: &str = "ip";
pub const PROP_USER: &str = "user";
pub const PROP_PASSWORD: &str = "password";
pub const PROP_SECURE_STORE: &str = "secureStore";
pub const PROP_PROXY_HOST: &str = "proxyHost";
pub const PROP_PROXY_PORT: &str = "proxyPort";
pub const PROP_PROXY_USER: &str = "proxyUser";
pub const PROP_PROXY_PASSWORD: &str = "proxyPassword";
pub const PROP_ONLINE: &str = "onlineMode";
pub const PROP_VERSION: &str = "version";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// Password is kept in an external secure store and never written to properties
    pub secure_store: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Device-level attributes of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub address: String,
    pub ip: Option<String>,
    pub credentials: Credentials,
    pub proxy: Option<ProxySettings>,
    pub version: Option<String>,
    pub modules: BTreeSet<String>,
    pub partitions: BTreeSet<String>,
    pub online: bool,
}

impl ConnectionInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Credentials {
            user: user.to_string(),
            password: password.to_string(),
            secure_store: false,
        };
        self
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn is_provisioned(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    /// Write the connection's settings as properties of `project`
    pub fn persist(&self, store: &dyn LocalFileStore, project: &str) -> Result<()> {
        let set = |name: &str, value: Option<&str>| {
            store.set_persistent_property(project, &PropertyKey::plugin(name), value)
        };

        set(PROP_ADDRESS, Some(&self.address))?;
        set(PROP_IP, self.ip.as_deref())?;
        set(PROP_USER, Some(&self.credentials.user))?;
        set(
            PROP_SECURE_STORE,
            Some(if self.credentials.secure_store { "true" } else { "false" }),
        )?;
        if self.credentials.secure_store {
            set(PROP_PASSWORD, None)?;
        } else {
            set(PROP_PASSWORD, Some(&self.credentials.password))?;
        }

        let proxy = self.proxy.as_ref();
        set(PROP_PROXY_HOST, proxy.map(|p| p.host.as_str()))?;
        set(PROP_PROXY_PORT, proxy.map(|p| p.port.to_string()).as_deref())?;
        set(PROP_PROXY_USER, proxy.and_then(|p| p.user.as_deref()))?;
        set(PROP_PROXY_PASSWORD, proxy.and_then(|p| p.password.as_deref()))?;

        set(PROP_VERSION, self.version.as_deref())?;
        set(PROP_ONLINE, Some(if self.online { "true" } else { "false" }))?;

        debug!("Persisted connection settings for project {}", project);
        Ok(())
    }

    /// Rebuild connection settings from the properties of `project`.
    /// Returns `None` when the project carries no connection.
    pub fn restore(store: &dyn LocalFileStore, project: &str) -> Result<Option<Self>> {
        let get = |name: &str| store.persistent_property(project, &PropertyKey::plugin(name));

        let Some(address) = get(PROP_ADDRESS)? else {
            return Ok(None);
        };

        let secure_store = get(PROP_SECURE_STORE)?.as_deref() == Some("true");
        let credentials = Credentials {
            user: get(PROP_USER)?.unwrap_or_default(),
            password: get(PROP_PASSWORD)?.unwrap_or_default(),
            secure_store,
        };

        let proxy = match (get(PROP_PROXY_HOST)?, get(PROP_PROXY_PORT)?) {
            (Some(host), Some(port)) => port.parse().ok().map(|port| ProxySettings {
                host,
                port,
                user: None,
                password: None,
            }),
            _ => None,
        };
        let proxy = match proxy {
            Some(mut proxy) => {
                proxy.user = get(PROP_PROXY_USER)?;
                proxy.password = get(PROP_PROXY_PASSWORD)?;
                Some(proxy)
            }
            None => None,
        };

        Ok(Some(Self {
            address,
            ip: get(PROP_IP)?,
            credentials,
            proxy,
            version: get(PROP_VERSION)?,
            modules: BTreeSet::new(),
            partitions: BTreeSet::new(),
            online: get(PROP_ONLINE)?.as_deref() == Some("true"),
        }))
    }

    /// Persist only the online flag
    pub fn persist_online(store: &dyn LocalFileStore, project: &str, online: bool) -> Result<()> {
        store.set_persistent_property(
            project,
            &PropertyKey::plugin(PROP_ONLINE),
            Some(if online { "true" } else { "false" }),
        )
    }
}
