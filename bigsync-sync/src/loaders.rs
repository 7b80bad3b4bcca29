//! Remote resource listings
//!
//! Each loader issues the listing requests for one kind of resource and turns the
//! response into [`RemoteEntry`] values. Nothing here touches the tree or the local
//! store; reconciliation does that with the results.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use bigsync_model::layout::{self, TrafficModule};
use bigsync_model::{ConnectionInfo, ResourcePath};
use bigsync_rest::json::{items, str_field};
use bigsync_rest::uri::{AUTH_PARTITION, IAPP_DIRECTORY, ILX_WORKSPACE, SYS_PROVISION, SYS_VERSION};
use bigsync_rest::version::version_from_document;
use bigsync_rest::{RestClient, RestError, RestFailure, UriBuilder};

use crate::errors::{Result, SyncError};
use crate::resources::RemoteResource;

const DEFAULT_PARTITION: &str = "Common";

/// Deepest iAppsLX folder level walked below the package root
const MAX_IAPPS_DEPTH: usize = 32;

/// One resource present on the device
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub resource: RemoteResource,
    pub is_folder: bool,
    /// Listing document carrying the content, when the listing includes it
    pub document: Option<Value>,
}

impl RemoteEntry {
    fn new(path: ResourcePath, is_folder: bool, document: Option<Value>) -> Result<Self> {
        let resource = RemoteResource::locate(&path, is_folder)
            .ok_or_else(|| SyncError::NotRemote(path.to_string()))?;
        Ok(Self {
            resource,
            is_folder,
            document,
        })
    }
}

pub async fn load_version(client: &RestClient, info: &ConnectionInfo) -> Result<String> {
    let uri = UriBuilder::endpoint(info, SYS_VERSION).build();
    let response = client.get(info, uri.clone()).await?;
    version_from_document(&response.document).ok_or_else(|| {
        SyncError::Rest(RestFailure::new(
            RestError::Protocol {
                status: response.status,
                message: "version missing from response".to_string(),
            },
            response.method,
            uri,
        ))
    })
}

/// Names of provisioned modules (level other than `none`)
pub async fn load_provisioning(
    client: &RestClient,
    info: &ConnectionInfo,
) -> Result<BTreeSet<String>> {
    let response = client
        .get(info, UriBuilder::endpoint(info, SYS_PROVISION).build())
        .await?;
    Ok(items(&response.document)
        .iter()
        .filter(|item| str_field(item, "level").is_some_and(|level| level != "none"))
        .filter_map(|item| str_field(item, "name").map(str::to_string))
        .collect())
}

pub async fn load_partitions(
    client: &RestClient,
    info: &ConnectionInfo,
) -> Result<BTreeSet<String>> {
    let uri = UriBuilder::endpoint(info, AUTH_PARTITION).select(&["name"]).build();
    let response = client.get(info, uri).await?;
    Ok(items(&response.document)
        .iter()
        .filter_map(|item| str_field(item, "name").map(str::to_string))
        .collect())
}

/// Name field of a listing item, when it is usable as a single path segment. Anything
/// else is skipped so device-supplied names never leave their folder.
fn name_of<'a>(item: &'a Value, field: &str) -> Option<&'a str> {
    let name = str_field(item, field)?;
    if ResourcePath::is_valid_name(name) {
        Some(name)
    } else {
        warn!(name, "Skipping listing entry with an unusable name");
        None
    }
}

fn partition_of(item: &Value) -> Option<&str> {
    match item.get("partition") {
        None => Some(DEFAULT_PARTITION),
        Some(_) => name_of(item, "partition"),
    }
}

/// Rules of a module; the listing carries their content
pub async fn load_rules(
    client: &RestClient,
    connection: &str,
    info: &ConnectionInfo,
    module: TrafficModule,
) -> Result<Vec<RemoteEntry>> {
    let uri = UriBuilder::tm(info, module.rest_name(), "rule").build();
    let response = client.get(info, uri).await?;
    let mut entries = Vec::new();
    for item in items(&response.document) {
        let (Some(name), Some(partition)) = (name_of(item, "name"), partition_of(item)) else {
            continue;
        };
        let path = layout::rule_path(connection, partition, module, name);
        entries.push(RemoteEntry::new(path, false, Some(item.clone()))?);
    }
    debug!("Listed {} {} rules", entries.len(), module.folder());
    Ok(entries)
}

/// Internal data-groups of a module; the listing carries their records
pub async fn load_data_groups(
    client: &RestClient,
    connection: &str,
    info: &ConnectionInfo,
    module: TrafficModule,
) -> Result<Vec<RemoteEntry>> {
    let uri = UriBuilder::tm(info, module.rest_name(), "data-group/internal").build();
    let response = client.get(info, uri).await?;
    let mut entries = Vec::new();
    for item in items(&response.document) {
        let (Some(name), Some(partition)) = (name_of(item, "name"), partition_of(item)) else {
            continue;
        };
        let path = layout::data_group_path(connection, partition, module, name);
        entries.push(RemoteEntry::new(path, false, Some(item.clone()))?);
    }
    debug!("Listed {} {} data-groups", entries.len(), module.folder());
    Ok(entries)
}

/// iLX workspaces with their extensions, extension files and rules. File content is not
/// part of the listing.
pub async fn load_ilx_workspaces(
    client: &RestClient,
    connection: &str,
    info: &ConnectionInfo,
) -> Result<Vec<RemoteEntry>> {
    let response = client
        .get(info, UriBuilder::endpoint(info, ILX_WORKSPACE).build())
        .await?;
    let mut entries = Vec::new();
    for workspace in items(&response.document) {
        let (Some(ws), Some(partition)) = (name_of(workspace, "name"), partition_of(workspace))
        else {
            continue;
        };
        entries.push(RemoteEntry::new(
            layout::workspace_path(connection, partition, ws),
            true,
            None,
        )?);

        for extension in list_field(workspace, "extensions") {
            let Some(ext) = name_of(extension, "name") else {
                continue;
            };
            let ext_path = layout::extension_path(connection, partition, ws, ext);
            entries.push(RemoteEntry::new(ext_path.clone(), true, None)?);
            for file in list_field(extension, "files") {
                if let Some(file) = name_of(file, "name") {
                    entries.push(RemoteEntry::new(ext_path.child(file)?, false, None)?);
                }
            }
        }

        for rule in list_field(workspace, "rules") {
            if let Some(rule) = name_of(rule, "name") {
                let rule = rule.strip_suffix(".tcl").unwrap_or(rule);
                if !ResourcePath::is_valid_name(rule) {
                    continue;
                }
                entries.push(RemoteEntry::new(
                    layout::ilx_rule_path(connection, partition, ws, rule),
                    false,
                    None,
                )?);
            }
        }
    }
    debug!("Listed {} iLX entries", entries.len());
    Ok(entries)
}

/// iAppsLX packages, walked folder by folder
pub async fn load_iapps(
    client: &RestClient,
    connection: &str,
    info: &ConnectionInfo,
) -> Result<Vec<RemoteEntry>> {
    let root = layout::iapps_path(connection);
    let mut entries = Vec::new();
    let mut pending = vec![root.clone()];

    while let Some(folder) = pending.pop() {
        let mut uri = UriBuilder::endpoint(info, IAPP_DIRECTORY);
        for segment in folder.segments().skip(root.depth()) {
            uri = uri.segment(segment);
        }
        let response = client.get(info, uri.build()).await?;
        for item in items(&response.document) {
            let Some(name) = name_of(item, "name") else {
                continue;
            };
            let child = folder.child(name)?;
            let is_folder = is_directory(item);
            entries.push(RemoteEntry::new(child.clone(), is_folder, None)?);
            if is_folder && child.depth() - root.depth() < MAX_IAPPS_DEPTH {
                pending.push(child);
            } else if is_folder {
                warn!(path = %child, "iAppsLX folders nested too deep, not walking further");
            }
        }
    }
    debug!("Listed {} iAppsLX entries", entries.len());
    Ok(entries)
}

fn list_field<'a>(document: &'a Value, field: &str) -> &'a [Value] {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn is_directory(item: &Value) -> bool {
    item.get("isDirectory")
        .and_then(Value::as_bool)
        .or_else(|| {
            str_field(item, "type")
                .map(|t| t.eq_ignore_ascii_case("directory") || t.eq_ignore_ascii_case("dir"))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigsync_model::ModelType;
    use bigsync_rest::testing::{RecordingTransport, StaticProbe};
    use bigsync_rest::{ClientOptions, Method};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(transport: Arc<RecordingTransport>) -> RestClient {
        RestClient::new(
            transport,
            Arc::new(StaticProbe(true)),
            ClientOptions {
                probe_timeout: Duration::from_millis(10),
                pacing: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn test_provisioning_and_partitions() {
        let transport = Arc::new(RecordingTransport::new());
        transport.route(
            Method::Get,
            "sys/provision",
            200,
            json!({"items": [
                {"name": "ltm", "level": "nominal"},
                {"name": "gtm", "level": "none"},
                {"name": "ilx", "level": "minimum"}
            ]}),
        );
        transport.route(
            Method::Get,
            "auth/partition",
            200,
            json!({"items": [{"name": "Common"}, {"name": "Tenant"}]}),
        );
        let client = client(transport);
        let info = ConnectionInfo::new("bigip");

        let modules = load_provisioning(&client, &info).await.unwrap();
        assert_eq!(modules.into_iter().collect::<Vec<_>>(), vec!["ilx", "ltm"]);
        let partitions = load_partitions(&client, &info).await.unwrap();
        assert!(partitions.contains("Tenant"));
    }

    #[tokio::test]
    async fn test_rules_carry_content() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(
            200,
            json!({"items": [
                {"name": "redirect", "partition": "Common", "apiAnonymous": "when HTTP_REQUEST {}"},
                {"name": "tenant_rule", "partition": "Tenant", "apiAnonymous": ""}
            ]}),
        );
        let info = ConnectionInfo::new("bigip");
        let entries = load_rules(&client(transport), "lab", &info, TrafficModule::Ltm)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].resource.path.as_str(), "/lab/Tenant/iRules/LTM/tenant_rule.tcl");
        assert!(entries[0].document.is_some());
    }

    #[tokio::test]
    async fn test_ilx_listing() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(
            200,
            json!({"items": [{
                "name": "ws",
                "partition": "Common",
                "extensions": [{"name": "ext", "files": [{"name": "index.js"}]}],
                "rules": [{"name": "ilx_rule"}]
            }]}),
        );
        let entries = load_ilx_workspaces(&client(transport), "lab", &ConnectionInfo::new("bigip"))
            .await
            .unwrap();
        let kinds: Vec<ModelType> = entries.iter().map(|e| e.resource.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ModelType::Workspace,
                ModelType::Extension,
                ModelType::ExtensionFile,
                ModelType::RuleIlx
            ]
        );
    }

    #[tokio::test]
    async fn test_iapps_walk() {
        let transport = Arc::new(RecordingTransport::new());
        transport.route(
            Method::Get,
            "iapp/directory",
            200,
            json!({"items": [{"name": "pkg", "isDirectory": true}]}),
        );
        transport.route(
            Method::Get,
            "iapp/directory/pkg",
            200,
            json!({"items": [{"name": "main.js", "isDirectory": false}]}),
        );
        let entries = load_iapps(&client(transport), "lab", &ConnectionInfo::new("bigip"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resource.kind, ModelType::IAppLxModelPackage);
        assert_eq!(entries[1].resource.path.as_str(), "/lab/iAppsLX/pkg/main.js");
        assert_eq!(entries[1].resource.kind, ModelType::IAppLxModel);
    }

    #[tokio::test]
    async fn test_unusable_names_are_skipped() {
        let transport = Arc::new(RecordingTransport::new());
        transport.route(
            Method::Get,
            "iapp/directory",
            200,
            json!({"items": [
                {"name": ".", "isDirectory": true},
                {"name": "..", "isDirectory": true},
                {"name": "../../../../escaped.js"},
                {"name": "pkg", "isDirectory": true}
            ]}),
        );
        transport.route(
            Method::Get,
            "iapp/directory/pkg",
            200,
            json!({"items": [{"name": "nodejs/../../x.js"}, {"name": "main.js"}]}),
        );
        let entries = load_iapps(&client(transport.clone()), "lab", &ConnectionInfo::new("bigip"))
            .await
            .unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.resource.path.as_str()).collect();
        assert_eq!(paths, vec!["/lab/iAppsLX/pkg", "/lab/iAppsLX/pkg/main.js"]);
        assert_eq!(transport.request_count(), 2);

        transport.push_json(
            200,
            json!({"items": [
                {"name": "../escape", "partition": "Common", "apiAnonymous": ""},
                {"name": "ok", "partition": "../..", "apiAnonymous": ""},
                {"name": "kept", "apiAnonymous": ""}
            ]}),
        );
        let rules = load_rules(
            &client(transport),
            "lab",
            &ConnectionInfo::new("bigip"),
            TrafficModule::Ltm,
        )
        .await
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resource.path.as_str(), "/lab/Common/iRules/LTM/kept.tcl");
    }

    #[tokio::test]
    async fn test_version_lookup() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(
            200,
            json!({"entries": {
                "https://localhost/mgmt/tm/sys/version/0": {
                    "nestedStats": {"entries": {"Version": {"description": "13.1.0"}}}
                }
            }}),
        );
        let version = load_version(&client(transport), &ConnectionInfo::new("bigip"))
            .await
            .unwrap();
        assert_eq!(version, "13.1.0");
    }
}
