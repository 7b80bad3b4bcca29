//! Mapping between workspace resources and their REST counterparts
//!
//! A [`RemoteResource`] is resolved from a workspace path and knows which requests
//! read, create, update and delete it on the device, and how response documents turn
//! into local file content.

use bytes::Bytes;
use serde_json::{json, Value};

use bigsync_model::layout::{self, TrafficModule};
use bigsync_model::{ConnectionInfo, DataGroup, ModelType, ResourcePath};
use bigsync_rest::uri::{IAPP_DIRECTORY, IAPP_FILE, ILX_WORKSPACE};
use bigsync_rest::{Method, RestRequest, UriBuilder};

use crate::errors::{Result, SyncError};

/// How content travels for a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Content is embedded in JSON documents (rules, data-groups)
    Json,
    /// Content is uploaded in chunks and fetched as text
    Upload,
    /// Folder-like resource without content of its own
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub kind: ModelType,
    pub connection: String,
    pub partition: Option<String>,
    pub name: String,
    pub path: ResourcePath,
    pub workspace: Option<String>,
    pub extension: Option<String>,
    /// Path below the extension folder or the iAppsLX root
    pub relative: Option<String>,
}

impl RemoteResource {
    /// Resolve a workspace path. `None` for paths without a device counterpart.
    pub fn locate(path: &ResourcePath, is_folder: bool) -> Option<Self> {
        let classified = layout::classify(path, is_folder);
        let segments: Vec<&str> = path.segments().collect();
        let connection = segments.first()?.to_string();
        let joined = |from: usize| segments.get(from..).map(|rest| rest.join("/"));

        let mut resource = Self {
            kind: classified.kind,
            connection,
            partition: classified.partition,
            name: classified.name,
            path: path.clone(),
            workspace: None,
            extension: None,
            relative: None,
        };
        match classified.kind {
            ModelType::RuleLtm
            | ModelType::RuleGtm
            | ModelType::DataGroupLtm
            | ModelType::DataGroupGtm => {}
            ModelType::Workspace | ModelType::RuleIlx => {
                resource.workspace = segments.get(3).map(|s| s.to_string());
            }
            ModelType::Extension | ModelType::ExtensionFile => {
                resource.workspace = segments.get(3).map(|s| s.to_string());
                resource.extension = segments.get(5).map(|s| s.to_string());
                if classified.kind == ModelType::ExtensionFile {
                    resource.relative = joined(6);
                }
            }
            ModelType::IAppLxModel | ModelType::IAppLxModelDir | ModelType::IAppLxModelPackage => {
                resource.relative = joined(2);
            }
            _ => return None,
        }
        Some(resource)
    }

    pub fn rule(connection: &str, module: TrafficModule, partition: &str, name: &str) -> Self {
        Self::plain(
            module.rule_type(),
            connection,
            partition,
            name,
            layout::rule_path(connection, partition, module, name),
        )
    }

    pub fn data_group(
        connection: &str,
        module: TrafficModule,
        partition: &str,
        name: &str,
    ) -> Self {
        Self::plain(
            module.data_group_type(),
            connection,
            partition,
            name,
            layout::data_group_path(connection, partition, module, name),
        )
    }

    fn plain(
        kind: ModelType,
        connection: &str,
        partition: &str,
        name: &str,
        path: ResourcePath,
    ) -> Self {
        Self {
            kind,
            connection: connection.to_string(),
            partition: Some(partition.to_string()),
            name: name.to_string(),
            path,
            workspace: None,
            extension: None,
            relative: None,
        }
    }

    pub fn transfer(&self) -> Transfer {
        match self.kind {
            ModelType::RuleLtm
            | ModelType::RuleGtm
            | ModelType::DataGroupLtm
            | ModelType::DataGroupGtm => Transfer::Json,
            ModelType::RuleIlx | ModelType::ExtensionFile | ModelType::IAppLxModel => {
                Transfer::Upload
            }
            _ => Transfer::Container,
        }
    }

    fn partition(&self) -> &str {
        self.partition.as_deref().unwrap_or("Common")
    }

    fn require<'a>(&self, field: &'a Option<String>, what: &str) -> Result<&'a str> {
        field
            .as_deref()
            .ok_or_else(|| SyncError::NotRemote(format!("{} (missing {})", self.path, what)))
    }

    fn collection(&self, info: &ConnectionInfo) -> Result<UriBuilder> {
        let module = TrafficModule::of(self.kind)
            .ok_or_else(|| SyncError::NotRemote(self.path.to_string()))?;
        let component = if self.kind.is_rule() {
            "rule"
        } else {
            "data-group/internal"
        };
        Ok(UriBuilder::tm(info, module.rest_name(), component))
    }

    fn workspace_uri(&self, info: &ConnectionInfo) -> Result<UriBuilder> {
        let workspace = self.require(&self.workspace, "workspace")?;
        Ok(UriBuilder::endpoint(info, ILX_WORKSPACE).object(self.partition(), workspace))
    }

    /// URI addressing this resource itself
    pub fn object_uri(&self, info: &ConnectionInfo) -> Result<String> {
        let uri = match self.kind {
            ModelType::RuleLtm
            | ModelType::RuleGtm
            | ModelType::DataGroupLtm
            | ModelType::DataGroupGtm => {
                self.collection(info)?.object(self.partition(), &self.name)
            }
            ModelType::Workspace => self.workspace_uri(info)?,
            ModelType::Extension => {
                let extension = self.require(&self.extension, "extension")?;
                self.workspace_uri(info)?.options(&[("extension", extension)])
            }
            ModelType::ExtensionFile => {
                let extension = self.require(&self.extension, "extension")?;
                let file = self.require(&self.relative, "file")?;
                self.workspace_uri(info)?
                    .options(&[("extension", extension), ("file", file)])
            }
            ModelType::RuleIlx => {
                self.workspace_uri(info)?.options(&[("rule", self.name.as_str())])
            }
            ModelType::IAppLxModel => {
                UriBuilder::endpoint(info, IAPP_FILE).segment(self.require(&self.relative, "path")?)
            }
            ModelType::IAppLxModelDir | ModelType::IAppLxModelPackage => {
                let relative = self.require(&self.relative, "path")?;
                UriBuilder::endpoint(info, IAPP_DIRECTORY).segment(relative)
            }
            _ => return Err(SyncError::NotRemote(self.path.to_string())),
        };
        Ok(uri.build())
    }

    pub fn get_request(&self, info: &ConnectionInfo) -> Result<RestRequest> {
        let request = RestRequest::get(self.object_uri(info)?);
        Ok(match self.transfer() {
            Transfer::Upload => request.expect_text(),
            _ => request,
        })
    }

    /// POST creating the resource from local `content`. Upload kinds are created by
    /// uploading to [`object_uri`](Self::object_uri) instead.
    pub fn create_request(&self, info: &ConnectionInfo, content: &[u8]) -> Result<RestRequest> {
        match self.kind {
            ModelType::RuleLtm | ModelType::RuleGtm => Ok(RestRequest::json(
                Method::Post,
                self.collection(info)?.build(),
                &json!({
                    "name": self.name,
                    "partition": self.partition(),
                    "apiAnonymous": String::from_utf8_lossy(content),
                }),
            )),
            ModelType::DataGroupLtm | ModelType::DataGroupGtm => {
                let mut group = DataGroup::from_json(content)?;
                group.name = self.name.clone();
                group.partition = Some(self.partition().to_string());
                Ok(RestRequest::json(
                    Method::Post,
                    self.collection(info)?.build(),
                    &serde_json::to_value(&group)?,
                ))
            }
            ModelType::Workspace => Ok(RestRequest::json(
                Method::Post,
                UriBuilder::endpoint(info, ILX_WORKSPACE).build(),
                &json!({ "name": self.name, "partition": self.partition() }),
            )),
            ModelType::Extension | ModelType::IAppLxModelDir | ModelType::IAppLxModelPackage => {
                Ok(RestRequest::json(Method::Post, self.object_uri(info)?, &json!({})))
            }
            _ => Err(SyncError::NotRemote(format!(
                "{} cannot be created with a document",
                self.path
            ))),
        }
    }

    /// PATCH pushing local `content` of a JSON-carried resource
    pub fn update_request(&self, info: &ConnectionInfo, content: &[u8]) -> Result<RestRequest> {
        let body = match self.kind {
            ModelType::RuleLtm | ModelType::RuleGtm => {
                json!({ "apiAnonymous": String::from_utf8_lossy(content) })
            }
            ModelType::DataGroupLtm | ModelType::DataGroupGtm => {
                DataGroup::from_json(content)?.records_body()
            }
            _ => {
                return Err(SyncError::NotRemote(format!(
                    "{} is not updated with a document",
                    self.path
                )))
            }
        };
        Ok(RestRequest::json(Method::Patch, self.object_uri(info)?, &body))
    }

    pub fn delete_request(&self, info: &ConnectionInfo) -> Result<RestRequest> {
        Ok(RestRequest::delete(self.object_uri(info)?))
    }

    /// Local file content carried by a response document
    pub fn content_from_response(&self, document: &Value) -> Result<Bytes> {
        match self.kind {
            ModelType::RuleLtm | ModelType::RuleGtm => Ok(Bytes::from(
                document
                    .get("apiAnonymous")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )),
            ModelType::DataGroupLtm | ModelType::DataGroupGtm => {
                let mut group = DataGroup::from_value(document)?;
                group.name = self.name.clone();
                if group.partition.is_none() {
                    group.partition = self.partition.clone();
                }
                Ok(Bytes::from(group.to_json()?))
            }
            ModelType::RuleIlx | ModelType::ExtensionFile | ModelType::IAppLxModel => {
                let content = document
                    .get(bigsync_rest::json::CONTENT_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(Bytes::from(content.to_string()))
            }
            _ => Err(SyncError::NotRemote(self.path.to_string())),
        }
    }
}
