//! Core model identifiers and node classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a node inside a [`ModelTree`](crate::ModelTree) arena.
/// Identifiers are never reused, so a stale id simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of remote resource a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Root,
    Connection,
    Directory,
    RuleLtm,
    RuleGtm,
    RuleIlx,
    DataGroupLtm,
    DataGroupGtm,
    Workspace,
    WorkspaceDir,
    Extension,
    ExtensionFile,
    NodeModulesDir,
    IAppLxModel,
    IAppLxModelDir,
    IAppLxModelPackage,
    Unknown,
}

impl ModelType {
    /// Whether nodes of this type own children
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ModelType::Root
                | ModelType::Connection
                | ModelType::Directory
                | ModelType::Workspace
                | ModelType::WorkspaceDir
                | ModelType::Extension
                | ModelType::NodeModulesDir
                | ModelType::IAppLxModelDir
                | ModelType::IAppLxModelPackage
        )
    }

    pub fn is_rule(&self) -> bool {
        matches!(
            self,
            ModelType::RuleLtm | ModelType::RuleGtm | ModelType::RuleIlx
        )
    }

    pub fn is_data_group(&self) -> bool {
        matches!(self, ModelType::DataGroupLtm | ModelType::DataGroupGtm)
    }

    /// Containers that exist on the device and are created/removed through REST
    pub fn is_remote_folder(&self) -> bool {
        matches!(
            self,
            ModelType::Workspace
                | ModelType::Extension
                | ModelType::IAppLxModelDir
                | ModelType::IAppLxModelPackage
        )
    }

    /// Leaves whose content lives on the device
    pub fn is_remote_file(&self) -> bool {
        self.is_rule()
            || self.is_data_group()
            || matches!(self, ModelType::ExtensionFile | ModelType::IAppLxModel)
    }
}

/// Local synchronization flags of a node.
///
/// `locally_modified` and `locally_added` are derived from stamp comparisons and are
/// never both set; see [`ModificationTracker`](crate::ModificationTracker).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlags {
    pub locally_modified: bool,
    pub locally_added: bool,
    pub content_from_response: bool,
    pub read_only: bool,
}

impl SyncFlags {
    pub fn is_locally_edited(&self) -> bool {
        self.locally_modified || self.locally_added
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}
