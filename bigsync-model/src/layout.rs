//! Local workspace layout
//!
//! Maps remote resources to workspace paths and back. Every connection owns a project
//! folder named after it:
//!
//! ```text
//! /{conn}/{partition}/iRules/{LTM|GTM}/{name}.tcl
//! /{conn}/{partition}/DataGroups/{LTM|GTM}/{name}.dg
//! /{conn}/{partition}/iLX/{workspace}/extensions/{extension}/{file...}
//! /{conn}/{partition}/iLX/{workspace}/rules/{rule}.tcl
//! /{conn}/{partition}/iLX/{workspace}/node_modules/
//! /{conn}/iAppsLX/{package}/{dir...}/{file}
//! ```

use crate::path::ResourcePath;
use crate::types::ModelType;

pub const RULES_FOLDER: &str = "iRules";
pub const DATA_GROUPS_FOLDER: &str = "DataGroups";
pub const ILX_FOLDER: &str = "iLX";
pub const IAPPS_FOLDER: &str = "iAppsLX";
pub const EXTENSIONS_FOLDER: &str = "extensions";
pub const WORKSPACE_RULES_FOLDER: &str = "rules";
pub const NODE_MODULES_FOLDER: &str = "node_modules";
pub const LTM: &str = "LTM";
pub const GTM: &str = "GTM";
pub const RULE_EXTENSION: &str = "tcl";
pub const DATA_GROUP_EXTENSION: &str = "dg";

/// BigIP module owning a rule or data-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficModule {
    Ltm,
    Gtm,
}

impl TrafficModule {
    /// Module name as used in REST paths
    pub fn rest_name(&self) -> &'static str {
        match self {
            TrafficModule::Ltm => "ltm",
            TrafficModule::Gtm => "gtm",
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            TrafficModule::Ltm => LTM,
            TrafficModule::Gtm => GTM,
        }
    }

    pub fn rule_type(&self) -> ModelType {
        match self {
            TrafficModule::Ltm => ModelType::RuleLtm,
            TrafficModule::Gtm => ModelType::RuleGtm,
        }
    }

    pub fn data_group_type(&self) -> ModelType {
        match self {
            TrafficModule::Ltm => ModelType::DataGroupLtm,
            TrafficModule::Gtm => ModelType::DataGroupGtm,
        }
    }

    pub fn of(kind: ModelType) -> Option<Self> {
        match kind {
            ModelType::RuleLtm | ModelType::DataGroupLtm => Some(TrafficModule::Ltm),
            ModelType::RuleGtm | ModelType::DataGroupGtm => Some(TrafficModule::Gtm),
            _ => None,
        }
    }

    fn from_folder(folder: &str) -> Option<Self> {
        match folder {
            LTM => Some(TrafficModule::Ltm),
            GTM => Some(TrafficModule::Gtm),
            _ => None,
        }
    }
}

pub fn project_path(connection: &str) -> ResourcePath {
    ResourcePath::root().join(connection)
}

pub fn rules_folder(connection: &str, partition: &str, module: TrafficModule) -> ResourcePath {
    project_path(connection)
        .join(partition)
        .join(RULES_FOLDER)
        .join(module.folder())
}

pub fn rule_path(
    connection: &str,
    partition: &str,
    module: TrafficModule,
    name: &str,
) -> ResourcePath {
    rules_folder(connection, partition, module).join(&format!("{}.{}", name, RULE_EXTENSION))
}

pub fn data_groups_folder(
    connection: &str,
    partition: &str,
    module: TrafficModule,
) -> ResourcePath {
    project_path(connection)
        .join(partition)
        .join(DATA_GROUPS_FOLDER)
        .join(module.folder())
}

pub fn data_group_path(
    connection: &str,
    partition: &str,
    module: TrafficModule,
    name: &str,
) -> ResourcePath {
    data_groups_folder(connection, partition, module)
        .join(&format!("{}.{}", name, DATA_GROUP_EXTENSION))
}

pub fn workspace_path(connection: &str, partition: &str, workspace: &str) -> ResourcePath {
    project_path(connection)
        .join(partition)
        .join(ILX_FOLDER)
        .join(workspace)
}

pub fn extension_path(
    connection: &str,
    partition: &str,
    workspace: &str,
    extension: &str,
) -> ResourcePath {
    workspace_path(connection, partition, workspace)
        .join(EXTENSIONS_FOLDER)
        .join(extension)
}

pub fn ilx_rule_path(
    connection: &str,
    partition: &str,
    workspace: &str,
    rule: &str,
) -> ResourcePath {
    workspace_path(connection, partition, workspace)
        .join(WORKSPACE_RULES_FOLDER)
        .join(&format!("{}.{}", rule, RULE_EXTENSION))
}

pub fn iapps_path(connection: &str) -> ResourcePath {
    project_path(connection).join(IAPPS_FOLDER)
}

/// What a workspace path denotes, as far as its position in the layout tells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ModelType,
    pub partition: Option<String>,
    /// Resource name: the file stem for rules and data-groups, the file name otherwise
    pub name: String,
}

/// Classify a path below a project folder. Paths the layout does not know about are
/// reported as `Unknown` (files) or `Directory` (folders).
pub fn classify(path: &ResourcePath, is_folder: bool) -> Classified {
    let segments: Vec<&str> = path.segments().collect();
    let name = segments.last().copied().unwrap_or_default().to_string();
    let fallback = |partition: Option<String>| Classified {
        kind: if is_folder {
            ModelType::Directory
        } else {
            ModelType::Unknown
        },
        partition,
        name: name.clone(),
    };

    match segments.as_slice() {
        [] => Classified {
            kind: ModelType::Root,
            partition: None,
            name: String::new(),
        },
        [_] => Classified {
            kind: ModelType::Connection,
            partition: None,
            name,
        },
        [_, IAPPS_FOLDER] => fallback(None),
        [_, IAPPS_FOLDER, _] if is_folder => Classified {
            kind: ModelType::IAppLxModelPackage,
            partition: None,
            name,
        },
        [_, IAPPS_FOLDER, _, ..] => Classified {
            kind: if is_folder {
                ModelType::IAppLxModelDir
            } else {
                ModelType::IAppLxModel
            },
            partition: None,
            name,
        },
        [_, partition, rest @ ..] => {
            let partition = Some(partition.to_string());
            match rest {
                [RULES_FOLDER, module, file] if !is_folder => {
                    match (TrafficModule::from_folder(module), stem_with(file, RULE_EXTENSION)) {
                        (Some(module), Some(stem)) => Classified {
                            kind: module.rule_type(),
                            partition,
                            name: stem.to_string(),
                        },
                        _ => fallback(partition),
                    }
                }
                [DATA_GROUPS_FOLDER, module, file] if !is_folder => {
                    match (
                        TrafficModule::from_folder(module),
                        stem_with(file, DATA_GROUP_EXTENSION),
                    ) {
                        (Some(module), Some(stem)) => Classified {
                            kind: module.data_group_type(),
                            partition,
                            name: stem.to_string(),
                        },
                        _ => fallback(partition),
                    }
                }
                [ILX_FOLDER, _] if is_folder => Classified {
                    kind: ModelType::Workspace,
                    partition,
                    name,
                },
                [ILX_FOLDER, _, EXTENSIONS_FOLDER] => Classified {
                    kind: ModelType::WorkspaceDir,
                    partition,
                    name,
                },
                [ILX_FOLDER, _, EXTENSIONS_FOLDER, _] if is_folder => Classified {
                    kind: ModelType::Extension,
                    partition,
                    name,
                },
                [ILX_FOLDER, _, EXTENSIONS_FOLDER, _, ..] if !is_folder => Classified {
                    kind: ModelType::ExtensionFile,
                    partition,
                    name,
                },
                [ILX_FOLDER, _, WORKSPACE_RULES_FOLDER] => Classified {
                    kind: ModelType::WorkspaceDir,
                    partition,
                    name,
                },
                [ILX_FOLDER, _, WORKSPACE_RULES_FOLDER, file] if !is_folder => {
                    match stem_with(file, RULE_EXTENSION) {
                        Some(stem) => Classified {
                            kind: ModelType::RuleIlx,
                            partition,
                            name: stem.to_string(),
                        },
                        None => fallback(partition),
                    }
                }
                [ILX_FOLDER, _, NODE_MODULES_FOLDER, ..] => Classified {
                    kind: if is_folder && rest.len() == 3 {
                        ModelType::NodeModulesDir
                    } else if is_folder {
                        ModelType::Directory
                    } else {
                        ModelType::Unknown
                    },
                    partition,
                    name,
                },
                _ => fallback(partition),
            }
        }
    }
}

/// Whether the path lies inside a workspace's `node_modules` folder
pub fn is_read_only(path: &ResourcePath) -> bool {
    let segments: Vec<&str> = path.segments().collect();
    matches!(segments.as_slice(), [_, _, ILX_FOLDER, _, NODE_MODULES_FOLDER, ..])
}

fn stem_with<'a>(file: &'a str, extension: &str) -> Option<&'a str> {
    file.strip_suffix(extension)?.strip_suffix('.')
}
