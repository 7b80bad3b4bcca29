//! Model layer for bigsync
//!
//! This crate holds everything that describes BigIP resources on the local side:
//! - The model tree: an arena of typed nodes rooted at per-device connections
//! - Data-group documents and their local file format
//! - The Local File Store collaborator and its filesystem / in-memory implementations
//! - Persistent project properties (credentials, online flag, response stamps)
//! - The modification tracker deriving locally-modified / locally-added state

pub mod connection;
pub mod data_group;
pub mod errors;
pub mod layout;
pub mod path;
pub mod properties;
pub mod store;
pub mod tracker;
pub mod tree;
pub mod types;

pub use connection::{ConnectionInfo, Credentials, ProxySettings};
pub use data_group::{DataGroup, DataGroupRecord, DataGroupType};
pub use errors::{ModelError, Result};
pub use path::ResourcePath;
pub use properties::{PropertyDatabase, PropertyKey};
pub use store::{FsFileStore, LocalFileStore, MemoryFileStore, StoreEntry};
pub use tracker::ModificationTracker;
pub use tree::{ModelNode, ModelTree, NodePayload, TreeEvent};
pub use types::{ModelType, NodeId, SyncFlags};
