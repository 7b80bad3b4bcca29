//! Modification tracking
//!
//! Every successful write-from-response records the local modification stamp of the
//! written file (and of its ancestor folders) as a persistent property. Comparing the
//! current local stamp against that "response stamp" tells whether the user changed
//! the file since it was last synchronized, or created it locally.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ModelError, Result};
use crate::path::ResourcePath;
use crate::properties::PropertyKey;
use crate::store::LocalFileStore;
use crate::tree::ModelTree;
use crate::types::{ModelType, NodeId, SyncFlags};

#[derive(Clone)]
pub struct ModificationTracker {
    store: Arc<dyn LocalFileStore>,
}

impl ModificationTracker {
    pub fn new(store: Arc<dyn LocalFileStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LocalFileStore> {
        &self.store
    }

    /// Property key under which the response stamp of `path` is kept
    pub fn stamp_key(connection: &str, path: &ResourcePath) -> PropertyKey {
        PropertyKey::plugin(format!("{}_{}", connection, path))
    }

    /// Last recorded response stamp, if any
    pub fn response_stamp(&self, connection: &str, path: &ResourcePath) -> Result<Option<i64>> {
        let raw = self
            .store
            .persistent_property(connection, &Self::stamp_key(connection, path))?;
        match raw {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|e| {
                    ModelError::InvalidOperation(format!("bad stamp for {}: {}", path, e))
                }),
        }
    }

    pub fn is_file_modified(&self, connection: &str, path: &ResourcePath) -> Result<bool> {
        let Some(persisted) = self.response_stamp(connection, path)? else {
            return Ok(false);
        };
        if !self.store.exists(path) {
            return Ok(false);
        }
        let local = self.store.modification_stamp(path)?;
        if local < persisted {
            warn!(
                connection,
                path = %path,
                local,
                persisted,
                "Local modification stamp is older than the last response"
            );
            return Ok(false);
        }
        Ok(local > persisted)
    }

    /// A file that exists locally but was never written from a response
    pub fn is_new_file(&self, connection: &str, path: &ResourcePath) -> Result<bool> {
        Ok(self.store.exists(path) && self.response_stamp(connection, path)?.is_none())
    }

    /// Record the current stamps of `path` and all its ancestors up to the project
    /// folder. Calling it again without local changes stores the same values.
    pub fn update_modification_stamp_map(
        &self,
        connection: &str,
        path: &ResourcePath,
    ) -> Result<()> {
        for target in std::iter::once(path.clone()).chain(path.ancestors()) {
            if !self.store.exists(&target) {
                continue;
            }
            let stamp = self.store.modification_stamp(&target)?;
            self.store.set_persistent_property(
                connection,
                &Self::stamp_key(connection, &target),
                Some(&stamp.to_string()),
            )?;
        }
        debug!(connection, path = %path, "Updated modification stamp map");
        Ok(())
    }

    /// Drop the response stamp of a deleted resource
    pub fn forget(&self, connection: &str, path: &ResourcePath) -> Result<()> {
        self.store
            .set_persistent_property(connection, &Self::stamp_key(connection, path), None)
    }

    /// Derive `locally_added` / `locally_modified` for one node. A new file is never
    /// reported as modified.
    pub fn set_locally_flags(&self, tree: &mut ModelTree, id: NodeId) -> Result<()> {
        let node = tree.node(id).ok_or(ModelError::UnknownNode(id.raw()))?;
        if matches!(node.kind, ModelType::Root | ModelType::Connection) || node.flags.read_only {
            return Ok(());
        }
        let Some(path) = node.path.clone() else {
            return Ok(());
        };
        let mut flags: SyncFlags = node.flags;
        let connection = tree
            .connection_of(id)
            .and_then(|c| tree.node(c))
            .map(|c| c.name.clone())
            .ok_or_else(|| ModelError::InvalidOperation(format!("{} has no connection", path)))?;

        let kind = node.kind;
        if kind.is_remote_file() {
            flags.locally_added = self.is_new_file(&connection, &path)?;
            flags.locally_modified =
                !flags.locally_added && self.is_file_modified(&connection, &path)?;
        } else if kind.is_remote_folder() {
            // Folder stamps move whenever a child is written
            flags.locally_added = self.is_new_file(&connection, &path)?;
            flags.locally_modified = false;
        } else {
            flags.locally_added = false;
            flags.locally_modified = false;
        }
        tree.set_flags(id, flags)
    }

    /// Recompute flags for a node and everything below it
    pub fn refresh_flags(&self, tree: &mut ModelTree, id: NodeId) -> Result<()> {
        let mut ids = vec![id];
        ids.extend(tree.descendants(id));
        for node in ids {
            self.set_locally_flags(tree, node)?;
        }
        Ok(())
    }
}
