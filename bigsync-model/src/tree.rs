//! Model tree arena
//!
//! Every remote resource is a [`ModelNode`] stored in a single arena and addressed by
//! [`NodeId`]. Parent and connection links are plain ids, so the tree has no ownership
//! cycles: the arena owns every node and a connection's subtree is exactly the set of
//! nodes reachable through its child lists.
//!
//! Structural changes are published on a broadcast channel so views and the sync
//! layer can react without the tree knowing about them.

use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::connection::ConnectionInfo;
use crate::data_group::DataGroup;
use crate::errors::{ModelError, Result};
use crate::path::ResourcePath;
use crate::types::{ModelType, NodeId, SyncFlags};

const EVENT_CAPACITY: usize = 256;

/// Structural change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Added { parent: NodeId, child: NodeId },
    Removed { parent: NodeId, child: NodeId },
    Changed(NodeId),
}

/// Type-specific data carried by a node
#[derive(Debug, Clone, Default)]
pub enum NodePayload {
    #[default]
    None,
    DataGroup(DataGroup),
    Connection(Box<ConnectionInfo>),
}

#[derive(Debug, Clone)]
pub struct ModelNode {
    id: NodeId,
    pub name: String,
    pub partition: Option<String>,
    pub path: Option<ResourcePath>,
    pub kind: ModelType,
    pub flags: SyncFlags,
    pub payload: NodePayload,
    parent: Option<NodeId>,
    connection: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ModelNode {
    pub fn new(
        kind: ModelType,
        name: impl Into<String>,
        partition: Option<String>,
        path: Option<ResourcePath>,
    ) -> Self {
        Self {
            id: NodeId(0),
            name: name.into(),
            partition,
            path,
            kind,
            flags: SyncFlags::default(),
            payload: NodePayload::None,
            parent: None,
            connection: None,
            children: Vec::new(),
        }
    }

    /// Connection root node; its project folder is `/{name}`
    pub fn connection(name: impl Into<String>, info: ConnectionInfo) -> Self {
        let name = name.into();
        let path = ResourcePath::root().join(&name);
        let mut node = Self::new(ModelType::Connection, name, None, Some(path));
        node.payload = NodePayload::Connection(Box::new(info));
        node
    }

    pub fn with_flags(mut self, flags: SyncFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: NodePayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Parent back-reference; `None` once the node has been detached
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Owning connection back-reference
    pub fn connection_id(&self) -> Option<NodeId> {
        self.connection
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_parent(&self) -> bool {
        self.kind.is_container()
    }

    pub fn is_locally_edited(&self) -> bool {
        self.flags.is_locally_edited()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        match &self.payload {
            NodePayload::Connection(info) => Some(info),
            _ => None,
        }
    }

    pub fn connection_info_mut(&mut self) -> Option<&mut ConnectionInfo> {
        match &mut self.payload {
            NodePayload::Connection(info) => Some(info),
            _ => None,
        }
    }

    pub fn data_group(&self) -> Option<&DataGroup> {
        match &self.payload {
            NodePayload::DataGroup(group) => Some(group),
            _ => None,
        }
    }
}

/// Arena-backed model tree with a single synthetic root
pub struct ModelTree {
    nodes: HashMap<NodeId, ModelNode>,
    root: NodeId,
    next_id: u64,
    events: broadcast::Sender<TreeEvent>,
}

impl Default for ModelTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelTree {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let root = NodeId(1);
        let mut root_node = ModelNode::new(ModelType::Root, "", None, Some(ResourcePath::root()));
        root_node.id = root;

        let mut nodes = HashMap::new();
        nodes.insert(root, root_node);

        Self {
            nodes,
            root,
            next_id: 2,
            events,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TreeEvent) {
        // No receivers is fine; the tree works headless.
        let _ = self.events.send(event);
    }

    pub fn node(&self, id: NodeId) -> Option<&ModelNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ModelNode> {
        self.nodes.get_mut(&id)
    }

    fn require(&self, id: NodeId) -> Result<&ModelNode> {
        self.nodes.get(&id).ok_or(ModelError::UnknownNode(id.0))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Parent of `id`, `None` for the root and for ids that no longer resolve
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Owning connection of `id`
    pub fn connection_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.connection)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.nodes.get(child).is_some_and(|n| n.name == name))
    }

    /// Add `child` under `parent`.
    ///
    /// A child with the same name is removed first (with its subtree) and a warning is
    /// logged; names stay unique within a parent.
    pub fn add_child(&mut self, parent: NodeId, mut child: ModelNode) -> Result<NodeId> {
        let parent_node = self.require(parent)?;
        if !parent_node.is_parent() {
            return Err(ModelError::InvalidOperation(format!(
                "{:?} node '{}' cannot own children",
                parent_node.kind, parent_node.name
            )));
        }
        let parent_connection = if parent_node.kind == ModelType::Connection {
            Some(parent)
        } else {
            parent_node.connection
        };

        if let Some(existing) = self.get_child(parent, &child.name) {
            warn!(
                "Replacing existing child '{}' of {} with a new node",
                child.name, parent
            );
            self.remove_child(parent, existing)?;
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;

        child.id = id;
        child.parent = Some(parent);
        child.connection = if child.kind == ModelType::Connection {
            Some(id)
        } else {
            parent_connection
        };
        child.children.clear();

        self.nodes.insert(id, child);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }

        self.emit(TreeEvent::Added { parent, child: id });
        Ok(id)
    }

    /// Detach `child` from `parent`, dropping its subtree from the arena.
    /// The returned node has its parent and connection links cleared.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<ModelNode> {
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or(ModelError::UnknownNode(parent.0))?;
        let before = parent_node.children.len();
        parent_node.children.retain(|c| *c != child);
        if parent_node.children.len() == before {
            return Err(ModelError::NotFound(format!(
                "{} is not a child of {}",
                child, parent
            )));
        }

        let mut removed = self.detach_subtree(child);
        let mut node = removed.remove(0);
        node.parent = None;
        node.connection = None;

        self.emit(TreeEvent::Removed { parent, child });
        Ok(node)
    }

    /// Remove `id` and all its descendants from the arena, preorder
    fn detach_subtree(&mut self, id: NodeId) -> Vec<ModelNode> {
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(mut node) = self.nodes.remove(&current) {
                stack.extend(node.children.iter().rev().copied());
                node.parent = None;
                node.connection = None;
                removed.push(node);
            }
        }
        removed
    }

    /// Remove a node (and subtree) wherever it sits
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<ModelNode> {
        let parent = self
            .parent_of(id)
            .ok_or_else(|| ModelError::InvalidOperation(format!("{} has no parent", id)))?;
        self.remove_child(parent, id)
    }

    /// Recursively remove descendants of `parent` matching `filter` (all when `None`).
    ///
    /// A matching node is removed together with its subtree; non-matching containers
    /// are searched further. Returns every removed node as a flat list.
    pub fn clear_children(
        &mut self,
        parent: NodeId,
        filter: Option<&dyn Fn(&ModelNode) -> bool>,
    ) -> Vec<ModelNode> {
        let mut removed = Vec::new();
        let children: Vec<NodeId> = self.children(parent).to_vec();

        for child in children {
            let Some(node) = self.nodes.get(&child) else {
                continue;
            };
            let matches = filter.map_or(true, |f| f(node));
            let is_parent = node.is_parent();
            if matches {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|c| *c != child);
                }
                removed.extend(self.detach_subtree(child));
                self.emit(TreeEvent::Removed { parent, child });
            } else if is_parent {
                removed.extend(self.clear_children(child, filter));
            }
        }

        if !removed.is_empty() {
            debug!("Cleared {} nodes below {}", removed.len(), parent);
        }
        removed
    }

    /// Nearest ancestor (excluding `id` itself) of the given type
    pub fn find_ancestor_of_type(&self, id: NodeId, kind: ModelType) -> Option<NodeId> {
        let mut current = self.parent_of(id);
        while let Some(candidate) = current {
            let node = self.nodes.get(&candidate)?;
            if node.kind == kind {
                return Some(candidate);
            }
            current = node.parent;
        }
        None
    }

    /// Depth-first search below `start`: exact path match when `path` is given,
    /// otherwise the first node named `name`.
    pub fn get_model(
        &self,
        start: NodeId,
        name: &str,
        path: Option<&ResourcePath>,
    ) -> Option<NodeId> {
        for child in self.children(start) {
            let node = self.nodes.get(child)?;
            let hit = match path {
                Some(path) => node.path.as_ref() == Some(path),
                None => node.name == name,
            };
            if hit {
                return Some(*child);
            }
            if node.is_parent() {
                if let Some(found) = self.get_model(*child, name, path) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// All descendants of `id` in preorder, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn edited_descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| self.nodes.get(d).is_some_and(|n| n.is_locally_edited()))
            .collect()
    }

    pub fn has_edited_child(&self, id: NodeId) -> bool {
        self.descendants(id)
            .iter()
            .any(|d| self.nodes.get(d).is_some_and(|n| n.is_locally_edited()))
    }

    pub fn set_flags(&mut self, id: NodeId, flags: SyncFlags) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ModelError::UnknownNode(id.0))?;
        if node.flags != flags {
            node.flags = flags;
            self.emit(TreeEvent::Changed(id));
        }
        Ok(())
    }

    pub fn set_payload(&mut self, id: NodeId, payload: NodePayload) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ModelError::UnknownNode(id.0))?;
        node.payload = payload;
        self.emit(TreeEvent::Changed(id));
        Ok(())
    }

    /// Connection nodes directly under the root
    pub fn connections(&self) -> Vec<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .filter(|c| {
                self.nodes
                    .get(c)
                    .is_some_and(|n| n.kind == ModelType::Connection)
            })
            .collect()
    }

    pub fn find_connection(&self, name: &str) -> Option<NodeId> {
        self.connections()
            .into_iter()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    /// Child folder named `name`, created as `kind` if missing. Existing children are
    /// kept as they are.
    pub fn ensure_folder(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: ModelType,
        partition: Option<String>,
    ) -> Result<NodeId> {
        if let Some(existing) = self.get_child(parent, name) {
            return Ok(existing);
        }
        let path = self
            .require(parent)?
            .path
            .as_ref()
            .map(|p| p.join(name));
        self.add_child(parent, ModelNode::new(kind, name, partition, path))
    }
}
