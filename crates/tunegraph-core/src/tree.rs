//! Per-request catalog arena.
//!
//! The [`Catalog`] owns every node materialized for one request and enforces
//! the identity rules:
//!
//! - Two nodes are *identity-equal* when their URIs match.
//! - They are *tree-equal* when, in addition, their parents share a URI or
//!   neither parent is a container. Tree-equal nodes are merged: creating one
//!   returns the existing instance.
//! - Identity-equal nodes that are not tree-equal become mutual siblings.
//!
//! Three caches are kept: all content leaves, all containers, and the
//! "sub-content" leaves whose whole ancestor chain is made of containers.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tracing::debug;

use crate::identifier::ContentId;
use crate::node::{Node, NodeId, RootRole};

/// Merge key: URI plus the parent URI when the parent is a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TreeKey {
    uri: String,
    parent: Option<String>,
}

/// Arena of catalog nodes for one request.
#[derive(Debug, Clone)]
pub struct Catalog {
    nodes: Vec<Node>,
    by_key: HashMap<TreeKey, NodeId>,
    by_uri: HashMap<String, Vec<NodeId>>,
    all_content: BTreeSet<NodeId>,
    all_containers: BTreeSet<NodeId>,
    sub_content: BTreeSet<NodeId>,
}

impl Catalog {
    /// Create a catalog with a fresh root.
    pub fn new(role: RootRole, label: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node::root(role, label.into())],
            by_key: HashMap::new(),
            by_uri: HashMap::new(),
            all_content: BTreeSet::new(),
            all_containers: BTreeSet::new(),
            sub_content: BTreeSet::new(),
        }
    }

    /// The request root.
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Role of the request root.
    pub fn role(&self) -> RootRole {
        match &self.nodes[0].data {
            crate::node::NodeData::Query(q) => q.role,
            _ => RootRole::default(),
        }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Resolve `content` as a child of `parent`, merging with an existing
    /// tree-equal node when there is one.
    ///
    /// Metadata already parsed on an existing node is left untouched.
    pub fn create_child(&mut self, parent: NodeId, content: ContentId) -> NodeId {
        let key = self.tree_key(parent, &content);
        if let Some(&existing) = self.by_key.get(&key) {
            self.adopt(parent, existing);
            return existing;
        }

        let uri = content.uri();
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(content, parent));
        self.by_key.insert(key, id);

        let same_uri = self.by_uri.entry(uri).or_default();
        let siblings: Vec<NodeId> = same_uri.clone();
        same_uri.push(id);
        for sibling in siblings {
            self.nodes[sibling.0].siblings.insert(id);
            self.nodes[id.0].siblings.insert(sibling);
        }

        self.adopt(parent, id);
        self.cache(parent, id);
        id
    }

    fn tree_key(&self, parent: NodeId, content: &ContentId) -> TreeKey {
        let parent_node = self.node(parent);
        TreeKey {
            uri: content.uri(),
            parent: parent_node.is_container().then(|| parent_node.uri()),
        }
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId) {
        let children = &mut self.nodes[parent.0].children;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    fn cache(&mut self, parent: NodeId, child: NodeId) {
        if self.node(child).is_container() {
            self.all_containers.insert(child);
            return;
        }
        self.all_content.insert(child);
        if self.branch(parent).iter().all(|&n| self.node(n).is_container()) {
            self.sub_content.insert(child);
        }
    }

    /// Ancestors from the root down to `id`, inclusive.
    pub fn branch(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.node(parent).parent;
        }
        chain.reverse();
        chain
    }

    /// Branch rendered as `[Query -> Album -> Track]`.
    pub fn branch_label(&self, id: NodeId) -> String {
        let names: Vec<&str> = self
            .branch(id)
            .into_iter()
            .map(|n| self.node(n).kind().map_or("Query", |k| k.title()))
            .collect();
        format!("[{}]", names.join(" -> "))
    }

    /// Siblings of `id`.
    pub fn siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id).siblings.iter().copied()
    }

    /// Ordered items of a container.
    pub fn items(&self, id: NodeId) -> &[NodeId] {
        self.node(id).items()
    }

    /// Append `item` to the item list of container `id`.
    pub fn push_item(&mut self, id: NodeId, item: NodeId) {
        if let Some(container) = self.node_mut(id).container_mut() {
            container.push(item);
        }
    }

    /// Every content leaf ever created.
    pub const fn all_content(&self) -> &BTreeSet<NodeId> {
        &self.all_content
    }

    /// Every container ever created.
    pub const fn all_containers(&self) -> &BTreeSet<NodeId> {
        &self.all_containers
    }

    /// Leaves whose whole ancestor chain is made of containers.
    pub const fn sub_content(&self) -> &BTreeSet<NodeId> {
        &self.sub_content
    }

    /// First node carrying `uri`, if any.
    pub fn find(&self, uri: &str) -> Option<NodeId> {
        self.by_uri.get(uri).and_then(|ids| ids.first().copied())
    }

    /// Downloadable leaves under `id`, depth first, in item order.
    pub fn leaves(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        if node.is_downloadable() {
            return vec![id];
        }
        node.items()
            .iter()
            .flat_map(|&item| self.leaves(item))
            .collect()
    }

    /// Set the downloaded flag (and file path for leaves) without touching
    /// siblings, then propagate upward: a container becomes downloaded as soon
    /// as all of its items are.
    pub fn set_downloaded(&mut self, id: NodeId, path: Option<PathBuf>) {
        let node = self.node_mut(id);
        node.downloaded = true;
        if let Some(path) = path
            && let Some(media) = node.media_mut()
        {
            media.filepath = Some(path);
        }

        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            let parent_node = self.node(parent);
            if parent_node.downloaded || parent_node.items().is_empty() {
                break;
            }
            if !parent_node.items().iter().all(|&i| self.node(i).downloaded) {
                break;
            }
            debug!(node = %parent_node.uri(), "All items downloaded");
            self.node_mut(parent).downloaded = true;
            cursor = self.node(parent).parent;
        }
    }
}
