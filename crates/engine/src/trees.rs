//! The set of trees one transformation reads from: the main input,
//! documents loaded on demand and result tree fragments.

use std::collections::HashMap;
use std::fmt;
use xsltvm_tree::{NodeId, NodeType, TreeAccess};
use xsltvm_types::{DocumentUri, QualifiedName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub(crate) usize);

impl TreeId {
    /// The tree the transformation was started on.
    pub const MAIN: TreeId = TreeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// A node in one of the transformation's trees.
///
/// Ordering is document order within a tree; trees are ordered by when they
/// were added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub tree: TreeId,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(tree: TreeId, node: NodeId) -> Self {
        Self { tree, node }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tree.0, self.node)
    }
}

#[derive(Debug, Default)]
pub struct Trees {
    trees: Vec<Box<dyn TreeAccess>>,
}

impl Trees {
    pub fn new(main: Box<dyn TreeAccess>) -> Self {
        Self { trees: vec![main] }
    }

    pub fn add(&mut self, tree: Box<dyn TreeAccess>) -> Result<TreeId, std::collections::TryReserveError> {
        self.trees.try_reserve(1)?;
        self.trees.push(tree);
        Ok(TreeId(self.trees.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Ids are only handed out by [`Trees::add`]; values coming back from an
    /// evaluator are checked with [`Trees::contains`] before they are used.
    pub fn get(&self, id: TreeId) -> &dyn TreeAccess {
        self.trees[id.0].as_ref()
    }

    pub fn try_get(&self, id: TreeId) -> Option<&dyn TreeAccess> {
        self.trees.get(id.0).map(|tree| tree.as_ref())
    }

    pub fn contains(&self, id: TreeId) -> bool {
        id.0 < self.trees.len()
    }

    pub fn root(&self, id: TreeId) -> NodeRef {
        NodeRef::new(id, self.get(id).root())
    }

    pub fn node_type(&self, node: NodeRef) -> NodeType {
        self.get(node.tree).node_type(node.node)
    }

    pub fn name(&self, node: NodeRef) -> Option<&QualifiedName> {
        self.get(node.tree).name(node.node)
    }

    pub fn string_value(&self, node: NodeRef) -> String {
        self.get(node.tree).string_value(node.node)
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.get(node.tree)
            .parent(node.node)
            .map(|parent| NodeRef::new(node.tree, parent))
    }

    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.get(node.tree)
            .children(node.node)
            .map(|child| NodeRef::new(node.tree, child))
            .collect()
    }

    pub fn previous_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        self.get(node.tree)
            .previous_sibling(node.node)
            .map(|sibling| NodeRef::new(node.tree, sibling))
    }

    /// Every node of `tree` in document order, attributes after their element.
    pub fn all_nodes(&self, tree: TreeId) -> Vec<NodeRef> {
        let access = self.get(tree);
        access
            .descendants_or_self(access.root())
            .map(|node| NodeRef::new(tree, node))
            .collect()
    }

    pub fn attributes(&self, node: NodeRef) -> Vec<NodeRef> {
        self.get(node.tree)
            .attributes(node.node)
            .iter()
            .map(|attr| NodeRef::new(node.tree, *attr))
            .collect()
    }
}

/// Load state of a document requested through `document()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Loaded(TreeId),
    /// Loading failed; lookups see an empty result.
    Failed,
}

#[derive(Debug, Default)]
pub struct Documents {
    states: HashMap<DocumentUri, DocumentState>,
}

impl Documents {
    pub fn state(&self, uri: &DocumentUri) -> Option<DocumentState> {
        self.states.get(uri).copied()
    }

    pub fn set(&mut self, uri: DocumentUri, state: DocumentState) {
        self.states.insert(uri, state);
    }

    pub fn pending(&self) -> impl Iterator<Item = &DocumentUri> {
        self.states
            .iter()
            .filter(|(_, state)| **state == DocumentState::Pending)
            .map(|(uri, _)| uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsltvm_tree::parse_document;

    #[test]
    fn trees_are_addressed_by_id() {
        let main = parse_document("<a><b/>text</a>").unwrap();
        let mut trees = Trees::new(Box::new(main));
        let other = trees
            .add(Box::new(parse_document("<c/>").unwrap()))
            .unwrap();
        assert_eq!(trees.len(), 2);

        let root = trees.root(TreeId::MAIN);
        let a = trees.children(root)[0];
        assert_eq!(trees.name(a).unwrap().local_name, "a");
        assert_eq!(trees.children(a).len(), 2);
        assert_eq!(trees.string_value(a), "text");
        assert_eq!(trees.parent(a), Some(root));

        let c = trees.children(trees.root(other))[0];
        assert!(root < c);
        assert_eq!(trees.node_type(c), NodeType::Element);
    }

    #[test]
    fn document_states() {
        let mut documents = Documents::default();
        let uri = DocumentUri::from("aux.xml");
        assert_eq!(documents.state(&uri), None);
        documents.set(uri.clone(), DocumentState::Pending);
        assert_eq!(documents.pending().count(), 1);
        documents.set(uri.clone(), DocumentState::Failed);
        assert_eq!(documents.state(&uri), Some(DocumentState::Failed));
        assert_eq!(documents.pending().count(), 0);
    }
}
