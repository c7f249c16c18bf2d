//! Defines the core abstraction for a navigable, read-only input tree.

use std::fmt;
use xsltvm_types::QualifiedName;

/// Identifies a node inside one tree.
///
/// Ids are assigned in document order: for two nodes of the same tree,
/// `a < b` exactly when `a` precedes `b`. Attributes sort after their owner
/// element and before the element's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The type of a node in the tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The contract the interpreter needs from an input tree.
///
/// Implementations must answer identically for repeated calls as long as the
/// tree is not mutated; the interpreter caches node identities across
/// suspensions and key index builds.
pub trait TreeAccess: fmt::Debug {
    fn root(&self) -> NodeId;

    fn node_type(&self, node: NodeId) -> NodeType;

    /// The qualified name of elements and attributes. For a processing
    /// instruction this is its target. `None` for root, text and comments.
    fn name(&self, node: NodeId) -> Option<&QualifiedName>;

    /// The XPath string value: text content for text and attribute nodes,
    /// the concatenated descendant text for roots and elements.
    fn string_value(&self, node: NodeId) -> String;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn first_child(&self, node: NodeId) -> Option<NodeId>;

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn previous_sibling(&self, node: NodeId) -> Option<NodeId>;

    /// Attribute nodes of an element, in document order. Empty otherwise.
    fn attributes(&self, node: NodeId) -> &[NodeId];

    /// The declared base URI of the tree, if known.
    fn base_uri(&self) -> Option<&str>;
}

impl<'t> dyn TreeAccess + 't {
    pub fn children(&self, node: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(node),
        }
    }

    /// Preorder walk of `node` and everything below it, attributes included.
    pub fn descendants_or_self(&self, node: NodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            stack: vec![node],
        }
    }

    /// Walks from `node` up to the root, `node` first.
    pub fn ancestors_or_self(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |&current| self.parent(current))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.node_type(node) == NodeType::Element
    }
}

/// Iterator over the child nodes of one node.
pub struct Children<'a> {
    tree: &'a dyn TreeAccess,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(current)
    }
}

/// Document-order preorder iterator, attributes yielded after their element.
pub struct Descendants<'a> {
    tree: &'a dyn TreeAccess,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        if self.tree.node_type(current) != NodeType::Attribute {
            let children: Vec<NodeId> = self.tree.children(current).collect();
            self.stack.extend(children.into_iter().rev());
            self.stack
                .extend(self.tree.attributes(current).iter().rev().copied());
        }
        Some(current)
    }
}
