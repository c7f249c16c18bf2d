//! The owned arena tree.

use crate::access::{NodeId, NodeType, TreeAccess};
use xsltvm_types::QualifiedName;

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) node_type: NodeType,
    pub(crate) name: Option<QualifiedName>,
    /// Character data for text, comment, PI and attribute nodes.
    pub(crate) value: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    pub(crate) previous_sibling: Option<NodeId>,
    pub(crate) attributes: Vec<NodeId>,
}

impl NodeData {
    pub(crate) fn new(node_type: NodeType, name: Option<QualifiedName>, value: String) -> Self {
        Self {
            node_type,
            name,
            value,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            previous_sibling: None,
            attributes: Vec::new(),
        }
    }
}

/// A read-only tree stored as a flat vector of nodes in document order.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) base_uri: Option<String>,
}

impl Document {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn set_base_uri(&mut self, base_uri: impl Into<String>) {
        self.base_uri = Some(base_uri.into());
    }

    /// Elements with the given local name, in document order.
    pub fn elements_named<'d>(&'d self, local_name: &'d str) -> impl Iterator<Item = NodeId> + 'd {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, data)| {
                data.node_type == NodeType::Element
                    && data.name.as_ref().is_some_and(|n| n.local_name == local_name)
            })
            .map(|(index, _)| NodeId(index))
    }

    /// The attribute of `element` with the given local name and no namespace.
    pub fn attribute(&self, element: NodeId, local_name: &str) -> Option<NodeId> {
        self.data(element)?.attributes.iter().copied().find(|&attr| {
            self.nodes[attr.0]
                .name
                .as_ref()
                .is_some_and(|n| n.local_name == local_name && n.uri().is_none())
        })
    }

    fn data(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0)
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let mut child = self.nodes[node.0].first_child;
        while let Some(id) = child {
            let data = &self.nodes[id.0];
            match data.node_type {
                NodeType::Text => out.push_str(&data.value),
                NodeType::Element => self.collect_text(id, out),
                _ => {}
            }
            child = data.next_sibling;
        }
    }
}

impl TreeAccess for Document {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node_type(&self, node: NodeId) -> NodeType {
        self.data(node).map_or(NodeType::Root, |data| data.node_type)
    }

    fn name(&self, node: NodeId) -> Option<&QualifiedName> {
        self.data(node)?.name.as_ref()
    }

    fn string_value(&self, node: NodeId) -> String {
        let Some(data) = self.data(node) else {
            return String::new();
        };
        match data.node_type {
            NodeType::Root | NodeType::Element => {
                let mut out = String::new();
                self.collect_text(node, &mut out);
                out
            }
            _ => data.value.clone(),
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.data(node)?.parent
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.data(node)?.first_child
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.data(node)?.next_sibling
    }

    fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.data(node)?.previous_sibling
    }

    fn attributes(&self, node: NodeId) -> &[NodeId] {
        self.data(node).map_or(&[], |data| data.attributes.as_slice())
    }

    fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentBuilder;

    /// <root><para id="p1">Hello</para><!-- note --><para>World</para></root>
    fn sample() -> Document {
        let mut builder = DocumentBuilder::new();
        builder.start_element(QualifiedName::new("root"));
        builder.start_element(QualifiedName::new("para"));
        builder.add_attribute(QualifiedName::new("id"), "p1").unwrap();
        builder.add_text("Hello");
        builder.end_element().unwrap();
        builder.add_comment(" note ");
        builder.start_element(QualifiedName::new("para"));
        builder.add_text("World");
        builder.end_element().unwrap();
        builder.end_element().unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn string_values() {
        let doc = sample();
        assert_eq!(doc.string_value(doc.root()), "HelloWorld");
        let paras: Vec<_> = doc.elements_named("para").collect();
        assert_eq!(paras.len(), 2);
        assert_eq!(doc.string_value(paras[1]), "World");
        let id = doc.attribute(paras[0], "id").unwrap();
        assert_eq!(doc.node_type(id), NodeType::Attribute);
        assert_eq!(doc.string_value(id), "p1");
        assert_eq!(doc.parent(id), Some(paras[0]));
    }

    #[test]
    fn navigation_and_document_order() {
        let doc = sample();
        let tree: &dyn TreeAccess = &doc;
        let root_element = tree.first_child(tree.root()).unwrap();
        let children: Vec<_> = tree.children(root_element).collect();
        assert_eq!(children.len(), 3);
        assert_eq!(tree.node_type(children[1]), NodeType::Comment);
        assert_eq!(tree.previous_sibling(children[2]), Some(children[1]));
        assert!(children.windows(2).all(|pair| pair[0] < pair[1]));

        let walk: Vec<_> = tree.descendants_or_self(tree.root()).collect();
        assert_eq!(walk.len(), doc.len());
        assert!(walk.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn ancestors_walk_up_to_root() {
        let doc = sample();
        let tree: &dyn TreeAccess = &doc;
        let para = doc.elements_named("para").next().unwrap();
        let text = tree.first_child(para).unwrap();
        let chain: Vec<_> = tree.ancestors_or_self(text).collect();
        assert_eq!(chain.len(), 4);
        assert_eq!(*chain.last().unwrap(), tree.root());
    }
}
