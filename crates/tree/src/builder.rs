use crate::access::{NodeId, NodeType};
use crate::document::{Document, NodeData};
use crate::error::TreeError;
use xsltvm_types::QualifiedName;

/// Incrementally builds a [`Document`] from start/end events.
///
/// Used by the XML loader and by the result tree fragment collector. Node ids
/// are handed out in creation order, which is document order as long as
/// attributes are added before any child content.
#[derive(Debug)]
pub struct DocumentBuilder {
    nodes: Vec<NodeData>,
    open: Vec<NodeId>,
    base_uri: Option<String>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(NodeType::Root, None, String::new())],
            open: vec![NodeId(0)],
            base_uri: None,
        }
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    /// Number of elements currently open.
    pub fn depth(&self) -> usize {
        self.open.len() - 1
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(NodeId(0))
    }

    fn append(&mut self, data: NodeData) -> NodeId {
        let parent = self.current();
        let id = NodeId(self.nodes.len());
        let mut data = data;
        data.parent = Some(parent);
        data.previous_sibling = self.nodes[parent.0].last_child;
        if let Some(previous) = data.previous_sibling {
            self.nodes[previous.0].next_sibling = Some(id);
        } else {
            self.nodes[parent.0].first_child = Some(id);
        }
        self.nodes[parent.0].last_child = Some(id);
        self.nodes.push(data);
        id
    }

    pub fn start_element(&mut self, name: QualifiedName) -> NodeId {
        let id = self.append(NodeData::new(NodeType::Element, Some(name), String::new()));
        self.open.push(id);
        id
    }

    /// Adds an attribute to the innermost open element. A second attribute
    /// with the same expanded name replaces the first.
    pub fn add_attribute(&mut self, name: QualifiedName, value: &str) -> Result<NodeId, TreeError> {
        let element = self.current();
        let owner = &self.nodes[element.0];
        if owner.node_type != NodeType::Element {
            return Err(TreeError::AttributeWithoutElement { name: name.lexical() });
        }
        if owner.first_child.is_some() {
            return Err(TreeError::AttributeAfterContent { name: name.lexical() });
        }
        let existing = owner.attributes.iter().copied().find(|attr| {
            self.nodes[attr.0]
                .name
                .as_ref()
                .is_some_and(|n| n.same_expanded_name(&name))
        });
        if let Some(attr) = existing {
            self.nodes[attr.0].value = value.to_string();
            return Ok(attr);
        }
        let id = NodeId(self.nodes.len());
        let mut data = NodeData::new(NodeType::Attribute, Some(name), value.to_string());
        data.parent = Some(element);
        self.nodes.push(data);
        self.nodes[element.0].attributes.push(id);
        Ok(id)
    }

    /// Appends character data, merging with a directly preceding text node.
    pub fn add_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let parent = self.current();
        if let Some(last) = self.nodes[parent.0].last_child {
            let last = &mut self.nodes[last.0];
            if last.node_type == NodeType::Text {
                last.value.push_str(text);
                return;
            }
        }
        self.append(NodeData::new(NodeType::Text, None, text.to_string()));
    }

    pub fn add_comment(&mut self, text: &str) -> NodeId {
        self.append(NodeData::new(NodeType::Comment, None, text.to_string()))
    }

    pub fn add_processing_instruction(&mut self, target: &str, data: &str) -> NodeId {
        self.append(NodeData::new(
            NodeType::ProcessingInstruction,
            Some(QualifiedName::new(target)),
            data.to_string(),
        ))
    }

    pub fn end_element(&mut self) -> Result<(), TreeError> {
        if self.open.len() <= 1 {
            return Err(TreeError::UnbalancedEnd);
        }
        self.open.pop();
        Ok(())
    }

    pub fn finish(self) -> Result<Document, TreeError> {
        if self.open.len() > 1 {
            return Err(TreeError::UnclosedElements(self.open.len() - 1));
        }
        Ok(Document {
            nodes: self.nodes,
            base_uri: self.base_uri,
        })
    }
}
