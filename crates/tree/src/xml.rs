//! Loads XML text into a [`Document`] via roxmltree.

use crate::builder::DocumentBuilder;
use crate::document::Document;
use crate::error::TreeError;
use roxmltree::{Node, NodeType as RoxNodeType};
use xsltvm_types::QualifiedName;

/// Parses XML text into an owned tree.
pub fn parse_document(text: &str) -> Result<Document, TreeError> {
    build(text, None)
}

/// Parses XML text and records `base_uri` as the tree's base URI.
pub fn parse_document_with_base(text: &str, base_uri: &str) -> Result<Document, TreeError> {
    build(text, Some(base_uri))
}

fn build(text: &str, base_uri: Option<&str>) -> Result<Document, TreeError> {
    let parsed = roxmltree::Document::parse(text)?;
    let mut builder = DocumentBuilder::new();
    if let Some(base) = base_uri {
        builder = builder.with_base_uri(base);
    }
    for child in parsed.root().children() {
        copy_node(child, &mut builder)?;
    }
    let document = builder.finish()?;
    log::debug!(
        "Parsed input tree with {} nodes{}",
        document.len(),
        base_uri.map(|b| format!(" from '{}'", b)).unwrap_or_default()
    );
    Ok(document)
}

fn element_name(node: Node<'_, '_>) -> QualifiedName {
    let tag = node.tag_name();
    let namespace = tag.namespace().map(str::to_string);
    let prefix = tag
        .namespace()
        .and_then(|uri| node.lookup_prefix(uri))
        .map(str::to_string);
    QualifiedName::with_namespace(prefix, tag.name(), namespace)
}

fn copy_node(node: Node<'_, '_>, builder: &mut DocumentBuilder) -> Result<(), TreeError> {
    match node.node_type() {
        RoxNodeType::Element => {
            builder.start_element(element_name(node));
            for attr in node.attributes() {
                let prefix = attr
                    .namespace()
                    .and_then(|uri| node.lookup_prefix(uri))
                    .map(str::to_string);
                let name = QualifiedName::with_namespace(
                    prefix,
                    attr.name(),
                    attr.namespace().map(str::to_string),
                );
                builder.add_attribute(name, attr.value())?;
            }
            for child in node.children() {
                copy_node(child, builder)?;
            }
            builder.end_element()?;
        }
        RoxNodeType::Text => {
            if let Some(text) = node.text() {
                builder.add_text(text);
            }
        }
        RoxNodeType::Comment => {
            builder.add_comment(node.text().unwrap_or_default());
        }
        RoxNodeType::PI => {
            if let Some(pi) = node.pi() {
                builder.add_processing_instruction(pi.target, pi.value.unwrap_or_default());
            }
        }
        RoxNodeType::Root => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeType, TreeAccess};

    #[test]
    fn parses_elements_attributes_and_text() {
        let doc = parse_document(r#"<list><item id="1">A</item><item id="2">B</item></list>"#)
            .unwrap();
        let items: Vec<_> = doc.elements_named("item").collect();
        assert_eq!(items.len(), 2);
        let id = doc.attribute(items[1], "id").unwrap();
        assert_eq!(doc.string_value(id), "2");
        assert_eq!(doc.string_value(doc.root()), "AB");
    }

    #[test]
    fn keeps_namespaces_and_prefixes() {
        let doc = parse_document(r#"<x:doc xmlns:x="urn:x" x:flag="y"/>"#).unwrap();
        let element = doc.first_child(doc.root()).unwrap();
        let name = doc.name(element).unwrap();
        assert_eq!(name.uri(), Some("urn:x"));
        assert_eq!(name.prefix(), Some("x"));
        let attr = doc.attributes(element)[0];
        assert_eq!(doc.name(attr).unwrap().lexical(), "x:flag");
    }

    #[test]
    fn comments_and_processing_instructions() {
        let doc = parse_document("<a><!--c--><?target data?></a>").unwrap();
        let a = doc.first_child(doc.root()).unwrap();
        let comment = doc.first_child(a).unwrap();
        assert_eq!(doc.node_type(comment), NodeType::Comment);
        assert_eq!(doc.string_value(comment), "c");
        let pi = doc.next_sibling(comment).unwrap();
        assert_eq!(doc.node_type(pi), NodeType::ProcessingInstruction);
        assert_eq!(doc.name(pi).unwrap().local_name, "target");
        assert_eq!(doc.string_value(pi), "data");
    }

    #[test]
    fn base_uri_is_recorded() {
        let doc = parse_document_with_base("<a/>", "file:///in.xml").unwrap();
        assert_eq!(doc.base_uri(), Some("file:///in.xml"));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(matches!(parse_document("<a>"), Err(TreeError::XmlParse(_))));
    }
}
