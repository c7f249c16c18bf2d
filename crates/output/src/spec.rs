//! The `xsl:output` settings that select and tune a serializer.

use serde::{Deserialize, Serialize};
use std::fmt;
use xsltvm_types::QualifiedName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

impl fmt::Display for OutputMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMethod::Xml => "xml",
            OutputMethod::Html => "html",
            OutputMethod::Text => "text",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpecification {
    /// `None` lets the first output decide between XML and HTML.
    pub method: Option<OutputMethod>,
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub cdata_section_elements: Vec<QualifiedName>,
    pub media_type: Option<String>,
    /// Write `<a></a>` instead of `<a/>` for empty XML elements.
    pub expand_empty_elements: bool,
}

impl OutputSpecification {
    pub fn with_method(method: OutputMethod) -> Self {
        Self {
            method: Some(method),
            ..Self::default()
        }
    }

    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("UTF-8")
    }

    pub fn is_cdata_section_element(&self, name: &QualifiedName) -> bool {
        self.cdata_section_elements
            .iter()
            .any(|candidate| candidate.same_expanded_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_settings() {
        let spec: OutputSpecification =
            serde_json::from_str(r#"{ "method": "html", "indent": true }"#).unwrap();
        assert_eq!(spec.method, Some(OutputMethod::Html));
        assert!(spec.indent);
        assert!(!spec.omit_xml_declaration);
        assert_eq!(spec.encoding(), "UTF-8");
    }

    #[test]
    fn cdata_elements_match_by_expanded_name() {
        let spec = OutputSpecification {
            cdata_section_elements: vec![QualifiedName::with_namespace(
                Some("a".into()),
                "script",
                Some("urn:s".into()),
            )],
            ..Default::default()
        };
        let other_prefix =
            QualifiedName::with_namespace(Some("b".into()), "script", Some("urn:s".into()));
        assert!(spec.is_cdata_section_element(&other_prefix));
        assert!(!spec.is_cdata_section_element(&QualifiedName::new("script")));
    }
}
