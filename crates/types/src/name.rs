//! Qualified names as they flow through the interpreter and the output sinks.

use crate::chars::is_valid_qname;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A name with an optional prefix and an optional namespace URI.
///
/// Equality compares all three parts. Use [`QualifiedName::same_expanded_name`]
/// when only the namespace URI and local part matter (the XPath notion of
/// name identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace_uri: Option<String>,
}

impl QualifiedName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace_uri: None,
        }
    }

    pub fn with_namespace(
        prefix: Option<String>,
        local_name: impl Into<String>,
        namespace_uri: Option<String>,
    ) -> Self {
        Self {
            prefix,
            local_name: local_name.into(),
            namespace_uri: namespace_uri.filter(|uri| !uri.is_empty()),
        }
    }

    /// Splits a lexical QName (`prefix:local` or `local`). Returns `None` when
    /// the string is not a valid QName. The namespace URI is left unresolved.
    pub fn parse(lexical: &str) -> Option<Self> {
        if !is_valid_qname(lexical) {
            return None;
        }
        Some(match lexical.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_string()),
                local_name: local.to_string(),
                namespace_uri: None,
            },
            None => Self::new(lexical),
        })
    }

    pub fn uri(&self) -> Option<&str> {
        self.namespace_uri.as_deref().filter(|uri| !uri.is_empty())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|prefix| !prefix.is_empty())
    }

    pub fn set_uri(&mut self, uri: Option<&str>) {
        self.namespace_uri = uri.filter(|uri| !uri.is_empty()).map(str::to_string);
    }

    /// True for `xmlns` and `xmlns:*` attribute names.
    pub fn is_namespace_declaration(&self) -> bool {
        match self.prefix() {
            Some(prefix) => prefix == "xmlns",
            None => self.local_name == "xmlns",
        }
    }

    /// Compares namespace URI and local part, ignoring the prefix.
    pub fn same_expanded_name(&self, other: &QualifiedName) -> bool {
        self.local_name == other.local_name && self.uri() == other.uri()
    }

    /// The lexical form, `prefix:local` or `local`.
    pub fn lexical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix() {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

impl From<&str> for QualifiedName {
    fn from(local_name: &str) -> Self {
        Self::new(local_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_simple() {
        let qname = QualifiedName::new("element");
        assert_eq!(qname.local_name, "element");
        assert!(qname.prefix.is_none());
        assert!(qname.uri().is_none());
        assert_eq!(qname.to_string(), "element");
    }

    #[test]
    fn test_qname_with_namespace() {
        let qname = QualifiedName::with_namespace(
            Some("xsl".to_string()),
            "template",
            Some("http://www.w3.org/1999/XSL/Transform".to_string()),
        );
        assert_eq!(qname.prefix(), Some("xsl"));
        assert_eq!(qname.uri(), Some("http://www.w3.org/1999/XSL/Transform"));
        assert_eq!(qname.to_string(), "xsl:template");
    }

    #[test]
    fn empty_uri_means_no_namespace() {
        let qname = QualifiedName::with_namespace(None, "p", Some(String::new()));
        assert!(qname.uri().is_none());
    }

    #[test]
    fn parse_splits_prefix() {
        let qname = QualifiedName::parse("svg:rect").unwrap();
        assert_eq!(qname.prefix(), Some("svg"));
        assert_eq!(qname.local_name, "rect");

        assert!(QualifiedName::parse("1abc").is_none());
        assert!(QualifiedName::parse("a:b:c").is_none());
        assert!(QualifiedName::parse("").is_none());
    }

    #[test]
    fn expanded_name_ignores_prefix() {
        let a = QualifiedName::with_namespace(Some("a".into()), "x", Some("urn:x".into()));
        let b = QualifiedName::with_namespace(Some("b".into()), "x", Some("urn:x".into()));
        assert_ne!(a, b);
        assert!(a.same_expanded_name(&b));
    }

    #[test]
    fn namespace_declaration_names() {
        assert!(QualifiedName::new("xmlns").is_namespace_declaration());
        assert!(QualifiedName::parse("xmlns:svg").unwrap().is_namespace_declaration());
        assert!(!QualifiedName::parse("xml:lang").unwrap().is_namespace_declaration());
    }
}
