//! Namespace fixup shared by the markup-producing sinks.

use crate::error::OutputError;
use xsltvm_types::{QualifiedName, is_valid_qname};

pub(crate) const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A prefix (`None` for the default namespace) bound to a URI. An empty URI
/// undeclares the default namespace.
pub(crate) type Binding = (Option<String>, String);

/// A start tag whose attributes are still arriving.
#[derive(Debug)]
pub(crate) struct PendingStart {
    pub(crate) name: QualifiedName,
    attributes: Vec<(QualifiedName, String)>,
    declarations: Vec<Binding>,
}

impl PendingStart {
    pub(crate) fn new(name: &QualifiedName) -> Self {
        Self {
            name: name.clone(),
            attributes: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Adds an attribute; `xmlns` attributes become requested bindings and a
    /// repeated attribute replaces the earlier value.
    pub(crate) fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        if name.is_namespace_declaration() {
            let prefix = name.prefix().map(|_| name.local_name.clone());
            if prefix.as_deref() == Some("xml") {
                return Ok(());
            }
            self.declarations.retain(|(bound, _)| *bound != prefix);
            self.declarations.try_reserve(1)?;
            self.declarations.push((prefix, value.to_string()));
            return Ok(());
        }
        if !is_valid_qname(&name.lexical()) {
            return Err(OutputError::malformed(format!(
                "'{}' is not a valid attribute name",
                name
            )));
        }
        match self
            .attributes
            .iter_mut()
            .find(|(existing, _)| existing.same_expanded_name(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => {
                self.attributes.try_reserve(1)?;
                self.attributes.push((name.clone(), value.to_string()));
            }
        }
        Ok(())
    }
}

/// A start tag with every name resolved against the bindings in scope.
#[derive(Debug)]
pub(crate) struct StartTag {
    pub(crate) name: QualifiedName,
    pub(crate) lexical: String,
    /// Declarations the tag must carry; all of them are now in scope.
    pub(crate) declarations: Vec<Binding>,
    pub(crate) attributes: Vec<(String, String)>,
}

/// The namespace bindings of the open elements, innermost last.
#[derive(Debug, Default)]
pub(crate) struct NamespaceScope {
    bindings: Vec<Binding>,
}

impl NamespaceScope {
    fn lookup<'a>(&'a self, extra: &'a [Binding], prefix: Option<&str>) -> Option<&'a str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        extra
            .iter()
            .rev()
            .chain(self.bindings.iter().rev())
            .find(|(bound, _)| bound.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Picks prefixes for the element and its attributes, declaring only
    /// missing or conflicting bindings, and brings those declarations into
    /// scope. Undo with [`NamespaceScope::pop`] and the declaration count.
    pub(crate) fn open(&mut self, pending: PendingStart) -> Result<StartTag, OutputError> {
        let PendingStart {
            name,
            attributes,
            mut declarations,
        } = pending;

        let element_prefix = match name.uri() {
            Some(uri) => {
                let prefix = name.prefix().filter(|p| *p != "xmlns").map(str::to_string);
                if self.lookup(&declarations, prefix.as_deref()) != Some(uri) {
                    declarations.retain(|(bound, _)| *bound != prefix);
                    declarations.push((prefix.clone(), uri.to_string()));
                }
                prefix
            }
            None => {
                if self.lookup(&declarations, None).is_some() {
                    declarations.retain(|(bound, _)| bound.is_some());
                    declarations.push((None, String::new()));
                }
                None
            }
        };
        let lexical = match &element_prefix {
            Some(prefix) => format!("{}:{}", prefix, name.local_name),
            None => name.local_name.clone(),
        };

        let mut written_attributes = Vec::new();
        written_attributes.try_reserve(attributes.len())?;
        let mut generated = 0usize;
        for (attr, value) in attributes {
            let attr_lexical = match attr.uri() {
                Some(uri) => {
                    let mut prefix = attr
                        .prefix()
                        .filter(|p| *p != "xmlns")
                        .map(str::to_string);
                    let usable = match prefix.as_deref() {
                        Some(p) => match self.lookup(&declarations, Some(p)) {
                            Some(bound) => bound == uri,
                            None => {
                                declarations.push((Some(p.to_string()), uri.to_string()));
                                true
                            }
                        },
                        None => false,
                    };
                    if !usable {
                        let existing = declarations
                            .iter()
                            .chain(self.bindings.iter())
                            .find(|(p, u)| p.is_some() && u == uri)
                            .and_then(|(p, _)| p.clone())
                            .filter(|p| self.lookup(&declarations, Some(p.as_str())) == Some(uri));
                        prefix = match existing {
                            Some(p) => Some(p),
                            None => {
                                let fresh = loop {
                                    let candidate = format!("ns{}", generated);
                                    generated += 1;
                                    if self.lookup(&declarations, Some(candidate.as_str())).is_none() {
                                        break candidate;
                                    }
                                };
                                declarations.push((Some(fresh.clone()), uri.to_string()));
                                Some(fresh)
                            }
                        };
                    }
                    match prefix {
                        Some(p) => format!("{}:{}", p, attr.local_name),
                        None => attr.local_name.clone(),
                    }
                }
                None => attr.local_name.clone(),
            };
            written_attributes.push((attr_lexical, value));
        }

        // Bindings already in scope with the same URI need no declaration.
        let mut needed = Vec::new();
        for (prefix, uri) in declarations {
            let current = self.lookup(&[], prefix.as_deref()).unwrap_or("");
            if current != uri && prefix.as_deref() != Some("xml") {
                needed.try_reserve(1)?;
                needed.push((prefix, uri));
            }
        }
        self.bindings.try_reserve(needed.len())?;
        self.bindings.extend(needed.iter().cloned());

        Ok(StartTag {
            name,
            lexical,
            declarations: needed,
            attributes: written_attributes,
        })
    }

    /// Drops the innermost `count` bindings.
    pub(crate) fn pop(&mut self, count: usize) {
        let keep = self.bindings.len().saturating_sub(count);
        self.bindings.truncate(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(prefix: Option<&str>, local: &str, uri: &str) -> QualifiedName {
        QualifiedName::with_namespace(prefix.map(str::to_string), local, Some(uri.to_string()))
    }

    #[test]
    fn nested_scopes_reuse_and_release_bindings() {
        let mut scope = NamespaceScope::default();
        let outer = scope.open(PendingStart::new(&ns(Some("a"), "root", "urn:a"))).unwrap();
        assert_eq!(outer.declarations, vec![(Some("a".to_string()), "urn:a".to_string())]);

        let inner = scope.open(PendingStart::new(&ns(Some("a"), "child", "urn:a"))).unwrap();
        assert!(inner.declarations.is_empty());
        scope.pop(inner.declarations.len());
        scope.pop(outer.declarations.len());

        let again = scope.open(PendingStart::new(&ns(Some("a"), "root", "urn:a"))).unwrap();
        assert_eq!(again.declarations.len(), 1);
    }

    #[test]
    fn conflicting_attribute_prefix_is_renamed() {
        let mut scope = NamespaceScope::default();
        let mut pending = PendingStart::new(&ns(Some("p"), "e", "urn:one"));
        pending.add_attribute(&ns(Some("p"), "x", "urn:two"), "1").unwrap();
        let tag = scope.open(pending).unwrap();
        assert_eq!(tag.lexical, "p:e");
        assert_eq!(tag.attributes, vec![("ns0:x".to_string(), "1".to_string())]);
        assert!(tag.declarations.contains(&(Some("ns0".to_string()), "urn:two".to_string())));
    }
}
