//! Newtype wrappers for string identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// The URI an auxiliary document was requested under.
///
/// Two requests for the same URI share one load, so the driver keys its
/// pending-load table by this type.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentUri(Arc<str>);

impl DocumentUri {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DocumentUri {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for DocumentUri {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl AsRef<str> for DocumentUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn uris_compare_by_content() {
        let a = DocumentUri::from("lookup.xml");
        let b = DocumentUri::new(String::from("lookup.xml"));
        assert_eq!(a, b);

        let mut seen = HashSet::new();
        seen.insert(a);
        assert!(!seen.insert(b));
    }

    #[test]
    fn display_is_the_raw_uri() {
        assert_eq!(DocumentUri::from("a/b.xml").to_string(), "a/b.xml");
    }
}
