//! Foundation types shared by every xsltvm crate.

pub mod chars;
pub mod ids;
pub mod name;

pub use chars::{is_valid_ncname, is_valid_qname, is_xml_whitespace};
pub use ids::DocumentUri;
pub use name::QualifiedName;
