//! Input trees for the transformation runtime.
//!
//! The interpreter is written against [`TreeAccess`]. [`Document`] is the owned
//! arena implementation used both for parsed input (see [`parse_document`]) and
//! for result tree fragments built through [`DocumentBuilder`].

pub mod access;
pub mod builder;
pub mod document;
pub mod error;
pub mod xml;

pub use access::{Children, Descendants, NodeId, NodeType, TreeAccess};
pub use builder::DocumentBuilder;
pub use document::Document;
pub use error::TreeError;
pub use xml::{parse_document, parse_document_with_base};
