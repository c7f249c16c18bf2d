use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("XML parsing error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("attribute '{name}' added after element content")]
    AttributeAfterContent { name: String },

    #[error("attribute '{name}' added outside of an element")]
    AttributeWithoutElement { name: String },

    #[error("end of element without a matching start")]
    UnbalancedEnd,

    #[error("{0} element(s) left open when the tree was finished")]
    UnclosedElements(usize),
}
