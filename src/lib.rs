//! xsltvm: a resumable XSLT transformation runtime.
//!
//! The workspace is split the usual way: [`types`] and [`tree`] hold the
//! foundation types, [`output`] the sinks and serializers, and [`engine`] the
//! interpreter and the transformation driver. This crate re-exports them and
//! adds [`transform_to_string`] for hosts that only need a finished string.

pub use xsltvm_engine as engine;
pub use xsltvm_output as output;
pub use xsltvm_tree as tree;
pub use xsltvm_types as types;

pub use xsltvm_engine::{
    Diagnostic, DocumentLoader, Engine, Eval, EvalContext, EvalError, Evaluator, LoadHandle,
    MessageDisposition, MessageKind, OutputTarget, Program, ProgramBuilder, Progress, Status,
    Stylesheet, StylesheetBuilder, TransformConfig, TransformError, Transformation,
    TransformationHost, TransformationState, Value,
};
pub use xsltvm_output::{OutputMethod, OutputSpecification, SharedBuffer};
pub use xsltvm_tree::{Document, TreeAccess, parse_document};
pub use xsltvm_types::{DocumentUri, QualifiedName};

use std::sync::Arc;

/// Runs `stylesheet` over `input` until it finishes and returns the
/// serialized result with the diagnostics reported along the way.
///
/// `document()` calls see no documents and a deferred output decision is
/// confirmed with the detected method.
pub fn transform_to_string(
    stylesheet: Arc<Stylesheet>,
    evaluator: Box<dyn Evaluator>,
    input: Box<dyn TreeAccess>,
    config: TransformConfig,
) -> Result<(String, Vec<Diagnostic>), TransformError> {
    let buffer = SharedBuffer::new();
    let mut transformation = Transformation::new(
        stylesheet,
        evaluator,
        input,
        OutputTarget::Characters(Box::new(buffer.clone())),
        config,
    )?;
    loop {
        match transformation.run()? {
            Status::Finished => break,
            Status::NeedsOutputDecision(method) => {
                log::debug!("Confirming detected output method {}", method);
                transformation.confirm_output_method()?;
            }
            Status::Blocked => {
                return Err(TransformError::invalid_state(
                    transformation.state(),
                    "document loads need a loader",
                ));
            }
            Status::Paused => {}
        }
    }
    Ok((buffer.contents(), transformation.diagnostics().to_vec()))
}
