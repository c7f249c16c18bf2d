pub mod fixtures;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use xsltvm::engine::testing::ScriptedEvaluator;
use xsltvm::{
    DocumentLoader, DocumentUri, LoadHandle, MessageDisposition, MessageKind, OutputMethod,
    OutputSpecification, OutputTarget, SharedBuffer, Status, Stylesheet, TransformConfig,
    Transformation, TransformationHost, parse_document,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A configuration that leaves the method to the stylesheet or the detected
/// output and never writes an XML declaration.
pub fn config(budget: usize) -> TransformConfig {
    TransformConfig {
        instruction_budget: budget,
        output: Some(OutputSpecification {
            omit_xml_declaration: true,
            ..OutputSpecification::default()
        }),
        ..TransformConfig::default()
    }
}

pub fn config_with_method(budget: usize, method: OutputMethod) -> TransformConfig {
    TransformConfig {
        instruction_budget: budget,
        output: Some(OutputSpecification {
            omit_xml_declaration: true,
            ..OutputSpecification::with_method(method)
        }),
        ..TransformConfig::default()
    }
}

/// A transformation writing characters into the returned buffer.
pub fn new_transformation(
    stylesheet: Stylesheet,
    evaluator: ScriptedEvaluator,
    input: &str,
    config: TransformConfig,
) -> Result<(Transformation, SharedBuffer), Box<dyn std::error::Error>> {
    let buffer = SharedBuffer::new();
    let transformation = Transformation::new(
        Arc::new(stylesheet),
        Box::new(evaluator),
        Box::new(parse_document(input)?),
        OutputTarget::Characters(Box::new(buffer.clone())),
        config,
    )?;
    Ok((transformation, buffer))
}

/// Steps to completion, counting the pauses on the way.
pub fn run_to_end(transformation: &mut Transformation) -> Result<usize, Box<dyn std::error::Error>> {
    let mut pauses = 0;
    loop {
        match transformation.step()? {
            Status::Paused => pauses += 1,
            Status::Finished => return Ok(pauses),
            other => return Err(format!("unexpected status {:?}", other).into()),
        }
    }
}

/// Runs `stylesheet` with a budget and returns the output.
pub fn output_with_budget(
    stylesheet: Stylesheet,
    evaluator: ScriptedEvaluator,
    input: &str,
    budget: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    let (mut transformation, buffer) = new_transformation(stylesheet, evaluator, input, config(budget))?;
    run_to_end(&mut transformation)?;
    Ok(buffer.contents())
}

/// What a [`TestLoader`] saw.
#[derive(Debug, Default)]
pub struct LoaderLog {
    pub requested: Vec<(LoadHandle, DocumentUri)>,
    pub cancelled: Vec<LoadHandle>,
}

/// Hands out handles for every request and records cancellations.
#[derive(Debug, Clone, Default)]
pub struct TestLoader {
    pub log: Rc<RefCell<LoaderLog>>,
    pub refuse: bool,
}

impl DocumentLoader for TestLoader {
    fn load_document(&mut self, uri: &DocumentUri) -> Option<LoadHandle> {
        if self.refuse {
            return None;
        }
        let mut log = self.log.borrow_mut();
        let handle = log.requested.len() as LoadHandle + 1;
        log.requested.push((handle, uri.clone()));
        Some(handle)
    }

    fn cancel_load_document(&mut self, handle: LoadHandle) {
        self.log.borrow_mut().cancelled.push(handle);
    }
}

/// Records callbacks; handles plain messages only.
#[derive(Debug, Clone, Default)]
pub struct TestHost {
    pub continued: Rc<RefCell<usize>>,
    pub messages: Rc<RefCell<Vec<(MessageKind, String)>>>,
}

impl TransformationHost for TestHost {
    fn continue_transformation(&mut self) {
        *self.continued.borrow_mut() += 1;
    }

    fn handle_message(&mut self, kind: MessageKind, text: &str) -> MessageDisposition {
        self.messages.borrow_mut().push((kind, text.to_string()));
        if kind == MessageKind::Message {
            MessageDisposition::Handled
        } else {
            MessageDisposition::Unhandled
        }
    }
}
