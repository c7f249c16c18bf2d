use crate::error::OutputError;
use crate::sink::OutputSink;
use crate::spec::OutputMethod;
use xsltvm_types::{QualifiedName, is_xml_whitespace};

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    StartElement(QualifiedName),
    AddAttribute(QualifiedName, String),
    AddText {
        text: String,
        disable_output_escaping: bool,
    },
    AddComment(String),
    AddProcessingInstruction {
        target: String,
        data: String,
    },
    EndElement(QualifiedName),
    EndOutput,
}

/// Buffers every call until the output method is known.
///
/// While recording, the sink watches for the evidence that decides the
/// method: the name of the first element, or non-whitespace text before it.
/// The log is consumed by [`RecordingSink::replay_into`], which takes the sink
/// by value so it can only happen once.
#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Vec<OutputCommand>,
    detected: Option<OutputMethod>,
    seen_element: bool,
    ended: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The method implied by the output so far, once there is evidence.
    pub fn detected_method(&self) -> Option<OutputMethod> {
        self.detected
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn commands(&self) -> &[OutputCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn record(&mut self, command: OutputCommand) -> Result<(), OutputError> {
        if self.ended {
            return Err(OutputError::malformed("output after end of output"));
        }
        self.commands.try_reserve(1)?;
        self.commands.push(command);
        Ok(())
    }

    fn detect(&mut self, method: OutputMethod) {
        if self.detected.is_none() {
            log::debug!("Recorded output suggests method '{}'", method);
            self.detected = Some(method);
        }
    }

    /// Feeds the recorded calls, in order, into `target`.
    pub fn replay_into(self, target: &mut dyn OutputSink) -> Result<(), OutputError> {
        log::debug!("Replaying {} recorded output commands", self.commands.len());
        for command in self.commands {
            apply_command(target, command)?;
        }
        Ok(())
    }
}

fn apply_command(target: &mut dyn OutputSink, command: OutputCommand) -> Result<(), OutputError> {
    match command {
        OutputCommand::StartElement(name) => target.start_element(&name),
        OutputCommand::AddAttribute(name, value) => target.add_attribute(&name, &value),
        OutputCommand::AddText {
            text,
            disable_output_escaping,
        } => target.add_text(&text, disable_output_escaping),
        OutputCommand::AddComment(text) => target.add_comment(&text),
        OutputCommand::AddProcessingInstruction { target: pi, data } => {
            target.add_processing_instruction(&pi, &data)
        }
        OutputCommand::EndElement(name) => target.end_element(&name),
        OutputCommand::EndOutput => target.end_output(),
    }
}

impl OutputSink for RecordingSink {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        if !self.seen_element {
            self.seen_element = true;
            if name.uri().is_none() && name.local_name.eq_ignore_ascii_case("html") {
                self.detect(OutputMethod::Html);
            } else {
                self.detect(OutputMethod::Xml);
            }
        }
        self.record(OutputCommand::StartElement(name.clone()))
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        self.record(OutputCommand::AddAttribute(name.clone(), value.to_string()))
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        if !self.seen_element && !is_xml_whitespace(text) {
            self.detect(OutputMethod::Xml);
        }
        self.record(OutputCommand::AddText {
            text: text.to_string(),
            disable_output_escaping,
        })
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.record(OutputCommand::AddComment(text.to_string()))
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        self.record(OutputCommand::AddProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.record(OutputCommand::EndElement(name.clone()))
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.record(OutputCommand::EndOutput)?;
        self.ended = true;
        self.detect(OutputMethod::Xml);
        Ok(())
    }
}
