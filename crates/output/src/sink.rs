use crate::error::OutputError;
use crate::html::HtmlSerializer;
use crate::recording::RecordingSink;
use crate::spec::{OutputMethod, OutputSpecification};
use crate::tee::TeeSink;
use crate::text::TextSerializer;
use crate::tokens::TokenStreamAdapter;
use crate::writer::CharacterSink;
use crate::xml::XmlSerializer;
use xsltvm_types::QualifiedName;

/// The structured output contract the interpreter drives.
///
/// Attributes are only legal between `start_element` and the first
/// non-attribute event that follows it. Namespace declarations travel as
/// `xmlns`/`xmlns:*` attributes.
pub trait OutputSink {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError>;

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError>;

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError>;

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError>;

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError>;

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError>;

    fn end_output(&mut self) -> Result<(), OutputError>;
}

/// The closed set of sinks a transformation can write to.
pub enum Sink {
    Recording(RecordingSink),
    Xml(XmlSerializer),
    Html(HtmlSerializer),
    Text(TextSerializer),
    Tee(Box<TeeSink>),
    Tokens(TokenStreamAdapter),
}

impl Sink {
    /// Builds the concrete serializer for `method` writing into `out`.
    pub fn serializer(
        method: OutputMethod,
        spec: &OutputSpecification,
        out: Box<dyn CharacterSink>,
    ) -> Sink {
        match method {
            OutputMethod::Xml => Sink::Xml(XmlSerializer::new(spec.clone(), out)),
            OutputMethod::Html => Sink::Html(HtmlSerializer::new(spec.clone(), out)),
            OutputMethod::Text => Sink::Text(TextSerializer::new(out)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Sink::Recording(_) => "recording",
            Sink::Xml(_) => "xml",
            Sink::Html(_) => "html",
            Sink::Text(_) => "text",
            Sink::Tee(_) => "tee",
            Sink::Tokens(_) => "tokens",
        }
    }

    pub fn as_recording(&self) -> Option<&RecordingSink> {
        match self {
            Sink::Recording(recording) => Some(recording),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn OutputSink {
        match self {
            Sink::Recording(sink) => sink,
            Sink::Xml(sink) => sink,
            Sink::Html(sink) => sink,
            Sink::Text(sink) => sink,
            Sink::Tee(sink) => sink.as_mut(),
            Sink::Tokens(sink) => sink,
        }
    }
}

impl OutputSink for Sink {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.inner().start_element(name)
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        self.inner().add_attribute(name, value)
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        self.inner().add_text(text, disable_output_escaping)
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.inner().add_comment(text)
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        self.inner().add_processing_instruction(target, data)
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.inner().end_element(name)
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.inner().end_output()
    }
}
