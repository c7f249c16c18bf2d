//! Re-synthesizes sink calls as `quick_xml` events for an incremental
//! downstream consumer.

use crate::error::OutputError;
use crate::namespaces::{NamespaceScope, PendingStart};
use crate::sink::OutputSink;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::cell::RefCell;
use std::rc::Rc;
use xsltvm_types::{QualifiedName, is_valid_ncname, is_valid_qname};

/// Receives the token stream, one event at a time.
pub trait TokenConsumer {
    fn token(&mut self, event: Event<'static>) -> Result<(), OutputError>;

    fn end(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// A consumer that keeps every token, shareable with the host.
#[derive(Debug, Clone, Default)]
pub struct TokenCollector {
    events: Rc<RefCell<Vec<Event<'static>>>>,
}

impl TokenCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event<'static>> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Writes the collected tokens back out as markup.
    pub fn to_markup(&self) -> Result<String, OutputError> {
        let mut writer = Writer::new(Vec::new());
        for event in self.events.borrow().iter() {
            writer
                .write_event(event.borrow())
                .map_err(|e| OutputError::malformed(e.to_string()))?;
        }
        String::from_utf8(writer.into_inner()).map_err(|e| OutputError::malformed(e.to_string()))
    }
}

impl TokenConsumer for TokenCollector {
    fn token(&mut self, event: Event<'static>) -> Result<(), OutputError> {
        let mut events = self.events.borrow_mut();
        events.try_reserve(1)?;
        events.push(event);
        Ok(())
    }
}

/// Converts sink calls into tokens.
///
/// Character data is buffered until the next non-text call so that each run
/// of text becomes a single token. Start tags are held back until their
/// attributes are complete, then carry the `xmlns` attributes their names
/// need. Anything the consumer could not reparse as well-formed markup is
/// rejected as malformed.
pub struct TokenStreamAdapter {
    consumer: Box<dyn TokenConsumer>,
    pending_start: Option<PendingStart>,
    text: String,
    open: Vec<OpenTag>,
    namespaces: NamespaceScope,
}

#[derive(Debug)]
struct OpenTag {
    requested: String,
    written: String,
    bindings: usize,
}

impl TokenStreamAdapter {
    pub fn new(consumer: Box<dyn TokenConsumer>) -> Self {
        Self {
            consumer,
            pending_start: None,
            text: String::new(),
            open: Vec::new(),
            namespaces: NamespaceScope::default(),
        }
    }

    fn flush_start(&mut self) -> Result<(), OutputError> {
        let Some(pending) = self.pending_start.take() else {
            return Ok(());
        };
        let tag = self.namespaces.open(pending)?;
        let mut start = BytesStart::new(tag.lexical.clone());
        for (prefix, uri) in &tag.declarations {
            match prefix {
                Some(p) => start.push_attribute((format!("xmlns:{}", p).as_str(), uri.as_str())),
                None => start.push_attribute(("xmlns", uri.as_str())),
            }
        }
        for (lexical, value) in &tag.attributes {
            start.push_attribute((lexical.as_str(), value.as_str()));
        }
        if let Some(open) = self.open.last_mut() {
            open.written = tag.lexical;
            open.bindings = tag.declarations.len();
        }
        self.consumer.token(Event::Start(start))
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.flush_start()?;
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.consumer
                .token(Event::Text(BytesText::new(&text).into_owned()))?;
        }
        Ok(())
    }
}

impl OutputSink for TokenStreamAdapter {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        let lexical = name.lexical();
        if !is_valid_qname(&lexical) {
            return Err(OutputError::malformed(format!(
                "'{}' is not a valid element name",
                lexical
            )));
        }
        self.flush()?;
        self.open.try_reserve(1)?;
        self.open.push(OpenTag {
            written: lexical.clone(),
            requested: lexical,
            bindings: 0,
        });
        self.pending_start = Some(PendingStart::new(name));
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        let Some(start) = self.pending_start.as_mut() else {
            return Err(OutputError::malformed(format!(
                "attribute '{}' outside of a start tag",
                name
            )));
        };
        start.add_attribute(name, value)
    }

    fn add_text(&mut self, text: &str, _disable_output_escaping: bool) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_start()?;
        self.text.try_reserve(text.len())?;
        self.text.push_str(text);
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        if text.contains("--") || text.ends_with('-') {
            return Err(OutputError::malformed(format!(
                "comment '{}' cannot be represented",
                text
            )));
        }
        self.flush()?;
        self.consumer
            .token(Event::Comment(BytesText::from_escaped(text.to_string())))
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        if !is_valid_ncname(target) || target.eq_ignore_ascii_case("xml") {
            return Err(OutputError::malformed(format!(
                "'{}' is not a valid processing instruction target",
                target
            )));
        }
        if data.contains("?>") {
            return Err(OutputError::malformed(
                "processing instruction data contains '?>'",
            ));
        }
        self.flush()?;
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{} {}", target, data)
        };
        self.consumer.token(Event::PI(BytesPI::new(content)))
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.flush()?;
        let lexical = name.lexical();
        let open = match self.open.pop() {
            Some(open) if open.requested == lexical => open,
            Some(open) => {
                return Err(OutputError::malformed(format!(
                    "end of element '{}' does not match start of '{}'",
                    lexical, open.requested
                )));
            }
            None => {
                return Err(OutputError::malformed(format!(
                    "end of element '{}' without a matching start",
                    lexical
                )));
            }
        };
        self.namespaces.pop(open.bindings);
        self.consumer.token(Event::End(BytesEnd::new(open.written)))
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.flush()?;
        if let Some(open) = self.open.last() {
            return Err(OutputError::malformed(format!(
                "element '{}' still open at end of output",
                open.requested
            )));
        }
        self.consumer.end()
    }
}
