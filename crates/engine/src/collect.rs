//! Local output targets: text collected for attribute values, comments and
//! messages, and result tree fragments collected for variables.

use xsltvm_output::{OutputError, OutputSink};
use xsltvm_tree::{Document, DocumentBuilder};
use xsltvm_types::QualifiedName;

/// Keeps only text; markup inside the collected content is dropped along
/// with any text nested in elements, matching what an attribute value or
/// comment can hold.
#[derive(Debug, Default)]
pub struct TextCollector {
    text: String,
    depth: usize,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl OutputSink for TextCollector {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        log::debug!("Element '{}' dropped from text-only content", name);
        self.depth += 1;
        Ok(())
    }

    fn add_attribute(&mut self, _name: &QualifiedName, _value: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn add_text(&mut self, text: &str, _disable_output_escaping: bool) -> Result<(), OutputError> {
        if self.depth == 0 {
            self.text.try_reserve(text.len())?;
            self.text.push_str(text);
        }
        Ok(())
    }

    fn add_comment(&mut self, _text: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn add_processing_instruction(&mut self, _target: &str, _data: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_element(&mut self, _name: &QualifiedName) -> Result<(), OutputError> {
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Builds a result tree fragment as a [`Document`].
#[derive(Debug, Default)]
pub struct FragmentCollector {
    builder: DocumentBuilder,
}

impl FragmentCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Result<Document, OutputError> {
        self.builder
            .finish()
            .map_err(|e| OutputError::malformed(e.to_string()))
    }
}

impl OutputSink for FragmentCollector {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.builder.start_element(name.clone());
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        // Namespace nodes are not modelled in fragments.
        if name.is_namespace_declaration() {
            return Ok(());
        }
        self.builder
            .add_attribute(name.clone(), value)
            .map(|_| ())
            .map_err(|e| OutputError::malformed(e.to_string()))
    }

    fn add_text(&mut self, text: &str, _disable_output_escaping: bool) -> Result<(), OutputError> {
        self.builder.add_text(text);
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.builder.add_comment(text);
        Ok(())
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        self.builder.add_processing_instruction(target, data);
        Ok(())
    }

    fn end_element(&mut self, _name: &QualifiedName) -> Result<(), OutputError> {
        self.builder
            .end_element()
            .map_err(|e| OutputError::malformed(e.to_string()))
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}
