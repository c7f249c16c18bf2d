use crate::error::OutputError;
use crate::sink::OutputSink;
use crate::writer::CharacterSink;
use xsltvm_types::QualifiedName;

/// Writes character data only. Markup, comments and processing
/// instructions are dropped.
pub struct TextSerializer {
    out: Box<dyn CharacterSink>,
}

impl TextSerializer {
    pub fn new(out: Box<dyn CharacterSink>) -> Self {
        Self { out }
    }
}

impl OutputSink for TextSerializer {
    fn start_element(&mut self, _name: &QualifiedName) -> Result<(), OutputError> {
        Ok(())
    }

    fn add_attribute(&mut self, _name: &QualifiedName, _value: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn add_text(&mut self, text: &str, _disable_output_escaping: bool) -> Result<(), OutputError> {
        self.out.write(text)
    }

    fn add_comment(&mut self, _text: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn add_processing_instruction(&mut self, _target: &str, _data: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_element(&mut self, _name: &QualifiedName) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.out.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedBuffer;

    #[test]
    fn only_text_survives() {
        let buffer = SharedBuffer::new();
        let mut text = TextSerializer::new(Box::new(buffer.clone()));
        let p = QualifiedName::new("p");
        text.start_element(&p).unwrap();
        text.add_attribute(&QualifiedName::new("class"), "x").unwrap();
        text.add_text("a < b", false).unwrap();
        text.add_comment("hidden").unwrap();
        text.add_processing_instruction("pi", "hidden").unwrap();
        text.add_text(" & c", true).unwrap();
        text.end_element(&p).unwrap();
        text.end_output().unwrap();
        assert_eq!(buffer.contents(), "a < b & c");
        assert!(buffer.is_ended());
    }
}
