use crate::error::OutputError;
use crate::sink::{OutputSink, Sink};
use crate::spec::{OutputMethod, OutputSpecification};
use crate::writer::FileSink;
use std::path::Path;
use xsltvm_types::QualifiedName;

/// Forwards every call to the real sink and to a second serializer that
/// writes a copy of the output to a file.
///
/// The file is created lazily by its [`FileSink`], so a transformation that
/// produces nothing leaves no file behind.
pub struct TeeSink {
    primary: Sink,
    copy: Sink,
}

impl TeeSink {
    pub fn new(primary: Sink, copy: Sink) -> Self {
        Self { primary, copy }
    }

    /// Tees `primary` into a fresh `method` serializer writing to `path`.
    pub fn to_file(
        primary: Sink,
        method: OutputMethod,
        spec: &OutputSpecification,
        path: &Path,
    ) -> Self {
        log::debug!("Teeing {} output to '{}'", method, path.display());
        let copy = Sink::serializer(method, spec, Box::new(FileSink::new(path)));
        Self::new(primary, copy)
    }

    pub fn into_parts(self) -> (Sink, Sink) {
        (self.primary, self.copy)
    }
}

impl OutputSink for TeeSink {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.primary.start_element(name)?;
        self.copy.start_element(name)
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        self.primary.add_attribute(name, value)?;
        self.copy.add_attribute(name, value)
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        self.primary.add_text(text, disable_output_escaping)?;
        self.copy.add_text(text, disable_output_escaping)
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.primary.add_comment(text)?;
        self.copy.add_comment(text)
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        self.primary.add_processing_instruction(target, data)?;
        self.copy.add_processing_instruction(target, data)
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        self.primary.end_element(name)?;
        self.copy.end_element(name)
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.primary.end_output()?;
        self.copy.end_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedBuffer;

    #[test]
    fn copies_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee.xml");
        let spec = OutputSpecification {
            omit_xml_declaration: true,
            ..Default::default()
        };
        let buffer = SharedBuffer::new();
        let primary = Sink::serializer(OutputMethod::Xml, &spec, Box::new(buffer.clone()));
        let mut tee = TeeSink::to_file(primary, OutputMethod::Xml, &spec, &path);

        assert!(!path.exists());
        let doc = QualifiedName::new("doc");
        tee.start_element(&doc).unwrap();
        tee.add_text("hi", false).unwrap();
        tee.end_element(&doc).unwrap();
        tee.end_output().unwrap();

        assert_eq!(buffer.contents(), "<doc>hi</doc>");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<doc>hi</doc>");
    }
}
