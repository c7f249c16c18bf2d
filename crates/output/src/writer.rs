//! The character-level targets the serializers write into.

use crate::error::OutputError;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;

/// The final destination of serialized characters.
pub trait CharacterSink {
    fn write(&mut self, text: &str) -> Result<(), OutputError>;

    /// Called once after the last write.
    fn end(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

impl CharacterSink for String {
    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        self.try_reserve(text.len())?;
        self.push_str(text);
        Ok(())
    }
}

/// A growable in-memory buffer that the host can keep a handle to while the
/// serializer owns another.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Rc<RefCell<String>>,
    ended: Rc<RefCell<bool>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.inner.borrow().clone()
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }
}

impl CharacterSink for SharedBuffer {
    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        CharacterSink::write(&mut *self.inner.borrow_mut(), text)
    }

    fn end(&mut self) -> Result<(), OutputError> {
        *self.ended.borrow_mut() = true;
        Ok(())
    }
}

/// Writes characters to a file that is created on the first write.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, OutputError> {
        if self.writer.is_none() {
            log::debug!("Opening tee output file '{}'", self.path.display());
            self.writer = Some(BufWriter::new(File::create(&self.path)?));
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(OutputError::malformed("tee output file is not open")),
        }
    }
}

impl CharacterSink for FileSink {
    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        self.writer()?.write_all(text.as_bytes())?;
        Ok(())
    }

    fn end(&mut self) -> Result<(), OutputError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_buffer_is_visible_through_clones() {
        let buffer = SharedBuffer::new();
        let mut handle: Box<dyn CharacterSink> = Box::new(buffer.clone());
        handle.write("abc").unwrap();
        handle.write("def").unwrap();
        handle.end().unwrap();
        assert_eq!(buffer.contents(), "abcdef");
        assert!(buffer.is_ended());
    }

    #[test]
    fn file_sink_opens_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut sink = FileSink::new(&path);
        sink.write("").unwrap();
        assert!(!sink.is_open());
        assert!(!path.exists());
        sink.write("hello").unwrap();
        sink.end().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
