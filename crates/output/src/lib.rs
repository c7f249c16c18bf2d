//! Output sinks driven by the transformation interpreter.
//!
//! Every sink implements [`OutputSink`]. The interpreter only ever talks to a
//! [`Sink`], the closed set of variants: a [`RecordingSink`] that postpones the
//! choice of serializer, the [`XmlSerializer`], [`HtmlSerializer`] and
//! [`TextSerializer`] that write characters to a [`CharacterSink`], the
//! [`TeeSink`] that duplicates output into a file, and the
//! [`TokenStreamAdapter`] that feeds `quick_xml` events to a [`TokenConsumer`].

pub mod error;
pub mod html;
mod namespaces;
pub mod recording;
pub mod sink;
pub mod spec;
pub mod tee;
pub mod text;
pub mod tokens;
pub mod writer;
pub mod xml;

pub use error::OutputError;
pub use html::HtmlSerializer;
pub use recording::{OutputCommand, RecordingSink};
pub use sink::{OutputSink, Sink};
pub use spec::{OutputMethod, OutputSpecification};
pub use tee::TeeSink;
pub use text::TextSerializer;
pub use tokens::{TokenCollector, TokenConsumer, TokenStreamAdapter};
pub use writer::{CharacterSink, FileSink, SharedBuffer};
pub use xml::XmlSerializer;
