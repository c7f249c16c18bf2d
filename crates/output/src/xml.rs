//! The XML source serializer.

use crate::error::OutputError;
use crate::namespaces::{NamespaceScope, PendingStart};
use crate::sink::OutputSink;
use crate::spec::OutputSpecification;
use crate::writer::CharacterSink;
use quick_xml::escape::partial_escape;
use xsltvm_types::{QualifiedName, is_valid_ncname, is_valid_qname};

/// Escapes an attribute value for a double-quoted attribute.
pub(crate) fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '"' => escaped.push_str("&quot;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' => escaped.push_str("&#9;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Makes comment text safe to place between `<!--` and `-->`.
pub(crate) fn sanitize_comment(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '-' && sanitized.ends_with('-') {
            sanitized.push(' ');
        }
        sanitized.push(c);
    }
    if sanitized.ends_with('-') {
        sanitized.push(' ');
    }
    sanitized
}

pub(crate) fn check_pi_target(target: &str) -> Result<(), OutputError> {
    if !is_valid_ncname(target) || target.eq_ignore_ascii_case("xml") {
        return Err(OutputError::malformed(format!(
            "'{}' is not a valid processing instruction target",
            target
        )));
    }
    Ok(())
}

#[derive(Debug)]
struct OpenElement {
    lexical: String,
    bindings: usize,
    cdata: bool,
    has_element_children: bool,
    has_text: bool,
}

/// Serializes sink calls as XML text.
///
/// Namespace declarations are computed when a start tag is written: the
/// element and attribute names are checked against the bindings in scope and
/// only missing or conflicting bindings are declared. Explicit `xmlns`
/// attributes count as requested bindings.
pub struct XmlSerializer {
    spec: OutputSpecification,
    out: Box<dyn CharacterSink>,
    pending: Option<PendingStart>,
    open: Vec<OpenElement>,
    namespaces: NamespaceScope,
    declaration_written: bool,
    doctype_written: bool,
    in_cdata: bool,
    wrote_top_level: bool,
}

impl XmlSerializer {
    pub fn new(spec: OutputSpecification, out: Box<dyn CharacterSink>) -> Self {
        Self {
            spec,
            out,
            pending: None,
            open: Vec::new(),
            namespaces: NamespaceScope::default(),
            declaration_written: false,
            doctype_written: false,
            in_cdata: false,
            wrote_top_level: false,
        }
    }

    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        self.out.write(text)
    }

    fn write_prolog(&mut self) -> Result<(), OutputError> {
        if self.declaration_written {
            return Ok(());
        }
        self.declaration_written = true;
        if self.spec.omit_xml_declaration {
            return Ok(());
        }
        let mut declaration = format!(
            "<?xml version=\"{}\" encoding=\"{}\"",
            self.spec.version.as_deref().unwrap_or("1.0"),
            self.spec.encoding()
        );
        if let Some(standalone) = self.spec.standalone {
            declaration.push_str(if standalone {
                " standalone=\"yes\""
            } else {
                " standalone=\"no\""
            });
        }
        declaration.push_str("?>");
        if self.spec.indent {
            declaration.push('\n');
        }
        self.write(&declaration)
    }

    fn write_doctype(&mut self, root: &str) -> Result<(), OutputError> {
        if self.doctype_written {
            return Ok(());
        }
        self.doctype_written = true;
        let Some(system) = self.spec.doctype_system.clone() else {
            return Ok(());
        };
        let doctype = match &self.spec.doctype_public {
            Some(public) => format!("<!DOCTYPE {} PUBLIC \"{}\" \"{}\">\n", root, public, system),
            None => format!("<!DOCTYPE {} SYSTEM \"{}\">\n", root, system),
        };
        self.write(&doctype)
    }

    fn close_cdata(&mut self) -> Result<(), OutputError> {
        if self.in_cdata {
            self.in_cdata = false;
            self.write("]]>")?;
        }
        Ok(())
    }

    fn indent(&mut self) -> Result<(), OutputError> {
        if !self.spec.indent {
            return Ok(());
        }
        let mixed = self.open.last().is_some_and(|parent| parent.has_text);
        if mixed || (self.open.is_empty() && !self.wrote_top_level) {
            return Ok(());
        }
        let indentation = format!("\n{}", "  ".repeat(self.open.len()));
        self.write(&indentation)
    }

    /// Writes `<name decls attrs` for the pending start tag, leaving it open.
    fn write_start_tag(&mut self, pending: PendingStart) -> Result<String, OutputError> {
        let tag = self.namespaces.open(pending)?;
        let mut text = format!("<{}", tag.lexical);
        for (prefix, uri) in &tag.declarations {
            match prefix {
                Some(p) => text.push_str(&format!(" xmlns:{}=\"{}\"", p, escape_attribute(uri))),
                None => text.push_str(&format!(" xmlns=\"{}\"", escape_attribute(uri))),
            }
        }
        for (attr_lexical, value) in &tag.attributes {
            text.push_str(&format!(" {}=\"{}\"", attr_lexical, escape_attribute(value)));
        }
        self.write(&text)?;

        let lexical = tag.lexical;
        let name = tag.name;
        let pushed = tag.declarations.len();
        let cdata = self.spec.is_cdata_section_element(&name);
        self.open.try_reserve(1)?;
        self.open.push(OpenElement {
            lexical: lexical.clone(),
            bindings: pushed,
            cdata,
            has_element_children: false,
            has_text: false,
        });
        Ok(lexical)
    }

    fn flush_start(&mut self) -> Result<(), OutputError> {
        if let Some(pending) = self.pending.take() {
            self.write_start_tag(pending)?;
            self.write(">")?;
        }
        Ok(())
    }

    fn pop_element(&mut self) -> Option<OpenElement> {
        let element = self.open.pop()?;
        self.namespaces.pop(element.bindings);
        Some(element)
    }

    /// Common preamble for every non-attribute event.
    fn before_content(&mut self) -> Result<(), OutputError> {
        self.flush_start()?;
        self.close_cdata()?;
        self.write_prolog()
    }
}

impl OutputSink for XmlSerializer {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        let lexical = name.lexical();
        if !is_valid_qname(&lexical) {
            return Err(OutputError::malformed(format!(
                "'{}' is not a valid element name",
                lexical
            )));
        }
        self.before_content()?;
        if self.open.is_empty() {
            self.write_doctype(&lexical)?;
        }
        self.indent()?;
        if let Some(parent) = self.open.last_mut() {
            parent.has_element_children = true;
        }
        self.wrote_top_level = true;
        self.pending = Some(PendingStart::new(name));
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(OutputError::malformed(format!(
                "attribute '{}' outside of a start tag",
                name
            )));
        };
        pending.add_attribute(name, value)
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_start()?;
        self.write_prolog()?;
        let cdata = match self.open.last_mut() {
            Some(parent) => {
                parent.has_text = true;
                parent.cdata
            }
            None => false,
        };
        if cdata && !disable_output_escaping {
            if !self.in_cdata {
                self.in_cdata = true;
                self.write("<![CDATA[")?;
            }
            return self.write(&text.replace("]]>", "]]]]><![CDATA[>"));
        }
        self.close_cdata()?;
        if disable_output_escaping {
            self.write(text)
        } else {
            let escaped = partial_escape(text);
            self.write(&escaped)
        }
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.before_content()?;
        self.indent()?;
        self.wrote_top_level = true;
        self.write(&format!("<!--{}-->", sanitize_comment(text)))
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        check_pi_target(target)?;
        self.before_content()?;
        self.indent()?;
        self.wrote_top_level = true;
        let data = data.replace("?>", "? >");
        if data.is_empty() {
            self.write(&format!("<?{}?>", target))
        } else {
            self.write(&format!("<?{} {}?>", target, data))
        }
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        if let Some(pending) = self.pending.take() {
            let lexical = self.write_start_tag(pending)?;
            if self.spec.expand_empty_elements {
                self.write(&format!("></{}>", lexical))?;
            } else {
                self.write("/>")?;
            }
            self.pop_element();
            return Ok(());
        }
        self.close_cdata()?;
        let Some(element) = self.pop_element() else {
            return Err(OutputError::malformed(format!(
                "end of element '{}' without a matching start",
                name
            )));
        };
        if self.spec.indent && element.has_element_children && !element.has_text {
            let indentation = format!("\n{}", "  ".repeat(self.open.len()));
            self.write(&indentation)?;
        }
        self.write(&format!("</{}>", element.lexical))
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.flush_start()?;
        self.close_cdata()?;
        if !self.open.is_empty() {
            return Err(OutputError::malformed(format!(
                "{} element(s) still open at end of output",
                self.open.len()
            )));
        }
        if self.spec.indent && self.wrote_top_level {
            self.write("\n")?;
        }
        self.out.end()
    }
}
