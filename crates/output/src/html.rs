//! The HTML source serializer.

use crate::error::OutputError;
use crate::sink::OutputSink;
use crate::spec::OutputSpecification;
use crate::writer::CharacterSink;
use crate::xml::{check_pi_target, escape_attribute, sanitize_comment};
use xsltvm_types::{QualifiedName, is_valid_qname};

const VOID_ELEMENTS: &[&str] = &[
    "AREA", "BASE", "BASEFONT", "BR", "COL", "FRAME", "HR", "IMG", "INPUT", "ISINDEX", "LINK",
    "META", "PARAM",
];

/// Minimizable attributes and the elements they are boolean on.
const BOOLEAN_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("CHECKED", &["INPUT"]),
    ("COMPACT", &["DIR", "DL", "MENU", "OL", "UL"]),
    ("DECLARE", &["OBJECT"]),
    ("DEFER", &["SCRIPT"]),
    ("DISABLED", &["BUTTON", "INPUT", "OPTGROUP", "OPTION", "SELECT", "TEXTAREA"]),
    ("ISMAP", &["IMG", "INPUT"]),
    ("MULTIPLE", &["SELECT"]),
    ("NOHREF", &["AREA"]),
    ("NORESIZE", &["FRAME"]),
    ("NOSHADE", &["HR"]),
    ("NOWRAP", &["TD", "TH"]),
    ("READONLY", &["INPUT", "TEXTAREA"]),
    ("SELECTED", &["OPTION"]),
];

const URI_ATTRIBUTES: &[&str] = &[
    "ACTION", "ARCHIVE", "BACKGROUND", "CITE", "CLASSID", "CODEBASE", "DATA", "FOR", "HREF",
    "LONGDESC", "PROFILE", "SRC", "USEMAP",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["SCRIPT", "STYLE"];

fn canonical(name: &QualifiedName) -> String {
    if name.uri().is_none() {
        name.local_name.to_ascii_uppercase()
    } else {
        name.lexical()
    }
}

fn is_boolean_attribute(element: &str, attribute: &str) -> bool {
    BOOLEAN_ATTRIBUTES
        .iter()
        .any(|(attr, elements)| *attr == attribute && elements.contains(&element))
}

/// Percent-escapes non-ASCII bytes, leaving everything else untouched.
fn escape_uri(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut bytes = [0u8; 4];
            for byte in c.encode_utf8(&mut bytes).bytes() {
                escaped.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    escaped
}

/// HTML attribute escaping: `&{` stays literal and `<` is not escaped.
fn escape_html_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' if chars.peek() == Some(&'{') => escaped.push('&'),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_html_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug)]
struct OpenElement {
    name: String,
    html: bool,
}

/// Serializes sink calls as HTML.
///
/// Elements and attributes without a namespace are folded to upper case;
/// namespaced names are written as in XML.
pub struct HtmlSerializer {
    spec: OutputSpecification,
    out: Box<dyn CharacterSink>,
    open: Vec<OpenElement>,
    tag_open: bool,
    doctype_written: bool,
}

impl HtmlSerializer {
    pub fn new(spec: OutputSpecification, out: Box<dyn CharacterSink>) -> Self {
        Self {
            spec,
            out,
            open: Vec::new(),
            tag_open: false,
            doctype_written: false,
        }
    }

    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        self.out.write(text)
    }

    fn close_start_tag(&mut self) -> Result<(), OutputError> {
        if self.tag_open {
            self.tag_open = false;
            self.write(">")?;
        }
        Ok(())
    }

    fn write_doctype(&mut self) -> Result<(), OutputError> {
        if self.doctype_written {
            return Ok(());
        }
        self.doctype_written = true;
        let doctype = match (&self.spec.doctype_public, &self.spec.doctype_system) {
            (Some(public), Some(system)) => {
                format!("<!DOCTYPE HTML PUBLIC \"{}\" \"{}\">\n", public, system)
            }
            (Some(public), None) => format!("<!DOCTYPE HTML PUBLIC \"{}\">\n", public),
            (None, Some(system)) => format!("<!DOCTYPE HTML SYSTEM \"{}\">\n", system),
            (None, None) => return Ok(()),
        };
        self.write(&doctype)
    }

    fn in_raw_text(&self) -> bool {
        self.open
            .last()
            .is_some_and(|element| element.html && RAW_TEXT_ELEMENTS.contains(&element.name.as_str()))
    }
}

impl OutputSink for HtmlSerializer {
    fn start_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        if !is_valid_qname(&name.lexical()) {
            return Err(OutputError::malformed(format!(
                "'{}' is not a valid element name",
                name
            )));
        }
        self.close_start_tag()?;
        if self.open.is_empty() {
            self.write_doctype()?;
        }
        let canonical_name = canonical(name);
        self.write(&format!("<{}", canonical_name))?;
        self.open.try_reserve(1)?;
        self.open.push(OpenElement {
            name: canonical_name,
            html: name.uri().is_none(),
        });
        self.tag_open = true;
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> Result<(), OutputError> {
        if !self.tag_open {
            return Err(OutputError::malformed(format!(
                "attribute '{}' outside of a start tag",
                name
            )));
        }
        let Some(element) = self.open.last() else {
            return Err(OutputError::malformed("attribute without an element"));
        };
        if !element.html || name.uri().is_some() {
            let attribute = format!(" {}=\"{}\"", name.lexical(), escape_attribute(value));
            return self.write(&attribute);
        }
        let attr_name = canonical(name);
        let attribute = if is_boolean_attribute(&element.name, &attr_name)
            && value.eq_ignore_ascii_case(&attr_name)
        {
            format!(" {}", attr_name)
        } else if URI_ATTRIBUTES.contains(&attr_name.as_str()) {
            format!(" {}=\"{}\"", attr_name, escape_html_attribute(&escape_uri(value)))
        } else {
            format!(" {}=\"{}\"", attr_name, escape_html_attribute(value))
        };
        self.write(&attribute)
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> Result<(), OutputError> {
        if text.is_empty() {
            return Ok(());
        }
        self.close_start_tag()?;
        if disable_output_escaping || self.in_raw_text() {
            self.write(text)
        } else {
            let escaped = escape_html_text(text);
            self.write(&escaped)
        }
    }

    fn add_comment(&mut self, text: &str) -> Result<(), OutputError> {
        self.close_start_tag()?;
        self.write(&format!("<!--{}-->", sanitize_comment(text)))
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> Result<(), OutputError> {
        check_pi_target(target)?;
        self.close_start_tag()?;
        if data.is_empty() {
            self.write(&format!("<?{}>", target))
        } else {
            self.write(&format!("<?{} {}>", target, data.replace('>', "&gt;")))
        }
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), OutputError> {
        let Some(element) = self.open.pop() else {
            return Err(OutputError::malformed(format!(
                "end of element '{}' without a matching start",
                name
            )));
        };
        if self.tag_open {
            self.tag_open = false;
            self.write(">")?;
            if element.html && VOID_ELEMENTS.contains(&element.name.as_str()) {
                return Ok(());
            }
        } else if element.html && VOID_ELEMENTS.contains(&element.name.as_str()) {
            log::warn!("Void element '{}' had content; writing an end tag", element.name);
        }
        self.write(&format!("</{}>", element.name))
    }

    fn end_output(&mut self) -> Result<(), OutputError> {
        self.close_start_tag()?;
        if !self.open.is_empty() {
            return Err(OutputError::malformed(format!(
                "{} element(s) still open at end of output",
                self.open.len()
            )));
        }
        self.out.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedBuffer;

    fn serializer(spec: OutputSpecification) -> (HtmlSerializer, SharedBuffer) {
        let buffer = SharedBuffer::new();
        (HtmlSerializer::new(spec, Box::new(buffer.clone())), buffer)
    }

    #[test]
    fn img_is_void_and_upper_cased() {
        let (mut html, out) = serializer(OutputSpecification::default());
        let img = QualifiedName::new("img");
        html.start_element(&img).unwrap();
        html.add_attribute(&QualifiedName::new("src"), "a.png").unwrap();
        html.end_element(&img).unwrap();
        html.end_output().unwrap();
        assert_eq!(out.contents(), r#"<IMG SRC="a.png">"#);
    }

    #[test]
    fn uri_attributes_escape_only_non_ascii() {
        let (mut html, out) = serializer(OutputSpecification::default());
        let a = QualifiedName::new("a");
        html.start_element(&a).unwrap();
        html.add_attribute(&QualifiedName::new("href"), "/caf\u{e9}?a=1&b=<2>")
            .unwrap();
        html.add_attribute(&QualifiedName::new("title"), "x &{y} \"z\"")
            .unwrap();
        html.add_text("go", false).unwrap();
        html.end_element(&a).unwrap();
        html.end_output().unwrap();
        assert_eq!(
            out.contents(),
            r#"<A HREF="/caf%C3%A9?a=1&amp;b=<2>" TITLE="x &{y} &quot;z&quot;">go</A>"#
        );
    }

    #[test]
    fn boolean_attributes_are_minimized() {
        let (mut html, out) = serializer(OutputSpecification::default());
        let option = QualifiedName::new("option");
        html.start_element(&option).unwrap();
        html.add_attribute(&QualifiedName::new("selected"), "selected")
            .unwrap();
        html.add_attribute(&QualifiedName::new("value"), "v").unwrap();
        html.end_element(&option).unwrap();
        html.end_output().unwrap();
        assert_eq!(out.contents(), r#"<OPTION SELECTED VALUE="v"></OPTION>"#);
    }

    #[test]
    fn script_content_is_raw() {
        let (mut html, out) = serializer(OutputSpecification::default());
        let script = QualifiedName::new("script");
        let p = QualifiedName::new("p");
        html.start_element(&script).unwrap();
        html.add_text("if (a < b && c) {}", false).unwrap();
        html.end_element(&script).unwrap();
        html.start_element(&p).unwrap();
        html.add_text("a < b", false).unwrap();
        html.end_element(&p).unwrap();
        html.end_output().unwrap();
        assert_eq!(
            out.contents(),
            "<SCRIPT>if (a < b && c) {}</SCRIPT><P>a &lt; b</P>"
        );
    }

    #[test]
    fn doctype_and_processing_instructions() {
        let spec = OutputSpecification {
            doctype_public: Some("-//W3C//DTD HTML 4.01//EN".into()),
            ..Default::default()
        };
        let (mut html, out) = serializer(spec);
        let root = QualifiedName::new("html");
        html.start_element(&root).unwrap();
        html.add_processing_instruction("php", "echo 1").unwrap();
        html.end_element(&root).unwrap();
        html.end_output().unwrap();
        assert_eq!(
            out.contents(),
            "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\">\n<HTML><?php echo 1></HTML>"
        );
    }

    #[test]
    fn namespaced_elements_keep_their_case() {
        let (mut html, out) = serializer(OutputSpecification::default());
        let svg = QualifiedName::with_namespace(
            Some("s".into()),
            "svg",
            Some("http://www.w3.org/2000/svg".into()),
        );
        html.start_element(&svg).unwrap();
        html.end_element(&svg).unwrap();
        html.end_output().unwrap();
        assert_eq!(out.contents(), "<s:svg></s:svg>");
    }
}
