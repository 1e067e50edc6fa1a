//! Namespace-aware XML event stream.
//!
//! Wraps quick-xml's `NsReader` and `Writer` as a uniform sequence of owned
//! structural events. Empty elements are expanded, CDATA is surfaced as
//! characters and text is never trimmed. quick-xml does not expand external
//! entities; DOCTYPE declarations are rejected outright.

use crate::error::WssError;
use crate::ns;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use quick_xml::{NsReader, Writer};
use std::io::{BufRead, Write};

pub type Result<T> = std::result::Result<T, WssError>;

/// Namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI (None when unqualified)
    pub namespace: Option<String>,
    /// Prefix as written in the source
    pub prefix: Option<String>,
    /// Local name
    pub local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, prefix: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.map(String::from),
            prefix: prefix.map(String::from),
            local: local.to_string(),
        }
    }

    /// Unqualified name.
    pub fn local(local: &str) -> Self {
        Self::new(None, None, local)
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    /// `prefix:local` as written.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

/// Element attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// Explicit `xmlns` / `xmlns:p` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// None for the default namespace
    pub prefix: Option<String>,
    pub uri: String,
}

/// Element start with resolved attributes and its own declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
}

impl StartElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Attribute value by namespace and local name.
    pub fn attr(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local == local && a.name.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    /// Element identifier: `wsu:Id`, then `Id`, `ID`, `AssertionID`.
    pub fn id(&self) -> Option<&str> {
        self.attr(Some(ns::WSU), ns::attr::ID)
            .or_else(|| self.attr(None, ns::attr::ID))
            .or_else(|| self.attr(None, ns::attr::SAML2_ID))
            .or_else(|| self.attr(None, ns::attr::SAML1_ID))
    }

    /// SOAP `mustUnderstand` marker set to `1` or `true`.
    pub fn must_understand(&self) -> bool {
        self.attributes.iter().any(|a| {
            a.name.local == ns::attr::MUST_UNDERSTAND && (a.value == "1" || a.value == "true")
        })
    }

    pub fn push_attr(&mut self, name: QName, value: impl Into<String>) {
        self.attributes.push(Attribute {
            name,
            value: value.into(),
        });
    }

    pub fn declare(&mut self, prefix: Option<&str>, uri: &str) {
        self.namespaces.push(NamespaceDecl {
            prefix: prefix.map(String::from),
            uri: uri.to_string(),
        });
    }
}

/// Structural XML event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    Declaration {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    StartElement(StartElement),
    EndElement(QName),
    Characters(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl XmlEvent {
    pub fn as_start(&self) -> Option<&StartElement> {
        match self {
            Self::StartElement(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_start(&self, namespace: &str, local: &str) -> bool {
        matches!(self, Self::StartElement(s) if s.name.is(namespace, local))
    }

    pub fn is_end(&self, namespace: &str, local: &str) -> bool {
        matches!(self, Self::EndElement(n) if n.is(namespace, local))
    }
}

/// Forward-only event cursor over a byte source.
pub struct EventReader<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    open: Vec<QName>,
}

impl<'a> EventReader<&'a [u8]> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<R: BufRead> EventReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = NsReader::from_reader(source);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.trim_text(false);
        config.check_end_names = true;
        Self {
            reader,
            buf: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Next event, or None at end of input.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<XmlEvent>> {
        self.buf.clear();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map_err(WssError::malformed)?;

        let converted = match event {
            Event::Start(ref e) => {
                let start = convert_start(&self.reader, e)?;
                self.open.push(start.name.clone());
                XmlEvent::StartElement(start)
            }
            // Only produced when expansion is disabled
            Event::Empty(_) => {
                return Err(WssError::malformed("unexpanded empty element"));
            }
            Event::End(_) => {
                let name = self
                    .open
                    .pop()
                    .ok_or_else(|| WssError::malformed("unbalanced end element"))?;
                XmlEvent::EndElement(name)
            }
            Event::Text(ref e) => {
                XmlEvent::Characters(e.unescape().map_err(WssError::malformed)?.into_owned())
            }
            Event::CData(ref e) => XmlEvent::Characters(utf8(e)?.to_string()),
            Event::Comment(ref e) => XmlEvent::Comment(utf8(e)?.to_string()),
            Event::PI(ref e) => XmlEvent::ProcessingInstruction {
                target: utf8(e.target())?.to_string(),
                data: utf8(e.content())?.trim_start().to_string(),
            },
            Event::Decl(ref e) => convert_decl(e)?,
            Event::DocType(_) => {
                return Err(WssError::MalformedXml(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }
            Event::Eof => {
                if !self.open.is_empty() {
                    return Err(WssError::malformed("unexpected end of document"));
                }
                return Ok(None);
            }
        };
        Ok(Some(converted))
    }

    /// Depth of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(WssError::malformed)
}

fn resolved_namespace(result: ResolveResult<'_>) -> Result<Option<String>> {
    match result {
        ResolveResult::Bound(ns) => Ok(Some(utf8(ns.as_ref())?.to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(WssError::MalformedXml(format!(
            "unbound namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn convert_start<R>(reader: &NsReader<R>, e: &BytesStart<'_>) -> Result<StartElement> {
    let (resolved, local) = reader.resolve_element(e.name());
    let namespace = resolved_namespace(resolved)?;
    let prefix = e
        .name()
        .prefix()
        .map(|p| utf8(p.as_ref()).map(String::from))
        .transpose()?;
    let mut start = StartElement::new(QName {
        namespace,
        prefix,
        local: utf8(local.as_ref())?.to_string(),
    });

    for attr in e.attributes() {
        let attr = attr.map_err(WssError::malformed)?;
        let value = attr
            .unescape_value()
            .map_err(WssError::malformed)?
            .into_owned();

        match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Default) => {
                start.namespaces.push(NamespaceDecl {
                    prefix: None,
                    uri: value,
                });
            }
            Some(PrefixDeclaration::Named(p)) => {
                start.namespaces.push(NamespaceDecl {
                    prefix: Some(utf8(p)?.to_string()),
                    uri: value,
                });
            }
            None => {
                let (resolved, local) = reader.resolve_attribute(attr.key);
                let prefix = attr
                    .key
                    .prefix()
                    .map(|p| utf8(p.as_ref()).map(String::from))
                    .transpose()?;
                start.attributes.push(Attribute {
                    name: QName {
                        namespace: resolved_namespace(resolved)?,
                        prefix,
                        local: utf8(local.as_ref())?.to_string(),
                    },
                    value,
                });
            }
        }
    }
    Ok(start)
}

fn convert_decl(e: &BytesDecl<'_>) -> Result<XmlEvent> {
    let version = e.version().map_err(WssError::malformed)?;
    let encoding = match e.encoding() {
        Some(enc) => Some(utf8(&enc.map_err(WssError::malformed)?)?.to_string()),
        None => None,
    };
    let standalone = match e.standalone() {
        Some(sa) => Some(utf8(&sa.map_err(WssError::malformed)?)?.to_string()),
        None => None,
    };
    Ok(XmlEvent::Declaration {
        version: utf8(&version)?.to_string(),
        encoding,
        standalone,
    })
}

/// Parse a fragment (e.g. decrypted content) into events.
///
/// `in_scope` supplies the namespace bindings of the position the fragment
/// is substituted at; they are not repeated on the returned events.
pub fn parse_fragment(bytes: &[u8], in_scope: &[NamespaceDecl]) -> Result<Vec<XmlEvent>> {
    const WRAPPER: &str = "wss-fragment";

    let mut wrapped = Vec::with_capacity(bytes.len() + 64);
    wrapped.extend_from_slice(b"<");
    wrapped.extend_from_slice(WRAPPER.as_bytes());
    for decl in in_scope {
        let value = quick_xml::escape::escape(decl.uri.as_str());
        match &decl.prefix {
            Some(p) => wrapped.extend_from_slice(format!(" xmlns:{}=\"{}\"", p, value).as_bytes()),
            None => wrapped.extend_from_slice(format!(" xmlns=\"{}\"", value).as_bytes()),
        }
    }
    wrapped.extend_from_slice(b">");
    wrapped.extend_from_slice(bytes);
    wrapped.extend_from_slice(format!("</{}>", WRAPPER).as_bytes());

    let mut reader = EventReader::from_bytes(&wrapped);
    let mut events = Vec::new();
    while let Some(event) = reader.next()? {
        events.push(event);
    }

    // Strip the wrapper start and end
    match (events.first(), events.last()) {
        (Some(XmlEvent::StartElement(s)), Some(XmlEvent::EndElement(e)))
            if s.name.local == WRAPPER && e.local == WRAPPER && events.len() >= 2 =>
        {
            events.pop();
            events.remove(0);
            Ok(events)
        }
        _ => Err(WssError::malformed("fragment is not well-formed")),
    }
}

/// Read a whole document into memory as events.
pub fn read_events(bytes: &[u8]) -> Result<Vec<XmlEvent>> {
    let mut reader = EventReader::from_bytes(bytes);
    let mut events = Vec::new();
    while let Some(event) = reader.next()? {
        events.push(event);
    }
    Ok(events)
}

/// Event serializer.
pub struct EventWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
        }
    }

    pub fn write(&mut self, event: &XmlEvent) -> Result<()> {
        let result = match event {
            XmlEvent::Declaration {
                version,
                encoding,
                standalone,
            } => self.writer.write_event(Event::Decl(BytesDecl::new(
                version,
                encoding.as_deref(),
                standalone.as_deref(),
            ))),
            XmlEvent::StartElement(start) => {
                let name = start.name.qualified();
                let mut elem = BytesStart::new(name.as_str());
                for decl in &start.namespaces {
                    let key = match &decl.prefix {
                        Some(p) => format!("xmlns:{}", p),
                        None => "xmlns".to_string(),
                    };
                    elem.push_attribute((key.as_str(), decl.uri.as_str()));
                }
                for attr in &start.attributes {
                    let key = attr.name.qualified();
                    elem.push_attribute((key.as_str(), attr.value.as_str()));
                }
                self.writer.write_event(Event::Start(elem))
            }
            XmlEvent::EndElement(name) => {
                let name = name.qualified();
                self.writer
                    .write_event(Event::End(BytesEnd::new(name.as_str())))
            }
            XmlEvent::Characters(text) => self
                .writer
                .write_event(Event::Text(BytesText::new(text.as_str()))),
            XmlEvent::Comment(text) => self
                .writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str()))),
            XmlEvent::ProcessingInstruction { target, data } => {
                let content = if data.is_empty() {
                    target.clone()
                } else {
                    format!("{} {}", target, data)
                };
                self.writer
                    .write_event(Event::PI(BytesPI::new(content.as_str())))
            }
        };
        result.map_err(WssError::write_failed)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.get_mut().flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Serialize a sequence of events to bytes.
pub fn write_events(events: &[XmlEvent]) -> Result<Vec<u8>> {
    let mut writer = EventWriter::new(Vec::new());
    for event in events {
        writer.write(event)?;
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetPrice xmlns:m="http://example.org/stock"><m:Item/><![CDATA[a<b]]></m:GetPrice>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_read_namespaced_events() {
        let events = read_events(SOAP_SAMPLE.as_bytes()).unwrap();
        assert!(matches!(events[0], XmlEvent::Declaration { .. }));
        assert!(events[1].is_start(ns::SOAP_11, "Envelope"));

        let item_start = events
            .iter()
            .position(|e| e.is_start("http://example.org/stock", "Item"))
            .unwrap();
        // Empty element expanded
        assert!(events[item_start + 1].is_end("http://example.org/stock", "Item"));
        // CDATA surfaced as characters
        assert_eq!(
            events[item_start + 2],
            XmlEvent::Characters("a<b".to_string())
        );
    }

    #[test]
    fn test_whitespace_preserved() {
        let events = read_events(SOAP_SAMPLE.as_bytes()).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, XmlEvent::Characters(t) if t == "\n  ")));
    }

    #[test]
    fn test_doctype_rejected() {
        let xxe = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"/>"#;
        let result = read_events(xxe.as_bytes());
        assert!(matches!(result, Err(WssError::MalformedXml(_))));
    }

    #[test]
    fn test_unbound_prefix_rejected() {
        let result = read_events(b"<a:root/>");
        assert!(matches!(result, Err(WssError::MalformedXml(_))));
    }

    #[test]
    fn test_mismatched_end_rejected() {
        let result = read_events(b"<root><a></b></root>");
        assert!(matches!(result, Err(WssError::MalformedXml(_))));
    }

    #[test]
    fn test_id_attributes() {
        let xml = format!(
            r#"<root xmlns:wsu="{}"><a wsu:Id="one"/><b Id="two"/><c ID="three"/><d AssertionID="four"/></root>"#,
            ns::WSU
        );
        let events = read_events(xml.as_bytes()).unwrap();
        let ids: Vec<_> = events
            .iter()
            .filter_map(|e| e.as_start().and_then(|s| s.id()))
            .collect();
        assert_eq!(ids, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_fragment_uses_scope() {
        let scope = vec![NamespaceDecl {
            prefix: Some("m".to_string()),
            uri: "urn:m".to_string(),
        }];
        let events = parse_fragment(b"<m:a>x</m:a>text", &scope).unwrap();
        assert_eq!(events.len(), 4);
        assert!(events[0].is_start("urn:m", "a"));
        assert_eq!(events[3], XmlEvent::Characters("text".to_string()));
    }

    #[test]
    fn test_write_read_preserves_structure() {
        let events = read_events(SOAP_SAMPLE.as_bytes()).unwrap();
        let bytes = write_events(&events).unwrap();
        let again = read_events(&bytes).unwrap();
        assert_eq!(events, again);
    }
}
