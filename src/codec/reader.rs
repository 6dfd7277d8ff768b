//! Incremental XML stream reader.
//!
//! An XMPP stream is one long-lived document: the `<stream:stream>` root
//! stays open for the lifetime of the connection and each top-level child
//! is a stanza or a negotiation element. [`XmlReader`] turns that document
//! into a sequence of [`Frame`]s, building an [`Element`] tree for every
//! depth-1 child and resolving namespace prefixes as it goes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::io::AsyncBufRead;

use super::element::{Element, Node};
use crate::error::{Result, XmppError};

/// Namespace bound to the reserved `xml` prefix.
const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

/// Unit read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The peer opened a stream; carries the header attributes.
    StreamOpen(Element),
    /// A complete top-level element.
    Element(Element),
    /// The peer closed the stream (`</stream:stream>`).
    StreamClose,
}

type Decls = Vec<(String, String)>;

/// Start tag copied out of the parser buffer.
struct RawTag {
    qname: String,
    attrs: Vec<(String, String)>,
}

impl RawTag {
    fn read(start: &BytesStart<'_>) -> Result<Self> {
        let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self { qname, attrs })
    }

    fn split_name(&self) -> (Option<&str>, &str) {
        match self.qname.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, self.qname.as_str()),
        }
    }
}

enum Raw {
    Start(RawTag),
    Empty(RawTag),
    End,
    Text(String),
}

/// Streaming reader producing [`Frame`]s from an async byte source.
pub struct XmlReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    stack: Vec<(Element, Decls)>,
    stream_scope: Decls,
}

impl<R: AsyncBufRead + Unpin> XmlReader<R> {
    /// Wrap a buffered byte source.
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(4096),
            stack: Vec::new(),
            stream_scope: Vec::new(),
        }
    }

    /// Discard parser state for a stream restart, keeping buffered bytes.
    pub fn restart(self) -> Self {
        Self::new(self.reader.into_inner())
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Read until the next complete frame.
    ///
    /// End of input is reported as [`XmppError::SessionClosed`].
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            self.buf.clear();
            let raw = match self.reader.read_event_into_async(&mut self.buf).await? {
                Event::Start(e) => Raw::Start(RawTag::read(&e)?),
                Event::Empty(e) => Raw::Empty(RawTag::read(&e)?),
                Event::End(_) => Raw::End,
                Event::Text(t) => Raw::Text(t.unescape()?.into_owned()),
                Event::CData(c) => {
                    Raw::Text(String::from_utf8_lossy(&c.into_inner()).into_owned())
                },
                Event::Eof => return Err(XmppError::SessionClosed),
                // Declarations, comments and processing instructions carry nothing for us
                _ => continue,
            };

            match raw {
                Raw::Start(tag) => {
                    if self.stack.is_empty() && tag.split_name().1 == "stream" {
                        let (header, decls) = self.build(&tag);
                        self.stream_scope = decls;
                        return Ok(Frame::StreamOpen(header));
                    }
                    let (el, decls) = self.build(&tag);
                    self.stack.push((el, decls));
                },
                Raw::Empty(tag) => {
                    let (el, _) = self.build(&tag);
                    if let Some(done) = self.attach(el) {
                        return Ok(Frame::Element(done));
                    }
                },
                Raw::End => match self.stack.pop() {
                    None => return Ok(Frame::StreamClose),
                    Some((el, _)) => {
                        if let Some(done) = self.attach(el) {
                            return Ok(Frame::Element(done));
                        }
                    },
                },
                Raw::Text(text) => {
                    if let Some((top, _)) = self.stack.last_mut() {
                        top.push(Node::Text(text));
                    }
                },
            }
        }
    }

    /// Read the next top-level element, failing on stream boundaries.
    pub async fn next_element(&mut self) -> Result<Element> {
        match self.next_frame().await? {
            Frame::Element(el) => Ok(el),
            Frame::StreamOpen(_) => Err(XmppError::Xml("unexpected stream header".to_string())),
            Frame::StreamClose => Err(XmppError::SessionClosed),
        }
    }

    fn attach(&mut self, el: Element) -> Option<Element> {
        match self.stack.last_mut() {
            Some((parent, _)) => {
                parent.push(Node::Element(el));
                None
            },
            None => Some(el),
        }
    }

    fn build(&self, tag: &RawTag) -> (Element, Decls) {
        let mut decls = Vec::new();
        let mut attrs = Vec::new();
        for (key, value) in &tag.attrs {
            if key == "xmlns" {
                decls.push((String::new(), value.clone()));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                decls.push((prefix.to_string(), value.clone()));
            } else {
                attrs.push((key.clone(), value.clone()));
            }
        }

        let (prefix, local) = tag.split_name();
        let mut el = Element::new(local);
        if let Some(ns) = self.resolve(prefix.unwrap_or(""), &decls) {
            el = el.with_ns(ns);
        }
        for (key, value) in attrs {
            el.set_attr(key, value);
        }
        (el, decls)
    }

    fn resolve(&self, prefix: &str, own: &Decls) -> Option<String> {
        if prefix == "xml" {
            return Some(NS_XML.to_string());
        }
        let scopes = std::iter::once(own)
            .chain(self.stack.iter().rev().map(|(_, decls)| decls))
            .chain(std::iter::once(&self.stream_scope));
        for scope in scopes {
            if let Some((_, ns)) = scope.iter().find(|(p, _)| p == prefix) {
                return Some(ns.clone());
            }
        }
        None
    }
}
