//! Stanza envelopes and correlation cookies.

use std::fmt;
use std::str::FromStr;

use super::{NS_CLIENT, NS_STANZAS};
use crate::codec::Element;
use crate::error::{Result, XmppError};

/// IQ stanza type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information
    Get,
    /// Request to change state
    Set,
    /// Successful response
    Result,
    /// Error response
    Error,
}

impl IqType {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    /// Whether this type answers a request.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Result | Self::Error)
    }
}

impl fmt::Display for IqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IqType {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "result" => Ok(Self::Result),
            "error" => Ok(Self::Error),
            _ => Err(XmppError::Xml(format!("unknown iq type {s:?}"))),
        }
    }
}

/// `<error/>` child of an error stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StanzaError {
    /// Legacy numeric code (`code` attribute)
    pub code: Option<String>,
    /// Error type (`cancel`, `modify`, ...)
    pub kind: Option<String>,
    /// Defined condition element name (`conflict`, `not-acceptable`, ...)
    pub condition: Option<String>,
    /// Human-readable text
    pub text: Option<String>,
}

impl StanzaError {
    fn from_element(el: &Element) -> Self {
        let condition = el
            .children()
            .find(|c| c.namespace() == Some(NS_STANZAS) && c.name() != "text")
            .map(|c| c.name().to_string());
        let text = el
            .child("text", NS_STANZAS)
            .map(Element::text)
            .filter(|t| !t.is_empty());
        Self {
            code: el.attr("code").map(str::to_string),
            kind: el.attr("type").map(str::to_string),
            condition,
            text,
        }
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let condition = self.condition.as_deref().unwrap_or("undefined-condition");
        match (&self.code, &self.text) {
            (Some(code), Some(text)) => write!(f, "{condition} ({code}): {text}"),
            (Some(code), None) => write!(f, "{condition} ({code})"),
            (None, Some(text)) => write!(f, "{condition}: {text}"),
            (None, None) => f.write_str(condition),
        }
    }
}

/// Info/query stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iq {
    /// Correlation id
    pub id: String,
    /// Stanza type
    pub kind: IqType,
    /// Recipient (omitted when `None`)
    pub to: Option<String>,
    /// Sender
    pub from: Option<String>,
    /// First non-error child
    pub payload: Option<Element>,
    /// Error child on `error` stanzas
    pub error: Option<StanzaError>,
}

impl Iq {
    /// Create an IQ with no addressing and no payload.
    pub fn new(kind: IqType, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            to: None,
            from: None,
            payload: None,
            error: None,
        }
    }

    /// Set the recipient; an empty target leaves it unset.
    pub fn with_to(mut self, to: &str) -> Self {
        self.to = (!to.is_empty()).then(|| to.to_string());
        self
    }

    /// Set the sender.
    pub fn with_from(mut self, from: &str) -> Self {
        self.from = (!from.is_empty()).then(|| from.to_string());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Element) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode an `<iq/>` element.
    pub fn from_element(el: &Element) -> Result<Self> {
        if !el.is("iq", NS_CLIENT) {
            return Err(XmppError::Xml(format!("expected <iq>, got <{}>", el.name())));
        }
        let kind: IqType = el
            .attr("type")
            .ok_or_else(|| XmppError::Xml("iq without type".to_string()))?
            .parse()?;

        let error = el.child("error", NS_CLIENT).map(StanzaError::from_element);
        let payload = el.children().find(|c| !c.is("error", NS_CLIENT)).cloned();

        Ok(Self {
            id: el.attr("id").unwrap_or_default().to_string(),
            kind,
            to: el.attr("to").map(str::to_string),
            from: el.attr("from").map(str::to_string),
            payload,
            error,
        })
    }

    /// Encode as an `<iq/>` element.
    pub fn to_element(&self) -> Element {
        let mut el = Element::ns("iq", NS_CLIENT);
        if let Some(to) = &self.to {
            el.set_attr("to", to.as_str());
        }
        if let Some(from) = &self.from {
            el.set_attr("from", from.as_str());
        }
        el.set_attr("type", self.kind.as_str());
        el.set_attr("id", self.id.as_str());
        match &self.payload {
            Some(payload) => el.with_child(payload.clone()),
            None => el,
        }
    }

    /// Serialize for the wire. The stream's default namespace is implied.
    pub fn to_xml(&self) -> String {
        strip_client_ns(self.to_element().to_xml())
    }
}

/// Drop the redundant top-level `xmlns="jabber:client"`.
fn strip_client_ns(xml: String) -> String {
    let declared = format!(" xmlns=\"{NS_CLIENT}\"");
    xml.replacen(&declared, "", 1)
}

/// Any top-level stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    /// Decoded IQ
    Iq(Iq),
    /// Message, presence or anything else, undecoded
    Other(Element),
}

impl Stanza {
    /// Classify a top-level element.
    pub fn from_element(el: Element) -> Self {
        if el.is("iq", NS_CLIENT) {
            if let Ok(iq) = Iq::from_element(&el) {
                return Self::Iq(iq);
            }
        }
        Self::Other(el)
    }

    /// The IQ, if this is one.
    pub fn as_iq(&self) -> Option<&Iq> {
        match self {
            Self::Iq(iq) => Some(iq),
            Self::Other(_) => None,
        }
    }
}

/// Opaque value correlating a request with its asynchronous reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(u64);

impl Cookie {
    /// Fresh random cookie.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().as_u64_pair().0)
    }

    /// Stanza id carrying this cookie.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iq_roundtrip_fields() {
        let el = Element::ns("iq", NS_CLIENT)
            .with_attr("type", "result")
            .with_attr("id", "bind_1")
            .with_attr("from", "example.com")
            .with_child(Element::ns("bind", "urn:ietf:params:xml:ns:xmpp-bind"));
        let iq = Iq::from_element(&el).unwrap();
        assert_eq!(iq.kind, IqType::Result);
        assert_eq!(iq.id, "bind_1");
        assert_eq!(iq.from.as_deref(), Some("example.com"));
        assert_eq!(iq.payload.unwrap().name(), "bind");
        assert!(iq.error.is_none());
    }

    #[test]
    fn test_iq_error_code() {
        let el = Element::ns("iq", NS_CLIENT)
            .with_attr("type", "error")
            .with_attr("id", "create_2")
            .with_child(
                Element::ns("error", NS_CLIENT)
                    .with_attr("code", "409")
                    .with_attr("type", "cancel")
                    .with_child(Element::ns("conflict", NS_STANZAS)),
            );
        let iq = Iq::from_element(&el).unwrap();
        let error = iq.error.unwrap();
        assert_eq!(error.code.as_deref(), Some("409"));
        assert_eq!(error.condition.as_deref(), Some("conflict"));
        assert!(iq.payload.is_none());
    }

    #[test]
    fn test_iq_requires_type() {
        let el = Element::ns("iq", NS_CLIENT).with_attr("id", "x");
        assert!(Iq::from_element(&el).is_err());
        let el = Element::ns("iq", NS_CLIENT).with_attr("type", "bogus");
        assert!(Iq::from_element(&el).is_err());
    }

    #[test]
    fn test_empty_target_omitted() {
        let iq = Iq::new(IqType::Set, "c1").with_to("");
        assert_eq!(iq.to_xml(), r#"<iq type="set" id="c1"/>"#);
    }

    #[test]
    fn test_to_xml_keeps_payload_namespace() {
        let iq = Iq::new(IqType::Get, "p1")
            .with_to("example.com")
            .with_payload(Element::ns("ping", "urn:xmpp:ping"));
        assert_eq!(
            iq.to_xml(),
            r#"<iq to="example.com" type="get" id="p1"><ping xmlns="urn:xmpp:ping"/></iq>"#
        );
    }

    #[test]
    fn test_cookie_ids_differ() {
        let a = Cookie::random();
        let b = Cookie::random();
        assert_ne!(a, b);
        assert_eq!(a.id(), a.to_string());
    }

    #[test]
    fn test_stanza_classification() {
        let msg = Element::ns("message", NS_CLIENT);
        assert!(Stanza::from_element(msg).as_iq().is_none());
    }
}
