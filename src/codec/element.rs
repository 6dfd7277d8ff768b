//! Minimal XML element tree with an escaping serializer.

use std::fmt;

use quick_xml::escape::escape;

/// Child node of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element
    Element(Element),
    /// Character data (already unescaped)
    Text(String),
}

/// A namespaced XML element.
///
/// The namespace is the resolved URI, not a prefix. Serialization emits an
/// `xmlns` declaration whenever the namespace differs from the parent's.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    ns: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Create an element with no namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an element in the given namespace.
    pub fn ns(name: impl Into<String>, ns: impl Into<String>) -> Self {
        Self::new(name).with_ns(ns)
    }

    /// Set the namespace.
    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    /// Set an attribute, replacing any previous value.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Append a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Append character data.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Set an attribute in place.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    /// Append a child node in place.
    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    /// Local name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved namespace URI.
    pub fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    /// Check local name and namespace together.
    pub fn is(&self, name: &str, ns: &str) -> bool {
        self.name == name && self.ns.as_deref() == Some(ns)
    }

    /// Attribute value by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All attributes in document order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Child elements, skipping text.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First child with the given name and namespace.
    pub fn child(&self, name: &str, ns: &str) -> Option<&Element> {
        self.children().find(|c| c.is(name, ns))
    }

    /// Whether a child with the given name and namespace exists.
    pub fn has_child(&self, name: &str, ns: &str) -> bool {
        self.child(name, ns).is_some()
    }

    /// Concatenated direct character data.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Serialize to a string.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, None);
        out
    }

    fn write_into(&self, out: &mut String, parent_ns: Option<&str>) {
        out.push('<');
        out.push_str(&self.name);
        if let Some(ns) = self.ns.as_deref() {
            if parent_ns != Some(ns) {
                out.push_str(" xmlns=\"");
                out.push_str(&escape(ns));
                out.push('"');
            }
        }
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        let scope = self.ns.as_deref().or(parent_ns);
        for node in &self.children {
            match node {
                Node::Element(el) => el.write_into(out, scope),
                Node::Text(text) => out.push_str(&escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_element() {
        let el = Element::ns("bind", "urn:ietf:params:xml:ns:xmpp-bind");
        assert_eq!(
            el.to_xml(),
            r#"<bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/>"#
        );
    }

    #[test]
    fn test_inherited_namespace_not_repeated() {
        let el = Element::ns("query", "jabber:iq:register")
            .with_child(Element::ns("remove", "jabber:iq:register"));
        assert_eq!(
            el.to_xml(),
            r#"<query xmlns="jabber:iq:register"><remove/></query>"#
        );
    }

    #[test]
    fn test_text_and_attributes_are_escaped() {
        let el = Element::new("password")
            .with_attr("label", "a\"b")
            .with_text("</password><evil/>&");
        assert_eq!(
            el.to_xml(),
            r#"<password label="a&quot;b">&lt;/password&gt;&lt;evil/&gt;&amp;</password>"#
        );
    }

    #[test]
    fn test_set_attr_replaces() {
        let mut el = Element::new("iq").with_attr("id", "a");
        el.set_attr("id", "b");
        assert_eq!(el.attr("id"), Some("b"));
        assert_eq!(el.attrs().count(), 1);
    }

    #[test]
    fn test_child_lookup() {
        let el = Element::ns("features", "http://etherx.jabber.org/streams")
            .with_child(Element::ns("bind", "urn:ietf:params:xml:ns:xmpp-bind"))
            .with_text("  ");
        assert!(el.has_child("bind", "urn:ietf:params:xml:ns:xmpp-bind"));
        assert!(!el.has_child("bind", "jabber:client"));
        assert_eq!(el.children().count(), 1);
    }
}
