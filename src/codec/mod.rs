//! XML stream codec.
//!
//! The handshake only needs a small slice of XML: namespaced elements,
//! attributes and character data. This module provides exactly that:
//!
//! - [`Element`]: owned element tree with an escaping serializer
//! - [`XmlReader`]: incremental reader that turns the never-closing stream
//!   document into [`Frame`]s
//!
//! Parsing is delegated to `quick-xml`; everything written to the wire goes
//! through [`Element::to_xml`] so user-supplied text is always escaped.

mod element;
mod reader;

pub use element::{Element, Node};
pub use reader::{Frame, XmlReader};

/// Escape a string for use as attribute value or character data.
pub fn escape(raw: &str) -> String {
    quick_xml::escape::escape(raw).into_owned()
}
