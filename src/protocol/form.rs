//! Data forms (XEP-0004) with media (XEP-0221) and binary data (XEP-0231).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::{NS_BOB, NS_DATA_FORMS, NS_MEDIA};
use crate::codec::Element;
use crate::error::{Result, XmppError};

/// Form field option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormOption {
    /// Display label
    pub label: Option<String>,
    /// Submitted value
    pub value: String,
}

/// Media URI attached to a field, e.g. a CAPTCHA image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaUri {
    /// MIME type
    pub mime_type: Option<String>,
    /// `cid:` or `http(s):` URI
    pub uri: String,
}

/// One form field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormField {
    /// Variable name (absent on `fixed` fields)
    pub var: Option<String>,
    /// Field type (`text-single`, `list-single`, ...)
    pub kind: Option<String>,
    /// Display label
    pub label: Option<String>,
    /// Description
    pub desc: Option<String>,
    /// Marked `<required/>`
    pub required: bool,
    /// Current values
    pub values: Vec<String>,
    /// Choices for list fields
    pub options: Vec<FormOption>,
    /// Attached media
    pub media: Vec<MediaUri>,
}

impl FormField {
    /// Replace all values with one.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.values = vec![value.into()];
    }

    /// First value.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    fn from_element(el: &Element) -> Self {
        Self {
            var: el.attr("var").map(str::to_string),
            kind: el.attr("type").map(str::to_string),
            label: el.attr("label").map(str::to_string),
            desc: el.child("desc", NS_DATA_FORMS).map(Element::text),
            required: el.has_child("required", NS_DATA_FORMS),
            values: el
                .children()
                .filter(|c| c.is("value", NS_DATA_FORMS))
                .map(Element::text)
                .collect(),
            options: el
                .children()
                .filter(|c| c.is("option", NS_DATA_FORMS))
                .map(|o| FormOption {
                    label: o.attr("label").map(str::to_string),
                    value: o
                        .child("value", NS_DATA_FORMS)
                        .map(Element::text)
                        .unwrap_or_default(),
                })
                .collect(),
            media: el
                .children()
                .filter(|c| c.is("media", NS_MEDIA))
                .flat_map(|m| m.children().filter(|u| u.is("uri", NS_MEDIA)))
                .map(|u| MediaUri {
                    mime_type: u.attr("type").map(str::to_string),
                    uri: u.text().trim().to_string(),
                })
                .collect(),
        }
    }

    fn to_element(&self) -> Element {
        let mut el = Element::ns("field", NS_DATA_FORMS);
        if let Some(kind) = &self.kind {
            el.set_attr("type", kind.as_str());
        }
        if let Some(label) = &self.label {
            el.set_attr("label", label.as_str());
        }
        if let Some(var) = &self.var {
            el.set_attr("var", var.as_str());
        }
        if let Some(desc) = &self.desc {
            el = el.with_child(Element::ns("desc", NS_DATA_FORMS).with_text(desc.as_str()));
        }
        if self.required {
            el = el.with_child(Element::ns("required", NS_DATA_FORMS));
        }
        for value in &self.values {
            el = el.with_child(Element::ns("value", NS_DATA_FORMS).with_text(value.as_str()));
        }
        for option in &self.options {
            let mut opt = Element::ns("option", NS_DATA_FORMS);
            if let Some(label) = &option.label {
                opt.set_attr("label", label.as_str());
            }
            el = el.with_child(
                opt.with_child(
                    Element::ns("value", NS_DATA_FORMS).with_text(option.value.as_str()),
                ),
            );
        }
        if !self.media.is_empty() {
            let mut media = Element::ns("media", NS_MEDIA);
            for uri in &self.media {
                let mut u = Element::ns("uri", NS_MEDIA).with_text(uri.uri.as_str());
                if let Some(mime) = &uri.mime_type {
                    u.set_attr("type", mime.as_str());
                }
                media = media.with_child(u);
            }
            el = el.with_child(media);
        }
        el
    }
}

/// A data form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    /// Form type (`form`, `submit`, `cancel`, `result`)
    pub kind: String,
    /// Title
    pub title: Option<String>,
    /// Instruction lines
    pub instructions: Vec<String>,
    /// Fields in document order
    pub fields: Vec<FormField>,
}

impl Form {
    /// Decode `<x xmlns='jabber:x:data'/>`.
    pub fn from_element(el: &Element) -> Result<Self> {
        if !el.is("x", NS_DATA_FORMS) {
            return Err(XmppError::Xml(format!(
                "expected data form, got <{}>",
                el.name()
            )));
        }
        Ok(Self {
            kind: el.attr("type").unwrap_or_default().to_string(),
            title: el.child("title", NS_DATA_FORMS).map(Element::text),
            instructions: el
                .children()
                .filter(|c| c.is("instructions", NS_DATA_FORMS))
                .map(Element::text)
                .collect(),
            fields: el
                .children()
                .filter(|c| c.is("field", NS_DATA_FORMS))
                .map(FormField::from_element)
                .collect(),
        })
    }

    /// Encode as `<x xmlns='jabber:x:data'/>`.
    pub fn to_element(&self) -> Element {
        let mut el = Element::ns("x", NS_DATA_FORMS).with_attr("type", self.kind.as_str());
        if let Some(title) = &self.title {
            el = el.with_child(Element::ns("title", NS_DATA_FORMS).with_text(title.as_str()));
        }
        for line in &self.instructions {
            el = el.with_child(Element::ns("instructions", NS_DATA_FORMS).with_text(line.as_str()));
        }
        for field in &self.fields {
            el = el.with_child(field.to_element());
        }
        el
    }

    /// Field by variable name.
    pub fn field(&self, var: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.var.as_deref() == Some(var))
    }

    /// Mutable field by variable name.
    pub fn field_mut(&mut self, var: &str) -> Option<&mut FormField> {
        self.fields.iter_mut().find(|f| f.var.as_deref() == Some(var))
    }

    /// Build a `submit` form carrying every named field's type and values.
    pub fn submit(&self) -> Form {
        Form {
            kind: "submit".to_string(),
            title: None,
            instructions: Vec::new(),
            fields: self
                .fields
                .iter()
                .filter(|f| f.var.is_some() && f.kind.as_deref() != Some("fixed"))
                .map(|f| FormField {
                    var: f.var.clone(),
                    kind: f.kind.clone(),
                    values: f.values.clone(),
                    ..Default::default()
                })
                .collect(),
        }
    }
}

/// Bits of binary data referenced by `cid:` URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BobData {
    /// Content id
    pub cid: String,
    /// MIME type
    pub mime_type: Option<String>,
    /// Caching hint in seconds
    pub max_age: Option<u64>,
    /// Decoded bytes
    pub data: Vec<u8>,
}

impl BobData {
    /// Decode `<data xmlns='urn:xmpp:bob'/>`.
    pub fn from_element(el: &Element) -> Result<Self> {
        if !el.is("data", NS_BOB) {
            return Err(XmppError::Xml(format!("expected bob data, got <{}>", el.name())));
        }
        let encoded: String = el.text().split_whitespace().collect();
        Ok(Self {
            cid: el.attr("cid").unwrap_or_default().to_string(),
            mime_type: el.attr("type").map(str::to_string),
            max_age: el.attr("max-age").and_then(|v| v.parse().ok()),
            data: BASE64.decode(encoded)?,
        })
    }

    /// Whether `uri` (`cid:...`) refers to this blob.
    pub fn matches_uri(&self, uri: &str) -> bool {
        uri.strip_prefix("cid:") == Some(self.cid.as_str())
    }
}

/// Capability that fills in a server-provided form.
///
/// Receives the form and any binary data shipped with it (CAPTCHA images,
/// typically) and returns the form to submit, which is sent verbatim.
pub trait FormHandler: Send + Sync {
    /// Produce the reply form.
    fn fill(&self, form: &Form, data: &[BobData]) -> Result<Form>;
}

impl<F> FormHandler for F
where
    F: Fn(&Form, &[BobData]) -> Result<Form> + Send + Sync,
{
    fn fill(&self, form: &Form, data: &[BobData]) -> Result<Form> {
        self(form, data)
    }
}
