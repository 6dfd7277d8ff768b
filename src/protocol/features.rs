//! Stream features advertised by the server.

use super::{NS_BIND, NS_REGISTER_FEATURE, NS_SASL, NS_SESSION, NS_STREAM, NS_TLS};
use crate::codec::Element;
use crate::error::{Result, XmppError};

/// STARTTLS advertisement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartTls {
    /// Server marked TLS as `<required/>`
    pub required: bool,
}

/// Legacy session advertisement (RFC 3921).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFeature {
    /// Server marked the session as `<optional/>` (RFC 6121 errata)
    pub optional: bool,
}

/// Capabilities advertised right after a stream opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    /// STARTTLS availability
    pub starttls: Option<StartTls>,
    /// SASL mechanism names, in server preference order
    pub mechanisms: Vec<String>,
    /// In-band registration availability
    pub in_band_registration: bool,
    /// Resource binding advertised
    pub bind: bool,
    /// Legacy session advertisement
    pub session: Option<SessionFeature>,
}

impl FeatureSet {
    /// Parse `<stream:features>`.
    pub fn from_element(el: &Element) -> Result<Self> {
        if !el.is("features", NS_STREAM) {
            return Err(XmppError::Xml(format!(
                "expected <stream:features>, got <{}>",
                el.name()
            )));
        }

        let mut features = Self::default();
        for child in el.children() {
            match (child.name(), child.namespace()) {
                ("starttls", Some(NS_TLS)) => {
                    features.starttls = Some(StartTls {
                        required: child.has_child("required", NS_TLS),
                    });
                },
                ("mechanisms", Some(NS_SASL)) => {
                    features.mechanisms = child
                        .children()
                        .filter(|m| m.is("mechanism", NS_SASL))
                        .map(|m| m.text().trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect();
                },
                ("register", Some(NS_REGISTER_FEATURE)) => features.in_band_registration = true,
                ("bind", Some(NS_BIND)) => features.bind = true,
                ("session", Some(NS_SESSION)) => {
                    features.session = Some(SessionFeature {
                        optional: child.has_child("optional", NS_SESSION),
                    });
                },
                _ => {},
            }
        }
        Ok(features)
    }

    /// Whether the server requires legacy session establishment.
    pub fn requires_session(&self) -> bool {
        self.session.is_some_and(|s| !s.optional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Element {
        Element::ns("features", NS_STREAM)
    }

    #[test]
    fn test_empty_features() {
        let set = FeatureSet::from_element(&features()).unwrap();
        assert_eq!(set, FeatureSet::default());
        assert!(set.starttls.is_none());
        assert!(!set.requires_session());
    }

    #[test]
    fn test_full_features() {
        let el = features()
            .with_child(
                Element::ns("starttls", NS_TLS).with_child(Element::ns("required", NS_TLS)),
            )
            .with_child(
                Element::ns("mechanisms", NS_SASL)
                    .with_child(Element::ns("mechanism", NS_SASL).with_text("SCRAM-SHA-1"))
                    .with_child(Element::ns("mechanism", NS_SASL).with_text("PLAIN")),
            )
            .with_child(Element::ns("register", NS_REGISTER_FEATURE))
            .with_child(Element::ns("bind", NS_BIND))
            .with_child(Element::ns("session", NS_SESSION));

        let set = FeatureSet::from_element(&el).unwrap();
        assert_eq!(set.starttls, Some(StartTls { required: true }));
        assert_eq!(set.mechanisms, vec!["SCRAM-SHA-1", "PLAIN"]);
        assert!(set.in_band_registration);
        assert!(set.bind);
        assert!(set.requires_session());
    }

    #[test]
    fn test_optional_session_not_required() {
        let el = features().with_child(
            Element::ns("session", NS_SESSION).with_child(Element::ns("optional", NS_SESSION)),
        );
        let set = FeatureSet::from_element(&el).unwrap();
        assert!(set.session.is_some());
        assert!(!set.requires_session());
    }

    #[test]
    fn test_wrong_namespace_ignored() {
        let el = features().with_child(Element::ns("register", "jabber:iq:register"));
        assert!(!FeatureSet::from_element(&el).unwrap().in_band_registration);
    }

    #[test]
    fn test_not_features() {
        assert!(FeatureSet::from_element(&Element::ns("error", NS_STREAM)).is_err());
    }
}
