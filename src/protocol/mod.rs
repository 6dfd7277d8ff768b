//! XMPP stream negotiation and session management.
//!
//! Implements the client side of RFC 6120 stream setup, XEP-0077 in-band
//! registration and the post-handshake liveness tasks.
//!
//! # Negotiation Order
//!
//! ```text
//! Client                                   Server
//!    |------ <stream:stream to=domain> ------>|  StreamOpen
//!    |<----- <stream:features> ---------------|
//!    |------ <starttls/> -------------------->|  Encrypt (if offered)
//!    |<----- <proceed/> ----------------------|
//!    |====== TLS handshake, reopen stream ====|
//!    |------ iq get / iq set (register) ----->|  Register (if handler + offered)
//!    |------ <auth mechanism=...> ----------->|  Authenticate
//!    |<----- <success/> ----------------------|
//!    |------ <stream:stream> (restart) ------>|
//!    |------ iq set <bind/> ----------------->|  BindResource (mandatory)
//!    |<----- iq result <jid/> ----------------|
//!    |------ iq set <session/> -------------->|  EstablishSession (if declared)
//!    |                                        |  Ready: read loop + liveness
//! ```
//!
//! The order is fixed. Optional steps whose feature is absent are skipped
//! without touching the wire.
//!
//! ## Registration Outcomes
//!
//! | Error code | Result                                   |
//! |------------|------------------------------------------|
//! | `409`      | `XmppError::UsernameConflict`            |
//! | `406`      | `XmppError::MissingRequiredRegistrationInfo` |
//! | other      | `XmppError::RegistrationFailed`          |
//! | (no error) | account created                          |

mod features;
mod form;
mod liveness;
mod negotiator;
mod register;
mod sasl;
mod session;
mod stanza;

pub use features::{FeatureSet, SessionFeature, StartTls};
pub use form::{BobData, Form, FormField, FormHandler, FormOption, MediaUri};
pub use liveness::LivenessConfig;
pub use negotiator::{
    negotiate, HandshakeReport, Negotiated, NegotiationContext, DEFAULT_STEP_TIMEOUT,
};
pub use register::{create_account, registration_error, RegisterQuery, RegistrationStatus};
pub use sasl::{DefaultMechanisms, Mechanism, MechanismProvider, Plain};
pub use session::{Reply, Session, SessionFailure};
pub use stanza::{Cookie, Iq, IqType, Stanza, StanzaError};

/// Default client-to-server port
pub const DEFAULT_PORT: u16 = 5222;

/// Client stanza namespace
pub const NS_CLIENT: &str = "jabber:client";
/// Stream namespace
pub const NS_STREAM: &str = "http://etherx.jabber.org/streams";
/// STARTTLS namespace
pub const NS_TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
/// SASL namespace
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Resource binding namespace
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// Legacy session establishment namespace
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
/// In-band registration query namespace
pub const NS_REGISTER: &str = "jabber:iq:register";
/// In-band registration stream feature namespace
pub const NS_REGISTER_FEATURE: &str = "http://jabber.org/features/iq-register";
/// Data forms namespace (XEP-0004)
pub const NS_DATA_FORMS: &str = "jabber:x:data";
/// Bits of binary namespace (XEP-0231)
pub const NS_BOB: &str = "urn:xmpp:bob";
/// Media element namespace (XEP-0221)
pub const NS_MEDIA: &str = "urn:xmpp:media-element";
/// Ping namespace (XEP-0199)
pub const NS_PING: &str = "urn:xmpp:ping";
/// Stanza error conditions namespace
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
