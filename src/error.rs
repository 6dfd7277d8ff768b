//! XMPP client error types.
//!
//! # Error Classification
//!
//! | Class               | Variants                                                   |
//! |---------------------|------------------------------------------------------------|
//! | Network             | `Network` (transport connect/read/write, passed unchanged) |
//! | Decode              | `Xml`, `Decode` (malformed or absent expected reply)       |
//! | Protocol violation  | `Protocol`, `StreamError`, `SessionEstablishmentFailed`,   |
//! |                     | `UsernameConflict`, `MissingRequiredRegistrationInfo`,     |
//! |                     | `RegistrationFailed`, `AuthenticationFailed`               |
//! | Validation          | `InvalidIdentity`, `Config`                                |
//!
//! Handshake errors carry the [`Stage`] that failed. Nothing is retried:
//! every failure aborts the current dial and the caller owns retry policy.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Handshake step in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Stream header exchange and feature capture
    StreamOpen,
    /// STARTTLS upgrade
    Encrypt,
    /// In-band registration (XEP-0077)
    Register,
    /// SASL exchange
    Authenticate,
    /// Resource binding
    BindResource,
    /// Legacy session establishment (RFC 3921)
    EstablishSession,
}

impl Stage {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamOpen => "stream open",
            Self::Encrypt => "starttls",
            Self::Register => "registration",
            Self::Authenticate => "authentication",
            Self::BindResource => "resource binding",
            Self::EstablishSession => "session establishment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// XMPP client errors.
#[derive(Error, Debug)]
pub enum XmppError {
    /// Transport connect/read/write failure.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Identity is not of the form `local@domain`.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Raw XML codec failure, not yet attributed to a handshake step.
    #[error("XML error: {0}")]
    Xml(String),

    /// Malformed or absent reply during a handshake step.
    #[error("Decode error during {stage}: {reason}")]
    Decode {
        /// Failing step.
        stage: Stage,
        /// What could not be decoded.
        reason: String,
    },

    /// Reply present but semantically wrong.
    #[error("Protocol error during {stage}: {reason}")]
    Protocol {
        /// Failing step.
        stage: Stage,
        /// What the peer did wrong.
        reason: String,
    },

    /// The peer sent `<stream:error>`.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// TLS configuration or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// SASL exchange failed or no usable mechanism was offered.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Session establishment reply was not a result.
    #[error("xmpp: session establishment failed")]
    SessionEstablishmentFailed,

    /// Registration error code 409.
    #[error("xmpp: the username is not available for registration")]
    UsernameConflict,

    /// Registration error code 406.
    #[error("xmpp: missing required registration information")]
    MissingRequiredRegistrationInfo,

    /// Any other registration failure.
    #[error("xmpp: account creation failed")]
    RegistrationFailed,

    /// A handshake step exceeded its deadline.
    #[error("Timed out during {stage}")]
    Timeout {
        /// Failing step.
        stage: Stage,
    },

    /// Operation requires a live session.
    #[error("Session closed")]
    SessionClosed,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for XMPP operations
pub type Result<T> = std::result::Result<T, XmppError>;

impl XmppError {
    /// Attribute a codec-level error to a handshake step.
    ///
    /// `Xml` becomes `Decode { stage }`; a clean end of stream during a
    /// step is reported as a decode error as well, since the expected
    /// reply is absent. Everything else passes through unchanged.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Self::Xml(reason) => Self::Decode { stage, reason },
            Self::SessionClosed => Self::Decode {
                stage,
                reason: "stream closed by peer".to_string(),
            },
            other => other,
        }
    }

    /// Stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Decode { stage, .. } | Self::Protocol { stage, .. } | Self::Timeout { stage } => {
                Some(*stage)
            },
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for XmppError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => XmppError::Network(
                Arc::try_unwrap(io).unwrap_or_else(|shared| {
                    std::io::Error::new(shared.kind(), shared.to_string())
                }),
            ),
            other => XmppError::Xml(other.to_string()),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmppError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        XmppError::Xml(format!("attribute error: {err}"))
    }
}

impl From<base64::DecodeError> for XmppError {
    fn from(err: base64::DecodeError) -> Self {
        XmppError::Xml(format!("Base64 decode error: {err}"))
    }
}
