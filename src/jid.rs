//! Bare identities (`local@domain`).

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, XmppError};

/// A bare JID as specified in RFC 6120: `local@domain`.
///
/// The localpart is the SASL principal; the domainpart is the origin
/// domain named in stream headers and the default server host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: String,
    domain: String,
}

impl Jid {
    /// Parse a bare identity.
    ///
    /// Exactly one `@` is required and both sides must be non-empty. A
    /// trailing `/resource` is dropped.
    pub fn parse(s: &str) -> Result<Self> {
        let bare = s.split_once('/').map_or(s, |(bare, _)| bare);
        let mut parts = bare.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
                Ok(Self {
                    local: local.to_string(),
                    domain: domain.to_string(),
                })
            },
            _ => Err(XmppError::InvalidIdentity(format!(
                "expected local@domain, got {s:?}"
            ))),
        }
    }

    /// Localpart (authentication principal).
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Domainpart (origin domain).
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl FromStr for Jid {
    type Err = XmppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Domain part of any JID string (bare or full), without I/O or validation.
pub(crate) fn domain_of(jid: &str) -> &str {
    let bare = jid.split_once('/').map_or(jid, |(bare, _)| bare);
    bare.rsplit_once('@').map_or(bare, |(_, domain)| domain)
}
