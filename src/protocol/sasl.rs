//! SASL mechanism capability (RFC 6120 section 6).
//!
//! Mechanisms are sans-IO: the negotiator owns the wire exchange and only
//! asks the mechanism for payloads.

use crate::error::{Result, XmppError};

/// One SASL mechanism instance, used for a single exchange.
pub trait Mechanism: Send {
    /// Registered mechanism name (`PLAIN`, `SCRAM-SHA-1`, ...).
    fn name(&self) -> &'static str;

    /// Payload for the initial `<auth/>` element.
    fn initial_response(&mut self, principal: &str, secret: &str) -> Result<Vec<u8>>;

    /// Answer a server `<challenge/>`.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Check additional data carried by `<success/>`.
    fn verify_success(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Chooses a mechanism among those the server offers.
pub trait MechanismProvider: Send + Sync {
    /// Pick a mechanism, or `None` if nothing offered is supported.
    fn select(&self, offered: &[String]) -> Option<Box<dyn Mechanism>>;
}

/// `PLAIN` (RFC 4616).
#[derive(Debug, Default)]
pub struct Plain;

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self, principal: &str, secret: &str) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(principal.len() + secret.len() + 2);
        payload.push(0);
        payload.extend_from_slice(principal.as_bytes());
        payload.push(0);
        payload.extend_from_slice(secret.as_bytes());
        Ok(payload)
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(XmppError::AuthenticationFailed(
            "unexpected challenge for PLAIN".to_string(),
        ))
    }
}

/// Built-in mechanism set.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMechanisms;

impl MechanismProvider for DefaultMechanisms {
    fn select(&self, offered: &[String]) -> Option<Box<dyn Mechanism>> {
        offered
            .iter()
            .any(|m| m == "PLAIN")
            .then(|| Box::new(Plain) as Box<dyn Mechanism>)
    }
}
