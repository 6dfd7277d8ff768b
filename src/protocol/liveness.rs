//! Keepalive and ping tasks (XEP-0199).
//!
//! Both tasks start once a resource is bound and run until the transport
//! closes. A failure is pushed onto the session's failure channel and ends
//! the task that saw it; nothing here tears the connection down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval};

use super::session::{Connection, SessionFailure};
use super::stanza::{Iq, IqType};
use super::NS_PING;
use crate::codec::Element;
use crate::jid::domain_of;

/// Timing of the liveness tasks. A zero interval disables that task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Time between whitespace keepalives
    pub keepalive_interval: Duration,
    /// Write deadline for one keepalive
    pub keepalive_timeout: Duration,
    /// Time between pings
    pub ping_interval: Duration,
    /// How long to wait for a ping reply
    pub ping_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(30),
        }
    }
}

impl LivenessConfig {
    /// Configuration with both tasks turned off.
    pub fn disabled() -> Self {
        Self {
            keepalive_interval: Duration::ZERO,
            ping_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Ticker whose first tick is one full period away.
fn ticker(period: Duration) -> Interval {
    tokio::time::interval_at(Instant::now() + period, period)
}

/// Write a single space every `keepalive_interval`.
pub(crate) async fn keepalive(conn: Arc<Connection>, config: LivenessConfig) {
    let mut ticks = ticker(config.keepalive_interval);
    let mut closed = conn.closed();

    loop {
        tokio::select! {
            _ = ticks.tick() => {},
            _ = closed.wait_for(|c| *c) => break,
        }

        if let Err(e) = conn.write_with_deadline(" ", config.keepalive_timeout).await {
            tracing::warn!("Keepalive failed: {}", e);
            conn.fail(SessionFailure::Keepalive(e.to_string()));
            return;
        }
        tracing::trace!("Keepalive sent");
    }
    tracing::debug!("Keepalive task stopped");
}

/// Ping the server every `ping_interval` and wait for any reply.
pub(crate) async fn ping(conn: Arc<Connection>, config: LivenessConfig) {
    let mut ticks = ticker(config.ping_interval);
    let mut closed = conn.closed();
    let jid = conn.jid().to_string();
    let domain = domain_of(&jid).to_string();

    loop {
        tokio::select! {
            _ = ticks.tick() => {},
            _ = closed.wait_for(|c| *c) => break,
        }

        let request = Iq::new(IqType::Get, "")
            .with_from(&jid)
            .with_to(&domain)
            .with_payload(Element::ns("ping", NS_PING));
        let (reply, cookie) = match conn.request(request).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Ping could not be sent: {}", e);
                conn.fail(SessionFailure::PingFailed(e.to_string()));
                return;
            },
        };

        match tokio::time::timeout(config.ping_timeout, reply).await {
            Ok(Ok(_)) => tracing::trace!("Ping {} answered", cookie),
            Ok(Err(_)) => {
                tracing::warn!("Transport closed while awaiting ping {}", cookie);
                conn.fail(SessionFailure::PingFailed(
                    "transport closed while awaiting reply".to_string(),
                ));
                return;
            },
            Err(_) => {
                tracing::warn!("Ping {} timed out after {:?}", cookie, config.ping_timeout);
                conn.forget(cookie);
                conn.fail(SessionFailure::PingTimeout);
                return;
            },
        }
    }
    tracing::debug!("Ping task stopped");
}
