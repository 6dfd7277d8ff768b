//! Direct TCP dialer.
//!
//! Used when the dial configuration carries no proxy capability.

use std::time::Duration;

use tokio::net::TcpStream;

use super::{BoxFuture, BoxedStream, ProxyDialer};
use crate::error::XmppError;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Dials the target address directly over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Bound on the TCP connect call.
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer with the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl ProxyDialer for TcpDialer {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, BoxedStream> {
        Box::pin(async move {
            if network != "tcp" {
                return Err(XmppError::Network(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("unsupported network {network}"),
                )));
            }

            tracing::debug!("Dialing {} over TCP", address);
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
                .await
                .map_err(|_| {
                    XmppError::Network(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {address} timed out"),
                    ))
                })??;
            stream.set_nodelay(true)?;

            Ok(Box::new(stream) as BoxedStream)
        })
    }
}
