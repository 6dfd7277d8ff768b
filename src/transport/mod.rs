//! Transport layer for the XMPP client.
//!
//! A transport is any bidirectional byte stream. It is opened through a
//! [`ProxyDialer`], optionally upgraded in place by a [`TlsUpgrader`], and
//! bound to an XML reader/writer pair by [`bind`].
//!
//! # Architecture
//!
//! ```text
//!   ProxyDialer::dial("tcp", "host:5222")
//!                │
//!                ▼
//!          BoxedStream ──────────────┐
//!                │                   │ STARTTLS: unbind, upgrade, rebind
//!                ▼                   │
//!   TeeStream (inbound/outbound log sinks)
//!                │
//!                ▼
//!   XmlStream { XmlReader<ReadHalf>, WriteHalf }
//! ```
//!
//! The [`XmlStream`] is the single replaceable slot the negotiator reads
//! and writes through, so the byte stream beneath it can be swapped for an
//! encrypted one without touching anything above.

mod binder;
mod tcp;
mod tee;
mod tls;

pub use binder::{bind, StreamReader, StreamWriter, XmlStream};
pub use tcp::{TcpDialer, DEFAULT_CONNECT_TIMEOUT};
pub use tee::{LogSink, TeeStream, TrafficLog};
pub use tls::{RustlsUpgrader, TlsUpgrader};

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Byte stream usable as an XMPP transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Type-erased transport.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Boxed future returned by capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability that opens byte streams, directly or through a proxy.
pub trait ProxyDialer: Send + Sync {
    /// Open a stream to `address` (`host:port`) over `network` (`"tcp"`).
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, BoxedStream>;
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("example.com", 5222), "example.com:5222");
        assert_eq!(join_host_port("::1", 5222), "[::1]:5222");
    }
}
