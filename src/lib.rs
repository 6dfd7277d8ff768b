//! # xmpp - XMPP client connection core
//!
//! Client side of the XMPP stream setup (RFC 6120/6121): open a transport
//! to a server, negotiate the ordered stream features, bind a resource and
//! keep the resulting session alive. Accounts can be created in-band
//! (XEP-0077) during the same handshake.
//!
//! ## Architecture
//!
//! ```text
//!  Dialer ──dial──> ProxyDialer ──> byte stream
//!    │                                  │
//!    │                          transport::bind (tee to log sinks)
//!    │                                  │
//!    └──negotiate──> StreamOpen ─> Encrypt ─> Register ─> Authenticate
//!                                      │                      │
//!                               TlsUpgrader            MechanismProvider
//!                                                             │
//!                           BindResource ─> EstablishSession ─┘
//!                                  │
//!                                  ▼
//!                 Session { read loop, keepalive, ping }
//! ```
//!
//! Every external collaborator sits behind a trait so it can be swapped:
//!
//! | Capability      | Trait                         | Default                    |
//! |-----------------|-------------------------------|----------------------------|
//! | Transport       | [`transport::ProxyDialer`]    | [`transport::TcpDialer`]   |
//! | Encryption      | [`transport::TlsUpgrader`]    | [`transport::RustlsUpgrader`] |
//! | Authentication  | [`protocol::MechanismProvider`] | [`protocol::DefaultMechanisms`] (PLAIN) |
//! | Registration    | [`protocol::FormHandler`]     | none (no registration)     |
//! | Traffic logging | [`transport::LogSink`]        | none                       |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xmpp::{Dialer, DialerConfig};
//!
//! # async fn run() -> xmpp::Result<()> {
//! let dialer = Dialer::new(DialerConfig::new("alice@example.com", "secret"));
//! let mut session = dialer.connect().await?;
//! println!("Bound as {}", session.jid());
//!
//! if let Some(failure) = session.next_failure().await {
//!     eprintln!("Session failed: {failure}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: XML element tree and incremental stream reader
//! - [`transport`]: dialers, TLS upgrade, traffic tee, XML binding
//! - [`protocol`]: negotiation, registration, session, liveness
//! - [`dialer`]: configuration and entry points
//! - [`config`]: TOML/environment configuration
//! - [`error`]: error types and result alias

pub mod codec;
pub mod config;
pub mod dialer;
pub mod error;
pub mod jid;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use dialer::{resolve_server, Dialer, DialerConfig};
pub use error::{Result, Stage, XmppError};
pub use jid::Jid;
pub use protocol::{
    Form, FormHandler, HandshakeReport, LivenessConfig, RegistrationStatus, Session,
    SessionFailure,
};
pub use transport::TrafficLog;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
