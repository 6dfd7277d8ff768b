//! Scripted in-process XMPP server for end-to-end tests.
//!
//! The client dials through [`FakeDialer`], which hands out one end of a
//! `tokio::io::duplex` pair; the test drives the other end with
//! [`FakeServer`]. STARTTLS goes through [`PassthroughTls`], which returns
//! the stream unchanged and records how it was called.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::DuplexStream;
use xmpp::codec::{Element, Frame};
use xmpp::protocol::{Iq, LivenessConfig};
use xmpp::transport::{
    bind, BoxFuture, BoxedStream, LogSink, ProxyDialer, TlsUpgrader, TrafficLog, XmlStream,
};
use xmpp::DialerConfig;

pub const JID: &str = "alice@example.com";
pub const PASSWORD: &str = "secret";
pub const BOUND: &str = "alice@example.com/4b1d";

pub const STARTTLS: &str = "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>";
pub const MECHS: &str = "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>";
pub const REGISTER: &str = "<register xmlns='http://jabber.org/features/iq-register'/>";
pub const BIND: &str = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>";
pub const SESSION: &str = "<session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>";
pub const OPTIONAL_SESSION: &str = "<session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session>";

/// Wrap feature children in `<stream:features>`.
pub fn features(children: &[&str]) -> String {
    format!("<stream:features>{}</stream:features>", children.concat())
}

/// Byte buffer usable as a log sink.
pub fn capture() -> (LogSink, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink: LogSink = buf.clone();
    (sink, buf)
}

pub fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buf.lock().unwrap()).into_owned()
}

/// Hands out a pre-made duplex end and records what was dialed.
pub struct FakeDialer {
    client: Mutex<Option<DuplexStream>>,
    pub dialed: Mutex<Vec<(String, String)>>,
}

impl FakeDialer {
    pub fn new() -> (Arc<Self>, DuplexStream) {
        Self::with_capacity(64 * 1024)
    }

    /// Like [`FakeDialer::new`] with a pipe holding at most `capacity` bytes per direction.
    pub fn with_capacity(capacity: usize) -> (Arc<Self>, DuplexStream) {
        let (client, server) = tokio::io::duplex(capacity);
        let dialer = Arc::new(Self {
            client: Mutex::new(Some(client)),
            dialed: Mutex::new(Vec::new()),
        });
        (dialer, server)
    }

    pub fn dialed(&self) -> Vec<(String, String)> {
        self.dialed.lock().unwrap().clone()
    }
}

impl ProxyDialer for FakeDialer {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, BoxedStream> {
        Box::pin(async move {
            self.dialed
                .lock()
                .unwrap()
                .push((network.to_string(), address.to_string()));
            let stream = self.client.lock().unwrap().take().ok_or_else(|| {
                xmpp::XmppError::Network(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "already dialed",
                ))
            })?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Returns the stream as is and records `(domain, trusted)`.
#[derive(Default)]
pub struct PassthroughTls {
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl PassthroughTls {
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TlsUpgrader for PassthroughTls {
    fn upgrade<'a>(
        &'a self,
        stream: BoxedStream,
        domain: &'a str,
        trusted: bool,
    ) -> BoxFuture<'a, BoxedStream> {
        Box::pin(async move {
            self.calls.lock().unwrap().push((domain.to_string(), trusted));
            Ok(stream)
        })
    }
}

/// Dial settings wired to the fakes, liveness off.
pub fn config(dialer: &Arc<FakeDialer>, tls: &Arc<PassthroughTls>) -> DialerConfig {
    DialerConfig::new(JID, PASSWORD)
        .with_proxy(dialer.clone())
        .with_tls(tls.clone())
        .with_liveness(LivenessConfig::disabled())
        .with_step_timeout(Duration::from_secs(5))
}

/// Server end of the connection.
pub struct FakeServer {
    stream: XmlStream,
}

impl FakeServer {
    pub fn new(io: DuplexStream) -> Self {
        Self::with_log(io, &TrafficLog::default())
    }

    pub fn with_log(io: DuplexStream, log: &TrafficLog) -> Self {
        Self {
            stream: bind(Box::new(io), log),
        }
    }

    pub async fn send(&mut self, xml: &str) {
        self.stream.send(xml).await.unwrap();
    }

    pub async fn next_frame(&mut self) -> xmpp::Result<Frame> {
        self.stream.next_frame().await
    }

    pub async fn expect(&mut self) -> Element {
        self.stream.next_element().await.unwrap()
    }

    pub async fn expect_iq(&mut self) -> Iq {
        Iq::from_element(&self.expect().await).unwrap()
    }

    /// Wait for the client's stream header, answer with ours and `features`.
    pub async fn open(&mut self, features: &str) -> Element {
        let header = match self.stream.next_frame().await.unwrap() {
            Frame::StreamOpen(header) => header,
            other => panic!("expected stream header, got {other:?}"),
        };
        self.send(&format!(
            "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' id='s1' from='example.com' \
             version='1.0'>{features}"
        ))
        .await;
        header
    }

    /// Answer `<starttls/>` with `<proceed/>`.
    pub async fn starttls(&mut self) {
        let el = self.expect().await;
        assert_eq!(el.name(), "starttls");
        self.send("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
            .await;
    }

    /// Accept the SASL exchange and reopen the stream with `post_auth` features.
    pub async fn authenticate(&mut self, post_auth: &str) -> Element {
        let auth = self.expect().await;
        assert_eq!(auth.name(), "auth");
        self.send("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
            .await;
        self.open(post_auth).await;
        auth
    }

    /// Answer the bind request with `jid`.
    pub async fn bind(&mut self, jid: &str) -> Iq {
        let iq = self.expect_iq().await;
        self.send(&format!(
            "<iq type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>{jid}</jid></bind></iq>",
            iq.id
        ))
        .await;
        iq
    }

    /// Plain handshake up to a bound resource, no optional features.
    pub async fn minimal(&mut self) {
        self.open(&features(&[MECHS, BIND])).await;
        self.minimal_after_open().await;
    }

    /// Authenticate and bind on an already opened stream.
    pub async fn minimal_after_open(&mut self) {
        self.authenticate(&features(&[BIND])).await;
        self.bind(BOUND).await;
    }
}
