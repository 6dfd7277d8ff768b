//! Live XMPP session.
//!
//! After the handshake the bound stream is split. The write half sits
//! behind an async mutex shared by the caller, the keepalive task and the
//! ping task. The read half moves into a single read loop that routes IQ
//! replies to their waiters by id and hands every other stanza to the
//! caller.
//!
//! # Teardown
//!
//! Closing the transport is the only cancellation primitive. When the read
//! loop ends it drops every pending waiter (their receivers see a closed
//! channel), flips the shared `closed` flag the liveness tasks watch, and
//! reports [`SessionFailure::ConnectionLost`] unless the caller closed the
//! session itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::features::FeatureSet;
use super::liveness::{self, LivenessConfig};
use super::negotiator::{HandshakeReport, Negotiated};
use super::register::remove_query;
use super::stanza::{Cookie, Iq, IqType, Stanza};
use super::{NS_PING, NS_STREAM};
use crate::codec::{Element, Frame};
use crate::error::{Result, XmppError};
use crate::transport::{StreamReader, StreamWriter};

/// Receiver for the reply to one request.
pub type Reply = oneshot::Receiver<Stanza>;

/// Failure detected after the session became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// A keepalive write failed or missed its deadline
    Keepalive(String),
    /// A ping got no reply in time
    PingTimeout,
    /// A ping could not be sent or its reply channel closed
    PingFailed(String),
    /// The read loop ended
    ConnectionLost(String),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keepalive(reason) => write!(f, "keepalive failed: {reason}"),
            Self::PingTimeout => f.write_str("ping timed out"),
            Self::PingFailed(reason) => write!(f, "ping failed: {reason}"),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

/// State shared by the session handle and its background tasks.
pub(crate) struct Connection {
    jid: String,
    writer: Mutex<StreamWriter>,
    pending: std::sync::Mutex<HashMap<String, oneshot::Sender<Stanza>>>,
    failures: mpsc::UnboundedSender<SessionFailure>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn jid(&self) -> &str {
        &self.jid
    }

    /// Watch the closed flag.
    pub(crate) fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Write raw XML through the single writer.
    pub(crate) async fn write(&self, xml: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(XmppError::SessionClosed);
        }
        writer.write_all(xml.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write with a deadline on acquiring the writer and flushing.
    pub(crate) async fn write_with_deadline(&self, xml: &str, deadline: Duration) -> Result<()> {
        tokio::time::timeout(deadline, self.write(xml))
            .await
            .map_err(|_| {
                XmppError::Network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("write not completed within {deadline:?}"),
                ))
            })?
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Stanza>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send an IQ under a fresh cookie and register its waiter first.
    pub(crate) async fn request(&self, iq: Iq) -> Result<(Reply, Cookie)> {
        let cookie = Cookie::random();
        let iq = Iq {
            id: cookie.id(),
            ..iq
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending();
            // Waiters whose receiver was dropped will never be read
            pending.retain(|_, waiter| !waiter.is_closed());
            pending.insert(iq.id.clone(), tx);
        }
        if let Err(e) = self.write(&iq.to_xml()).await {
            self.forget(cookie);
            return Err(e);
        }
        Ok((rx, cookie))
    }

    /// Drop the waiter for `cookie`, if still pending.
    pub(crate) fn forget(&self, cookie: Cookie) {
        self.pending().remove(&cookie.id());
    }

    /// Deliver an IQ reply to its waiter, or give the stanza back.
    fn route(&self, stanza: Stanza) -> Option<Stanza> {
        let waiter = match &stanza {
            Stanza::Iq(iq) if iq.kind.is_response() => self.pending().remove(&iq.id),
            _ => None,
        };
        match waiter {
            Some(tx) => {
                // The waiter may have given up already
                let _ = tx.send(stanza);
                None
            },
            None => Some(stanza),
        }
    }

    /// Report a failure to the session owner.
    pub(crate) fn fail(&self, failure: SessionFailure) {
        let _ = self.failures.send(failure);
    }

    /// Mark closed and drop all waiters. Returns whether it was already closed.
    fn shut(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        self.pending().clear();
        was_closed
    }
}

async fn read_loop(
    conn: Arc<Connection>,
    mut reader: StreamReader,
    stanzas: mpsc::UnboundedSender<Stanza>,
    write_timeout: Duration,
) {
    let reason = loop {
        let el = match reader.next_frame().await {
            Ok(Frame::Element(el)) => el,
            Ok(Frame::StreamClose) => break "stream closed by server".to_string(),
            Ok(Frame::StreamOpen(_)) => break "unexpected stream header".to_string(),
            Err(XmppError::SessionClosed) => break "connection closed by server".to_string(),
            Err(e) => break e.to_string(),
        };

        if el.is("error", NS_STREAM) {
            let condition = el.children().next().map_or("undefined-condition", Element::name);
            break format!("stream error: {condition}");
        }

        let stanza = Stanza::from_element(el);
        if let Some(iq) = stanza.as_iq().filter(|iq| is_ping_request(iq)) {
            let pong = Iq::new(IqType::Result, iq.id.as_str())
                .with_to(iq.from.as_deref().unwrap_or_default());
            if let Err(e) = conn.write_with_deadline(&pong.to_xml(), write_timeout).await {
                break format!("could not answer server ping: {e}");
            }
            continue;
        }

        if let Some(stanza) = conn.route(stanza) {
            let _ = stanzas.send(stanza);
        }
    };

    if conn.shut() {
        tracing::debug!("Read loop stopped after close");
    } else {
        tracing::warn!("Connection lost: {}", reason);
        conn.fail(SessionFailure::ConnectionLost(reason));
    }
}

fn is_ping_request(iq: &Iq) -> bool {
    iq.kind == IqType::Get && iq.payload.as_ref().is_some_and(|p| p.is("ping", NS_PING))
}

/// A negotiated, bound session.
///
/// Dropping the session aborts its read loop and liveness tasks.
pub struct Session {
    conn: Arc<Connection>,
    features: FeatureSet,
    report: HandshakeReport,
    stanzas: mpsc::UnboundedReceiver<Stanza>,
    failures: mpsc::UnboundedReceiver<SessionFailure>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Split the negotiated stream and spawn the read loop and liveness tasks.
    pub(crate) fn start(negotiated: Negotiated, liveness: LivenessConfig) -> Self {
        let Negotiated {
            stream,
            jid,
            features,
            report,
        } = negotiated;
        let (reader, writer) = stream.into_split();
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let (stanza_tx, stanzas) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let conn = Arc::new(Connection {
            jid,
            writer: Mutex::new(writer),
            pending: std::sync::Mutex::new(HashMap::new()),
            failures: failure_tx,
            closed,
        });

        let mut tasks = vec![tokio::spawn(read_loop(
            conn.clone(),
            reader,
            stanza_tx,
            liveness.keepalive_timeout,
        ))];
        if !liveness.keepalive_interval.is_zero() {
            tasks.push(tokio::spawn(liveness::keepalive(conn.clone(), liveness)));
        }
        if !liveness.ping_interval.is_zero() {
            tasks.push(tokio::spawn(liveness::ping(conn.clone(), liveness)));
        }

        tracing::info!("Session ready as {}", conn.jid);
        Self {
            conn,
            features,
            report,
            stanzas,
            failures,
            tasks,
        }
    }

    /// Full JID assigned by the server.
    pub fn jid(&self) -> &str {
        &self.conn.jid
    }

    /// Whether the server address was chosen explicitly.
    pub fn is_trusted(&self) -> bool {
        self.report.trusted
    }

    /// Handshake summary.
    pub fn report(&self) -> &HandshakeReport {
        &self.report
    }

    /// Features advertised at stream open, before authentication.
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// Whether the transport has closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Send an IQ request and return its reply receiver and cookie.
    ///
    /// An empty `to` leaves the recipient unset.
    pub async fn send_iq(
        &self,
        to: &str,
        kind: IqType,
        payload: Element,
    ) -> Result<(Reply, Cookie)> {
        let iq = Iq::new(kind, "").with_to(to).with_payload(payload);
        self.conn.request(iq).await
    }

    /// Stop waiting for the reply to `cookie`.
    ///
    /// A reply that arrives later is handed to [`Session::next_stanza`].
    pub fn forget(&self, cookie: Cookie) {
        self.conn.forget(cookie);
    }

    /// Write raw XML to the stream.
    pub async fn send_raw(&self, xml: &str) -> Result<()> {
        self.conn.write(xml).await
    }

    /// Ask the server to remove the account (XEP-0077 section 3.2).
    ///
    /// Returns as soon as the request is written.
    pub async fn cancel_registration(&self) -> Result<(Reply, Cookie)> {
        tracing::debug!("Requesting account removal");
        self.send_iq("", IqType::Set, remove_query()).await
    }

    /// Next stanza that was not a reply to one of our requests.
    pub async fn next_stanza(&mut self) -> Option<Stanza> {
        self.stanzas.recv().await
    }

    /// Next failure reported by the read loop or a liveness task.
    pub async fn next_failure(&mut self) -> Option<SessionFailure> {
        self.failures.recv().await
    }

    /// Close the stream. Background tasks stop without reporting a failure.
    pub async fn close(&self) -> Result<()> {
        if self.conn.shut() {
            return Ok(());
        }
        tracing::info!("Closing session {}", self.conn.jid);
        let mut writer = self.conn.writer.lock().await;
        writer.write_all(b"</stream:stream>").await?;
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("jid", &self.conn.jid)
            .field("closed", &self.is_closed())
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{bind, TrafficLog};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const HEADER: &[u8] =
        b"<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>";

    async fn started() -> (Session, tokio::io::DuplexStream) {
        started_with(4096, LivenessConfig::disabled()).await
    }

    async fn started_with(
        capacity: usize,
        liveness: LivenessConfig,
    ) -> (Session, tokio::io::DuplexStream) {
        let (client, mut server) = tokio::io::duplex(capacity);
        let mut stream = bind(Box::new(client), &TrafficLog::default());
        server.write_all(HEADER).await.unwrap();
        stream.next_frame().await.unwrap();

        let negotiated = Negotiated {
            stream,
            jid: "alice@example.com/res".to_string(),
            features: FeatureSet::default(),
            report: HandshakeReport::default(),
        };
        (Session::start(negotiated, liveness), server)
    }

    async fn read_some(server: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn extract_id(xml: &str) -> String {
        let start = xml.find("id=\"").unwrap() + 4;
        let end = xml[start..].find('"').unwrap() + start;
        xml[start..end].to_string()
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(SessionFailure::PingTimeout.to_string(), "ping timed out");
        assert_eq!(
            SessionFailure::ConnectionLost("eof".to_string()).to_string(),
            "connection lost: eof"
        );
    }

    #[tokio::test]
    async fn test_reply_routed_by_id() {
        let (session, mut server) = started().await;
        let (reply, cookie) = session
            .send_iq("example.com", IqType::Get, Element::ns("query", "jabber:iq:version"))
            .await
            .unwrap();

        let sent = read_some(&mut server).await;
        assert_eq!(extract_id(&sent), cookie.id());

        let answer = format!("<iq type='result' id='{}' from='example.com'/>", cookie.id());
        server.write_all(answer.as_bytes()).await.unwrap();
        let stanza = reply.await.unwrap();
        assert_eq!(stanza.as_iq().unwrap().kind, IqType::Result);
    }

    #[tokio::test]
    async fn test_other_stanzas_forwarded() {
        let (mut session, mut server) = started().await;
        server
            .write_all(b"<message from='bob@example.com'><body>hi</body></message>")
            .await
            .unwrap();
        match session.next_stanza().await.unwrap() {
            Stanza::Other(el) => assert_eq!(el.name(), "message"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let (_session, mut server) = started().await;
        server
            .write_all(b"<iq type='get' id='s1' from='example.com'><ping xmlns='urn:xmpp:ping'/></iq>")
            .await
            .unwrap();
        let answer = read_some(&mut server).await;
        assert_eq!(answer, r#"<iq to="example.com" type="result" id="s1"/>"#);
    }

    #[tokio::test]
    async fn test_unwritable_ping_answer_ends_session() {
        let liveness = LivenessConfig {
            keepalive_timeout: Duration::from_millis(100),
            ..LivenessConfig::disabled()
        };
        let (mut session, mut server) = started_with(64, liveness).await;
        // Fill the outbound pipe; the server never reads it
        session.send_raw(&" ".repeat(64)).await.unwrap();

        server
            .write_all(b"<iq type='get' id='s1' from='example.com'><ping xmlns='urn:xmpp:ping'/></iq>")
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), session.next_failure())
            .await
            .unwrap();
        match failure {
            Some(SessionFailure::ConnectionLost(reason)) => {
                assert!(reason.contains("server ping"), "{reason}")
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_abandoned_waiters_are_pruned() {
        let (session, mut server) = started().await;
        for _ in 0..3 {
            let (reply, _) = session
                .send_iq("example.com", IqType::Get, Element::ns("ping", NS_PING))
                .await
                .unwrap();
            drop(reply);
            read_some(&mut server).await;
        }
        assert_eq!(session.conn.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_forget_releases_waiter() {
        let (mut session, mut server) = started().await;
        let (mut reply, cookie) = session
            .send_iq("example.com", IqType::Get, Element::ns("ping", NS_PING))
            .await
            .unwrap();
        read_some(&mut server).await;

        session.forget(cookie);
        assert!(session.conn.pending().is_empty());
        assert!(reply.try_recv().is_err());

        let late = format!("<iq type='result' id='{}'/>", cookie.id());
        server.write_all(late.as_bytes()).await.unwrap();
        match session.next_stanza().await.unwrap() {
            Stanza::Iq(iq) => assert_eq!(iq.id, cookie.id()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_registration_request() {
        let (session, mut server) = started().await;
        let (_reply, cookie) = session.cancel_registration().await.unwrap();
        let sent = read_some(&mut server).await;
        assert_eq!(
            sent,
            format!(
                r#"<iq type="set" id="{}"><query xmlns="jabber:iq:register"><remove/></query></iq>"#,
                cookie.id()
            )
        );
    }

    #[tokio::test]
    async fn test_eof_drops_waiters_and_reports() {
        let (mut session, mut server) = started().await;
        let (reply, _) = session
            .send_iq("example.com", IqType::Get, Element::ns("ping", NS_PING))
            .await
            .unwrap();
        read_some(&mut server).await;
        drop(server);

        assert!(reply.await.is_err());
        assert!(matches!(
            session.next_failure().await,
            Some(SessionFailure::ConnectionLost(_))
        ));
        assert!(session.is_closed());
        assert!(matches!(
            session.send_raw(" ").await,
            Err(XmppError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_sends_stream_end() {
        let (session, mut server) = started().await;
        session.close().await.unwrap();
        let mut rest = String::new();
        server.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "</stream:stream>");
        assert!(session.is_closed());
    }
}
