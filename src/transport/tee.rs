//! Traffic tee for raw XML logging.

use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Plain write target receiving a copy of transport traffic.
pub type LogSink = Arc<Mutex<dyn Write + Send>>;

/// Optional log sinks for each direction.
#[derive(Clone, Default)]
pub struct TrafficLog {
    /// Receives bytes read from the server.
    pub inbound: Option<LogSink>,
    /// Receives bytes written to the server.
    pub outbound: Option<LogSink>,
}

impl TrafficLog {
    /// Log both directions to the same sink.
    pub fn both(sink: LogSink) -> Self {
        Self {
            inbound: Some(sink.clone()),
            outbound: Some(sink),
        }
    }

    /// Whether any direction is being logged.
    pub fn is_enabled(&self) -> bool {
        self.inbound.is_some() || self.outbound.is_some()
    }
}

impl std::fmt::Debug for TrafficLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficLog")
            .field("inbound", &self.inbound.is_some())
            .field("outbound", &self.outbound.is_some())
            .finish()
    }
}

fn copy_to(sink: Option<&LogSink>, bytes: &[u8]) {
    let Some(sink) = sink else { return };
    if bytes.is_empty() {
        return;
    }
    match sink.lock() {
        Ok(mut w) => {
            if let Err(e) = w.write_all(bytes) {
                tracing::warn!("Traffic log write failed: {}", e);
            }
        },
        Err(_) => tracing::warn!("Traffic log sink poisoned"),
    }
}

/// Stream wrapper copying every byte read or written to a [`TrafficLog`].
pub struct TeeStream<S> {
    inner: S,
    log: TrafficLog,
}

impl<S> TeeStream<S> {
    /// Wrap a stream.
    pub fn new(inner: S, log: TrafficLog) -> Self {
        Self { inner, log }
    }

    /// Unwrap, dropping the sinks.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TeeStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            copy_to(this.log.inbound.as_ref(), &buf.filled()[before..]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TeeStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            copy_to(this.log.outbound.as_ref(), &buf[..n]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
