//! Transport binder: byte stream in, XML reader/writer pair out.

use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use super::tee::{TeeStream, TrafficLog};
use super::BoxedStream;
use crate::codec::{Element, Frame, XmlReader};
use crate::error::{Result, Stage, XmppError};

type Tee = TeeStream<BoxedStream>;

/// Read side of a bound transport.
pub type StreamReader = XmlReader<BufReader<ReadHalf<Tee>>>;

/// Write side of a bound transport.
pub type StreamWriter = WriteHalf<Tee>;

/// Bind a byte stream to an XML reader/writer pair, teeing traffic into
/// the configured log sinks.
pub fn bind(stream: BoxedStream, log: &TrafficLog) -> XmlStream {
    let (read, write) = tokio::io::split(TeeStream::new(stream, log.clone()));
    XmlStream {
        reader: XmlReader::new(BufReader::new(read)),
        writer: write,
    }
}

/// A transport bound to the XML codec.
///
/// Used directly by the handshake (one reader, one writer, no locking).
/// After the session is ready it is split with [`XmlStream::into_split`].
pub struct XmlStream {
    reader: StreamReader,
    writer: StreamWriter,
}

impl XmlStream {
    /// Write raw XML and flush.
    pub async fn send(&mut self, xml: &str) -> Result<()> {
        self.writer.write_all(xml.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Serialize and write an element.
    pub async fn send_element(&mut self, el: &Element) -> Result<()> {
        self.send(&el.to_xml()).await
    }

    /// Read the next frame.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        self.reader.next_frame().await
    }

    /// Read the next top-level element.
    pub async fn next_element(&mut self) -> Result<Element> {
        self.reader.next_element().await
    }

    /// Reset the parser for a new stream header on the same transport.
    pub fn restart(self) -> Self {
        Self {
            reader: self.reader.restart(),
            writer: self.writer,
        }
    }

    /// Release the raw byte stream, without log tee, for a transport upgrade.
    ///
    /// Fails if the peer already sent bytes past the last parsed element,
    /// since those would belong to the old transport.
    pub fn unbind(self) -> Result<BoxedStream> {
        if !self.reader.get_ref().buffer().is_empty() {
            return Err(XmppError::Protocol {
                stage: Stage::Encrypt,
                reason: "unexpected data before TLS handshake".to_string(),
            });
        }
        let read = self.reader.into_inner().into_inner();
        Ok(read.unsplit(self.writer).into_inner())
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (StreamReader, StreamWriter) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_send_and_receive() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut stream = bind(Box::new(client), &TrafficLog::default());

        stream
            .send_element(&Element::ns("starttls", "urn:ietf:params:xml:ns:xmpp-tls"))
            .await
            .unwrap();
        let mut got = vec![0u8; 64];
        let n = server.read(&mut got).await.unwrap();
        assert_eq!(
            &got[..n],
            br#"<starttls xmlns="urn:ietf:params:xml:ns:xmpp-tls"/>"#
        );

        server
            .write_all(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'><proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
            .await
            .unwrap();
        assert!(matches!(stream.next_frame().await.unwrap(), Frame::StreamOpen(_)));
        assert!(stream
            .next_element()
            .await
            .unwrap()
            .is("proceed", "urn:ietf:params:xml:ns:xmpp-tls"));
    }

    #[tokio::test]
    async fn test_send_writes_exact_bytes() {
        let mock = tokio_test::io::Builder::new()
            .write(b"<presence/>")
            .read(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'>")
            .build();
        let mut stream = bind(Box::new(mock), &TrafficLog::default());

        stream.send("<presence/>").await.unwrap();
        assert!(matches!(stream.next_frame().await.unwrap(), Frame::StreamOpen(_)));
    }

    #[tokio::test]
    async fn test_unbind_returns_working_stream() {
        let (client, mut server) = tokio::io::duplex(4096);
        let stream = bind(Box::new(client), &TrafficLog::default());

        let mut raw = stream.unbind().unwrap();
        raw.write_all(b"hello").await.unwrap();
        let mut got = [0u8; 5];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello");
    }
}
