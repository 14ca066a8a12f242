use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

// How many bytes to inspect. Enough for the TLS handshake byte and for the
// longest HTTP method token plus the following space.
const SNIFF_PREFIX_LENGTH: usize = 8;

static HTTP_METHODS: &[&[u8]] = &[
    b"GET ", b"POST ", b"HEAD ", b"PUT ", b"DELETE ", b"OPTIONS ", b"PATCH ", b"CONNECT ",
];

// The protocol spoken by an incoming client, as far as its first bytes tell.
#[doc(hidden)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Nested TLS handshake from a Signal client.
    InnerTls,
    /// Clear-text HTTP request, usually a scanner probe.
    Http,
    /// Anything else.
    Unknown,
}

// Classify a peeked prefix of the stream.
pub fn classify(prefix: &[u8]) -> Protocol {
    match prefix.first() {
        // 0x16 is the TLS handshake record type.
        Some(&0x16) => Protocol::InnerTls,
        Some(_)
            if HTTP_METHODS
                .iter()
                .any(|method| prefix.starts_with(method)) =>
        {
            Protocol::Http
        }
        _ => Protocol::Unknown,
    }
}

// Read up to eight bytes from the stream and classify them. An EOF before
// eight bytes is not an error; classification happens on whatever was read.
// The consumed prefix is returned so it can be replayed with [`SniffedStream`].
pub async fn sniff<S>(stream: &mut S) -> io::Result<(Protocol, Bytes)>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; SNIFF_PREFIX_LENGTH];
    let mut length = 0;
    while length < SNIFF_PREFIX_LENGTH {
        let read = stream.read(&mut prefix[length..]).await?;
        if read == 0 {
            break;
        }
        length += read;
    }
    let prefix = Bytes::copy_from_slice(&prefix[..length]);
    Ok((classify(&prefix), prefix))
}

// Stream wrapper that serves the sniffed prefix before delegating to the
// underlying stream, so downstream readers see an untouched byte sequence.
#[doc(hidden)]
#[derive(Debug)]
pub struct SniffedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> SniffedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        SniffedStream { prefix, inner }
    }
}

impl<S> AsyncRead for SniffedStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let length = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..length]);
            this.prefix.advance(length);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for SniffedStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod sniff_tests {
    use tokio::io::AsyncReadExt;

    use super::{Protocol, SniffedStream, classify, sniff};

    #[test]
    fn classifies_tls_handshake() {
        assert_eq!(
            classify(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01]),
            Protocol::InnerTls
        );
        // A short prefix is still recognizable from the first byte.
        assert_eq!(classify(&[0x16, 0x03, 0x01]), Protocol::InnerTls);
    }

    #[test]
    fn classifies_http_methods() {
        for request in [
            "GET / HTTP/1.1\r\n",
            "POST /submit HTTP/1.1\r\n",
            "HEAD / HTTP/1.1\r\n",
            "PUT /x HTTP/1.1\r\n",
            "DELETE /x HTTP/1.1\r\n",
            "OPTIONS * HTTP/1.1\r\n",
            "PATCH /x HTTP/1.1\r\n",
            "CONNECT a:443 HTTP/1.1\r\n",
        ] {
            let prefix = &request.as_bytes()[..8];
            assert_eq!(classify(prefix), Protocol::Http, "{request:?}");
        }
    }

    #[test]
    fn classifies_unknown_input() {
        assert_eq!(
            classify(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]),
            Protocol::Unknown
        );
        assert_eq!(classify(b"FOO bar "), Protocol::Unknown);
        assert_eq!(classify(&[]), Protocol::Unknown);
        // A method token cut short by EOF is not recognizable.
        assert_eq!(classify(b"OPTI"), Protocol::Unknown);
    }

    #[test_log::test(tokio::test)]
    async fn sniffs_without_losing_bytes() {
        let payload = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (mut client, server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut client, payload)
            .await
            .unwrap();
        drop(client);
        let mut server = server;
        let (protocol, prefix) = sniff(&mut server).await.unwrap();
        assert_eq!(protocol, Protocol::Http);
        let mut stream = SniffedStream::new(prefix, server);
        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, payload);
    }

    #[test_log::test(tokio::test)]
    async fn sniffs_empty_stream_as_unknown() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);
        let mut server = server;
        let (protocol, prefix) = sniff(&mut server).await.unwrap();
        assert_eq!(protocol, Protocol::Unknown);
        assert!(prefix.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn sniffs_short_tls_prefix() {
        let (mut client, server) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0x16, 0x03])
            .await
            .unwrap();
        drop(client);
        let mut server = server;
        let (protocol, prefix) = sniff(&mut server).await.unwrap();
        assert_eq!(protocol, Protocol::InnerTls);
        assert_eq!(&prefix[..], &[0x16, 0x03]);
    }
}
