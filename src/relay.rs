use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

pub(crate) const UPSTREAM_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// Open the TCP connection to the Signal upstream.
pub async fn dial_upstream(address: &str) -> io::Result<TcpStream> {
    match timeout(UPSTREAM_DIAL_TIMEOUT, TcpStream::connect(address)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out dialing {address}"),
        )),
    }
}

// Replay the preserved ClientHello to the upstream, then copy bytes in both
// directions until each side has reached end-of-stream. An EOF in one
// direction half-closes the peer's write side while the opposite direction
// keeps running; an I/O error ends only the direction it occurred on.
pub async fn relay<C, U>(client: C, upstream: U, client_hello: &[u8]) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_reader, mut client_writer) = tokio::io::split(client);
    let (mut upstream_reader, mut upstream_writer) = tokio::io::split(upstream);
    upstream_writer.write_all(client_hello).await?;

    let client_to_upstream = async {
        match tokio::io::copy(&mut client_reader, &mut upstream_writer).await {
            Ok(bytes) => debug!(bytes, "Client reached end-of-stream."),
            Err(error) => debug!(%error, "Client to upstream copy ended."),
        }
        let _ = upstream_writer.shutdown().await;
    };
    let upstream_to_client = async {
        match tokio::io::copy(&mut upstream_reader, &mut client_writer).await {
            Ok(bytes) => debug!(bytes, "Upstream reached end-of-stream."),
            Err(error) => debug!(%error, "Upstream to client copy ended."),
        }
        let _ = client_writer.shutdown().await;
    };
    tokio::join!(client_to_upstream, upstream_to_client);
    Ok(())
}
