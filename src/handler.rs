use std::{net::SocketAddr, sync::Arc};

use hyper::Uri;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
    client_hello::read_client_hello,
    config::StealthMode,
    forward,
    relay::{dial_upstream, relay},
    sniff::{Protocol, SniffedStream, sniff},
    stealth, upstream,
};

// Immutable process-wide data shared by every connection task.
#[doc(hidden)]
#[derive(Debug)]
pub struct ProxyData {
    pub stealth_mode: StealthMode,
    pub proxy_url: Option<Uri>,
}

// Per-connection pipeline, running on the decrypted outer stream: sniff the
// first bytes, then either relay Signal traffic upstream or present the
// decoy. Every branch ends with the connection closed.
pub async fn handle_connection<S>(mut stream: S, address: SocketAddr, proxy_data: Arc<ProxyData>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (protocol, prefix) = match sniff(&mut stream).await {
        Ok(sniffed) => sniffed,
        Err(error) => {
            debug!(%error, %address, "Error sniffing protocol.");
            return;
        }
    };
    let stream = SniffedStream::new(prefix, stream);
    match protocol {
        Protocol::InnerTls => handle_signal_client(stream, address).await,
        Protocol::Http => handle_probe(stream, address, &proxy_data).await,
        Protocol::Unknown => {
            info!(%address, "Unknown protocol, closing connection.");
        }
    }
}

// The Signal path: extract the inner SNI, check it against the routing
// table, then turn into a dumb byte pipe.
async fn handle_signal_client<S>(mut stream: SniffedStream<S>, address: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let hello = match read_client_hello(&mut stream).await {
        Ok(hello) => hello,
        Err(error) => {
            info!(%error, %address, "Failed to read inner ClientHello.");
            return;
        }
    };
    let Some(upstream_address) = upstream::resolve(&hello.server_name) else {
        info!(
            server_name = %hello.server_name,
            %address,
            "Denied connection for unknown inner SNI."
        );
        return;
    };
    let upstream_connection = match dial_upstream(upstream_address).await {
        Ok(connection) => connection,
        Err(error) => {
            warn!(%error, upstream = %upstream_address, "Failed to connect to upstream.");
            return;
        }
    };
    info!(
        server_name = %hello.server_name,
        %address,
        upstream = %upstream_address,
        "Proxying Signal traffic."
    );
    if let Err(error) = relay(stream, upstream_connection, &hello.raw).await {
        debug!(%error, %address, "Relay ended with error.");
    }
    debug!(%address, "Connection closed.");
}

// The camouflage path for plain HTTP probes.
async fn handle_probe<S>(mut stream: SniffedStream<S>, address: SocketAddr, proxy_data: &ProxyData)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    match proxy_data.stealth_mode {
        StealthMode::Nginx => {
            info!(%address, "Serving fake Nginx page.");
            respond(&mut stream, &stealth::nginx_response(), address).await;
        }
        StealthMode::Apache => {
            info!(%address, "Serving fake Apache page.");
            respond(&mut stream, &stealth::apache_response(), address).await;
        }
        StealthMode::Proxy => {
            let Some(proxy_url) = proxy_data.proxy_url.as_ref() else {
                // Unreachable after startup validation.
                debug!(%address, "No disguise target configured, closing connection.");
                return;
            };
            info!(%address, "Forwarding probe to disguise target.");
            forward::forward_request(stream, proxy_url).await;
        }
        StealthMode::None => {
            debug!(%address, "Closing unrecognized connection.");
        }
    }
}

async fn respond<S>(stream: &mut S, response: &[u8], address: SocketAddr)
where
    S: AsyncWrite + Unpin,
{
    if let Err(error) = stream.write_all(response).await {
        debug!(%error, %address, "Error writing stealth response.");
        return;
    }
    let _ = stream.shutdown().await;
}
