use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use color_eyre::eyre::Context;
use http::{
    Response, StatusCode,
    header::{HOST, LOCATION},
};
use http_body_util::Full;
use hyper::{Request, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown};
use rustls_acme::acme::ACME_TLS_ALPN_NAME;
use tokio::{fs, io::AsyncWriteExt, net::TcpListener, pin, time::timeout};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    acme::CertificateManager,
    config::ApplicationConfig,
    droppable_handle::DroppableHandle,
    handler::{ProxyData, handle_connection},
};

const HTTP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

// Main entrypoint of the application.
pub async fn entrypoint(config: ApplicationConfig) -> color_eyre::Result<()> {
    info!("Starting Signal TLS proxy...");
    // Fail fast on an invalid stealth configuration, before any listener is
    // opened.
    let proxy_url = config.stealth_proxy_url()?;
    let proxy_data = Arc::new(ProxyData {
        stealth_mode: config.stealth_mode,
        proxy_url,
    });

    // Initialize crypto and the certificate manager.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    fs::create_dir_all(config.certificate_cache_directory.as_path())
        .await
        .with_context(|| "Error creating certificate cache directory")?;
    let certificates = Arc::new(CertificateManager::new(
        config.domain.clone(),
        config.certificate_cache_directory.clone(),
        config.acme_contact_email.clone(),
        !config.acme_use_staging,
    ));

    // HTTP server, pointing ACME probes and stray visitors at the TLS origin.
    let http_listener = TcpListener::bind((config.listen_address, config.http_port.into()))
        .await
        .with_context(|| "Error listening to HTTP port")?;
    info!(
        "Listening for HTTP connections on port {}.",
        config.http_port
    );
    let shutdown_token = CancellationToken::new();
    let mut join_handle_http = DroppableHandle(tokio::spawn(challenge_server(
        http_listener,
        config.domain.clone(),
        shutdown_token.clone(),
    )));

    // TLS listener, with per-connection certificate selection deferred to
    // the certificate manager.
    let https_listener = TcpListener::bind((config.listen_address, config.https_port.into()))
        .await
        .with_context(|| "Error listening to HTTPS port")?;
    info!(
        "Listening for TLS connections on port {}.",
        config.https_port
    );
    let acceptor = TlsAcceptor::from(certificates.server_config());

    info!(
        "Signal TLS proxy for domain '{}' is now running.",
        config.domain
    );
    // Add OS signal handlers for termination.
    let signal_handler = wait_for_signal();
    pin!(signal_handler);
    loop {
        tokio::select! {
            conn = https_listener.accept() => {
                let (stream, address) = match conn {
                    Ok(conn) => conn,
                    Err(error) => {
                        error!(%error, "Unable to accept TLS connection.");
                        continue;
                    }
                };
                if let Err(error) = stream.set_nodelay(true) {
                    warn!(%error, %address, "Error setting nodelay.");
                }
                let acceptor = acceptor.clone();
                let proxy_data = Arc::clone(&proxy_data);
                tokio::spawn(async move {
                    let mut tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(error) => {
                            debug!(%error, %address, "Error establishing TLS connection.");
                            return;
                        }
                    };
                    // A handshake that negotiated the ACME challenge protocol
                    // carries no application data.
                    if tls_stream.get_ref().1.alpn_protocol() == Some(ACME_TLS_ALPN_NAME) {
                        debug!(%address, "Completed TLS-ALPN-01 challenge handshake.");
                        let _ = tls_stream.shutdown().await;
                        return;
                    }
                    handle_connection(tls_stream, address, proxy_data).await;
                });
            }
            _ = &mut signal_handler => break,
        }
    }
    info!("Signal TLS proxy is shutting down.");
    // Stop accepting TLS connections, then drain the HTTP server.
    drop(https_listener);
    shutdown_token.cancel();
    let _ = (&mut join_handle_http.0).await;
    info!("Signal TLS proxy shut down gracefully.");
    Ok(())
}

// Serve plain HTTP until cancelled, then drain in-flight connections for up
// to 30 seconds.
async fn challenge_server(listener: TcpListener, domain: String, shutdown: CancellationToken) {
    let graceful = GracefulShutdown::new();
    loop {
        tokio::select! {
            conn = listener.accept() => {
                let (stream, address) = match conn {
                    Ok(conn) => conn,
                    Err(error) => {
                        error!(%error, "Unable to accept HTTP connection.");
                        break;
                    }
                };
                let domain = domain.clone();
                let service = service_fn(move |request: Request<Incoming>| {
                    let domain = domain.clone();
                    async move { redirect_to_https(&request, &domain) }
                });
                let connection = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service);
                let connection = graceful.watch(connection);
                tokio::spawn(async move {
                    if let Err(error) = connection.await {
                        debug!(%error, %address, "Error serving HTTP connection.");
                    }
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }
    if timeout(HTTP_SHUTDOWN_TIMEOUT, graceful.shutdown())
        .await
        .is_err()
    {
        warn!("Timed out waiting for HTTP connections to drain.");
    }
    info!("HTTP server stopped.");
}

// All plain-HTTP traffic, ACME probes included, is pointed at the TLS
// origin; certificate validation itself completes over TLS-ALPN.
fn redirect_to_https(
    request: &Request<Incoming>,
    domain: &str,
) -> Result<Response<Full<Bytes>>, http::Error> {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or(host))
        .unwrap_or(domain);
    let path = request
        .uri()
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, format!("https://{host}{path}"))
        .body(Full::new(Bytes::from_static(b"Found")))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut signal_terminate = signal(SignalKind::terminate()).unwrap();
    let mut signal_interrupt = signal(SignalKind::interrupt()).unwrap();

    tokio::select! {
        _ = signal_terminate.recv() => debug!("Received SIGTERM."),
        _ = signal_interrupt.recv() => debug!("Received SIGINT."),
    };
}

#[cfg(windows)]
async fn wait_for_signal() {
    use tokio::signal::windows;

    let mut signal_c = windows::ctrl_c().unwrap();
    let mut signal_break = windows::ctrl_break().unwrap();
    let mut signal_close = windows::ctrl_close().unwrap();
    let mut signal_shutdown = windows::ctrl_shutdown().unwrap();

    tokio::select! {
        _ = signal_c.recv() => debug!("Received CTRL_C."),
        _ = signal_break.recv() => debug!("Received CTRL_BREAK."),
        _ = signal_close.recv() => debug!("Received CTRL_CLOSE."),
        _ = signal_shutdown.recv() => debug!("Received CTRL_SHUTDOWN."),
    };
}
