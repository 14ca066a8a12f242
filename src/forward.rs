use std::{io, sync::Arc};

use bytes::Bytes;
use color_eyre::eyre::{Result, eyre};
use http::{
    HeaderMap, Method, StatusCode, Uri,
    header::{CONNECTION, CONTENT_LENGTH, HOST, HeaderName, HeaderValue, LOCATION, TRANSFER_ENCODING, UPGRADE},
    uri::PathAndQuery,
};
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use rustls_platform_verifier::ConfigVerifierExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::droppable_handle::DroppableHandle;

const MAX_HEADER_SIZE: usize = 8_192;
const MAX_BODY_SIZE: usize = 1_048_576;
// http.DefaultClient stops after ten consecutive redirects; scanners expect
// the same depth from a disguise target.
const MAX_REDIRECTS: usize = 10;

static BAD_GATEWAY_RESPONSE: &[u8] = b"HTTP/1.0 502 Bad Gateway\r\nConnection: close\r\n\r\n";
static INTERNAL_ERROR_RESPONSE: &[u8] =
    b"HTTP/1.0 500 Internal Server Error\r\nConnection: close\r\n\r\n";

// One HTTP request read off the client connection.
struct ClientRequest {
    method: Method,
    headers: HeaderMap,
    body: Bytes,
}

// The disguise target's reply, fully collected so it can be reframed with a
// correct Content-Length towards the client.
struct CollectedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

// Read one HTTP request from the client, replay it against the configured
// disguise target, and pipe the result back. The client always gets a
// complete response or a canned gateway error, never silence.
pub async fn forward_request<S>(mut stream: S, proxy_url: &Uri)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(error) => {
            debug!(%error, "Error reading request from client.");
            return;
        }
    };
    let outbound = match build_outbound(proxy_url, request) {
        Ok(outbound) => outbound,
        Err(error) => {
            warn!(%error, "Error building disguise request.");
            let _ = stream.write_all(INTERNAL_ERROR_RESPONSE).await;
            return;
        }
    };
    match perform(proxy_url.clone(), outbound).await {
        Ok(response) => {
            if let Err(error) = write_response(&mut stream, response).await {
                debug!(%error, "Error writing disguise response to client.");
            }
        }
        Err(error) => {
            warn!(%error, url = %proxy_url, "Error forwarding request to disguise target.");
            let _ = stream.write_all(BAD_GATEWAY_RESPONSE).await;
        }
    }
}

// Read the request head with httparse, then as much body as Content-Length
// announces. Ok(None) means the client went away before sending a full head.
async fn read_request<S>(stream: &mut S) -> io::Result<Option<ClientRequest>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; MAX_HEADER_SIZE];
    let mut filled = 0;
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buffer[..filled]) {
            Ok(httparse::Status::Complete(head_length)) => {
                let method: Method = request
                    .method
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid method"))?;
                let mut header_map = HeaderMap::new();
                for header in request.headers.iter().filter(|header| !header.name.is_empty()) {
                    if let (Ok(name), Ok(value)) = (
                        header.name.parse::<HeaderName>(),
                        HeaderValue::from_bytes(header.value),
                    ) {
                        header_map.append(name, value);
                    }
                }
                let content_length = header_map
                    .get(CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(0);
                if content_length > MAX_BODY_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "request body too large",
                    ));
                }
                let mut body = buffer[head_length..filled].to_vec();
                while body.len() < content_length {
                    let mut chunk = vec![0u8; content_length - body.len()];
                    let read = stream.read(&mut chunk).await?;
                    if read == 0 {
                        return Ok(None);
                    }
                    body.extend_from_slice(&chunk[..read]);
                }
                body.truncate(content_length);
                return Ok(Some(ClientRequest {
                    method,
                    headers: header_map,
                    body: body.into(),
                }));
            }
            Ok(httparse::Status::Partial) => {
                if filled >= MAX_HEADER_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "request head too large",
                    ));
                }
                let read = stream.read(&mut buffer[filled..]).await?;
                if read == 0 {
                    return Ok(None);
                }
                filled += read;
            }
            Err(error) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, error));
            }
        }
    }
}

// Rewrite the client's request so it targets the disguise URL: same method,
// same headers minus the hop-by-hop set, same body.
fn build_outbound(proxy_url: &Uri, request: ClientRequest) -> Result<ClientRequest> {
    proxy_url
        .authority()
        .ok_or_else(|| eyre!("disguise URL has no authority"))?;
    let mut headers = request.headers;
    for name in [
        HOST,
        CONNECTION,
        CONTENT_LENGTH,
        TRANSFER_ENCODING,
        UPGRADE,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
    ] {
        headers.remove(name);
    }
    Ok(ClientRequest {
        method: request.method,
        headers,
        body: request.body,
    })
}

// Issue the request, chasing up to MAX_REDIRECTS redirects the way a stock
// HTTP client would: 301/302/303 downgrade to GET, 307/308 keep the method.
async fn perform(mut url: Uri, mut request: ClientRequest) -> Result<CollectedResponse> {
    for _ in 0..=MAX_REDIRECTS {
        let response = send_once(&url, &request).await?;
        if response.status.is_redirection() {
            if let Some(location) = response.headers.get(LOCATION) {
                url = resolve_location(&url, location)?;
                if matches!(
                    response.status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
                ) {
                    request.method = Method::GET;
                    request.body = Bytes::new();
                }
                continue;
            }
        }
        return Ok(response);
    }
    Err(eyre!("stopped after {MAX_REDIRECTS} redirects"))
}

// Dial the target and exchange one request over a fresh HTTP/1.1 connection,
// with TLS validated against the platform's root store for https targets.
async fn send_once(url: &Uri, request: &ClientRequest) -> Result<CollectedResponse> {
    let host = url.host().ok_or_else(|| eyre!("disguise URL has no host"))?;
    let is_https = url.scheme_str() == Some("https");
    let port = url.port_u16().unwrap_or(if is_https { 443 } else { 80 });

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(
            url.path_and_query()
                .map(PathAndQuery::as_str)
                .unwrap_or("/"),
        )
        .header(
            HOST,
            url.authority()
                .ok_or_else(|| eyre!("disguise URL has no authority"))?
                .as_str(),
        );
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    let outbound = builder.body(Full::new(request.body.clone()))?;

    let tcp_stream = TcpStream::connect((host, port)).await?;
    if is_https {
        let tls_config = Arc::new(ClientConfig::with_platform_verifier());
        let server_name = ServerName::try_from(host.to_string())?;
        let tls_stream = TlsConnector::from(tls_config)
            .connect(server_name, tcp_stream)
            .await?;
        exchange(tls_stream, outbound).await
    } else {
        exchange(tcp_stream, outbound).await
    }
}

async fn exchange<T>(io: T, request: Request<Full<Bytes>>) -> Result<CollectedResponse>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    let _driver = DroppableHandle(tokio::spawn(async move {
        let _ = connection.await;
    }));
    let response = sender.send_request(request).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(CollectedResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

fn resolve_location(base: &Uri, location: &HeaderValue) -> Result<Uri> {
    let location = location.to_str()?;
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.parse()?);
    }
    if location.starts_with('/') {
        let mut parts = base.clone().into_parts();
        parts.path_and_query = Some(location.parse::<PathAndQuery>()?);
        return Ok(Uri::from_parts(parts)?);
    }
    Err(eyre!("unsupported redirect location {location}"))
}

// Reframe the collected response towards the client. The body was collected
// in full, so chunked encoding from the target becomes a plain
// Content-Length response.
async fn write_response<S>(stream: &mut S, response: CollectedResponse) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers.iter() {
        if [&CONNECTION, &TRANSFER_ENCODING, &CONTENT_LENGTH].contains(&name) {
            continue;
        }
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(&String::from_utf8_lossy(value.as_bytes()));
        head.push_str("\r\n");
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}
