use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) const RECORD_HEADER_LENGTH: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 1;
const EXTENSION_TYPE_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0;

#[derive(thiserror::Error, Debug)]
pub enum ClientHelloError {
    #[error("not a TLS handshake record")]
    NotAHandshakeRecord,
    #[error("not a ClientHello message")]
    NotAClientHello,
    #[error("truncated ClientHello")]
    Truncated,
    #[error("no extensions found")]
    NoExtensions,
    #[error("malformed server_name extension")]
    MalformedServerName,
    #[error("server name is not valid UTF-8")]
    InvalidServerName,
    #[error("SNI not found in ClientHello")]
    SniNotFound,
    #[error("failed to read TLS record: {0}")]
    Io(#[from] io::Error),
}

// One parsed inner ClientHello. `raw` holds the record exactly as it came off
// the wire (header plus body) for byte-identical replay to the upstream.
#[doc(hidden)]
#[derive(Debug)]
pub struct ClientHello {
    pub server_name: String,
    pub raw: Vec<u8>,
}

// Read exactly one TLS record from the stream and extract the SNI host name
// from the ClientHello it carries. See RFC 8446, section 4.1.2.
pub async fn read_client_hello<S>(stream: &mut S) -> Result<ClientHello, ClientHelloError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LENGTH];
    stream.read_exact(&mut header).await?;
    if header[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(ClientHelloError::NotAHandshakeRecord);
    }
    let record_length = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut raw = vec![0u8; RECORD_HEADER_LENGTH + record_length];
    raw[..RECORD_HEADER_LENGTH].copy_from_slice(&header);
    stream.read_exact(&mut raw[RECORD_HEADER_LENGTH..]).await?;
    let server_name = parse_server_name(&raw[RECORD_HEADER_LENGTH..])?;
    Ok(ClientHello { server_name, raw })
}

// Walk the handshake message inside the record body down to the server_name
// extension.
fn parse_server_name(record_body: &[u8]) -> Result<String, ClientHelloError> {
    let mut record = Cursor::new(record_body);
    if record.take_u8()? != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(ClientHelloError::NotAClientHello);
    }
    let mut hello = Cursor::new(record.take_u24_prefixed()?);
    // legacy_version and random.
    hello.skip(2)?;
    hello.skip(32)?;
    // legacy_session_id, cipher_suites, compression_methods.
    hello.take_u8_prefixed()?;
    hello.take_u16_prefixed()?;
    hello.take_u8_prefixed()?;
    if hello.is_empty() {
        return Err(ClientHelloError::NoExtensions);
    }
    let mut extensions = Cursor::new(hello.take_u16_prefixed()?);
    while !extensions.is_empty() {
        let extension_type = extensions.take_u16()?;
        let extension_data = extensions.take_u16_prefixed()?;
        if extension_type != EXTENSION_TYPE_SERVER_NAME {
            continue;
        }
        let mut extension = Cursor::new(extension_data);
        let mut name_list = Cursor::new(
            extension
                .take_u16_prefixed()
                .map_err(|_| ClientHelloError::MalformedServerName)?,
        );
        if name_list
            .take_u8()
            .map_err(|_| ClientHelloError::MalformedServerName)?
            != NAME_TYPE_HOST_NAME
        {
            return Err(ClientHelloError::MalformedServerName);
        }
        let host_name = name_list
            .take_u16_prefixed()
            .map_err(|_| ClientHelloError::MalformedServerName)?;
        if host_name.is_empty() {
            return Err(ClientHelloError::MalformedServerName);
        }
        return String::from_utf8(host_name.to_vec())
            .map_err(|_| ClientHelloError::InvalidServerName);
    }
    Err(ClientHelloError::SniNotFound)
}

// Byte cursor over a handshake body, in the style of length-prefixed TLS
// vectors. Every read fails with `Truncated` when the input runs out.
struct Cursor<'a> {
    buffer: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Cursor { buffer }
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], ClientHelloError> {
        if self.buffer.len() < length {
            return Err(ClientHelloError::Truncated);
        }
        let (taken, rest) = self.buffer.split_at(length);
        self.buffer = rest;
        Ok(taken)
    }

    fn skip(&mut self, length: usize) -> Result<(), ClientHelloError> {
        self.take(length).map(|_| ())
    }

    fn take_u8(&mut self) -> Result<u8, ClientHelloError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ClientHelloError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u8_prefixed(&mut self) -> Result<&'a [u8], ClientHelloError> {
        let length = self.take_u8()? as usize;
        self.take(length)
    }

    fn take_u16_prefixed(&mut self) -> Result<&'a [u8], ClientHelloError> {
        let length = self.take_u16()? as usize;
        self.take(length)
    }

    fn take_u24_prefixed(&mut self) -> Result<&'a [u8], ClientHelloError> {
        let bytes = self.take(3)?;
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        self.take(length)
    }
}

#[cfg(test)]
mod client_hello_tests {
    use std::sync::Arc;

    use tokio::io::duplex;
    use tokio_rustls::TlsConnector;

    use super::{ClientHello, ClientHelloError, read_client_hello};

    // Assemble a syntactically correct ClientHello record by hand, so that
    // length prefixes stay consistent across test cases.
    pub(crate) fn build_client_hello(server_name: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();
        match server_name {
            Some(name) => {
                let host = name.as_bytes();
                let mut extension_data = Vec::new();
                extension_data.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
                extension_data.push(0); // name_type = host_name
                extension_data.extend_from_slice(&(host.len() as u16).to_be_bytes());
                extension_data.extend_from_slice(host);
                extensions.extend_from_slice(&0u16.to_be_bytes()); // server_name
                extensions.extend_from_slice(&(extension_data.len() as u16).to_be_bytes());
                extensions.extend_from_slice(&extension_data);
            }
            None => {
                // A padding extension, so the extensions block is non-empty.
                extensions.extend_from_slice(&0x0015u16.to_be_bytes());
                extensions.extend_from_slice(&0u16.to_be_bytes());
            }
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // legacy_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // empty legacy_session_id
        body.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2b]); // one cipher suite
        body.extend_from_slice(&[0x01, 0x00]); // null compression
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut message = vec![1u8]; // ClientHello
        message.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        message.extend_from_slice(&body);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(message.len() as u16).to_be_bytes());
        record.extend_from_slice(&message);
        record
    }

    #[test_log::test(tokio::test)]
    async fn parses_server_name_and_preserves_raw_bytes() {
        let record = build_client_hello(Some("chat.signal.org"));
        let mut stream = record.as_slice();
        let ClientHello { server_name, raw } = read_client_hello(&mut stream).await.unwrap();
        assert_eq!(server_name, "chat.signal.org");
        assert_eq!(raw, record);
        // The parser consumes exactly one record.
        assert!(stream.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn parses_real_rustls_client_hello() {
        let client_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));
        let (mut server, client) = duplex(16_384);
        let handshake = tokio::spawn(async move {
            connector
                .connect("chat.signal.org".try_into().unwrap(), client)
                .await
        });
        let hello = read_client_hello(&mut server).await.unwrap();
        handshake.abort();
        assert_eq!(hello.server_name, "chat.signal.org");
        assert_eq!(&hello.raw[..1], &[0x16]);
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_non_handshake_record() {
        let mut stream = [0x17u8, 0x03, 0x01, 0x00, 0x01].as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::NotAHandshakeRecord)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_non_client_hello_message() {
        // ServerHello message type inside a handshake record.
        let mut record = build_client_hello(Some("chat.signal.org"));
        record[5] = 2;
        let mut stream = record.as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::NotAClientHello)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_missing_sni() {
        let record = build_client_hello(None);
        let mut stream = record.as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::SniNotFound)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_empty_stream() {
        let mut stream = [].as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::Io(_))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_truncated_record() {
        let mut record = build_client_hello(Some("chat.signal.org"));
        record.truncate(20);
        let mut stream = record.as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::Io(_))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_truncated_hello_body() {
        // A record whose body ends in the middle of the ClientHello walk.
        let mut record = vec![0x16, 0x03, 0x01, 0x00, 0x06];
        record.extend_from_slice(&[1, 0x00, 0x00, 0x02, 0x03, 0x03]);
        let mut stream = record.as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::Truncated)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn fails_on_invalid_name_type() {
        let mut record = build_client_hello(Some("chat.signal.org"));
        // Flip name_type from host_name (0) to an unassigned value.
        let name_type_offset = record.len() - "chat.signal.org".len() - 3;
        record[name_type_offset] = 1;
        let mut stream = record.as_slice();
        assert!(matches!(
            read_client_hello(&mut stream).await,
            Err(ClientHelloError::MalformedServerName)
        ));
    }
}
