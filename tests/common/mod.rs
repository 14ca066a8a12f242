// Assemble a syntactically correct TLS ClientHello record carrying the given
// SNI, keeping the length prefixes consistent.
pub fn build_client_hello(server_name: &str) -> Vec<u8> {
    let host = server_name.as_bytes();
    let mut extension_data = Vec::new();
    extension_data.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
    extension_data.push(0); // name_type = host_name
    extension_data.extend_from_slice(&(host.len() as u16).to_be_bytes());
    extension_data.extend_from_slice(host);

    let mut extensions = Vec::new();
    extensions.extend_from_slice(&0u16.to_be_bytes()); // server_name
    extensions.extend_from_slice(&(extension_data.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&extension_data);

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
