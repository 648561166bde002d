use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::BytesMut;
use log::{debug, error, info};
use sha1::{Digest, Sha1};
use std::io;

use crate::config::MAX_HANDSHAKE_SIZE;
use crate::error::Error;
use crate::frame::Encoding;
use crate::transport::{would_block, Transport};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HTTP_ACCEPT_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Accept: {}\r\n";

/// Fixed answer to a legacy Flash cross-domain policy probe.
const POLICY_RESPONSE: &[u8] =
    b"<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\" /></cross-domain-policy>\n";

const HTTP_REQUEST_DELIMITER: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

/// A successfully negotiated upgrade.
#[derive(Debug, Clone)]
pub struct Upgrade {
    pub encoding: Encoding,
    /// The request-line path, between `GET ` and ` HTTP/1.1`.
    pub path: String,
    pub scheme: Scheme,
    /// The client's `Sec-WebSocket-Version`.
    pub version: u16,
}

/// What the pre-handshake probe decided to do with the connection.
#[derive(Debug)]
pub enum Negotiation {
    /// The 101 response went out; the connection now speaks frames.
    Upgraded(Upgrade),
    /// Nothing arrived within the peek slice. No bytes were consumed, so
    /// the caller can carry on with its fallback protocol.
    Fallback,
    /// The client was a Flash policy probe; the policy XML went out and the
    /// connection should be closed.
    PolicyServed,
}

/// Performs the server side of the opening handshake.
///
/// Peeks at the first bytes to tell WebSockets traffic apart from TLS and
/// from legacy Flash policy probes, then reads the upgrade request (at most
/// [`MAX_HANDSHAKE_SIZE`] bytes), validates it, and answers with the 101
/// response. On any failure the request bytes are already consumed and the
/// connection is of no further use to the caller.
pub fn accept(transport: &mut impl Transport) -> Result<Negotiation, Error> {
    let mut probe = [0u8; 4];
    let mut scheme = Scheme::Ws;

    let mut n = match transport.peek(&mut probe) {
        Ok(n) => n,
        Err(ref e) if would_block(e) => return Ok(Negotiation::Fallback),
        Err(e) => return Err(e.into()),
    };
    if n == 0 {
        return Err(Error::IncompleteHTTPRequest);
    }

    if probe[0] == b'<' {
        // Flash policy probe. Answer it and tell the caller to hang up.
        transport.write_all(POLICY_RESPONSE)?;
        info!("served Flash cross-domain policy to a policy probe");
        return Ok(Negotiation::PolicyServed);
    }

    if probe[0] == 0x16 || probe[0] == 0x80 {
        // A TLS ClientHello. Switch the transport over and peek again, this
        // time at the decrypted stream.
        transport.start_tls().map_err(|e| {
            if e.kind() == io::ErrorKind::Unsupported {
                Error::TlsUnavailable
            } else {
                Error::from(e)
            }
        })?;
        scheme = Scheme::Wss;
        n = transport.peek(&mut probe).map_err(Error::from)?;
    }

    if n < 4 {
        // Too little to classify. Before TLS this is indistinguishable from
        // a slow non-WebSocket client, so hand the connection back.
        return match scheme {
            Scheme::Ws => Ok(Negotiation::Fallback),
            Scheme::Wss => Err(Error::IncompleteHTTPRequest),
        };
    }
    if &probe[..4] != b"GET " {
        return Err(Error::InvalidHTTPHandshake);
    }

    let raw = read_request(transport)?;
    let request = parse_request(&raw)?;

    let accept_value = generate_websocket_accept_value(&request.key);
    let mut response = HTTP_ACCEPT_RESPONSE.replace("{}", &accept_value);
    if let Some(protocol) = request.echo_protocol {
        response.push_str("Sec-WebSocket-Protocol: ");
        response.push_str(protocol);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    transport.write_all(response.as_bytes())?;

    debug!(
        "handshake complete: path {:?}, {:?} framing, version {}",
        request.path, request.encoding, request.version
    );

    Ok(Negotiation::Upgraded(Upgrade {
        encoding: request.encoding,
        path: request.path,
        scheme,
        version: request.version,
    }))
}

struct ParsedRequest {
    path: String,
    key: String,
    version: u16,
    encoding: Encoding,
    echo_protocol: Option<&'static str>,
}

/// Reads the upgrade request up to and including the blank line.
///
/// Bytes are pulled one at a time: frame data follows immediately after the
/// blank line once the response goes out, and a buffered over-read here
/// would steal bytes from the decoder.
fn read_request(transport: &mut impl Transport) -> Result<BytesMut, Error> {
    let mut raw = BytesMut::with_capacity(1024);
    let mut byte = [0u8; 1];
    loop {
        if raw.len() >= MAX_HANDSHAKE_SIZE {
            return Err(Error::HandshakeTooLarge(MAX_HANDSHAKE_SIZE));
        }
        match transport.read(&mut byte) {
            Ok(0) => return Err(Error::IncompleteHTTPRequest),
            Ok(_) => raw.extend_from_slice(&byte),
            Err(ref e) if would_block(e) => return Err(Error::WouldBlock),
            Err(e) => return Err(e.into()),
        }
        if raw.ends_with(HTTP_REQUEST_DELIMITER) {
            return Ok(raw);
        }
    }
}

fn parse_request(raw: &[u8]) -> Result<ParsedRequest, Error> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);
    if request.parse(raw)?.is_partial() {
        return Err(Error::IncompleteHTTPRequest);
    }
    if request.method != Some("GET") || request.version != Some(1) {
        return Err(Error::InvalidHTTPHandshake);
    }
    let path = request.path.unwrap_or("/").to_string();

    let mut host = false;
    let mut origin = false;
    let mut key = None;
    let mut version: Option<u16> = None;
    let mut protocols = String::new();

    // Header names are matched case-insensitively; values are taken as
    // opaque trimmed strings.
    for header in request.headers.iter() {
        let name = header.name;
        if name.eq_ignore_ascii_case("Host") {
            host = true;
        } else if name.eq_ignore_ascii_case("Origin") || name.eq_ignore_ascii_case("Sec-WebSocket-Origin")
        {
            origin = true;
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            key = Some(String::from_utf8_lossy(header.value).trim().to_string());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            version = String::from_utf8_lossy(header.value).trim().parse().ok();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            protocols = String::from_utf8_lossy(header.value).to_string();
        }
    }

    if !host {
        return Err(Error::NoHostHeaderPresent);
    }
    if !origin {
        return Err(Error::NoOriginHeaderPresent);
    }
    let key = key.ok_or(Error::NoSecWebsocketKey)?;

    // A missing or zero version means the old Hixie drafts, which this
    // implementation rejects outright.
    let version = match version {
        Some(v) if v > 0 => v,
        _ => {
            error!("client handshake uses the Hixie draft, no longer supported");
            return Err(Error::HixieNotSupported);
        }
    };

    // Sub-protocol selection: binary framing whenever the client offers it,
    // legacy Base64 text framing otherwise. The chosen protocol is echoed
    // back, except when the client offered neither.
    let (encoding, echo_protocol) = if protocols.contains("binary") {
        (Encoding::Binary, Some("binary"))
    } else if protocols.contains("base64") {
        (Encoding::Base64, Some("base64"))
    } else {
        (Encoding::Base64, None)
    };

    Ok(ParsedRequest {
        path,
        key,
        version,
        encoding,
        echo_protocol,
    })
}

fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}
