use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use crate::config::HANDSHAKE_PEEK_TIMEOUT;

/// The byte transport a connection runs on.
///
/// This is the seam between the framing core and the outside world: the
/// decoder and encoder only ever touch the wire through these methods, so
/// the caller stays free to hand in a plain socket, a TLS session, or an
/// in-memory script in tests. The contract follows `read(2)`/`write(2)`:
/// `Ok(0)` from `read` means the peer closed the connection in an orderly
/// way, and `WouldBlock`/`TimedOut` error kinds mean "nothing right now,
/// try again once readable".
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Looks at the next bytes without consuming them. Only used before the
    /// handshake, to pick between WebSockets, TLS and the Flash policy
    /// fallback; implementations should bound the wait to a short slice.
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Switches the transport to TLS after a ClientHello was sniffed.
    fn start_tls(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport has no TLS support",
        ))
    }

    /// Drives `write` until the whole buffer is on the wire.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport refused to accept more bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Whether an I/O error is the transport's way of saying "nothing right
/// now, try again once readable".
pub(crate) fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

enum TcpState {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
    // Transitional value while start_tls swaps the stream out.
    Poisoned,
}

/// [`Transport`] adapter for a `std::net::TcpStream`, with optional
/// server-side TLS.
///
/// Peeking on the plain socket uses `TcpStream::peek` under a 100 ms read
/// timeout; the socket is put back into blocking mode afterwards. Once TLS
/// is active the socket can no longer be peeked (only encrypted records are
/// visible there), so the adapter reads decrypted bytes into a small
/// lookahead stash and serves later reads from it first.
pub struct TcpTransport {
    state: TcpState,
    tls_config: Option<Arc<ServerConfig>>,
    lookahead: Vec<u8>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            state: TcpState::Plain(stream),
            tls_config: None,
            lookahead: Vec::new(),
        }
    }

    /// Like [`TcpTransport::new`], but able to upgrade to TLS when the
    /// handshake sniffs a ClientHello.
    pub fn with_tls(stream: TcpStream, config: Arc<ServerConfig>) -> Self {
        TcpTransport {
            state: TcpState::Plain(stream),
            tls_config: Some(config),
            lookahead: Vec::new(),
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.state {
            TcpState::Plain(stream) => stream.read(buf),
            TcpState::Tls(stream) => stream.read(buf),
            TcpState::Poisoned => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport lost during TLS setup",
            )),
        }
    }

    fn socket(&self) -> io::Result<&TcpStream> {
        match &self.state {
            TcpState::Plain(stream) => Ok(stream),
            TcpState::Tls(stream) => Ok(stream.get_ref()),
            TcpState::Poisoned => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport lost during TLS setup",
            )),
        }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Bytes pulled in by a post-TLS peek come out first, in wire order.
        if !self.lookahead.is_empty() {
            let n = self.lookahead.len().min(buf.len());
            buf[..n].copy_from_slice(&self.lookahead[..n]);
            self.lookahead.drain(..n);
            return Ok(n);
        }
        self.read_inner(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            TcpState::Plain(stream) => stream.write(buf),
            TcpState::Tls(stream) => stream.write(buf),
            TcpState::Poisoned => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport lost during TLS setup",
            )),
        }
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket()?.set_read_timeout(Some(HANDSHAKE_PEEK_TIMEOUT))?;
        let result = match &mut self.state {
            TcpState::Plain(stream) => stream.peek(buf),
            TcpState::Tls(_) => {
                // Decrypted bytes can't be un-read from the TLS session, so
                // stash whatever we pull in and replay it from read().
                while self.lookahead.len() < buf.len() {
                    let mut chunk = [0u8; 64];
                    match self.read_inner(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => self.lookahead.extend_from_slice(&chunk[..n]),
                        Err(e) if self.lookahead.is_empty() => {
                            self.socket()?.set_read_timeout(None)?;
                            return Err(e);
                        }
                        Err(_) => break,
                    }
                }
                let n = self.lookahead.len().min(buf.len());
                buf[..n].copy_from_slice(&self.lookahead[..n]);
                Ok(n)
            }
            TcpState::Poisoned => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport lost during TLS setup",
            )),
        };
        self.socket()?.set_read_timeout(None)?;
        result
    }

    fn start_tls(&mut self) -> io::Result<()> {
        let config = self.tls_config.clone().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "client sent a ClientHello but no TLS config was provided",
            )
        })?;

        match std::mem::replace(&mut self.state, TcpState::Poisoned) {
            TcpState::Plain(stream) => {
                let conn = ServerConnection::new(config)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                // The ClientHello is still unread in the socket; the TLS
                // handshake completes on the first read or write.
                self.state = TcpState::Tls(Box::new(StreamOwned::new(conn, stream)));
                Ok(())
            }
            other => {
                self.state = other;
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "TLS already active on this transport",
                ))
            }
        }
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(File::open(path)?))?.ok_or(io::Error::new(
        io::ErrorKind::InvalidInput,
        "no private key found".to_string(),
    ))
}

/// Builds a rustls server config from PEM certificate and key files, ready
/// to hand to [`TcpTransport::with_tls`].
pub fn load_tls_config(cert: &Path, key: &Path) -> io::Result<Arc<ServerConfig>> {
    let certs = load_certs(cert)?;
    let key = load_key(key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    Ok(Arc::new(config))
}
