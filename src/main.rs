use frame_flow::config::FramingConfig;
use frame_flow::connection::WSConnection;
use frame_flow::error::ErrorKind;
use frame_flow::handshake::{self, Negotiation};
use frame_flow::transport::TcpTransport;
use log::{error, info};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::thread;

/// Minimal echo server showing the intended wiring: accept, handshake,
/// then pump decoded payload straight back out through the encoder.
fn main() -> io::Result<()> {
    env_logger::init();

    let listener = TcpListener::bind("127.0.0.1:9000")?;
    info!("echo server listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || handle_connection(stream));
            }
            Err(e) => error!("failed to accept connection: {}", e),
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| String::from("<unknown>"));
    let mut transport = TcpTransport::new(stream);

    let upgrade = match handshake::accept(&mut transport) {
        Ok(Negotiation::Upgraded(upgrade)) => upgrade,
        Ok(Negotiation::Fallback) => {
            info!("{}: not a websocket client, dropping", peer);
            return;
        }
        Ok(Negotiation::PolicyServed) => return,
        Err(e) => {
            error!("{}: handshake failed: {}", peer, e);
            return;
        }
    };
    info!(
        "{}: upgraded, path {:?}, {:?} framing",
        peer, upgrade.path, upgrade.encoding
    );

    let config = FramingConfig::default();
    let mut connection = WSConnection::from_upgrade(&upgrade, &config);
    let mut buf = [0u8; 4096];
    loop {
        match connection.read(&mut transport, &mut buf) {
            Ok(0) => {
                info!("{}: transport closed", peer);
                break;
            }
            Ok(n) => {
                if let Err(e) = connection.write(&mut transport, &buf[..n]) {
                    error!("{}: write failed: {}", peer, e);
                    break;
                }
            }
            // Control frames and partial frames surface as WouldBlock; on a
            // blocking socket the next read call just waits for more bytes.
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                info!("{}: client sent close frame", peer);
                break;
            }
            Err(e) => {
                error!("{}: read failed: {}", peer, e);
                break;
            }
        }
    }
}
