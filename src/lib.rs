//! Server-side WebSockets framing core.
//!
//! This library implements the data plane of a WebSocket server following
//! the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455):
//! the opening handshake (with TLS ClientHello sniffing and the legacy
//! Flash policy fallback), an incremental frame decoder that turns the raw
//! client byte stream into unmasked payload, and the matching frame
//! encoder for the server-to-client direction.
//!
//! It is deliberately transport-agnostic: all wire I/O goes through the
//! [`transport::Transport`] trait, which the caller implements over a plain
//! socket, a TLS session, or anything else byte-shaped (a ready adapter
//! for `std::net::TcpStream` is provided). The decoder presents a blocking
//! `recv`-style call that internally drives a state machine across frames,
//! fragmentation and interleaved control frames, and preserves its state
//! exactly whenever the transport has nothing more to give.

pub mod config;
pub mod connection;
mod decoder;
mod encoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod transport;
