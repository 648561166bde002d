use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Coarse classification of an [`Error`], mirroring the errno-style codes
/// the original subsystem reported. Callers usually only care about this
/// level: retry on `WouldBlock`, drop the connection on `Protocol`, close
/// it cleanly on `ConnectionReset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not enough bytes to make progress; retry when the transport is
    /// readable again. Decoder state is preserved verbatim.
    WouldBlock,
    /// Malformed frame or handshake; the connection should be dropped.
    Protocol,
    /// The peer sent a complete CLOSE frame.
    ConnectionReset,
    /// Internal invariant violation; treat as fatal.
    Internal,
    /// Transport-forwarded I/O failure.
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("operation would block, retry when the transport is readable")]
    WouldBlock,

    #[error("peer sent a close frame")]
    ConnectionClosed,

    #[error("decoder state corrupted")]
    InternalState,

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("Handshake request larger than `{0}` bytes")]
    HandshakeTooLarge(usize),

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Origin header missing in the request")]
    NoOriginHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Client uses the Hixie handshake, which is no longer supported")]
    HixieNotSupported,

    #[error("Client asked for TLS but the transport has no TLS support")]
    TlsUnavailable,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Client frames must carry a mask key")]
    MissingMask,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Frame length not encoded in its minimal form")]
    NonMinimalLength,

    #[error("Max frame size reached")]
    MaxFrameSize,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WouldBlock => ErrorKind::WouldBlock,
            Error::ConnectionClosed => ErrorKind::ConnectionReset,
            Error::InternalState => ErrorKind::Internal,
            Error::RSVNotZero
            | Error::MissingMask
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::InvalidContinuationFrame
            | Error::NonMinimalLength
            | Error::MaxFrameSize => ErrorKind::Protocol,
            _ => ErrorKind::Io,
        }
    }
}
