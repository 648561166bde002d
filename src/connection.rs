use crate::config::FramingConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Error;
use crate::frame::Encoding;
use crate::handshake::Upgrade;
use crate::transport::Transport;

/// Per-connection framing context.
///
/// Owns the negotiated encoding and the embedded decoder and encoder
/// state; nothing here is shared between connections. The transport is
/// deliberately *not* stored: every read and write call takes it as an
/// argument, so the caller is free to swap the underlying byte stream
/// between calls. Dropping the connection releases all per-connection
/// state.
pub struct WSConnection {
    encoding: Encoding,
    decoder: Decoder,
    encoder: Encoder,
}

impl WSConnection {
    pub fn new(encoding: Encoding, config: &FramingConfig) -> Self {
        WSConnection {
            encoding,
            decoder: Decoder::new(config),
            encoder: Encoder::new(encoding, config),
        }
    }

    /// Builds the context for a connection that just finished its
    /// handshake.
    pub fn from_upgrade(upgrade: &Upgrade, config: &FramingConfig) -> Self {
        Self::new(upgrade.encoding, config)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// True while an incoming fragmented message is being reassembled.
    pub fn fragmentation_open(&self) -> bool {
        self.decoder.fragmentation_open()
    }

    /// Reads up to `dst.len()` bytes of decoded payload, like a blocking
    /// `recv`. See [`Error::kind`] for how to interpret failures; a
    /// `WouldBlock` simply means "retry once the transport is readable
    /// again" and is routine, since control frames produce no caller
    /// visible payload.
    pub fn read<T: Transport>(&mut self, transport: &mut T, dst: &mut [u8]) -> Result<usize, Error> {
        self.decoder.decode(transport, dst)
    }

    /// Frames `data` with the negotiated encoding and writes it out.
    pub fn write<T: Transport>(&mut self, transport: &mut T, data: &[u8]) -> Result<usize, Error> {
        self.encoder.encode(transport, data)
    }
}
