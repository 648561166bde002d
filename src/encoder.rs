use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use log::trace;

use crate::config::FramingConfig;
use crate::error::Error;
use crate::frame::{encode_header, Encoding, OpCode, MAX_SEND_HEADER_LEN};
use crate::transport::Transport;

/// Outgoing frame builder.
///
/// The counterpart of the decoder, but much lighter: outbound framing gets
/// to choose its own chunk sizes, so there is no partial-header state to
/// keep. Each chunk is staged (header plus payload) in the scratch buffer
/// and written out as one complete frame.
pub(crate) struct Encoder {
    encoding: Encoding,
    buf: Box<[u8]>,
    /// Payload bytes framed since the connection started.
    total_framed: u64,
}

impl Encoder {
    pub fn new(encoding: Encoding, config: &FramingConfig) -> Self {
        let size = config.encode_buf_size.max(MAX_SEND_HEADER_LEN + 12);
        Encoder {
            encoding,
            buf: vec![0u8; size].into_boxed_slice(),
            total_framed: 0,
        }
    }

    /// Frames `data` and writes it to the transport. Emits one frame per
    /// scratch-buffer-sized chunk, FIN set on every one of them - this core
    /// never sends fragmented messages. Returns the number of input bytes
    /// consumed, which is all of them unless the transport fails.
    pub fn encode(&mut self, transport: &mut impl Transport, data: &[u8]) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.encoding {
            Encoding::Binary => self.encode_binary(transport, data)?,
            Encoding::Base64 => self.encode_base64(transport, data)?,
        }
        self.total_framed += data.len() as u64;
        trace!(
            "framed {} payload bytes ({} on this connection so far)",
            data.len(),
            self.total_framed
        );
        Ok(data.len())
    }

    fn encode_binary(&mut self, transport: &mut impl Transport, data: &[u8]) -> Result<(), Error> {
        let max_chunk = self.buf.len() - MAX_SEND_HEADER_LEN;
        for chunk in data.chunks(max_chunk) {
            let header_len = encode_header(&mut self.buf, true, OpCode::Binary, chunk.len());
            self.buf[header_len..header_len + chunk.len()].copy_from_slice(chunk);
            transport.write_all(&self.buf[..header_len + chunk.len()])?;
        }
        Ok(())
    }

    fn encode_base64(&mut self, transport: &mut impl Transport, data: &[u8]) -> Result<(), Error> {
        // Chunk the input so its Base64 expansion fits the scratch buffer.
        // The chunk size is a multiple of the 3-byte quantum, so padding
        // only ever appears on the final frame of a call.
        let max_chunk = (self.buf.len() - MAX_SEND_HEADER_LEN) / 4 * 3;
        for chunk in data.chunks(max_chunk) {
            let encoded_len = chunk.len().div_ceil(3) * 4;
            let header_len = encode_header(&mut self.buf, true, OpCode::Text, encoded_len);
            let written = BASE64_STANDARD
                .encode_slice(chunk, &mut self.buf[header_len..])
                .map_err(|_| Error::InternalState)?;
            transport.write_all(&self.buf[..header_len + written])?;
        }
        Ok(())
    }
}
