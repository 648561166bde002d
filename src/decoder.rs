use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use log::{debug, info, warn};

use crate::config::FramingConfig;
use crate::error::Error;
use crate::frame::{self, FrameHeader, OpCode, MAX_HEADER_LEN};
use crate::transport::{would_block, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Initial state and between frames; header bytes are being collected.
    HeaderPending,
    /// Header parsed, payload still arriving from the wire.
    DataNeeded,
    /// Decoded payload is waiting to be copied out to the caller.
    DataAvailable,
    /// CLOSE opcode seen, waiting for its status/reason payload.
    CloseReasonPending,
    /// Transient: the frame was fully delivered, cleanup runs before the
    /// call returns.
    FrameComplete,
    /// Transient: protocol or internal failure, a full reset runs before
    /// the call returns.
    Failed,
}

/// The current frame, with the continuation opcode already resolved.
#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    fin: bool,
    /// The opcode as it appeared on the wire; control/continuation rules
    /// key off this one.
    raw_opcode: OpCode,
    /// The effective data opcode, with CONTINUATION substituted by the open
    /// series' opcode.
    opcode: OpCode,
    payload_len: u64,
    mask: [u8; 4],
    header_len: usize,
}

/// Incremental frame decoder.
///
/// Consumes bytes that arrive in arbitrary-sized chunks through the
/// injected transport and hands unmasked payload to a caller-supplied
/// buffer, emulating a blocking `recv`. All state lives in this struct so a
/// `WouldBlock` return preserves the decode position verbatim and the next
/// call picks up exactly where this one stopped.
pub(crate) struct Decoder {
    state: DecodeState,
    /// Scratch buffer holding one frame header plus one payload chunk.
    /// Frames larger than the buffer are streamed through it over several
    /// read cycles.
    buf: Box<[u8]>,
    /// Raw header bytes buffered at the head of `buf` while HeaderPending.
    header_done: usize,
    frame: Option<ActiveFrame>,
    /// The data opcode of the fragmentation series in progress, if any.
    /// Control frames pass through without touching it; any FIN data frame
    /// clears it.
    continuation: Option<OpCode>,
    /// Next free position for still-masked wire bytes.
    write_pos: usize,
    /// First byte that is still wearing the mask.
    unmask_pos: usize,
    /// Window of decoded payload ready for copy-out.
    read_pos: usize,
    read_len: usize,
    /// Payload bytes consumed from the wire, out of `frame.payload_len`.
    n_read_payload: u64,
    /// Bytes of the *next* frame that the greedy header fill already
    /// pulled in; relocated to the buffer head at frame cleanup.
    readahead: usize,
    /// Masked payload residue that did not fill a 4-byte mask stride,
    /// deferred so unmasking always starts word-aligned.
    carry: [u8; 3],
    carry_len: usize,
    max_frame_size: Option<u64>,
}

impl Decoder {
    pub fn new(config: &FramingConfig) -> Self {
        // Room for at least one full header, a little payload and the
        // reserved tail byte; anything smaller can't make progress.
        let size = config.decode_buf_size.max(2 * MAX_HEADER_LEN + 4);
        Decoder {
            state: DecodeState::HeaderPending,
            buf: vec![0u8; size].into_boxed_slice(),
            header_done: 0,
            frame: None,
            continuation: None,
            write_pos: 0,
            unmask_pos: 0,
            read_pos: 0,
            read_len: 0,
            n_read_payload: 0,
            readahead: 0,
            carry: [0u8; 3],
            carry_len: 0,
            max_frame_size: config.max_frame_size,
        }
    }

    /// Reads decoded payload into `dst`.
    ///
    /// Returns `Ok(n)` with `1 <= n <= dst.len()`, `Ok(0)` when the
    /// transport reported an orderly close, or an error classified by
    /// [`Error::kind`]: `WouldBlock` to retry once readable, `Protocol` on
    /// a malformed frame, `ConnectionReset` once a CLOSE frame has fully
    /// arrived, `Internal` if the decoder caught itself in an impossible
    /// window arithmetic, `Io` for transport failures.
    pub fn decode(
        &mut self,
        transport: &mut impl Transport,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        if dst.is_empty() {
            return Ok(0);
        }
        let result = self.drive(transport, dst);
        // The two transient states never survive a public call.
        match self.state {
            DecodeState::FrameComplete => self.end_frame(),
            DecodeState::Failed => self.reset_full(),
            _ => {}
        }
        result
    }

    /// True while a fragmented message is being reassembled.
    pub fn fragmentation_open(&self) -> bool {
        self.continuation.is_some()
    }

    fn drive(&mut self, transport: &mut impl Transport, dst: &mut [u8]) -> Result<usize, Error> {
        match self.state {
            DecodeState::HeaderPending => {
                if self.fill_header(transport)?.is_none() {
                    return Ok(0);
                }
                if !self.parse_header()? {
                    return Err(Error::WouldBlock);
                }
                if self.fill_and_decode(transport)?.is_none() {
                    return Ok(0);
                }
                self.copy_out(dst)
            }
            DecodeState::DataNeeded | DecodeState::CloseReasonPending => {
                if self.fill_and_decode(transport)?.is_none() {
                    return Ok(0);
                }
                self.copy_out(dst)
            }
            DecodeState::DataAvailable => self.copy_out(dst),
            DecodeState::FrameComplete | DecodeState::Failed => {
                self.state = DecodeState::Failed;
                Err(Error::InternalState)
            }
        }
    }

    /// Pulls header bytes. Greedy up to the 14-byte maximum: with small
    /// frames this over-reads into the payload (accounted to `write_pos`)
    /// and possibly into the next frame (accounted to `readahead`).
    ///
    /// `Ok(None)` reports an orderly transport close.
    fn fill_header(&mut self, transport: &mut impl Transport) -> Result<Option<()>, Error> {
        let want = MAX_HEADER_LEN - self.header_done;
        match transport.read(&mut self.buf[self.header_done..self.header_done + want]) {
            Ok(0) => {
                self.state = DecodeState::Failed;
                Ok(None)
            }
            Ok(n) => {
                self.header_done += n;
                Ok(Some(()))
            }
            // Bytes relocated from a previous frame's read-ahead may
            // already complete the header, so a dry read is not conclusive.
            Err(ref e) if would_block(e) => Ok(Some(())),
            Err(e) => {
                self.state = DecodeState::Failed;
                Err(e.into())
            }
        }
    }

    /// Parses the buffered header bytes. Returns `Ok(false)` while the
    /// header is still incomplete; on success the decoder has fallen
    /// through into the payload phase.
    fn parse_header(&mut self) -> Result<bool, Error> {
        let parsed = match FrameHeader::parse(&self.buf[..self.header_done]) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("dropping connection on malformed frame header: {}", e);
                self.state = DecodeState::Failed;
                return Err(e);
            }
        };

        if let Some(max) = self.max_frame_size {
            if parsed.payload_len > max {
                self.state = DecodeState::Failed;
                return Err(Error::MaxFrameSize);
            }
        }

        if let OpCode::Unknown(op) = parsed.opcode {
            // Reserved opcode: the frame is consumed like a control frame
            // and nothing reaches the caller.
            warn!("absorbing frame with unsupported opcode {:#x}", op);
        }

        let effective = match parsed.opcode {
            OpCode::Continue => match self.continuation {
                Some(opcode) => opcode,
                None => {
                    self.state = DecodeState::Failed;
                    return Err(Error::InvalidContinuationFrame);
                }
            },
            opcode @ (OpCode::Text | OpCode::Binary) if !parsed.fin => {
                // A fresh non-FIN data frame opens a series. If one was
                // already open this overwrites it; see DESIGN.md.
                self.continuation = Some(opcode);
                opcode
            }
            opcode => opcode,
        };

        // Everything buffered past the header is payload we already own,
        // and whatever exceeds this frame's payload belongs to the next
        // frame.
        let payload_have = (self.header_done - parsed.header_len) as u64;
        let in_frame = payload_have.min(parsed.payload_len);
        self.n_read_payload = in_frame;
        self.readahead = (payload_have - in_frame) as usize;
        self.read_pos = parsed.header_len;
        self.read_len = 0;
        self.unmask_pos = parsed.header_len;
        self.write_pos = parsed.header_len + in_frame as usize;

        self.state = if parsed.opcode == OpCode::Close {
            DecodeState::CloseReasonPending
        } else {
            DecodeState::DataNeeded
        };
        self.frame = Some(ActiveFrame {
            fin: parsed.fin,
            raw_opcode: parsed.opcode,
            opcode: effective,
            payload_len: parsed.payload_len,
            mask: parsed.mask,
            header_len: parsed.header_len,
        });
        Ok(true)
    }

    /// One read cycle: pull more payload, unmask it in place, and run the
    /// per-opcode handling. `Ok(None)` reports an orderly transport close.
    fn fill_and_decode(&mut self, transport: &mut impl Transport) -> Result<Option<()>, Error> {
        let frame = match self.frame {
            Some(frame) => frame,
            None => {
                self.state = DecodeState::Failed;
                return Err(Error::InternalState);
            }
        };

        if self.carry_len > 3 || (self.carry_len > 0 && self.write_pos != self.unmask_pos) {
            self.state = DecodeState::Failed;
            return Err(Error::InternalState);
        }

        // Re-seat the deferred mask residue in front of the fresh bytes, so
        // the masked run keeps starting on a 4-byte payload boundary.
        if self.carry_len > 0 {
            let end = self.write_pos + self.carry_len;
            self.buf[self.write_pos..end].copy_from_slice(&self.carry[..self.carry_len]);
            self.write_pos = end;
            self.carry_len = 0;
        }

        // The last buffer byte stays reserved; the original layout kept it
        // for the NUL that terminates Base64 text before decoding.
        let remaining = frame.payload_len - self.n_read_payload;
        let free = self.buf.len().saturating_sub(self.write_pos + 1);
        let next_read = remaining.min(free as u64) as usize;

        if next_read > 0 {
            match transport.read(&mut self.buf[self.write_pos..self.write_pos + next_read]) {
                Ok(0) => {
                    self.state = DecodeState::Failed;
                    return Ok(None);
                }
                Ok(n) => {
                    self.write_pos += n;
                    self.n_read_payload += n as u64;
                }
                // Bytes already in the buffer may still be waiting to be
                // unmasked, so don't give up just yet.
                Err(ref e) if would_block(e) => {}
                Err(e) => {
                    self.state = DecodeState::Failed;
                    return Err(e.into());
                }
            }
        }

        let complete = self.n_read_payload == frame.payload_len;
        let masked = match self.write_pos.checked_sub(self.unmask_pos) {
            Some(masked) => masked,
            None => {
                self.state = DecodeState::Failed;
                return Err(Error::InternalState);
            }
        };

        // Unmask in place: whole 32-bit strides on the fast path. The 1-3
        // byte remainder is either deferred to the next cycle or, when the
        // frame just completed, finished byte-wise.
        let processed = if complete {
            let region = &mut self.buf[self.unmask_pos..self.write_pos];
            let words = frame::unmask_words(region, frame.mask);
            frame::unmask_tail(&mut region[words..], frame.mask);
            masked
        } else {
            let words = frame::unmask_words(&mut self.buf[self.unmask_pos..self.write_pos], frame.mask);
            let residue = masked - words;
            if residue > 0 {
                self.carry[..residue]
                    .copy_from_slice(&self.buf[self.unmask_pos + words..self.write_pos]);
                self.carry_len = residue;
                self.write_pos -= residue;
            }
            words
        };
        self.unmask_pos += processed;

        match frame.opcode {
            OpCode::Binary => {
                self.read_len += processed;
            }
            OpCode::Text => {
                // Text frames carry Base64 in this subsystem. Decode the
                // freshly unmasked run in place; a failure is logged but not
                // fatal - the bytes are dropped and the caller just sees a
                // retry indication.
                if processed > 0 {
                    let run = &self.buf[self.unmask_pos - processed..self.unmask_pos];
                    match BASE64_STANDARD.decode(run) {
                        Ok(decoded) => {
                            let at = self.read_pos + self.read_len;
                            self.buf[at..at + decoded.len()].copy_from_slice(&decoded);
                            self.read_len += decoded.len();
                        }
                        Err(err) => {
                            warn!("discarding text frame payload, Base64 decode failed: {}", err);
                        }
                    }
                }
            }
            OpCode::Close => {
                if complete {
                    // Status code and UTF-8 reason are logged, never
                    // delivered upstream.
                    let reason = &self.buf[frame.header_len..self.unmask_pos];
                    if reason.len() >= 2 {
                        info!(
                            "peer sent close frame, status {} reason {:?}",
                            u16::from_be_bytes([reason[0], reason[1]]),
                            String::from_utf8_lossy(&reason[2..])
                        );
                    } else {
                        info!("peer sent close frame without a status code");
                    }
                    self.state = DecodeState::Failed;
                    return Err(Error::ConnectionClosed);
                }
            }
            OpCode::Ping | OpCode::Pong => {
                // Acknowledged implicitly: unmasked, never forwarded. A
                // higher layer may synthesise the PONG.
                debug!(
                    "absorbed {:?} control frame ({} payload bytes)",
                    frame.opcode, frame.payload_len
                );
            }
            OpCode::Unknown(_) => {
                // Already logged at header parse; the payload is consumed
                // and dropped.
            }
            OpCode::Continue => {
                // Substituted away during header parsing.
                self.state = DecodeState::Failed;
                return Err(Error::InternalState);
            }
        }

        Ok(Some(()))
    }

    /// Copies decoded payload out to the caller and decides the follow-up
    /// state. Previously buffered bytes always leave before newly decoded
    /// ones, simply because the window is contiguous and ordered.
    fn copy_out(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        let frame = match self.frame {
            Some(frame) => frame,
            None => {
                self.state = DecodeState::Failed;
                return Err(Error::InternalState);
            }
        };
        let complete = self.n_read_payload == frame.payload_len;

        let n = dst.len().min(self.read_len);
        if n > 0 {
            dst[..n].copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            self.read_len -= n;
        }

        if self.read_len > 0 {
            self.state = DecodeState::DataAvailable;
        } else if complete {
            self.state = DecodeState::FrameComplete;
        } else if self.state != DecodeState::CloseReasonPending {
            // Chunk drained but more of this frame is on the wire: rewind
            // the windows so the next cycle refills the payload area.
            // (A close reason is at most 125 bytes and accumulates in
            // place, so that state keeps its windows.)
            self.state = DecodeState::DataNeeded;
            self.read_pos = frame.header_len;
            self.write_pos = frame.header_len;
            self.unmask_pos = frame.header_len;
        }

        if n == 0 {
            // Nothing decoded yet (partial stride, control frame, or a
            // dropped Base64 run) - the caller waits for readability.
            return Err(Error::WouldBlock);
        }
        Ok(n)
    }

    /// Per-frame cleanup. A FIN data frame closes the fragmentation series;
    /// control frames and non-final fragments leave it untouched. Bytes of
    /// the next frame that the header fill already consumed move to the
    /// buffer head.
    fn end_frame(&mut self) {
        if let Some(frame) = self.frame.take() {
            // Only a data frame's FIN ends the series; control frames and
            // absorbed unknown-opcode frames pass through it untouched.
            if frame.fin && frame.raw_opcode.is_data() {
                self.continuation = None;
            }
            if self.readahead > 0 {
                let next = frame.header_len + frame.payload_len as usize;
                self.buf.copy_within(next..next + self.readahead, 0);
            }
        }
        self.header_done = self.readahead;
        self.readahead = 0;
        self.write_pos = 0;
        self.unmask_pos = 0;
        self.read_pos = 0;
        self.read_len = 0;
        self.n_read_payload = 0;
        self.carry_len = 0;
        self.state = DecodeState::HeaderPending;
    }

    /// Unconditional cleanup after a failure; the next call starts a fresh
    /// frame with no fragmentation context.
    fn reset_full(&mut self) {
        self.frame = None;
        self.continuation = None;
        self.readahead = 0;
        self.end_frame();
    }
}
