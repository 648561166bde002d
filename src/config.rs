use std::time::Duration;

/// Upper bound on a client's upgrade request. Anything longer is treated as
/// hostile and the handshake fails.
pub const MAX_HANDSHAKE_SIZE: usize = 4096;

/// How long the pre-handshake peek waits for the client's first bytes
/// before the connection is handed back to the caller's fallback protocol.
pub const HANDSHAKE_PEEK_TIMEOUT: Duration = Duration::from_millis(100);

/// Default scratch buffer size for both directions. Has to fit at least one
/// maximum-size frame header plus a payload chunk; larger frames are
/// streamed through the buffer over multiple read cycles.
pub const DEFAULT_BUF_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct FramingConfig {
    /// Capacity of the decoder scratch buffer.
    pub decode_buf_size: usize,
    /// Capacity of the encoder scratch buffer.
    pub encode_buf_size: usize,
    /// Reject frames whose declared payload exceeds this, if set. `None`
    /// streams frames of any length the wire format can express.
    pub max_frame_size: Option<u64>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        FramingConfig {
            decode_buf_size: DEFAULT_BUF_SIZE,
            encode_buf_size: DEFAULT_BUF_SIZE,
            max_frame_size: None,
        }
    }
}
