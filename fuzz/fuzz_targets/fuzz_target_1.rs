#![no_main]

use frame_flow::config::FramingConfig;
use frame_flow::connection::WSConnection;
use frame_flow::error::ErrorKind;
use frame_flow::frame::Encoding;
use frame_flow::transport::Transport;
use libfuzzer_sys::fuzz_target;
use std::io;

/// Serves the fuzz input in fixed-size slices, so the decoder sees the
/// same bytes under many different read-boundary placements.
struct BytesTransport {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl BytesTransport {
    fn exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

impl Transport for BytesTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.exhausted() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        Ok(n)
    }
}

// Drives the frame decoder with arbitrary bytes under an arbitrary read
// chunking. Whatever the input, the decoder must neither panic nor spin:
// every outcome is payload, a classified error, or an orderly stop.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let chunk = (data[0] as usize).max(1);
    let mut transport = BytesTransport {
        data: data[1..].to_vec(),
        pos: 0,
        chunk,
    };

    let mut connection = WSConnection::new(Encoding::Binary, &FramingConfig::default());
    let mut dst = [0u8; 512];
    for _ in 0..100_000 {
        match connection.read(&mut transport, &mut dst) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if transport.exhausted() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
});
